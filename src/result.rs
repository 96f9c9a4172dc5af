use float_ord::FloatOrd;
use geo::Coord;
use serde::Serialize;

use crate::{
    select::select_predominant,
    util::{box_stats, polygon_area, Quad},
    SelectionOptions,
};

/// One recognized text fragment with its geometry derived once on construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionRecord {
    pub text: String,
    pub confidence: f32,
    #[serde(rename = "box")]
    pub bounds: Quad,
    pub area: f32,
    pub height: f32,
    pub width: f32,
    #[serde(skip)]
    pub(crate) center: Coord<f32>,
    #[serde(skip)]
    pub(crate) top: f32,
}

impl DetectionRecord {
    pub fn new(text: impl Into<String>, confidence: f32, bounds: Quad) -> Self {
        let stats = box_stats(&bounds);
        Self {
            text: text.into(),
            confidence,
            area: polygon_area(&bounds),
            height: stats.height,
            width: stats.width,
            center: stats.center,
            top: stats.min.y,
            bounds,
        }
    }

    pub fn center(&self) -> Coord<f32> {
        self.center
    }
}

/// The single label picked as the most prominent text in an image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Selection {
    pub text: String,
    pub confidence: f32,
    #[serde(rename = "box")]
    pub bounds: Quad,
    pub area: f32,
    pub score: f32,
    pub line_count: usize,
}

impl Selection {
    pub(crate) fn from_record(record: &DetectionRecord) -> Self {
        Self {
            text: record.text.clone(),
            confidence: record.confidence,
            bounds: record.bounds.clone(),
            area: record.area,
            score: record.height * record.confidence,
            line_count: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OcrResponse {
    pub lines: Vec<DetectionRecord>,
    pub text: String,
    pub predominant: Option<Selection>,
    pub largest_line: Option<DetectionRecord>,
}

impl OcrResponse {
    pub fn from_records(lines: Vec<DetectionRecord>, options: &SelectionOptions) -> Self {
        let text = lines
            .iter()
            .map(|line| line.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let predominant = select_predominant(&lines, options);
        let largest_line = lines
            .iter()
            .rev()
            .max_by_key(|line| FloatOrd(line.area))
            .cloned();
        Self {
            lines,
            text,
            predominant,
            largest_line,
        }
    }
}
