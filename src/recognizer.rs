use image::DynamicImage;
use serde::Deserialize;
use tracing::instrument;

use crate::{error::BoxError, util::Quad, DetectionRecord, Result};

/// The text recognition engine. Implementations must be shareable across requests.
pub trait Recognizer: Send + Sync {
    fn recognize(&self, image: &DynamicImage) -> std::result::Result<Vec<RawDetection>, BoxError>;
}

impl<F> Recognizer for F
where
    F: Fn(&DynamicImage) -> std::result::Result<Vec<RawDetection>, BoxError> + Send + Sync,
{
    fn recognize(&self, image: &DynamicImage) -> std::result::Result<Vec<RawDetection>, BoxError> {
        self(image)
    }
}

/// Replays detections an engine produced ahead of time, whatever image it is given.
#[derive(Debug, Clone, Default)]
pub struct PrecomputedRecognizer {
    detections: Vec<RawDetection>,
}

impl PrecomputedRecognizer {
    pub fn new(detections: Vec<RawDetection>) -> Self {
        Self { detections }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(Self::new(parse_detections(json)?))
    }
}

impl Recognizer for PrecomputedRecognizer {
    fn recognize(&self, _image: &DynamicImage) -> std::result::Result<Vec<RawDetection>, BoxError> {
        Ok(self.detections.clone())
    }
}

/// A box as engines emit it: corner points, or a flat `[x_min, y_min, x_max, y_max]`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawBox {
    Points(Vec<[f32; 2]>),
    Extent([f32; 4]),
}

impl RawBox {
    pub fn into_points(self) -> Quad {
        match self {
            RawBox::Points(points) => points,
            RawBox::Extent([x0, y0, x1, y1]) => vec![[x0, y0], [x1, y0], [x1, y1], [x0, y1]],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawText {
    Scored(String, f32),
    Plain(String),
}

/// One element of an engine's output, in any of the shapes engines are known to produce.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawDetection {
    Record {
        text: String,
        #[serde(default, alias = "score")]
        confidence: Option<f32>,
        #[serde(rename = "box", alias = "bounds")]
        bounds: RawBox,
    },
    /// Parallel arrays for a whole page, matched up by index.
    Page {
        #[serde(default)]
        rec_boxes: Vec<RawBox>,
        #[serde(default)]
        boxes: Vec<RawBox>,
        #[serde(default)]
        rec_polys: Vec<RawBox>,
        rec_texts: Vec<String>,
        #[serde(default)]
        rec_scores: Vec<f32>,
    },
    Pair(RawBox, RawText),
    Nested(Vec<RawDetection>),
}

impl RawDetection {
    fn into_records(self, records: &mut Vec<DetectionRecord>) {
        match self {
            RawDetection::Record {
                text,
                confidence,
                bounds,
            } => records.extend(record(text, confidence, bounds)),
            RawDetection::Page {
                rec_boxes,
                boxes,
                rec_polys,
                rec_texts,
                rec_scores,
            } => {
                let boxes = [rec_boxes, boxes, rec_polys]
                    .into_iter()
                    .find(|it| !it.is_empty())
                    .unwrap_or_default();
                for (index, (bounds, text)) in boxes.into_iter().zip(rec_texts).enumerate() {
                    records.extend(record(text, rec_scores.get(index).copied(), bounds));
                }
            }
            RawDetection::Pair(bounds, RawText::Scored(text, confidence)) => {
                records.extend(record(text, Some(confidence), bounds))
            }
            RawDetection::Pair(bounds, RawText::Plain(text)) => {
                records.extend(record(text, None, bounds))
            }
            RawDetection::Nested(detections) => {
                for detection in detections {
                    detection.into_records(records);
                }
            }
        }
    }
}

fn record(text: String, confidence: Option<f32>, bounds: RawBox) -> Option<DetectionRecord> {
    if text.trim().is_empty() {
        log::trace!("Dropping detection without text");
        return None;
    }
    let confidence = confidence.unwrap_or(1.0).clamp(0.0, 1.0);
    Some(DetectionRecord::new(text, confidence, bounds.into_points()))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawOutput {
    Many(Vec<RawDetection>),
    One(RawDetection),
}

/// Parses engine output JSON: either a list of detections or a single detection/page.
pub fn parse_detections(json: &str) -> Result<Vec<RawDetection>> {
    Ok(match serde_json::from_str(json)? {
        RawOutput::Many(detections) => detections,
        RawOutput::One(detection) => vec![detection],
    })
}

/// Flattens raw engine output into records, keeping engine order.
#[instrument(level = "debug", skip(raw), fields(raw = raw.len()))]
pub fn normalize(raw: Vec<RawDetection>) -> Vec<DetectionRecord> {
    let mut records = Vec::with_capacity(raw.len());
    for detection in raw {
        detection.into_records(&mut records);
    }
    log::debug!("Normalized {} detection records", records.len());
    records
}
