use image::DynamicImage;
use serde::Deserialize;
use tracing::instrument;

mod cluster;
mod config;
pub mod deskew;
mod error;
mod recognizer;
mod result;
mod score;
mod select;
pub mod util;

pub use cluster::{cluster_lines, Cluster};
pub use config::Config;
pub use error::{BoxError, Error, Result};
pub use recognizer::{
    normalize, parse_detections, PrecomputedRecognizer, RawBox, RawDetection, RawText, Recognizer,
};
pub use result::*;
pub use score::score;
pub use select::select_predominant;

pub struct LabelServiceBuilder {
    recognizer: Box<dyn Recognizer>,
    deskew: DeskewOptions,
    selection: SelectionOptions,
}

impl LabelServiceBuilder {
    pub fn new(recognizer: impl Recognizer + 'static) -> Self {
        Self {
            recognizer: Box::new(recognizer),
            deskew: DeskewOptions::default(),
            selection: SelectionOptions::default(),
        }
    }

    pub fn deskew(mut self, options: DeskewOptions) -> Self {
        self.deskew = options;
        self
    }

    pub fn selection(mut self, options: SelectionOptions) -> Self {
        self.selection = options;
        self
    }

    pub fn config(self, config: Config) -> Self {
        self.deskew(config.deskew).selection(config.selection)
    }

    #[instrument(skip(self))]
    pub fn build(self) -> Result<LabelService> {
        self.deskew.validate()?;
        self.selection.validate()?;
        Ok(LabelService {
            recognizer: self.recognizer,
            deskew: self.deskew,
            selection: self.selection,
        })
    }
}

/// Built once at startup and shared by reference between requests.
pub struct LabelService {
    recognizer: Box<dyn Recognizer>,
    deskew: DeskewOptions,
    selection: SelectionOptions,
}

impl LabelService {
    pub fn builder(recognizer: impl Recognizer + 'static) -> LabelServiceBuilder {
        LabelServiceBuilder::new(recognizer)
    }

    #[instrument(skip(self, bytes), fields(bytes = bytes.len()))]
    pub fn process(&self, bytes: &[u8]) -> Result<OcrResponse> {
        let image = image::load_from_memory(bytes)?;
        self.process_image(&image)
    }

    #[instrument(skip(self, image))]
    pub fn process_image(&self, image: &DynamicImage) -> Result<OcrResponse> {
        let normalized;
        let image = if self.deskew.enabled {
            normalized = DynamicImage::ImageLuma8(deskew::deskew(image, &self.deskew));
            &normalized
        } else {
            image
        };
        let raw = self
            .recognizer
            .recognize(image)
            .map_err(Error::Recognition)?;
        let records = normalize(raw);
        let response = OcrResponse::from_records(records, &self.selection);
        log::debug!(
            "Recognized {} lines, predominant: {:?}",
            response.lines.len(),
            response.predominant.as_ref().map(|it| it.text.as_str())
        );
        Ok(response)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeskewOptions {
    pub enabled: bool,
    pub median_radius: u32,
    pub clahe_clip_limit: f32,
    pub clahe_grid: u32,
    pub threshold_block_size: u32,
    pub threshold_offset: f32,
}

impl DeskewOptions {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.threshold_block_size < 3 || self.threshold_block_size % 2 == 0 {
            return Err(Error::Config(format!(
                "threshold_block_size must be odd and at least 3, got {}",
                self.threshold_block_size
            )));
        }
        if self.clahe_grid == 0 {
            return Err(Error::Config("clahe_grid must be at least 1".into()));
        }
        Ok(())
    }
}

impl Default for DeskewOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            median_radius: 1,
            clahe_clip_limit: 2.0,
            clahe_grid: 8,
            threshold_block_size: 31,
            threshold_offset: 15.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SelectionOptions {
    pub min_confidence: f32,
    pub dominant_height_ratio: f32,
    pub height_quantile: f32,
    pub cluster_distance_ratio: f32,
}

impl SelectionOptions {
    pub(crate) fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(Error::Config(format!(
                "min_confidence must be within [0, 1], got {}",
                self.min_confidence
            )));
        }
        if !(0.0..=1.0).contains(&self.height_quantile) {
            return Err(Error::Config(format!(
                "height_quantile must be within [0, 1], got {}",
                self.height_quantile
            )));
        }
        if !(self.dominant_height_ratio > 0.0 && self.cluster_distance_ratio > 0.0) {
            return Err(Error::Config("height and distance ratios must be positive".into()));
        }
        Ok(())
    }
}

impl Default for SelectionOptions {
    fn default() -> Self {
        Self {
            min_confidence: 0.6,
            dominant_height_ratio: 1.5,
            height_quantile: 0.5,
            cluster_distance_ratio: 1.2,
        }
    }
}
