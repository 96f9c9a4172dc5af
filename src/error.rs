use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("image could not be decoded: {0}")]
    Decode(#[from] image::ImageError),
    #[error("text recognition failed: {0}")]
    Recognition(#[source] BoxError),
    #[error("recognition output is malformed: {0}")]
    MalformedDetections(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("could not parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the caller's input caused the failure, as opposed to a dependency or setup.
    pub fn is_user_fault(&self) -> bool {
        matches!(self, Error::Decode(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
