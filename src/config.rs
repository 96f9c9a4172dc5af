use std::path::Path;

use serde::Deserialize;

use crate::{DeskewOptions, Result, SelectionOptions};

/// File configuration. Every key is optional and falls back to its default.
///
/// ```toml
/// [deskew]
/// enabled = true
/// threshold_block_size = 31
///
/// [selection]
/// min_confidence = 0.6
/// cluster_distance_ratio = 1.2
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub deskew: DeskewOptions,
    pub selection: SelectionOptions,
}

impl Config {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)?;
        config.deskew.validate()?;
        config.selection.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        log::debug!("Loading configuration from {}", path.display());
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_default() {
        assert_eq!(Config::from_toml_str("").unwrap(), Config::default());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::from_toml_str(
            r#"
            [deskew]
            enabled = false

            [selection]
            min_confidence = 0.4
            "#,
        )
        .unwrap();
        assert!(!config.deskew.enabled);
        assert_eq!(config.deskew.threshold_block_size, 31);
        assert_eq!(config.selection.min_confidence, 0.4);
        assert_eq!(config.selection.cluster_distance_ratio, 1.2);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = Config::from_toml_str("[selection]\nmin_confidenc = 0.4\n").unwrap_err();
        assert!(matches!(err, crate::Error::ConfigParse(_)));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let err = Config::from_toml_str("[selection]\nheight_quantile = 1.5\n").unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
        let err = Config::from_toml_str("[deskew]\nthreshold_block_size = 30\n").unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = Config::load("does/not/exist.toml").unwrap_err();
        assert!(matches!(err, crate::Error::Io(_)));
    }
}
