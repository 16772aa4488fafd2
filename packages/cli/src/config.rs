//! Application configuration.
//!
//! Read from the optional `--config` TOML file. Every section and key is
//! optional; omitted values take the defaults compiled into
//! [`LoaderConfig`] and [`MatcherConfig`].

use std::path::Path;

use bonus_map_association::MatcherConfig;
use bonus_map_loader::LoaderConfig;
use serde::{Deserialize, Serialize};

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Failed to read config {path}: {source}")]
    Io {
        /// Config file path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The file is not valid TOML for [`AppConfig`].
    #[error("Failed to parse config {path}: {source}")]
    Parse {
        /// Config file path.
        path: String,
        /// Underlying error.
        source: toml::de::Error,
    },

    /// A section failed validation.
    #[error("Invalid [{section}] config: {message}")]
    Invalid {
        /// Offending TOML section.
        section: &'static str,
        /// Validation message.
        message: String,
    },
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// `[loader]` section.
    pub loader: LoaderConfig,
    /// `[matcher]` section.
    pub matcher: MatcherConfig,
}

impl AppConfig {
    /// Parses and validates TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the text does not parse or a section is
    /// invalid.
    pub fn from_toml(text: &str, path: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path`, or returns the defaults when no path is given.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: display.clone(),
            source,
        })?;
        let config = Self::from_toml(&text, &display)?;
        log::info!("Loaded configuration from {display}");
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.loader.validate().map_err(|e| ConfigError::Invalid {
            section: "loader",
            message: e.message,
        })?;
        self.matcher.validate().map_err(|e| ConfigError::Invalid {
            section: "matcher",
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = AppConfig::from_toml("", "test.toml").unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = AppConfig::from_toml(
            "[loader]\ntarget_duration_secs = 2.5\n\n[matcher]\nworking_srid = 5070\n",
            "test.toml",
        )
        .unwrap();

        assert!((config.loader.target_duration_secs - 2.5).abs() < f64::EPSILON);
        assert_eq!(config.loader.calibration_window, 5);
        assert_eq!(config.matcher.working_srid, 5070);
        assert!((config.matcher.min_overlap_area - 0.02).abs() < f64::EPSILON);
    }

    #[test]
    fn invalid_values_name_their_section() {
        let err = AppConfig::from_toml("[loader]\nsmoothing_alpha = 0.0\n", "test.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { section: "loader", .. }), "{err}");
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = AppConfig::load(Some(Path::new("/nonexistent/bonus_map.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert_eq!(AppConfig::load(None).unwrap(), AppConfig::default());
    }
}
