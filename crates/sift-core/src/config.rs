//! Engine configuration
//!
//! Loaded from TOML with every field defaulted, then overridden by `SIFT_*`
//! environment variables.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::error::{SiftError, SiftResult};

/// Output format of the log subscriber installed by [`crate::init`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Estimated selectivity of a pattern that takes part in an equi-join
    #[serde(default = "default_join_selectivity")]
    pub join_selectivity: f64,
    /// Estimated selectivity of every other pattern
    #[serde(default = "default_cross_selectivity")]
    pub cross_selectivity: f64,
    #[serde(default = "default_true")]
    pub enable_alpha_sharing: bool,
    #[serde(default = "default_true")]
    pub enable_beta_sharing: bool,
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            join_selectivity: default_join_selectivity(),
            cross_selectivity: default_cross_selectivity(),
            enable_alpha_sharing: true,
            enable_beta_sharing: true,
            log_format: LogFormat::default(),
            log_filter: default_log_filter(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> SiftResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> SiftResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| SiftError::configuration(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Read `SIFT_CONFIG_PATH` when set, then apply `SIFT_*` overrides
    pub fn from_environment() -> SiftResult<Self> {
        let base = match std::env::var("SIFT_CONFIG_PATH") {
            Ok(path) => {
                info!(path = %path, "Loading engine configuration");
                Self::from_file(path)?
            }
            Err(_) => Self::default(),
        };
        base.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `SIFT_*` overrides read through `lookup`
    pub fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> SiftResult<Self> {
        if let Some(value) = lookup("SIFT_JOIN_SELECTIVITY") {
            self.join_selectivity = parse_override("SIFT_JOIN_SELECTIVITY", &value)?;
        }
        if let Some(value) = lookup("SIFT_CROSS_SELECTIVITY") {
            self.cross_selectivity = parse_override("SIFT_CROSS_SELECTIVITY", &value)?;
        }
        if let Some(value) = lookup("SIFT_ALPHA_SHARING") {
            self.enable_alpha_sharing = parse_override("SIFT_ALPHA_SHARING", &value)?;
        }
        if let Some(value) = lookup("SIFT_BETA_SHARING") {
            self.enable_beta_sharing = parse_override("SIFT_BETA_SHARING", &value)?;
        }
        if let Some(value) = lookup("SIFT_LOG_FORMAT") {
            self.log_format = match value.to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                other => {
                    warn!(value = other, "Unknown SIFT_LOG_FORMAT, keeping {:?}", self.log_format);
                    self.log_format
                }
            };
        }
        if let Some(value) = lookup("SIFT_LOG") {
            self.log_filter = value;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> SiftResult<()> {
        for (name, value) in [("join_selectivity", self.join_selectivity), ("cross_selectivity", self.cross_selectivity)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(SiftError::configuration(format!("{name} must lie in [0, 1], got {value}")));
            }
        }
        Ok(())
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, value: &str) -> SiftResult<T> {
    value
        .parse()
        .map_err(|_| SiftError::configuration(format!("invalid value '{value}' for {key}")))
}

fn default_join_selectivity() -> f64 {
    0.3
}

fn default_cross_selectivity() -> f64 {
    0.8
}

fn default_true() -> bool {
    true
}

fn default_log_filter() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_toml_yields_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.join_selectivity, 0.3);
        assert_eq!(config.cross_selectivity, 0.8);
    }

    #[test]
    fn toml_fields_override_defaults() {
        let config = EngineConfig::from_toml_str(
            "enable_beta_sharing = false\nlog_format = \"json\"\njoin_selectivity = 0.1\n",
        )
        .unwrap();
        assert!(!config.enable_beta_sharing);
        assert!(config.enable_alpha_sharing);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.join_selectivity, 0.1);
    }

    #[test]
    fn out_of_range_selectivity_is_rejected() {
        let err = EngineConfig::from_toml_str("cross_selectivity = 1.5").unwrap_err();
        assert!(matches!(err, SiftError::Configuration { .. }));
    }

    #[test]
    fn environment_overrides() {
        let vars: HashMap<&str, &str> =
            [("SIFT_ALPHA_SHARING", "false"), ("SIFT_LOG", "sift_core=debug"), ("SIFT_LOG_FORMAT", "JSON")]
                .into_iter()
                .collect();
        let config = EngineConfig::default()
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert!(!config.enable_alpha_sharing);
        assert_eq!(config.log_filter, "sift_core=debug");
        assert_eq!(config.log_format, LogFormat::Json);

        let err = EngineConfig::default()
            .apply_overrides(|key| (key == "SIFT_BETA_SHARING").then(|| "maybe".to_string()))
            .unwrap_err();
        assert!(matches!(err, SiftError::Configuration { .. }));
    }
}
