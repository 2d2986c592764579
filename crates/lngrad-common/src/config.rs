//! Kernel configuration file format.
//!
//! Loads [`GradKernelConfig`] from a TOML file (`lngrad.toml`) with
//! environment variable overrides via `LNGRAD_*` prefixed variables.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default number of partial accumulators per column.
pub const DEFAULT_PART_SIZE: usize = 16;

/// Upper bound accepted for `part_size`.
pub const MAX_PART_SIZE: usize = 1024;

/// Tuning knobs for the layer-norm backward kernels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradKernelConfig {
    /// Partial-reduction fan-out for the scale/bias gradients.
    /// Override: `LNGRAD_PART_SIZE`
    pub part_size: usize,

    /// Try the CUDA provider before the CPU reference.
    /// Override: `LNGRAD_PREFER_GPU`
    pub prefer_gpu: bool,

    /// Zero-based CUDA device index.
    /// Override: `LNGRAD_DEVICE_INDEX`
    pub device_index: usize,
}

impl Default for GradKernelConfig {
    fn default() -> Self {
        Self { part_size: DEFAULT_PART_SIZE, prefer_gpu: true, device_index: 0 }
    }
}

/// Errors that can occur when loading or validating a [`GradKernelConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("invalid environment override {key}={value}: {reason}")]
    EnvOverride { key: String, value: String, reason: String },
}

impl GradKernelConfig {
    /// Render the default configuration as TOML.
    pub fn default_toml() -> Result<String, ConfigFileError> {
        Ok(toml::to_string_pretty(&Self::default())?)
    }

    /// Load configuration from a TOML file, falling back to defaults for
    /// missing fields, then apply environment variable overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigFileError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Load from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigFileError> {
        let mut cfg: GradKernelConfig = toml::from_str(toml_str)?;
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load only from environment variables, starting from defaults.
    pub fn from_env() -> Result<Self, ConfigFileError> {
        let mut cfg = Self::default();
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigFileError> {
        if self.part_size == 0 {
            return Err(ConfigFileError::Validation("part_size must be > 0".into()));
        }
        if self.part_size > MAX_PART_SIZE {
            return Err(ConfigFileError::Validation(format!(
                "part_size must be <= {MAX_PART_SIZE}, got {}",
                self.part_size
            )));
        }
        Ok(())
    }

    /// Apply `LNGRAD_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigFileError> {
        if let Ok(val) = std::env::var("LNGRAD_PART_SIZE") {
            self.part_size = val.parse::<usize>().map_err(|e| ConfigFileError::EnvOverride {
                key: "LNGRAD_PART_SIZE".into(),
                value: val.clone(),
                reason: e.to_string(),
            })?;
        }

        if let Ok(val) = std::env::var("LNGRAD_PREFER_GPU") {
            self.prefer_gpu = match val.to_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => {
                    return Err(ConfigFileError::EnvOverride {
                        key: "LNGRAD_PREFER_GPU".into(),
                        value: val.clone(),
                        reason: "expected a boolean".into(),
                    });
                }
            };
        }

        if let Ok(val) = std::env::var("LNGRAD_DEVICE_INDEX") {
            self.device_index = val.parse::<usize>().map_err(|e| ConfigFileError::EnvOverride {
                key: "LNGRAD_DEVICE_INDEX".into(),
                value: val.clone(),
                reason: e.to_string(),
            })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 3] = ["LNGRAD_PART_SIZE", "LNGRAD_PREFER_GPU", "LNGRAD_DEVICE_INDEX"];

    fn cleared() -> Vec<(&'static str, Option<&'static str>)> {
        VARS.iter().map(|k| (*k, None)).collect()
    }

    #[test]
    fn test_default_config_is_valid() {
        let cfg = GradKernelConfig::default();
        assert_eq!(cfg.part_size, 16);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    #[serial(lngrad_env)]
    fn test_default_toml_round_trips() {
        temp_env::with_vars(cleared(), || {
            let toml_str = GradKernelConfig::default_toml().unwrap();
            let cfg = GradKernelConfig::from_toml(&toml_str).unwrap();
            assert_eq!(cfg, GradKernelConfig::default());
        });
    }

    #[test]
    #[serial(lngrad_env)]
    fn test_partial_toml_keeps_defaults() {
        temp_env::with_vars(cleared(), || {
            let cfg = GradKernelConfig::from_toml("part_size = 32\n").unwrap();
            assert_eq!(cfg.part_size, 32);
            assert!(cfg.prefer_gpu);
            assert_eq!(cfg.device_index, 0);
        });
    }

    #[test]
    fn test_validation_part_size_zero() {
        let cfg = GradKernelConfig { part_size: 0, ..Default::default() };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("part_size must be > 0"));
    }

    #[test]
    fn test_validation_part_size_too_large() {
        let cfg = GradKernelConfig { part_size: 4096, ..Default::default() };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("<= 1024"));
    }

    #[test]
    #[serial(lngrad_env)]
    fn test_env_override_multiple_fields() {
        temp_env::with_vars(
            [
                ("LNGRAD_PART_SIZE", Some("64")),
                ("LNGRAD_PREFER_GPU", Some("no")),
                ("LNGRAD_DEVICE_INDEX", Some("2")),
            ],
            || {
                let cfg = GradKernelConfig::from_env().unwrap();
                assert_eq!(cfg.part_size, 64);
                assert!(!cfg.prefer_gpu);
                assert_eq!(cfg.device_index, 2);
            },
        );
    }

    #[test]
    #[serial(lngrad_env)]
    fn test_env_override_wins_over_file() {
        temp_env::with_vars(
            [
                ("LNGRAD_PART_SIZE", Some("8")),
                ("LNGRAD_PREFER_GPU", None),
                ("LNGRAD_DEVICE_INDEX", None),
            ],
            || {
                let cfg = GradKernelConfig::from_toml("part_size = 32\n").unwrap();
                assert_eq!(cfg.part_size, 8);
            },
        );
    }

    #[test]
    #[serial(lngrad_env)]
    fn test_env_override_invalid_part_size() {
        temp_env::with_vars(
            [
                ("LNGRAD_PART_SIZE", Some("sixteen")),
                ("LNGRAD_PREFER_GPU", None),
                ("LNGRAD_DEVICE_INDEX", None),
            ],
            || match GradKernelConfig::from_env().unwrap_err() {
                ConfigFileError::EnvOverride { key, .. } => assert_eq!(key, "LNGRAD_PART_SIZE"),
                other => panic!("expected EnvOverride, got: {other}"),
            },
        );
    }

    #[test]
    #[serial(lngrad_env)]
    fn test_env_override_zero_part_size_fails_validation() {
        temp_env::with_vars(
            [
                ("LNGRAD_PART_SIZE", Some("0")),
                ("LNGRAD_PREFER_GPU", None),
                ("LNGRAD_DEVICE_INDEX", None),
            ],
            || {
                let err = GradKernelConfig::from_env().unwrap_err();
                assert!(matches!(err, ConfigFileError::Validation(_)));
            },
        );
    }

    #[test]
    #[serial(lngrad_env)]
    fn test_load_from_tempfile() {
        temp_env::with_vars(cleared(), || {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("lngrad.toml");
            std::fs::write(&path, "part_size = 4\nprefer_gpu = false\n").unwrap();
            let cfg = GradKernelConfig::load(&path).unwrap();
            assert_eq!(cfg.part_size, 4);
            assert!(!cfg.prefer_gpu);
        });
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = GradKernelConfig::load(Path::new("/nonexistent/lngrad.toml"));
        assert!(matches!(result, Err(ConfigFileError::Io(_))));
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let result = GradKernelConfig::from_toml("part_size = \"many\"");
        assert!(matches!(result, Err(ConfigFileError::Parse(_))));
    }
}
