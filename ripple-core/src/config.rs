//! Configuration loading for ripple.
//!
//! All fields are required unless explicitly marked optional. No defaults.

use crate::query::QueryParams;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "RIPPLE_CONFIG";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RippleConfig {
    pub ws_endpoint: String,
    pub project: String,
    pub reconnect: ReconnectConfig,
    pub log: LogConfig,
    pub watch: WatchConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconnectConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub multiplier: f64,
    pub jitter_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    pub json: bool,
}

/// Which cache kind a watch targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchKind {
    ActivityFeed,
    ReviewableProcessing,
    TaskFolder,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchConfig {
    pub kind: WatchKind,
    pub entity_ids: Option<Vec<String>>,
    pub types: Option<Vec<String>>,
}

impl WatchConfig {
    /// Query params equivalent to this watch.
    pub fn params(&self, project: &str) -> QueryParams {
        let mut params = QueryParams::new(project);
        if let Some(ids) = &self.entity_ids {
            params = params.with_entity_ids(ids.iter().cloned());
        }
        if let Some(types) = &self.types {
            params = params.with_types(types.iter().cloned());
        }
        params
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or RIPPLE_CONFIG)")]
    MissingConfigPath,
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl RippleConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let path = path.ok_or(ConfigError::MissingConfigPath)?;
        let config = Self::from_path(&path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: RippleConfig = toml::from_str(contents)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ws_endpoint.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "ws_endpoint",
                reason: "must not be empty".to_string(),
            });
        }
        if !(self.ws_endpoint.starts_with("ws://") || self.ws_endpoint.starts_with("wss://")) {
            return Err(ConfigError::InvalidValue {
                field: "ws_endpoint",
                reason: "must use ws:// or wss://".to_string(),
            });
        }
        if self.project.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "project",
                reason: "must not be empty".to_string(),
            });
        }
        if self.reconnect.initial_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "reconnect.initial_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.reconnect.max_ms < self.reconnect.initial_ms {
            return Err(ConfigError::InvalidValue {
                field: "reconnect.max_ms",
                reason: "must be >= initial_ms".to_string(),
            });
        }
        if self.reconnect.multiplier < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "reconnect.multiplier",
                reason: "must be >= 1.0".to_string(),
            });
        }
        if self.log.filter.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "log.filter",
                reason: "must not be empty".to_string(),
            });
        }
        if let Some(ids) = &self.watch.entity_ids {
            if ids.is_empty() || ids.iter().any(|id| id.trim().is_empty()) {
                return Err(ConfigError::InvalidValue {
                    field: "watch.entity_ids",
                    reason: "omit for no restriction; entries must not be empty".to_string(),
                });
            }
        }
        if let Some(types) = &self.watch.types {
            if types.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "watch.types",
                    reason: "omit for no restriction".to_string(),
                });
            }
        }
        Ok(())
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
ws_endpoint = "ws://localhost:5000/ws"
project = "demo"

[reconnect]
initial_ms = 250
max_ms = 5000
multiplier = 1.5
jitter_ms = 100

[log]
filter = "ripple=debug"
json = false

[watch]
kind = "activity_feed"
entity_ids = ["v1"]
types = ["comment", "checklist"]
"#;

    #[test]
    fn test_parse_sample_config() {
        let config = RippleConfig::from_toml(SAMPLE).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.watch.kind, WatchKind::ActivityFeed);

        let params = config.watch.params(&config.project);
        assert_eq!(params.project, "demo");
        assert_eq!(params.scope_ids().count(), 1);
        assert_eq!(params.types.as_ref().map(|t| t.len()), Some(2));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let contents = format!("{SAMPLE}\nextra = 1\n");
        assert!(matches!(
            RippleConfig::from_toml(&contents),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_validate_rejects_http_endpoint() {
        let mut config = RippleConfig::from_toml(SAMPLE).unwrap();
        config.ws_endpoint = "http://localhost".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "ws_endpoint", .. })
        ));
    }

    #[test]
    fn test_validate_rejects_shrinking_backoff() {
        let mut config = RippleConfig::from_toml(SAMPLE).unwrap();
        config.reconnect.multiplier = 0.5;
        assert!(config.validate().is_err());

        let mut config = RippleConfig::from_toml(SAMPLE).unwrap();
        config.reconnect.max_ms = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_scope_list() {
        let mut config = RippleConfig::from_toml(SAMPLE).unwrap();
        config.watch.entity_ids = Some(vec![]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_path_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = RippleConfig::from_path(file.path()).unwrap();
        assert_eq!(config.project, "demo");
    }

    #[test]
    fn test_from_path_missing_file() {
        let result = RippleConfig::from_path(Path::new("/nonexistent/ripple.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
