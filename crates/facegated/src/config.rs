use std::path::{Path, PathBuf};
use std::str::FromStr;

use facegate_core::liveness::{
    DEFAULT_BLINK_COOLDOWN_MS, DEFAULT_CLOSED_FRAMES_REQUIRED, DEFAULT_EAR_THRESHOLD,
    DEFAULT_OPEN_MARGIN,
};
use facegate_core::matcher::{DEFAULT_DUPLICATE_THRESHOLD, DEFAULT_RECOGNIZE_THRESHOLD};
use facegate_core::{LivenessParams, MatchPolicy, DEFAULT_EMBEDDING_DIM};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Daemon configuration.
///
/// Built from defaults, then an optional TOML file named by `FACEGATE_CONFIG`,
/// then `FACEGATE_*` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Cosine score a probe must exceed to be recognized.
    pub recognize_threshold: f32,
    /// Cosine score an enrollment must exceed to be rejected as a duplicate.
    pub duplicate_threshold: f32,
    /// Output dimension of the embedding model feeding the galleries.
    pub embedding_dim: usize,
    /// EAR below which the eyes count as closed.
    pub ear_threshold: f32,
    /// Margin above `ear_threshold` before the eyes count as open.
    pub open_margin: f32,
    /// Consecutive closed frames that make a blink.
    pub closed_frames_required: u32,
    /// Minimum gap between two accepted blinks in one session.
    pub blink_cooldown_ms: u64,
    /// Serve on the session bus instead of the system bus (development mode).
    pub session_bus: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            recognize_threshold: DEFAULT_RECOGNIZE_THRESHOLD,
            duplicate_threshold: DEFAULT_DUPLICATE_THRESHOLD,
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            ear_threshold: DEFAULT_EAR_THRESHOLD,
            open_margin: DEFAULT_OPEN_MARGIN,
            closed_frames_required: DEFAULT_CLOSED_FRAMES_REQUIRED,
            blink_cooldown_ms: DEFAULT_BLINK_COOLDOWN_MS,
            session_bus: false,
        }
    }
}

impl Config {
    /// Load from `FACEGATE_CONFIG` (if set) and `FACEGATE_*` overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("FACEGATE_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override fields from `FACEGATE_*` variables as resolved by `lookup`.
    /// Unparseable values are ignored with a warning.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        self.recognize_threshold =
            env_or(&lookup, "FACEGATE_RECOGNIZE_THRESHOLD", self.recognize_threshold);
        self.duplicate_threshold =
            env_or(&lookup, "FACEGATE_DUPLICATE_THRESHOLD", self.duplicate_threshold);
        self.embedding_dim = env_or(&lookup, "FACEGATE_EMBEDDING_DIM", self.embedding_dim);
        self.ear_threshold = env_or(&lookup, "FACEGATE_EAR_THRESHOLD", self.ear_threshold);
        self.open_margin = env_or(&lookup, "FACEGATE_OPEN_MARGIN", self.open_margin);
        self.closed_frames_required =
            env_or(&lookup, "FACEGATE_CLOSED_FRAMES_REQUIRED", self.closed_frames_required);
        self.blink_cooldown_ms =
            env_or(&lookup, "FACEGATE_BLINK_COOLDOWN_MS", self.blink_cooldown_ms);
        if let Some(v) = lookup("FACEGATE_SESSION_BUS") {
            self.session_bus = v != "0";
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("recognize_threshold", self.recognize_threshold),
            ("duplicate_threshold", self.duplicate_threshold),
        ] {
            if !value.is_finite() || !(-1.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be within [-1, 1], got {value}"
                )));
            }
        }
        if self.embedding_dim == 0 {
            return Err(ConfigError::Invalid("embedding_dim must be positive".to_string()));
        }
        if !self.ear_threshold.is_finite() || self.ear_threshold <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "ear_threshold must be positive, got {}",
                self.ear_threshold
            )));
        }
        if !self.open_margin.is_finite() || self.open_margin < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "open_margin must be non-negative, got {}",
                self.open_margin
            )));
        }
        if self.closed_frames_required == 0 {
            return Err(ConfigError::Invalid(
                "closed_frames_required must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn match_policy(&self) -> MatchPolicy {
        MatchPolicy {
            embedding_dim: self.embedding_dim,
            recognize_threshold: self.recognize_threshold,
            duplicate_threshold: self.duplicate_threshold,
        }
    }

    pub fn liveness_params(&self) -> LivenessParams {
        LivenessParams {
            ear_threshold: self.ear_threshold,
            open_margin: self.open_margin,
            closed_frames_required: self.closed_frames_required,
            blink_cooldown_ms: self.blink_cooldown_ms,
        }
    }
}

fn env_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring unparseable config override");
            default
        }),
    }
}
