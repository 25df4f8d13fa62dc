//! CHV-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, ChaosError>;

/// Top-level error type for chaos_verdict.
#[derive(Debug, Error)]
pub enum ChaosError {
    #[error("[CHV-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[CHV-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[CHV-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[CHV-1101] invalid scenario {name}: {details}")]
    InvalidScenario { name: String, details: String },

    #[error("[CHV-1102] unsupported scenario file format: {path}")]
    UnsupportedScenarioFormat { path: PathBuf },

    #[error("[CHV-2001] measurement provider failure for {service}: {details}")]
    Measurement { service: String, details: String },

    #[error("[CHV-2002] injection failure for {target}: {details}")]
    Injection { target: String, details: String },

    #[error("[CHV-2003] rollback failure for {service}: {details}")]
    Rollback { service: String, details: String },

    #[error("[CHV-2004] platform command {program} failed: {details}")]
    PlatformCommand { program: String, details: String },

    #[error("[CHV-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[CHV-2201] illegal runner transition {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("[CHV-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[CHV-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl ChaosError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "CHV-1001",
            Self::MissingConfig { .. } => "CHV-1002",
            Self::ConfigParse { .. } => "CHV-1003",
            Self::InvalidScenario { .. } => "CHV-1101",
            Self::UnsupportedScenarioFormat { .. } => "CHV-1102",
            Self::Measurement { .. } => "CHV-2001",
            Self::Injection { .. } => "CHV-2002",
            Self::Rollback { .. } => "CHV-2003",
            Self::PlatformCommand { .. } => "CHV-2004",
            Self::Serialization { .. } => "CHV-2101",
            Self::IllegalTransition { .. } => "CHV-2201",
            Self::Io { .. } => "CHV-3002",
            Self::Runtime { .. } => "CHV-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::Measurement { .. }
                | Self::PlatformCommand { .. }
                | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for ChaosError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for ChaosError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
