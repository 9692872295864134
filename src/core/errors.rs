//! FAP-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, FapError>;

/// Top-level error type for the autopilot policy engine.
#[derive(Debug, Error)]
pub enum FapError {
    #[error("[FAP-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[FAP-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[FAP-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[FAP-1101] validation failed for {field}: {details}")]
    Validation { field: String, details: String },

    #[error("[FAP-2001] configuration store failure in {context}: {details}")]
    Persistence {
        context: &'static str,
        details: String,
    },

    #[error("[FAP-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[FAP-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[FAP-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[FAP-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl FapError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "FAP-1001",
            Self::MissingConfig { .. } => "FAP-1002",
            Self::ConfigParse { .. } => "FAP-1003",
            Self::Validation { .. } => "FAP-1101",
            Self::Persistence { .. } => "FAP-2001",
            Self::Serialization { .. } => "FAP-2101",
            Self::Io { .. } => "FAP-3002",
            Self::ChannelClosed { .. } => "FAP-3003",
            Self::Runtime { .. } => "FAP-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    ///
    /// The engine never retries on its own; this only informs the caller.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Persistence { .. }
                | Self::Io { .. }
                | Self::ChannelClosed { .. }
                | Self::Runtime { .. }
        )
    }

    /// HTTP status an API adapter should answer with.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::Validation { .. } => 400,
            _ => 500,
        }
    }

    /// Message safe to return to a remote client.
    ///
    /// Validation errors carry field detail; everything else is generic so
    /// store internals never leak over the wire.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Validation { field, details } => format!("invalid {field}: {details}"),
            Self::Persistence { .. } => "failed to persist configuration".to_string(),
            _ => "internal server error".to_string(),
        }
    }

    /// Convenience constructor for validation errors.
    #[must_use]
    pub fn validation(field: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            details: details.into(),
        }
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

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for FapError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Persistence {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for FapError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for FapError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
