//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading configuration or the fleet catalog.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `FLEET_PROVIDERS` named a provider this build does not know.
    #[error("unknown cloud provider '{value}': expected gcp, azure or local")]
    UnknownProvider { value: String },

    /// `FLEET_PROVIDERS` was set but empty.
    #[error("no cloud providers configured")]
    NoProviders,

    /// A required environment variable was not set.
    ///
    /// Only raised for providers that are actually enabled.
    #[error("missing required environment variable: {name}")]
    MissingEnvVar { name: &'static str },

    /// A duration that drives a timer was configured as zero.
    #[error("{name} must be greater than zero")]
    ZeroDuration { name: &'static str },

    /// The closing-soon window does not fit inside the online window.
    #[error("warning window ({warning_secs}s) must be shorter than the online window ({online_secs}s)")]
    WindowOrder { warning_secs: u64, online_secs: u64 },

    /// Specified path does not exist on the filesystem.
    #[error("path does not exist: {path}")]
    PathNotFound { path: PathBuf },

    /// Path exists but is not a file (when a file was expected).
    #[error("path is not a file: {path}")]
    NotAFile { path: PathBuf },

    #[error("failed to read fleet catalog {path}: {source}")]
    CatalogRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse fleet catalog {path}: {source}")]
    CatalogParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Catalog entry at `index` has an empty id.
    #[error("catalog entry #{index} has an empty id")]
    EmptyId { index: usize },

    #[error("instance '{id}' appears more than once in the fleet catalog")]
    DuplicateInstance { id: String },

    /// A connection profile is missing a required value.
    #[error("instance '{id}': profile '{profile}' has an empty {field}")]
    InvalidProfile {
        id: String,
        profile: String,
        field: &'static str,
    },
}
