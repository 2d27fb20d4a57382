//! # Offline Common
//!
//! Common error types, logging configuration, and the configuration file model
//! shared by the Offline Shell crates.
//!
//! ## Features
//!
//! - Unified error type for configuration and I/O failures
//! - Logging configuration and setup
//! - JSON configuration with defaults for every field
//! - Result extension traits

use thiserror::Error;

pub mod config;
pub mod logging;

pub use config::OfflineConfig;
pub use logging::{init_logging, LogConfig, LogFormat};

/// Unified error type for Offline Shell.
#[derive(Error, Debug)]
pub enum OfflineError {
    /// Configuration errors.
    #[error("Config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parse errors.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),
}

impl OfflineError {
    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a config error with source.
    pub fn config_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Get the error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            OfflineError::Config { .. } => "config",
            OfflineError::Io(_) => "io",
            OfflineError::Json(_) => "json",
            OfflineError::Url(_) => "url",
            OfflineError::NotFound(_) => "not_found",
        }
    }
}

/// Result type alias for Offline Shell operations.
pub type Result<T> = std::result::Result<T, OfflineError>;

/// Extension trait for Result.
pub trait ResultExt<T> {
    /// Wrap any error as a config error with context.
    fn config_context(self, message: impl Into<String>) -> Result<T>;
}

impl<T, E: std::error::Error + Send + Sync + 'static> ResultExt<T> for std::result::Result<T, E> {
    fn config_context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| OfflineError::config_with_source(message, e))
    }
}

/// Extension trait for Option.
pub trait OptionExt<T> {
    /// Convert None to a NotFound error.
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| OfflineError::NotFound(resource.into()))
    }
}
