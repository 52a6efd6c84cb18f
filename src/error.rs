//! Error handling for iqtap
//!
//! This module defines the crate error type and a Result alias for use
//! throughout the library. Pipeline-specific failures live in
//! [`crate::pipeline::PipelineError`] and convert into this type.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for iqtap operations
#[derive(Error, Debug)]
pub enum IqTapError {
    /// Errors reported by a hardware sample source
    #[error("Source error: {0}")]
    Source(String),

    /// Errors raised by a live or offline pipeline
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),

    /// A run directory could not be staged (cleared or created)
    #[error("Failed to stage run directory {path:?}: {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An operation referenced a tap or VFO that does not exist
    #[error("Unknown tap: {0}")]
    UnknownTap(String),

    /// An operation was attempted in a state that does not allow it
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<IqTapError>,
    },
}

impl IqTapError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        IqTapError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

impl From<serde_json::Error> for IqTapError {
    fn from(err: serde_json::Error) -> Self {
        IqTapError::Serialization(err.to_string())
    }
}

/// Result type alias for iqtap operations
pub type Result<T> = std::result::Result<T, IqTapError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| IqTapError::Io(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| IqTapError::Io(e).with_context(f()))
    }
}
