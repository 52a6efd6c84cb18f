//! Pipeline-specific error types.

use thiserror::Error;

/// Errors that can occur while building or running a pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Unknown pipeline: {0}")]
    UnknownPipeline(String),

    #[error("Invalid parameter {key}: {message}")]
    InvalidParameter { key: String, message: String },

    #[error("Pipeline {pipeline} failed: {message}")]
    Run { pipeline: String, message: String },

    #[error("Input file has no samples: {0}")]
    EmptyInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Worker pool is shut down")]
    PoolClosed,

    #[error("Pipeline not active")]
    NotActive,
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
