use std::path::PathBuf;

use thiserror::Error;

/// All errors produced by callstream.
#[derive(Debug, Error)]
pub enum CallstreamError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("session is not initialized")]
    NotInitialized,

    #[error("failed to open backend transport: {0}")]
    TransportOpen(String),

    #[error("failed to initialize resampler: {0}")]
    ResamplerInit(String),

    #[error("failed to open spool file {path}: {source}")]
    FileOpen {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("spool file write failed: {0}")]
    Write(#[source] std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, CallstreamError>;
