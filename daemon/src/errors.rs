use std::path::PathBuf;

use gpu_metrics::{ExportError, SourceError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Failed to render metrics for the {sink} sink")]
    Render {
        sink: &'static str,
        #[source]
        error: ExportError,
    },
    #[error("Failed to write metrics textfile {path:?}")]
    Write {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("Failed to collect GPU metrics")]
    Collect(#[from] SourceError),
    #[error("GPU metrics collection task failed")]
    Task(#[from] tokio::task::JoinError),
}

// The main daemon error type
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Sampler(#[from] SamplerError),
    #[error(transparent)]
    Sink(#[from] SinkError),
}
