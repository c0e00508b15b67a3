use std::path::PathBuf;

use image_ingest::IngestError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SplatError>;

/// Failure taxonomy shared by every pipeline stage.
#[derive(Debug, Error)]
pub enum SplatError {
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("model {identifier:?} is unavailable")]
    ModelUnavailable {
        identifier: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("inference failed")]
    InferenceFailed(#[source] anyhow::Error),
    #[error("malformed point cloud {path:?}: {reason}")]
    MalformedPointCloud { path: PathBuf, reason: String },
    #[error("processing failed: {reason}")]
    ProcessingFailed {
        reason: String,
        #[source]
        source: Option<anyhow::Error>,
    },
}

impl SplatError {
    pub fn processing(reason: impl Into<String>) -> Self {
        SplatError::ProcessingFailed {
            reason: reason.into(),
            source: None,
        }
    }

    pub fn processing_with(reason: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        SplatError::ProcessingFailed {
            reason: reason.into(),
            source: Some(source.into()),
        }
    }

    pub(crate) fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        SplatError::MalformedPointCloud {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl From<IngestError> for SplatError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Empty { width, height, .. } => {
                SplatError::InvalidImage(format!("image has empty dimensions {width}x{height}"))
            }
            other => SplatError::processing_with("could not load input image", other),
        }
    }
}
