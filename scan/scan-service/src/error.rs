//! Error types for the mesh pipeline and scan service.

use std::path::PathBuf;

use mesh_scan::ScanError;
use scan_jobs::JobError;
use thiserror::Error;

/// Result type for pipeline and service operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors raised while turning an upload into a mesh.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The upload is not a usable image.
    #[error("invalid image: {reason}")]
    InvalidImage {
        /// What was wrong with the image.
        reason: String,
    },

    /// Subsampling produced no points.
    #[error("point cloud is empty")]
    EmptyCloud,

    /// Surface reconstruction failed, timed out, or produced no mesh.
    #[error("reconstruction failed: {0}")]
    ReconstructionFailed(#[source] ScanError),

    /// A file could not be written.
    #[error("failed to write {path}: {reason}")]
    WriteFailed {
        /// Destination that failed.
        path: PathBuf,
        /// Underlying error.
        reason: String,
    },

    /// An uploaded mesh could not be parsed.
    #[error("cannot read uploaded mesh: {0}")]
    Decode(#[source] mesh_io::IoError),

    /// The upload was rejected before anything was stored.
    #[error("invalid upload: {reason}")]
    InvalidUpload {
        /// Why it was rejected.
        reason: String,
    },

    /// The status store failed.
    #[error("status store error: {0}")]
    Store(#[source] JobError),

    /// The configuration is unreadable or invalid.
    #[error("invalid configuration: {reason}")]
    Config {
        /// Description of the problem.
        reason: String,
    },

    /// The reconstruction queue is full; the scan was marked failed.
    #[error("reconstruction queue is full ({capacity} jobs)")]
    QueueFull {
        /// Queue capacity.
        capacity: usize,
    },

    /// The service is shutting down; the scan was marked failed.
    #[error("scan service is shut down")]
    ShutDown,
}

impl PipelineError {
    pub(crate) fn write_failed(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::WriteFailed {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// True when reconstruction stopped at its deadline.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::ReconstructionFailed(ScanError::TimedOut { .. }))
    }
}

impl From<ScanError> for PipelineError {
    fn from(err: ScanError) -> Self {
        match err {
            ScanError::InvalidImage { reason } => Self::InvalidImage { reason },
            ScanError::EmptyCloud => Self::EmptyCloud,
            other => Self::ReconstructionFailed(other),
        }
    }
}

impl From<JobError> for PipelineError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::QueueFull { capacity } => Self::QueueFull { capacity },
            JobError::ShutDown => Self::ShutDown,
            other => Self::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_errors_keep_their_category() {
        let err: PipelineError = ScanError::EmptyCloud.into();
        assert!(matches!(err, PipelineError::EmptyCloud));

        let err: PipelineError = ScanError::InvalidImage {
            reason: "zero area".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "invalid image: zero area");

        let err: PipelineError = ScanError::InsufficientPoints {
            required: 16,
            actual: 1,
        }
        .into();
        assert!(matches!(err, PipelineError::ReconstructionFailed(_)));
        assert!(!err.is_timeout());
    }

    #[test]
    fn timeouts_are_recognised() {
        let err: PipelineError = ScanError::TimedOut { iterations: 12 }.into();
        assert!(err.is_timeout());
        assert_eq!(
            err.to_string(),
            "reconstruction failed: reconstruction timed out after 12 solver iterations"
        );
    }

    #[test]
    fn queue_errors_are_lifted() {
        let err: PipelineError = JobError::QueueFull { capacity: 4 }.into();
        assert!(matches!(err, PipelineError::QueueFull { capacity: 4 }));
        let err: PipelineError = JobError::ShutDown.into();
        assert!(matches!(err, PipelineError::ShutDown));
        let err: PipelineError = JobError::Poisoned.into();
        assert!(matches!(err, PipelineError::Store(JobError::Poisoned)));
    }
}
