//! Error types for scan reconstruction.

use thiserror::Error;

/// Result type for scan reconstruction operations.
pub type ScanResult<T> = Result<T, ScanError>;

/// Errors that can occur while turning an image into a mesh.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Input image is malformed or has zero area.
    #[error("invalid image: {reason}")]
    InvalidImage {
        /// What was wrong with the image.
        reason: String,
    },

    /// Subsampling produced no points.
    #[error("point cloud is empty")]
    EmptyCloud,

    /// Not enough points for the requested operation.
    #[error("insufficient points: need at least {required}, got {actual}")]
    InsufficientPoints {
        /// Minimum number of points required.
        required: usize,
        /// Actual number of points provided.
        actual: usize,
    },

    /// Invalid parameter value.
    #[error("invalid parameter: {reason}")]
    InvalidParameter {
        /// Description of why the parameter is invalid.
        reason: String,
    },

    /// Surface reconstruction failed or produced nothing usable.
    #[error("reconstruction failed: {reason}")]
    ReconstructionFailed {
        /// Description of why reconstruction failed.
        reason: String,
    },

    /// The reconstruction deadline passed before the solver finished.
    #[error("reconstruction timed out after {iterations} solver iterations")]
    TimedOut {
        /// Solver iterations completed before the deadline.
        iterations: usize,
    },
}

impl ScanError {
    pub(crate) fn invalid_image(reason: impl Into<String>) -> Self {
        Self::InvalidImage {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_parameter(reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            reason: reason.into(),
        }
    }

    pub(crate) fn reconstruction(reason: impl Into<String>) -> Self {
        Self::ReconstructionFailed {
            reason: reason.into(),
        }
    }
}
