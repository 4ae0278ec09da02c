//! Error types for the scan register and worker pool.

use thiserror::Error;

use crate::status::MeshStatus;

/// Result type for scan register operations.
pub type JobResult<T> = Result<T, JobError>;

/// Errors raised by status stores and the worker pool.
#[derive(Debug, Error)]
pub enum JobError {
    /// The scan id is empty or contains characters unsafe in a filename.
    #[error("invalid scan id {id:?}")]
    InvalidScanId {
        /// The rejected id.
        id: String,
    },

    /// A scan with this id is already registered.
    #[error("scan {id} already exists")]
    DuplicateScan {
        /// The conflicting id.
        id: String,
    },

    /// No scan with this id is registered.
    #[error("scan {id} not found")]
    UnknownScan {
        /// The missing id.
        id: String,
    },

    /// The requested status change is not allowed from the current status.
    #[error("scan {id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// The scan id.
        id: String,
        /// Current status.
        from: MeshStatus,
        /// Requested status.
        to: MeshStatus,
    },

    /// A record violates the status/mesh-file invariant.
    #[error("inconsistent scan record: {reason}")]
    InconsistentRecord {
        /// What was inconsistent.
        reason: String,
    },

    /// The SQLite backend failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A lock was poisoned by a panicking thread.
    #[error("status store lock poisoned")]
    Poisoned,

    /// The worker pool queue is full.
    #[error("job queue is full ({capacity} jobs)")]
    QueueFull {
        /// Queue capacity.
        capacity: usize,
    },

    /// The worker pool is shutting down or gone.
    #[error("worker pool is shut down")]
    ShutDown,

    /// Invalid worker pool configuration.
    #[error("invalid pool configuration: {reason}")]
    InvalidConfig {
        /// Description of the problem.
        reason: String,
    },

    /// A worker thread could not be started.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_error_names_both_states() {
        let err = JobError::InvalidTransition {
            id: "20250101_000000_000001".to_string(),
            from: MeshStatus::Ready,
            to: MeshStatus::Failed,
        };
        assert_eq!(
            err.to_string(),
            "scan 20250101_000000_000001 cannot move from ready to failed"
        );
    }

    #[test]
    fn queue_full_reports_capacity() {
        let err = JobError::QueueFull { capacity: 8 };
        assert_eq!(err.to_string(), "job queue is full (8 jobs)");
    }
}
