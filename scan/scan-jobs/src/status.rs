//! Scan status state machine and records.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{JobError, JobResult};
use crate::id::ScanId;

/// Mesh generation status of a scan.
///
/// ```text
/// pending ──► processing ──► ready
///                  │
///                  └───────► failed
/// ```
///
/// `ready` and `failed` are terminal. A failed scan is retried by uploading
/// again under a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeshStatus {
    /// Recorded, no generation attempted.
    Pending,
    /// Generation dispatched and not yet finished.
    Processing,
    /// Mesh written; the record carries its file name.
    Ready,
    /// Generation failed; there is no mesh.
    Failed,
}

impl MeshStatus {
    /// Lowercase name as stored and reported.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }

    /// True for `ready` and `failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Ready)
                | (Self::Processing, Self::Failed)
        )
    }
}

impl fmt::Display for MeshStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MeshStatus {
    type Err = JobError;

    fn from_str(s: &str) -> JobResult<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "ready" => Ok(Self::Ready),
            "failed" => Ok(Self::Failed),
            other => Err(JobError::InconsistentRecord {
                reason: format!("unknown mesh status {other:?}"),
            }),
        }
    }
}

/// How a processing scan finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// The mesh was written under this file name.
    Ready {
        /// File name relative to the output directory.
        mesh_file: String,
    },
    /// Generation failed.
    Failed,
}

impl Completion {
    /// Status this completion moves a scan to.
    #[must_use]
    pub const fn status(&self) -> MeshStatus {
        match self {
            Self::Ready { .. } => MeshStatus::Ready,
            Self::Failed => MeshStatus::Failed,
        }
    }

    /// Mesh file recorded by this completion.
    #[must_use]
    pub fn mesh_file(&self) -> Option<&str> {
        match self {
            Self::Ready { mesh_file } => Some(mesh_file),
            Self::Failed => None,
        }
    }
}

/// Everything the register knows about one scan.
///
/// A record carries a mesh file exactly when its status is `ready`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRecord {
    /// Unique scan id.
    pub scan_id: ScanId,
    /// Where the uploaded file was stored.
    pub image_path: PathBuf,
    /// Mesh file name relative to the output directory, once ready.
    pub mesh_file: Option<String>,
    /// Current status.
    pub mesh_status: MeshStatus,
    /// When the scan was recorded.
    pub created_at: DateTime<Utc>,
}

impl ScanRecord {
    /// A scan whose mesh generation is being dispatched now.
    #[must_use]
    pub fn processing(scan_id: ScanId, image_path: impl Into<PathBuf>) -> Self {
        Self {
            scan_id,
            image_path: image_path.into(),
            mesh_file: None,
            mesh_status: MeshStatus::Processing,
            created_at: Utc::now(),
        }
    }

    /// A scan recorded without starting generation.
    #[must_use]
    pub fn pending(scan_id: ScanId, image_path: impl Into<PathBuf>) -> Self {
        Self {
            mesh_status: MeshStatus::Pending,
            ..Self::processing(scan_id, image_path)
        }
    }

    /// A scan whose mesh already exists, such as an uploaded mesh file.
    #[must_use]
    pub fn ready(
        scan_id: ScanId,
        image_path: impl Into<PathBuf>,
        mesh_file: impl Into<String>,
    ) -> Self {
        Self {
            mesh_file: Some(mesh_file.into()),
            mesh_status: MeshStatus::Ready,
            ..Self::processing(scan_id, image_path)
        }
    }

    /// Checks that the mesh file is present exactly when the scan is ready.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::InconsistentRecord`] otherwise.
    pub fn validate(&self) -> JobResult<()> {
        match (self.mesh_status, &self.mesh_file) {
            (MeshStatus::Ready, None) => Err(JobError::InconsistentRecord {
                reason: format!("scan {} is ready without a mesh file", self.scan_id),
            }),
            (status, Some(file)) if status != MeshStatus::Ready => {
                Err(JobError::InconsistentRecord {
                    reason: format!(
                        "scan {} is {status} but names mesh file {file}",
                        self.scan_id
                    ),
                })
            }
            _ => Ok(()),
        }
    }

    /// Applies a completion, enforcing the state machine.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::InvalidTransition`] unless the scan is processing.
    pub fn complete(&mut self, completion: &Completion) -> JobResult<()> {
        let next = completion.status();
        if !self.mesh_status.can_transition_to(next) {
            return Err(JobError::InvalidTransition {
                id: self.scan_id.to_string(),
                from: self.mesh_status,
                to: next,
            });
        }
        self.mesh_status = next;
        self.mesh_file = completion.mesh_file().map(str::to_owned);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> ScanId {
        ScanId::new("20250301_101500_000001").unwrap()
    }

    #[test]
    fn only_forward_transitions_allowed() {
        use MeshStatus::{Failed, Pending, Processing, Ready};
        let all = [Pending, Processing, Ready, Failed];
        for from in all {
            for to in all {
                let expected = matches!(
                    (from, to),
                    (Pending, Processing) | (Processing, Ready) | (Processing, Failed)
                );
                assert_eq!(from.can_transition_to(to), expected, "{from} -> {to}");
            }
        }
    }

    #[test]
    fn status_names_round_trip() {
        for status in [
            MeshStatus::Pending,
            MeshStatus::Processing,
            MeshStatus::Ready,
            MeshStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<MeshStatus>().unwrap(), status);
        }
        assert!("done".parse::<MeshStatus>().is_err());
    }

    #[test]
    fn completion_sets_status_and_file_together() {
        let mut record = ScanRecord::processing(id(), "uploads/a.png");
        record
            .complete(&Completion::Ready {
                mesh_file: "a_mesh.ply".to_string(),
            })
            .unwrap();
        assert_eq!(record.mesh_status, MeshStatus::Ready);
        assert_eq!(record.mesh_file.as_deref(), Some("a_mesh.ply"));
        record.validate().unwrap();

        let err = record.complete(&Completion::Failed).unwrap_err();
        assert!(matches!(err, JobError::InvalidTransition { .. }));
        assert_eq!(record.mesh_status, MeshStatus::Ready);
    }

    #[test]
    fn pending_scan_cannot_complete() {
        let mut record = ScanRecord::pending(id(), "uploads/a.png");
        assert!(record.complete(&Completion::Failed).is_err());
    }

    #[test]
    fn validate_rejects_mismatched_file() {
        let mut record = ScanRecord::processing(id(), "uploads/a.png");
        record.mesh_file = Some("x.ply".to_string());
        assert!(record.validate().is_err());

        let mut ready = ScanRecord::ready(id(), "meshes/a.ply", "a_mesh.ply");
        ready.validate().unwrap();
        ready.mesh_file = None;
        assert!(ready.validate().is_err());
    }
}
