//! Status store abstraction and its backends.
//!
//! A [`StatusStore`] is the single owner of scan records. The dispatching
//! side inserts a record when a scan is created, the background job
//! finishes it with [`StatusStore::complete`], and pollers read it with
//! [`StatusStore::get`] and [`StatusStore::list`].
//!
//! | Backend | Durability |
//! |---------|------------|
//! | [`MemoryStore`] | Process lifetime |
//! | [`SqliteStore`] | On disk, survives restarts |

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::JobResult;
use crate::id::ScanId;
use crate::status::{Completion, ScanRecord};

/// Thread-safe register of scan records.
///
/// Implementations are shared as `Arc<dyn StatusStore>` between the
/// dispatching thread and the worker pool. Every method is atomic with
/// respect to every other: a reader sees a record either before or after a
/// completion, never a status without its mesh file.
pub trait StatusStore: Send + Sync {
    /// Adds a new record.
    ///
    /// # Errors
    ///
    /// [`JobError::DuplicateScan`](crate::JobError::DuplicateScan) if the id
    /// exists, [`JobError::InconsistentRecord`](crate::JobError::InconsistentRecord)
    /// if the record fails validation.
    fn insert(&self, record: ScanRecord) -> JobResult<()>;

    /// Looks up a record.
    ///
    /// # Errors
    ///
    /// Backend failures only; a missing scan is `Ok(None)`.
    fn get(&self, scan_id: &ScanId) -> JobResult<Option<ScanRecord>>;

    /// Moves a pending scan to processing and returns the updated record.
    ///
    /// # Errors
    ///
    /// [`JobError::UnknownScan`](crate::JobError::UnknownScan) or
    /// [`JobError::InvalidTransition`](crate::JobError::InvalidTransition).
    fn begin_processing(&self, scan_id: &ScanId) -> JobResult<ScanRecord>;

    /// Finishes a processing scan, setting status and mesh file together.
    ///
    /// # Errors
    ///
    /// [`JobError::UnknownScan`](crate::JobError::UnknownScan), or
    /// [`JobError::InvalidTransition`](crate::JobError::InvalidTransition)
    /// when the scan is not processing. A scan therefore completes at most
    /// once.
    fn complete(&self, scan_id: &ScanId, completion: Completion) -> JobResult<ScanRecord>;

    /// All records, newest first.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    fn list(&self) -> JobResult<Vec<ScanRecord>>;
}

/// Orders records newest first, breaking ties by id so the order is total.
pub(crate) fn sort_newest_first(records: &mut [ScanRecord]) {
    records.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.scan_id.cmp(&a.scan_id))
    });
}

#[cfg(test)]
pub(crate) mod contract {
    //! Behaviour every backend must share.

    use std::sync::Arc;
    use std::thread;

    use chrono::{TimeDelta, Utc};

    use super::StatusStore;
    use crate::error::JobError;
    use crate::id::ScanId;
    use crate::status::{Completion, MeshStatus, ScanRecord};

    fn id(n: u32) -> ScanId {
        ScanId::new(format!("20250301_101500_{n:06}")).unwrap()
    }

    pub fn insert_and_get(store: &dyn StatusStore) {
        let record = ScanRecord::processing(id(1), "uploads/1.png");
        store.insert(record.clone()).unwrap();
        let got = store.get(&id(1)).unwrap().unwrap();
        assert_eq!(got.scan_id, record.scan_id);
        assert_eq!(got.image_path, record.image_path);
        assert_eq!(got.mesh_status, MeshStatus::Processing);
        assert_eq!(got.mesh_file, None);
        assert!(store.get(&id(2)).unwrap().is_none());
    }

    pub fn rejects_duplicates(store: &dyn StatusStore) {
        store
            .insert(ScanRecord::processing(id(1), "uploads/1.png"))
            .unwrap();
        let err = store
            .insert(ScanRecord::pending(id(1), "uploads/other.png"))
            .unwrap_err();
        assert!(matches!(err, JobError::DuplicateScan { .. }));
        assert_eq!(
            store.get(&id(1)).unwrap().unwrap().mesh_status,
            MeshStatus::Processing
        );
    }

    pub fn rejects_inconsistent_records(store: &dyn StatusStore) {
        let mut record = ScanRecord::processing(id(1), "uploads/1.png");
        record.mesh_file = Some("1_mesh.ply".to_string());
        assert!(matches!(
            store.insert(record),
            Err(JobError::InconsistentRecord { .. })
        ));
        assert!(store.get(&id(1)).unwrap().is_none());
    }

    pub fn completes_exactly_once(store: &dyn StatusStore) {
        store
            .insert(ScanRecord::processing(id(1), "uploads/1.png"))
            .unwrap();
        let done = store
            .complete(
                &id(1),
                Completion::Ready {
                    mesh_file: "1_mesh.ply".to_string(),
                },
            )
            .unwrap();
        assert_eq!(done.mesh_status, MeshStatus::Ready);
        assert_eq!(done.mesh_file.as_deref(), Some("1_mesh.ply"));

        let err = store.complete(&id(1), Completion::Failed).unwrap_err();
        assert!(matches!(
            err,
            JobError::InvalidTransition {
                from: MeshStatus::Ready,
                to: MeshStatus::Failed,
                ..
            }
        ));
        assert_eq!(store.get(&id(1)).unwrap().unwrap(), done);
    }

    pub fn failure_clears_mesh_file(store: &dyn StatusStore) {
        store
            .insert(ScanRecord::processing(id(1), "uploads/1.png"))
            .unwrap();
        let failed = store.complete(&id(1), Completion::Failed).unwrap();
        assert_eq!(failed.mesh_status, MeshStatus::Failed);
        assert_eq!(failed.mesh_file, None);
    }

    pub fn pending_must_begin_before_completing(store: &dyn StatusStore) {
        store
            .insert(ScanRecord::pending(id(1), "uploads/1.png"))
            .unwrap();
        assert!(store.complete(&id(1), Completion::Failed).is_err());
        let started = store.begin_processing(&id(1)).unwrap();
        assert_eq!(started.mesh_status, MeshStatus::Processing);
        assert!(store.begin_processing(&id(1)).is_err());
        store.complete(&id(1), Completion::Failed).unwrap();
    }

    pub fn unknown_scans_are_reported(store: &dyn StatusStore) {
        assert!(matches!(
            store.complete(&id(9), Completion::Failed),
            Err(JobError::UnknownScan { .. })
        ));
        assert!(matches!(
            store.begin_processing(&id(9)),
            Err(JobError::UnknownScan { .. })
        ));
    }

    pub fn lists_newest_first(store: &dyn StatusStore) {
        let base = Utc::now();
        for (n, offset) in [(1, 0), (2, 20), (3, 10)] {
            let mut record = ScanRecord::processing(id(n), format!("uploads/{n}.png"));
            record.created_at = base + TimeDelta::seconds(offset);
            store.insert(record).unwrap();
        }
        let order: Vec<String> = store
            .list()
            .unwrap()
            .into_iter()
            .map(|r| r.scan_id.to_string())
            .collect();
        assert_eq!(
            order,
            [id(2).to_string(), id(3).to_string(), id(1).to_string()]
        );
    }

    /// Readers racing a completion see either the old or the new record in
    /// full.
    pub fn concurrent_reads_never_tear(store: Arc<dyn StatusStore>) {
        const SCANS: u32 = 50;
        for n in 0..SCANS {
            store
                .insert(ScanRecord::processing(id(n), format!("uploads/{n}.png")))
                .unwrap();
        }

        let reader = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..20 {
                    for n in 0..SCANS {
                        let record = store.get(&id(n)).unwrap().unwrap();
                        record.validate().unwrap();
                    }
                }
            })
        };

        for n in 0..SCANS {
            let completion = if n % 3 == 0 {
                Completion::Failed
            } else {
                Completion::Ready {
                    mesh_file: format!("{}_mesh.ply", id(n)),
                }
            };
            store.complete(&id(n), completion).unwrap();
        }
        reader.join().unwrap();

        for record in store.list().unwrap() {
            assert!(record.mesh_status.is_terminal());
            record.validate().unwrap();
        }
    }
}
