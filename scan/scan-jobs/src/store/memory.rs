//! In-memory status store.

use std::sync::RwLock;

use hashbrown::HashMap;
use hashbrown::hash_map::Entry;
use tracing::debug;

use super::{StatusStore, sort_newest_first};
use crate::error::{JobError, JobResult};
use crate::id::ScanId;
use crate::status::{Completion, MeshStatus, ScanRecord};

/// A status store held in a lock-protected map.
///
/// Records live for the lifetime of the process. Each operation takes the
/// lock once, so a completion is observed all at once.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<ScanId, ScanRecord>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Poisoned`] if a writer panicked.
    pub fn len(&self) -> JobResult<usize> {
        Ok(self.records.read().map_err(|_| JobError::Poisoned)?.len())
    }

    /// Whether the store holds no records.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Poisoned`] if a writer panicked.
    pub fn is_empty(&self) -> JobResult<bool> {
        Ok(self.len()? == 0)
    }

    fn update<F>(&self, scan_id: &ScanId, apply: F) -> JobResult<ScanRecord>
    where
        F: FnOnce(&mut ScanRecord) -> JobResult<()>,
    {
        let mut records = self.records.write().map_err(|_| JobError::Poisoned)?;
        let record = records.get_mut(scan_id).ok_or_else(|| JobError::UnknownScan {
            id: scan_id.to_string(),
        })?;
        // Apply to a copy so a rejected change leaves the stored record intact.
        let mut next = record.clone();
        apply(&mut next)?;
        *record = next.clone();
        Ok(next)
    }
}

impl StatusStore for MemoryStore {
    fn insert(&self, record: ScanRecord) -> JobResult<()> {
        record.validate()?;
        let mut records = self.records.write().map_err(|_| JobError::Poisoned)?;
        match records.entry(record.scan_id.clone()) {
            Entry::Occupied(_) => Err(JobError::DuplicateScan {
                id: record.scan_id.to_string(),
            }),
            Entry::Vacant(slot) => {
                debug!(scan_id = %record.scan_id, status = %record.mesh_status, "Scan recorded");
                slot.insert(record);
                Ok(())
            }
        }
    }

    fn get(&self, scan_id: &ScanId) -> JobResult<Option<ScanRecord>> {
        let records = self.records.read().map_err(|_| JobError::Poisoned)?;
        Ok(records.get(scan_id).cloned())
    }

    fn begin_processing(&self, scan_id: &ScanId) -> JobResult<ScanRecord> {
        self.update(scan_id, |record| {
            if !record.mesh_status.can_transition_to(MeshStatus::Processing) {
                return Err(JobError::InvalidTransition {
                    id: record.scan_id.to_string(),
                    from: record.mesh_status,
                    to: MeshStatus::Processing,
                });
            }
            record.mesh_status = MeshStatus::Processing;
            Ok(())
        })
    }

    fn complete(&self, scan_id: &ScanId, completion: Completion) -> JobResult<ScanRecord> {
        let record = self.update(scan_id, |record| record.complete(&completion))?;
        debug!(scan_id = %scan_id, status = %record.mesh_status, "Scan completed");
        Ok(record)
    }

    fn list(&self) -> JobResult<Vec<ScanRecord>> {
        let mut all: Vec<ScanRecord> = self
            .records
            .read()
            .map_err(|_| JobError::Poisoned)?
            .values()
            .cloned()
            .collect();
        sort_newest_first(&mut all);
        Ok(all)
    }
}
