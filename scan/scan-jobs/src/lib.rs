//! Scan status register and background job pool.
//!
//! Every uploaded scan gets a [`ScanId`] and a [`ScanRecord`] whose status
//! follows a one-way state machine:
//!
//! ```text
//! pending ──► processing ──► ready | failed
//! ```
//!
//! Records live in a [`StatusStore`], shared as `Arc<dyn StatusStore>`
//! between the code that creates scans and the [`WorkerPool`] jobs that
//! finish them. [`StatusStore::complete`] sets the status and mesh file in
//! one atomic step and succeeds only once per scan.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use scan_jobs::{Completion, MemoryStore, MeshStatus, ScanIdGenerator, ScanRecord, StatusStore};
//!
//! let store: Arc<dyn StatusStore> = Arc::new(MemoryStore::new());
//! let ids = ScanIdGenerator::new();
//!
//! let scan_id = ids.next_id().unwrap();
//! store.insert(ScanRecord::processing(scan_id.clone(), "uploads/scan.png")).unwrap();
//!
//! let record = store
//!     .complete(&scan_id, Completion::Ready { mesh_file: format!("{scan_id}_mesh.ply") })
//!     .unwrap();
//! assert_eq!(record.mesh_status, MeshStatus::Ready);
//!
//! // A second completion is rejected.
//! assert!(store.complete(&scan_id, Completion::Failed).is_err());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod id;
pub mod pool;
pub mod status;
pub mod store;

pub use error::{JobError, JobResult};
pub use id::{SCAN_ID_FORMAT, ScanId, ScanIdGenerator};
pub use pool::{Job, MAX_WORKERS, PoolConfig, WorkerPool};
pub use status::{Completion, MeshStatus, ScanRecord};
pub use store::{MemoryStore, SqliteStore, StatusStore};
