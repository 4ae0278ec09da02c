//! Image-to-mesh pipeline and scan service.
//!
//! Two entry points:
//!
//! - [`generate_mesh`] / [`try_generate_mesh`]: run the whole pipeline on
//!   one image, synchronously, and write `<output_dir>/<scan_id>_mesh.ply`.
//! - [`ScanService`]: accept uploads, record each scan in a status store,
//!   and run reconstructions on a bounded worker pool while clients poll.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use scan_service::{ScanService, ServiceConfig};
//!
//! let service = ScanService::open(ServiceConfig::in_dir("/tmp/holoscan"))?;
//! let bytes = std::fs::read("chair.jpg")?;
//! let scan_id = service.submit_image(&bytes)?;
//!
//! let record = service.wait_for(&scan_id, Duration::from_secs(120))?;
//! println!("{scan_id}: {}", record.mesh_status);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
mod job;
pub mod pipeline;
mod service;
mod summary;

pub use config::{PipelineConfig, ServiceConfig};
pub use error::{PipelineError, PipelineResult};
pub use pipeline::{
    MeshArtifact, generate_mesh, generate_mesh_from_cloud, mesh_file_name, try_generate_mesh,
};
pub use service::{MeshUpload, ScanService};
pub use summary::MeshSummary;
