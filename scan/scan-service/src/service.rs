//! Scan upload dispatch.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use image::ImageFormat;
use mesh_io::{MeshFormat, load_ply};
use mesh_scan::ScanImage;
use scan_jobs::{
    MemoryStore, ScanId, ScanIdGenerator, ScanRecord, SqliteStore, StatusStore, WorkerPool,
};
use tracing::{debug, info, warn};

use crate::config::ServiceConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::job::ReconstructionJob;
use crate::pipeline::mesh_file_name;
use crate::summary::MeshSummary;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Result of storing a client-supplied mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshUpload {
    /// Id of the new scan.
    pub scan_id: ScanId,
    /// Stored file name, relative to the output directory.
    pub mesh_file: String,
    /// Mesh statistics, for formats the service can parse.
    pub summary: Option<MeshSummary>,
}

/// Accepts uploads, records their scans and runs reconstructions in the
/// background.
///
/// An image upload is decoded and validated before anything is stored, so
/// a bad image never creates a scan. A valid image is saved, its scan is
/// recorded as `processing`, and a reconstruction job is queued; callers
/// poll [`status`](Self::status) until it reaches `ready` or `failed`.
pub struct ScanService {
    config: ServiceConfig,
    store: Arc<dyn StatusStore>,
    pool: WorkerPool,
    ids: ScanIdGenerator,
}

impl std::fmt::Debug for ScanService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanService")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl ScanService {
    /// Starts a service, opening the configured database or an in-memory
    /// store.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Config`] for an invalid configuration,
    /// [`PipelineError::WriteFailed`] if a directory cannot be created, or
    /// [`PipelineError::Store`] if the database cannot be opened.
    pub fn open(config: ServiceConfig) -> PipelineResult<Self> {
        config.validate()?;
        let store: Arc<dyn StatusStore> = match &config.database {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent)
                        .map_err(|e| PipelineError::write_failed(parent, e))?;
                }
                Arc::new(SqliteStore::open(path)?)
            }
            None => Arc::new(MemoryStore::new()),
        };
        Self::with_store(config, store)
    }

    /// Starts a service on an existing store.
    ///
    /// # Errors
    ///
    /// As for [`open`](Self::open), minus the database.
    pub fn with_store(config: ServiceConfig, store: Arc<dyn StatusStore>) -> PipelineResult<Self> {
        config.validate()?;
        for dir in [&config.output_dir, &config.upload_dir] {
            fs::create_dir_all(dir).map_err(|e| PipelineError::write_failed(dir, e))?;
        }
        let pool = WorkerPool::new(config.pool_config())?;
        info!(
            output_dir = %config.output_dir.display(),
            workers = config.workers,
            "Scan service started"
        );
        Ok(Self {
            config,
            store,
            pool,
            ids: ScanIdGenerator::new(),
        })
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// The shared status store.
    #[must_use]
    pub const fn store(&self) -> &Arc<dyn StatusStore> {
        &self.store
    }

    /// Decodes an uploaded image and dispatches its reconstruction.
    ///
    /// Returns as soon as the job is queued; the scan is `processing`.
    ///
    /// # Errors
    ///
    /// [`PipelineError::InvalidImage`] if the bytes are not a non-empty
    /// image (no scan is created). [`PipelineError::QueueFull`] or
    /// [`PipelineError::ShutDown`] if the job could not be queued; the scan
    /// exists and is already `failed`.
    pub fn submit_image(&self, bytes: &[u8]) -> PipelineResult<ScanId> {
        let image = ScanImage::decode(bytes)?;
        self.submit_decoded(image)
    }

    /// Dispatches reconstruction of an already decoded image.
    ///
    /// # Errors
    ///
    /// As for [`submit_image`](Self::submit_image), minus decoding.
    pub fn submit_decoded(&self, image: ScanImage) -> PipelineResult<ScanId> {
        let scan_id = self.ids.next_id()?;
        let image_path = self.config.upload_dir.join(format!("{scan_id}.png"));
        image
            .as_rgb()
            .save_with_format(&image_path, ImageFormat::Png)
            .map_err(|e| PipelineError::write_failed(&image_path, e))?;

        if let Err(e) = self
            .store
            .insert(ScanRecord::processing(scan_id.clone(), &image_path))
        {
            discard(&image_path);
            return Err(e.into());
        }

        let job = ReconstructionJob::new(
            scan_id.clone(),
            image,
            self.config.output_dir.clone(),
            self.config.pipeline.clone(),
            self.config.job_timeout(),
            Arc::clone(&self.store),
        );
        self.pool.submit(Box::new(job))?;

        info!(scan_id = %scan_id, image = %image_path.display(), "Scan submitted");
        Ok(scan_id)
    }

    /// Stores a client-supplied mesh and records its scan as `ready`.
    ///
    /// The file is saved as `<output_dir>/<scan_id>_mesh.<ext>`. PLY files
    /// are parsed first and rejected if unreadable; other formats are
    /// stored as given, without a summary.
    ///
    /// # Errors
    ///
    /// [`PipelineError::InvalidUpload`] for an empty file or unusable
    /// extension, [`PipelineError::Decode`] for an unreadable PLY file, and
    /// write or store failures.
    pub fn register_mesh(&self, bytes: &[u8], ext: &str) -> PipelineResult<MeshUpload> {
        let ext = normalise_extension(ext)?;
        if bytes.is_empty() {
            return Err(PipelineError::InvalidUpload {
                reason: "mesh file is empty".to_string(),
            });
        }

        let scan_id = self.ids.next_id()?;
        let mesh_file = match MeshFormat::from_extension(&ext) {
            Some(format) => mesh_file_name(&scan_id, format),
            None => format!("{scan_id}_mesh.{ext}"),
        };
        let path = self.config.output_dir.join(&mesh_file);
        fs::write(&path, bytes).map_err(|e| PipelineError::write_failed(&path, e))?;

        let summary = match MeshFormat::from_extension(&ext) {
            Some(MeshFormat::Ply) => match load_ply(&path) {
                Ok(mesh) => Some(MeshSummary::of(&mesh)),
                Err(e) => {
                    discard(&path);
                    return Err(PipelineError::Decode(e));
                }
            },
            None => None,
        };

        if let Err(e) = self
            .store
            .insert(ScanRecord::ready(scan_id.clone(), &path, mesh_file.clone()))
        {
            discard(&path);
            return Err(e.into());
        }
        info!(scan_id = %scan_id, file = %mesh_file, "Mesh upload registered");

        Ok(MeshUpload {
            scan_id,
            mesh_file,
            summary,
        })
    }

    /// Current record of a scan.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub fn status(&self, scan_id: &ScanId) -> PipelineResult<Option<ScanRecord>> {
        Ok(self.store.get(scan_id)?)
    }

    /// Every scan, newest first.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub fn list(&self) -> PipelineResult<Vec<ScanRecord>> {
        Ok(self.store.list()?)
    }

    /// Full path of a scan's mesh, once it is ready.
    #[must_use]
    pub fn mesh_path(&self, record: &ScanRecord) -> Option<PathBuf> {
        record
            .mesh_file
            .as_ref()
            .map(|file| self.config.output_dir.join(file))
    }

    /// Polls a scan until it is `ready` or `failed`, or `timeout` passes.
    ///
    /// Returns the last record seen.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Store`] with an unknown-scan error if the scan does
    /// not exist, and store failures.
    pub fn wait_for(&self, scan_id: &ScanId, timeout: Duration) -> PipelineResult<ScanRecord> {
        let give_up = Instant::now() + timeout;
        loop {
            let record = self.status(scan_id)?.ok_or_else(|| {
                PipelineError::Store(scan_jobs::JobError::UnknownScan {
                    id: scan_id.to_string(),
                })
            })?;
            if record.mesh_status.is_terminal() || Instant::now() >= give_up {
                debug!(scan_id = %scan_id, status = %record.mesh_status, "Wait finished");
                return Ok(record);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Stops accepting uploads and finishes every queued reconstruction.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }

    /// Stops accepting uploads and fails every queued reconstruction.
    /// Running reconstructions finish. Returns the number of scans failed.
    pub fn shutdown_now(&self) -> usize {
        self.pool.shutdown_now()
    }
}

/// Removes a file written for a scan that was never recorded.
fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "Failed to remove unrecorded upload");
    }
}

/// Lower-cases an extension and checks it is safe in a file name.
fn normalise_extension(ext: &str) -> PipelineResult<String> {
    let ext = ext.trim().trim_start_matches('.').to_ascii_lowercase();
    let valid = !ext.is_empty() && ext.len() <= 8 && ext.bytes().all(|b| b.is_ascii_alphanumeric());
    if valid {
        Ok(ext)
    } else {
        Err(PipelineError::InvalidUpload {
            reason: format!("unsupported mesh extension {ext:?}"),
        })
    }
}
