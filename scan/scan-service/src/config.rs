//! Pipeline and service configuration.
//!
//! [`PipelineConfig`] bundles the parameters of the three reconstruction
//! stages. [`ServiceConfig`] adds directories, the status database and
//! worker pool sizing, and is read from a JSON file:
//!
//! ```json
//! {
//!   "output_dir": "meshes",
//!   "upload_dir": "uploads",
//!   "database": "holoscan.db",
//!   "workers": 2,
//!   "queue_capacity": 16,
//!   "job_timeout_secs": 300,
//!   "pipeline": { "poisson": { "octree_depth": 7 }, "encoding": "ascii" }
//! }
//! ```
//!
//! Every field is optional. The environment variables
//! `HOLOSCAN_OUTPUT_DIR`, `HOLOSCAN_WORKERS` and `HOLOSCAN_DB` override the
//! file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use mesh_io::PlyEncoding;
use mesh_scan::{CloudParams, DepthParams, PoissonParams};
use scan_jobs::PoolConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};

/// Overrides [`ServiceConfig::output_dir`].
pub const ENV_OUTPUT_DIR: &str = "HOLOSCAN_OUTPUT_DIR";
/// Overrides [`ServiceConfig::workers`].
pub const ENV_WORKERS: &str = "HOLOSCAN_WORKERS";
/// Overrides [`ServiceConfig::database`]; an empty value selects the
/// in-memory store.
pub const ENV_DATABASE: &str = "HOLOSCAN_DB";

/// Parameters for every stage of image-to-mesh generation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Brightness-to-depth stage.
    pub depth: DepthParams,
    /// Point sampling and normal estimation.
    pub cloud: CloudParams,
    /// Poisson reconstruction and pruning.
    pub poisson: PoissonParams,
    /// Byte layout of written PLY files.
    pub encoding: PlyEncoding,
}

impl PipelineConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Coarse, fast reconstruction.
    #[must_use]
    pub fn preview() -> Self {
        Self {
            poisson: PoissonParams::preview(),
            ..Self::default()
        }
    }

    /// Fine reconstruction.
    #[must_use]
    pub fn high_quality() -> Self {
        Self {
            poisson: PoissonParams::high_quality(),
            ..Self::default()
        }
    }

    /// Sets the reconstruction octree depth.
    #[must_use]
    pub fn with_octree_depth(mut self, depth: u32) -> Self {
        self.poisson.octree_depth = depth;
        self
    }

    /// Sets the pruning quantile.
    #[must_use]
    pub fn with_density_quantile(mut self, quantile: f64) -> Self {
        self.poisson.density_quantile = quantile;
        self
    }

    /// Sets the PLY encoding.
    #[must_use]
    pub const fn with_encoding(mut self, encoding: PlyEncoding) -> Self {
        self.encoding = encoding;
        self
    }
}

/// Settings for a [`ScanService`](crate::ScanService).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Where meshes are written.
    pub output_dir: PathBuf,
    /// Where uploaded images are stored.
    pub upload_dir: PathBuf,
    /// SQLite status database; `None` keeps statuses in memory.
    pub database: Option<PathBuf>,
    /// Reconstruction worker threads.
    pub workers: usize,
    /// Reconstructions that may wait for a worker.
    pub queue_capacity: usize,
    /// Wall-clock limit per reconstruction; `None` disables it.
    pub job_timeout_secs: Option<u64>,
    /// Stage parameters.
    pub pipeline: PipelineConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("meshes"),
            upload_dir: PathBuf::from("uploads"),
            database: Some(PathBuf::from("holoscan.db")),
            workers: 2,
            queue_capacity: 16,
            job_timeout_secs: Some(300),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// A configuration rooted in `dir`: meshes, uploads and the database
    /// all live below it.
    #[must_use]
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            output_dir: dir.join("meshes"),
            upload_dir: dir.join("uploads"),
            database: Some(dir.join("holoscan.db")),
            ..Self::default()
        }
    }

    /// Reads a JSON configuration file and applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if the file cannot be read or
    /// parsed, an override is malformed, or the result fails validation.
    pub fn load(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| PipelineError::config(format!("cannot read {}: {e}", path.display())))?;
        let mut config = Self::from_json(&text)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Defaults plus environment overrides.
    ///
    /// # Errors
    ///
    /// As for [`load`](Self::load), minus the file.
    pub fn from_env() -> PipelineResult<Self> {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parses JSON without applying overrides.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] on malformed JSON.
    pub fn from_json(text: &str) -> PipelineResult<Self> {
        serde_json::from_str(text).map_err(|e| PipelineError::config(format!("bad JSON: {e}")))
    }

    /// Applies `HOLOSCAN_*` overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if `HOLOSCAN_WORKERS` is not a
    /// number.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> PipelineResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_OUTPUT_DIR) {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(workers) = lookup(ENV_WORKERS) {
            self.workers = workers.trim().parse().map_err(|_| {
                PipelineError::config(format!("{ENV_WORKERS} must be a number, got {workers:?}"))
            })?;
        }
        if let Some(db) = lookup(ENV_DATABASE) {
            self.database = (!db.is_empty()).then(|| PathBuf::from(db));
        }
        Ok(())
    }

    /// Checks pool sizing and the timeout.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] describing the first problem.
    pub fn validate(&self) -> PipelineResult<()> {
        self.pool_config()
            .validate()
            .map_err(|e| PipelineError::config(e.to_string()))?;
        if self.job_timeout_secs == Some(0) {
            return Err(PipelineError::config(
                "job_timeout_secs must be positive or null",
            ));
        }
        Ok(())
    }

    /// Worker pool sizing.
    #[must_use]
    pub const fn pool_config(&self) -> PoolConfig {
        PoolConfig::new(self.workers, self.queue_capacity)
    }

    /// Per-job reconstruction limit.
    #[must_use]
    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs.map(Duration::from_secs)
    }
}
