//! Background reconstruction job.

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mesh_scan::ScanImage;
use scan_jobs::{Completion, Job, ScanId, StatusStore};
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::error::PipelineResult;
use crate::pipeline::{MeshArtifact, try_generate_mesh};

/// Generates one scan's mesh and records the outcome.
///
/// Whatever happens, including a panic inside the pipeline, the scan is
/// completed exactly once: `ready` with the file name, or `failed`.
pub(crate) struct ReconstructionJob {
    scan_id: ScanId,
    image: ScanImage,
    output_dir: PathBuf,
    config: PipelineConfig,
    timeout: Option<Duration>,
    store: Arc<dyn StatusStore>,
}

impl ReconstructionJob {
    pub(crate) fn new(
        scan_id: ScanId,
        image: ScanImage,
        output_dir: PathBuf,
        config: PipelineConfig,
        timeout: Option<Duration>,
        store: Arc<dyn StatusStore>,
    ) -> Self {
        Self {
            scan_id,
            image,
            output_dir,
            config,
            timeout,
            store,
        }
    }

    fn generate(&self) -> PipelineResult<MeshArtifact> {
        let mut config = self.config.clone();
        if let Some(timeout) = self.timeout {
            // The clock starts when a worker picks the job up, not at upload.
            config.poisson.deadline = Some(Instant::now() + timeout);
        }
        try_generate_mesh(&self.image, &self.output_dir, &self.scan_id, &config)
    }

    fn finish(&self, completion: Completion) {
        if let Err(e) = self.store.complete(&self.scan_id, completion) {
            error!(scan_id = %self.scan_id, error = %e, "Failed to record scan outcome");
        }
    }
}

impl Job for ReconstructionJob {
    fn scan_id(&self) -> &ScanId {
        &self.scan_id
    }

    fn run(self: Box<Self>) {
        let start = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.generate()));
        let completion = match outcome {
            Ok(Ok(artifact)) => {
                info!(
                    scan_id = %self.scan_id,
                    file = %artifact.file_name,
                    elapsed_ms = start.elapsed().as_millis(),
                    "Scan ready"
                );
                Completion::Ready {
                    mesh_file: artifact.file_name,
                }
            }
            Ok(Err(e)) => {
                error!(
                    scan_id = %self.scan_id,
                    error = %e,
                    timed_out = e.is_timeout(),
                    elapsed_ms = start.elapsed().as_millis(),
                    "Scan failed"
                );
                Completion::Failed
            }
            Err(_) => {
                error!(scan_id = %self.scan_id, "Scan failed: pipeline panicked");
                Completion::Failed
            }
        };
        self.finish(completion);
    }

    fn cancel(self: Box<Self>) {
        warn!(scan_id = %self.scan_id, "Reconstruction cancelled, marking scan failed");
        self.finish(Completion::Failed);
    }
}
