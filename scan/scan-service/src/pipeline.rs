//! Synchronous image-to-mesh pipeline.
//!
//! [`try_generate_mesh`] runs depth estimation, point cloud construction,
//! Poisson reconstruction and PLY export for one image, writing
//! `<output_dir>/<scan_id>_mesh.ply`. [`generate_mesh`] wraps it for callers
//! that only need the file name: any failure is logged and reported as
//! `None`, and no partial file is left behind.
//!
//! Calling the pipeline twice with the same scan id writes the same file
//! name; the second mesh replaces the first. Scan ids are unique per upload,
//! so the service never does this itself.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use mesh_io::{MeshFormat, save_ply};
use mesh_scan::{
    PointCloud, ReconstructionResult, ScanError, ScanImage, build_point_cloud, estimate_depth,
    reconstruct_mesh,
};
use scan_jobs::ScanId;
use tracing::{debug, error, info};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::summary::MeshSummary;

/// A mesh written by the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshArtifact {
    /// File name relative to the output directory.
    pub file_name: String,
    /// Full path of the written file.
    pub path: PathBuf,
    /// Size of the written mesh.
    pub summary: MeshSummary,
    /// Vertices removed by density pruning.
    pub pruned_vertices: usize,
    /// Density threshold used for pruning.
    pub density_threshold: f64,
}

/// Mesh file name for a scan: `{scan_id}_mesh.{ext}`.
///
/// ```
/// use mesh_io::MeshFormat;
/// use scan_jobs::ScanId;
/// use scan_service::mesh_file_name;
///
/// let id: ScanId = "20250301_101500_000042".parse().unwrap();
/// assert_eq!(mesh_file_name(&id, MeshFormat::Ply), "20250301_101500_000042_mesh.ply");
/// ```
#[must_use]
pub fn mesh_file_name(scan_id: &ScanId, format: MeshFormat) -> String {
    format!("{scan_id}_mesh.{}", format.extension())
}

/// Generates a mesh from an image, returning the written file name or
/// `None` on any failure.
///
/// Failures are logged at error level with the scan id.
#[must_use]
pub fn generate_mesh(
    image: &ScanImage,
    output_dir: &Path,
    scan_id: &ScanId,
    config: &PipelineConfig,
) -> Option<String> {
    match try_generate_mesh(image, output_dir, scan_id, config) {
        Ok(artifact) => Some(artifact.file_name),
        Err(e) => {
            error!(scan_id = %scan_id, error = %e, "Mesh generation failed");
            None
        }
    }
}

/// Generates a mesh from an image.
///
/// A deadline in `config.poisson` bounds the reconstruction.
///
/// # Errors
///
/// - [`PipelineError::InvalidImage`] or [`PipelineError::EmptyCloud`] from
///   the first two stages
/// - [`PipelineError::ReconstructionFailed`] when reconstruction fails,
///   times out, or leaves no vertices
/// - [`PipelineError::WriteFailed`] when the output cannot be written
pub fn try_generate_mesh(
    image: &ScanImage,
    output_dir: &Path,
    scan_id: &ScanId,
    config: &PipelineConfig,
) -> PipelineResult<MeshArtifact> {
    let start = Instant::now();
    let depth = estimate_depth(image, &config.depth)?;
    let cloud = build_point_cloud(image, &depth, &config.cloud)?;
    debug!(
        scan_id = %scan_id,
        width = image.width(),
        height = image.height(),
        points = cloud.len(),
        elapsed_ms = start.elapsed().as_millis(),
        "Point cloud built"
    );
    generate_mesh_from_cloud(&cloud, output_dir, scan_id, config)
}

/// Reconstructs and writes a mesh from a point cloud with normals.
///
/// # Errors
///
/// As for [`try_generate_mesh`], minus the image stages.
pub fn generate_mesh_from_cloud(
    cloud: &PointCloud,
    output_dir: &Path,
    scan_id: &ScanId,
    config: &PipelineConfig,
) -> PipelineResult<MeshArtifact> {
    let start = Instant::now();
    let result = reconstruct_mesh(cloud, &config.poisson)?;
    if result.mesh.vertex_count() == 0 {
        return Err(PipelineError::ReconstructionFailed(
            ScanError::ReconstructionFailed {
                reason: "every vertex was pruned".to_string(),
            },
        ));
    }
    let reconstruct_ms = start.elapsed().as_millis();

    let artifact = write_artifact(&result, output_dir, scan_id, config)?;
    info!(
        scan_id = %scan_id,
        file = %artifact.file_name,
        vertices = artifact.summary.vertex_count,
        faces = artifact.summary.face_count,
        pruned = artifact.pruned_vertices,
        solver_iterations = result.solver_iterations,
        reconstruct_ms,
        "Mesh written"
    );
    Ok(artifact)
}

fn write_artifact(
    result: &ReconstructionResult,
    output_dir: &Path,
    scan_id: &ScanId,
    config: &PipelineConfig,
) -> PipelineResult<MeshArtifact> {
    fs::create_dir_all(output_dir)
        .map_err(|e| PipelineError::write_failed(output_dir, e))?;

    let file_name = mesh_file_name(scan_id, MeshFormat::Ply);
    let path = output_dir.join(&file_name);
    save_ply(&result.mesh, &path, config.encoding)
        .map_err(|e| PipelineError::write_failed(&path, e))?;

    Ok(MeshArtifact {
        file_name,
        path,
        summary: MeshSummary::of(&result.mesh),
        pruned_vertices: result.pruning.removed_vertices,
        density_threshold: result.pruning.threshold,
    })
}
