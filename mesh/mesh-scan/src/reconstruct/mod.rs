//! Poisson surface reconstruction from oriented point clouds.
//!
//! [`reconstruct_mesh`] turns a cloud whose points all carry normals into a
//! watertight-in-the-grid triangle mesh, then trims the parts of the surface
//! that are far from any sample:
//!
//! 1. **Grid**: a regular lattice with `2^octree_depth` cells across the
//!    longest (110%-padded) extent of the cloud.
//! 2. **Solve**: normals are splatted into a vector field whose divergence
//!    drives a Poisson equation for an indicator function, solved with
//!    conjugate gradients from coarse to fine.
//! 3. **Extract**: the level set of the indicator at its mean sample value
//!    becomes the surface (marching tetrahedra). Each vertex takes the
//!    colour of its nearest sample and a density measuring how well the
//!    samples around it support it.
//! 4. **Prune**: vertices whose density falls strictly below the
//!    `density_quantile` of all densities are removed with their faces.
//!
//! # Example
//!
//! ```
//! use mesh_scan::{
//!     build_point_cloud, estimate_depth, reconstruct_mesh, CloudParams, DepthParams,
//!     PoissonParams, ScanImage,
//! };
//!
//! let image = ScanImage::from_raw(32, 32, 3, vec![40; 32 * 32 * 3]).unwrap();
//! let depth = estimate_depth(&image, &DepthParams::default()).unwrap();
//! let cloud = build_point_cloud(&image, &depth, &CloudParams::default()).unwrap();
//!
//! let result = reconstruct_mesh(&cloud, &PoissonParams::preview()).unwrap();
//! assert!(result.mesh.vertex_count() > 0);
//! assert!(result.mesh.has_colors());
//! println!("{result}");
//! ```

mod grid;
mod isosurface;
mod poisson;
mod prune;

pub use prune::{PruneReport, density_quantile, prune_low_density};

use std::time::Instant;

use mesh_types::{IndexedMesh, Vertex};
use nalgebra::Point3;
use rayon::prelude::*;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use self::grid::Grid;
use self::poisson::{Sample, SolverLimits};
use crate::error::{ScanError, ScanResult};
use crate::pointcloud::PointCloud;
use crate::spatial::PointIndex;

/// Deepest octree depth accepted; one more level multiplies the grid by 8.
pub const MAX_OCTREE_DEPTH: u32 = 10;

/// Nearest samples that contribute to a vertex density.
const DENSITY_NEIGHBORS: usize = 8;

/// Parameters for [`reconstruct_mesh`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct PoissonParams {
    /// Resolution: the longest grid axis has `2^octree_depth` cells
    /// (default: 8).
    pub octree_depth: u32,

    /// Vertices with density strictly below this quantile of all vertex
    /// densities are removed (default: 0.10).
    pub density_quantile: f64,

    /// Fewest input points accepted (default: 16).
    pub min_points: usize,

    /// Splat radius as a multiple of the mean nearest-neighbour spacing
    /// (default: 1.5). The radius is never below two grid cells.
    pub kernel_scale: f64,

    /// Depth of the first, coarsest solve (default: 4).
    pub coarse_depth: u32,

    /// Conjugate-gradient iterations per level (default: 200).
    pub max_iterations: usize,

    /// Relative residual at which a level counts as solved (default: 1e-6).
    pub tolerance: f64,

    /// Largest grid, in nodes, the reconstructor will allocate
    /// (default: 16,000,000). A 64x64 image at depth 8 needs about 4
    /// million nodes when flat and about 7 million with full depth range.
    pub max_grid_nodes: usize,

    /// Wall-clock limit checked by the solver. Not serialised.
    #[cfg_attr(feature = "serde", serde(skip))]
    pub deadline: Option<Instant>,
}

impl Default for PoissonParams {
    fn default() -> Self {
        Self {
            octree_depth: 8,
            density_quantile: 0.10,
            min_points: 16,
            kernel_scale: 1.5,
            coarse_depth: 4,
            max_iterations: 200,
            tolerance: 1e-6,
            max_grid_nodes: 16_000_000,
            deadline: None,
        }
    }
}

impl PoissonParams {
    /// Creates new parameters with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Coarse, fast settings for previews and tests.
    #[must_use]
    pub fn preview() -> Self {
        Self {
            octree_depth: 6,
            coarse_depth: 3,
            max_iterations: 100,
            tolerance: 1e-5,
            ..Self::default()
        }
    }

    /// Finer grid and tighter solve.
    #[must_use]
    pub fn high_quality() -> Self {
        Self {
            octree_depth: 9,
            max_iterations: 400,
            tolerance: 1e-7,
            max_grid_nodes: 64_000_000,
            ..Self::default()
        }
    }

    /// Sets the octree depth.
    #[must_use]
    pub const fn with_octree_depth(mut self, depth: u32) -> Self {
        self.octree_depth = depth;
        self
    }

    /// Sets the pruning quantile.
    #[must_use]
    pub const fn with_density_quantile(mut self, quantile: f64) -> Self {
        self.density_quantile = quantile;
        self
    }

    /// Sets the minimum number of input points.
    #[must_use]
    pub const fn with_min_points(mut self, min_points: usize) -> Self {
        self.min_points = min_points;
        self
    }

    /// Sets the per-level solver limits.
    #[must_use]
    pub const fn with_solver(mut self, max_iterations: usize, tolerance: f64) -> Self {
        self.max_iterations = max_iterations;
        self.tolerance = tolerance;
        self
    }

    /// Sets the grid size limit.
    #[must_use]
    pub const fn with_max_grid_nodes(mut self, max_grid_nodes: usize) -> Self {
        self.max_grid_nodes = max_grid_nodes;
        self
    }

    /// Sets the solver deadline.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    fn validate(&self) -> ScanResult<()> {
        if !(1..=MAX_OCTREE_DEPTH).contains(&self.octree_depth) {
            return Err(ScanError::invalid_parameter(format!(
                "octree depth must be within 1..={MAX_OCTREE_DEPTH}, got {}",
                self.octree_depth
            )));
        }
        if !(0.0..=1.0).contains(&self.density_quantile) {
            return Err(ScanError::invalid_parameter(format!(
                "density quantile must be within [0, 1], got {}",
                self.density_quantile
            )));
        }
        if !(self.kernel_scale.is_finite() && self.kernel_scale > 0.0) {
            return Err(ScanError::invalid_parameter("kernel scale must be positive"));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(ScanError::invalid_parameter("solver tolerance must be positive"));
        }
        if self.max_iterations == 0 {
            return Err(ScanError::invalid_parameter(
                "solver needs at least one iteration",
            ));
        }
        Ok(())
    }
}

/// A reconstructed mesh with per-vertex densities and solve statistics.
#[derive(Debug, Clone)]
pub struct ReconstructionResult {
    /// The pruned mesh, with colours and normals.
    pub mesh: IndexedMesh,

    /// Density of each vertex of `mesh`.
    pub densities: Vec<f64>,

    /// Vertices extracted before pruning.
    pub raw_vertex_count: usize,

    /// Faces extracted before pruning.
    pub raw_face_count: usize,

    /// Pruning outcome.
    pub pruning: PruneReport,

    /// Nodes per axis of the finest grid.
    pub grid_dims: [usize; 3],

    /// Conjugate-gradient iterations over all levels.
    pub solver_iterations: usize,
}

impl std::fmt::Display for ReconstructionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [nx, ny, nz] = self.grid_dims;
        write!(
            f,
            "Poisson reconstruction: {} vertices, {} faces ({} low-density vertices pruned), \
             grid {nx}x{ny}x{nz}, {} solver iterations",
            self.mesh.vertex_count(),
            self.mesh.face_count(),
            self.pruning.removed_vertices,
            self.solver_iterations
        )
    }
}

/// Reconstructs a coloured triangle mesh from an oriented point cloud.
///
/// # Errors
///
/// - [`ScanError::InvalidParameter`] for out-of-range parameters or a grid
///   larger than `max_grid_nodes`
/// - [`ScanError::InsufficientPoints`] for fewer than `min_points` points
/// - [`ScanError::ReconstructionFailed`] for missing or non-finite normals
///   or positions, a cloud with no extent, or an empty iso-surface
/// - [`ScanError::TimedOut`] if the deadline passes during the solve
pub fn reconstruct_mesh(
    cloud: &PointCloud,
    params: &PoissonParams,
) -> ScanResult<ReconstructionResult> {
    params.validate()?;

    if cloud.len() < params.min_points {
        return Err(ScanError::InsufficientPoints {
            required: params.min_points,
            actual: cloud.len(),
        });
    }

    let samples = oriented_samples(cloud)?;
    let bounds = cloud.bounds();
    let extent = bounds.max_extent();
    if !(extent.is_finite() && extent > 0.0) {
        return Err(ScanError::reconstruction("all points coincide"));
    }

    let index = PointIndex::build(samples.iter().map(|s| &s.position), extent);
    let spacing = mean_spacing(&index, &samples);
    let kernel_radius = |h: f64| (2.0 * h).max(params.kernel_scale * spacing);

    let grid = Grid::fit(&bounds, params.octree_depth, |h| {
        (0.05 * extent).max(kernel_radius(h) + 2.0 * h)
    });
    if grid.len() > params.max_grid_nodes {
        return Err(ScanError::invalid_parameter(format!(
            "grid of {} nodes exceeds the limit of {}",
            grid.len(),
            params.max_grid_nodes
        )));
    }
    let radius = kernel_radius(grid.spacing);

    debug!(
        points = samples.len(),
        dims = ?grid.dims,
        spacing = grid.spacing,
        radius,
        "poisson grid"
    );

    let limits = SolverLimits {
        max_iterations: params.max_iterations,
        tolerance: params.tolerance,
        deadline: params.deadline,
    };
    let levels = params.octree_depth - params.coarse_depth.clamp(1, params.octree_depth) + 1;
    let indicator = poisson::solve_indicator(&grid, &samples, radius, levels, &limits)?;

    #[allow(clippy::cast_precision_loss)]
    let iso = samples
        .iter()
        .map(|s| grid.sample(&indicator.values, &s.position))
        .sum::<f64>()
        / samples.len() as f64;

    let surface = isosurface::extract(&grid, &indicator.values, iso)?;
    if surface.is_empty() {
        return Err(ScanError::reconstruction(
            "indicator function has no iso-surface crossing",
        ));
    }

    let mut densities: Vec<f64> = surface
        .positions
        .par_iter()
        .map(|p| vertex_density(&index, p, radius))
        .collect();

    let vertices = surface
        .positions
        .iter()
        .map(|p| {
            let vertex = Vertex::new(*p);
            match index.nearest_one(p) {
                Some(hit) => vertex.with_color(cloud.points[hit.index].color),
                None => vertex,
            }
        })
        .collect();
    let mut mesh = IndexedMesh::from_parts(vertices, surface.faces);
    mesh.compute_vertex_normals();

    let raw_vertex_count = mesh.vertex_count();
    let raw_face_count = mesh.face_count();
    let pruning = prune_low_density(&mut mesh, &mut densities, params.density_quantile)?;

    if mesh.face_count() == 0 {
        warn!(
            vertices = mesh.vertex_count(),
            "pruning left no faces"
        );
    }

    let result = ReconstructionResult {
        mesh,
        densities,
        raw_vertex_count,
        raw_face_count,
        pruning,
        grid_dims: grid.dims,
        solver_iterations: indicator.iterations,
    };
    info!(
        vertices = result.mesh.vertex_count(),
        faces = result.mesh.face_count(),
        pruned = result.pruning.removed_vertices,
        threshold = result.pruning.threshold,
        iterations = result.solver_iterations,
        "reconstructed mesh"
    );
    Ok(result)
}

/// Validated solver samples, one per point.
fn oriented_samples(cloud: &PointCloud) -> ScanResult<Vec<Sample>> {
    cloud
        .points
        .iter()
        .enumerate()
        .map(|(i, point)| {
            let normal = point
                .normal
                .ok_or_else(|| ScanError::reconstruction(format!("point {i} has no normal")))?;
            let finite = point.position.coords.iter().all(|c| c.is_finite())
                && normal.iter().all(|c| c.is_finite());
            if !finite {
                return Err(ScanError::reconstruction(format!(
                    "point {i} has a non-finite position or normal"
                )));
            }
            let normal = normal.try_normalize(f64::EPSILON).ok_or_else(|| {
                ScanError::reconstruction(format!("point {i} has a zero-length normal"))
            })?;
            Ok(Sample {
                position: point.position,
                normal,
            })
        })
        .collect()
}

/// Sample support at `p`: the sum of `r^2 / (r^2 + d^2)` over the
/// [`DENSITY_NEIGHBORS`] nearest samples at distances `d`.
///
/// The kernel is positive everywhere and falls off with distance, so the
/// surface extrapolated away from the cloud ranks below every supported
/// vertex instead of tying at zero.
fn vertex_density(index: &PointIndex, p: &Point3<f64>, radius: f64) -> f64 {
    let r2 = radius * radius;
    index
        .nearest_n(p, DENSITY_NEIGHBORS)
        .iter()
        .map(|n| r2 / (r2 + n.distance_sq))
        .sum()
}

/// Mean distance from each sample to its nearest other sample.
fn mean_spacing(index: &PointIndex, samples: &[Sample]) -> f64 {
    let total: f64 = samples
        .iter()
        .filter_map(|s| index.nearest_n(&s.position, 2).get(1).copied())
        .map(|n| n.distance_sq.sqrt())
        .sum();
    #[allow(clippy::cast_precision_loss)]
    let mean = total / samples.len().max(1) as f64;
    mean
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pointcloud::{CloudParams, CloudPoint, build_point_cloud};
    use crate::{DepthParams, ScanImage, estimate_depth};
    use mesh_types::VertexColor;
    use nalgebra::{Point3, Vector3};
    use std::time::Duration;

    fn sphere_cloud(rings: u32, radius: f64) -> PointCloud {
        use std::f64::consts::PI;
        let mut points = Vec::new();
        for i in 1..rings {
            let theta = PI * f64::from(i) / f64::from(rings);
            for j in 0..2 * rings {
                let phi = PI * f64::from(j) / f64::from(rings);
                let n = Vector3::new(theta.sin() * phi.cos(), theta.sin() * phi.sin(), theta.cos());
                let color = if n.z > 0.0 {
                    VertexColor::new(255, 0, 0)
                } else {
                    VertexColor::new(0, 0, 255)
                };
                points.push(CloudPoint::new(Point3::from(n * radius), color).with_normal(n));
            }
        }
        PointCloud::from_points(points)
    }

    fn sheet_cloud(n: u32) -> PointCloud {
        let points = (0..n)
            .flat_map(|i| (0..n).map(move |j| (i, j)))
            .map(|(i, j)| {
                let position = Point3::new(f64::from(i) * 0.04, -f64::from(j) * 0.04, 0.1);
                CloudPoint::new(position, VertexColor::BLACK).with_normal(-Vector3::z())
            })
            .collect();
        PointCloud::from_points(points)
    }

    #[test]
    fn sphere_reconstruction_stays_near_sphere() {
        let cloud = sphere_cloud(16, 0.5);
        let result = reconstruct_mesh(&cloud, &PoissonParams::preview()).unwrap();

        assert!(result.mesh.face_count() > 100);
        assert!(result.mesh.first_invalid_index().is_none());
        assert!(result.mesh.has_normals());
        assert!(result.mesh.has_colors());

        let h = 1.1 / 64.0;
        for v in &result.mesh.vertices {
            let r = v.position.coords.norm();
            assert!((r - 0.5).abs() < 0.1 + 2.0 * h, "vertex radius {r}");
        }
    }

    #[test]
    fn sphere_colours_come_from_nearest_sample() {
        let cloud = sphere_cloud(16, 0.5);
        let result = reconstruct_mesh(&cloud, &PoissonParams::preview()).unwrap();
        for v in &result.mesh.vertices {
            if v.position.z > 0.2 {
                assert_eq!(v.color, Some(VertexColor::new(255, 0, 0)));
            }
        }
    }

    #[test]
    fn flat_sheet_reconstructs() {
        let cloud = sheet_cloud(16);
        let result = reconstruct_mesh(&cloud, &PoissonParams::preview()).unwrap();
        assert!(result.mesh.vertex_count() > 0);
        assert!(result.mesh.face_count() > 0);
        assert!(result.raw_vertex_count >= result.mesh.vertex_count());
        assert_eq!(result.densities.len(), result.mesh.vertex_count());
        assert!(result.densities.iter().all(|&d| d >= result.pruning.threshold));
    }

    fn image_cloud(width: u32, height: u32, pixel: impl Fn(u32, u32) -> u8) -> PointCloud {
        let mut pixels = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                let v = pixel(x, y);
                pixels.extend_from_slice(&[v, v, v]);
            }
        }
        let image = ScanImage::from_raw(width, height, 3, pixels).unwrap();
        let depth = estimate_depth(&image, &DepthParams::default()).unwrap();
        build_point_cloud(&image, &depth, &CloudParams::default()).unwrap()
    }

    #[test]
    fn densities_fall_off_without_ties_at_zero() {
        let result = reconstruct_mesh(&sheet_cloud(16), &PoissonParams::preview()).unwrap();
        assert!(result.pruning.threshold > 0.0);
        assert!(result.pruning.removed_vertices > 0);
        assert!(result.densities.iter().all(|&d| d > 0.0 && d.is_finite()));
    }

    #[test]
    fn image_mesh_loses_about_a_tenth() {
        let cloud = image_cloud(128, 128, |x, y| if ((x + y) / 16) % 2 == 0 { 230 } else { 30 });
        let result = reconstruct_mesh(&cloud, &PoissonParams::preview()).unwrap();

        let raw = result.raw_vertex_count;
        let removed = result.pruning.removed_vertices;
        assert_eq!(raw - removed, result.mesh.vertex_count());
        #[allow(clippy::cast_precision_loss)]
        let fraction = removed as f64 / raw as f64;
        #[allow(clippy::cast_precision_loss)]
        let slack = 1.0 / raw as f64;
        assert!(
            (0.08..=0.1 + slack).contains(&fraction),
            "pruned {removed} of {raw} vertices"
        );
    }

    #[test]
    fn default_grid_fits_a_64px_image() {
        // The grid limit is checked before the solve, so an expired deadline
        // reports a timeout only when the default grid was accepted.
        let cloud = image_cloud(64, 64, |_, _| 0);
        let params = PoissonParams::default().with_deadline(Instant::now());
        let result = reconstruct_mesh(&cloud, &params);
        assert!(matches!(result, Err(ScanError::TimedOut { .. })), "{result:?}");

        let shaded = image_cloud(64, 64, |x, _| u8::try_from(x * 4).unwrap());
        let result = reconstruct_mesh(&shaded, &params);
        assert!(matches!(result, Err(ScanError::TimedOut { .. })), "{result:?}");
    }

    #[test]
    fn too_few_points_rejected() {
        let cloud = sheet_cloud(3);
        let result = reconstruct_mesh(&cloud, &PoissonParams::preview());
        assert!(matches!(
            result,
            Err(ScanError::InsufficientPoints {
                required: 16,
                actual: 9
            })
        ));
    }

    #[test]
    fn missing_normals_fail() {
        let mut cloud = sheet_cloud(5);
        cloud.points[3].normal = None;
        let result = reconstruct_mesh(&cloud, &PoissonParams::preview());
        assert!(matches!(result, Err(ScanError::ReconstructionFailed { .. })));
    }

    #[test]
    fn non_finite_positions_fail() {
        let mut cloud = sheet_cloud(5);
        cloud.points[7].position.x = f64::NAN;
        let result = reconstruct_mesh(&cloud, &PoissonParams::preview());
        assert!(matches!(result, Err(ScanError::ReconstructionFailed { .. })));
    }

    #[test]
    fn coincident_points_fail() {
        let points = (0..20)
            .map(|_| {
                CloudPoint::new(Point3::new(1.0, 1.0, 1.0), VertexColor::WHITE)
                    .with_normal(Vector3::z())
            })
            .collect();
        let result = reconstruct_mesh(&PointCloud::from_points(points), &PoissonParams::preview());
        assert!(matches!(result, Err(ScanError::ReconstructionFailed { .. })));
    }

    #[test]
    fn grid_limit_is_enforced() {
        let cloud = sheet_cloud(8);
        let params = PoissonParams::preview().with_max_grid_nodes(1_000);
        let result = reconstruct_mesh(&cloud, &params);
        assert!(matches!(result, Err(ScanError::InvalidParameter { .. })));
    }

    #[test]
    fn invalid_parameters_rejected() {
        let cloud = sheet_cloud(8);
        for params in [
            PoissonParams::preview().with_octree_depth(0),
            PoissonParams::preview().with_octree_depth(MAX_OCTREE_DEPTH + 1),
            PoissonParams::preview().with_density_quantile(1.5),
            PoissonParams::preview().with_solver(0, 1e-6),
        ] {
            let result = reconstruct_mesh(&cloud, &params);
            assert!(matches!(result, Err(ScanError::InvalidParameter { .. })));
        }
    }

    #[test]
    fn passed_deadline_times_out() {
        let cloud = sheet_cloud(8);
        let params = PoissonParams::preview().with_deadline(Instant::now() - Duration::from_millis(5));
        let result = reconstruct_mesh(&cloud, &params);
        assert!(matches!(result, Err(ScanError::TimedOut { .. })));
    }

    #[test]
    fn display_summarises_result() {
        let result = reconstruct_mesh(&sheet_cloud(12), &PoissonParams::preview()).unwrap();
        let text = result.to_string();
        assert!(text.starts_with("Poisson reconstruction:"));
        assert!(text.contains("solver iterations"));
    }
}
