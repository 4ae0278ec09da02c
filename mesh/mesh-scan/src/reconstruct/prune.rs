//! Low-density vertex pruning.
//!
//! Poisson reconstruction closes the surface far away from the samples as
//! well, where few samples support it. Removing the vertices below a
//! density quantile trims that hallucinated geometry.

use mesh_types::IndexedMesh;

use crate::error::{ScanError, ScanResult};

/// Outcome of [`prune_low_density`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PruneReport {
    /// Density below which vertices were removed.
    pub threshold: f64,
    /// Number of vertices removed.
    pub removed_vertices: usize,
    /// Number of faces removed with them.
    pub removed_faces: usize,
}

/// The `q`-quantile of `values` with linear interpolation between order
/// statistics (position `(n - 1) * q`).
///
/// Returns `None` for an empty slice or a `q` outside `[0, 1]`.
///
/// # Example
///
/// ```
/// use mesh_scan::density_quantile;
///
/// let values = [4.0, 1.0, 3.0, 2.0, 5.0];
/// assert_eq!(density_quantile(&values, 0.5), Some(3.0));
/// assert_eq!(density_quantile(&values, 0.25), Some(2.0));
/// assert_eq!(density_quantile(&[], 0.1), None);
/// ```
#[must_use]
pub fn density_quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() || !(0.0..=1.0).contains(&q) {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    #[allow(clippy::cast_precision_loss)]
    let position = (sorted.len() - 1) as f64 * q;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let lo = position.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    #[allow(clippy::cast_precision_loss)]
    let frac = position - lo as f64;

    Some((sorted[lo] + (sorted[hi] - sorted[lo]) * frac).min(sorted[hi]))
}

/// Removes every vertex whose density is strictly below the `quantile` of
/// all densities, together with the faces that reference it.
///
/// `densities` holds one value per vertex and is compacted alongside the
/// mesh, so it stays aligned with the surviving vertices.
///
/// # Errors
///
/// Returns [`ScanError::InvalidParameter`] if `densities` does not match
/// the vertex count or `quantile` is outside `[0, 1]`.
pub fn prune_low_density(
    mesh: &mut IndexedMesh,
    densities: &mut Vec<f64>,
    quantile: f64,
) -> ScanResult<PruneReport> {
    if densities.len() != mesh.vertex_count() {
        return Err(ScanError::invalid_parameter(format!(
            "{} densities for {} vertices",
            densities.len(),
            mesh.vertex_count()
        )));
    }
    if !(0.0..=1.0).contains(&quantile) {
        return Err(ScanError::invalid_parameter(format!(
            "density quantile must be within [0, 1], got {quantile}"
        )));
    }

    let Some(threshold) = density_quantile(densities, quantile) else {
        return Ok(PruneReport::default());
    };

    let keep: Vec<bool> = densities.iter().map(|&d| d >= threshold).collect();
    let faces_before = mesh.face_count();
    let removed_vertices = mesh.retain_vertices(&keep);

    let mut flags = keep.iter();
    densities.retain(|_| flags.next().copied().unwrap_or(true));

    Ok(PruneReport {
        threshold,
        removed_vertices,
        removed_faces: faces_before - mesh.face_count(),
    })
}
