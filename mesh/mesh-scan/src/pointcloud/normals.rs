//! Normal estimation and orientation for point clouds.
//!
//! Normals come from PCA over a hybrid neighbourhood: at most `max_nn`
//! nearest points that also lie within `radius`. The normal is the
//! eigenvector of the neighbourhood covariance with the smallest eigenvalue.
//! PCA leaves the sign arbitrary, so a second pass flips each normal toward
//! a view direction.

use nalgebra::{Matrix3, Point3, SymmetricEigen, Vector3};
use rayon::prelude::*;
use tracing::debug;

use super::PointCloud;
use crate::error::{ScanError, ScanResult};
use crate::spatial::PointIndex;

/// Fewest neighbours (including the point itself) that define a plane.
const MIN_NEIGHBORS: usize = 3;

impl PointCloud {
    /// Estimates a unit normal for every point.
    ///
    /// Points whose neighbourhood holds fewer than three points, or whose
    /// neighbours are collinear, receive `+z`. Orientation is fixed
    /// afterwards by [`orient_normals_towards`](Self::orient_normals_towards).
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::EmptyCloud`] for an empty cloud, or
    /// [`ScanError::InvalidParameter`] for a non-positive radius or a zero
    /// neighbour limit.
    ///
    /// # Example
    ///
    /// ```
    /// use mesh_scan::{CloudPoint, PointCloud};
    /// use mesh_types::VertexColor;
    /// use nalgebra::Point3;
    ///
    /// let points = (0..10)
    ///     .flat_map(|i| (0..10).map(move |j| (i, j)))
    ///     .map(|(i, j)| {
    ///         let position = Point3::new(f64::from(i) * 0.01, f64::from(j) * 0.01, 0.05);
    ///         CloudPoint::new(position, VertexColor::WHITE)
    ///     })
    ///     .collect();
    /// let mut cloud = PointCloud::from_points(points);
    ///
    /// cloud.estimate_normals(0.1, 30).unwrap();
    /// let n = cloud.points[0].normal.unwrap();
    /// assert!(n.z.abs() > 0.99);
    /// ```
    pub fn estimate_normals(&mut self, radius: f64, max_nn: usize) -> ScanResult<()> {
        if self.points.is_empty() {
            return Err(ScanError::EmptyCloud);
        }
        if !(radius.is_finite() && radius > 0.0) {
            return Err(ScanError::invalid_parameter(format!(
                "normal radius must be positive, got {radius}"
            )));
        }
        if max_nn == 0 {
            return Err(ScanError::invalid_parameter(
                "max neighbors must be greater than 0",
            ));
        }

        let index = PointIndex::build(
            self.points.iter().map(|p| &p.position),
            self.bounds().max_extent(),
        );

        let positions: Vec<Point3<f64>> = self.points.iter().map(|p| p.position).collect();
        let normals: Vec<Option<Vector3<f64>>> = positions
            .par_iter()
            .map(|p| {
                let neighbors: Vec<Point3<f64>> = index
                    .nearest_within(p, radius, max_nn)
                    .into_iter()
                    .map(|n| positions[n.index])
                    .collect();
                plane_normal(&neighbors)
            })
            .collect();

        let sparse = normals.iter().filter(|n| n.is_none()).count();
        for (point, normal) in self.points.iter_mut().zip(normals) {
            point.normal = Some(normal.unwrap_or_else(Vector3::z));
        }

        debug!(
            points = self.points.len(),
            radius,
            max_nn,
            defaulted = sparse,
            "estimated normals"
        );
        Ok(())
    }

    /// Flips every normal so its component along `direction` is non-negative.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::InvalidParameter`] if `direction` is zero or
    /// some point has no normal.
    pub fn orient_normals_towards(&mut self, direction: Vector3<f64>) -> ScanResult<()> {
        let direction = direction
            .try_normalize(f64::EPSILON)
            .ok_or_else(|| ScanError::invalid_parameter("orientation direction is zero"))?;

        for point in &mut self.points {
            let normal = point.normal.as_mut().ok_or_else(|| {
                ScanError::invalid_parameter("point cloud has no normals to orient")
            })?;
            if normal.dot(&direction) < 0.0 {
                *normal = -*normal;
            }
        }
        Ok(())
    }
}

/// Least-variance direction of a neighbourhood, or `None` if the
/// neighbourhood is too small or degenerate.
fn plane_normal(neighbors: &[Point3<f64>]) -> Option<Vector3<f64>> {
    if neighbors.len() < MIN_NEIGHBORS {
        return None;
    }

    let centroid: Vector3<f64> = neighbors.iter().map(|p| p.coords).sum();
    #[allow(clippy::cast_precision_loss)]
    let centroid = centroid / neighbors.len() as f64;

    let mut cov = Matrix3::zeros();
    for p in neighbors {
        let diff = p.coords - centroid;
        cov += diff * diff.transpose();
    }

    let eigen = SymmetricEigen::new(cov);
    let values = eigen.eigenvalues;
    let min_idx = if values[0] <= values[1] && values[0] <= values[2] {
        0
    } else if values[1] <= values[2] {
        1
    } else {
        2
    };

    // Collinear neighbourhoods have two vanishing eigenvalues and no plane.
    let mut sorted = [values[0], values[1], values[2]];
    sorted.sort_by(f64::total_cmp);
    if sorted[1] <= f64::EPSILON * sorted[2].max(f64::MIN_POSITIVE) {
        return None;
    }

    eigen.eigenvectors.column(min_idx).into_owned().try_normalize(1e-10)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pointcloud::CloudPoint;
    use mesh_types::VertexColor;

    fn grid(n: u32, spacing: f64, z: impl Fn(f64, f64) -> f64) -> PointCloud {
        let points = (0..n)
            .flat_map(|i| (0..n).map(move |j| (i, j)))
            .map(|(i, j)| {
                let (x, y) = (f64::from(i) * spacing, f64::from(j) * spacing);
                CloudPoint::new(Point3::new(x, y, z(x, y)), VertexColor::WHITE)
            })
            .collect();
        PointCloud::from_points(points)
    }

    #[test]
    fn flat_grid_normals_are_axial() {
        let mut cloud = grid(12, 0.01, |_, _| 0.05);
        cloud.estimate_normals(0.1, 30).unwrap();
        for point in &cloud.points {
            let n = point.normal.unwrap();
            assert!(n.z.abs() > 0.999, "normal {n:?}");
        }
    }

    #[test]
    fn tilted_plane_normal_matches_slope() {
        // z = 0.5 x has normal parallel to (-0.5, 0, 1).
        let mut cloud = grid(10, 0.02, |x, _| 0.5 * x);
        cloud.estimate_normals(0.1, 30).unwrap();
        cloud.orient_normals_towards(Vector3::z()).unwrap();

        let expected = Vector3::new(-0.5, 0.0, 1.0).normalize();
        let n = cloud.points[45].normal.unwrap();
        assert!((n - expected).norm() < 1e-6, "normal {n:?}");
    }

    #[test]
    fn isolated_points_get_default_normal() {
        let mut cloud = PointCloud::from_points(vec![
            CloudPoint::new(Point3::new(0.0, 0.0, 0.0), VertexColor::WHITE),
            CloudPoint::new(Point3::new(5.0, 0.0, 0.0), VertexColor::WHITE),
        ]);
        cloud.estimate_normals(0.1, 30).unwrap();
        assert_eq!(cloud.points[0].normal, Some(Vector3::z()));
        assert_eq!(cloud.points[1].normal, Some(Vector3::z()));
    }

    #[test]
    fn orientation_faces_view_direction() {
        let mut cloud = grid(6, 0.01, |_, _| 0.0);
        cloud.estimate_normals(0.1, 30).unwrap();
        cloud.orient_normals_towards(-Vector3::z()).unwrap();
        assert!(cloud.points.iter().all(|p| p.normal.unwrap().z < 0.0));
    }

    #[test]
    fn orienting_without_normals_fails() {
        let mut cloud = grid(2, 0.01, |_, _| 0.0);
        let result = cloud.orient_normals_towards(Vector3::z());
        assert!(matches!(result, Err(ScanError::InvalidParameter { .. })));
    }

    #[test]
    fn invalid_search_rejected() {
        let mut cloud = grid(3, 0.01, |_, _| 0.0);
        assert!(cloud.estimate_normals(0.0, 30).is_err());
        assert!(cloud.estimate_normals(0.1, 0).is_err());
        assert!(matches!(
            PointCloud::new().estimate_normals(0.1, 30),
            Err(ScanError::EmptyCloud)
        ));
    }
}
