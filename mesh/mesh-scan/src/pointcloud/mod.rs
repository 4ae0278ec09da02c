//! Point clouds lifted from an image and its depth map.
//!
//! [`build_point_cloud`] samples the image on a regular grid, places each
//! sample at `(x * unit_scale, -y * unit_scale, depth)` and attaches the
//! pixel colour. The row coordinate is negated so the cloud is right-handed
//! with y up. Normals are then estimated from the local neighbourhood and
//! oriented toward the camera, which looks down +z from negative z.
//!
//! # Example
//!
//! ```
//! use mesh_scan::{build_point_cloud, estimate_depth, CloudParams, DepthParams, ScanImage};
//!
//! let image = ScanImage::from_raw(8, 8, 3, vec![0; 8 * 8 * 3]).unwrap();
//! let depth = estimate_depth(&image, &DepthParams::default()).unwrap();
//! let cloud = build_point_cloud(&image, &depth, &CloudParams::default()).unwrap();
//!
//! // Stride 4 over an 8x8 image keeps a 2x2 grid.
//! assert_eq!(cloud.len(), 4);
//! assert!(cloud.has_normals());
//! ```

mod normals;

use mesh_types::{Aabb, Vertex, VertexColor};
use nalgebra::{Point3, Vector3};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::depth::DepthMap;
use crate::error::{ScanError, ScanResult};
use crate::raster::ScanImage;

/// A coloured sample with an optional unit normal.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudPoint {
    /// The 3D position of the point.
    pub position: Point3<f64>,

    /// Unit normal, once estimated.
    pub normal: Option<Vector3<f64>>,

    /// Colour of the source pixel.
    pub color: VertexColor,
}

impl CloudPoint {
    /// Creates a point with position and colour and no normal.
    #[must_use]
    pub const fn new(position: Point3<f64>, color: VertexColor) -> Self {
        Self {
            position,
            normal: None,
            color,
        }
    }

    /// Returns this point with the given normal attached.
    #[must_use]
    pub const fn with_normal(mut self, normal: Vector3<f64>) -> Self {
        self.normal = Some(normal);
        self
    }

    /// Colour as unit-range RGB.
    #[must_use]
    pub fn unit_color(&self) -> [f64; 3] {
        self.color.to_unit()
    }

    /// Converts this point to a mesh vertex carrying normal and colour.
    #[must_use]
    pub fn to_vertex(&self) -> Vertex {
        Vertex {
            position: self.position,
            normal: self.normal,
            color: Some(self.color),
        }
    }
}

/// An ordered collection of coloured points.
///
/// The pipeline builds a cloud once and consumes it once; points are not
/// added or removed after construction.
#[derive(Debug, Clone, Default)]
pub struct PointCloud {
    /// The points in this cloud.
    pub points: Vec<CloudPoint>,
}

impl PointCloud {
    /// Creates an empty point cloud.
    #[must_use]
    pub const fn new() -> Self {
        Self { points: Vec::new() }
    }

    /// Creates a cloud from existing points.
    #[must_use]
    pub const fn from_points(points: Vec<CloudPoint>) -> Self {
        Self { points }
    }

    /// Returns the number of points in the cloud.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Returns true if the cloud has no points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Returns true if every point has a normal.
    #[must_use]
    pub fn has_normals(&self) -> bool {
        !self.points.is_empty() && self.points.iter().all(|p| p.normal.is_some())
    }

    /// Axis-aligned bounds of the positions (empty for an empty cloud).
    #[must_use]
    pub fn bounds(&self) -> Aabb {
        Aabb::from_points(self.points.iter().map(|p| &p.position))
    }

    /// Returns true if every position and normal is finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.points.iter().all(|p| {
            p.position.coords.iter().all(|c| c.is_finite())
                && p.normal.is_none_or(|n| n.iter().all(|c| c.is_finite()))
        })
    }
}

/// Parameters for [`build_point_cloud`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct CloudParams {
    /// Sample every `stride`-th pixel along both axes (default: 4).
    pub stride: u32,

    /// World length of one pixel step (default: 0.01).
    pub unit_scale: f64,

    /// Neighbour search radius for normal estimation (default: 0.1).
    pub normal_radius: f64,

    /// Maximum neighbours used per normal (default: 30).
    pub max_neighbors: usize,

    /// Normals are flipped to have a non-negative component along this
    /// direction (default: `-z`, toward the camera).
    pub view_direction: [f64; 3],
}

impl Default for CloudParams {
    fn default() -> Self {
        Self {
            stride: 4,
            unit_scale: 0.01,
            normal_radius: 0.1,
            max_neighbors: 30,
            view_direction: [0.0, 0.0, -1.0],
        }
    }
}

impl CloudParams {
    /// Creates new parameters with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the sampling stride.
    #[must_use]
    pub const fn with_stride(mut self, stride: u32) -> Self {
        self.stride = stride;
        self
    }

    /// Sets the pixel-to-world scale.
    #[must_use]
    pub const fn with_unit_scale(mut self, unit_scale: f64) -> Self {
        self.unit_scale = unit_scale;
        self
    }

    /// Sets the hybrid neighbour search used for normals.
    #[must_use]
    pub const fn with_normal_search(mut self, radius: f64, max_neighbors: usize) -> Self {
        self.normal_radius = radius;
        self.max_neighbors = max_neighbors;
        self
    }

    fn validate(&self) -> ScanResult<()> {
        if self.stride == 0 {
            return Err(ScanError::invalid_parameter("stride must be at least 1"));
        }
        if !(self.unit_scale.is_finite() && self.unit_scale > 0.0) {
            return Err(ScanError::invalid_parameter(format!(
                "unit scale must be positive, got {}",
                self.unit_scale
            )));
        }
        if !(self.normal_radius.is_finite() && self.normal_radius > 0.0) {
            return Err(ScanError::invalid_parameter(format!(
                "normal radius must be positive, got {}",
                self.normal_radius
            )));
        }
        if self.max_neighbors == 0 {
            return Err(ScanError::invalid_parameter(
                "max neighbors must be at least 1",
            ));
        }
        if Vector3::from(self.view_direction)
            .try_normalize(f64::EPSILON)
            .is_none()
        {
            return Err(ScanError::invalid_parameter(
                "view direction must be non-zero",
            ));
        }
        Ok(())
    }
}

/// Number of samples a `stride` grid keeps along an axis of `len` pixels.
#[must_use]
pub const fn samples_along(len: u32, stride: u32) -> u32 {
    len.div_ceil(stride)
}

/// Builds a coloured, normal-bearing point cloud from an image and its
/// depth map.
///
/// The cloud holds exactly `ceil(width / stride) * ceil(height / stride)`
/// points, in row-major sampling order.
///
/// # Errors
///
/// - [`ScanError::InvalidParameter`] for a zero stride, non-positive
///   scales, or a depth map whose size differs from the image
/// - [`ScanError::EmptyCloud`] if no sample survives
pub fn build_point_cloud(
    image: &ScanImage,
    depth: &DepthMap,
    params: &CloudParams,
) -> ScanResult<PointCloud> {
    params.validate()?;

    if (depth.width(), depth.height()) != (image.width(), image.height()) {
        return Err(ScanError::invalid_parameter(format!(
            "depth map is {}x{} but image is {}x{}",
            depth.width(),
            depth.height(),
            image.width(),
            image.height()
        )));
    }

    let stride = params.stride as usize;
    let capacity = samples_along(image.width(), params.stride) as usize
        * samples_along(image.height(), params.stride) as usize;
    let mut cloud = PointCloud::from_points(Vec::with_capacity(capacity));

    for y in (0..image.height()).step_by(stride) {
        for x in (0..image.width()).step_by(stride) {
            let Some(z) = depth.get(x, y) else {
                continue;
            };
            let position = Point3::new(
                f64::from(x) * params.unit_scale,
                -f64::from(y) * params.unit_scale,
                z,
            );
            cloud.points.push(CloudPoint::new(position, image.pixel(x, y)));
        }
    }

    if cloud.is_empty() {
        return Err(ScanError::EmptyCloud);
    }

    cloud.estimate_normals(params.normal_radius, params.max_neighbors)?;
    cloud.orient_normals_towards(Vector3::from(params.view_direction))?;

    debug!(
        points = cloud.len(),
        stride = params.stride,
        "built point cloud"
    );

    Ok(cloud)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::depth::{DepthParams, estimate_depth};
    use proptest::prelude::*;

    fn gradient_image(width: u32, height: u32) -> ScanImage {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                #[allow(clippy::cast_possible_truncation)]
                let v = ((x + y) * 255 / (width + height).max(1)) as u8;
                data.extend_from_slice(&[v, v / 2, 255 - v]);
            }
        }
        ScanImage::from_raw(width, height, 3, data).unwrap()
    }

    fn cloud_for(image: &ScanImage, params: &CloudParams) -> ScanResult<PointCloud> {
        let depth = estimate_depth(image, &DepthParams::default())?;
        build_point_cloud(image, &depth, params)
    }

    #[test]
    fn sixty_four_square_gives_256_points() {
        let image = gradient_image(64, 64);
        let cloud = cloud_for(&image, &CloudParams::default()).unwrap();
        assert_eq!(cloud.len(), 256);
        assert!(cloud.has_normals());
    }

    #[test]
    fn positions_follow_grid_and_flip_y() {
        let image = gradient_image(9, 5);
        let cloud = cloud_for(&image, &CloudParams::default()).unwrap();
        // x samples 0, 4, 8; y samples 0, 4.
        assert_eq!(cloud.len(), 6);

        let p = &cloud.points[4];
        assert!((p.position.x - 0.04).abs() < 1e-12);
        assert!((p.position.y + 0.04).abs() < 1e-12);
        assert_eq!(p.color, image.pixel(4, 4));
    }

    #[test]
    fn single_pixel_keeps_one_point() {
        let image = gradient_image(1, 1);
        let cloud = cloud_for(&image, &CloudParams::default()).unwrap();
        assert_eq!(cloud.len(), 1);
        assert!(cloud.has_normals());
    }

    #[test]
    fn normals_face_the_camera() {
        let image = gradient_image(32, 32);
        let cloud = cloud_for(&image, &CloudParams::default()).unwrap();
        for point in &cloud.points {
            let n = point.normal.unwrap();
            assert!(n.z <= 0.0);
            assert!((n.norm() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn zero_stride_rejected() {
        let image = gradient_image(4, 4);
        let result = cloud_for(&image, &CloudParams::default().with_stride(0));
        assert!(matches!(result, Err(ScanError::InvalidParameter { .. })));
    }

    #[test]
    fn mismatched_depth_rejected() {
        let image = gradient_image(4, 4);
        let other = gradient_image(8, 4);
        let depth = estimate_depth(&other, &DepthParams::default()).unwrap();
        let result = build_point_cloud(&image, &depth, &CloudParams::default());
        assert!(matches!(result, Err(ScanError::InvalidParameter { .. })));
    }

    #[test]
    fn corrupt_positions_are_detected() {
        let mut cloud = PointCloud::new();
        cloud.points.push(CloudPoint::new(
            Point3::new(f64::NAN, 0.0, 0.0),
            VertexColor::BLACK,
        ));
        assert!(!cloud.is_finite());
    }

    proptest! {
        #[test]
        fn point_count_matches_sampling_grid(
            width in 1u32..40,
            height in 1u32..40,
            stride in 1u32..7,
        ) {
            let image = gradient_image(width, height);
            let params = CloudParams::default().with_stride(stride);
            let cloud = cloud_for(&image, &params).unwrap();
            let expected = width.div_ceil(stride) * height.div_ceil(stride);
            prop_assert_eq!(cloud.len(), expected as usize);
        }
    }
}
