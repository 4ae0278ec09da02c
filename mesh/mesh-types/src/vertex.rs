//! Vertex types and attributes.

use nalgebra::{Point3, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// RGB color with 8-bit components.
///
/// Photographs arrive as 8-bit RGB, so colours are stored the same way and
/// only converted to the unit range when a consumer asks for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VertexColor {
    /// Red component (0-255).
    pub r: u8,
    /// Green component (0-255).
    pub g: u8,
    /// Blue component (0-255).
    pub b: u8,
}

impl VertexColor {
    /// Create a new color from RGB components.
    ///
    /// # Example
    ///
    /// ```
    /// use mesh_types::VertexColor;
    ///
    /// let red = VertexColor::new(255, 0, 0);
    /// assert_eq!(red.r, 255);
    /// ```
    #[inline]
    #[must_use]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Create a color from unit-range components.
    ///
    /// Values are clamped to `[0, 1]` and rounded to the nearest 8-bit level,
    /// so `from_unit(c.to_unit())` reproduces `c` exactly.
    ///
    /// # Example
    ///
    /// ```
    /// use mesh_types::VertexColor;
    ///
    /// let color = VertexColor::from_unit([1.0, 0.5, -3.0]);
    /// assert_eq!(color, VertexColor::new(255, 128, 0));
    /// ```
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    // Clamped to [0, 255] before the cast
    pub fn from_unit(rgb: [f64; 3]) -> Self {
        let level = |c: f64| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
        Self {
            r: level(rgb[0]),
            g: level(rgb[1]),
            b: level(rgb[2]),
        }
    }

    /// Convert to unit-range components.
    #[inline]
    #[must_use]
    pub fn to_unit(self) -> [f64; 3] {
        [
            f64::from(self.r) / 255.0,
            f64::from(self.g) / 255.0,
            f64::from(self.b) / 255.0,
        ]
    }

    /// Mean of the three channels in `[0, 1]`.
    ///
    /// This is the luminance measure the depth heuristic uses: an unweighted
    /// average, not a perceptual one.
    #[inline]
    #[must_use]
    pub fn mean_intensity(self) -> f64 {
        (f64::from(self.r) + f64::from(self.g) + f64::from(self.b)) / (3.0 * 255.0)
    }

    /// Black color (0, 0, 0).
    pub const BLACK: Self = Self::new(0, 0, 0);

    /// White color (255, 255, 255).
    pub const WHITE: Self = Self::new(255, 255, 255);
}

impl Default for VertexColor {
    fn default() -> Self {
        Self::WHITE
    }
}

/// A vertex in 3D space with optional normal and colour.
///
/// # Example
///
/// ```
/// use mesh_types::{Vertex, VertexColor, Vector3};
///
/// let v = Vertex::from_coords(1.0, 2.0, 3.0)
///     .with_normal(Vector3::z())
///     .with_color(VertexColor::BLACK);
///
/// assert_eq!(v.position.y, 2.0);
/// assert!(v.normal.is_some());
/// assert_eq!(v.color, Some(VertexColor::BLACK));
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Vertex {
    /// 3D position.
    pub position: Point3<f64>,

    /// Unit normal, if known.
    pub normal: Option<Vector3<f64>>,

    /// Colour, if known.
    pub color: Option<VertexColor>,
}

impl Vertex {
    /// Create a new vertex with only position set.
    #[inline]
    #[must_use]
    pub const fn new(position: Point3<f64>) -> Self {
        Self {
            position,
            normal: None,
            color: None,
        }
    }

    /// Create a vertex from raw coordinates.
    #[inline]
    #[must_use]
    pub fn from_coords(x: f64, y: f64, z: f64) -> Self {
        Self::new(Point3::new(x, y, z))
    }

    /// Returns this vertex with the given normal attached.
    #[inline]
    #[must_use]
    pub const fn with_normal(mut self, normal: Vector3<f64>) -> Self {
        self.normal = Some(normal);
        self
    }

    /// Returns this vertex with the given colour attached.
    #[inline]
    #[must_use]
    pub const fn with_color(mut self, color: VertexColor) -> Self {
        self.color = Some(color);
        self
    }
}
