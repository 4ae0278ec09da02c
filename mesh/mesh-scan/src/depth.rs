//! Depth-from-brightness heuristic.
//!
//! A single photograph carries no metric depth, so the pipeline assumes
//! brighter pixels are nearer to the camera:
//!
//! ```text
//! depth(x, y) = scale * (1 - mean(r, g, b) / 255)
//! ```
//!
//! White maps to depth 0 and black to `scale`.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{ScanError, ScanResult};
use crate::raster::ScanImage;

/// Parameters for [`estimate_depth`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct DepthParams {
    /// Depth assigned to a black pixel, in scene length units (default: 0.1).
    pub scale: f64,
}

impl Default for DepthParams {
    fn default() -> Self {
        Self { scale: 0.1 }
    }
}

impl DepthParams {
    /// Creates new parameters with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the depth scale.
    #[must_use]
    pub const fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }
}

/// Per-pixel scalar depth with the same dimensions as its source image.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthMap {
    width: u32,
    height: u32,
    values: Vec<f64>,
}

impl DepthMap {
    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Depth at column `x`, row `y`, or `None` outside the map.
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> Option<f64> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.values
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    /// Row-major depth values.
    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

/// Estimates a depth map from pixel brightness.
///
/// # Errors
///
/// Returns [`ScanError::InvalidParameter`] if the scale is negative or not
/// finite.
///
/// # Example
///
/// ```
/// use mesh_scan::{estimate_depth, DepthParams, ScanImage};
///
/// // One white and one black pixel.
/// let image = ScanImage::from_raw(2, 1, 3, vec![255, 255, 255, 0, 0, 0]).unwrap();
/// let depth = estimate_depth(&image, &DepthParams::default()).unwrap();
///
/// assert_eq!(depth.get(0, 0), Some(0.0));
/// assert!((depth.get(1, 0).unwrap() - 0.1).abs() < 1e-12);
/// ```
pub fn estimate_depth(image: &ScanImage, params: &DepthParams) -> ScanResult<DepthMap> {
    if !params.scale.is_finite() || params.scale < 0.0 {
        return Err(ScanError::invalid_parameter(format!(
            "depth scale must be finite and non-negative, got {}",
            params.scale
        )));
    }

    let values = image
        .as_rgb()
        .pixels()
        .map(|p| {
            let mean = (f64::from(p[0]) + f64::from(p[1]) + f64::from(p[2])) / (3.0 * 255.0);
            params.scale * (1.0 - mean)
        })
        .collect();

    Ok(DepthMap {
        width: image.width(),
        height: image.height(),
        values,
    })
}
