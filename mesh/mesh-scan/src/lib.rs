//! Single-image surface reconstruction.
//!
//! This crate turns one RGB photograph into a coloured triangle mesh in
//! three stages:
//!
//! - **Depth** - A brightness heuristic assigns every pixel a depth
//! - **Point Cloud** - Subsampled pixels are lifted into 3D with their
//!   colours, and oriented normals are estimated
//! - **Reconstruction** - Poisson surface reconstruction followed by
//!   low-density pruning
//!
//! # Quick Start
//!
//! ```
//! use mesh_scan::{
//!     build_point_cloud, estimate_depth, reconstruct_mesh, CloudParams, DepthParams,
//!     PoissonParams, ScanImage,
//! };
//!
//! // A 48x48 image with a bright diagonal band.
//! let mut pixels = Vec::with_capacity(48 * 48 * 3);
//! for y in 0..48u32 {
//!     for x in 0..48u32 {
//!         let v = if x.abs_diff(y) < 8 { 230 } else { 30 };
//!         pixels.extend_from_slice(&[v, v, v]);
//!     }
//! }
//! let image = ScanImage::from_raw(48, 48, 3, pixels).unwrap();
//!
//! let depth = estimate_depth(&image, &DepthParams::default()).unwrap();
//! let cloud = build_point_cloud(&image, &depth, &CloudParams::default()).unwrap();
//! assert_eq!(cloud.len(), 144);
//!
//! let result = reconstruct_mesh(&cloud, &PoissonParams::preview()).unwrap();
//! println!("{result}");
//! ```
//!
//! # Module Overview
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`depth`] | Brightness-to-depth heuristic |
//! | [`pointcloud`] | Point cloud construction and normal estimation |
//! | [`reconstruct`] | Poisson reconstruction and density pruning |

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_const_for_fn)] // Not all functions benefit from const
#![allow(clippy::many_single_char_names)] // Grid math reads best as x, y, z, h
#![allow(clippy::float_cmp)] // Exact zero checks on kernel weights

pub mod depth;
pub mod error;
pub mod pointcloud;
mod raster;
pub mod reconstruct;
mod spatial;

pub use depth::{DepthMap, DepthParams, estimate_depth};
pub use error::{ScanError, ScanResult};
pub use pointcloud::{CloudParams, CloudPoint, PointCloud, build_point_cloud, samples_along};
pub use raster::ScanImage;
pub use reconstruct::{
    MAX_OCTREE_DEPTH, PoissonParams, PruneReport, ReconstructionResult, density_quantile,
    prune_low_density, reconstruct_mesh,
};

#[cfg(test)]
mod tests {
    use super::*;

    fn banded_image(width: u32, height: u32) -> ScanImage {
        let mut pixels = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                let v = if (x / 8 + y / 8) % 2 == 0 { 220 } else { 40 };
                pixels.extend_from_slice(&[v, v / 2, 255 - v]);
            }
        }
        ScanImage::from_raw(width, height, 3, pixels).unwrap()
    }

    #[test]
    fn image_to_mesh_workflow() {
        let image = banded_image(64, 64);
        let depth = estimate_depth(&image, &DepthParams::default()).unwrap();
        let cloud = build_point_cloud(&image, &depth, &CloudParams::default()).unwrap();
        assert_eq!(cloud.len(), 256);

        let result = reconstruct_mesh(&cloud, &PoissonParams::preview()).unwrap();
        assert!(result.mesh.vertex_count() > 0);
        assert!(result.mesh.face_count() > 0);
        assert!(result.mesh.has_colors());
        assert!(result.mesh.has_normals());
        assert!(result.mesh.first_invalid_index().is_none());
    }

    #[test]
    fn single_pixel_cannot_be_reconstructed() {
        let image = banded_image(1, 1);
        let depth = estimate_depth(&image, &DepthParams::default()).unwrap();
        let cloud = build_point_cloud(&image, &depth, &CloudParams::default()).unwrap();
        let result = reconstruct_mesh(&cloud, &PoissonParams::default());
        assert!(matches!(result, Err(ScanError::InsufficientPoints { .. })));
    }
}
