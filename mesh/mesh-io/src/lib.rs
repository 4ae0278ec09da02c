//! Mesh file I/O for reconstructed scans.
//!
//! Reconstructed meshes are exchanged as PLY files, binary or ASCII, with
//! optional per-vertex normals and colours.
//!
//! # Example
//!
//! ```no_run
//! use mesh_io::{load_mesh, save_mesh};
//!
//! let mesh = load_mesh("20250101_120000_000001_mesh.ply").unwrap();
//! save_mesh(&mesh, "copy.ply").unwrap();
//! ```

#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![warn(missing_docs)]

mod error;
mod ply;

pub use error::{IoError, IoResult};
pub use ply::{PlyEncoding, load_ply, save_ply};

use std::path::Path;

use mesh_types::IndexedMesh;

/// Supported mesh file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeshFormat {
    /// PLY (Polygon File Format).
    Ply,
}

impl MeshFormat {
    /// Detect format from file extension (case-insensitive).
    ///
    /// Returns `None` if the extension is not recognized.
    #[must_use]
    pub fn from_path<P: AsRef<Path>>(path: P) -> Option<Self> {
        let ext = path.as_ref().extension()?.to_str()?.to_lowercase();
        Self::from_extension(&ext)
    }

    /// Detect format from a bare extension such as `"ply"` or `".PLY"`.
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_lowercase().as_str() {
            "ply" => Some(Self::Ply),
            _ => None,
        }
    }

    /// Canonical file extension, without the dot.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Ply => "ply",
        }
    }
}

/// Load a mesh, detecting the format from the file extension.
///
/// # Errors
///
/// Returns [`IoError::UnknownFormat`] for unrecognized extensions, or the
/// format loader's error.
pub fn load_mesh<P: AsRef<Path>>(path: P) -> IoResult<IndexedMesh> {
    let path = path.as_ref();
    match MeshFormat::from_path(path) {
        Some(MeshFormat::Ply) => load_ply(path),
        None => Err(unknown_format(path)),
    }
}

/// Save a mesh, detecting the format from the file extension.
///
/// PLY files are written in binary little-endian encoding.
///
/// # Errors
///
/// Returns [`IoError::UnknownFormat`] for unrecognized extensions, or the
/// format writer's error.
pub fn save_mesh<P: AsRef<Path>>(mesh: &IndexedMesh, path: P) -> IoResult<()> {
    let path = path.as_ref();
    match MeshFormat::from_path(path) {
        Some(MeshFormat::Ply) => save_ply(mesh, path, PlyEncoding::BinaryLittleEndian),
        None => Err(unknown_format(path)),
    }
}

fn unknown_format(path: &Path) -> IoError {
    IoError::UnknownFormat {
        extension: path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default(),
    }
}
