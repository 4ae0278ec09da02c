//! Mesh statistics reported to clients.

use std::fmt;

use mesh_types::IndexedMesh;
use serde::{Deserialize, Serialize};

/// Size and extent of a mesh.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeshSummary {
    /// Number of vertices.
    pub vertex_count: usize,
    /// Number of triangles.
    pub face_count: usize,
    /// Bounding-box size along x, y and z; zero for an empty mesh.
    pub extents: [f64; 3],
}

impl MeshSummary {
    /// Summarises a mesh.
    #[must_use]
    pub fn of(mesh: &IndexedMesh) -> Self {
        let bounds = mesh.bounds();
        let extents = if bounds.is_empty() {
            [0.0; 3]
        } else {
            let e = bounds.extent();
            [e.x, e.y, e.z]
        };
        Self {
            vertex_count: mesh.vertex_count(),
            face_count: mesh.face_count(),
            extents,
        }
    }
}

impl fmt::Display for MeshSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [x, y, z] = self.extents;
        write!(
            f,
            "{} vertices, {} faces, extents {x:.4} x {y:.4} x {z:.4}",
            self.vertex_count, self.face_count
        )
    }
}
