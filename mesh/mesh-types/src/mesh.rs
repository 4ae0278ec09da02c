//! Indexed triangle mesh.

use nalgebra::Vector3;

use crate::{Aabb, Vertex};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// An indexed triangle mesh.
///
/// Vertices and faces are stored separately, with faces referencing
/// vertices by index. Every index in `faces` is expected to be smaller
/// than `vertices.len()`; [`IndexedMesh::first_invalid_index`] checks this.
///
/// # Example
///
/// ```
/// use mesh_types::{IndexedMesh, Vertex};
///
/// let vertices = vec![
///     Vertex::from_coords(0.0, 0.0, 0.0),
///     Vertex::from_coords(1.0, 0.0, 0.0),
///     Vertex::from_coords(0.0, 1.0, 0.0),
/// ];
/// let mesh = IndexedMesh::from_parts(vertices, vec![[0, 1, 2]]);
///
/// assert_eq!(mesh.vertex_count(), 3);
/// assert_eq!(mesh.face_count(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IndexedMesh {
    /// Vertex data.
    pub vertices: Vec<Vertex>,

    /// Triangle faces as indices into the vertex array.
    pub faces: Vec<[u32; 3]>,
}

impl IndexedMesh {
    /// Create a new empty mesh.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            vertices: Vec::new(),
            faces: Vec::new(),
        }
    }

    /// Create a mesh with pre-allocated capacity.
    #[inline]
    #[must_use]
    pub fn with_capacity(vertex_count: usize, face_count: usize) -> Self {
        Self {
            vertices: Vec::with_capacity(vertex_count),
            faces: Vec::with_capacity(face_count),
        }
    }

    /// Create a mesh from vertices and faces.
    #[inline]
    #[must_use]
    pub const fn from_parts(vertices: Vec<Vertex>, faces: Vec<[u32; 3]>) -> Self {
        Self { vertices, faces }
    }

    /// Number of vertices.
    #[inline]
    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Number of triangles.
    #[inline]
    #[must_use]
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Returns true if the mesh has no vertices.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Returns true if every vertex carries a normal.
    #[must_use]
    pub fn has_normals(&self) -> bool {
        !self.vertices.is_empty() && self.vertices.iter().all(|v| v.normal.is_some())
    }

    /// Returns true if every vertex carries a colour.
    #[must_use]
    pub fn has_colors(&self) -> bool {
        !self.vertices.is_empty() && self.vertices.iter().all(|v| v.color.is_some())
    }

    /// Bounding box of all vertex positions.
    #[must_use]
    pub fn bounds(&self) -> Aabb {
        Aabb::from_points(self.vertices.iter().map(|v| &v.position))
    }

    /// Returns the first face index that does not reference a vertex.
    #[must_use]
    pub fn first_invalid_index(&self) -> Option<u32> {
        let count = self.vertices.len();
        self.faces
            .iter()
            .flatten()
            .copied()
            .find(|&i| i as usize >= count)
    }

    /// Removes every vertex whose `keep` flag is false.
    ///
    /// Faces that reference a removed vertex are dropped as well, and the
    /// surviving faces are re-indexed, so no dangling index is left behind.
    /// Vertices beyond the end of `keep` are kept.
    ///
    /// Returns the number of removed vertices.
    ///
    /// # Example
    ///
    /// ```
    /// use mesh_types::{IndexedMesh, Vertex};
    ///
    /// let mut mesh = IndexedMesh::from_parts(
    ///     vec![
    ///         Vertex::from_coords(0.0, 0.0, 0.0),
    ///         Vertex::from_coords(1.0, 0.0, 0.0),
    ///         Vertex::from_coords(0.0, 1.0, 0.0),
    ///         Vertex::from_coords(1.0, 1.0, 0.0),
    ///     ],
    ///     vec![[0, 1, 2], [1, 3, 2]],
    /// );
    ///
    /// let removed = mesh.retain_vertices(&[true, true, true, false]);
    /// assert_eq!(removed, 1);
    /// assert_eq!(mesh.faces, vec![[0, 1, 2]]);
    /// ```
    pub fn retain_vertices(&mut self, keep: &[bool]) -> usize {
        let keeps = |i: usize| keep.get(i).copied().unwrap_or(true);

        let mut remap: Vec<Option<u32>> = Vec::with_capacity(self.vertices.len());
        let mut next = 0u32;
        for i in 0..self.vertices.len() {
            if keeps(i) {
                remap.push(Some(next));
                next += 1;
            } else {
                remap.push(None);
            }
        }

        let before = self.vertices.len();
        let mut index = 0;
        self.vertices.retain(|_| {
            let kept = keeps(index);
            index += 1;
            kept
        });

        self.faces = self
            .faces
            .iter()
            .filter_map(|face| {
                let a = remap.get(face[0] as usize).copied().flatten()?;
                let b = remap.get(face[1] as usize).copied().flatten()?;
                let c = remap.get(face[2] as usize).copied().flatten()?;
                Some([a, b, c])
            })
            .collect();

        before - self.vertices.len()
    }

    /// Removes vertices that no face references.
    ///
    /// Returns the number of removed vertices.
    pub fn remove_unreferenced_vertices(&mut self) -> usize {
        let mut used = vec![false; self.vertices.len()];
        for &i in self.faces.iter().flatten() {
            if let Some(flag) = used.get_mut(i as usize) {
                *flag = true;
            }
        }
        self.retain_vertices(&used)
    }

    /// Recomputes per-vertex normals as the area-weighted mean of the
    /// adjacent face normals.
    ///
    /// Vertices without a non-degenerate adjacent face keep their previous
    /// normal.
    pub fn compute_vertex_normals(&mut self) {
        let mut sums = vec![Vector3::zeros(); self.vertices.len()];

        for face in &self.faces {
            let [a, b, c] = face.map(|i| i as usize);
            let (Some(pa), Some(pb), Some(pc)) = (
                self.vertices.get(a),
                self.vertices.get(b),
                self.vertices.get(c),
            ) else {
                continue;
            };
            // Cross product length is twice the triangle area.
            let n = (pb.position - pa.position).cross(&(pc.position - pa.position));
            sums[a] += n;
            sums[b] += n;
            sums[c] += n;
        }

        for (vertex, sum) in self.vertices.iter_mut().zip(sums) {
            if let Some(unit) = sum.try_normalize(f64::EPSILON) {
                vertex.normal = Some(unit);
            }
        }
    }
}
