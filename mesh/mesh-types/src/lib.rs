//! Core geometry types for the scan pipeline.
//!
//! This crate provides the shared vocabulary used by every stage that
//! touches 3D data:
//!
//! - [`VertexColor`] - 8-bit RGB colour sampled from a photograph
//! - [`Vertex`] - A position with optional normal and colour
//! - [`IndexedMesh`] - A triangle mesh with indexed vertices
//! - [`Aabb`] - Axis-aligned bounding box
//!
//! # Coordinate System
//!
//! Right-handed, y up. Image-space rows grow downward, so producers that
//! lift pixels into 3D negate the row coordinate before building a vertex.
//! Face winding is counter-clockwise when viewed from the side the vertex
//! normals point to.
//!
//! # Example
//!
//! ```
//! use mesh_types::{IndexedMesh, Point3, Vertex};
//!
//! let mut mesh = IndexedMesh::new();
//! mesh.vertices.push(Vertex::new(Point3::new(0.0, 0.0, 0.0)));
//! mesh.vertices.push(Vertex::new(Point3::new(1.0, 0.0, 0.0)));
//! mesh.vertices.push(Vertex::new(Point3::new(0.5, 1.0, 0.0)));
//! mesh.faces.push([0, 1, 2]);
//!
//! assert_eq!(mesh.face_count(), 1);
//! assert!(!mesh.is_empty());
//! ```

#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![warn(missing_docs)]

mod bounds;
mod mesh;
mod vertex;

pub use bounds::Aabb;
pub use mesh::IndexedMesh;
pub use vertex::{Vertex, VertexColor};

pub use nalgebra::{Point3, Vector3};
