//! Iso-surface extraction by marching tetrahedra.
//!
//! Every grid cell is split into six tetrahedra sharing the main diagonal
//! (corner 0 to corner 6), which makes neighbouring cells agree on their
//! shared faces and avoids the ambiguous cases of marching cubes. Vertices
//! are created on grid edges and shared between all triangles that cross
//! the same edge.

use hashbrown::HashMap;
use nalgebra::{Point3, Vector3};

use super::grid::Grid;
use crate::error::{ScanError, ScanResult};

/// Cell corner offsets.
const CORNERS: [[usize; 3]; 8] = [
    [0, 0, 0],
    [1, 0, 0],
    [1, 1, 0],
    [0, 1, 0],
    [0, 0, 1],
    [1, 0, 1],
    [1, 1, 1],
    [0, 1, 1],
];

/// Six tetrahedra around the 0-6 diagonal.
const TETRAHEDRA: [[usize; 4]; 6] = [
    [0, 5, 1, 6],
    [0, 1, 2, 6],
    [0, 2, 3, 6],
    [0, 3, 7, 6],
    [0, 7, 4, 6],
    [0, 4, 5, 6],
];

/// Triangle soup with shared vertices.
#[derive(Debug, Default)]
pub(crate) struct Surface {
    pub positions: Vec<Point3<f64>>,
    pub faces: Vec<[u32; 3]>,
}

impl Surface {
    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }
}

/// Extracts the surface where `values` crosses `iso`.
///
/// Nodes with `value >= iso` count as inside. Triangles are wound so their
/// normal points from the outside toward the inside.
pub(crate) fn extract(grid: &Grid, values: &[f64], iso: f64) -> ScanResult<Surface> {
    let mut marcher = Marcher {
        grid,
        values,
        iso,
        edges: HashMap::new(),
        surface: Surface::default(),
    };

    let [nx, ny, nz] = grid.dims;
    for z in 0..nz.saturating_sub(1) {
        for y in 0..ny.saturating_sub(1) {
            for x in 0..nx.saturating_sub(1) {
                let nodes = CORNERS.map(|[dx, dy, dz]| grid.index(x + dx, y + dy, z + dz));
                let inside = nodes.iter().filter(|&&n| marcher.is_inside(n)).count();
                if inside == 0 || inside == 8 {
                    continue;
                }
                for tet in TETRAHEDRA {
                    marcher.tetrahedron(tet.map(|c| nodes[c]))?;
                }
            }
        }
    }

    Ok(marcher.surface)
}

struct Marcher<'a> {
    grid: &'a Grid,
    values: &'a [f64],
    iso: f64,
    edges: HashMap<(usize, usize), u32>,
    surface: Surface,
}

impl Marcher<'_> {
    #[inline]
    fn is_inside(&self, node: usize) -> bool {
        self.values[node] >= self.iso
    }

    fn node_position(&self, node: usize) -> Point3<f64> {
        let [x, y, z] = self.grid.coords(node);
        self.grid.position(x, y, z)
    }

    fn tetrahedron(&mut self, nodes: [usize; 4]) -> ScanResult<()> {
        let mut inside = [0usize; 4];
        let mut outside = [0usize; 4];
        let (mut ni, mut no) = (0, 0);
        for &node in &nodes {
            if self.is_inside(node) {
                inside[ni] = node;
                ni += 1;
            } else {
                outside[no] = node;
                no += 1;
            }
        }

        let toward_inside = self.centroid(&inside[..ni]) - self.centroid(&outside[..no]);

        match ni {
            1 => {
                let a = self.edge_vertex(inside[0], outside[0])?;
                let b = self.edge_vertex(inside[0], outside[1])?;
                let c = self.edge_vertex(inside[0], outside[2])?;
                self.emit([a, b, c], &toward_inside);
            }
            3 => {
                let a = self.edge_vertex(outside[0], inside[0])?;
                let b = self.edge_vertex(outside[0], inside[1])?;
                let c = self.edge_vertex(outside[0], inside[2])?;
                self.emit([a, b, c], &toward_inside);
            }
            2 => {
                // Quad around the tetrahedron, in cyclic order.
                let a = self.edge_vertex(inside[0], outside[0])?;
                let b = self.edge_vertex(inside[0], outside[1])?;
                let c = self.edge_vertex(inside[1], outside[1])?;
                let d = self.edge_vertex(inside[1], outside[0])?;
                self.emit([a, b, c], &toward_inside);
                self.emit([a, c, d], &toward_inside);
            }
            _ => {}
        }
        Ok(())
    }

    fn centroid(&self, nodes: &[usize]) -> Point3<f64> {
        let sum: Vector3<f64> = nodes.iter().map(|&n| self.node_position(n).coords).sum();
        #[allow(clippy::cast_precision_loss)]
        let count = nodes.len().max(1) as f64;
        Point3::from(sum / count)
    }

    fn edge_vertex(&mut self, a: usize, b: usize) -> ScanResult<u32> {
        let key = (a.min(b), a.max(b));
        if let Some(&id) = self.edges.get(&key) {
            return Ok(id);
        }

        let fa = self.values[key.0] - self.iso;
        let fb = self.values[key.1] - self.iso;
        let denom = fa - fb;
        let t = if denom.abs() > f64::MIN_POSITIVE {
            (fa / denom).clamp(0.0, 1.0)
        } else {
            0.5
        };
        let pa = self.node_position(key.0);
        let pb = self.node_position(key.1);

        let id = u32::try_from(self.surface.positions.len())
            .map_err(|_| ScanError::reconstruction("surface has too many vertices"))?;
        self.surface.positions.push(pa + (pb - pa) * t);
        self.edges.insert(key, id);
        Ok(id)
    }

    fn emit(&mut self, [a, b, c]: [u32; 3], toward_inside: &Vector3<f64>) {
        if a == b || b == c || a == c {
            return;
        }
        let positions = &self.surface.positions;
        let (pa, pb, pc) = (
            positions[a as usize],
            positions[b as usize],
            positions[c as usize],
        );
        let normal = (pb - pa).cross(&(pc - pa));
        let h2 = self.grid.spacing * self.grid.spacing;
        if normal.norm() <= 1e-12 * h2 {
            return;
        }
        if normal.dot(toward_inside) < 0.0 {
            self.surface.faces.push([a, c, b]);
        } else {
            self.surface.faces.push([a, b, c]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_types::Aabb;

    fn cube_grid(depth: u32) -> Grid {
        let bounds = Aabb::new(Point3::new(-1.0, -1.0, -1.0), Point3::new(1.0, 1.0, 1.0));
        Grid::fit(&bounds, depth, |h| 2.0 * h)
    }

    fn field(grid: &Grid, f: impl Fn(Point3<f64>) -> f64) -> Vec<f64> {
        (0..grid.len())
            .map(|i| {
                let [x, y, z] = grid.coords(i);
                f(grid.position(x, y, z))
            })
            .collect()
    }

    #[test]
    fn plane_surface_lies_on_plane() {
        let grid = cube_grid(4);
        // Inside is z <= 0.3.
        let values = field(&grid, |p| 0.3 - p.z);
        let surface = extract(&grid, &values, 0.0).unwrap();

        assert!(!surface.is_empty());
        for p in &surface.positions {
            assert!((p.z - 0.3).abs() < 1e-9, "vertex {p:?}");
        }
        // Triangles face the inside, which is -z.
        for [a, b, c] in &surface.faces {
            let (pa, pb, pc) = (
                surface.positions[*a as usize],
                surface.positions[*b as usize],
                surface.positions[*c as usize],
            );
            assert!((pb - pa).cross(&(pc - pa)).z < 0.0);
        }
    }

    #[test]
    fn sphere_surface_is_closed_and_shared() {
        let grid = cube_grid(4);
        let values = field(&grid, |p| 0.6 - p.coords.norm());
        let surface = extract(&grid, &values, 0.0).unwrap();

        for p in &surface.positions {
            assert!((p.coords.norm() - 0.6).abs() < grid.spacing);
        }

        // Every edge of a closed surface is shared by exactly two faces.
        let mut edges: HashMap<(u32, u32), usize> = HashMap::new();
        for face in &surface.faces {
            for k in 0..3 {
                let (a, b) = (face[k], face[(k + 1) % 3]);
                *edges.entry((a.min(b), a.max(b))).or_default() += 1;
            }
        }
        assert!(edges.values().all(|&count| count == 2));
    }

    #[test]
    fn constant_field_has_no_surface() {
        let grid = cube_grid(3);
        let values = vec![1.0; grid.len()];
        assert!(extract(&grid, &values, 0.0).unwrap().is_empty());
    }
}
