//! Regular node grids for the Poisson solve.

use mesh_types::Aabb;
use nalgebra::{Point3, Vector3};

/// A regular lattice of `dims[0] * dims[1] * dims[2]` nodes.
///
/// Node `(x, y, z)` sits at `origin + spacing * (x, y, z)` and is stored at
/// `x + nx * (y + ny * z)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Grid {
    pub origin: Point3<f64>,
    pub spacing: f64,
    pub dims: [usize; 3],
}

impl Grid {
    /// Grid around `bounds` with `2^depth` cells across 110% of the longest
    /// extent, padded by `margin` on every side.
    pub fn fit(bounds: &Aabb, depth: u32, margin: impl Fn(f64) -> f64) -> Self {
        let extent = bounds.max_extent();
        let spacing = 1.1 * extent / f64::from(1u32 << depth);
        let pad = margin(spacing);
        let center = bounds.center();
        let size = bounds.extent();

        let mut dims = [0usize; 3];
        let mut origin = center;
        for axis in 0..3 {
            let length = size[axis] + 2.0 * pad;
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let cells = (length / spacing).ceil().max(1.0) as usize;
            dims[axis] = cells + 1;
            #[allow(clippy::cast_precision_loss)]
            let half = cells as f64 * spacing / 2.0;
            origin[axis] = center[axis] - half;
        }

        Self {
            origin,
            spacing,
            dims,
        }
    }

    /// Same origin, `factor` times the spacing, covering at least this grid.
    pub fn coarsened(&self, factor: usize) -> Self {
        let factor = factor.max(1);
        let dims = self.dims.map(|n| (n - 1).div_ceil(factor) + 1);
        #[allow(clippy::cast_precision_loss)]
        let spacing = self.spacing * factor as f64;
        Self {
            origin: self.origin,
            spacing,
            dims,
        }
    }

    pub fn len(&self) -> usize {
        self.dims[0] * self.dims[1] * self.dims[2]
    }

    #[inline]
    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        x + self.dims[0] * (y + self.dims[1] * z)
    }

    #[inline]
    pub fn coords(&self, index: usize) -> [usize; 3] {
        let x = index % self.dims[0];
        let rest = index / self.dims[0];
        [x, rest % self.dims[1], rest / self.dims[1]]
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn position(&self, x: usize, y: usize, z: usize) -> Point3<f64> {
        self.origin + Vector3::new(x as f64, y as f64, z as f64) * self.spacing
    }

    /// Continuous lattice coordinates of a world point.
    pub fn local(&self, p: &Point3<f64>) -> Vector3<f64> {
        (p - self.origin) / self.spacing
    }

    /// Trilinear interpolation of node `values` at `p`, clamped to the grid.
    pub fn sample(&self, values: &[f64], p: &Point3<f64>) -> f64 {
        let u = self.local(p);
        let mut base = [0usize; 3];
        let mut frac = [0.0f64; 3];
        for axis in 0..3 {
            #[allow(clippy::cast_precision_loss)]
            let top = (self.dims[axis] - 1) as f64;
            let t = u[axis].clamp(0.0, top);
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let i = (t.floor() as usize).min(self.dims[axis].saturating_sub(2));
            base[axis] = i;
            #[allow(clippy::cast_precision_loss)]
            let f = t - i as f64;
            frac[axis] = f;
        }

        let mut acc = 0.0;
        for corner in 0..8 {
            let (dx, dy, dz) = (corner & 1, (corner >> 1) & 1, (corner >> 2) & 1);
            let w = weight(frac[0], dx) * weight(frac[1], dy) * weight(frac[2], dz);
            if w == 0.0 {
                continue;
            }
            let idx = self.index(
                (base[0] + dx).min(self.dims[0] - 1),
                (base[1] + dy).min(self.dims[1] - 1),
                (base[2] + dz).min(self.dims[2] - 1),
            );
            acc += w * values[idx];
        }
        acc
    }

    /// Trilinear transfer of `coarse` values (living on `coarse_grid`) onto
    /// this grid's nodes.
    pub fn prolong(&self, coarse_grid: &Self, coarse: &[f64]) -> Vec<f64> {
        (0..self.len())
            .map(|i| {
                let [x, y, z] = self.coords(i);
                coarse_grid.sample(coarse, &self.position(x, y, z))
            })
            .collect()
    }
}

#[inline]
fn weight(frac: f64, upper: usize) -> f64 {
    if upper == 1 { frac } else { 1.0 - frac }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_bounds() -> Aabb {
        Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 0.5, 0.0))
    }

    #[test]
    fn fit_covers_bounds_with_margin() {
        let grid = Grid::fit(&unit_bounds(), 4, |h| 2.0 * h);
        let h = 1.1 / 16.0;
        assert!((grid.spacing - h).abs() < 1e-12);

        let far = grid.position(grid.dims[0] - 1, grid.dims[1] - 1, grid.dims[2] - 1);
        for axis in 0..3 {
            assert!(grid.origin[axis] <= unit_bounds().min[axis] - 2.0 * h + 1e-9);
            assert!(far[axis] >= unit_bounds().max[axis] + 2.0 * h - 1e-9);
        }
        // A flat axis still gets nodes for its padding.
        assert!(grid.dims[2] >= 5);
    }

    #[test]
    fn index_and_coords_agree() {
        let grid = Grid::fit(&unit_bounds(), 3, |h| h);
        for i in [0, 7, grid.len() / 2, grid.len() - 1] {
            let [x, y, z] = grid.coords(i);
            assert_eq!(grid.index(x, y, z), i);
        }
    }

    #[test]
    fn sample_reproduces_linear_field() {
        let grid = Grid::fit(&unit_bounds(), 3, |h| h);
        let values: Vec<f64> = (0..grid.len())
            .map(|i| {
                let [x, y, z] = grid.coords(i);
                let p = grid.position(x, y, z);
                2.0 * p.x - p.y + 0.5 * p.z
            })
            .collect();

        let p = Point3::new(0.37, 0.21, 0.0);
        let expected = 2.0 * p.x - p.y;
        assert!((grid.sample(&values, &p) - expected).abs() < 1e-9);
    }

    #[test]
    fn coarsened_grid_covers_fine_grid() {
        let fine = Grid::fit(&unit_bounds(), 5, |h| 2.0 * h);
        let coarse = fine.coarsened(4);
        assert_eq!(coarse.origin, fine.origin);
        for axis in 0..3 {
            #[allow(clippy::cast_precision_loss)]
            let fine_len = (fine.dims[axis] - 1) as f64 * fine.spacing;
            #[allow(clippy::cast_precision_loss)]
            let coarse_len = (coarse.dims[axis] - 1) as f64 * coarse.spacing;
            assert!(coarse_len >= fine_len - 1e-12);
        }
    }

    #[test]
    fn prolong_keeps_linear_field() {
        let fine = Grid::fit(&unit_bounds(), 4, |h| 2.0 * h);
        let coarse = fine.coarsened(2);
        let field = |p: Point3<f64>| p.x + 3.0 * p.y;
        let coarse_values: Vec<f64> = (0..coarse.len())
            .map(|i| {
                let [x, y, z] = coarse.coords(i);
                field(coarse.position(x, y, z))
            })
            .collect();

        let fine_values = fine.prolong(&coarse, &coarse_values);
        for i in [0, fine.len() / 3, fine.len() - 1] {
            let [x, y, z] = fine.coords(i);
            assert!((fine_values[i] - field(fine.position(x, y, z))).abs() < 1e-9);
        }
    }
}
