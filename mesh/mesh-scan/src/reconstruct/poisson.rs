//! Poisson solve on a regular grid.
//!
//! Oriented samples are splatted into a vector field `V` with a tent kernel.
//! The indicator `chi` satisfies `laplace(chi) = div(V)`; with Neumann
//! boundaries this is the symmetric positive semi-definite system
//! `A chi = -div(V)` where `(A x)_c = sum over in-grid neighbours n of
//! (x_c - x_n) / h^2`. It is solved by conjugate gradients, first on a
//! coarse grid and then on successively finer ones, each level starting
//! from the prolonged solution of the previous one.

use std::time::Instant;

use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use tracing::{debug, trace};

use super::grid::Grid;
use crate::error::{ScanError, ScanResult};

/// An oriented sample as seen by the solver.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Sample {
    pub position: Point3<f64>,
    pub normal: Vector3<f64>,
}

/// Conjugate-gradient limits shared by every level.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SolverLimits {
    pub max_iterations: usize,
    pub tolerance: f64,
    pub deadline: Option<Instant>,
}

/// The solved indicator on the finest grid.
#[derive(Debug)]
pub(crate) struct Indicator {
    pub values: Vec<f64>,
    pub iterations: usize,
}

/// Accumulates normalised tent weights of every sample on `grid`.
///
/// `visit(node, weight, sample)` is called for each node a sample touches;
/// the weights of one sample sum to one.
fn splat<F>(grid: &Grid, samples: &[Sample], radius: f64, mut visit: F)
where
    F: FnMut(usize, f64, &Sample),
{
    let mut touched: Vec<(usize, f64)> = Vec::new();

    for sample in samples {
        let u = grid.local(&sample.position);
        let reach = radius / grid.spacing;

        let mut lo = [0usize; 3];
        let mut hi = [0usize; 3];
        let mut inside = true;
        for axis in 0..3 {
            #[allow(clippy::cast_precision_loss)]
            let top = (grid.dims[axis] - 1) as f64;
            let a = (u[axis] - reach).ceil().max(0.0);
            let b = (u[axis] + reach).floor().min(top);
            if a > b {
                inside = false;
                break;
            }
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                lo[axis] = a as usize;
                hi[axis] = b as usize;
            }
        }
        if !inside {
            continue;
        }

        touched.clear();
        let mut total = 0.0;
        for z in lo[2]..=hi[2] {
            #[allow(clippy::cast_precision_loss)]
            let wz = tent((z as f64 - u[2]) / reach);
            if wz == 0.0 {
                continue;
            }
            for y in lo[1]..=hi[1] {
                #[allow(clippy::cast_precision_loss)]
                let wy = tent((y as f64 - u[1]) / reach);
                if wy == 0.0 {
                    continue;
                }
                for x in lo[0]..=hi[0] {
                    #[allow(clippy::cast_precision_loss)]
                    let w = wz * wy * tent((x as f64 - u[0]) / reach);
                    if w > 0.0 {
                        touched.push((grid.index(x, y, z), w));
                        total += w;
                    }
                }
            }
        }

        if total <= 0.0 {
            continue;
        }
        for &(node, w) in &touched {
            visit(node, w / total, sample);
        }
    }
}

#[inline]
fn tent(t: f64) -> f64 {
    (1.0 - t.abs()).max(0.0)
}

/// Right-hand side `-div(V)`, shifted to zero mean so the Neumann system
/// is consistent.
fn right_hand_side(grid: &Grid, samples: &[Sample], radius: f64) -> Vec<f64> {
    let volume = grid.spacing.powi(3);
    let mut field = vec![Vector3::zeros(); grid.len()];
    splat(grid, samples, radius, |node, w, s| {
        field[node] += s.normal * (w / volume);
    });

    let [nx, ny, nz] = grid.dims;
    let inv = 1.0 / (2.0 * grid.spacing);
    let component = |x: isize, y: isize, z: isize, axis: usize| -> f64 {
        if x < 0 || y < 0 || z < 0 {
            return 0.0;
        }
        #[allow(clippy::cast_sign_loss)]
        let (x, y, z) = (x as usize, y as usize, z as usize);
        if x >= nx || y >= ny || z >= nz {
            return 0.0;
        }
        field[grid.index(x, y, z)][axis]
    };

    let mut rhs: Vec<f64> = (0..grid.len())
        .into_par_iter()
        .map(|i| {
            let [x, y, z] = grid.coords(i);
            #[allow(clippy::cast_possible_wrap)]
            let (x, y, z) = (x as isize, y as isize, z as isize);
            let div = (component(x + 1, y, z, 0) - component(x - 1, y, z, 0)
                + component(x, y + 1, z, 1)
                - component(x, y - 1, z, 1)
                + component(x, y, z + 1, 2)
                - component(x, y, z - 1, 2))
                * inv;
            -div
        })
        .collect();

    #[allow(clippy::cast_precision_loss)]
    let mean = rhs.par_iter().sum::<f64>() / rhs.len() as f64;
    rhs.par_iter_mut().for_each(|b| *b -= mean);
    rhs
}

/// Applies the Neumann Laplacian `A` to `x`.
fn apply_laplacian(grid: &Grid, x: &[f64], out: &mut [f64]) {
    let [nx, ny, nz] = grid.dims;
    let inv_h2 = 1.0 / (grid.spacing * grid.spacing);
    let stride_y = nx;
    let stride_z = nx * ny;

    out.par_iter_mut().enumerate().for_each(|(i, out)| {
        let [cx, cy, cz] = grid.coords(i);
        let center = x[i];
        let mut acc = 0.0;
        if cx > 0 {
            acc += center - x[i - 1];
        }
        if cx + 1 < nx {
            acc += center - x[i + 1];
        }
        if cy > 0 {
            acc += center - x[i - stride_y];
        }
        if cy + 1 < ny {
            acc += center - x[i + stride_y];
        }
        if cz > 0 {
            acc += center - x[i - stride_z];
        }
        if cz + 1 < nz {
            acc += center - x[i + stride_z];
        }
        *out = acc * inv_h2;
    });
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.par_iter().zip(b.par_iter()).map(|(x, y)| x * y).sum()
}

fn check_deadline(limits: &SolverLimits, iterations: usize) -> ScanResult<()> {
    match limits.deadline {
        Some(deadline) if Instant::now() >= deadline => Err(ScanError::TimedOut { iterations }),
        _ => Ok(()),
    }
}

/// Conjugate gradients on `A x = b` starting from `x`.
///
/// Returns the iterations performed. `done` counts iterations spent on
/// earlier levels so a timeout reports the total.
fn conjugate_gradient(
    grid: &Grid,
    b: &[f64],
    x: &mut [f64],
    limits: &SolverLimits,
    done: usize,
) -> ScanResult<usize> {
    let n = b.len();
    let b_norm = dot(b, b).sqrt();
    if b_norm == 0.0 {
        x.par_iter_mut().for_each(|v| *v = 0.0);
        return Ok(0);
    }
    let target = limits.tolerance * b_norm;

    let mut ap = vec![0.0; n];
    apply_laplacian(grid, x, &mut ap);
    let mut r: Vec<f64> = b.par_iter().zip(ap.par_iter()).map(|(b, a)| b - a).collect();
    let mut p = r.clone();
    let mut rs = dot(&r, &r);

    let mut iterations = 0;
    while iterations < limits.max_iterations {
        if rs.sqrt() <= target {
            break;
        }
        check_deadline(limits, done + iterations)?;

        apply_laplacian(grid, &p, &mut ap);
        let curvature = dot(&p, &ap);
        if curvature <= 0.0 || !curvature.is_finite() {
            break;
        }
        let alpha = rs / curvature;

        x.par_iter_mut()
            .zip(p.par_iter())
            .for_each(|(x, p)| *x += alpha * p);
        r.par_iter_mut()
            .zip(ap.par_iter())
            .for_each(|(r, a)| *r -= alpha * a);

        let rs_next = dot(&r, &r);
        let beta = rs_next / rs;
        p.par_iter_mut()
            .zip(r.par_iter())
            .for_each(|(p, r)| *p = r + beta * *p);
        rs = rs_next;
        iterations += 1;
    }

    trace!(
        nodes = n,
        iterations,
        residual = rs.sqrt() / b_norm,
        "conjugate gradient finished"
    );
    Ok(iterations)
}

/// Solves for the indicator on `fine`, cascading up from `levels - 1`
/// halvings of its resolution.
///
/// `radius` is the splat radius on the finest grid; coarser levels widen it
/// to at least two of their cells.
pub(crate) fn solve_indicator(
    fine: &Grid,
    samples: &[Sample],
    radius: f64,
    levels: u32,
    limits: &SolverLimits,
) -> ScanResult<Indicator> {
    let levels = levels.max(1);
    let mut previous: Option<(Grid, Vec<f64>)> = None;
    let mut iterations = 0;

    for level in (0..levels).rev() {
        check_deadline(limits, iterations)?;

        let grid = fine.coarsened(1usize << level);
        let level_radius = radius.max(2.0 * grid.spacing);
        let rhs = right_hand_side(&grid, samples, level_radius);

        let mut x = match previous.take() {
            Some((coarse, values)) => grid.prolong(&coarse, &values),
            None => vec![0.0; grid.len()],
        };
        let spent = conjugate_gradient(&grid, &rhs, &mut x, limits, iterations)?;
        iterations += spent;

        debug!(
            level,
            nodes = grid.len(),
            iterations = spent,
            "solved poisson level"
        );
        previous = Some((grid, x));
    }

    let values = previous.map(|(_, x)| x).unwrap_or_default();
    Ok(Indicator { values, iterations })
}
