//! Trilinear sampling of the grid at arbitrary real grid-space (or world-space) points.

use crate::error::{Error, Result};
use crate::grid::Grid;
use ndarray::Array2;
use rayon::prelude::*;

const CORNER_OFFSETS: [(usize, usize, usize); 8] = [
    (0, 0, 0),
    (0, 0, 1),
    (0, 1, 0),
    (0, 1, 1),
    (1, 0, 0),
    (1, 0, 1),
    (1, 1, 0),
    (1, 1, 1),
];

/// The (up to) eight lattice corners a sample point falls between, and the trilinear weight of
/// each. A `link < 0` or weight `0.0` entry contributes nothing and is skipped by
/// [`gather_payload`]/[`scatter_grad`]; nearest-neighbor rendering represents its single
/// contributing voxel as a degenerate one-corner cell via [`Cell::single`].
pub(crate) struct Cell {
    pub links: [i32; 8],
    pub weights: [f32; 8],
}

impl Cell {
    /// A cell with exactly one full-weight corner, used by nearest-neighbor rendering.
    pub fn single(link: i32) -> Self {
        Self {
            links: [link, -1, -1, -1, -1, -1, -1, -1],
            weights: [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        }
    }
}

/// Clamps a grid-space point to the padded border and returns the lower-integer corner (clamped
/// to `[0, R_i - 2]`) together with the fractional offset into that cell.
pub(crate) fn locate(grid: &Grid, p: [f32; 3]) -> ([usize; 3], [f32; 3]) {
    let res = grid.resolution();
    let mut low = [0usize; 3];
    let mut frac = [0.0f32; 3];
    for i in 0..3 {
        let max_coord = (res[i] as f32 - 1.0).max(0.0);
        let clamped = p[i].clamp(0.0, max_coord);
        let floor = clamped.floor();
        let max_low = res[i].saturating_sub(2);
        low[i] = (floor as usize).min(max_low);
        frac[i] = clamped - floor;
    }
    (low, frac)
}

/// Builds the trilinear [`Cell`] for the voxel cell whose lower corner is `low`, with fractional
/// offset `frac` into it. Weight order follows `(1-f, f)` in z, then y, then x.
pub(crate) fn trilinear_cell(grid: &Grid, low: [usize; 3], frac: [f32; 3]) -> Cell {
    let links_tensor = grid.links();
    let mut links = [-1i32; 8];
    let mut weights = [0.0f32; 8];
    for (k, &(dx, dy, dz)) in CORNER_OFFSETS.iter().enumerate() {
        let idx = [low[0] + dx, low[1] + dy, low[2] + dz];
        links[k] = links_tensor[idx];
        let wx = if dx == 0 { 1.0 - frac[0] } else { frac[0] };
        let wy = if dy == 0 { 1.0 - frac[1] } else { frac[1] };
        let wz = if dz == 0 { 1.0 - frac[2] } else { frac[2] };
        weights[k] = wx * wy * wz;
    }
    Cell { links, weights }
}

/// Gathers the weighted sum of the payload rows of a [`Cell`]'s contributing corners. Corners
/// with `link < 0` are treated as the all-zeros row, per the empty-voxel policy shared by the
/// sampler and the renderer.
pub(crate) fn gather_payload(grid: &Grid, cell: &Cell, channels: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; channels];
    let payload = grid.payload();
    for k in 0..8 {
        let link = cell.links[k];
        let w = cell.weights[k];
        if link < 0 || w == 0.0 {
            continue;
        }
        let row = payload.row(link as usize);
        for (o, &v) in out.iter_mut().zip(row.iter()) {
            *o += w * v;
        }
    }
    out
}

/// Scatters `value` into channel `channel` of every contributing corner's gradient row, weighted
/// by the corner's trilinear weight. Corners with `link < 0` are gradient sinks.
pub(crate) fn scatter_grad(grad: &mut Array2<f32>, cell: &Cell, channel: usize, value: f32) {
    for k in 0..8 {
        let link = cell.links[k];
        let w = cell.weights[k];
        if link < 0 || w == 0.0 {
            continue;
        }
        grad[[link as usize, channel]] += w * value;
    }
}

fn validate_points(grid: &Grid, points: &Array2<f32>) -> Result<()> {
    if points.ncols() != 3 {
        return Err(Error::ShapeMismatch(format!(
            "points must have shape (M, 3), found (M, {})",
            points.ncols()
        )));
    }
    if points.iter().any(|v| !v.is_finite()) {
        return Err(Error::NumericFailure("sample points must be finite".to_string()));
    }
    let _ = grid;
    Ok(())
}

/// Samples the grid at `points` (`(M, 3)`), returning `(M, channels)`.
///
/// If `grid_coords` is `false`, `points` are first transformed from world space. Points are then
/// clamped to the padded border `[0, R_i - 1]` before trilinear interpolation (align_corners
/// convention: sample positions sit at integer grid indices, cell width 1).
///
/// # Errors
///
/// Returns [`Error::ShapeMismatch`] if `points` is not `(M, 3)`, or [`Error::NumericFailure`] if
/// any coordinate is non-finite.
pub fn sample(grid: &Grid, points: &Array2<f32>, grid_coords: bool) -> Result<Array2<f32>> {
    validate_points(grid, points)?;

    let channels = grid.channels();
    let m = points.nrows();
    let rows: Vec<Vec<f32>> = (0..m)
        .into_par_iter()
        .map(|i| {
            let world = [points[[i, 0]], points[[i, 1]], points[[i, 2]]];
            let p = if grid_coords {
                world
            } else {
                grid.world_to_grid(world)
            };
            let (low, frac) = locate(grid, p);
            let cell = trilinear_cell(grid, low, frac);
            gather_payload(grid, &cell, channels)
        })
        .collect();

    let mut out = Array2::<f32>::zeros((m, channels));
    for (i, row) in rows.into_iter().enumerate() {
        out.row_mut(i).as_slice_mut().unwrap().copy_from_slice(&row);
    }
    Ok(out)
}

/// Computes the gradient of the payload with respect to an upstream gradient `grad_out` of the
/// same shape as `sample(grid, points, grid_coords)`'s output.
///
/// Each corner with `link >= 0` receives `weight * grad_out` for every channel; corners with
/// `link < 0` are gradient sinks, matching [`sample`]'s forward policy exactly. Accumulation
/// across points is associative (per-point contributions are summed via a parallel
/// fold/reduce), so the result is invariant to point order up to floating-point rounding.
///
/// # Errors
///
/// Returns the same errors as [`sample`], plus [`Error::ShapeMismatch`] if `grad_out`'s shape
/// does not match `(points.nrows(), grid.channels())`.
pub fn sample_backward(
    grid: &Grid,
    points: &Array2<f32>,
    grid_coords: bool,
    grad_out: &Array2<f32>,
) -> Result<Array2<f32>> {
    validate_points(grid, points)?;
    let channels = grid.channels();
    if grad_out.nrows() != points.nrows() || grad_out.ncols() != channels {
        return Err(Error::ShapeMismatch(format!(
            "grad_out must have shape ({}, {channels}), found ({}, {})",
            points.nrows(),
            grad_out.nrows(),
            grad_out.ncols()
        )));
    }

    let m = points.nrows();
    let n_occ = grid.n_occupied();
    let grad = (0..m)
        .into_par_iter()
        .fold(
            || Array2::<f32>::zeros((n_occ, channels)),
            |mut acc, i| {
                let world = [points[[i, 0]], points[[i, 1]], points[[i, 2]]];
                let p = if grid_coords {
                    world
                } else {
                    grid.world_to_grid(world)
                };
                let (low, frac) = locate(grid, p);
                let cell = trilinear_cell(grid, low, frac);
                for c in 0..channels {
                    scatter_grad(&mut acc, &cell, c, grad_out[[i, c]]);
                }
                acc
            },
        )
        .reduce(|| Array2::<f32>::zeros((n_occ, channels)), |a, b| a + b);

    Ok(grad)
}
