//! Per-ray AABB intersection, voxel traversal and volumetric integration: the forward renderer.
//!
//! Two traversal modes share the same per-ray setup and accumulation rules (§4.3): nearest
//! neighbor, which integrates the sub-voxel opacity exactly, and fixed-step trilinear
//! interpolation.

use crate::error::{Error, Result};
use crate::grid::Grid;
use crate::sampler::{self, Cell};
use arrayvec::ArrayVec;
use ndarray::Array2;
use rayon::prelude::*;

/// Configuration for a single render/`render_backward` call. Passed by value to every call
/// rather than stored on the grid, so concurrent renders with different options are safe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderOptions {
    /// If `true`, use fixed-step trilinear interpolation; if `false`, use the exact
    /// nearest-neighbor sub-voxel integral.
    pub linear_interp: bool,
    /// Background color added as `exp(log_T) * background_brightness` after traversal,
    /// broadcast across all three channels. Must lie in `[0, 1]`.
    pub background_brightness: f32,
    /// Inflation added to the nearest-neighbor sub-voxel exit step, guarding against traversal
    /// stalls at cell boundaries. Must be non-negative.
    pub step_epsilon: f32,
    /// Constant step size used only in trilinear (`linear_interp = true`) mode. Must be
    /// strictly positive.
    pub step_size: f32,
    /// Voxels with rectified opacity below this are skipped (but `t` still advances). Must be
    /// non-negative.
    pub sigma_thresh: f32,
    /// Forward-only early termination threshold on remaining light `exp(log_T)`. Must be
    /// non-negative.
    pub stop_thresh: f32,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            linear_interp: true,
            background_brightness: 1.0,
            step_epsilon: 1e-3,
            step_size: 0.5,
            sigma_thresh: 1e-10,
            stop_thresh: 1e-7,
        }
    }
}

pub(crate) fn validate_options(opt: RenderOptions) -> Result<()> {
    if !(0.0..=1.0).contains(&opt.background_brightness) {
        return Err(Error::InvalidParameter(format!(
            "background_brightness must lie in [0, 1], found {}",
            opt.background_brightness
        )));
    }
    if opt.linear_interp && opt.step_size <= 0.0 {
        return Err(Error::InvalidParameter(format!(
            "step_size must be strictly positive in linear_interp mode, found {}",
            opt.step_size
        )));
    }
    if opt.step_epsilon < 0.0 {
        return Err(Error::InvalidParameter("step_epsilon must be non-negative".to_string()));
    }
    if opt.sigma_thresh < 0.0 {
        return Err(Error::InvalidParameter("sigma_thresh must be non-negative".to_string()));
    }
    if opt.stop_thresh < 0.0 {
        return Err(Error::InvalidParameter("stop_thresh must be non-negative".to_string()));
    }
    Ok(())
}

pub(crate) fn validate_rays(origins: &Array2<f32>, dirs: &Array2<f32>) -> Result<()> {
    if origins.ncols() != 3 || dirs.ncols() != 3 {
        return Err(Error::ShapeMismatch(format!(
            "ray origins and directions must have shape (N, 3), found ({}, {}) and ({}, {})",
            origins.nrows(),
            origins.ncols(),
            dirs.nrows(),
            dirs.ncols()
        )));
    }
    if origins.nrows() != dirs.nrows() {
        return Err(Error::ShapeMismatch(format!(
            "ray origins and directions must agree on row count, found {} and {}",
            origins.nrows(),
            dirs.nrows()
        )));
    }
    for (o, d) in origins.outer_iter().zip(dirs.outer_iter()) {
        if o.iter().chain(d.iter()).any(|v| !v.is_finite()) {
            return Err(Error::NumericFailure(
                "ray origins and directions must be finite".to_string(),
            ));
        }
        let len2: f32 = d.iter().map(|v| v * v).sum();
        if len2 == 0.0 {
            return Err(Error::NumericFailure(
                "ray directions must not be zero-length".to_string(),
            ));
        }
    }
    Ok(())
}

pub(crate) fn row3(arr: &Array2<f32>, i: usize) -> [f32; 3] {
    [arr[[i, 0]], arr[[i, 1]], arr[[i, 2]]]
}

pub(crate) struct RaySetup {
    pub o: [f32; 3],
    pub d: [f32; 3],
    pub delta_scale: f32,
    pub inv: [f32; 3],
    pub t_enter: f32,
    pub t_exit: f32,
    pub sh: ArrayVec<f32, 16>,
}

pub(crate) fn setup_ray(grid: &Grid, origin: [f32; 3], dir: [f32; 3]) -> RaySetup {
    let o = grid.world_to_grid(origin);

    let len = (dir[0] * dir[0] + dir[1] * dir[1] + dir[2] * dir[2]).sqrt();
    let v = [dir[0] / len, dir[1] / len, dir[2] / len];

    let (_, scale) = grid.offset_scale();
    let mut d = [v[0] * scale[0], v[1] * scale[1], v[2] * scale[2]];
    let dlen = (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt();
    let delta_scale = 1.0 / dlen;
    for c in &mut d {
        *c *= delta_scale;
    }

    let mut inv = [0.0; 3];
    for i in 0..3 {
        inv[i] = if d[i] == 0.0 { 1e9 } else { 1.0 / d[i] };
    }

    let res = grid.resolution();
    let mut t1 = [0.0; 3];
    let mut t2 = [0.0; 3];
    for i in 0..3 {
        t1[i] = (1e-3 - o[i]) * inv[i];
        t2[i] = (res[i] as f32 - 1.0 - 1e-3 - o[i]) * inv[i];
    }
    let t_enter = (0..3)
        .map(|i| t1[i].min(t2[i]))
        .fold(f32::NEG_INFINITY, f32::max)
        .max(0.0);
    let t_exit = (0..3).map(|i| t1[i].max(t2[i])).fold(f32::INFINITY, f32::min);

    let sh = crate::sh::eval_sh(grid.basis_dim(), v).expect("basis_dim validated at construction");

    RaySetup {
        o,
        d,
        delta_scale,
        inv,
        t_enter,
        t_exit,
        sh,
    }
}

/// Sub-voxel exit step of the unit cell `[0,1)^3` located at fractional offset `frac`, inflated
/// by `step_epsilon` (§4.3.1).
pub(crate) fn nn_step_delta(frac: [f32; 3], inv: [f32; 3], step_epsilon: f32) -> f32 {
    let mut m = f32::INFINITY;
    for i in 0..3 {
        let t1 = -frac[i] * inv[i];
        let t2 = (1.0 - frac[i]) * inv[i];
        m = m.min(t1.max(t2));
    }
    m + step_epsilon
}

pub(crate) fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Evaluates the per-channel color `sigmoid(sum_k sh[k] * coeff[channel][k])` from a gathered
/// payload row (channel 0 is opacity and is ignored here).
pub(crate) fn eval_color(payload: &[f32], basis_dim: usize, sh: &[f32]) -> [f32; 3] {
    let mut rgb = [0.0; 3];
    for (c, out) in rgb.iter_mut().enumerate() {
        let mut s = 0.0f32;
        for k in 0..basis_dim {
            s += sh[k] * payload[1 + c * basis_dim + k];
        }
        *out = sigmoid(s);
    }
    rgb
}

pub(crate) fn step_cell(grid: &Grid, p: [f32; 3], setup: &RaySetup, opt: RenderOptions) -> (Cell, f32) {
    if opt.linear_interp {
        let (low, frac) = sampler::locate(grid, p);
        (sampler::trilinear_cell(grid, low, frac), opt.step_size)
    } else {
        let res = grid.resolution();
        let mut low = [0usize; 3];
        let mut frac = [0.0f32; 3];
        for i in 0..3 {
            let floor = p[i].floor().max(0.0);
            low[i] = (floor as usize).min(res[i] - 1);
            frac[i] = p[i] - floor;
        }
        let link = grid.links()[low];
        let delta = nn_step_delta(frac, setup.inv, opt.step_epsilon);
        (Cell::single(link), delta)
    }
}

fn render_one(grid: &Grid, origin: [f32; 3], dir: [f32; 3], opt: RenderOptions) -> [f32; 3] {
    let channels = grid.channels();
    let basis_dim = grid.basis_dim();
    let setup = setup_ray(grid, origin, dir);

    let mut rgb_out = [0.0f32; 3];
    let mut log_t = 0.0f32;
    let mut t = setup.t_enter;

    loop {
        if t >= setup.t_exit || log_t.exp() <= opt.stop_thresh {
            break;
        }

        let p = [
            setup.o[0] + t * setup.d[0],
            setup.o[1] + t * setup.d[1],
            setup.o[2] + t * setup.d[2],
        ];
        let (cell, delta) = step_cell(grid, p, &setup, opt);
        let payload = sampler::gather_payload(grid, &cell, channels);
        let sigma = payload[0].max(0.0);

        if sigma >= opt.sigma_thresh {
            let log_alpha = -delta * sigma * setup.delta_scale;
            let weight = log_t.exp() * (1.0 - log_alpha.exp());
            let color = eval_color(&payload, basis_dim, &setup.sh);
            for c in 0..3 {
                rgb_out[c] += weight * color[c];
            }
            log_t += log_alpha;
        }
        t += delta;
    }

    for c in &mut rgb_out {
        *c += log_t.exp() * opt.background_brightness;
    }
    rgb_out
}

/// Renders `rays` (origins and directions, each `(N, 3)`) through `grid`, returning `(N, 3)`
/// RGB values in `[0, 1]`.
///
/// Rays are independent and rendered data-parallel across a `rayon` thread pool; forward
/// rendering never writes to shared state beyond each ray's own output row.
///
/// # Errors
///
/// Returns [`Error::ShapeMismatch`] if `origins`/`dirs` are not `(N, 3)` or disagree on `N`,
/// [`Error::NumericFailure`] if any origin/direction is non-finite or a direction is
/// zero-length, and [`Error::InvalidParameter`] if any `opt` field is out of range.
pub fn render(grid: &Grid, origins: &Array2<f32>, dirs: &Array2<f32>, opt: RenderOptions) -> Result<Array2<f32>> {
    validate_rays(origins, dirs)?;
    validate_options(opt)?;

    let n = origins.nrows();
    let rows: Vec<[f32; 3]> = (0..n)
        .into_par_iter()
        .map(|i| render_one(grid, row3(origins, i), row3(dirs, i), opt))
        .collect();

    let mut out = Array2::<f32>::zeros((n, 3));
    for (i, rgb) in rows.into_iter().enumerate() {
        out.row_mut(i).assign(&ndarray::arr1(&rgb));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;
    use ndarray::arr2;

    fn inverse_sigmoid(y: f32) -> f32 {
        (y / (1.0 - y)).ln()
    }

    #[test]
    fn s1_single_opaque_voxel() {
        let mut grid = Grid::new([4, 4, 4], [1.0; 3], [0.0; 3], 1, false).unwrap();
        let link = grid.links()[[2, 2, 2]] as usize;
        grid.payload_mut().row_mut(link)[0] = 1e6;
        grid.payload_mut().row_mut(link)[1] = inverse_sigmoid(0.7);
        grid.payload_mut().row_mut(link)[2] = inverse_sigmoid(0.7);
        grid.payload_mut().row_mut(link)[3] = inverse_sigmoid(0.7);

        let origins = arr2(&[[0.0f32, 0.0, -2.0]]);
        let dirs = arr2(&[[0.0f32, 0.0, 1.0]]);
        let opt = RenderOptions {
            linear_interp: false,
            background_brightness: 0.0,
            ..RenderOptions::default()
        };
        let out = render(&grid, &origins, &dirs, opt).unwrap();
        for c in 0..3 {
            assert_approx_eq!(f32, out[[0, c]], 0.7, epsilon = 1e-3);
        }
    }

    #[test]
    fn s2_empty_grid_returns_background() {
        let grid = Grid::new([4, 4, 4], [1.0; 3], [0.0; 3], 1, false).unwrap();
        let mut grid = grid;
        let empty_links = ndarray::Array3::from_elem((4, 4, 4), -1);
        grid.replace(empty_links, ndarray::Array2::zeros((0, 4)), [4, 4, 4], 0);

        let origins = arr2(&[[0.0f32, 0.0, -2.0]]);
        let dirs = arr2(&[[0.0f32, 0.0, 1.0]]);
        let opt = RenderOptions {
            background_brightness: 0.25,
            ..RenderOptions::default()
        };
        let out = render(&grid, &origins, &dirs, opt).unwrap();
        for c in 0..3 {
            assert_approx_eq!(f32, out[[0, c]], 0.25, epsilon = 1e-6);
        }
    }

    #[test]
    fn s3_missed_ray_returns_exact_background() {
        let mut grid = Grid::new([4, 4, 4], [1.0; 3], [0.0; 3], 1, false).unwrap();
        // fill the whole grid with opaque voxels -- still must not be hit by a ray that misses
        // the box entirely
        for i in 0..grid.n_occupied() {
            grid.payload_mut().row_mut(i)[0] = 1e6;
        }
        let origins = arr2(&[[100.0f32, 100.0, 100.0]]);
        let dirs = arr2(&[[1.0f32, 1.0, 1.0]]);
        let opt = RenderOptions {
            background_brightness: 0.4,
            ..RenderOptions::default()
        };
        let out = render(&grid, &origins, &dirs, opt).unwrap();
        for c in 0..3 {
            assert_approx_eq!(f32, out[[0, c]], 0.4, epsilon = 1e-7);
        }
    }

    #[test]
    fn output_is_bounded_in_unit_cube() {
        let mut grid = Grid::new([6, 6, 6], [1.0; 3], [0.0; 3], 4, false).unwrap();
        for i in 0..grid.n_occupied() {
            grid.payload_mut().row_mut(i)[0] = 3.0;
            for c in 1..grid.channels() {
                grid.payload_mut().row_mut(i)[c] = 0.5;
            }
        }
        let origins = arr2(&[[-2.0f32, 0.1, 0.2], [0.3, -2.0, 0.1]]);
        let dirs = arr2(&[[1.0f32, 0.0, 0.0], [0.0, 1.0, 0.0]]);
        let out = render(&grid, &origins, &dirs, RenderOptions::default()).unwrap();
        for &v in &out {
            assert!((0.0..=1.0).contains(&v), "value {v} out of [0,1]");
        }
    }

    #[test]
    fn rejects_mismatched_ray_counts() {
        let grid = Grid::new([4, 4, 4], [1.0; 3], [0.0; 3], 1, false).unwrap();
        let origins = arr2(&[[0.0f32, 0.0, 0.0], [0.0, 0.0, 0.0]]);
        let dirs = arr2(&[[0.0f32, 0.0, 1.0]]);
        assert!(matches!(
            render(&grid, &origins, &dirs, RenderOptions::default()),
            Err(Error::ShapeMismatch(_))
        ));
    }

    #[test]
    fn rejects_zero_length_direction() {
        let grid = Grid::new([4, 4, 4], [1.0; 3], [0.0; 3], 1, false).unwrap();
        let origins = arr2(&[[0.0f32, 0.0, 0.0]]);
        let dirs = arr2(&[[0.0f32, 0.0, 0.0]]);
        assert!(matches!(
            render(&grid, &origins, &dirs, RenderOptions::default()),
            Err(Error::NumericFailure(_))
        ));
    }

    #[test]
    fn rejects_out_of_range_background() {
        let grid = Grid::new([4, 4, 4], [1.0; 3], [0.0; 3], 1, false).unwrap();
        let origins = arr2(&[[0.0f32, 0.0, -2.0]]);
        let dirs = arr2(&[[0.0f32, 0.0, 1.0]]);
        let opt = RenderOptions {
            background_brightness: 1.5,
            ..RenderOptions::default()
        };
        assert!(matches!(
            render(&grid, &origins, &dirs, opt),
            Err(Error::InvalidParameter(_))
        ));
    }
}
