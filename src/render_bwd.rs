//! Analytic reverse-mode gradient of [`crate::render::render`] with respect to the grid payload.
//!
//! The backward pass re-traverses each ray exactly as the forward pass did (§4.3.3) rather than
//! replaying a recorded tape: every intermediate quantity the forward pass used (`log_T`,
//! per-step `weight`, per-step color) is cheap to recompute, and what cannot be recomputed from
//! the current step alone -- the sum of every *later* step's contribution -- is recovered from
//! the forward pass's own cached final output via `r_i = rgb_out - rgb_accum_so_far - weight_i *
//! color_i`, the total minus everything seen up to and including the current step.

use crate::error::{Error, Result};
use crate::grid::Grid;
use crate::render::{self, RenderOptions};
use crate::sampler;
use ndarray::Array2;
use rayon::prelude::*;

#[allow(clippy::too_many_arguments)]
fn render_one_backward(
    grid: &Grid,
    origin: [f32; 3],
    dir: [f32; 3],
    opt: RenderOptions,
    grad_out: [f32; 3],
    rgb_total: [f32; 3],
    acc: &mut Array2<f32>,
) {
    let channels = grid.channels();
    let basis_dim = grid.basis_dim();
    let setup = render::setup_ray(grid, origin, dir);

    let mut log_t = 0.0f32;
    let mut rgb_accum = [0.0f32; 3];
    let mut t = setup.t_enter;

    loop {
        // Unlike the forward pass, traversal is not cut short by `stop_thresh`: every voxel the
        // forward pass could have touched before exiting the box must receive its gradient, even
        // past the point forward rendering itself stopped accumulating color.
        if t >= setup.t_exit {
            break;
        }

        let p = [
            setup.o[0] + t * setup.d[0],
            setup.o[1] + t * setup.d[1],
            setup.o[2] + t * setup.d[2],
        ];
        let (cell, delta) = render::step_cell(grid, p, &setup, opt);
        let payload = sampler::gather_payload(grid, &cell, channels);
        let raw_sigma = payload[0];
        let sigma = raw_sigma.max(0.0);

        if sigma >= opt.sigma_thresh {
            let log_alpha = -delta * sigma * setup.delta_scale;
            let t_before = log_t.exp();
            let t_after = t_before * log_alpha.exp();
            let weight = t_before - t_after;
            let color = render::eval_color(&payload, basis_dim, &setup.sh);

            let mut r = [0.0f32; 3];
            for c in 0..3 {
                r[c] = rgb_total[c] - rgb_accum[c] - weight * color[c];
            }
            let grad_dot_c: f32 = (0..3).map(|c| grad_out[c] * color[c]).sum();
            let grad_dot_r: f32 = (0..3).map(|c| grad_out[c] * r[c]).sum();
            // d(rgb_out)/d(log_alpha_i) = -t_after * color_i + r_i, dotted with grad_out.
            let dl_dlogalpha = grad_dot_r - t_after * grad_dot_c;

            // sigma was rectified by relu: zero gradient flows through a clamped-negative value.
            if raw_sigma > 0.0 {
                let dl_dsigma = dl_dlogalpha * (-delta * setup.delta_scale);
                sampler::scatter_grad(acc, &cell, 0, dl_dsigma);
            }
            for c in 0..3 {
                let dl_dcolor = grad_out[c] * weight;
                let dl_dz = dl_dcolor * color[c] * (1.0 - color[c]);
                for k in 0..basis_dim {
                    sampler::scatter_grad(acc, &cell, 1 + c * basis_dim + k, dl_dz * setup.sh[k]);
                }
            }

            for c in 0..3 {
                rgb_accum[c] += weight * color[c];
            }
            log_t += log_alpha;
        }
        t += delta;
    }
}

/// Computes `d(loss)/d(payload)` from an upstream gradient `grad_out` (`(N, 3)`, one row per
/// ray, matching [`crate::render::render`]'s output shape) and `rgb_out`, the cached output of
/// the forward call this is the gradient of.
///
/// Returns a `(grid.n_occupied(), grid.channels())` gradient matrix. Rows corresponding to
/// voxels no ray in this batch touched are exactly zero, matching the forward empty-voxel
/// policy.
///
/// Accumulation across rays uses the same `rayon` fold/reduce pattern as
/// [`crate::sampler::sample_backward`]: per-ray contributions are summed into a thread-local
/// accumulator, merged by elementwise addition, so the result is associative and
/// order-independent up to floating-point rounding.
///
/// # Errors
///
/// Returns the same errors as [`crate::render::render`], plus [`Error::ShapeMismatch`] if
/// `grad_out` or `rgb_out` do not have shape `(origins.nrows(), 3)`.
pub fn render_backward(
    grid: &Grid,
    origins: &Array2<f32>,
    dirs: &Array2<f32>,
    opt: RenderOptions,
    grad_out: &Array2<f32>,
    rgb_out: &Array2<f32>,
) -> Result<Array2<f32>> {
    render::validate_rays(origins, dirs)?;
    render::validate_options(opt)?;
    let n = origins.nrows();
    for (name, arr) in [("grad_out", grad_out), ("rgb_out", rgb_out)] {
        if arr.nrows() != n || arr.ncols() != 3 {
            return Err(Error::ShapeMismatch(format!(
                "{name} must have shape ({n}, 3), found ({}, {})",
                arr.nrows(),
                arr.ncols()
            )));
        }
    }

    let n_occ = grid.n_occupied();
    let channels = grid.channels();

    let grad = (0..n)
        .into_par_iter()
        .fold(
            || Array2::<f32>::zeros((n_occ, channels)),
            |mut acc, i| {
                render_one_backward(
                    grid,
                    render::row3(origins, i),
                    render::row3(dirs, i),
                    opt,
                    render::row3(grad_out, i),
                    render::row3(rgb_out, i),
                    &mut acc,
                );
                acc
            },
        )
        .reduce(|| Array2::<f32>::zeros((n_occ, channels)), |a, b| a + b);

    Ok(grad)
}
