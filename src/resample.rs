//! Regridding at a new resolution: re-samples the payload onto a new lattice, thresholds
//! opacity, optionally grows the occupied set by one ring of 26-neighbor dilation, and rebuilds
//! `(links, payload)` as a single atomic unit (§4.4).

use crate::error::{Error, Result};
use crate::grid::Grid;
use crate::sampler;
use itertools::iproduct;
use ndarray::{Array2, Array3};

/// Points are sampled in chunks of this size rather than all at once, bounding peak memory use
/// for large target resolutions.
const RESAMPLE_BATCH: usize = 720_720;

fn dilate_mask(mask: &Array3<bool>) -> Array3<bool> {
    let (rx, ry, rz) = mask.dim();
    let mut out = mask.clone();
    for x in 0..rx {
        for y in 0..ry {
            for z in 0..rz {
                if mask[[x, y, z]] {
                    continue;
                }
                'neighbors: for dx in -1i32..=1 {
                    for dy in -1i32..=1 {
                        for dz in -1i32..=1 {
                            if dx == 0 && dy == 0 && dz == 0 {
                                continue;
                            }
                            let (nx, ny, nz) = (x as i32 + dx, y as i32 + dy, z as i32 + dz);
                            if nx < 0 || ny < 0 || nz < 0 {
                                continue;
                            }
                            let (nx, ny, nz) = (nx as usize, ny as usize, nz as usize);
                            if nx < rx && ny < ry && nz < rz && mask[[nx, ny, nz]] {
                                out[[x, y, z]] = true;
                                break 'neighbors;
                            }
                        }
                    }
                }
            }
        }
    }
    out
}

/// Rebuilds `grid` at resolution `target`, keeping the same world-space bounding box (`center`,
/// `radius`).
///
/// Every new lattice site is trilinearly re-sampled from the grid's current contents (align
/// corners: new index `0` maps to old grid-space `0`, new index `target - 1` maps to old
/// grid-space `old_resolution - 1`). Sites whose resampled opacity falls below `sigma_thresh`
/// are discarded; if `dilate` is set, any discarded site with at least one of its 26 neighbors
/// surviving the threshold is kept anyway; one ring of growth, not applied recursively.
///
/// The new `(links, payload)` pair replaces the old one as a single atomic unit: a caller can
/// never observe a grid with a `links` tensor of one resolution and a `payload` sized for
/// another.
///
/// # Errors
///
/// Returns [`Error::InvalidParameter`] if any axis of `target` is zero. `sigma_thresh` is a raw
/// signed opacity threshold with no required range -- in particular `sigma_thresh = -infinity`
/// must be accepted, since it is the threshold that makes `resample` the identity on `L` and on
/// sampled values (spec Laws).
pub fn resample(grid: &mut Grid, target: [usize; 3], sigma_thresh: f32, dilate: bool) -> Result<()> {
    if target.iter().any(|&r| r == 0) {
        return Err(Error::InvalidParameter(format!(
            "target resolution must be positive in every axis, found {target:?}"
        )));
    }

    let [tx, ty, tz] = target;
    let channels = grid.channels();
    let old_res = grid.resolution();

    let axis_scale = |new_r: usize, old_r: usize| -> f32 {
        if new_r > 1 {
            (old_r as f32 - 1.0) / (new_r as f32 - 1.0)
        } else {
            0.0
        }
    };
    let scale = [
        axis_scale(tx, old_res[0]),
        axis_scale(ty, old_res[1]),
        axis_scale(tz, old_res[2]),
    ];

    let coords: Vec<(usize, usize, usize)> = iproduct!(0..tx, 0..ty, 0..tz).collect();
    let total = coords.len();

    let mut sampled = Array2::<f32>::zeros((total, channels));
    for (batch_idx, batch) in coords.chunks(RESAMPLE_BATCH).enumerate() {
        let base = batch_idx * RESAMPLE_BATCH;
        let mut points = Array2::<f32>::zeros((batch.len(), 3));
        for (row, &(x, y, z)) in batch.iter().enumerate() {
            points[[row, 0]] = x as f32 * scale[0];
            points[[row, 1]] = y as f32 * scale[1];
            points[[row, 2]] = z as f32 * scale[2];
        }
        let values = sampler::sample(grid, &points, true)?;
        for row in 0..batch.len() {
            sampled.row_mut(base + row).assign(&values.row(row));
        }
    }

    let mut mask = Array3::from_elem((tx, ty, tz), false);
    for (flat, &(x, y, z)) in coords.iter().enumerate() {
        mask[[x, y, z]] = sampled[[flat, 0]] >= sigma_thresh;
    }
    if dilate {
        mask = dilate_mask(&mask);
    }

    let mut links = Array3::<i32>::from_elem((tx, ty, tz), -1);
    let mut n_occupied = 0usize;
    for &(x, y, z) in &coords {
        if mask[[x, y, z]] {
            links[[x, y, z]] = n_occupied as i32;
            n_occupied += 1;
        }
    }

    let mut payload = Array2::<f32>::zeros((n_occupied, channels));
    for (flat, &(x, y, z)) in coords.iter().enumerate() {
        let link = links[[x, y, z]];
        if link >= 0 {
            payload.row_mut(link as usize).assign(&sampled.row(flat));
        }
    }

    grid.replace(links, payload, target, n_occupied);
    Ok(())
}
