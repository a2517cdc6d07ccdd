//! The sparse voxel grid: a dense `links` tensor providing a compact-index indirection into a
//! `payload` matrix of per-occupied-voxel opacity and spherical-harmonic color coefficients.

use crate::error::{Error, Result};
use crate::morton;
use crate::sh;
use ndarray::{Array2, Array3};

/// Axis-aligned sparse voxel grid.
///
/// Storage is the `(links, payload)` pair described in the module documentation: `links` is a
/// dense `(Rx, Ry, Rz)` tensor of compact indices (`-1` for empty voxels), and `payload` is a
/// compact `(N, 3*basis_dim + 1)` matrix holding one row per occupied voxel. The two are always
/// replaced together (construction, [`crate::resample::resample`]) so a reader never observes a
/// partially rebuilt grid.
pub struct Grid {
    links: Array3<i32>,
    payload: Array2<f32>,
    resolution: [usize; 3],
    n_occupied: usize,
    basis_dim: usize,
    center: [f32; 3],
    radius: [f32; 3],
}

impl Grid {
    /// Constructs a new, fully dense grid of resolution `resolution` (every voxel occupied,
    /// payload zero-initialized).
    ///
    /// `z_order` requests a Morton-ordered initial `links` tensor instead of the default
    /// row-major enumeration; it is honored only when `resolution` is a cube whose side is a
    /// power of two, and silently ignored otherwise (this never affects correctness, only cache
    /// locality, see [`crate::morton`]).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if `basis_dim` is not one of `1, 4, 9, 16`, or if any
    /// axis of `resolution` is zero. Returns [`Error::NumericFailure`] if `radius` or `center`
    /// contain a non-finite value, or if any `radius` component is not strictly positive.
    pub fn new(
        resolution: [usize; 3],
        radius: [f32; 3],
        center: [f32; 3],
        basis_dim: usize,
        z_order: bool,
    ) -> Result<Self> {
        if !sh::is_supported_basis_dim(basis_dim) {
            return Err(Error::InvalidParameter(format!(
                "basis_dim must be one of 1, 4, 9, 16, found {basis_dim}"
            )));
        }
        if resolution.iter().any(|&r| r == 0) {
            return Err(Error::InvalidParameter(format!(
                "resolution must be positive in every axis, found {resolution:?}"
            )));
        }
        if radius.iter().chain(&center).any(|v| !v.is_finite()) {
            return Err(Error::NumericFailure(
                "radius and center must be finite".to_string(),
            ));
        }
        if radius.iter().any(|&r| r <= 0.0) {
            return Err(Error::NumericFailure(format!(
                "radius must be strictly positive in every axis, found {radius:?}"
            )));
        }

        let [rx, ry, rz] = resolution;
        let capacity = rx * ry * rz;
        let cube_pow2 = rx == ry && ry == rz && morton::is_pow2(rx);

        // z_order requested on a non-cube or non-power-of-two resolution: falls back to the
        // default row-major enumeration. This never affects correctness, only locality.
        let links = if z_order && cube_pow2 {
            morton::morton_links(rx)
        } else {
            Array3::from_shape_fn((rx, ry, rz), |(x, y, z)| (x * ry * rz + y * rz + z) as i32)
        };

        let channels = 3 * basis_dim + 1;
        let payload = Array2::zeros((capacity, channels));

        Ok(Self {
            links,
            payload,
            resolution,
            n_occupied: capacity,
            basis_dim,
            center,
            radius,
        })
    }

    /// Lattice resolution `(Rx, Ry, Rz)`.
    #[must_use]
    pub fn resolution(&self) -> [usize; 3] {
        self.resolution
    }

    /// SH basis dimension `B`.
    #[must_use]
    pub fn basis_dim(&self) -> usize {
        self.basis_dim
    }

    /// Number of payload channels, `3*basis_dim + 1`.
    #[must_use]
    pub fn channels(&self) -> usize {
        3 * self.basis_dim + 1
    }

    /// Number of occupied voxels `N`.
    #[must_use]
    pub fn n_occupied(&self) -> usize {
        self.n_occupied
    }

    /// World-space center of the grid's bounding box.
    #[must_use]
    pub fn center(&self) -> [f32; 3] {
        self.center
    }

    /// World-space per-axis half-extents of the grid's bounding box.
    #[must_use]
    pub fn radius(&self) -> [f32; 3] {
        self.radius
    }

    /// The dense links tensor, shape `(Rx, Ry, Rz)`.
    #[must_use]
    pub fn links(&self) -> &Array3<i32> {
        &self.links
    }

    /// The compact payload matrix, shape `(N, channels())`.
    #[must_use]
    pub fn payload(&self) -> &Array2<f32> {
        &self.payload
    }

    /// Mutable access to the compact payload matrix, for in-place optimizer updates.
    pub fn payload_mut(&mut self) -> &mut Array2<f32> {
        &mut self.payload
    }

    /// The per-axis `(offset, scale)` pair such that `grid = offset + scale * world`.
    #[must_use]
    pub(crate) fn offset_scale(&self) -> ([f32; 3], [f32; 3]) {
        let mut offset = [0.0; 3];
        let mut scale = [0.0; 3];
        for i in 0..3 {
            let r = self.resolution[i] as f32;
            offset[i] = 0.5 * (1.0 - self.center[i] / self.radius[i]) * r - 0.5;
            scale[i] = 0.5 * r / self.radius[i];
        }
        (offset, scale)
    }

    /// Transforms a world-space point into grid coordinates (normalized to `[0, R_i]` per axis).
    #[must_use]
    pub fn world_to_grid(&self, world: [f32; 3]) -> [f32; 3] {
        let (offset, scale) = self.offset_scale();
        let mut out = [0.0; 3];
        for i in 0..3 {
            out[i] = offset[i] + scale[i] * world[i];
        }
        out
    }

    /// Transforms a grid-space point back into world coordinates. Inverse of
    /// [`Grid::world_to_grid`].
    #[must_use]
    pub fn grid_to_world(&self, grid: [f32; 3]) -> [f32; 3] {
        let mut out = [0.0; 3];
        for i in 0..3 {
            let r = self.resolution[i] as f32;
            let roffset = self.radius[i] * (1.0 / r - 1.0) + self.center[i];
            let rscale = 2.0 * self.radius[i] / r;
            out[i] = roffset + rscale * grid[i];
        }
        out
    }

    /// Atomically replaces `(links, payload, resolution, n_occupied)` as one unit. Used by
    /// [`crate::resample::resample`]; never exposed so that callers cannot observe a partial
    /// rebuild.
    pub(crate) fn replace(
        &mut self,
        links: Array3<i32>,
        payload: Array2<f32>,
        resolution: [usize; 3],
        n_occupied: usize,
    ) {
        self.links = links;
        self.payload = payload;
        self.resolution = resolution;
        self.n_occupied = n_occupied;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn rejects_bad_basis_dim() {
        assert!(Grid::new([4, 4, 4], [1.0; 3], [0.0; 3], 5, false).is_err());
    }

    #[test]
    fn rejects_zero_resolution() {
        assert!(Grid::new([0, 4, 4], [1.0; 3], [0.0; 3], 1, false).is_err());
    }

    #[test]
    fn rejects_non_positive_radius() {
        assert!(Grid::new([4, 4, 4], [0.0, 1.0, 1.0], [0.0; 3], 1, false).is_err());
    }

    #[test]
    fn identity_links_is_dense_permutation() {
        let grid = Grid::new([2, 3, 4], [1.0; 3], [0.0; 3], 1, false).unwrap();
        let mut seen = vec![false; 2 * 3 * 4];
        for &v in grid.links() {
            assert!(v >= 0);
            assert!(!seen[v as usize]);
            seen[v as usize] = true;
        }
        assert!(seen.into_iter().all(|b| b));
        assert_eq!(grid.n_occupied(), 24);
    }

    #[test]
    fn z_order_falls_back_on_non_cube() {
        // 4x4x8 is not a cube: z_order must be silently ignored, falling back to row-major.
        let grid = Grid::new([4, 4, 8], [1.0; 3], [0.0; 3], 1, true).unwrap();
        assert_eq!(grid.links()[[0, 0, 0]], 0);
        assert_eq!(grid.links()[[1, 0, 0]], 4 * 8);
    }

    #[test]
    fn z_order_used_on_pow2_cube() {
        let grid = Grid::new([4, 4, 4], [1.0; 3], [0.0; 3], 1, true).unwrap();
        assert_eq!(grid.links()[[0, 0, 0]], 0);
        assert_eq!(grid.links()[[1, 0, 0]], 1);
        assert_eq!(grid.links()[[0, 1, 0]], 2);
    }

    #[test]
    fn world_grid_round_trip() {
        let grid = Grid::new([8, 8, 8], [2.0, 3.0, 1.5], [0.1, -0.2, 0.3], 1, false).unwrap();
        let points = [
            [0.0, 0.0, 0.0],
            [1.3, -2.7, 0.4],
            [-1.9, 2.9, -1.5],
        ];
        for p in points {
            let back = grid.grid_to_world(grid.world_to_grid(p));
            for i in 0..3 {
                assert_approx_eq!(f32, back[i], p[i], epsilon = 1e-4);
            }
        }
    }
}
