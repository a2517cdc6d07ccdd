//! Real spherical-harmonic basis evaluation, degrees 0 through 3 (`basis_dim` in `{1, 4, 9,
//! 16}`). Matches the normalization used by `svox2`/plenoxel-style renderers so coefficients
//! trained against this evaluator are portable.

use crate::error::{Error, Result};
use crate::morton::isqrt;
use arrayvec::ArrayVec;

const SH_C0: f32 = 0.282_095;
const SH_C1: f32 = 0.488_602_5;
const SH_C2: [f32; 5] = [
    1.092_548_4,
    -1.092_548_4,
    0.315_391_57,
    -1.092_548_4,
    0.546_274_2,
];
const SH_C3: [f32; 7] = [
    -0.590_043_6,
    2.890_611_4,
    -0.457_045_8,
    0.373_176_33,
    -0.457_045_8,
    1.445_305_7,
    -0.590_043_6,
];

/// Returns `true` if `basis_dim` is a supported SH dimension: a perfect square, at most 16.
#[must_use]
pub fn is_supported_basis_dim(basis_dim: usize) -> bool {
    basis_dim >= 1 && basis_dim <= 16 && isqrt(basis_dim).is_some()
}

/// Evaluates the real SH basis of dimension `basis_dim` at unit view direction `dir`.
///
/// `dir` need not be normalized by this function -- callers are responsible for normalizing
/// (the renderer always passes a normalized view direction). The output is deterministic
/// bit-for-bit across calls with identical input.
///
/// # Errors
///
/// Returns [`Error::InvalidParameter`] if `basis_dim` is not one of `1`, `4`, `9`, `16`.
pub fn eval_sh(basis_dim: usize, dir: [f32; 3]) -> Result<ArrayVec<f32, 16>> {
    if !is_supported_basis_dim(basis_dim) {
        return Err(Error::InvalidParameter(format!(
            "basis_dim must be one of 1, 4, 9, 16 (a perfect square at most 16), found {basis_dim}"
        )));
    }

    let mut out = ArrayVec::new();
    out.push(SH_C0);

    if basis_dim > 1 {
        let [x, y, z] = dir;
        out.push(-SH_C1 * y);
        out.push(SH_C1 * z);
        out.push(-SH_C1 * x);

        if basis_dim > 4 {
            let (xx, yy, zz) = (x * x, y * y, z * z);
            let (xy, yz, xz) = (x * y, y * z, x * z);
            out.push(SH_C2[0] * xy);
            out.push(SH_C2[1] * yz);
            out.push(SH_C2[2] * (2.0 * zz - xx - yy));
            out.push(SH_C2[3] * xz);
            out.push(SH_C2[4] * (xx - yy));

            if basis_dim > 9 {
                out.push(SH_C3[0] * y * (3.0 * xx - yy));
                out.push(SH_C3[1] * xy * z);
                out.push(SH_C3[2] * y * (4.0 * zz - xx - yy));
                out.push(SH_C3[3] * z * (2.0 * zz - 3.0 * xx - 3.0 * yy));
                out.push(SH_C3[4] * x * (4.0 * zz - xx - yy));
                out.push(SH_C3[5] * z * (xx - yy));
                out.push(SH_C3[6] * x * (xx - 3.0 * yy));
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn rejects_unsupported_dims() {
        for bad in [0, 2, 3, 5, 17, 25] {
            assert!(eval_sh(bad, [0.0, 0.0, 1.0]).is_err());
        }
    }

    #[test]
    fn degree_zero_is_constant() {
        let sh = eval_sh(1, [0.3, -0.1, 0.9]).unwrap();
        assert_eq!(sh.len(), 1);
        assert_approx_eq!(f32, sh[0], SH_C0);
    }

    #[test]
    fn matches_axis_aligned_directions() {
        // along +z, the degree-1 terms reduce to a single nonzero component
        let sh = eval_sh(4, [0.0, 0.0, 1.0]).unwrap();
        assert_approx_eq!(f32, sh[0], SH_C0);
        assert_approx_eq!(f32, sh[1], 0.0, ulps = 4);
        assert_approx_eq!(f32, sh[2], SH_C1);
        assert_approx_eq!(f32, sh[3], 0.0, ulps = 4);
    }

    #[test]
    fn deterministic_across_calls() {
        let dir = [0.12, 0.44, -0.88];
        let a = eval_sh(16, dir).unwrap();
        let b = eval_sh(16, dir).unwrap();
        assert_eq!(a.as_slice(), b.as_slice());
    }
}
