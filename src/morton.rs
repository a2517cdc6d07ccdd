//! Integer square root, power-of-two test, and Morton (Z-order) enumeration of a cube.
//!
//! These are used only to pick a cache-friendly initial ordering for a [`crate::grid::Grid`]'s
//! links tensor; no part of this crate's correctness depends on the ordering chosen here.

use ndarray::Array3;

/// Returns `Some(sqrt)` if `n` is a perfect square, `None` otherwise.
#[must_use]
pub fn isqrt(n: usize) -> Option<usize> {
    if n == 0 {
        return Some(0);
    }

    let mut r = (n as f64).sqrt() as usize;
    // correct for floating-point rounding in either direction
    while r > 0 && r * r > n {
        r -= 1;
    }
    while (r + 1) * (r + 1) <= n {
        r += 1;
    }

    (r * r == n).then_some(r)
}

/// Returns `true` if `n` is a power of two. Zero is not a power of two.
#[must_use]
pub const fn is_pow2(n: usize) -> bool {
    n > 0 && (n & (n - 1)) == 0
}

// Spreads the low 21 bits of `x` so that two zero bits follow each original bit, i.e. bit `i`
// of `x` ends up at bit `3*i` of the result. Standard magic-number bit-interleaving trick.
fn split_by_3(x: u32) -> u64 {
    let mut x = u64::from(x) & 0x001f_ffff;
    x = (x | (x << 32)) & 0x001f_0000_0000_ffff;
    x = (x | (x << 16)) & 0x001f_0000_ff00_00ff;
    x = (x | (x << 8)) & 0x100f_00f0_0f00_f00f;
    x = (x | (x << 4)) & 0x10c3_0c30_c30c_30c3;
    x = (x | (x << 2)) & 0x1249_2492_4924_9249;
    x
}

/// Interleaves the bits of `(x, y, z)` into a single Morton (Z-order) code. Each component must
/// fit in 21 bits (i.e. be below `2^21`), which is far beyond any realistic voxel resolution.
#[must_use]
pub fn morton_encode(x: u32, y: u32, z: u32) -> u64 {
    split_by_3(x) | (split_by_3(y) << 1) | (split_by_3(z) << 2)
}

/// Builds the initial links tensor for a cube of side `side` in Morton order:
/// `links[x, y, z] = interleave(x, y, z)`.
///
/// For power-of-two `side` the Morton codes of `0..side` per axis form a bijection onto
/// `0..side^3`, so this is a valid (permutation) initial enumeration of the links tensor.
#[must_use]
pub fn morton_links(side: usize) -> Array3<i32> {
    Array3::from_shape_fn((side, side, side), |(x, y, z)| {
        morton_encode(x as u32, y as u32, z as u32) as i32
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isqrt_perfect_squares() {
        assert_eq!(isqrt(0), Some(0));
        assert_eq!(isqrt(1), Some(1));
        assert_eq!(isqrt(4), Some(2));
        assert_eq!(isqrt(9), Some(3));
        assert_eq!(isqrt(16), Some(4));
        assert_eq!(isqrt(10000 * 10000), Some(10000));
    }

    #[test]
    fn isqrt_non_squares() {
        assert_eq!(isqrt(2), None);
        assert_eq!(isqrt(8), None);
        assert_eq!(isqrt(15), None);
        assert_eq!(isqrt(17), None);
    }

    #[test]
    fn pow2_table() {
        assert!(!is_pow2(0));
        assert!(is_pow2(1));
        assert!(is_pow2(2));
        assert!(!is_pow2(3));
        assert!(is_pow2(256));
        assert!(!is_pow2(255));
    }

    #[test]
    fn morton_links_is_a_permutation() {
        let side = 8;
        let links = morton_links(side);
        let mut seen = vec![false; side * side * side];
        for &v in &links {
            let v = v as usize;
            assert!(v < seen.len());
            assert!(!seen[v], "duplicate morton code {v}");
            seen[v] = true;
        }
        assert!(seen.into_iter().all(|b| b));
    }
}
