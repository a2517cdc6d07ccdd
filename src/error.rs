//! Error types returned by this crate.

use thiserror::Error;

/// Errors that can occur while constructing, sampling, rendering or resampling a
/// [`crate::grid::Grid`].
#[derive(Clone, Debug, Error, PartialEq)]
pub enum Error {
    /// Two or more array arguments disagree on a dimension that must match (e.g. ray origins
    /// and directions have a different number of rows, or an array does not have the expected
    /// trailing width).
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
    /// A parameter is outside the range the operation accepts (an unsupported `basis_dim`, a
    /// non-positive resolution, a [`crate::render::RenderOptions`] field out of range, ...).
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// The grid and the supplied inputs reside on different accelerators. This crate only ever
    /// operates on host memory, so this variant is reserved for callers that layer a kernel
    /// dispatch path on top and is never produced by the functions in this crate.
    #[error("device mismatch: {0}")]
    DeviceMismatch(String),
    /// An input contained a non-finite value, or a ray direction of (near) zero length.
    #[error("numeric failure: {0}")]
    NumericFailure(String),
}

/// Convenience alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
