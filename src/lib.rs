//! Storage, sampling and volumetric rendering of a differentiable sparse voxel grid.
//!
//! A [`Grid`] pairs a dense `links` tensor with a compact per-voxel `payload` of opacity and
//! spherical-harmonic color coefficients (see [`grid`]). [`sample`]/[`sampler::sample_backward`]
//! trilinearly interpolate payload values at arbitrary points; [`render`]/[`render_backward`]
//! integrate that payload along camera rays into RGB pixels and their gradient;
//! [`resample::resample`] rebuilds a grid at a new resolution.
//!
//! This crate is host-memory-only storage, sampling and rendering math: it has no CLI, no
//! dataset loader, no image I/O, no GPU kernels and no autodiff-graph integration. Callers
//! embedding it in a training loop own the optimizer step and the tensor-framework glue.

pub mod error;
pub mod grid;
pub mod morton;
pub mod render;
pub mod render_bwd;
pub mod resample;
pub mod sampler;
pub mod sh;

pub use error::{Error, Result};
pub use grid::Grid;
pub use render::{render, RenderOptions};
pub use render_bwd::render_backward;
pub use resample::resample;
pub use sampler::{sample, sample_backward};
