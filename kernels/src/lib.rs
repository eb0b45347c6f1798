//! Raw CPU kernels for `flex-model`.
//!
//! Kernels work on flat row-major slices plus a shape and know nothing about the
//! tensor type that owns the data. Everything here is parallelised with `rayon`.

use num_traits::{FromPrimitive, Num, NumAssign, ToPrimitive};
use std::fmt::Debug;
use thiserror::Error;

pub mod cpu_concat;
pub mod cpu_matmul;
pub mod cpu_narrow;
pub mod cpu_transpose;

pub use cpu_concat::cpu_concat;
pub use cpu_matmul::cpu_matmul;
pub use cpu_narrow::cpu_narrow;
pub use cpu_transpose::cpu_transpose;

#[derive(Error, Debug)]
pub enum KernelError {
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    #[error("Dimension {dim} out of range for rank {rank}")]
    DimOutOfRange { dim: usize, rank: usize },
    #[error("Slice {start}..{end} out of bounds for dimension of size {size}")]
    SliceOutOfBounds {
        start: usize,
        end: usize,
        size: usize,
    },
}

pub type Result<T> = std::result::Result<T, KernelError>;

/// Trait bound for elements that can be processed by kernels.
/// This mirrors `TensorElem` in the main crate to avoid circular dependencies.
pub trait KernelElem:
    Num + NumAssign + Copy + Clone + Debug + Send + Sync + FromPrimitive + ToPrimitive + PartialOrd
{
}

impl<T> KernelElem for T where
    T: Num
        + NumAssign
        + Copy
        + Clone
        + Debug
        + Send
        + Sync
        + FromPrimitive
        + ToPrimitive
        + PartialOrd
{
}

/// Splits `shape` around `dim` into `(outer, dim_size, inner)` element counts.
///
/// `outer` is the product of the dimensions before `dim`, `inner` the product of those after it.
/// Every dimension-wise kernel walks memory as `outer` blocks of `dim_size * inner` elements.
pub(crate) fn split_at_dim(shape: &[usize], dim: usize) -> Result<(usize, usize, usize)> {
    if dim >= shape.len() {
        return Err(KernelError::DimOutOfRange {
            dim,
            rank: shape.len(),
        });
    }
    let outer = shape[..dim].iter().product();
    let inner = shape[dim + 1..].iter().product();
    Ok((outer, shape[dim], inner))
}
