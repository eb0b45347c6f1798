use crate::{KernelElem, KernelError, Result, split_at_dim};
use rayon::prelude::*;

/// CPU Implementation of Narrow.
///
/// Copies the contiguous range `start..start + len` of dimension `dim` out of `data`.
/// The output has the input shape with `shape[dim]` replaced by `len`.
///
/// This is the local half of a scatter: every rank narrows the full tensor to the slice it owns.
pub fn cpu_narrow<T>(data: &[T], shape: &[usize], dim: usize, start: usize, len: usize) -> Result<Vec<T>>
where
    T: KernelElem,
{
    let (outer, dim_size, inner) = split_at_dim(shape, dim)?;
    let end = start + len;
    if end > dim_size {
        return Err(KernelError::SliceOutOfBounds {
            start,
            end,
            size: dim_size,
        });
    }
    if data.len() != outer * dim_size * inner {
        return Err(KernelError::ShapeMismatch {
            expected: vec![outer * dim_size * inner],
            got: vec![data.len()],
        });
    }

    let block = len * inner;
    let mut out_data = vec![T::zero(); outer * block];
    if out_data.is_empty() {
        return Ok(out_data);
    }

    out_data
        .as_mut_slice()
        .par_chunks_mut(block)
        .enumerate()
        .for_each(|(o, out_block)| {
            let src = o * dim_size * inner + start * inner;
            out_block.copy_from_slice(&data[src..src + block]);
        });

    Ok(out_data)
}
