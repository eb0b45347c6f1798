use crate::{KernelElem, KernelError, Result, split_at_dim};
use rayon::prelude::*;

/// CPU Implementation of Concatenation.
///
/// Joins `parts` along dimension `dim`. Every part must have exactly `part_shape`, so the
/// result has `shape[dim] == part_shape[dim] * parts.len()`. Uneven parts are rejected
/// rather than padded, which is the contract of an all-gather over equal shards.
pub fn cpu_concat<T>(parts: &[&[T]], part_shape: &[usize], dim: usize) -> Result<Vec<T>>
where
    T: KernelElem,
{
    let (outer, dim_size, inner) = split_at_dim(part_shape, dim)?;
    let part_len = outer * dim_size * inner;
    for part in parts {
        if part.len() != part_len {
            return Err(KernelError::ShapeMismatch {
                expected: vec![part_len],
                got: vec![part.len()],
            });
        }
    }

    let block = dim_size * inner;
    let out_block = block * parts.len();
    let mut out_data = vec![T::zero(); outer * out_block];
    if out_data.is_empty() {
        return Ok(out_data);
    }

    out_data
        .as_mut_slice()
        .par_chunks_mut(out_block)
        .enumerate()
        .for_each(|(o, dst)| {
            for (p, part) in parts.iter().enumerate() {
                dst[p * block..(p + 1) * block].copy_from_slice(&part[o * block..(o + 1) * block]);
            }
        });

    Ok(out_data)
}
