use crate::{KernelElem, KernelError, Result};
use rayon::prelude::*;

/// CPU Implementation of Transpose.
///
/// Swaps the last two dimensions of the input data. Leading dimensions are treated as a batch.
pub fn cpu_transpose<T>(data: &[T], shape: &[usize]) -> Result<Vec<T>>
where
    T: KernelElem,
{
    let rank = shape.len();
    if rank < 2 {
        return Err(KernelError::DimOutOfRange { dim: 1, rank });
    }
    let m = shape[rank - 2];
    let n = shape[rank - 1];
    let size: usize = shape.iter().product();
    if data.len() != size {
        return Err(KernelError::ShapeMismatch {
            expected: vec![size],
            got: vec![data.len()],
        });
    }
    let mut out_data = vec![T::zero(); size];
    if size == 0 {
        return Ok(out_data);
    }

    // The output has shape [Batch..., N, M]; each parallel task fills one row of length M.
    out_data
        .as_mut_slice()
        .par_chunks_mut(m)
        .enumerate()
        .for_each(|(i, out_row)| {
            let batch_idx = i / n;
            let col_idx = i % n;
            let input_batch_offset = batch_idx * m * n;

            for (r, out_elem) in out_row.iter_mut().enumerate() {
                *out_elem = data[input_batch_offset + r * n + col_idx];
            }
        });

    Ok(out_data)
}
