use crate::{KernelElem, KernelError, Result};
use rayon::prelude::*;

/// CPU Implementation of Matrix Multiplication.
///
/// Multiplies the last two dimensions of `lhs` `[..., M, K]` and `rhs` `[..., K, N]`.
/// Leading dimensions must match and are treated as a batch.
///
/// The RHS is transposed first so that the inner loop walks both operands sequentially.
pub fn cpu_matmul<T>(
    lhs_data: &[T],
    rhs_data: &[T],
    lhs_shape: &[usize],
    rhs_shape: &[usize],
) -> Result<Vec<T>>
where
    T: KernelElem,
{
    let rank = lhs_shape.len();
    if rank < 2 || rhs_shape.len() != rank {
        return Err(KernelError::ShapeMismatch {
            expected: lhs_shape.to_vec(),
            got: rhs_shape.to_vec(),
        });
    }
    if lhs_shape[..rank - 2] != rhs_shape[..rank - 2] {
        return Err(KernelError::ShapeMismatch {
            expected: lhs_shape[..rank - 2].to_vec(),
            got: rhs_shape[..rank - 2].to_vec(),
        });
    }

    let m = lhs_shape[rank - 2];
    let k = lhs_shape[rank - 1];
    let n = rhs_shape[rank - 1];

    if k != rhs_shape[rank - 2] {
        return Err(KernelError::ShapeMismatch {
            expected: vec![k],
            got: vec![rhs_shape[rank - 2]],
        });
    }

    let batch: usize = lhs_shape[..rank - 2].iter().product();
    let mut out_data = vec![T::zero(); batch * m * n];
    if out_data.is_empty() {
        return Ok(out_data);
    }

    // rhs is [..., K, N], rhs_t is [..., N, K]
    let rhs_t_data = super::cpu_transpose::cpu_transpose(rhs_data, rhs_shape)?;

    out_data
        .as_mut_slice()
        .par_chunks_mut(n)
        .enumerate()
        .for_each(|(global_row_idx, out_row)| {
            let batch_idx = global_row_idx / m;
            let row_in_matrix = global_row_idx % m;

            let a_row_start = batch_idx * m * k + row_in_matrix * k;
            let a_slice = &lhs_data[a_row_start..a_row_start + k];
            let b_t_batch_offset = batch_idx * n * k;

            for (col_in_matrix, out_elem) in out_row.iter_mut().enumerate() {
                let b_t_row_start = b_t_batch_offset + col_in_matrix * k;
                let b_t_slice = &rhs_t_data[b_t_row_start..b_t_row_start + k];

                let mut sum = T::zero();
                for (&val_a, &val_b) in a_slice.iter().zip(b_t_slice.iter()) {
                    sum += val_a * val_b;
                }
                *out_elem = sum;
            }
        });

    Ok(out_data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matmul_simple() {
        let a = vec![1.0, 2.0, 3.0, 4.0]; // 2x2
        let b = vec![5.0, 6.0, 7.0, 8.0]; // 2x2

        let result = cpu_matmul(&a, &b, &[2, 2], &[2, 2]).unwrap();
        // [1*5+2*7, 1*6+2*8] = [19, 22]
        // [3*5+4*7, 3*6+4*8] = [43, 50]
        assert_eq!(result, vec![19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_matmul_rectangular() {
        // [1, 3] x [3, 2]
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0];

        let result = cpu_matmul(&a, &b, &[1, 3], &[3, 2]).unwrap();
        assert_eq!(result, vec![4.0, 5.0]);
    }

    #[test]
    fn test_matmul_batch() {
        let a = vec![
            1.0, 0.0, 0.0, 1.0, // Identity
            2.0, 0.0, 0.0, 2.0, // Scaled Identity
        ];
        let b = vec![
            1.0, 2.0, 3.0, 4.0, // Matrix B1
            5.0, 6.0, 7.0, 8.0, // Matrix B2
        ];

        let result = cpu_matmul(&a, &b, &[2, 2, 2], &[2, 2, 2]).unwrap();
        let expected = vec![1.0, 2.0, 3.0, 4.0, 10.0, 12.0, 14.0, 16.0];
        assert_eq!(result, expected);
    }

    #[test]
    fn test_matmul_shape_mismatch() {
        let a = vec![1.0; 4]; // 2x2
        let b = vec![1.0; 6]; // 3x2

        let err = cpu_matmul(&a, &b, &[2, 2], &[3, 2]);
        assert!(matches!(err, Err(KernelError::ShapeMismatch { .. })));
    }
}
