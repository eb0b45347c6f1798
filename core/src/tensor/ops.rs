//! Tensor operations.
//!
//! Element-wise arithmetic, matrix multiplication and the dimension-wise slicing that tensor
//! parallelism needs (`narrow`, `cat`, `chunk`). Heavy loops live in `flex-model-kernels` and run
//! on `rayon`.
//!
//! Shapes must match exactly for element-wise operations; there is no broadcasting.
//!
//! ```rust
//! use flex_model::tensor::Tensor;
//!
//! let a = Tensor::<f32>::new(vec![1.0, 2.0], vec![2]).unwrap();
//! let b = Tensor::<f32>::new(vec![3.0, 4.0], vec![2]).unwrap();
//!
//! let c = (&a + &b).unwrap();
//! assert_eq!(c.data(), &[4.0, 6.0]);
//! ```

use super::{Result, Tensor, TensorElem, TensorError};
use flex_model_kernels::{cpu_concat, cpu_matmul, cpu_narrow, cpu_transpose};

use rayon::prelude::*;
use std::ops::{Add, Div, Mul, Sub};

/// Implements a binary arithmetic operation trait (e.g., `Add`, `Sub`) for `&Tensor`.
///
/// Checks shape equality, then runs the element-wise operation in parallel.
macro_rules! impl_bin_op {
    ($trait:ident, $method:ident) => {
        impl<T> $trait for &Tensor<T>
        where
            T: TensorElem,
        {
            type Output = Result<Tensor<T>>;

            fn $method(self, rhs: Self) -> Self::Output {
                if self.shape != rhs.shape {
                    return Err(TensorError::ShapeMismatch {
                        expected: self.shape.clone(),
                        got: rhs.shape.clone(),
                    });
                }

                let mut out = Tensor::zeros(self.shape.clone());
                out.data
                    .par_iter_mut()
                    .zip(self.data.par_iter())
                    .zip(rhs.data.par_iter())
                    .for_each(|((o, a), b)| {
                        *o = a.$method(*b);
                    });

                Ok(out)
            }
        }
    };
}

impl_bin_op!(Add, add);
impl_bin_op!(Sub, sub);
impl_bin_op!(Mul, mul);
impl_bin_op!(Div, div);

impl<T: TensorElem> Tensor<T> {
    /// Applies a function element-wise to the tensor.
    ///
    /// ```rust
    /// use flex_model::tensor::Tensor;
    /// let t = Tensor::<f32>::new(vec![1.0, 2.0, 3.0], vec![3]).unwrap();
    /// let squared = t.map(|x| x * x);
    /// assert_eq!(squared.data(), &[1.0, 4.0, 9.0]);
    /// ```
    pub fn map<F>(&self, f: F) -> Self
    where
        F: Fn(T) -> T + Sync + Send,
    {
        let mut out = Tensor::zeros(self.shape.clone());
        out.data
            .par_iter_mut()
            .zip(self.data.par_iter())
            .for_each(|(o, i)| *o = f(*i));
        out
    }

    /// Multiplies every element by `factor`.
    pub fn scale(&self, factor: T) -> Self {
        self.map(|x| x * factor)
    }

    /// Matrix multiplication over the last two dimensions: `[..., M, K] x [..., K, N] -> [..., M, N]`.
    ///
    /// Leading dimensions must match exactly and are treated as a batch.
    pub fn matmul(&self, rhs: &Self) -> Result<Self> {
        let rank = self.rank();
        if rank < 2 {
            return Err(TensorError::Unsupported(format!(
                "matmul requires rank >= 2, got rank {rank}"
            )));
        }

        let data = cpu_matmul(&self.data, &rhs.data, &self.shape, &rhs.shape)?;
        let mut shape = self.shape.clone();
        shape[rank - 1] = rhs.shape[rank - 1];
        Tensor::new(data, shape)
    }

    /// Swaps the last two dimensions.
    pub fn transpose(&self) -> Result<Self> {
        let rank = self.rank();
        if rank < 2 {
            return Err(TensorError::Unsupported(format!(
                "transpose requires rank >= 2, got rank {rank}"
            )));
        }

        let data = cpu_transpose(&self.data, &self.shape)?;
        let mut shape = self.shape.clone();
        shape.swap(rank - 1, rank - 2);
        Tensor::new(data, shape)
    }

    /// Returns the contiguous slice `start..start + len` of dimension `dim`.
    pub fn narrow(&self, dim: usize, start: usize, len: usize) -> Result<Self> {
        let data = cpu_narrow(&self.data, &self.shape, dim, start, len)?;
        let mut shape = self.shape.clone();
        shape[dim] = len;
        Tensor::new(data, shape)
    }

    /// Concatenates equally shaped tensors along `dim`.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::ShapeMismatch` if the parts do not all share one shape, and
    /// `TensorError::Unsupported` if `parts` is empty.
    pub fn cat(parts: &[Self], dim: usize) -> Result<Self> {
        let first = parts
            .first()
            .ok_or_else(|| TensorError::Unsupported("cat of zero tensors".to_string()))?;
        if let Some(odd) = parts.iter().find(|p| p.shape != first.shape) {
            return Err(TensorError::ShapeMismatch {
                expected: first.shape.clone(),
                got: odd.shape.clone(),
            });
        }

        let views: Vec<&[T]> = parts.iter().map(|p| p.data.as_slice()).collect();
        let data = cpu_concat(&views, &first.shape, dim)?;
        let mut shape = first.shape.clone();
        shape[dim] *= parts.len();
        Tensor::new(data, shape)
    }

    /// Splits the tensor into `n` equal contiguous chunks along `dim`.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::ShapeMismatch` when `shape[dim]` is not divisible by `n`.
    pub fn chunk(&self, n: usize, dim: usize) -> Result<Vec<Self>> {
        if dim >= self.rank() {
            return Err(TensorError::IndexOutOfBounds {
                index: vec![dim],
                shape: self.shape.clone(),
            });
        }
        let size = self.shape[dim];
        if n == 0 || size % n != 0 {
            return Err(TensorError::ShapeMismatch {
                expected: vec![n],
                got: vec![size],
            });
        }

        let len = size / n;
        (0..n).map(|i| self.narrow(dim, i * len, len)).collect()
    }

    /// Returns true when shapes match and every element differs by at most `tol`.
    pub fn allclose(&self, other: &Self, tol: f64) -> bool {
        self.shape == other.shape
            && self.data.iter().zip(other.data.iter()).all(|(a, b)| {
                match (a.to_f64(), b.to_f64()) {
                    (Some(a), Some(b)) => (a - b).abs() <= tol,
                    _ => false,
                }
            })
    }
}
