//! Core Tensor implementation.
//!
//! A [`Tensor`] is a flat, row-major buffer of elements plus a runtime shape. Hook points compare
//! a declared [`ShapeSpec`](crate::hooks::ShapeSpec) against whatever a module happens to emit,
//! so the rank is a runtime property here rather than part of the type.
//!
//! ```rust
//! use flex_model::tensor::Tensor;
//!
//! let data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
//! let tensor = Tensor::<f32>::new(data, vec![2, 3]).unwrap();
//!
//! assert_eq!(tensor.shape(), &[2, 3]);
//! assert_eq!(tensor.rank(), 2);
//! assert_eq!(tensor.data(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
//! ```

use flex_model_kernels::KernelError;
use num_traits::{FromPrimitive, Num, NumAssign, ToPrimitive};
use std::fmt::Debug;
use thiserror::Error;

pub mod ops;

/// Error type for Tensor operations.
#[derive(Error, Debug)]
pub enum TensorError {
    /// The shape of the data does not match the expected shape.
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    /// An index is out of bounds for the given shape.
    #[error("Index out of bounds: index {index:?} for shape {shape:?}")]
    IndexOutOfBounds {
        index: Vec<usize>,
        shape: Vec<usize>,
    },
    /// The requested operation is not supported (e.g., for a specific rank or type).
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

impl From<KernelError> for TensorError {
    fn from(err: KernelError) -> Self {
        match err {
            KernelError::ShapeMismatch { expected, got } => {
                TensorError::ShapeMismatch { expected, got }
            }
            KernelError::DimOutOfRange { dim, rank } => TensorError::IndexOutOfBounds {
                index: vec![dim],
                shape: vec![rank],
            },
            KernelError::SliceOutOfBounds { start, end, size } => TensorError::IndexOutOfBounds {
                index: vec![start, end],
                shape: vec![size],
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, TensorError>;

/// Trait bound for elements that can be stored in a Tensor.
///
/// - `Copy`: elements live in a contiguous `Vec<T>` and are copied freely by the kernels.
/// - `Num + NumAssign`: arithmetic for matmul and element-wise ops.
/// - `FromPrimitive + ToPrimitive`: collectives move shards as `f64` payloads.
/// - `Send + Sync`: kernels run on `rayon`, and ranks run on separate threads.
pub trait TensorElem:
    Num + NumAssign + Copy + Clone + Debug + Send + Sync + FromPrimitive + ToPrimitive + PartialOrd
{
}

impl<T> TensorElem for T where
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

/// An N-dimensional, row-major CPU tensor.
#[derive(Clone, PartialEq)]
pub struct Tensor<T: TensorElem> {
    shape: Vec<usize>,
    data: Vec<T>,
}

impl<T: TensorElem> Tensor<T> {
    /// Creates a new Tensor from a vector of data and a shape.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::ShapeMismatch` if the length of `data` does not match the product of `shape`.
    pub fn new(data: Vec<T>, shape: Vec<usize>) -> Result<Self> {
        let size: usize = shape.iter().product();
        if data.len() != size {
            return Err(TensorError::ShapeMismatch {
                expected: vec![size],
                got: vec![data.len()],
            });
        }

        Ok(Self { shape, data })
    }

    /// Creates a new Tensor filled with zeros.
    pub fn zeros(shape: Vec<usize>) -> Self {
        Self::full(shape, T::zero())
    }

    /// Creates a new Tensor filled with ones.
    pub fn ones(shape: Vec<usize>) -> Self {
        Self::full(shape, T::one())
    }

    /// Creates a new Tensor with every element set to `value`.
    pub fn full(shape: Vec<usize>, value: T) -> Self {
        let size: usize = shape.iter().product();
        Self {
            shape,
            data: vec![value; size],
        }
    }

    /// Creates a new Tensor whose element at flat (row-major) index `i` is `f(i)`.
    pub fn from_fn<F>(shape: Vec<usize>, f: F) -> Self
    where
        F: FnMut(usize) -> T,
    {
        let size: usize = shape.iter().product();
        Self {
            shape,
            data: (0..size).map(f).collect(),
        }
    }

    /// Reshapes the tensor to a new shape.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::ShapeMismatch` if the element count changes.
    pub fn reshape(self, new_shape: Vec<usize>) -> Result<Self> {
        let new_size: usize = new_shape.iter().product();
        if self.data.len() != new_size {
            return Err(TensorError::ShapeMismatch {
                expected: vec![self.data.len()],
                got: vec![new_size],
            });
        }

        Ok(Self {
            shape: new_shape,
            data: self.data,
        })
    }

    /// Returns the shape of the tensor.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Returns the number of dimensions.
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Returns a reference to the underlying data as a slice.
    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// Returns a mutable reference to the underlying data as a slice.
    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Consumes the tensor and returns its flat data.
    pub fn into_data(self) -> Vec<T> {
        self.data
    }

    /// Returns the total number of elements in the tensor.
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

impl<T: TensorElem> Debug for Tensor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("data_len", &self.data.len())
            .finish()
    }
}
