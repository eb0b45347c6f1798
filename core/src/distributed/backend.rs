use crate::error::Result;
use crate::tensor::{Tensor, TensorElem};
use std::fmt::Debug;
use std::sync::Arc;

/// Abstraction for a distributed communication backend (the process group).
///
/// Every method that communicates is a blocking collective: all ranks of the group must call
/// the same collectives in the same order, or the group deadlocks. Backends cannot detect a
/// divergent call sequence.
pub trait CollectiveBackend: Debug + Send + Sync {
    /// Returns the rank of the current process/thread.
    fn rank(&self) -> usize;

    /// Returns the total number of processes/threads.
    fn world_size(&self) -> usize;

    /// Whether a process group actually exists. Collectives must not be issued otherwise.
    fn is_initialized(&self) -> bool {
        true
    }

    /// Performs an All-Reduce sum on the given tensor.
    fn all_reduce_sum<T: TensorElem>(&self, tensor: &Tensor<T>) -> Result<Tensor<T>>;

    /// Concatenates every rank's `tensor` along `dim`, in rank order, and returns the result
    /// on every rank.
    fn all_gather<T: TensorElem>(&self, tensor: &Tensor<T>, dim: usize) -> Result<Tensor<T>>;
}

impl<B: CollectiveBackend> CollectiveBackend for Arc<B> {
    fn rank(&self) -> usize {
        (**self).rank()
    }

    fn world_size(&self) -> usize {
        (**self).world_size()
    }

    fn is_initialized(&self) -> bool {
        (**self).is_initialized()
    }

    fn all_reduce_sum<T: TensorElem>(&self, tensor: &Tensor<T>) -> Result<Tensor<T>> {
        (**self).all_reduce_sum(tensor)
    }

    fn all_gather<T: TensorElem>(&self, tensor: &Tensor<T>, dim: usize) -> Result<Tensor<T>> {
        (**self).all_gather(tensor, dim)
    }
}

/// The single-device case: no process group exists.
///
/// Rank 0 of a world of one. Collectives are identities so that code written for the
/// distributed case runs unchanged on one device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SingleProcess;

impl CollectiveBackend for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn world_size(&self) -> usize {
        1
    }

    fn is_initialized(&self) -> bool {
        false
    }

    fn all_reduce_sum<T: TensorElem>(&self, tensor: &Tensor<T>) -> Result<Tensor<T>> {
        Ok(tensor.clone())
    }

    fn all_gather<T: TensorElem>(&self, tensor: &Tensor<T>, _dim: usize) -> Result<Tensor<T>> {
        Ok(tensor.clone())
    }
}
