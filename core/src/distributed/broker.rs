use super::backend::CollectiveBackend;
use crate::error::{FlexError, Result};
use crate::tensor::{Tensor, TensorElem, TensorError};
use std::sync::Arc;
use tracing::debug;

/// Reconciles per-rank shards of one logical tensor.
///
/// `gather` turns a rank-local shard into the full tensor (replicated on every rank) and
/// `scatter` cuts a full tensor back down to the calling rank's shard. Shards are contiguous,
/// equal-sized slices along the shard dimension, ordered by rank, which is how a
/// column-parallel layer lays out its output.
///
/// The broker caches rank and world size when it is built. If the backend reports no
/// initialised process group, it behaves as rank 0 of a world of one and never issues a
/// collective.
///
/// # Ordering
///
/// `gather` is a blocking collective. Every rank must gather the same activations in the same
/// order; that holds when all ranks run the same model with the same hooks registered. A
/// divergent sequence deadlocks inside the backend and is not detected here.
#[derive(Debug)]
pub struct DistributedTensorBroker<B: CollectiveBackend> {
    backend: Arc<B>,
    rank: usize,
    world_size: usize,
}

impl<B: CollectiveBackend> DistributedTensorBroker<B> {
    pub fn new(backend: Arc<B>) -> Self {
        let (rank, world_size) = if backend.is_initialized() {
            (backend.rank(), backend.world_size().max(1))
        } else {
            (0, 1)
        };
        Self {
            backend,
            rank,
            world_size,
        }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Whether collectives are actually issued.
    pub fn is_distributed(&self) -> bool {
        self.world_size > 1
    }

    /// All-gathers `local_shard` along `shard_dim` and returns the full tensor.
    ///
    /// Identity on a single device.
    ///
    /// # Errors
    ///
    /// Returns `FlexError::Sharding` when the ranks' shards do not all share one shape.
    pub fn gather<T: TensorElem>(&self, local_shard: Tensor<T>, shard_dim: usize) -> Result<Tensor<T>> {
        check_dim(&local_shard, shard_dim)?;
        if !self.is_distributed() {
            debug!(shard_dim, "single device, gather skipped");
            return Ok(local_shard);
        }
        self.backend.all_gather(&local_shard, shard_dim)
    }

    /// Returns the calling rank's contiguous slice of `full_tensor` along `shard_dim`.
    ///
    /// Purely local: no communication is needed because every rank holds the same full tensor.
    /// Identity on a single device.
    ///
    /// # Errors
    ///
    /// Returns `FlexError::Sharding` when `full_tensor.shape()[shard_dim]` is not divisible by
    /// the world size. Uneven shards are never padded or truncated.
    pub fn scatter<T: TensorElem>(&self, full_tensor: Tensor<T>, shard_dim: usize) -> Result<Tensor<T>> {
        check_dim(&full_tensor, shard_dim)?;
        if !self.is_distributed() {
            return Ok(full_tensor);
        }

        let size = full_tensor.shape()[shard_dim];
        if size % self.world_size != 0 {
            return Err(FlexError::Sharding {
                dim: shard_dim,
                size,
                world_size: self.world_size,
            });
        }
        let len = size / self.world_size;
        Ok(full_tensor.narrow(shard_dim, self.rank * len, len)?)
    }
}

fn check_dim<T: TensorElem>(tensor: &Tensor<T>, dim: usize) -> Result<()> {
    if dim >= tensor.rank() {
        return Err(TensorError::IndexOutOfBounds {
            index: vec![dim],
            shape: tensor.shape().to_vec(),
        }
        .into());
    }
    Ok(())
}
