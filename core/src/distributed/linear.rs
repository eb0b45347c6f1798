use super::backend::CollectiveBackend;
use crate::error::{FlexError, Result};
use crate::nn::{ForwardContext, Linear, Module};
use crate::tensor::{Tensor, TensorElem};
use std::fmt;
use std::sync::Arc;

/// Defines how a linear layer is split across devices.
///
/// In Tensor Parallelism, we split the weight matrix $W$ to fit it into memory. Weights are
/// stored `[out_features, in_features]` and the layer computes $Y = X W^T$.
///
/// ## Column Parallelism
/// We split $W$ along the output dimension: $W = [W_1; W_2]$.
/// $$
/// Y = [X W_1^T | X W_2^T] = [Y_1 | Y_2]
/// $$
/// - Each rank computes a slice of the *output features*.
/// - **Communication**: None in forward pass. All-Gather needed if we want full $Y$.
///
/// ## Row Parallelism
/// We split $W$ along the input dimension: $W = [W_1 | W_2]$.
/// We must also split $X$ along its last axis: $X = [X_1 | X_2]$.
/// $$
/// Y = X_1 W_1^T + X_2 W_2^T = Y_1 + Y_2
/// $$
/// - Each rank computes a *partial sum* of the output.
/// - **Communication**: **All-Reduce (Sum)** is required to get the final $Y$.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParallelStrategy {
    /// Input replicated, output sharded on the last axis.
    Column,

    /// Input sharded on the last axis, output replicated after the all-reduce.
    Row,
}

/// A Linear layer with Tensor Parallelism support.
///
/// Holds this rank's shard of the weight. A column layer followed by a row layer needs no
/// communication between them, which is the Megatron MLP layout used by
/// [`ParallelMlp`](crate::models::ParallelMlp).
pub struct TensorParallelLinear<T: TensorElem, B: CollectiveBackend> {
    local: Linear<T>,
    /// Row strategy only: the full bias, added once after the reduction.
    reduced_bias: Option<Tensor<T>>,
    strategy: ParallelStrategy,
    backend: Arc<B>,
}

impl<T: TensorElem, B: CollectiveBackend> TensorParallelLinear<T, B> {
    /// Cuts this rank's shard out of a full, replicated layer.
    ///
    /// # Errors
    ///
    /// Returns `FlexError::Sharding` when the split dimension is not divisible by the world size.
    pub fn from_full(full: &Linear<T>, strategy: ParallelStrategy, backend: Arc<B>) -> Result<Self> {
        let world_size = if backend.is_initialized() {
            backend.world_size().max(1)
        } else {
            1
        };
        let rank = if world_size > 1 { backend.rank() } else { 0 };

        let dim = match strategy {
            ParallelStrategy::Column => 0,
            ParallelStrategy::Row => 1,
        };
        let size = full.weight.shape()[dim];
        if size % world_size != 0 {
            return Err(FlexError::Sharding {
                dim,
                size,
                world_size,
            });
        }
        let len = size / world_size;
        let weight = full.weight.narrow(dim, rank * len, len)?;

        let (local, reduced_bias) = match strategy {
            ParallelStrategy::Column => {
                let bias = match &full.bias {
                    Some(b) => Some(b.narrow(0, rank * len, len)?),
                    None => None,
                };
                (Linear::new(weight, bias)?, None)
            }
            ParallelStrategy::Row => (Linear::new(weight, None)?, full.bias.clone()),
        };

        Ok(Self {
            local,
            reduced_bias,
            strategy,
            backend,
        })
    }

    pub fn strategy(&self) -> ParallelStrategy {
        self.strategy
    }

    /// This rank's shard.
    pub fn local(&self) -> &Linear<T> {
        &self.local
    }

    /// - **Column Parallel**: Computes $X W_i^T + b_i$. No communication.
    /// - **Row Parallel**: Computes $X_i W_i^T$, performs **All-Reduce Sum**, then adds $b$.
    pub fn apply(&self, x: &Tensor<T>) -> Result<Tensor<T>> {
        let output = self.local.apply(x)?;
        match self.strategy {
            ParallelStrategy::Column => Ok(output),
            ParallelStrategy::Row => {
                let reduced = if self.backend.is_initialized() && self.backend.world_size() > 1 {
                    self.backend.all_reduce_sum(&output)?
                } else {
                    output
                };
                Ok(match &self.reduced_bias {
                    Some(bias) => Linear::add_bias(reduced, bias),
                    None => reduced,
                })
            }
        }
    }
}

impl<T: TensorElem, B: CollectiveBackend> fmt::Debug for TensorParallelLinear<T, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TensorParallelLinear")
            .field("strategy", &self.strategy)
            .field("weight", &self.local.weight)
            .field("rank", &self.backend.rank())
            .finish()
    }
}

impl<T: TensorElem, B: CollectiveBackend> Module<T> for TensorParallelLinear<T, B> {
    fn forward(&self, input: &Tensor<T>, _ctx: &mut ForwardContext<'_, T>) -> Result<Tensor<T>> {
        self.apply(input)
    }
}
