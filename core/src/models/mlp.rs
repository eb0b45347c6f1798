use crate::distributed::{CollectiveBackend, ParallelStrategy, TensorParallelLinear};
use crate::error::Result;
use crate::nn::{Activation, ForwardContext, Linear, Module};
use crate::tensor::{Tensor, TensorElem};
use rand::Rng;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MlpConfig {
    pub hidden_size: usize,
    pub intermediate_size: usize,
    pub activation: Activation,
    pub bias: bool,
}

impl MlpConfig {
    pub fn new(hidden_size: usize, intermediate_size: usize) -> Self {
        Self {
            hidden_size,
            intermediate_size,
            activation: Activation::Gelu,
            bias: true,
        }
    }
}

/// Megatron-style feed-forward block: column-parallel `up_proj`, activation, row-parallel
/// `down_proj`.
///
/// Between the two projections the activation is sharded on its last axis, one
/// `intermediate_size / world_size` slice per rank. The block's output is replicated.
///
/// Hookable children: `up_proj`, `act`, `down_proj`.
#[derive(Debug)]
pub struct ParallelMlp<T: TensorElem, B: CollectiveBackend> {
    pub up_proj: TensorParallelLinear<T, B>,
    pub act: Activation,
    pub down_proj: TensorParallelLinear<T, B>,
}

impl<T: TensorElem, B: CollectiveBackend> ParallelMlp<T, B> {
    /// Shards a full `up_proj` / `down_proj` pair for the backend's rank.
    pub fn from_full(up_proj: &Linear<T>, act: Activation, down_proj: &Linear<T>, backend: Arc<B>) -> Result<Self> {
        Ok(Self {
            up_proj: TensorParallelLinear::from_full(up_proj, ParallelStrategy::Column, Arc::clone(&backend))?,
            act,
            down_proj: TensorParallelLinear::from_full(down_proj, ParallelStrategy::Row, backend)?,
        })
    }

    /// Draws full weights from `rng`, then keeps this rank's shard. Ranks that seed `rng`
    /// identically hold consistent shards of the same block.
    pub fn init<R: Rng + ?Sized>(config: &MlpConfig, rng: &mut R, backend: Arc<B>) -> Result<Self> {
        let up_proj = Linear::init(config.hidden_size, config.intermediate_size, config.bias, rng);
        let down_proj = Linear::init(config.intermediate_size, config.hidden_size, config.bias, rng);
        Self::from_full(&up_proj, config.activation, &down_proj, backend)
    }
}

impl<T: TensorElem, B: CollectiveBackend> Module<T> for ParallelMlp<T, B> {
    fn forward(&self, input: &Tensor<T>, ctx: &mut ForwardContext<'_, T>) -> Result<Tensor<T>> {
        let x = ctx.call("up_proj", &self.up_proj, input)?;
        let x = ctx.call("act", &self.act, &x)?;
        ctx.call("down_proj", &self.down_proj, &x)
    }

    fn named_children(&self) -> Vec<(String, &dyn Module<T>)> {
        vec![
            ("up_proj".to_string(), &self.up_proj as &dyn Module<T>),
            ("act".to_string(), &self.act as &dyn Module<T>),
            ("down_proj".to_string(), &self.down_proj as &dyn Module<T>),
        ]
    }
}
