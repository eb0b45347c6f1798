//! # Distributed Tensor Parallelism
//!
//! Under tensor parallelism every rank holds a slice of each large weight matrix, so the
//! activations flowing between layers are slices too. Hooks want to see (and edit) the whole
//! logical tensor, which means collecting the slices from every rank and cutting the edited
//! result back down afterwards.
//!
//! ## Module Contents
//!
//! *   [`CollectiveBackend`]: the process-group interface (rank, world size, all-gather,
//!     all-reduce). [`SingleProcess`] is the uninitialised one-device group.
//! *   [`CpuBackend`]: a pure Rust ring over channels, one backend per rank thread.
//! *   [`DistributedTensorBroker`]: gather/scatter of activation shards.
//! *   [`TensorParallelLinear`]: a Linear layer holding one rank's shard of its weight.
//! *   [`ParallelConfig`]: the parallel degrees a model was launched with.
//!
//! ## SPMD
//!
//! Every rank runs the same program. Collectives block until all ranks arrive, so every rank
//! must issue the same collectives in the same order. Nothing here checks that.

pub mod backend;
pub mod broker;
pub mod config;
pub mod cpu_backend;
pub mod linear;

pub use backend::{CollectiveBackend, SingleProcess};
pub use broker::DistributedTensorBroker;
pub use config::ParallelConfig;
pub use cpu_backend::{CpuBackend, ShardMessage};
pub use linear::{ParallelStrategy, TensorParallelLinear};
