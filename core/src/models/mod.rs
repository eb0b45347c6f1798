//! Ready-made tensor-parallel blocks to instrument.

pub mod mlp;

pub use mlp::{MlpConfig, ParallelMlp};
