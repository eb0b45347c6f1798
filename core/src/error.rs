//! Crate-wide error type.
//!
//! Every error aborts the forward pass it occurs in. None of them is retried or recovered
//! locally: a half-edited, half-gathered pass has no meaningful continuation.

use crate::hooks::ShapeSpec;
use crate::tensor::TensorError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlexError {
    /// The module name does not resolve to any submodule of the wrapped model.
    #[error("module `{module}` not found in the wrapped model")]
    ModuleNotFound { module: String },

    /// The module name resolves to more than one submodule.
    #[error("module name `{module}` is ambiguous ({matches} submodules share it)")]
    AmbiguousModule { module: String, matches: usize },

    /// The declared shape cannot describe any tensor (e.g. a fixed dimension of zero).
    #[error("invalid shape spec for `{module}`: {reason}")]
    InvalidShapeSpec { module: String, reason: String },

    /// A tensor cannot be split into (or assembled from) equal per-rank shards.
    #[error("cannot shard dimension {dim} of size {size} across {world_size} ranks")]
    Sharding {
        dim: usize,
        size: usize,
        world_size: usize,
    },

    /// The reconstructed activation disagrees with the fixed entries of its declared shape.
    #[error("shape mismatch at `{module}`: expected {expected}, observed {observed:?}")]
    ShapeMismatch {
        module: String,
        expected: ShapeSpec,
        observed: Vec<usize>,
    },

    /// An editing function changed the shape of an activation that feeds back into the model.
    #[error("editing function at `{module}` changed shape {before:?} -> {after:?}")]
    EditShape {
        module: String,
        before: Vec<usize>,
        after: Vec<usize>,
    },

    /// The collective substrate failed (e.g. a peer hung up).
    #[error("collective failure: {0}")]
    Collective(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Tensor(#[from] TensorError),
}

impl FlexError {
    /// True for errors raised at hook registration time rather than during a forward pass.
    pub fn is_registration_error(&self) -> bool {
        matches!(
            self,
            FlexError::ModuleNotFound { .. }
                | FlexError::AmbiguousModule { .. }
                | FlexError::InvalidShapeSpec { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FlexError>;
