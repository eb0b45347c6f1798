use crate::error::{FlexError, Result};
use serde::{Deserialize, Serialize};

/// Degrees of parallelism the wrapped model was launched with.
///
/// Only tensor parallelism is reconciled by hooks. Pipeline and data parallel degrees are
/// carried so that a full launch description round-trips through one config file.
///
/// ```rust
/// use flex_model::distributed::ParallelConfig;
///
/// let config = ParallelConfig::tensor_parallel(4);
/// assert_eq!(config.world_size(), 4);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelConfig {
    pub tensor_parallel_size: usize,
    pub pipeline_parallel_size: usize,
    pub data_parallel_size: usize,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self::single_device()
    }
}

impl ParallelConfig {
    pub fn single_device() -> Self {
        Self {
            tensor_parallel_size: 1,
            pipeline_parallel_size: 1,
            data_parallel_size: 1,
        }
    }

    pub fn tensor_parallel(size: usize) -> Self {
        Self {
            tensor_parallel_size: size,
            ..Self::single_device()
        }
    }

    /// Total number of ranks: the product of all parallel degrees.
    pub fn world_size(&self) -> usize {
        self.tensor_parallel_size * self.pipeline_parallel_size * self.data_parallel_size
    }

    /// # Errors
    ///
    /// Returns `FlexError::Config` if any degree is zero.
    pub fn validate(&self) -> Result<()> {
        for (name, size) in [
            ("tensor_parallel_size", self.tensor_parallel_size),
            ("pipeline_parallel_size", self.pipeline_parallel_size),
            ("data_parallel_size", self.data_parallel_size),
        ] {
            if size == 0 {
                return Err(FlexError::Config(format!("{name} must be at least 1")));
            }
        }
        Ok(())
    }
}
