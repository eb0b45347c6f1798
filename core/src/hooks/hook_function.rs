use super::editing::{EditContext, EditFn, ParameterHandle, SaveContext};
use super::shape::ShapeSpec;
use super::store::ActivationStore;
use crate::distributed::{CollectiveBackend, DistributedTensorBroker};
use crate::error::{FlexError, Result};
use crate::tensor::{Tensor, TensorElem};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Which tensor of a module a hook intercepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum HookType {
    /// The module's output, after it ran.
    #[default]
    Forward,
    /// The module's input, before it runs.
    ForwardPre,
}

/// One instrumentation point: a module, the full shape expected there, and an optional edit.
///
/// ```rust
/// use flex_model::hooks::HookFunction;
///
/// let hook = HookFunction::<f32>::new("mlp.up_proj", &[None, None, Some(64)])
///     .with_editing_function(|x, _ctx| Ok(x.scale(2.0)));
/// assert_eq!(hook.module_name(), "mlp.up_proj");
/// ```
///
/// # Shard axis
///
/// A hook gathers only when told which axis the tensor-parallel layer splits, through
/// [`with_shard_dim`](Self::with_shard_dim). Without it the activation is taken to be
/// replicated: no collective is issued and the rank-local tensor is validated as is, so a
/// wrongly declared size fails instead of being "repaired" by a gather.
#[derive(Clone)]
pub struct HookFunction<T: TensorElem> {
    module_name: String,
    expected_shape: ShapeSpec,
    editing_function: Option<EditFn<T>>,
    parameters: Option<ParameterHandle<T>>,
    shard_dim: Option<usize>,
    hook_type: HookType,
}

impl<T: TensorElem> HookFunction<T> {
    /// `expected_shape` lists the full shape, `None` marking a wildcard.
    pub fn new(module_name: impl Into<String>, expected_shape: &[Option<usize>]) -> Self {
        Self::from_spec(module_name, ShapeSpec::new(expected_shape))
    }

    pub fn from_spec(module_name: impl Into<String>, expected_shape: ShapeSpec) -> Self {
        Self {
            module_name: module_name.into(),
            expected_shape,
            editing_function: None,
            parameters: None,
            shard_dim: None,
            hook_type: HookType::Forward,
        }
    }

    pub fn with_editing_function<F>(mut self, f: F) -> Self
    where
        F: Fn(Tensor<T>, &mut EditContext<'_, T>) -> Result<Tensor<T>> + Send + Sync + 'static,
    {
        self.editing_function = Some(Arc::new(f));
        self
    }

    /// Attaches caller-owned auxiliary parameters, readable from the editing function.
    pub fn with_parameters(mut self, parameters: ParameterHandle<T>) -> Self {
        self.parameters = Some(parameters);
        self
    }

    /// Pins the axis the tensor-parallel layer splits this activation along.
    pub fn with_shard_dim(mut self, dim: usize) -> Self {
        self.shard_dim = Some(dim);
        self
    }

    pub fn with_hook_type(mut self, hook_type: HookType) -> Self {
        self.hook_type = hook_type;
        self
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    pub fn expected_shape(&self) -> &ShapeSpec {
        &self.expected_shape
    }

    pub fn hook_type(&self) -> HookType {
        self.hook_type
    }

    pub fn shard_dim(&self) -> Option<usize> {
        self.shard_dim
    }

    pub fn has_editing_function(&self) -> bool {
        self.editing_function.is_some()
    }

    /// Registration-time checks that do not need the model.
    pub(crate) fn check(&self) -> Result<()> {
        self.expected_shape.check(&self.module_name)?;
        if let Some(dim) = self.shard_dim {
            if dim >= self.expected_shape.len() {
                return Err(FlexError::InvalidShapeSpec {
                    module: self.module_name.clone(),
                    reason: format!(
                        "shard dimension {dim} out of range for rank {}",
                        self.expected_shape.len()
                    ),
                });
            }
        }
        Ok(())
    }

    /// Runs the hook on a rank-local activation and returns the rank-local replacement.
    ///
    /// Gathers the full tensor, validates it, applies the editing function, records the result
    /// in `store` and scatters it back. On a single device both collectives are skipped.
    ///
    /// # Errors
    ///
    /// - `FlexError::ShapeMismatch` when the full tensor disagrees with the declared shape.
    /// - `FlexError::EditShape` when the editing function changes the shape.
    /// - `FlexError::Sharding` or `FlexError::Collective` from the broker.
    pub fn apply<B: CollectiveBackend>(
        &self,
        local: Tensor<T>,
        broker: &DistributedTensorBroker<B>,
        store: &ActivationStore<T>,
        save_ctx: &mut SaveContext<T>,
    ) -> Result<Tensor<T>> {
        let shard_dim = self.resolve_shard_dim(broker.world_size());
        debug!(
            module = %self.module_name,
            local_shape = ?local.shape(),
            ?shard_dim,
            "hook fired"
        );

        let full = match shard_dim {
            Some(dim) => broker.gather(local, dim)?,
            None => {
                if broker.is_distributed() {
                    debug!(module = %self.module_name, "activation replicated, gather skipped");
                }
                local
            }
        };
        self.expected_shape.validate(&self.module_name, full.shape())?;

        let edited = match &self.editing_function {
            Some(edit) => {
                debug!(module = %self.module_name, "applying editing function");
                let before = full.shape().to_vec();
                let guard = self.parameters.as_ref().map(|p| p.read());
                let mut ctx = EditContext::new(&self.module_name, save_ctx, guard.as_deref());
                let out = edit(full, &mut ctx)?;
                if out.shape() != before.as_slice() {
                    return Err(FlexError::EditShape {
                        module: self.module_name.clone(),
                        before,
                        after: out.shape().to_vec(),
                    });
                }
                out
            }
            None => full,
        };

        store.insert(self.module_name.clone(), edited.clone());

        match shard_dim {
            Some(dim) => broker.scatter(edited, dim),
            None => Ok(edited),
        }
    }

    fn resolve_shard_dim(&self, world_size: usize) -> Option<usize> {
        if world_size <= 1 {
            return None;
        }
        self.shard_dim
    }
}

impl<T: TensorElem> fmt::Debug for HookFunction<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookFunction")
            .field("module_name", &self.module_name)
            .field("expected_shape", &self.expected_shape)
            .field("hook_type", &self.hook_type)
            .field("shard_dim", &self.shard_dim)
            .field("editing_function", &self.editing_function.is_some())
            .field("parameters", &self.parameters.is_some())
            .finish()
    }
}
