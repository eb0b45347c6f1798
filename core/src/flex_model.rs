use crate::distributed::{CollectiveBackend, DistributedTensorBroker, ParallelConfig, SingleProcess};
use crate::error::{FlexError, Result};
use crate::hooks::{ActivationStore, HookFunction, HookType, SaveContext};
use crate::nn::{ForwardContext, Interceptor, Module, named_modules, resolve_module};
use crate::tensor::{Tensor, TensorElem};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Wraps a model and routes the activations of registered modules through hook functions.
///
/// The model itself is never modified. Hooks only take effect inside
/// [`run_forward`](Self::run_forward); calling `forward` on the model directly (for instance
/// through the `Arc` the caller kept) runs it pristine, before, during and after the wrapper's
/// lifetime.
///
/// ```rust
/// use flex_model::hooks::{ActivationStore, HookFunction};
/// use flex_model::nn::{Activation, Linear, Sequential};
/// use flex_model::tensor::Tensor;
/// use flex_model::FlexModel;
/// use std::sync::Arc;
///
/// let model = Sequential::<f32>::default()
///     .push(Linear::new(Tensor::ones(vec![4, 2]), None).unwrap())
///     .push(Activation::Relu);
///
/// let store = ActivationStore::new();
/// let mut flex = FlexModel::new(Arc::new(model), store.clone());
/// flex.register_hook_function(HookFunction::new("0", &[None, Some(4)])).unwrap();
///
/// let y = flex.run_forward(&Tensor::ones(vec![3, 2])).unwrap();
/// assert_eq!(y.shape(), &[3, 4]);
/// assert_eq!(store.get("0").unwrap().shape(), &[3, 4]);
/// ```
///
/// # Distributed use
///
/// Build one `FlexModel` per rank with [`distributed`](Self::distributed). Every rank must
/// register the same hooks in the same order and run the same forward passes, or the gathers
/// inside the hooks deadlock.
pub struct FlexModel<T, M, B = SingleProcess>
where
    T: TensorElem,
    M: Module<T>,
    B: CollectiveBackend,
{
    model: Arc<M>,
    store: ActivationStore<T>,
    hooks: HashMap<String, HookFunction<T>>,
    broker: DistributedTensorBroker<B>,
    config: ParallelConfig,
    save_ctx: SaveContext<T>,
}

impl<T: TensorElem, M: Module<T>> FlexModel<T, M, SingleProcess> {
    /// Wraps `model` for single-device use. Activations land in `store`.
    pub fn new(model: Arc<M>, store: ActivationStore<T>) -> Self {
        Self::build(
            model,
            store,
            Arc::new(SingleProcess),
            ParallelConfig::single_device(),
        )
    }
}

impl<T: TensorElem, M: Module<T>, B: CollectiveBackend> FlexModel<T, M, B> {
    /// Wraps this rank's copy of a tensor-parallel model.
    pub fn distributed(model: Arc<M>, store: ActivationStore<T>, backend: Arc<B>) -> Self {
        let tp = if backend.is_initialized() {
            backend.world_size().max(1)
        } else {
            1
        };
        Self::build(model, store, backend, ParallelConfig::tensor_parallel(tp))
    }

    /// Like [`distributed`](Self::distributed), checked against a launch configuration.
    ///
    /// # Errors
    ///
    /// Returns `FlexError::Config` when `config` is invalid or its tensor-parallel degree differs
    /// from the backend's world size.
    pub fn with_config(
        model: Arc<M>,
        store: ActivationStore<T>,
        backend: Arc<B>,
        config: ParallelConfig,
    ) -> Result<Self> {
        config.validate()?;
        let world_size = if backend.is_initialized() {
            backend.world_size()
        } else {
            1
        };
        if world_size != config.tensor_parallel_size {
            return Err(FlexError::Config(format!(
                "tensor_parallel_size is {} but the process group has {world_size} ranks",
                config.tensor_parallel_size
            )));
        }
        Ok(Self::build(model, store, backend, config))
    }

    fn build(model: Arc<M>, store: ActivationStore<T>, backend: Arc<B>, config: ParallelConfig) -> Self {
        Self {
            model,
            store,
            hooks: HashMap::new(),
            broker: DistributedTensorBroker::new(backend),
            config,
            save_ctx: SaveContext::new(),
        }
    }

    /// Registers `hook` at its module, replacing any hook already registered there.
    ///
    /// # Errors
    ///
    /// Fails immediately (nothing is registered) when the module name does not resolve to
    /// exactly one submodule or the hook's shape spec is malformed.
    pub fn register_hook_function(&mut self, hook: HookFunction<T>) -> Result<()> {
        resolve_module(&*self.model, hook.module_name())?;
        hook.check()?;

        let module = hook.module_name().to_string();
        let replaced = self.hooks.insert(module.clone(), hook).is_some();
        info!(%module, replaced, "registered hook function");
        Ok(())
    }

    /// Removes the hook at `module_name` and returns it. The module runs uninstrumented again.
    pub fn unregister_hook_function(&mut self, module_name: &str) -> Option<HookFunction<T>> {
        let removed = self.hooks.remove(module_name);
        if removed.is_some() {
            info!(module = %module_name, "unregistered hook function");
        }
        removed
    }

    /// Runs the wrapped model on `inputs` with every registered hook active.
    ///
    /// Every registered module the pass reaches gets one entry in the activation store.
    ///
    /// # Errors
    ///
    /// Any hook failure aborts the whole pass and is returned unchanged.
    pub fn run_forward(&mut self, inputs: &Tensor<T>) -> Result<Tensor<T>> {
        if self.hooks.is_empty() {
            return self.model.forward(inputs, &mut ForwardContext::new());
        }

        let mut interceptor = HookInterceptor {
            hooks: &self.hooks,
            broker: &self.broker,
            store: &self.store,
            save_ctx: &mut self.save_ctx,
        };
        let mut ctx = ForwardContext::with_interceptor(&mut interceptor);
        self.model.forward(inputs, &mut ctx)
    }

    /// Drops every hook and hands back the model.
    ///
    /// Nothing was ever installed into the model, so this is only a convenience for recovering
    /// the `Arc`. Dropping the wrapper leaves the model just as pristine.
    pub fn teardown(self) -> Arc<M> {
        info!(count = self.hooks.len(), "teardown");
        self.model
    }

    /// Registered module names, sorted.
    pub fn hook_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.hooks.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_registered(&self, module_name: &str) -> bool {
        self.hooks.contains_key(module_name)
    }

    pub fn hook(&self, module_name: &str) -> Option<&HookFunction<T>> {
        self.hooks.get(module_name)
    }

    /// Every hookable module path of the wrapped model.
    pub fn module_names(&self) -> Vec<String> {
        named_modules(&*self.model)
    }

    pub fn model(&self) -> &Arc<M> {
        &self.model
    }

    pub fn activation_store(&self) -> &ActivationStore<T> {
        &self.store
    }

    /// Tensors saved by editing functions.
    pub fn save_ctx(&self) -> &SaveContext<T> {
        &self.save_ctx
    }

    pub fn save_ctx_mut(&mut self) -> &mut SaveContext<T> {
        &mut self.save_ctx
    }

    pub fn broker(&self) -> &DistributedTensorBroker<B> {
        &self.broker
    }

    pub fn config(&self) -> &ParallelConfig {
        &self.config
    }
}

/// Dispatches module boundaries to the hooks registered for them.
struct HookInterceptor<'h, T: TensorElem, B: CollectiveBackend> {
    hooks: &'h HashMap<String, HookFunction<T>>,
    broker: &'h DistributedTensorBroker<B>,
    store: &'h ActivationStore<T>,
    save_ctx: &'h mut SaveContext<T>,
}

impl<'h, T: TensorElem, B: CollectiveBackend> HookInterceptor<'h, T, B> {
    fn hook_for(&self, path: &str, hook_type: HookType) -> Option<&'h HookFunction<T>> {
        let hooks: &'h HashMap<String, HookFunction<T>> = self.hooks;
        hooks.get(path).filter(|hook| hook.hook_type() == hook_type)
    }
}

impl<T: TensorElem, B: CollectiveBackend> Interceptor<T> for HookInterceptor<'_, T, B> {
    fn before_forward(&mut self, path: &str, input: &Tensor<T>) -> Result<Option<Tensor<T>>> {
        let Some(hook) = self.hook_for(path, HookType::ForwardPre) else {
            return Ok(None);
        };
        hook.apply(input.clone(), self.broker, self.store, self.save_ctx).map(Some)
    }

    fn after_forward(&mut self, path: &str, output: Tensor<T>) -> Result<Tensor<T>> {
        match self.hook_for(path, HookType::Forward) {
            Some(hook) => hook.apply(output, self.broker, self.store, self.save_ctx),
            None => Ok(output),
        }
    }
}
