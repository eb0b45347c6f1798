//! Editing functions and the state they may touch.
//!
//! An editing function receives the full activation by value and returns its replacement.
//! Besides the tensor it sees an [`EditContext`]: the name of the module it runs for, a
//! [`SaveContext`] it can stash tensors into, and (optionally) a read-only view of
//! caller-owned auxiliary parameters.

use crate::error::Result;
use crate::tensor::{Tensor, TensorElem};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// `Fn(activation, ctx) -> edited activation`. Must preserve the activation's shape.
pub type EditFn<T> =
    Arc<dyn Fn(Tensor<T>, &mut EditContext<'_, T>) -> Result<Tensor<T>> + Send + Sync>;

/// Tensors saved by editing functions during forward passes, kept by the owning
/// [`FlexModel`](crate::FlexModel) until the caller takes them.
#[derive(Debug, Default)]
pub struct SaveContext<T: TensorElem> {
    saved: HashMap<String, Tensor<T>>,
}

impl<T: TensorElem> SaveContext<T> {
    pub fn new() -> Self {
        Self {
            saved: HashMap::new(),
        }
    }

    /// Saves `tensor` under `key`, replacing any earlier value.
    pub fn save(&mut self, key: impl Into<String>, tensor: Tensor<T>) {
        self.saved.insert(key.into(), tensor);
    }

    pub fn get(&self, key: &str) -> Option<&Tensor<T>> {
        self.saved.get(key)
    }

    pub fn take(&mut self, key: &str) -> Option<Tensor<T>> {
        self.saved.remove(key)
    }

    pub fn len(&self) -> usize {
        self.saved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.saved.is_empty()
    }

    pub fn clear(&mut self) {
        self.saved.clear();
    }
}

/// Named tensors an editing function may read, e.g. a steering vector or classifier weights.
#[derive(Debug, Clone, Default)]
pub struct ParameterSet<T: TensorElem> {
    params: HashMap<String, Tensor<T>>,
}

impl<T: TensorElem> ParameterSet<T> {
    pub fn new() -> Self {
        Self {
            params: HashMap::new(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor<T>) {
        self.params.insert(name.into(), tensor);
    }

    pub fn get(&self, name: &str) -> Option<&Tensor<T>> {
        self.params.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Tensor<T>> {
        self.params.get_mut(name)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Wraps the set in a shareable handle.
    pub fn into_handle(self) -> ParameterHandle<T> {
        Arc::new(RwLock::new(self))
    }
}

/// Caller-owned parameters shared with a hook. The hook only ever takes a read lock, and only
/// for the duration of one editing call; the caller may update them between passes.
pub type ParameterHandle<T> = Arc<RwLock<ParameterSet<T>>>;

/// Everything an editing function can see besides the activation itself.
pub struct EditContext<'a, T: TensorElem> {
    module_name: &'a str,
    save_ctx: &'a mut SaveContext<T>,
    parameters: Option<&'a ParameterSet<T>>,
}

impl<'a, T: TensorElem> EditContext<'a, T> {
    pub fn new(
        module_name: &'a str,
        save_ctx: &'a mut SaveContext<T>,
        parameters: Option<&'a ParameterSet<T>>,
    ) -> Self {
        Self {
            module_name,
            save_ctx,
            parameters,
        }
    }

    /// Dotted path of the module being edited.
    pub fn module_name(&self) -> &str {
        self.module_name
    }

    pub fn save_ctx(&mut self) -> &mut SaveContext<T> {
        self.save_ctx
    }

    pub fn parameters(&self) -> Option<&ParameterSet<T>> {
        self.parameters
    }

    /// Shorthand for `parameters().and_then(|p| p.get(name))`.
    pub fn parameter(&self, name: &str) -> Option<&Tensor<T>> {
        self.parameters.and_then(|p| p.get(name))
    }
}
