use crate::tensor::{Tensor, TensorElem};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Where hooks deposit the full, post-edit activation of every module they reach.
///
/// A cheap, cloneable handle: the caller keeps one clone and hands another to
/// [`FlexModel::new`](crate::FlexModel::new). Entries are keyed by module name; a later pass
/// overwrites the entry of an earlier one. Nothing is cleared automatically.
#[derive(Debug)]
pub struct ActivationStore<T: TensorElem> {
    inner: Arc<RwLock<HashMap<String, Tensor<T>>>>,
}

impl<T: TensorElem> Clone for ActivationStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: TensorElem> Default for ActivationStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TensorElem> ActivationStore<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Stores `tensor` under `module`, replacing any earlier entry.
    pub fn insert(&self, module: impl Into<String>, tensor: Tensor<T>) {
        self.inner.write().insert(module.into(), tensor);
    }

    /// A copy of the activation captured at `module`.
    pub fn get(&self, module: &str) -> Option<Tensor<T>> {
        self.inner.read().get(module).cloned()
    }

    pub fn remove(&self, module: &str) -> Option<Tensor<T>> {
        self.inner.write().remove(module)
    }

    pub fn contains(&self, module: &str) -> bool {
        self.inner.read().contains_key(module)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn clear(&self) {
        self.inner.write().clear();
    }

    /// Module names with a captured activation, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}
