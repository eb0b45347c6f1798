use crate::error::Result;
use crate::nn::{ForwardContext, Module};
use crate::tensor::{Tensor, TensorElem};

/// Runs its layers in order. Children are addressed by index: `0`, `1`, ...
#[derive(Debug)]
pub struct Sequential<T: TensorElem> {
    layers: Vec<Box<dyn Module<T>>>,
}

impl<T: TensorElem> Sequential<T> {
    pub fn new(layers: Vec<Box<dyn Module<T>>>) -> Self {
        Self { layers }
    }

    /// Appends a layer and returns `self` for chaining.
    pub fn push<M: Module<T> + 'static>(mut self, layer: M) -> Self {
        self.layers.push(Box::new(layer));
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl<T: TensorElem> Default for Sequential<T> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl<T: TensorElem> Module<T> for Sequential<T> {
    fn forward(&self, input: &Tensor<T>, ctx: &mut ForwardContext<'_, T>) -> Result<Tensor<T>> {
        let mut x = input.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            x = ctx.call(&i.to_string(), layer.as_ref(), &x)?;
        }
        Ok(x)
    }

    fn named_children(&self) -> Vec<(String, &dyn Module<T>)> {
        self.layers
            .iter()
            .enumerate()
            .map(|(i, layer)| (i.to_string(), layer.as_ref()))
            .collect()
    }
}
