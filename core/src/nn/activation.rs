//! Activation Functions.
//!
//! - **ReLU**: $f(x) = \max(0, x)$.
//! - **GELU**: Gaussian Error Linear Unit (tanh approximation). Used in **GPT-2**, **BERT**.
//! - **SiLU** (Swish): $x \cdot \sigma(x)$. Used in **Llama**, **Gemma**.

use crate::error::Result;
use crate::nn::{ForwardContext, Module};
use crate::tensor::{Tensor, TensorElem};

/// Computes the SiLU (Sigmoid Linear Unit) activation function.
///
/// $$ \text{SiLU}(x) = x \cdot \sigma(x) = \frac{x}{1 + e^{-x}} $$
pub fn silu<T: TensorElem>(x: T) -> T {
    let val = x.to_f64().unwrap_or(0.0);
    let sig = 1.0 / (1.0 + (-val).exp());
    T::from_f64(val * sig).unwrap_or(x)
}

/// Computes the GELU (Gaussian Error Linear Unit) activation function.
///
/// $$ \text{GELU}(x) \approx 0.5 x (1 + \tanh[\sqrt{2/\pi} (x + 0.044715 x^3)]) $$
pub fn gelu<T: TensorElem>(x: T) -> T {
    let x_f = x.to_f64().unwrap_or(0.0);
    let sqrt_2_over_pi = (2.0f64 / std::f64::consts::PI).sqrt();
    let c = 0.044715f64;

    let inner = sqrt_2_over_pi * (x_f + c * x_f.powi(3));
    let res = 0.5 * x_f * (1.0 + inner.tanh());
    T::from_f64(res).unwrap_or(x)
}

/// Computes ReLU.
pub fn relu<T: TensorElem>(x: T) -> T {
    if x > T::zero() { x } else { T::zero() }
}

/// Element-wise activation as a parameter-free [`Module`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Relu,
    Gelu,
    Silu,
}

impl Activation {
    /// Applies the activation element-wise to a tensor.
    pub fn apply<T: TensorElem>(&self, x: &Tensor<T>) -> Tensor<T> {
        match self {
            Activation::Relu => x.map(relu),
            Activation::Gelu => x.map(gelu),
            Activation::Silu => x.map(silu),
        }
    }
}

impl<T: TensorElem> Module<T> for Activation {
    fn forward(&self, input: &Tensor<T>, _ctx: &mut ForwardContext<'_, T>) -> Result<Tensor<T>> {
        Ok(self.apply(input))
    }
}
