use crate::error::Result;
use crate::nn::{ForwardContext, Module};
use crate::tensor::{Tensor, TensorElem, TensorError};

use rand::Rng;

/// Linear Layer: `y = xW^T + b`
///
/// Performs a linear transformation over the last dimension of the input. Any leading
/// dimensions (`[batch, seq, ...]`) are flattened for the matmul and restored afterwards.
///
/// # Examples
/// ```rust
/// use flex_model::nn::{ForwardContext, Linear, Module};
/// use flex_model::tensor::Tensor;
///
/// // 10 inputs, 5 outputs
/// let layer = Linear::<f32>::new(
///     Tensor::zeros(vec![5, 10]), // Weights: [out, in]
///     Some(Tensor::zeros(vec![5])), // Bias: [out]
/// ).unwrap();
///
/// let x = Tensor::ones(vec![2, 3, 10]);
/// let y = layer.forward(&x, &mut ForwardContext::new()).unwrap();
/// assert_eq!(y.shape(), &[2, 3, 5]);
/// ```
#[derive(Debug, Clone)]
pub struct Linear<T: TensorElem> {
    /// - Shape: `[out_features, in_features]`
    pub weight: Tensor<T>,

    /// - Shape: `[out_features]`
    pub bias: Option<Tensor<T>>,
}

impl<T: TensorElem> Linear<T> {
    /// Creates a new Linear layer.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::ShapeMismatch` if `weight` is not rank 2 or `bias` is not
    /// `[out_features]`.
    pub fn new(weight: Tensor<T>, bias: Option<Tensor<T>>) -> Result<Self> {
        if weight.rank() != 2 {
            return Err(TensorError::ShapeMismatch {
                expected: vec![2],
                got: vec![weight.rank()],
            }
            .into());
        }
        if let Some(b) = &bias {
            if b.shape() != [weight.shape()[0]] {
                return Err(TensorError::ShapeMismatch {
                    expected: vec![weight.shape()[0]],
                    got: b.shape().to_vec(),
                }
                .into());
            }
        }
        Ok(Self { weight, bias })
    }

    /// Creates a layer with weights and bias drawn from `U(-k, k)`, `k = 1/sqrt(in_features)`.
    pub fn init<R: Rng + ?Sized>(
        in_features: usize,
        out_features: usize,
        bias: bool,
        rng: &mut R,
    ) -> Self {
        let k = 1.0 / (in_features.max(1) as f64).sqrt();
        let mut sample = |_: usize| T::from_f64(rng.random_range(-k..k)).unwrap_or_else(T::zero);
        let weight = Tensor::from_fn(vec![out_features, in_features], &mut sample);
        let bias = bias.then(|| Tensor::from_fn(vec![out_features], &mut sample));
        Self { weight, bias }
    }

    pub fn in_features(&self) -> usize {
        self.weight.shape()[1]
    }

    pub fn out_features(&self) -> usize {
        self.weight.shape()[0]
    }

    /// Applies the layer to `x` of shape `[..., in_features]`.
    pub fn apply(&self, x: &Tensor<T>) -> Result<Tensor<T>> {
        let in_features = self.in_features();
        let out_features = self.out_features();
        let Some((&last, leading)) = x.shape().split_last() else {
            return Err(TensorError::Unsupported("linear layer on a scalar".to_string()).into());
        };
        if last != in_features {
            return Err(TensorError::ShapeMismatch {
                expected: vec![in_features],
                got: vec![last],
            }
            .into());
        }

        let rows: usize = leading.iter().product();
        let flat = x.clone().reshape(vec![rows, in_features])?;
        let out = flat.matmul(&self.weight.transpose()?)?;
        let out = match &self.bias {
            Some(bias) => Self::add_bias(out, bias),
            None => out,
        };

        let mut out_shape = leading.to_vec();
        out_shape.push(out_features);
        Ok(out.reshape(out_shape)?)
    }

    /// Adds `bias` to every row of a `[rows, out_features]` tensor.
    pub(crate) fn add_bias(mut out: Tensor<T>, bias: &Tensor<T>) -> Tensor<T> {
        let width = bias.size();
        if width == 0 {
            return out;
        }
        for row in out.data_mut().chunks_mut(width) {
            for (o, &b) in row.iter_mut().zip(bias.data()) {
                *o += b;
            }
        }
        out
    }
}

impl<T: TensorElem> Module<T> for Linear<T> {
    fn forward(&self, input: &Tensor<T>, _ctx: &mut ForwardContext<'_, T>) -> Result<Tensor<T>> {
        self.apply(input)
    }
}
