//! # flex-model
//!
//! Capture and edit the intermediate activations of a (possibly tensor-parallel) model without
//! touching the model's code.
//!
//! A [`FlexModel`] wraps a model built from [`nn::Module`]s. Hooks are registered against
//! dotted module paths; during [`FlexModel::run_forward`] each reached hook gathers the
//! module's activation from every rank, checks it against a [`hooks::ShapeSpec`], runs an
//! optional editing function, records the result in an [`hooks::ActivationStore`] and hands
//! the rank-local slice of the (edited) tensor back to the forward pass.
//!
//! ## Modules
//!
//! - [`mod@tensor`]: Dynamic-rank CPU tensor.
//! - [`nn`]: The module tree, its interception boundary and a few layers.
//! - [`distributed`]: Collective backends, the shard broker and tensor-parallel layers.
//! - [`hooks`]: Hook functions, shape specs, the activation store.
//! - [`models`]: A tensor-parallel MLP block.
//!
//! ## Example
//!
//! ```rust
//! use flex_model::hooks::{ActivationStore, HookFunction};
//! use flex_model::nn::{Activation, ForwardContext, Linear, Module, Sequential};
//! use flex_model::tensor::Tensor;
//! use flex_model::FlexModel;
//! use std::sync::Arc;
//!
//! let model = Arc::new(
//!     Sequential::<f32>::default()
//!         .push(Linear::new(Tensor::ones(vec![3, 2]), None).unwrap())
//!         .push(Activation::Relu)
//!         .push(Linear::new(Tensor::ones(vec![1, 3]), None).unwrap()),
//! );
//!
//! let store = ActivationStore::new();
//! let mut flex = FlexModel::new(Arc::clone(&model), store.clone());
//! flex.register_hook_function(
//!     HookFunction::<f32>::new("1", &[None, Some(3)]).with_editing_function(|x, _| Ok(x.scale(2.0))),
//! )
//! .unwrap();
//!
//! let x = Tensor::ones(vec![1, 2]);
//! let edited = flex.run_forward(&x).unwrap();
//! let pristine = model.forward(&x, &mut ForwardContext::new()).unwrap();
//!
//! assert_eq!(store.get("1").unwrap().data(), &[4.0, 4.0, 4.0]);
//! assert_eq!(edited.data(), &[12.0]);
//! assert_eq!(pristine.data(), &[6.0]);
//! ```

pub mod distributed;
pub mod error;
pub mod flex_model;
pub mod hooks;
pub mod models;
pub mod nn;
pub mod tensor;

pub use error::{FlexError, Result};
pub use flex_model::FlexModel;
pub use tensor::{Tensor, TensorElem, TensorError};
