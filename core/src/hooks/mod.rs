//! Hook functions and the state they read and write.
//!
//! - [`ShapeSpec`]: the full shape expected at a hook point, with wildcards.
//! - [`HookFunction`]: module name + shape + optional edit; gathers, validates, edits,
//!   stores and scatters one activation.
//! - [`ActivationStore`]: the caller's result sink, keyed by module name.
//! - [`SaveContext`], [`ParameterSet`]: side channels of an editing function.

pub mod editing;
pub mod hook_function;
pub mod shape;
pub mod store;

pub use editing::{EditContext, EditFn, ParameterHandle, ParameterSet, SaveContext};
pub use hook_function::{HookFunction, HookType};
pub use shape::{Dim, ShapeSpec};
pub use store::ActivationStore;
