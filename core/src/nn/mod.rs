pub mod activation;
pub mod linear;
pub mod module;
pub mod sequential;

pub use activation::Activation;
pub use linear::Linear;
pub use module::{ForwardContext, Interceptor, Module, named_modules, resolve_module};
pub use sequential::Sequential;
