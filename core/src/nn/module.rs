use crate::error::{FlexError, Result};
use crate::tensor::{Tensor, TensorElem};
use std::fmt::Debug;

/// A Module trait for Neural Network layers.
///
/// Every module exposes one forward entry point and its direct children, each under a local
/// name. Joining local names with `.` from the root gives the dotted path that hooks address,
/// e.g. `layers.1.mlp.up_proj`.
///
/// # Contract for composite modules
///
/// A parent must run each child through [`ForwardContext::call`] using the same local name it
/// reports from [`named_children`](Module::named_children). Calling `child.forward` directly
/// still works but skips interception for that child and everything beneath it.
pub trait Module<T: TensorElem>: Debug + Send + Sync {
    /// Runs the module on `input`.
    fn forward(&self, input: &Tensor<T>, ctx: &mut ForwardContext<'_, T>) -> Result<Tensor<T>>;

    /// Direct submodules, keyed by their local name.
    fn named_children(&self) -> Vec<(String, &dyn Module<T>)> {
        Vec::new()
    }
}

/// Receives every module boundary crossed during an instrumented forward pass.
///
/// This is the only way activations are intercepted: the model layer reports "module `path`
/// is about to run on X" and "module `path` produced Y", and the interceptor may substitute
/// either tensor.
pub trait Interceptor<T: TensorElem> {
    /// Called before the module at `path` runs. Returning `Some` replaces its input.
    fn before_forward(&mut self, path: &str, input: &Tensor<T>) -> Result<Option<Tensor<T>>> {
        let _ = (path, input);
        Ok(None)
    }

    /// Called after the module at `path` ran. The returned tensor replaces its output.
    fn after_forward(&mut self, path: &str, output: Tensor<T>) -> Result<Tensor<T>>;
}

/// Per-pass state threaded through [`Module::forward`].
///
/// Tracks the dotted scope of the module currently running and the (optional) interceptor.
pub struct ForwardContext<'a, T: TensorElem> {
    scope: Vec<String>,
    interceptor: Option<&'a mut dyn Interceptor<T>>,
}

impl<'a, T: TensorElem> ForwardContext<'a, T> {
    /// An uninstrumented context. Forward passes run exactly as written.
    pub fn new() -> Self {
        Self {
            scope: Vec::new(),
            interceptor: None,
        }
    }

    /// A context whose module boundaries are routed through `interceptor`.
    pub fn with_interceptor(interceptor: &'a mut dyn Interceptor<T>) -> Self {
        Self {
            scope: Vec::new(),
            interceptor: Some(interceptor),
        }
    }

    /// Dotted path of the module currently running (empty at the root).
    pub fn path(&self) -> String {
        self.scope.join(".")
    }

    /// Whether an interceptor is attached.
    pub fn is_instrumented(&self) -> bool {
        self.interceptor.is_some()
    }

    /// Runs `module` as the child `name` of the current scope.
    ///
    /// With an interceptor attached, the child's input and output pass through it, keyed by the
    /// child's full dotted path.
    pub fn call(
        &mut self,
        name: &str,
        module: &dyn Module<T>,
        input: &Tensor<T>,
    ) -> Result<Tensor<T>> {
        self.scope.push(name.to_string());
        let result = self.run_scoped(module, input);
        self.scope.pop();
        result
    }

    fn run_scoped(&mut self, module: &dyn Module<T>, input: &Tensor<T>) -> Result<Tensor<T>> {
        if self.interceptor.is_none() {
            return module.forward(input, self);
        }

        let path = self.path();
        let replaced = match self.interceptor.as_deref_mut() {
            Some(interceptor) => interceptor.before_forward(&path, input)?,
            None => None,
        };
        let output = match &replaced {
            Some(edited) => module.forward(edited, self)?,
            None => module.forward(input, self)?,
        };
        match self.interceptor.as_deref_mut() {
            Some(interceptor) => interceptor.after_forward(&path, output),
            None => Ok(output),
        }
    }
}

impl<T: TensorElem> Default for ForwardContext<'_, T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Every dotted submodule path under `root`, depth first. The root itself is not listed.
pub fn named_modules<T: TensorElem>(root: &dyn Module<T>) -> Vec<String> {
    fn visit<T: TensorElem>(module: &dyn Module<T>, prefix: &str, out: &mut Vec<String>) {
        for (name, child) in module.named_children() {
            let path = if prefix.is_empty() {
                name
            } else {
                format!("{prefix}.{name}")
            };
            out.push(path.clone());
            visit(child, &path, out);
        }
    }

    let mut out = Vec::new();
    visit(root, "", &mut out);
    out
}

/// Checks that `name` identifies exactly one submodule of `root`.
pub fn resolve_module<T: TensorElem>(root: &dyn Module<T>, name: &str) -> Result<()> {
    let matches = named_modules(root)
        .iter()
        .filter(|path| path.as_str() == name)
        .count();
    match matches {
        1 => Ok(()),
        0 => Err(FlexError::ModuleNotFound {
            module: name.to_string(),
        }),
        matches => Err(FlexError::AmbiguousModule {
            module: name.to_string(),
            matches,
        }),
    }
}
