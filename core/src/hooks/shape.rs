use crate::error::{FlexError, Result};
use std::fmt;

/// One entry of a [`ShapeSpec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dim {
    /// The full tensor must have exactly this size here.
    Fixed(usize),
    /// Any size is accepted (batch, sequence length, ...).
    Any,
}

impl From<Option<usize>> for Dim {
    fn from(dim: Option<usize>) -> Self {
        match dim {
            Some(size) => Dim::Fixed(size),
            None => Dim::Any,
        }
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Fixed(size) => write!(f, "{size}"),
            Dim::Any => f.write_str("*"),
        }
    }
}

/// Expected shape of the full (unsharded) activation at a hook point.
///
/// Built from a slice where `None` marks a wildcard:
///
/// ```rust
/// use flex_model::hooks::ShapeSpec;
///
/// let spec = ShapeSpec::new(&[None, None, Some(4096)]);
/// assert_eq!(spec.to_string(), "[*, *, 4096]");
/// assert!(spec.validate("layers.0", &[2, 17, 4096]).is_ok());
/// assert!(spec.validate("layers.0", &[2, 17, 2048]).is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShapeSpec {
    dims: Vec<Dim>,
}

impl ShapeSpec {
    pub fn new(dims: &[Option<usize>]) -> Self {
        Self {
            dims: dims.iter().map(|&d| Dim::from(d)).collect(),
        }
    }

    pub fn from_dims(dims: Vec<Dim>) -> Self {
        Self { dims }
    }

    pub fn dims(&self) -> &[Dim] {
        &self.dims
    }

    /// Declared rank.
    pub fn len(&self) -> usize {
        self.dims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dims.is_empty()
    }

    /// The fixed size declared for axis `i`, if any.
    pub fn fixed(&self, i: usize) -> Option<usize> {
        match self.dims.get(i) {
            Some(Dim::Fixed(size)) => Some(*size),
            _ => None,
        }
    }

    /// Rejects specs that no tensor could satisfy: an empty spec or a fixed size of zero.
    pub fn check(&self, module: &str) -> Result<()> {
        if self.dims.is_empty() {
            return Err(FlexError::InvalidShapeSpec {
                module: module.to_string(),
                reason: "shape spec has no dimensions".to_string(),
            });
        }
        if let Some(axis) = self.dims.iter().position(|d| *d == Dim::Fixed(0)) {
            return Err(FlexError::InvalidShapeSpec {
                module: module.to_string(),
                reason: format!("dimension {axis} is fixed to zero"),
            });
        }
        Ok(())
    }

    /// Whether `observed` has the declared rank and agrees with every fixed entry.
    pub fn matches(&self, observed: &[usize]) -> bool {
        observed.len() == self.dims.len()
            && self.dims.iter().zip(observed).all(|(dim, &size)| match dim {
                Dim::Fixed(expected) => *expected == size,
                Dim::Any => true,
            })
    }

    /// # Errors
    ///
    /// Returns `FlexError::ShapeMismatch` naming `module` when `observed` does not match.
    pub fn validate(&self, module: &str, observed: &[usize]) -> Result<()> {
        if self.matches(observed) {
            return Ok(());
        }
        Err(FlexError::ShapeMismatch {
            module: module.to_string(),
            expected: self.clone(),
            observed: observed.to_vec(),
        })
    }
}

impl From<&[Option<usize>]> for ShapeSpec {
    fn from(dims: &[Option<usize>]) -> Self {
        Self::new(dims)
    }
}

impl<const N: usize> From<[Option<usize>; N]> for ShapeSpec {
    fn from(dims: [Option<usize>; N]) -> Self {
        Self::new(&dims)
    }
}

impl From<Vec<Dim>> for ShapeSpec {
    fn from(dims: Vec<Dim>) -> Self {
        Self::from_dims(dims)
    }
}

impl fmt::Display for ShapeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, dim) in self.dims.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{dim}")?;
        }
        f.write_str("]")
    }
}
