//! The schema validation contract injected into the entity layer
//!
//! The entity layer does not ship a validation library. Instead, every
//! entity definition carries values implementing [`SchemaValidator`], and
//! the layer invokes them at submission time. A validator may complete
//! synchronously or hand back a deferred completion; deferred completions
//! are only acceptable on direct execution, never on batch or transaction
//! submission paths.

use std::{fmt, future::Future, pin::Pin};

use crate::Attributes;

/// A single problem reported by a validator
#[derive(Clone, Debug)]
pub struct Issue {
    /// The dotted attribute path the issue refers to, when known
    pub path: Option<String>,

    /// The validator's description of the problem
    pub message: String,
}

impl Issue {
    /// An issue with no associated attribute path
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            path: None,
            message: message.into(),
        }
    }

    /// An issue anchored to a dotted attribute path
    pub fn at(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            message: message.into(),
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(path) = &self.path {
            write!(f, "{}: {}", path, self.message)
        } else {
            f.write_str(&self.message)
        }
    }
}

/// The outcome of handing a value to a validator
///
/// A `Ready` outcome carries either the validated value, with any defaults
/// the schema applies, or the full list of issues. A `Deferred` outcome
/// must be awaited and is only honored on direct execution.
#[must_use]
pub enum Validation {
    /// The validator completed synchronously
    Ready(Result<Attributes, Vec<Issue>>),

    /// The validator requires awaiting to complete
    Deferred(DeferredValidation),
}

/// A deferred validation completion
pub type DeferredValidation =
    Pin<Box<dyn Future<Output = Result<Attributes, Vec<Issue>>> + Send + 'static>>;

impl fmt::Debug for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready(result) => f.debug_tuple("Ready").field(result).finish(),
            Self::Deferred(_) => f.debug_tuple("Deferred").finish(),
        }
    }
}

/// Validates an attribute map against a declared schema
///
/// Implementations wrap whatever validation library the application uses.
/// The returned value replaces the input on success, which is how schema
/// defaults flow into persisted items.
pub trait SchemaValidator: Send + Sync {
    /// Validate the given value, possibly applying defaults
    fn validate(&self, value: Attributes) -> Validation;
}

/// A validator that accepts every value unchanged
///
/// Useful for schemaless attribute maps and for key schemas whose shape is
/// fully enforced by the key generators.
#[derive(Clone, Copy, Debug, Default)]
pub struct Unvalidated;

impl SchemaValidator for Unvalidated {
    fn validate(&self, value: Attributes) -> Validation {
        Validation::Ready(Ok(value))
    }
}
