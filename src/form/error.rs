use std::error::Error as StdError;
use std::fmt;
use std::rc::Rc;

use thiserror::Error;

use super::validation::ValidatorFault;
use super::value::ValueKind;

/// Which validator a [`FormError::Validator`] came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationScope {
    /// A single field's validator
    Field(String),
    /// The whole-form validator
    Form,
}

impl fmt::Display for ValidationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationScope::Field(key) => write!(f, "field `{key}`"),
            ValidationScope::Form => f.write_str("the form"),
        }
    }
}

/// Errors surfaced by the form model.
///
/// Validation *failures* are not errors: they land in field `errors`/`is_valid`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormError {
    /// No field with this key exists.
    #[error("unknown field `{0}`")]
    UnknownField(String),

    /// A field was accessed or changed with a value of the wrong type.
    #[error("field `{key}` holds {actual} values, not {requested}")]
    FieldType {
        /// The field key
        key: String,
        /// The type the caller asked for
        requested: ValueKind,
        /// The type the field was declared with
        actual: ValueKind,
    },

    /// The same key was declared twice in one schema.
    #[error("field `{0}` is declared more than once")]
    DuplicateField(String),

    /// A validator returned an error instead of a result. State is left
    /// unchanged.
    #[error("validator for {scope} failed")]
    Validator {
        /// Where the fault came from
        scope: ValidationScope,
        /// The validator's own error
        #[source]
        fault: ValidatorFault,
    },

    /// A schema adapter could not produce a schema.
    #[error("schema adapter failed")]
    Adapter(#[source] AdapterError),
}

/// The error a [`SchemaAdapter`](super::SchemaAdapter) returned, kept intact.
///
/// Displays as the adapter's error and continues its source chain. Two
/// values are equal only if they share the same underlying error.
#[derive(Clone)]
pub struct AdapterError(Rc<dyn StdError>);

impl AdapterError {
    pub(crate) fn new(err: impl StdError + 'static) -> Self {
        Self(Rc::new(err))
    }

    /// The adapter's error
    pub fn get(&self) -> &(dyn StdError + 'static) {
        &*self.0
    }

    /// The adapter's error as its concrete type
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.0.downcast_ref()
    }
}

impl fmt::Debug for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl StdError for AdapterError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.source()
    }
}

impl PartialEq for AdapterError {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
