//! Reactive form state built on the signal graph.
//!
//! A [`Schema`] declares the fields; [`create_form`] turns it into a [`Form`]
//! whose every piece of state is a [`Store`](crate::Store) or
//! [`Computed`](crate::Computed), and whose actions are
//! [`Event`](crate::Event)s. Validation runs through [`Fx`](crate::Fx)
//! effects so synchronous and async validators share one path.

mod error;
mod field;
mod model;
mod schema;
mod validation;
mod value;

pub use error::{AdapterError, FormError, ValidationScope};
pub use field::{AnyField, Field};
pub use model::{Form, SubmitState, create_form};
pub use schema::{FieldConfig, Schema, SchemaAdapter, SchemaBuilder, ValidateOn, ValidityPolicy};
pub use validation::{
    FieldErrors, FieldValidationResult, FieldValidator, FormValidationResult, FormValidator,
    ValidationFuture, ValidatorFault,
};
pub use value::{FieldType, FieldValue, ValueKind, Values};
