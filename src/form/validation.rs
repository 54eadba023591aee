//! Validation results and validator functions.

use crate::hash::FastHashBuilder;
use futures::FutureExt;
use futures::future::{self, LocalBoxFuture};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::rc::Rc;
use thiserror::Error;

use super::value::{FieldType, FieldValue, Values};

/// Per-field error messages from a whole-form validator.
pub type FieldErrors = IndexMap<String, Vec<String>, FastHashBuilder>;

/// Future a validator resolves to.
pub type ValidationFuture<R> = LocalBoxFuture<'static, Result<R, ValidatorFault>>;

/// Outcome of validating one field.
///
/// Serialized as `{"result":"success"}` or
/// `{"result":"failure","errors":[...]}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum FieldValidationResult {
    /// The value is acceptable
    Success,
    /// The value is rejected with these messages
    Failure {
        /// Messages to show next to the field
        errors: Vec<String>,
    },
}

impl FieldValidationResult {
    /// Shorthand for [`FieldValidationResult::Success`]
    pub fn success() -> Self {
        FieldValidationResult::Success
    }

    /// A failure carrying `errors`
    pub fn failure<I, S>(errors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FieldValidationResult::Failure {
            errors: errors.into_iter().map(Into::into).collect(),
        }
    }

    /// Success when `ok`, otherwise a failure with the single `message`
    pub fn check(ok: bool, message: impl Into<String>) -> Self {
        if ok {
            Self::success()
        } else {
            Self::failure([message])
        }
    }

    /// True for [`FieldValidationResult::Success`]
    pub fn is_success(&self) -> bool {
        matches!(self, FieldValidationResult::Success)
    }

    /// The failure messages, empty on success
    pub fn errors(&self) -> &[String] {
        match self {
            FieldValidationResult::Success => &[],
            FieldValidationResult::Failure { errors } => errors,
        }
    }
}

/// Outcome of the whole-form validator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum FormValidationResult {
    /// Every field is acceptable
    Success,
    /// The form is rejected. Fields missing from `errors` are still marked
    /// invalid, with no message.
    Failure {
        /// Messages keyed by field
        errors: FieldErrors,
    },
}

impl FormValidationResult {
    /// Shorthand for [`FormValidationResult::Success`]
    pub fn success() -> Self {
        FormValidationResult::Success
    }

    /// A failure from `(key, messages)` pairs
    pub fn failure<I, K, E, S>(errors: I) -> Self
    where
        I: IntoIterator<Item = (K, E)>,
        K: Into<String>,
        E: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FormValidationResult::Failure {
            errors: errors
                .into_iter()
                .map(|(key, messages)| (key.into(), messages.into_iter().map(Into::into).collect()))
                .collect(),
        }
    }

    /// True for [`FormValidationResult::Success`]
    pub fn is_success(&self) -> bool {
        matches!(self, FormValidationResult::Success)
    }

    /// Messages for one field; empty on success or when the key is absent
    pub fn errors_for(&self, key: &str) -> Vec<String> {
        match self {
            FormValidationResult::Success => Vec::new(),
            FormValidationResult::Failure { errors } => errors.get(key).cloned().unwrap_or_default(),
        }
    }
}

/// A validator that threw instead of returning a result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidatorFault {
    message: String,
}

impl ValidatorFault {
    /// Fault with a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Fault wrapping another error's message
    pub fn from_error(error: &dyn std::error::Error) -> Self {
        Self::new(error.to_string())
    }

    /// The fault message
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Validates one field's value.
///
/// Synchronous, fallible and async validators all normalize to the same
/// boxed future.
pub struct FieldValidator<T> {
    run: Rc<dyn Fn(T) -> ValidationFuture<FieldValidationResult>>,
}

impl<T> Clone for FieldValidator<T> {
    fn clone(&self) -> Self {
        Self {
            run: self.run.clone(),
        }
    }
}

impl<T: FieldType> FieldValidator<T> {
    /// Synchronous validator that cannot fault
    pub fn new(f: impl Fn(&T) -> FieldValidationResult + 'static) -> Self {
        Self::fallible(move |value| Ok(f(value)))
    }

    /// Synchronous validator that may fault
    pub fn fallible(
        f: impl Fn(&T) -> Result<FieldValidationResult, ValidatorFault> + 'static,
    ) -> Self {
        Self {
            run: Rc::new(move |value: T| future::ready(f(&value)).boxed_local()),
        }
    }

    /// Asynchronous validator, e.g. one that asks a server
    pub fn future<F, Fut>(f: F) -> Self
    where
        F: Fn(T) -> Fut + 'static,
        Fut: Future<Output = Result<FieldValidationResult, ValidatorFault>> + 'static,
    {
        Self {
            run: Rc::new(move |value| f(value).boxed_local()),
        }
    }

    /// Validator that accepts everything
    pub fn always_valid() -> Self {
        Self::new(|_| FieldValidationResult::Success)
    }

    /// Start validating `value`
    pub fn validate(&self, value: T) -> ValidationFuture<FieldValidationResult> {
        (self.run)(value)
    }

    /// Same validator over type-erased values. `None` when the value has the
    /// wrong kind.
    pub(crate) fn erase(&self) -> ErasedFieldValidator {
        let validator = self.clone();
        Rc::new(move |value: &FieldValue| T::from_value(value).map(|v| validator.validate(v)))
    }
}

impl<T> fmt::Debug for FieldValidator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldValidator").finish_non_exhaustive()
    }
}

pub(crate) type ErasedFieldValidator =
    Rc<dyn Fn(&FieldValue) -> Option<ValidationFuture<FieldValidationResult>>>;

/// Validates the whole values record.
#[derive(Clone)]
pub struct FormValidator {
    run: Rc<dyn Fn(Values) -> ValidationFuture<FormValidationResult>>,
}

impl FormValidator {
    /// Synchronous validator that cannot fault
    pub fn new(f: impl Fn(&Values) -> FormValidationResult + 'static) -> Self {
        Self::fallible(move |values| Ok(f(values)))
    }

    /// Synchronous validator that may fault
    pub fn fallible(
        f: impl Fn(&Values) -> Result<FormValidationResult, ValidatorFault> + 'static,
    ) -> Self {
        Self {
            run: Rc::new(move |values: Values| future::ready(f(&values)).boxed_local()),
        }
    }

    /// Asynchronous validator
    pub fn future<F, Fut>(f: F) -> Self
    where
        F: Fn(Values) -> Fut + 'static,
        Fut: Future<Output = Result<FormValidationResult, ValidatorFault>> + 'static,
    {
        Self {
            run: Rc::new(move |values| f(values).boxed_local()),
        }
    }

    /// Runs each field's own validator against its entry in the record and
    /// collects the failures. Used when a schema declares no form validator.
    pub(crate) fn from_fields(fields: Vec<(String, ErasedFieldValidator)>) -> Self {
        Self::future(move |values: Values| {
            let checks: Vec<(String, ValidationFuture<FieldValidationResult>)> = fields
                .iter()
                .filter_map(|(key, validate)| {
                    let check = values.get(key).and_then(|value| validate(value))?;
                    Some((key.clone(), check))
                })
                .collect();

            async move {
                let mut errors = FieldErrors::default();
                for (key, check) in checks {
                    if let FieldValidationResult::Failure { errors: messages } = check.await? {
                        errors.insert(key, messages);
                    }
                }
                Ok(if errors.is_empty() {
                    FormValidationResult::Success
                } else {
                    FormValidationResult::Failure { errors }
                })
            }
        })
    }

    /// Start validating `values`
    pub fn validate(&self, values: Values) -> ValidationFuture<FormValidationResult> {
        (self.run)(values)
    }
}

impl fmt::Debug for FormValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormValidator").finish_non_exhaustive()
    }
}
