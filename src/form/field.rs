//! Per-field state and its wiring.

use crate::{Event, Fx, Store, TaskQueue, Transaction};
use futures::FutureExt;
use futures::future::LocalBoxFuture;
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::error::{FormError, ValidationScope};
use super::schema::{FieldConfig, ValidateOn, ValidityPolicy};
use super::validation::{FieldValidationResult, FormValidationResult, ValidatorFault};
use super::value::{FieldType, FieldValue, ValueKind};

/// Validator faults from runs nobody awaited, shared by a form's fields.
pub(crate) type Faults = Rc<RefCell<Vec<FormError>>>;

/// Form-wide settings every field is built with.
pub(crate) struct FieldWiring {
    pub(crate) tasks: TaskQueue,
    pub(crate) validate_on: ValidateOn,
    pub(crate) validity_policy: ValidityPolicy,
    pub(crate) faults: Faults,
}

/// Live state of one form field.
///
/// | state      | initial | after `change(v)` | after validation | after `clear()` |
/// |------------|---------|-------------------|------------------|-----------------|
/// | `value`    | init    | `v`               | unchanged        | init            |
/// | `errors`   | `[]`    | unchanged         | result errors    | `[]`            |
/// | `is_valid` | false   | unchanged*        | result           | false           |
/// | `is_dirty` | false   | true              | unchanged        | false           |
///
/// \* false under [`ValidityPolicy::ResetOnChange`].
///
/// Clones are handles to the same field.
pub struct Field<T> {
    inner: Rc<FieldInner<T>>,
}

struct FieldInner<T> {
    key: String,
    value: Store<T>,
    errors: Store<Vec<String>>,
    is_valid: Store<bool>,
    is_dirty: Store<bool>,
    changed: Event<T>,
    cleared: Event<()>,
    validated: Event<bool>,
    validate_fx: Fx<FieldValidationResult, ValidatorFault>,
}

impl<T> Clone for Field<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: FieldType> Field<T> {
    pub(crate) fn new(key: String, config: FieldConfig<T>, wiring: &FieldWiring) -> Self {
        let FieldConfig { init, validator } = config;

        let value = Store::new(init);
        let errors = Store::new(Vec::new());
        let is_valid = Store::new(false);
        let is_dirty = Store::new(false);
        let changed: Event<T> = Event::new();
        let cleared: Event<()> = Event::new();
        let validated: Event<bool> = Event::new();

        let validate_fx = Fx::new(&wiring.tasks, {
            let key = key.clone();
            let value = value.clone();
            move || {
                tracing::trace!(field = %key, "validating field");
                validator.validate(value.get_untracked())
            }
        });

        changed.on({
            let value = value.clone();
            let is_dirty = is_dirty.clone();
            let is_valid = is_valid.clone();
            let validate_fx = validate_fx.clone();
            let policy = wiring.validity_policy;
            let on_change = wiring.validate_on.change;
            move |next: &T| {
                value.set(next.clone());
                is_dirty.set(true);
                if policy == ValidityPolicy::ResetOnChange {
                    is_valid.set(false);
                }
                if on_change {
                    validate_fx.trigger();
                }
            }
        });

        cleared.on({
            let value = value.clone();
            let errors = errors.clone();
            let is_valid = is_valid.clone();
            let is_dirty = is_dirty.clone();
            move |()| {
                value.reset();
                errors.set(Vec::new());
                is_valid.set(false);
                is_dirty.set(false);
            }
        });

        validated.on({
            let is_valid = is_valid.clone();
            move |ok| {
                is_valid.set(*ok);
            }
        });

        validate_fx.done().on({
            let key = key.clone();
            let validated = validated.clone();
            let errors = errors.clone();
            move |result: &FieldValidationResult| {
                tracing::trace!(field = %key, valid = result.is_success(), "field validated");
                validated.emit(result.is_success());
                errors.set(result.errors().to_vec());
            }
        });

        validate_fx.failed().on({
            let key = key.clone();
            move |fault: &ValidatorFault| {
                tracing::warn!(field = %key, %fault, "field validator faulted; state left unchanged");
            }
        });

        validate_fx.unhandled().on({
            let key = key.clone();
            let faults = wiring.faults.clone();
            move |fault: &ValidatorFault| {
                faults.borrow_mut().push(FormError::Validator {
                    scope: ValidationScope::Field(key.clone()),
                    fault: fault.clone(),
                });
            }
        });

        Self {
            inner: Rc::new(FieldInner {
                key,
                value,
                errors,
                is_valid,
                is_dirty,
                changed,
                cleared,
                validated,
                validate_fx,
            }),
        }
    }

    /// The field's key in its form
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// Current value
    pub fn value(&self) -> &Store<T> {
        &self.inner.value
    }

    /// Messages from the last completed validation
    pub fn errors(&self) -> &Store<Vec<String>> {
        &self.inner.errors
    }

    /// Outcome of the last completed validation; false until one succeeds
    pub fn is_valid(&self) -> &Store<bool> {
        &self.inner.is_valid
    }

    /// Changed since creation or the last clear
    pub fn is_dirty(&self) -> &Store<bool> {
        &self.inner.is_dirty
    }

    /// Fires with each new value
    pub fn changed(&self) -> &Event<T> {
        &self.inner.changed
    }

    /// Fires when the field is reset
    pub fn cleared(&self) -> &Event<()> {
        &self.inner.cleared
    }

    /// Fires with each validation outcome, from field or form validation
    pub fn validated(&self) -> &Event<bool> {
        &self.inner.validated
    }

    /// The field's validation effect
    pub fn validate_fx(&self) -> &Fx<FieldValidationResult, ValidatorFault> {
        &self.inner.validate_fx
    }

    /// Current value, tracked
    pub fn get(&self) -> T {
        self.inner.value.get()
    }

    /// Set a new value, as user input would
    pub fn change(&self, value: T) {
        self.inner.changed.emit(value);
    }

    /// Reset to the initial value, unvalidated and clean
    pub fn clear(&self) {
        self.inner.cleared.emit(());
    }

    /// Validate the current value.
    ///
    /// The value is read now. Field state is updated when the returned future
    /// completes; a validator fault leaves it untouched.
    pub fn validate(&self) -> LocalBoxFuture<'static, Result<FieldValidationResult, FormError>> {
        let run = self.inner.validate_fx.run();
        let key = self.inner.key.clone();
        async move {
            run.await.map_err(|fault| FormError::Validator {
                scope: ValidationScope::Field(key),
                fault,
            })
        }
        .boxed_local()
    }

    /// Validate without awaiting.
    ///
    /// Synchronous validators complete before this returns; others finish
    /// when the form is [settled](super::Form::settled).
    pub fn trigger_validation(&self) {
        self.inner.validate_fx.trigger();
    }

    /// Apply a whole-form result to this field: valid only on success,
    /// errors from the result's entry for this key.
    pub(crate) fn apply_form_result(&self, result: &FormValidationResult) {
        Transaction::run(|| {
            self.inner.validated.emit(result.is_success());
            self.inner.errors.set(result.errors_for(&self.inner.key));
        });
    }
}

impl<T: fmt::Debug> fmt::Debug for Field<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("key", &self.inner.key)
            .field("value", &self.inner.value)
            .field("errors", &self.inner.errors)
            .field("is_valid", &self.inner.is_valid)
            .field("is_dirty", &self.inner.is_dirty)
            .finish()
    }
}

trait ErasedField {
    fn key(&self) -> &str;
    fn kind(&self) -> ValueKind;
    fn value(&self) -> FieldValue;
    fn errors(&self) -> &Store<Vec<String>>;
    fn is_valid(&self) -> &Store<bool>;
    fn is_dirty(&self) -> &Store<bool>;
    fn change(&self, value: FieldValue) -> Result<(), FormError>;
    fn clear(&self);
    fn validate(&self) -> LocalBoxFuture<'static, Result<FieldValidationResult, FormError>>;
    fn trigger_validation(&self);
    fn apply_form_result(&self, result: &FormValidationResult);
    fn as_any(&self) -> &dyn Any;
}

impl<T: FieldType> ErasedField for Field<T> {
    fn key(&self) -> &str {
        Field::key(self)
    }

    fn kind(&self) -> ValueKind {
        T::KIND
    }

    fn value(&self) -> FieldValue {
        self.get().into_value()
    }

    fn errors(&self) -> &Store<Vec<String>> {
        Field::errors(self)
    }

    fn is_valid(&self) -> &Store<bool> {
        Field::is_valid(self)
    }

    fn is_dirty(&self) -> &Store<bool> {
        Field::is_dirty(self)
    }

    fn change(&self, value: FieldValue) -> Result<(), FormError> {
        let typed = T::from_value(&value).ok_or_else(|| FormError::FieldType {
            key: self.inner.key.clone(),
            requested: value.kind(),
            actual: T::KIND,
        })?;
        Field::change(self, typed);
        Ok(())
    }

    fn clear(&self) {
        Field::clear(self)
    }

    fn validate(&self) -> LocalBoxFuture<'static, Result<FieldValidationResult, FormError>> {
        Field::validate(self)
    }

    fn trigger_validation(&self) {
        Field::trigger_validation(self)
    }

    fn apply_form_result(&self, result: &FormValidationResult) {
        Field::apply_form_result(self, result)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A field of any value type.
///
/// For code that walks every field without knowing their types, such as a
/// generic renderer. Values go in and out as [`FieldValue`].
#[derive(Clone)]
pub struct AnyField {
    inner: Rc<dyn ErasedField>,
}

impl AnyField {
    pub(crate) fn new<T: FieldType>(field: Field<T>) -> Self {
        Self {
            inner: Rc::new(field),
        }
    }

    /// The field's key in its form
    pub fn key(&self) -> &str {
        self.inner.key()
    }

    /// Declared value type
    pub fn kind(&self) -> ValueKind {
        self.inner.kind()
    }

    /// Current value, tracked
    pub fn value(&self) -> FieldValue {
        self.inner.value()
    }

    /// Messages from the last completed validation
    pub fn errors(&self) -> &Store<Vec<String>> {
        self.inner.errors()
    }

    /// Outcome of the last completed validation
    pub fn is_valid(&self) -> &Store<bool> {
        self.inner.is_valid()
    }

    /// Changed since creation or the last clear
    pub fn is_dirty(&self) -> &Store<bool> {
        self.inner.is_dirty()
    }

    /// Set a new value. Fails if `value` has the wrong type.
    pub fn change(&self, value: impl Into<FieldValue>) -> Result<(), FormError> {
        self.inner.change(value.into())
    }

    /// Reset to the initial value, unvalidated and clean
    pub fn clear(&self) {
        self.inner.clear()
    }

    /// Validate the current value
    pub fn validate(&self) -> LocalBoxFuture<'static, Result<FieldValidationResult, FormError>> {
        self.inner.validate()
    }

    /// Validate without awaiting
    pub fn trigger_validation(&self) {
        self.inner.trigger_validation()
    }

    /// The typed handle, if this field holds `T`
    pub fn downcast<T: FieldType>(&self) -> Option<Field<T>> {
        self.inner.as_any().downcast_ref::<Field<T>>().cloned()
    }

    pub(crate) fn apply_form_result(&self, result: &FormValidationResult) {
        self.inner.apply_form_result(result)
    }
}

impl fmt::Debug for AnyField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyField")
            .field("key", &self.key())
            .field("kind", &self.kind())
            .finish_non_exhaustive()
    }
}
