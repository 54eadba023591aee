//! Declarative form description.
//!
//! A [`Schema`] lists the fields (initial value plus validator), an optional
//! whole-form validator and a few behavior switches. Third-party schema
//! languages plug in through [`SchemaAdapter`].

use crate::Event;
use crate::hash::FastHashBuilder;
use futures::task::LocalSpawn;
use indexmap::IndexMap;
use indexmap::map::Entry;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::rc::Rc;

use super::error::FormError;
use super::field::{AnyField, Field, FieldWiring};
use super::validation::{
    ErasedFieldValidator, FieldValidationResult, FieldValidator, FormValidationResult,
    FormValidator,
};
use super::value::{FieldType, ValueKind, Values};

/// Initial value and validator of one field.
#[derive(Clone, Debug)]
pub struct FieldConfig<T> {
    /// Value the field starts with and returns to when cleared
    pub init: T,
    /// Validator run by the field's validation effect
    pub validator: FieldValidator<T>,
}

impl<T: FieldType> FieldConfig<T> {
    /// Field with a synchronous validator
    pub fn new(init: T, validator: impl Fn(&T) -> FieldValidationResult + 'static) -> Self {
        Self::with_validator(init, FieldValidator::new(validator))
    }

    /// Field with a prepared validator (fallible or async)
    pub fn with_validator(init: T, validator: FieldValidator<T>) -> Self {
        Self { init, validator }
    }

    /// Field that accepts any value
    pub fn unvalidated(init: T) -> Self {
        Self::with_validator(init, FieldValidator::always_valid())
    }
}

/// When validation runs without being asked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidateOn {
    /// Validate a field every time it changes
    pub change: bool,
}

impl ValidateOn {
    /// Validate each field on every change
    pub fn on_change() -> Self {
        Self { change: true }
    }
}

/// What a value change does to a field's last validation outcome.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidityPolicy {
    /// `is_valid` keeps the last result until the field is validated again.
    /// A form that was valid stays valid after an unvalidated edit, and
    /// `submit` then skips validation.
    #[default]
    KeepUntilRevalidated,
    /// Any change sets `is_valid` to false until the next validation.
    ResetOnChange,
}

/// A field declaration with its value type erased.
pub(crate) trait FieldSpec {
    fn kind(&self) -> ValueKind;

    fn erased_validator(&self) -> ErasedFieldValidator;

    fn build(self: Box<Self>, key: String, wiring: &FieldWiring) -> AnyField;
}

impl<T: FieldType> FieldSpec for FieldConfig<T> {
    fn kind(&self) -> ValueKind {
        T::KIND
    }

    fn erased_validator(&self) -> ErasedFieldValidator {
        self.validator.erase()
    }

    fn build(self: Box<Self>, key: String, wiring: &FieldWiring) -> AnyField {
        AnyField::new(Field::new(key, *self, wiring))
    }
}

/// Everything needed to build a [`Form`](super::Form).
pub struct Schema {
    pub(crate) fields: IndexMap<String, Box<dyn FieldSpec>, FastHashBuilder>,
    pub(crate) validator: Option<FormValidator>,
    pub(crate) validate_on: ValidateOn,
    pub(crate) validity_policy: ValidityPolicy,
    pub(crate) clear_on: Vec<Event<()>>,
    pub(crate) spawner: Option<Rc<dyn LocalSpawn>>,
}

impl Schema {
    /// Start describing a form
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Field keys in declaration order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Declared type of the field `key`
    pub fn kind_of(&self, key: &str) -> Option<ValueKind> {
        self.fields.get(key).map(|spec| spec.kind())
    }

    /// Number of declared fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when no field is declared
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// True when a whole-form validator was set explicitly
    pub fn has_form_validator(&self) -> bool {
        self.validator.is_some()
    }

    /// Automatic validation triggers
    pub fn validate_on(&self) -> ValidateOn {
        self.validate_on
    }

    /// Staleness policy for field validity
    pub fn validity_policy(&self) -> ValidityPolicy {
        self.validity_policy
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .field("validator", &self.validator.is_some())
            .field("validate_on", &self.validate_on)
            .field("validity_policy", &self.validity_policy)
            .field("clear_on", &self.clear_on.len())
            .field("spawner", &self.spawner.is_some())
            .finish()
    }
}

/// Builder for [`Schema`].
///
/// ```ignore
/// let schema = Schema::builder()
///     .field("email", FieldConfig::new(String::new(), |v: &String| {
///         FieldValidationResult::check(v.contains('@'), "Email must contains @")
///     }))
///     .validate_on(ValidateOn::on_change())
///     .build()?;
/// ```
#[derive(Default)]
pub struct SchemaBuilder {
    fields: Vec<(String, Box<dyn FieldSpec>)>,
    validator: Option<FormValidator>,
    validate_on: ValidateOn,
    validity_policy: ValidityPolicy,
    clear_on: Vec<Event<()>>,
    spawner: Option<Rc<dyn LocalSpawn>>,
}

impl SchemaBuilder {
    /// Declare a field. Keys must be unique.
    pub fn field<T: FieldType>(mut self, key: impl Into<String>, config: FieldConfig<T>) -> Self {
        self.fields.push((key.into(), Box::new(config)));
        self
    }

    /// Synchronous whole-form validator
    pub fn validator(self, f: impl Fn(&Values) -> FormValidationResult + 'static) -> Self {
        self.form_validator(FormValidator::new(f))
    }

    /// Prepared whole-form validator (fallible or async).
    ///
    /// Without one, the form validator runs every field validator.
    pub fn form_validator(mut self, validator: FormValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Automatic validation triggers
    pub fn validate_on(mut self, validate_on: ValidateOn) -> Self {
        self.validate_on = validate_on;
        self
    }

    /// Staleness policy for field validity
    pub fn validity_policy(mut self, policy: ValidityPolicy) -> Self {
        self.validity_policy = policy;
        self
    }

    /// Clear the whole form whenever `trigger` fires
    pub fn clear_on(mut self, trigger: &Event<()>) -> Self {
        self.clear_on.push(trigger.clone());
        self
    }

    /// Run validations that do not finish synchronously on `spawner`,
    /// e.g. a `LocalPool`'s spawner or the UI thread's executor.
    ///
    /// Without one they are parked until [`Form::settled`](super::Form::settled)
    /// is awaited.
    pub fn spawner(mut self, spawner: impl LocalSpawn + 'static) -> Self {
        self.spawner = Some(Rc::new(spawner));
        self
    }

    /// Finish the schema
    pub fn build(self) -> Result<Schema, FormError> {
        let mut fields = IndexMap::with_capacity_and_hasher(self.fields.len(), FastHashBuilder);
        for (key, spec) in self.fields {
            match fields.entry(key) {
                Entry::Occupied(entry) => return Err(FormError::DuplicateField(entry.key().clone())),
                Entry::Vacant(entry) => {
                    entry.insert(spec);
                }
            }
        }

        Ok(Schema {
            fields,
            validator: self.validator,
            validate_on: self.validate_on,
            validity_policy: self.validity_policy,
            clear_on: self.clear_on,
            spawner: self.spawner,
        })
    }
}

impl fmt::Debug for SchemaBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaBuilder")
            .field("fields", &self.fields.iter().map(|(key, _)| key).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Produces a [`Schema`] from some other schema description.
///
/// Implement this for a third-party validation library's schema type. The
/// form only depends on the resulting field list and validators.
pub trait SchemaAdapter {
    /// Why the conversion can fail
    type Error: std::error::Error + 'static;

    /// Convert into a form schema
    fn into_schema(self) -> Result<Schema, Self::Error>;
}

impl SchemaAdapter for Schema {
    type Error = Infallible;

    fn into_schema(self) -> Result<Schema, Infallible> {
        Ok(self)
    }
}

impl SchemaAdapter for SchemaBuilder {
    type Error = FormError;

    fn into_schema(self) -> Result<Schema, FormError> {
        self.build()
    }
}
