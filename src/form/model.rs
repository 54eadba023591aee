//! The form aggregate and its factory.

use crate::hash::FastHashBuilder;
use crate::{Computed, Event, Fx, Store, Subscription, TaskQueue};
use futures::FutureExt;
use futures::future::LocalBoxFuture;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;

use super::error::{AdapterError, FormError, ValidationScope};
use super::field::{AnyField, Faults, Field, FieldWiring};
use super::schema::{Schema, SchemaAdapter};
use super::validation::{FormValidationResult, FormValidator, ValidatorFault};
use super::value::{FieldType, Values};

/// Whether a submit is waiting on whole-form validation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitState {
    /// Nothing pending
    #[default]
    Idle,
    /// At least one submit is waiting for the form validator
    Validating,
}

/// Build a form from a schema.
pub fn create_form(schema: Schema) -> Form {
    Form::new(schema)
}

/// A live form: one [`Field`] per schema key plus form-level state.
///
/// - `values`: every field's current value, in declaration order
/// - `is_form_valid`: true iff no field is invalid (true for zero fields)
/// - `submit` → `submitted`: fires straight away when the form is already
///   valid, otherwise after whole-form validation makes it valid
/// - `cleared`: resets every field in one propagation step
///
/// Clones are handles to the same form. The graph lives as long as any
/// handle to it does.
#[derive(Clone)]
pub struct Form {
    inner: Rc<FormInner>,
}

struct FormInner {
    fields: IndexMap<String, AnyField, FastHashBuilder>,
    values: Rc<Computed<Values>>,
    is_form_valid: Rc<Computed<bool>>,
    is_dirty: Rc<Computed<bool>>,
    submit: Event<()>,
    submitted: Event<()>,
    cleared: Event<()>,
    validate_form_fx: Fx<FormValidationResult, ValidatorFault>,
    submit_state: Rc<Computed<SubmitState>>,
    tasks: TaskQueue,
    faults: Faults,
    _clear_on: Vec<Subscription>,
}

impl Form {
    /// Build the field states and wire them to the form-level state
    pub fn new(schema: Schema) -> Self {
        let Schema {
            fields: specs,
            validator,
            validate_on,
            validity_policy,
            clear_on,
            spawner,
        } = schema;

        let tasks = match spawner {
            Some(spawner) => TaskQueue::with_spawner(spawner),
            None => TaskQueue::new(),
        };
        let faults = Faults::default();
        let wiring = FieldWiring {
            tasks: tasks.clone(),
            validate_on,
            validity_policy,
            faults: faults.clone(),
        };

        let validator = validator.unwrap_or_else(|| {
            FormValidator::from_fields(
                specs
                    .iter()
                    .map(|(key, spec)| (key.clone(), spec.erased_validator()))
                    .collect(),
            )
        });

        let fields: IndexMap<String, AnyField, FastHashBuilder> = specs
            .into_iter()
            .map(|(key, spec)| {
                let field = spec.build(key.clone(), &wiring);
                (key, field)
            })
            .collect();
        let all: Rc<[AnyField]> = fields.values().cloned().collect();

        let values = Computed::new({
            let all = all.clone();
            move || {
                all.iter()
                    .map(|field| (field.key().to_owned(), field.value()))
                    .collect::<Values>()
            }
        });

        let is_form_valid = Computed::new({
            let all = all.clone();
            move || all.iter().all(|field| field.is_valid().get())
        });

        let is_dirty = Computed::new({
            let all = all.clone();
            move || all.iter().any(|field| field.is_dirty().get())
        });

        let validate_form_fx = Fx::new(&tasks, {
            let values = values.clone();
            move || {
                tracing::trace!("validating form");
                validator.validate(values.get_untracked())
            }
        });

        validate_form_fx.done().on({
            let all = all.clone();
            move |result: &FormValidationResult| {
                tracing::trace!(valid = result.is_success(), "form validated");
                for field in all.iter() {
                    field.apply_form_result(result);
                }
            }
        });

        validate_form_fx.failed().on(|fault: &ValidatorFault| {
            tracing::warn!(%fault, "form validator faulted; state left unchanged");
        });

        validate_form_fx.unhandled().on({
            let faults = faults.clone();
            move |fault: &ValidatorFault| {
                faults.borrow_mut().push(form_fault(fault.clone()));
            }
        });

        let submits_in_flight = Store::new(0usize);
        let submit_state = submits_in_flight.map(|pending| {
            if *pending > 0 {
                SubmitState::Validating
            } else {
                SubmitState::Idle
            }
        });

        let submit: Event<()> = Event::new();
        let submitted: Event<()> = Event::new();
        submit.on({
            let is_form_valid = is_form_valid.clone();
            let submitted = submitted.clone();
            let validate_form_fx = validate_form_fx.clone();
            let tasks = tasks.downgrade();
            let faults = faults.clone();
            move |()| {
                if is_form_valid.get_untracked() {
                    cov_mark::hit!(submit_skips_validation);
                    tracing::debug!("form already valid, submitting without validation");
                    submitted.emit(());
                    return;
                }

                tracing::debug!("form not valid, validating before submit");
                submits_in_flight.update(|n| n + 1);
                let run = validate_form_fx.run();
                let is_form_valid = is_form_valid.clone();
                let submitted = submitted.clone();
                let submits_in_flight = submits_in_flight.clone();
                let faults = faults.clone();
                tasks.spawn(async move {
                    let outcome = run.await;
                    submits_in_flight.update(|n| n.saturating_sub(1));
                    match outcome {
                        Ok(_) if is_form_valid.get_untracked() => submitted.emit(()),
                        Ok(_) => {
                            cov_mark::hit!(submit_dropped_invalid);
                            tracing::debug!("form still invalid, submit dropped");
                        }
                        Err(fault) => faults.borrow_mut().push(form_fault(fault)),
                    }
                });
            }
        });

        let cleared: Event<()> = Event::new();
        cleared.on({
            let all = all.clone();
            move |()| {
                for field in all.iter() {
                    field.clear();
                }
            }
        });

        let clear_on = clear_on
            .iter()
            .map(|trigger| {
                let cleared = cleared.clone();
                trigger.watch(move |()| cleared.emit(()))
            })
            .collect();

        tracing::debug!(
            fields = fields.len(),
            validate_on_change = validate_on.change,
            ?validity_policy,
            executor = tasks.has_spawner(),
            "form created"
        );

        Self {
            inner: Rc::new(FormInner {
                fields,
                values,
                is_form_valid,
                is_dirty,
                submit,
                submitted,
                cleared,
                validate_form_fx,
                submit_state,
                tasks,
                faults,
                _clear_on: clear_on,
            }),
        }
    }

    /// Build a form from any [`SchemaAdapter`]
    pub fn from_adapter<A: SchemaAdapter>(adapter: A) -> Result<Self, FormError> {
        let schema = adapter
            .into_schema()
            .map_err(|err| FormError::Adapter(AdapterError::new(err)))?;
        Ok(Self::new(schema))
    }

    /// Typed handle to the field `key`
    pub fn field<T: FieldType>(&self, key: &str) -> Result<Field<T>, FormError> {
        let field = self.any_field(key)?;
        field.downcast::<T>().ok_or_else(|| FormError::FieldType {
            key: key.to_owned(),
            requested: T::KIND,
            actual: field.kind(),
        })
    }

    /// Untyped handle to the field `key`
    pub fn any_field(&self, key: &str) -> Result<&AnyField, FormError> {
        self.inner
            .fields
            .get(key)
            .ok_or_else(|| FormError::UnknownField(key.to_owned()))
    }

    /// All fields in declaration order
    pub fn fields(&self) -> impl Iterator<Item = &AnyField> {
        self.inner.fields.values()
    }

    /// Combined values of all fields
    pub fn values(&self) -> &Rc<Computed<Values>> {
        &self.inner.values
    }

    /// True iff no field is invalid
    pub fn is_form_valid(&self) -> &Rc<Computed<bool>> {
        &self.inner.is_form_valid
    }

    /// True if any field is dirty
    pub fn is_dirty(&self) -> &Rc<Computed<bool>> {
        &self.inner.is_dirty
    }

    /// Request submission
    pub fn submit(&self) {
        self.inner.submit.emit(());
    }

    /// The submit request event, for routing other events into it
    pub fn submit_event(&self) -> &Event<()> {
        &self.inner.submit
    }

    /// Fires once a submit is known to be valid
    pub fn submitted(&self) -> &Event<()> {
        &self.inner.submitted
    }

    /// Reset every field
    pub fn clear(&self) {
        self.inner.cleared.emit(());
    }

    /// The form-level clear event
    pub fn cleared(&self) -> &Event<()> {
        &self.inner.cleared
    }

    /// Run the whole-form validator over the current values.
    ///
    /// Fields are updated when the future completes. This never fires
    /// `submitted`.
    pub fn validate(&self) -> LocalBoxFuture<'static, Result<FormValidationResult, FormError>> {
        let run = self.inner.validate_form_fx.run();
        async move { run.await.map_err(form_fault) }.boxed_local()
    }

    /// The whole-form validation effect
    pub fn validate_form_fx(&self) -> &Fx<FormValidationResult, ValidatorFault> {
        &self.inner.validate_form_fx
    }

    /// Whether a submit is waiting on validation
    pub fn submit_state(&self) -> &Rc<Computed<SubmitState>> {
        &self.inner.submit_state
    }

    /// Queue of validations that did not finish synchronously.
    ///
    /// Only the form holds it strongly: dropping every form handle drops
    /// validations still parked here.
    pub fn tasks(&self) -> &TaskQueue {
        &self.inner.tasks
    }

    /// Wait for every parked validation and submit to finish.
    ///
    /// Resolves to the first validator fault raised by a run nobody awaited
    /// since the last call; later ones are logged. Never resolves while a
    /// parked validator hangs. With an executor (see
    /// [`SchemaBuilder::spawner`](super::SchemaBuilder::spawner)) pending runs
    /// are driven there, and this only reports faults collected so far.
    pub fn settled(&self) -> LocalBoxFuture<'static, Result<(), FormError>> {
        let settled = self.inner.tasks.settled();
        let faults = self.inner.faults.clone();
        async move {
            settled.await;
            let mut drained = std::mem::take(&mut *faults.borrow_mut()).into_iter();
            match drained.next() {
                None => Ok(()),
                Some(first) => {
                    for extra in drained {
                        tracing::warn!(error = %extra, "additional validator fault");
                    }
                    Err(first)
                }
            }
        }
        .boxed_local()
    }
}

fn form_fault(fault: ValidatorFault) -> FormError {
    FormError::Validator {
        scope: ValidationScope::Form,
        fault,
    }
}

impl fmt::Debug for Form {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Form")
            .field("fields", &self.inner.fields.keys().collect::<Vec<_>>())
            .field("tasks", &self.inner.tasks)
            .finish_non_exhaustive()
    }
}
