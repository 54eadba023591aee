#![deny(missing_docs)]

//! Reactive form state on a fine-grained signal graph.
//!
//! Forms are built from a declarative [`Schema`]: each field has an initial
//! value and a validator, and the form may add a whole-form validator. The
//! resulting [`Form`] exposes every piece of state as a live cell and every
//! action as an event, so a rendering layer only has to subscribe.
//!
//! # Quick Start
//!
//! ```ignore
//! use reaktiv_forms::{FieldConfig, FieldValidationResult, Schema, create_form};
//!
//! let schema = Schema::builder()
//!     .field("email", FieldConfig::new(String::new(), |v: &String| {
//!         FieldValidationResult::check(v.contains('@'), "Email must contains @")
//!     }))
//!     .build()?;
//! let form = create_form(schema);
//!
//! let email = form.field::<String>("email")?;
//! let _log = form.submitted().watch(|()| println!("send it"));
//!
//! email.change("jane@example.com".into());
//! form.submit(); // validates, then fires `submitted`
//! ```
//!
//! # Core Types
//!
//! The form layer is built from a small reactive runtime that can be used on
//! its own:
//!
//! - [`Signal`] - payload-less reactive marker. [`emit()`](Signal::emit) when the value it guards changes.
//! - [`Effect`] - side effect that re-runs when a tracked signal changes.
//! - [`Computed<T>`] - memoized derived value; notifies only when the result changes.
//! - [`Transaction`] - batch writes so observers run once on the final state.
//! - [`Store<T>`] - value-owning cell with an equality short-circuit.
//! - [`Event<T>`] - typed callback dispatcher; each emission is one batch.
//! - [`Fx<R, E>`] - async effect reporting `started`/`done`/`failed` events.
//!
//! # Propagation
//!
//! Writes are applied immediately. Observers run when the outermost
//! transaction ends, derived values first, so no observer ever sees a
//! half-applied update:
//!
//! ```ignore
//! let first = Store::new("Ada".to_string());
//! let last = Store::new("Byron".to_string());
//! let full = Computed::new({
//!     let (first, last) = (first.clone(), last.clone());
//!     move || format!("{} {}", first.get(), last.get())
//! });
//! let _print = full.watch(|name| println!("{name}"));
//!
//! Transaction::run(|| {
//!     first.set("Ada".into());
//!     last.set("Lovelace".into());
//! }); // prints "Ada Lovelace" once
//! ```
//!
//! The runtime is per thread. Values never cross threads and nothing locks.

pub(crate) mod arena;
mod computed;
mod effect;
mod event;
mod form;
mod fx;
mod hash;
mod signal;
mod store;
mod transaction;

// Core types
pub use computed::Computed;
pub use effect::Effect;
pub use signal::Signal;
pub use transaction::{Transaction, is_transaction_active};

// Building blocks used by forms
pub use event::{Event, Subscription};
pub use fx::{Fx, FxFuture, TaskQueue};
pub use store::Store;

pub use hash::FastHashBuilder;

// Key functions
pub use effect::{flush_effects, is_processing_scheduled, untracked};

// Forms
pub use form::{
    AdapterError, AnyField, Field, FieldConfig, FieldErrors, FieldType, FieldValidationResult,
    FieldValidator, FieldValue, Form, FormError, FormValidationResult, FormValidator, Schema,
    SchemaAdapter, SchemaBuilder, SubmitState, ValidateOn, ValidationFuture, ValidationScope,
    ValidatorFault, ValidityPolicy, ValueKind, Values, create_form,
};
