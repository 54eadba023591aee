//! Typed, payload-carrying events.

use crate::Transaction;
use crate::hash::FastHashBuilder;
use indexmap::IndexMap;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

type Handler<T> = Rc<dyn Fn(&T)>;

struct Handlers<T> {
    next_key: Cell<u64>,
    handlers: RefCell<IndexMap<u64, Handler<T>, FastHashBuilder>>,
}

/// A named occurrence with a payload.
///
/// Emitting runs every handler in registration order, all inside one
/// [`Transaction`], so watchers of anything the handlers write run once the
/// whole emission is applied. Clones share the same handler list.
pub struct Event<T> {
    inner: Rc<Handlers<T>>,
}

impl<T> Clone for Event<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: 'static> Default for Event<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Event<T> {
    /// Create an event with no handlers
    pub fn new() -> Self {
        Self {
            inner: Rc::new(Handlers {
                next_key: Cell::new(0),
                handlers: RefCell::new(IndexMap::with_hasher(FastHashBuilder)),
            }),
        }
    }

    /// Fire the event.
    ///
    /// Handlers registered while the event is being dispatched first see the
    /// next emission.
    pub fn emit(&self, payload: T) {
        let handlers: Vec<Handler<T>> = self.inner.handlers.borrow().values().cloned().collect();
        Transaction::run(|| {
            for handler in &handlers {
                handler(&payload);
            }
        });
    }

    /// Observe the event until the returned guard is dropped
    pub fn watch(&self, handler: impl Fn(&T) + 'static) -> Subscription {
        let key = self.attach(Rc::new(handler));
        let handlers = Rc::downgrade(&self.inner);
        Subscription::new(move || detach(&handlers, key))
    }

    /// Attach a handler for as long as the event lives
    pub(crate) fn on(&self, handler: impl Fn(&T) + 'static) {
        self.attach(Rc::new(handler));
    }

    fn attach(&self, handler: Handler<T>) -> u64 {
        let key = self.inner.next_key.get();
        self.inner.next_key.set(key + 1);
        self.inner.handlers.borrow_mut().insert(key, handler);
        key
    }

    /// Number of attached handlers
    pub fn handler_count(&self) -> usize {
        self.inner.handlers.borrow().len()
    }

    /// New event that forwards into this one after mapping its payload.
    ///
    /// Handy for routing a foreign event shape into a form, e.g. a button
    /// click into `cleared`.
    pub fn prepend<U: 'static>(&self, f: impl Fn(&U) -> T + 'static) -> Event<U> {
        let target = self.clone();
        let source = Event::new();
        source.on(move |payload| target.emit(f(payload)));
        source
    }

    /// Derived event that fires with a mapped payload whenever this one fires
    pub fn map<U: 'static>(&self, f: impl Fn(&T) -> U + 'static) -> Event<U> {
        let derived = Event::new();
        let target = derived.clone();
        self.on(move |payload| target.emit(f(payload)));
        derived
    }

    /// Derived event that fires only for payloads matching `predicate`
    pub fn filter(&self, predicate: impl Fn(&T) -> bool + 'static) -> Event<T>
    where
        T: Clone,
    {
        let derived = Event::new();
        let target = derived.clone();
        self.on(move |payload| {
            if predicate(payload) {
                target.emit(payload.clone());
            }
        });
        derived
    }
}

fn detach<T>(handlers: &Weak<Handlers<T>>, key: u64) {
    let Some(handlers) = handlers.upgrade() else {
        return;
    };
    let removed = handlers.handlers.borrow_mut().shift_remove(&key);
    // The handler may own other events; drop it after the borrow ends.
    drop(removed);
}

impl<T> fmt::Debug for Event<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("handlers", &self.inner.handlers.borrow().len())
            .finish()
    }
}

/// Guard returned by [`Event::watch`]. Dropping it detaches the handler.
#[must_use = "dropping a Subscription detaches its handler"]
pub struct Subscription {
    detach: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    fn new(detach: impl FnOnce() + 'static) -> Self {
        Self {
            detach: Some(Box::new(detach)),
        }
    }

    /// Detach now
    pub fn unsubscribe(mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("attached", &self.detach.is_some())
            .finish()
    }
}
