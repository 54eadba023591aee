//! Value-owning state cells.

use crate::{Computed, Effect, Signal, Transaction, untracked};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// A piece of state with change notification.
///
/// A `Store` owns its value next to a [`Signal`]. Reading inside an effect or
/// computed subscribes it; writing a different value notifies subscribers.
/// Writing an equal value is a no-op. Clones share the same cell.
pub struct Store<T> {
    inner: Rc<StoreInner<T>>,
}

struct StoreInner<T> {
    value: RefCell<T>,
    initial: T,
    signal: Signal,
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + PartialEq + 'static> Store<T> {
    /// Create a store holding `initial`, which is also what [`reset`](Self::reset) restores.
    pub fn new(initial: T) -> Self {
        Self {
            inner: Rc::new(StoreInner {
                value: RefCell::new(initial.clone()),
                initial,
                signal: Signal::new(),
            }),
        }
    }

    /// Current value, tracked
    pub fn get(&self) -> T {
        self.inner.signal.track_dependency();
        self.inner.value.borrow().clone()
    }

    /// Current value, not tracked
    pub fn get_untracked(&self) -> T {
        untracked(|| self.get())
    }

    /// Borrow the current value, tracked.
    ///
    /// Do not write to this store from inside `f`.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.signal.track_dependency();
        f(&self.inner.value.borrow())
    }

    /// Replace the value. Returns false (and notifies nobody) when the new
    /// value equals the current one.
    pub fn set(&self, value: T) -> bool {
        if *self.inner.value.borrow() == value {
            cov_mark::hit!(store_set_same_value);
            return false;
        }
        Transaction::run(|| {
            let previous = self.inner.value.replace(value);
            self.inner.signal.emit();
            drop(previous);
        });
        true
    }

    /// Derive the next value from the current one
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> bool {
        let next = {
            let current = self.inner.value.borrow();
            f(&current)
        };
        self.set(next)
    }

    /// Restore the initial value
    pub fn reset(&self) -> bool {
        self.set(self.inner.initial.clone())
    }

    /// The value this store was created with
    pub fn initial(&self) -> &T {
        &self.inner.initial
    }

    /// Derived value computed from this store
    pub fn map<U, F>(&self, f: F) -> Rc<Computed<U>>
    where
        U: Clone + PartialEq + 'static,
        F: Fn(&T) -> U + 'static,
    {
        let store = self.clone();
        Computed::new(move || store.with(&f))
    }

    /// Run `f` with the current value now and after every change
    pub fn watch(&self, mut f: impl FnMut(&T) + 'static) -> Effect {
        let store = self.clone();
        Effect::new(move || {
            let value = store.get();
            f(&value);
        })
    }
}

impl<T: fmt::Debug> fmt::Debug for Store<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Store").field(&self.inner.value.borrow()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn set_equal_value_is_silent() {
        cov_mark::check!(store_set_same_value);

        let store = Store::new("a".to_string());
        let runs = Rc::new(Cell::new(0));
        let _watch = store.watch({
            let runs = runs.clone();
            move |_| runs.set(runs.get() + 1)
        });

        assert!(!store.set("a".to_string()));
        assert_eq!(runs.get(), 1);

        assert!(store.set("b".to_string()));
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn reset_restores_initial_value() {
        let store = Store::new(3);
        store.update(|n| n * 7);
        assert_eq!(store.get(), 21);

        assert!(store.reset());
        assert_eq!(store.get(), 3);
        assert_eq!(*store.initial(), 3);
    }

    #[test]
    fn clones_share_state() {
        let a = Store::new(false);
        let b = a.clone();

        b.set(true);
        assert!(a.get());
    }

    #[test]
    fn watcher_sees_each_committed_value() {
        let store = Store::new(0);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let _watch = store.watch({
            let seen = seen.clone();
            move |v| seen.borrow_mut().push(*v)
        });

        store.set(1);
        Transaction::run(|| {
            store.set(2);
            store.set(3);
        });

        assert_eq!(*seen.borrow(), vec![0, 1, 3]);
    }
}
