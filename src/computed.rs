use crate::arena::{CurrentEffectGuard, EffectMetadata, effect_arena_insert, mark_effect_pending};
use crate::{Effect, Signal, untracked};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Memoized derived value that updates when its dependencies change
///
/// A Computed caches its result, recomputes only when a dependency changed,
/// and only notifies subscribers when the new value differs from the cached
/// one (`T: PartialEq`).
///
/// # How it works
/// Internally a Computed is:
/// - an effect node that tracks dependencies and recomputes the value
/// - a signal other nodes subscribe to, with the effect registered as its writer
/// - the cached value
///
/// Reading a stale Computed recomputes it on the spot, so a value is never
/// observed out of date even before the next flush.
///
/// # Example
/// ```ignore
/// let password = Store::new(String::new());
/// let long_enough = Computed::new({
///     let password = password.clone();
///     move || password.with(|p| p.len() >= 8)
/// });
///
/// assert!(!long_enough.get());
/// password.set("correct horse".into());
/// assert!(long_enough.get());
/// ```
pub struct Computed<T> {
    // Dropped first: subscribers detach before the effect node goes away.
    signal: Signal,
    effect: Effect,
    value: Rc<RefCell<T>>,
}

impl<T: Clone + PartialEq + 'static> Computed<T> {
    /// Create a new computed value
    ///
    /// The computation runs immediately; dependencies are tracked from the
    /// signals it reads.
    pub fn new<F>(f: F) -> Rc<Self>
    where
        F: FnMut() -> T + 'static,
    {
        let mut f = f;
        let signal = Signal::new();
        let signal_id = signal.id();

        let effect_id = effect_arena_insert(EffectMetadata::derived(signal_id));
        signal_id.set_writer(Some(effect_id));

        let initial = {
            let _guard = CurrentEffectGuard::new(Some(effect_id));
            f()
        };
        let value = Rc::new(RefCell::new(initial));

        let cached = value.clone();
        effect_id.set_callback(Box::new(move || {
            let next = f();
            let changed = *cached.borrow() != next;
            if changed {
                *cached.borrow_mut() = next;
                signal_id.notify_subscribers();
            } else {
                cov_mark::hit!(computed_unchanged_skips_notify);
            }
        }));

        Rc::new(Self {
            signal,
            effect: Effect::from_raw(effect_id),
            value,
        })
    }

    /// Get the memoized value, tracking it as a dependency
    ///
    /// Recomputes first if the value is stale.
    pub fn get(&self) -> T {
        self.signal.track_dependency();
        self.value.borrow().clone()
    }

    /// Get the value without subscribing the running effect
    pub fn get_untracked(&self) -> T {
        untracked(|| self.get())
    }

    /// Borrow the value, tracking it as a dependency
    ///
    /// The closure must not write to anything this value depends on.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.signal.track_dependency();
        f(&self.value.borrow())
    }

    /// Mark the value stale; the next flush or read recomputes it
    pub fn invalidate(&self) {
        mark_effect_pending(self.effect.id());
    }

    /// Run `f` with the current value now and after every change
    pub fn watch(self: &Rc<Self>, mut f: impl FnMut(&T) + 'static) -> Effect {
        let this = self.clone();
        Effect::new(move || {
            let value = this.get();
            f(&value);
        })
    }
}

impl<T: fmt::Debug> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("value", &self.value.borrow())
            .finish_non_exhaustive()
    }
}
