// Signal arena - storage for signal metadata
//
// MODEL:
// - Signal = only emits (subscribers, NO sources)
// - Effect = only tracks dependencies (sources + state)
// - Computed = Signal + Effect, the effect registered as the signal's writer
//
// PUSH-PULL:
// - Emitting pushes Dirty/Check marks down the graph
// - Reading a signal first pulls its writer, so a stale derived value is
//   recomputed before anyone observes it

use crate::hash::FastHashBuilder;
use indexmap::IndexSet;
use slab::Slab;
use std::cell::{Cell, RefCell};

use super::EffectId;

thread_local! {
    static SIGNAL_ARENA: RefCell<Slab<SignalMetadata>> = const { RefCell::new(Slab::new()) };
}

/// Identifier for a signal node in the arena.
///
/// When a Signal is dropped it removes itself from the arena, making this id
/// stale. Accessing a stale SignalId returns None.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct SignalId(u32);

impl SignalId {
    /// Create a new SignalId from a raw index
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Convert to usize for slab indexing
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Access the signal metadata with a closure (read-only)
    pub fn with<F, R>(self, f: F) -> Option<R>
    where
        F: FnOnce(&SignalMetadata) -> R,
    {
        SIGNAL_ARENA
            .try_with(|arena| arena.borrow().get(self.index()).map(f))
            .ok()
            .flatten()
    }

    /// Track this signal as a dependency of the running effect, if any.
    ///
    /// Pulls first so a stale writer recomputes before the value is read.
    pub fn track_dependency(self) {
        use super::effect_arena::current_effect;

        self.pull();

        if let Some(effect_id) = current_effect() {
            effect_id.add_source(self);
            self.add_subscriber(effect_id);
        }
    }

    /// Add a subscriber (deduplicated, kept in subscription order)
    pub fn add_subscriber(self, effect_id: EffectId) {
        self.with(|metadata| {
            metadata.subscribers.borrow_mut().insert(effect_id);
        });
    }

    /// Remove a subscriber from this signal
    pub fn remove_subscriber(self, effect_id: EffectId) {
        self.with(|metadata| {
            metadata.subscribers.borrow_mut().shift_remove(&effect_id);
        });
    }

    /// Snapshot of the current subscribers.
    ///
    /// Callers iterate the snapshot, so subscribers may (un)subscribe while
    /// being notified.
    pub fn subscribers(self) -> Vec<EffectId> {
        self.with(|metadata| metadata.subscribers.borrow().iter().copied().collect())
            .unwrap_or_default()
    }

    /// The derived node that produces this signal's value, if any
    pub fn writer(self) -> Option<EffectId> {
        self.with(|metadata| metadata.writer.get()).flatten()
    }

    /// Register (or clear) the derived node writing this signal
    pub fn set_writer(self, writer: Option<EffectId>) {
        self.with(|metadata| metadata.writer.set(writer));
    }

    /// Mark all subscribers (and their downstream) as Check.
    pub fn mark_subscribers_check(self) {
        let subscribers = self.subscribers();
        if !subscribers.is_empty() {
            cov_mark::hit!(signal_marking_subscribers_check);
        }
        for effect_id in subscribers {
            effect_id.mark_check_recursive();
        }
    }

    /// Notify all subscribers that this signal has changed.
    ///
    /// Direct subscribers become Dirty, dependents of derived subscribers
    /// become Check.
    pub fn notify_subscribers(self) {
        use super::effect_arena::mark_effect_pending;

        for effect_id in self.subscribers() {
            mark_effect_pending(effect_id);

            if let Some(output) = effect_id.output() {
                output.mark_subscribers_check();
            }
        }
    }

    /// Bring this signal up to date by running its writer if it is stale.
    ///
    /// Check writers verify their own sources first and only recompute when
    /// one of them actually changed.
    pub fn pull(self) {
        use super::effect_arena::current_effect;

        let Some(writer) = self.writer() else {
            return;
        };
        // The writer is reading its own output: nothing to pull
        if Some(writer) == current_effect() {
            return;
        }
        writer.update_if_necessary();
    }
}

/// Metadata for a signal stored in the arena.
///
/// The value itself lives outside the arena (in a `Store` or `Computed`).
#[derive(Debug)]
pub struct SignalMetadata {
    /// Effects subscribed to this signal, notified in subscription order.
    pub(crate) subscribers: RefCell<IndexSet<EffectId, FastHashBuilder>>,
    pub(crate) writer: Cell<Option<EffectId>>,
}

impl SignalMetadata {
    /// Create new signal metadata with no subscribers and no writer
    pub fn new() -> Self {
        Self {
            subscribers: RefCell::new(IndexSet::with_hasher(FastHashBuilder)),
            writer: Cell::new(None),
        }
    }
}

impl Default for SignalMetadata {
    fn default() -> Self {
        Self::new()
    }
}

/// Insert a signal into the arena and return its ID
pub fn signal_arena_insert(metadata: SignalMetadata) -> SignalId {
    SIGNAL_ARENA.with(|arena| SignalId::new(arena.borrow_mut().insert(metadata) as u32))
}

/// Remove a signal from the arena
pub fn signal_arena_remove(id: SignalId) -> Option<SignalMetadata> {
    SIGNAL_ARENA
        .try_with(|arena| arena.borrow_mut().try_remove(id.index()))
        .ok()
        .flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_access_returns_none() {
        let id = signal_arena_insert(SignalMetadata::new());

        signal_arena_remove(id);

        assert!(id.with(|_| ()).is_none());
        assert!(id.subscribers().is_empty());
        assert_eq!(id.writer(), None);
    }

    #[test]
    fn subscribers_keep_subscription_order() {
        let id = signal_arena_insert(SignalMetadata::new());

        id.add_subscriber(EffectId::new(7));
        id.add_subscriber(EffectId::new(3));
        id.add_subscriber(EffectId::new(7));
        id.add_subscriber(EffectId::new(5));
        id.remove_subscriber(EffectId::new(3));

        assert_eq!(id.subscribers(), vec![EffectId::new(7), EffectId::new(5)]);

        signal_arena_remove(id);
    }
}
