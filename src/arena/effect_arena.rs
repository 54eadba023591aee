// Effect arena - storage for watcher and derived-cell metadata
//
// Every node that tracks dependencies lives here: plain watcher effects
// (`Effect`, store watchers) and the recompute half of a `Computed`.
//
// THREE-STATE REACTIVE SYSTEM:
// - Clean (0): value is current, use cached
// - Check (1): might be stale, verify sources first
// - Dirty (2): definitely stale, must recompute
//
// A signal change marks direct subscribers Dirty and everything downstream of
// a derived cell Check. Check nodes only rerun when one of their sources turns
// out to have actually changed, so observers of an unchanged derived value are
// left alone.

use crate::hash::FastHashBuilder;
use indexmap::IndexSet;
use slab::Slab;
use std::cell::{Cell, RefCell};

use super::SignalId;

/// Reactive node states.
///
/// States only upgrade (Clean -> Check -> Dirty) during propagation. After a
/// node runs it resets to Clean.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReactiveState {
    /// Value is current, use cached
    Clean = 0,
    /// Might be stale, verify sources first
    Check = 1,
    /// Definitely stale, must recompute
    Dirty = 2,
}

/// Role of an arena node. Derived cells are flushed before watchers so that
/// observers never see a half-updated graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EffectKind {
    /// Side-effecting observer
    Watcher,
    /// Recompute step of a `Computed`
    Derived,
}

thread_local! {
    static EFFECT_ARENA: RefCell<Slab<EffectMetadata>> = const { RefCell::new(Slab::new()) };

    // Pending nodes in the order they were marked. Insertion order is the
    // order watchers observe a change in.
    static PENDING_EFFECTS: RefCell<IndexSet<EffectId, FastHashBuilder>> =
        RefCell::new(IndexSet::with_hasher(FastHashBuilder));

    static CURRENT_EFFECT: Cell<Option<EffectId>> = const { Cell::new(None) };
}

/// Get the currently executing effect (if any)
pub fn current_effect() -> Option<EffectId> {
    CURRENT_EFFECT.with(Cell::get)
}

/// Set the currently executing effect, returning the previous one
pub fn set_current_effect(effect_id: Option<EffectId>) -> Option<EffectId> {
    CURRENT_EFFECT.with(|c| c.replace(effect_id))
}

/// RAII guard that restores CURRENT_EFFECT when dropped, even on panic.
pub struct CurrentEffectGuard {
    previous: Option<EffectId>,
}

impl CurrentEffectGuard {
    /// Sets CURRENT_EFFECT to `new_value` until the guard is dropped.
    pub fn new(new_value: Option<EffectId>) -> Self {
        let previous = set_current_effect(new_value);
        Self { previous }
    }
}

impl Drop for CurrentEffectGuard {
    fn drop(&mut self) {
        set_current_effect(self.previous);
    }
}

/// Identifier for an effect node in the arena.
///
/// Dropping the owning `Effect` removes the node, after which every accessor
/// returns `None` or a neutral default.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct EffectId(u32);

impl EffectId {
    /// Create a new EffectId from a raw index
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Convert to usize for slab indexing
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Access the effect metadata with a closure (read-only)
    ///
    /// Returns None if the effect has been removed or the thread's arena is
    /// already torn down.
    pub fn with<F, R>(self, f: F) -> Option<R>
    where
        F: FnOnce(&EffectMetadata) -> R,
    {
        EFFECT_ARENA
            .try_with(|arena| arena.borrow().get(self.index()).map(f))
            .ok()
            .flatten()
    }

    /// Snapshot of the signals this effect currently depends on
    pub fn sources(self) -> Vec<SignalId> {
        self.with(|metadata| metadata.sources.borrow().iter().copied().collect())
            .unwrap_or_default()
    }

    /// Add a source to this effect's dependency list (deduplicated)
    pub fn add_source(self, source: SignalId) -> Option<()> {
        self.with(|metadata| {
            metadata.sources.borrow_mut().insert(source);
        })
    }

    /// Remove a specific source, e.g. when the signal is dropped
    pub fn remove_source(self, source: SignalId) -> Option<()> {
        self.with(|metadata| {
            metadata.sources.borrow_mut().shift_remove(&source);
        })
    }

    /// Drain all sources, returning what was tracked
    pub fn take_sources(self) -> Vec<SignalId> {
        self.with(|metadata| metadata.sources.borrow_mut().drain(..).collect())
            .unwrap_or_default()
    }

    /// Check if a signal is a source (dependency) of this effect
    pub fn has_source(self, signal_id: SignalId) -> bool {
        self.with(|metadata| metadata.sources.borrow().contains(&signal_id))
            .unwrap_or(false)
    }

    /// Get the current reactive state. Removed nodes report Clean.
    pub fn state(self) -> ReactiveState {
        self.with(|metadata| metadata.state.get())
            .unwrap_or(ReactiveState::Clean)
    }

    /// Set the reactive state
    pub fn set_state(self, state: ReactiveState) {
        self.with(|metadata| metadata.state.set(state));
    }

    /// Replace the reactive state, returning the previous one
    pub fn replace_state(self, state: ReactiveState) -> Option<ReactiveState> {
        self.with(|metadata| metadata.state.replace(state))
    }

    /// Check if this effect needs any work (state != Clean)
    pub fn needs_work(self) -> bool {
        self.state() != ReactiveState::Clean
    }

    /// Role of this node. Removed nodes report Watcher.
    pub fn kind(self) -> EffectKind {
        self.with(|metadata| metadata.kind)
            .unwrap_or(EffectKind::Watcher)
    }

    /// Output signal of a derived node
    pub fn output(self) -> Option<SignalId> {
        self.with(|metadata| metadata.output).flatten()
    }

    /// Install the callback run on every recompute
    pub fn set_callback(self, callback: Box<dyn FnMut()>) {
        let mut slot = Some(callback);
        self.with(|metadata| *metadata.callback.borrow_mut() = slot.take());
        // `slot` still holds the callback if the node is gone; it drops here,
        // after the arena borrow has ended.
    }

    /// Check if this effect has a callback installed (and not currently running)
    pub fn has_callback(self) -> bool {
        self.with(|metadata| metadata.callback.borrow().is_some())
            .unwrap_or(false)
    }

    /// Run the callback stored in the arena for this effect.
    ///
    /// The callback is taken out of the arena while it runs, so it may freely
    /// create or drop other nodes. A drop guard puts it back even on panic.
    pub fn run_callback(self) {
        struct CallbackGuard {
            effect_id: EffectId,
            callback: Option<Box<dyn FnMut()>>,
        }

        impl Drop for CallbackGuard {
            fn drop(&mut self) {
                if self.callback.is_some() {
                    let mut slot = self.callback.take();
                    self.effect_id
                        .with(|metadata| *metadata.callback.borrow_mut() = slot.take());
                }
            }
        }

        let callback = self
            .with(|metadata| metadata.callback.borrow_mut().take())
            .flatten();

        if let Some(cb) = callback {
            let mut guard = CallbackGuard {
                effect_id: self,
                callback: Some(cb),
            };
            if let Some(cb) = guard.callback.as_mut() {
                cb();
            }
        }
    }

    /// Recursively mark this effect and everything downstream of it as Check.
    pub fn mark_check_recursive(self) {
        if self.state() != ReactiveState::Clean {
            return;
        }
        cov_mark::hit!(marking_effect_check_recursive);
        self.set_state(ReactiveState::Check);
        PENDING_EFFECTS.with(|pending| {
            pending.borrow_mut().insert(self);
        });

        if let Some(output) = self.output() {
            output.mark_subscribers_check();
        }
    }

    /// Run this effect if its state requires it.
    ///
    /// Check nodes pull their sources first and only run when a source
    /// upgraded them to Dirty. Returns true if the callback ran.
    pub fn update_if_necessary(self) -> bool {
        match self.state() {
            ReactiveState::Clean => false,

            ReactiveState::Check => {
                for source_id in self.sources() {
                    source_id.pull();
                    if self.state() == ReactiveState::Dirty {
                        cov_mark::hit!(check_upgraded_to_dirty_by_pull);
                        break;
                    }
                }

                if self.state() == ReactiveState::Check {
                    cov_mark::hit!(check_verified_clean);
                    self.set_state(ReactiveState::Clean);
                    return false;
                }

                run_single_effect(self);
                true
            }

            ReactiveState::Dirty => {
                cov_mark::hit!(dirty_running);
                run_single_effect(self);
                true
            }
        }
    }
}

/// Metadata for one effect node.
///
/// The callback is stored in the arena, which keeps `Effect` a thin wrapper
/// around an `EffectId`.
pub struct EffectMetadata {
    pub(crate) state: Cell<ReactiveState>,
    pub(crate) kind: EffectKind,
    pub(crate) callback: RefCell<Option<Box<dyn FnMut()>>>,
    /// Signals read during the last run, in read order.
    pub(crate) sources: RefCell<IndexSet<SignalId, FastHashBuilder>>,
    /// The signal a derived node writes its value through.
    pub(crate) output: Option<SignalId>,
}

impl EffectMetadata {
    /// Watcher metadata with the callback installed (state = Clean)
    pub fn watcher(callback: Box<dyn FnMut()>) -> Self {
        Self {
            state: Cell::new(ReactiveState::Clean),
            kind: EffectKind::Watcher,
            callback: RefCell::new(Some(callback)),
            sources: RefCell::new(IndexSet::with_hasher(FastHashBuilder)),
            output: None,
        }
    }

    /// Derived-cell metadata writing through `output`. The callback is
    /// installed after the first computation.
    pub fn derived(output: SignalId) -> Self {
        Self {
            state: Cell::new(ReactiveState::Clean),
            kind: EffectKind::Derived,
            callback: RefCell::new(None),
            sources: RefCell::new(IndexSet::with_hasher(FastHashBuilder)),
            output: Some(output),
        }
    }
}

/// Insert effect metadata into the arena and return its ID
pub fn effect_arena_insert(metadata: EffectMetadata) -> EffectId {
    EFFECT_ARENA.with(|arena| EffectId::new(arena.borrow_mut().insert(metadata) as u32))
}

/// Remove an effect from the arena.
///
/// The metadata is handed back so the caller drops the callback (and whatever
/// it captured) outside the arena borrow.
pub fn effect_arena_remove(id: EffectId) -> Option<EffectMetadata> {
    EFFECT_ARENA
        .try_with(|arena| arena.borrow_mut().try_remove(id.index()))
        .ok()
        .flatten()
}

/// Mark an effect Dirty and queue it.
///
/// Returns true if the effect was not already Dirty.
pub fn mark_effect_pending(effect_id: EffectId) -> bool {
    let was_not_dirty = effect_id
        .replace_state(ReactiveState::Dirty)
        .is_some_and(|previous| previous != ReactiveState::Dirty);

    if was_not_dirty {
        let _ = PENDING_EFFECTS.try_with(|pending| pending.borrow_mut().insert(effect_id));
    }

    was_not_dirty
}

/// Drain the pending set, derived nodes first, preserving mark order within
/// each group.
pub fn take_pending_effects_split(derived: &mut Vec<EffectId>, watchers: &mut Vec<EffectId>) {
    let drained: Vec<EffectId> =
        PENDING_EFFECTS.with(|pending| pending.borrow_mut().drain(..).collect());
    for effect in drained {
        match effect.kind() {
            EffectKind::Derived => derived.push(effect),
            EffectKind::Watcher => watchers.push(effect),
        }
    }
}

/// Remove an effect from the pending set (used when an effect runs or is destroyed).
pub fn remove_from_pending_set(effect_id: EffectId) {
    let _ = PENDING_EFFECTS.try_with(|pending| pending.borrow_mut().shift_remove(&effect_id));
}

/// Number of queued effects on this thread
#[cfg(test)]
pub fn pending_effects_count() -> usize {
    PENDING_EFFECTS.with(|pending| pending.borrow().len())
}

use crate::effect::run_single_effect;

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn stale_access_returns_none() {
        let id = effect_arena_insert(EffectMetadata::watcher(Box::new(|| {})));

        drop(effect_arena_remove(id));

        assert!(id.with(|_| ()).is_none());
        assert_eq!(id.state(), ReactiveState::Clean);
        assert_eq!(id.add_source(SignalId::new(1)), None);
        assert!(id.sources().is_empty());
    }

    #[test]
    fn effect_callback_restored_on_panic() {
        let run_count = Rc::new(Cell::new(0));
        let run_count_clone = run_count.clone();

        let id = effect_arena_insert(EffectMetadata::watcher(Box::new(move || {
            let count = run_count_clone.get();
            run_count_clone.set(count + 1);
            if count == 0 {
                panic!("test panic in callback");
            }
        })));

        assert!(id.has_callback());

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| id.run_callback()));
        assert!(result.is_err());
        assert_eq!(run_count.get(), 1);

        // Callback was put back by the guard
        assert!(id.has_callback());
        id.run_callback();
        assert_eq!(run_count.get(), 2);

        drop(effect_arena_remove(id));
    }

    #[test]
    fn current_effect_guard_restores_on_panic() {
        let effect1 = EffectId::new(10);
        let effect2 = EffectId::new(20);

        set_current_effect(Some(effect1));

        let result = std::panic::catch_unwind(|| {
            let _guard = CurrentEffectGuard::new(Some(effect2));
            assert_eq!(current_effect(), Some(effect2));
            panic!("test panic");
        });

        assert!(result.is_err());
        assert_eq!(current_effect(), Some(effect1));

        set_current_effect(None);
    }

    #[test]
    fn pending_split_puts_derived_first() {
        let watcher = effect_arena_insert(EffectMetadata::watcher(Box::new(|| {})));
        let derived = effect_arena_insert(EffectMetadata::derived(SignalId::new(0)));

        mark_effect_pending(watcher);
        mark_effect_pending(derived);
        assert_eq!(pending_effects_count(), 2);

        let mut derived_ids = Vec::new();
        let mut watcher_ids = Vec::new();
        take_pending_effects_split(&mut derived_ids, &mut watcher_ids);

        assert_eq!(derived_ids, vec![derived]);
        assert_eq!(watcher_ids, vec![watcher]);
        assert_eq!(pending_effects_count(), 0);

        drop(effect_arena_remove(watcher));
        drop(effect_arena_remove(derived));
    }

    #[test]
    fn marking_pending_twice_reports_first_only() {
        let id = effect_arena_insert(EffectMetadata::watcher(Box::new(|| {})));

        assert!(mark_effect_pending(id));
        assert!(!mark_effect_pending(id));
        assert_eq!(id.state(), ReactiveState::Dirty);

        remove_from_pending_set(id);
        drop(effect_arena_remove(id));
    }
}
