use crate::arena::{
    CurrentEffectGuard, EffectId, EffectMetadata, ReactiveState, effect_arena_insert,
    effect_arena_remove, mark_effect_pending, remove_from_pending_set, take_pending_effects_split,
};
use std::cell::Cell;

thread_local! {
    // Set by signal emissions outside any transaction; cleared by a flush.
    static PROCESSING_SCHEDULED: Cell<bool> = const { Cell::new(false) };

    // True while `Effect::process_all` is draining the pending set.
    static FLUSHING: Cell<bool> = const { Cell::new(false) };
}

/// Schedule effect processing without running effects yet
///
/// Multiple calls only schedule one processing. Effects actually run when
/// `flush_effects()` is called or the outermost transaction ends.
pub fn schedule_effect_processing() {
    PROCESSING_SCHEDULED.with(|scheduled| scheduled.set(true));
}

/// Returns true if a signal was emitted outside a transaction and
/// `flush_effects()` has not run since.
pub fn is_processing_scheduled() -> bool {
    PROCESSING_SCHEDULED.with(Cell::get)
}

/// Process all pending effects immediately
///
/// Returns the number of effects processed. Calling this from inside an
/// effect that is itself being flushed is a no-op; the outer flush picks the
/// new work up.
pub fn flush_effects() -> usize {
    PROCESSING_SCHEDULED.with(|scheduled| scheduled.set(false));
    Effect::process_all()
}

/// Run a single effect by its ID
///
/// 1. Skip if the effect is gone or Clean
/// 2. Reset to Clean and dequeue
/// 3. Unsubscribe from the previous run's sources
/// 4. Run the callback with CURRENT_EFFECT set, which re-tracks sources
pub(crate) fn run_single_effect(effect_id: EffectId) {
    if !effect_id.needs_work() {
        return;
    }

    effect_id.set_state(ReactiveState::Clean);
    remove_from_pending_set(effect_id);

    if !effect_id.has_callback() {
        return;
    }

    for source_id in effect_id.take_sources() {
        source_id.remove_subscriber(effect_id);
    }

    let _guard = CurrentEffectGuard::new(Some(effect_id));
    effect_id.run_callback();
}

/// Run a closure without tracking dependencies
///
/// # Example
/// ```ignore
/// let effect = Effect::new(move || {
///     // re-runs when `name` changes
///     let name = name.get();
///     // ...but not when `greeting` does
///     let greeting = untracked(|| greeting.get());
/// });
/// ```
pub fn untracked<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = CurrentEffectGuard::new(None);
    f()
}

/// Side-effectful computation that re-runs when its dependencies change
///
/// 1. Runs immediately on creation, tracking every signal it reads
/// 2. When a tracked signal changes the effect is marked pending
/// 3. Pending effects run once per flush, however many changes they saw
///
/// Dropping the handle stops the effect.
///
/// # Example
/// ```ignore
/// let email = Store::new(String::new());
///
/// let _log = Effect::new({
///     let email = email.clone();
///     move || tracing::info!(email = %email.get(), "email changed")
/// });
///
/// email.set("jane@example.com".into()); // logs once
/// ```
#[must_use = "dropping an Effect stops it"]
pub struct Effect {
    id: EffectId,
}

impl Effect {
    /// Create a new effect (runs immediately)
    pub fn new<F>(f: F) -> Self
    where
        F: FnMut() + 'static,
    {
        let id = effect_arena_insert(EffectMetadata::watcher(Box::new(f)));
        let effect = Self { id };
        effect.run_now();
        effect
    }

    /// Run this effect immediately, re-tracking its dependencies
    pub(crate) fn run_now(&self) {
        self.id.set_state(ReactiveState::Dirty);
        run_single_effect(self.id);
    }

    /// Mark this effect pending so the next flush re-runs it
    pub fn invalidate(&self) {
        mark_effect_pending(self.id);
    }

    /// Arena id of this effect
    pub(crate) fn id(&self) -> EffectId {
        self.id
    }

    /// Wrap an already set-up EffectId so Drop handles cleanup
    pub(crate) fn from_raw(id: EffectId) -> Self {
        Self { id }
    }

    /// Process all pending effects using fixed-point iteration
    ///
    /// Each round drains the pending set and runs derived cells before
    /// watchers, so a watcher always reads settled derived values. Rounds
    /// repeat until effects stop queueing new work.
    pub fn process_all() -> usize {
        struct FlushGuard;

        impl Drop for FlushGuard {
            fn drop(&mut self) {
                FLUSHING.with(|flushing| flushing.set(false));
            }
        }

        if FLUSHING.with(|flushing| flushing.replace(true)) {
            cov_mark::hit!(nested_flush_deferred);
            return 0;
        }
        let _guard = FlushGuard;

        let mut total = 0;
        let mut derived = Vec::new();
        let mut watchers = Vec::new();

        loop {
            take_pending_effects_split(&mut derived, &mut watchers);
            if derived.is_empty() && watchers.is_empty() {
                break;
            }

            for effect_id in derived.drain(..).chain(watchers.drain(..)) {
                if effect_id.needs_work() {
                    effect_id.update_if_necessary();
                    total += 1;
                }
            }
        }

        total
    }
}

impl Drop for Effect {
    fn drop(&mut self) {
        remove_from_pending_set(self.id);

        for source_id in self.id.take_sources() {
            source_id.remove_subscriber(self.id);
        }

        // The callback may own other reactive nodes; it drops here, outside
        // the arena borrow.
        drop(effect_arena_remove(self.id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Signal, Transaction};
    use std::rc::Rc;

    fn counter() -> (Rc<Cell<usize>>, impl Fn() -> usize) {
        let count = Rc::new(Cell::new(0));
        let read = {
            let count = count.clone();
            move || count.get()
        };
        (count, read)
    }

    #[test]
    fn effect_debounces_rapid_invalidations() {
        let (count, runs) = counter();

        let effect = Effect::new(move || count.set(count.get() + 1));
        assert_eq!(runs(), 1);

        for _ in 0..20 {
            effect.invalidate();
        }
        Effect::process_all();

        // 1 initial + 1 debounced
        assert_eq!(runs(), 2);
    }

    #[test]
    fn effect_reruns_after_emit_and_flush() {
        let signal = Signal::new();
        let signal_id = signal.id();
        let (count, runs) = counter();

        let effect = Effect::new(move || {
            signal_id.track_dependency();
            count.set(count.get() + 1);
        });
        assert_eq!(runs(), 1);
        assert_eq!(signal_id.subscribers(), vec![effect.id()]);

        signal.emit();
        assert!(is_processing_scheduled());
        assert_eq!(runs(), 1);

        flush_effects();
        assert!(!is_processing_scheduled());
        assert_eq!(runs(), 2);
    }

    #[test]
    fn transaction_batches_emits_into_one_run() {
        let signal = Signal::new();
        let signal_id = signal.id();
        let (count, runs) = counter();

        let _effect = Effect::new(move || {
            signal_id.track_dependency();
            count.set(count.get() + 1);
        });

        Transaction::run(|| {
            signal.emit();
            signal.emit();
            signal.emit();
        });

        assert_eq!(runs(), 2);
    }

    #[test]
    fn dropped_effect_stops_reacting() {
        let signal = Signal::new();
        let signal_id = signal.id();
        let (count, runs) = counter();

        let effect = Effect::new(move || {
            signal_id.track_dependency();
            count.set(count.get() + 1);
        });
        drop(effect);

        assert!(signal_id.subscribers().is_empty());
        signal.emit();
        flush_effects();
        assert_eq!(runs(), 1);
    }

    #[test]
    fn untracked_reads_create_no_dependency() {
        let signal = Signal::new();
        let signal_id = signal.id();
        let (count, runs) = counter();

        let effect = Effect::new(move || {
            untracked(|| signal_id.track_dependency());
            count.set(count.get() + 1);
        });

        assert!(effect.id().sources().is_empty());
        signal.emit();
        flush_effects();
        assert_eq!(runs(), 1);
    }

    #[test]
    fn nested_flush_is_deferred_to_outer_flush() {
        cov_mark::check!(nested_flush_deferred);

        let signal = Rc::new(Signal::new());
        let inner_runs = Rc::new(Cell::new(0));

        let _inner = Effect::new({
            let signal = signal.clone();
            let inner_runs = inner_runs.clone();
            move || {
                signal.track_dependency();
                inner_runs.set(inner_runs.get() + 1);
            }
        });

        let trigger = Signal::new();
        let trigger_id = trigger.id();
        let _outer = Effect::new({
            let signal = signal.clone();
            move || {
                trigger_id.track_dependency();
                // Flushing from inside a flushed effect defers to the outer loop
                signal.emit();
                flush_effects();
            }
        });
        // Creation ran outside any flush, so the inner effect already re-ran
        assert_eq!(inner_runs.get(), 2);

        trigger.emit();
        flush_effects();
        assert_eq!(inner_runs.get(), 3);
    }
}
