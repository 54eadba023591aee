use crate::arena::{SignalId, SignalMetadata, current_effect, signal_arena_insert, signal_arena_remove};
use crate::effect::schedule_effect_processing;
use crate::transaction::is_transaction_active;

/// Lightweight reactive marker that tracks dependencies without owning data
///
/// A Signal is just 4 bytes of metadata; the value it guards stays wherever
/// its owner keeps it. [`Store`](crate::Store) and [`Computed`](crate::Computed)
/// are both built on one.
///
/// # Usage
/// ```ignore
/// struct Counter {
///     value: Cell<u32>,
///     signal: Signal,
/// }
///
/// impl Counter {
///     fn set(&self, v: u32) {
///         self.value.set(v);
///         self.signal.emit();
///     }
///
///     fn get(&self) -> u32 {
///         self.signal.track_dependency();
///         self.value.get()
///     }
/// }
/// ```
pub struct Signal {
    id: SignalId,
}

impl Signal {
    /// Create a new signal and allocate it in the arena
    pub fn new() -> Self {
        let id = signal_arena_insert(SignalMetadata::new());
        Signal { id }
    }

    /// Arena id of this signal
    pub(crate) fn id(&self) -> SignalId {
        self.id
    }

    /// Track this signal as a dependency of the running effect, if any
    pub fn track_dependency(&self) {
        self.id.track_dependency();
    }

    /// Emit a change notification
    ///
    /// Subscribers are marked and run when the outermost transaction ends or
    /// on the next `flush_effects()`.
    pub fn emit(&self) {
        if let Some(effect_id) = current_effect() {
            // An effect that reads and writes the same signal would re-trigger
            // itself forever; the read is dropped instead.
            if effect_id.has_source(self.id) {
                tracing::warn!(
                    effect = ?effect_id,
                    signal = ?self.id,
                    "effect both reads and writes a signal; treating the read as untracked"
                );
                self.id.remove_subscriber(effect_id);
                effect_id.remove_source(self.id);
            }
        }

        self.id.notify_subscribers();

        if !is_transaction_active() && current_effect().is_none() {
            schedule_effect_processing();
        }
    }
}

impl Drop for Signal {
    fn drop(&mut self) {
        for effect_id in self.id.subscribers() {
            effect_id.remove_source(self.id);
        }
        drop(signal_arena_remove(self.id));
    }
}

// Signal is deliberately not Clone: each one owns its arena slot.

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}
