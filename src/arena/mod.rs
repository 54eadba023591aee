// Arena-based storage for reactive node metadata
//
// Two arenas live side by side:
// - Signal arena: SignalMetadata (subscribers, optional writer)
// - Effect arena: EffectMetadata (state, sources, callback, optional output)
//
// Both are thread-local slabs. A form and everything derived from it belong to
// the thread that built it, so no locking is involved anywhere in the graph.

// effect_arena first: signal_arena depends on EffectId
pub mod effect_arena;
pub mod signal_arena;

pub use effect_arena::{
    CurrentEffectGuard, EffectId, EffectMetadata, ReactiveState, current_effect,
    effect_arena_insert, effect_arena_remove, mark_effect_pending, remove_from_pending_set,
    take_pending_effects_split,
};
pub use signal_arena::{SignalId, SignalMetadata, signal_arena_insert, signal_arena_remove};
