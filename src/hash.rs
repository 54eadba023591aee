//! Hasher for the crate's internal maps.
//!
//! Field maps, handler maps and the pending-effect set are keyed by short
//! strings and small integers the crate controls, so a fixed-seed foldhash
//! is enough and keeps the builder zero-sized.

use foldhash::fast::{FixedState, FoldHasher};
use std::hash::BuildHasher;

const SEED: u64 = 0x9e37_79b9_7f4a_7c15;

/// Zero-sized, deterministic `BuildHasher` backed by foldhash.
///
/// Not HashDoS resistant. Do not key it by untrusted input at scale.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FastHashBuilder;

impl BuildHasher for FastHashBuilder {
    type Hasher = FoldHasher<'static>;

    #[inline]
    fn build_hasher(&self) -> Self::Hasher {
        FixedState::with_seed(SEED).build_hasher()
    }
}
