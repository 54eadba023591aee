use crate::effect::flush_effects;
use std::cell::Cell;

// Thread-local transaction depth counter.
// When > 0, emissions mark effects but do not run them.
thread_local! {
    static TRANSACTION_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// RAII guard that leaves the transaction even when the body panics.
struct TransactionGuard;

impl Drop for TransactionGuard {
    fn drop(&mut self) {
        exit_transaction();
    }
}

fn enter_transaction() {
    TRANSACTION_DEPTH.with(|depth| depth.set(depth.get() + 1));
}

fn exit_transaction() {
    let outermost = TRANSACTION_DEPTH.with(|depth| {
        let remaining = depth.get().saturating_sub(1);
        depth.set(remaining);
        remaining == 0
    });

    // Observers must not run on a half-applied batch while unwinding.
    if outermost && !std::thread::panicking() {
        flush_effects();
    }
}

/// Check if currently inside a transaction
pub fn is_transaction_active() -> bool {
    TRANSACTION_DEPTH.with(|depth| depth.get() > 0)
}

/// Batch multiple changes into a single propagation
///
/// Every store write inside the batch is applied immediately, but dependent
/// effects run once, when the outermost transaction exits. Observers therefore
/// never see an intermediate state of the batch.
///
/// # Example
/// ```ignore
/// // Without a transaction the watcher of `first`/`last` runs twice
/// Transaction::run(|| {
///     first.set("Ada".into());
///     last.set("Lovelace".into());
/// }); // runs once here
/// ```
pub struct Transaction;

impl Transaction {
    /// Run a function within a transaction context
    pub fn run<F, R>(f: F) -> R
    where
        F: FnOnce() -> R,
    {
        enter_transaction();
        let _guard = TransactionGuard;
        f()
    }
}
