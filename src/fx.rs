//! Async effects and the queue that drives them.
//!
//! An [`Fx`] wraps an async handler and reports its lifecycle through events,
//! so the rest of the graph can react to completions without awaiting them.
//! Runs that cannot finish synchronously go to the [`TaskQueue`]'s executor,
//! or are parked until someone awaits [`TaskQueue::settled`] when it has none.

use crate::{Event, Store, Transaction, untracked};
use futures::future::{self, LocalBoxFuture};
use futures::stream::FuturesUnordered;
use futures::task::LocalSpawn;
use futures::{FutureExt, StreamExt};
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

/// Boxed future returned by an effect handler.
pub type FxFuture<R, E> = LocalBoxFuture<'static, Result<R, E>>;

/// In-flight futures of fire-and-forget runs.
///
/// Every task is polled once inline, so synchronous work finishes before
/// [`spawn`](Self::spawn) returns. The rest is handed to the executor given
/// to [`with_spawner`](Self::with_spawner), which wakes it as usual. Without
/// one, tasks are parked until [`settled`](Self::settled) drives them.
///
/// There is no timeout and no cancellation: a task that never completes keeps
/// `settled` pending forever. Dropping the last handle drops parked tasks.
#[derive(Clone, Default)]
pub struct TaskQueue {
    inner: Rc<Queue>,
}

#[derive(Default)]
struct Queue {
    parked: RefCell<Vec<LocalBoxFuture<'static, ()>>>,
    spawner: Option<Rc<dyn LocalSpawn>>,
}

/// Handle that does not keep the queue alive. Tasks hold effects, and
/// effects hold one of these, so parked work never owns its own queue.
#[derive(Clone)]
pub(crate) struct WeakTaskQueue {
    inner: Weak<Queue>,
}

impl TaskQueue {
    /// Create an empty queue without an executor
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a queue that hands pending tasks to `spawner`
    pub fn with_spawner(spawner: Rc<dyn LocalSpawn>) -> Self {
        Self {
            inner: Rc::new(Queue {
                parked: RefCell::default(),
                spawner: Some(spawner),
            }),
        }
    }

    /// Start `task` now.
    ///
    /// The task is polled once inline; if it does not complete it goes to the
    /// executor, or is parked until the queue is driven.
    pub fn spawn(&self, task: impl Future<Output = ()> + 'static) {
        if let Some(task) = poll_inline(task.boxed_local()) {
            self.inner.hand_off(task);
        }
    }

    /// True if pending tasks go to an executor
    pub fn has_spawner(&self) -> bool {
        self.inner.spawner.is_some()
    }

    /// Number of parked tasks not yet picked up by a `settled` call
    pub fn parked(&self) -> usize {
        self.inner.parked.borrow().len()
    }

    /// Drive every parked task to completion, including tasks parked while
    /// settling.
    ///
    /// Tasks already handed to an executor are driven by that executor.
    /// Dropping the returned future drops the tasks it had picked up.
    pub fn settled(&self) -> LocalBoxFuture<'static, ()> {
        let queue = self.inner.clone();
        let mut running = FuturesUnordered::new();
        future::poll_fn(move |cx| {
            loop {
                running.extend(queue.parked.borrow_mut().drain(..));
                match running.poll_next_unpin(cx) {
                    Poll::Ready(Some(())) => continue,
                    Poll::Ready(None) if queue.parked.borrow().is_empty() => {
                        return Poll::Ready(());
                    }
                    Poll::Pending if queue.parked.borrow().is_empty() => return Poll::Pending,
                    // Tasks were parked while polling; pick them up
                    _ => continue,
                }
            }
        })
        .boxed_local()
    }

    pub(crate) fn downgrade(&self) -> WeakTaskQueue {
        WeakTaskQueue {
            inner: Rc::downgrade(&self.inner),
        }
    }
}

impl Queue {
    fn hand_off(&self, task: LocalBoxFuture<'static, ()>) {
        match &self.spawner {
            Some(spawner) if spawner.status_local().is_ok() => {
                cov_mark::hit!(task_handed_to_spawner);
                if let Err(err) = spawner.spawn_local_obj(task.into()) {
                    tracing::warn!(%err, "executor refused a pending task; dropping it");
                }
            }
            _ => {
                cov_mark::hit!(task_parked);
                self.parked.borrow_mut().push(task);
            }
        }
    }
}

impl WeakTaskQueue {
    /// Like [`TaskQueue::spawn`]. Once the queue is gone, a task that does
    /// not finish inline is dropped.
    pub(crate) fn spawn(&self, task: impl Future<Output = ()> + 'static) {
        let Some(task) = poll_inline(task.boxed_local()) else {
            return;
        };
        match self.inner.upgrade() {
            Some(queue) => queue.hand_off(task),
            None => {
                cov_mark::hit!(task_dropped_with_queue);
                tracing::trace!("task queue dropped; discarding pending task");
            }
        }
    }
}

/// Poll `task` once. Returns it if it is still pending.
fn poll_inline(mut task: LocalBoxFuture<'static, ()>) -> Option<LocalBoxFuture<'static, ()>> {
    let waker = futures::task::noop_waker();
    let mut cx = Context::from_waker(&waker);
    task.poll_unpin(&mut cx).is_pending().then_some(task)
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("parked", &self.parked())
            .field("spawner", &self.has_spawner())
            .finish()
    }
}

/// An async effect: a handler plus lifecycle events.
///
/// - `started` fires when a run begins
/// - `done` fires with the handler's value on success
/// - `failed` fires with the handler's error on failure
/// - `unhandled` additionally fires for failures of [`trigger`](Self::trigger)ed
///   runs, which have no caller to return the error to
/// - `in_flight` counts runs that have started but not finished
///
/// Concurrent runs are independent; each one's completion is applied when it
/// arrives.
pub struct Fx<R, E> {
    inner: Rc<FxInner<R, E>>,
}

struct FxInner<R, E> {
    handler: Box<dyn Fn() -> FxFuture<R, E>>,
    started: Event<()>,
    done: Event<R>,
    failed: Event<E>,
    unhandled: Event<E>,
    in_flight: Store<usize>,
    tasks: WeakTaskQueue,
}

impl<R, E> Clone for Fx<R, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R: Clone + 'static, E: Clone + 'static> Fx<R, E> {
    /// Create an effect whose fire-and-forget runs go to `tasks`.
    ///
    /// The effect does not keep `tasks` alive.
    pub fn new(tasks: &TaskQueue, handler: impl Fn() -> FxFuture<R, E> + 'static) -> Self {
        Self {
            inner: Rc::new(FxInner {
                handler: Box::new(handler),
                started: Event::new(),
                done: Event::new(),
                failed: Event::new(),
                unhandled: Event::new(),
                in_flight: Store::new(0),
                tasks: tasks.downgrade(),
            }),
        }
    }

    /// Start a run and return its outcome.
    ///
    /// The handler is invoked before this returns, so whatever it reads is
    /// read at call time, not when the future is first polled.
    pub fn run(&self) -> FxFuture<R, E> {
        let inner = self.inner.clone();
        Transaction::run(|| {
            inner.in_flight.update(|n| n + 1);
            inner.started.emit(());
        });
        let pending = untracked(|| (inner.handler)());

        async move {
            let outcome = pending.await;
            Transaction::run(|| {
                inner.in_flight.update(|n| n.saturating_sub(1));
                match &outcome {
                    Ok(value) => inner.done.emit(value.clone()),
                    Err(error) => inner.failed.emit(error.clone()),
                }
            });
            outcome
        }
        .boxed_local()
    }

    /// Start a run without awaiting it.
    ///
    /// Completion is observable only through the events.
    pub fn trigger(&self) {
        let run = self.run();
        let unhandled = self.inner.unhandled.clone();
        self.inner.tasks.spawn(run.map(move |outcome| {
            if let Err(error) = outcome {
                unhandled.emit(error);
            }
        }));
    }

    /// Fires when a run begins
    pub fn started(&self) -> &Event<()> {
        &self.inner.started
    }

    /// Fires with each successful result
    pub fn done(&self) -> &Event<R> {
        &self.inner.done
    }

    /// Fires with each failure
    pub fn failed(&self) -> &Event<E> {
        &self.inner.failed
    }

    /// Fires with failures of triggered runs
    pub fn unhandled(&self) -> &Event<E> {
        &self.inner.unhandled
    }

    /// Number of runs started but not finished
    pub fn in_flight(&self) -> &Store<usize> {
        &self.inner.in_flight
    }

    /// True while at least one run is in flight
    pub fn is_pending(&self) -> bool {
        self.inner.in_flight.get() > 0
    }
}

impl<R, E> fmt::Debug for Fx<R, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fx").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::oneshot;
    use futures::executor::{LocalPool, block_on};
    use std::cell::Cell;

    fn counting<T: 'static>(event: &Event<T>) -> Rc<Cell<usize>> {
        let count = Rc::new(Cell::new(0));
        event.on({
            let count = count.clone();
            move |_| count.set(count.get() + 1)
        });
        count
    }

    #[test]
    fn synchronous_trigger_completes_inline() {
        let tasks = TaskQueue::new();
        let fx: Fx<u32, String> = Fx::new(&tasks, || future::ready(Ok(7)).boxed_local());
        let done = counting(fx.done());

        fx.trigger();

        assert_eq!(done.get(), 1);
        assert_eq!(tasks.parked(), 0);
        assert!(!fx.is_pending());
    }

    #[test]
    fn run_reports_failure() {
        let tasks = TaskQueue::new();
        let fx: Fx<u32, String> =
            Fx::new(&tasks, || future::ready(Err("nope".to_string())).boxed_local());
        let failed = counting(fx.failed());
        let done = counting(fx.done());

        let unhandled = counting(fx.unhandled());

        assert_eq!(block_on(fx.run()), Err("nope".to_string()));
        assert_eq!(failed.get(), 1);
        assert_eq!(done.get(), 0);
        assert_eq!(unhandled.get(), 0);

        fx.trigger();
        assert_eq!(failed.get(), 2);
        assert_eq!(unhandled.get(), 1);
    }

    #[test]
    fn pending_run_parks_until_settled() {
        cov_mark::check!(task_parked);

        let tasks = TaskQueue::new();
        let senders = Rc::new(RefCell::new(Vec::new()));
        let fx: Fx<u32, String> = Fx::new(&tasks, {
            let senders = senders.clone();
            move || {
                let (tx, rx) = oneshot::channel::<u32>();
                senders.borrow_mut().push(tx);
                async move { rx.await.map_err(|_| "cancelled".to_string()) }.boxed_local()
            }
        });
        let started = counting(fx.started());
        let done = counting(fx.done());

        fx.trigger();
        fx.trigger();
        assert_eq!(started.get(), 2);
        assert_eq!(fx.in_flight().get(), 2);
        assert_eq!(tasks.parked(), 2);

        for tx in senders.borrow_mut().drain(..) {
            let _ = tx.send(1);
        }
        block_on(tasks.settled());

        assert_eq!(done.get(), 2);
        assert_eq!(fx.in_flight().get(), 0);
    }

    type Senders = Rc<RefCell<Vec<oneshot::Sender<u32>>>>;

    fn deferred(tasks: &TaskQueue, senders: &Senders) -> Fx<u32, String> {
        let senders = senders.clone();
        Fx::new(tasks, move || {
            let (tx, rx) = oneshot::channel::<u32>();
            senders.borrow_mut().push(tx);
            async move { rx.await.map_err(|_| "cancelled".to_string()) }.boxed_local()
        })
    }

    #[test]
    fn pending_run_completes_on_executor() {
        cov_mark::check!(task_handed_to_spawner);

        let mut pool = LocalPool::new();
        let tasks = TaskQueue::with_spawner(Rc::new(pool.spawner()));
        let senders = Senders::default();
        let fx = deferred(&tasks, &senders);
        let done = counting(fx.done());

        fx.trigger();
        assert_eq!(tasks.parked(), 0);
        pool.run_until_stalled();
        assert_eq!(done.get(), 0);

        for tx in senders.borrow_mut().drain(..) {
            let _ = tx.send(3);
        }
        pool.run_until_stalled();

        assert_eq!(done.get(), 1);
        assert!(!fx.is_pending());
    }

    #[test]
    fn dropping_queue_drops_parked_runs() {
        let tasks = TaskQueue::new();
        let senders = Senders::default();
        let fx = deferred(&tasks, &senders);

        fx.trigger();
        assert_eq!(tasks.parked(), 1);
        assert!(!senders.borrow()[0].is_canceled());

        // The effect holds no strong handle, so this is the last one
        drop(tasks);
        assert!(senders.borrow()[0].is_canceled());
    }

    #[test]
    fn trigger_after_queue_dropped() {
        cov_mark::check!(task_dropped_with_queue);

        let tasks = TaskQueue::new();
        let senders = Senders::default();
        let deferred_fx = deferred(&tasks, &senders);
        let ready_fx: Fx<u32, String> = Fx::new(&tasks, || future::ready(Ok(1)).boxed_local());
        let done = counting(ready_fx.done());
        drop(tasks);

        ready_fx.trigger();
        assert_eq!(done.get(), 1);

        deferred_fx.trigger();
        assert!(senders.borrow()[0].is_canceled());
    }

    #[test]
    fn settled_picks_up_tasks_spawned_while_settling() {
        let tasks = TaskQueue::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let (tx, rx) = oneshot::channel::<()>();
        tasks.spawn({
            let tasks = tasks.clone();
            let log = log.clone();
            async move {
                let _ = rx.await;
                log.borrow_mut().push("first");
                let (tx2, rx2) = oneshot::channel::<()>();
                tasks.spawn({
                    let log = log.clone();
                    async move {
                        let _ = rx2.await;
                        log.borrow_mut().push("second");
                    }
                });
                let _ = tx2.send(());
            }
        });

        let _ = tx.send(());
        block_on(tasks.settled());

        assert_eq!(*log.borrow(), vec!["first", "second"]);
    }
}
