//! Task and execution management
//!
//! This module provides the methods needed to spawn tasks and execute them
//! until completion. Pact uses a per-thread executor model which means that
//! each OS thread has its own execution environment:
//!
//! 1. The thread upon which a task is spawned is the same thread that will
//!    execute it.
//! 2. Each thread needs to call one of [Executor::block_on] or [Executor::run]
//!    to do any work. Use the former if you want to run a single top-level
//!    task, or the latter if you wish to run multiple top-level tasks.
//!
//! # Example
//!
//! Here is a simple hello world using [Executor::block_on].
//!
//! ```
//! use pact::task::Executor;
//! Executor::block_on(async { println!("Hello, world!"); });
//! ```
//!
//! You can also use [Executor::block_on] to easily obtain the result of a
//! future:
//!
//! ```
//! use pact::task::Executor;
//! let x = Executor::block_on(async { 2 + 8 });
//! assert_eq!(x, 10);
//! ```
//!
//! # Scheduling turns
//!
//! Each iteration of the executor loop is a *scheduling turn*. A turn first
//! drains the queue of deferred continuations (this is where promise observers
//! run), then polls the next runnable task. Runnable tasks are polled in the
//! order they became runnable. When there is nothing left to run the executor
//! parks the thread in the reactor until a timer fires.
//!
//! [TaskJoiner::join] (and therefore [Executor::block_on]) only drives turns
//! until its own task has produced a value. Other tasks that are still running
//! at that point stay queued and continue with the next call to
//! [Executor::run], [Executor::block_on] or [TaskJoiner::join] on the same
//! thread.
//!
//! Since a thread only ever runs one task at a time, `!Send` state can be
//! shared freely between tasks on the same thread:
//!
//! ```
//! use pact::task::Executor;
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! let cell = Rc::new(RefCell::new(0));
//! {
//!     let cell = cell.clone();
//!     Executor::spawn(async move { *cell.borrow_mut() += 10 });
//! }
//! {
//!     let cell = cell.clone();
//!     Executor::spawn(async move { *cell.borrow_mut() += 10 });
//! }
//! Executor::run();
//! assert_eq!(*cell.borrow(), 20);
//! ```
use std::{
    cell::RefCell,
    collections::VecDeque,
    future::Future,
    pin::Pin,
    rc::Rc,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    task::{Context, Poll, Wake, Waker},
    thread::{self, ThreadId},
};

use log::{debug, error, trace};
use slab::Slab;

use crate::reactor::Reactor;

const NOT_WAITING: usize = usize::MAX;

struct TaskId {
    slot: AtomicUsize,
    notified: AtomicBool,
    // `slot` indexes this thread's `EXEC`, nobody else's.
    owner: ThreadId,
}

impl Wake for TaskId {
    fn wake(self: Arc<TaskId>) {
        self.wake_by_ref()
    }

    fn wake_by_ref(self: &Arc<TaskId>) {
        if thread::current().id() != self.owner {
            error!(
                "task owned by {:?} woken from {:?}, ignoring wakeup",
                self.owner,
                thread::current().id()
            );
            return;
        }

        self.notified.store(true, Ordering::Relaxed);

        let slot = self.slot.swap(NOT_WAITING, Ordering::Relaxed);

        // Either already queued, or currently being polled; in the latter
        // case `notified` gets it requeued once the poll returns.
        if slot == NOT_WAITING {
            return;
        }

        EXEC.with(|exec| {
            let mut exec = exec.borrow_mut();
            if let Some(task) = exec.waiting.try_remove(slot) {
                exec.run_q.push_back(task);
            }
        });
    }
}

struct Task {
    id: Arc<TaskId>,
    future: Pin<Box<dyn Future<Output = ()>>>,
}

type Deferred = Box<dyn FnOnce()>;

/// The async executor.
///
/// A type that is responsible for pushing futures through to
/// completion. You can begin execution of a new task by calling the
/// [Executor::block_on] function.
///
/// Tasks belong to the thread that spawned them. Their wakers are `Send`, as
/// [Waker] requires, but only a wakeup issued on the owning thread has any
/// effect; a wakeup from another thread is logged and dropped without
/// touching either thread's executor.
pub struct Executor {
    waiting: Slab<Task>,
    run_q: VecDeque<Task>,
    deferred: VecDeque<Deferred>,
}

thread_local! {
    static EXEC: RefCell<Executor> = const { RefCell::new(
        Executor {
            waiting: Slab::new(),
            run_q: VecDeque::new(),
            deferred: VecDeque::new(),
        }
    )}
}

struct JoinState<T> {
    value: Option<T>,
    waker: Option<Waker>,
}

/// A handle to a running task.
///
/// You can call [TaskJoiner::join] from a synchronous context to run the
/// executor and yield the future's value. If you want to wait for execution to
/// finish from an asynchronous context, use `.await` on the joiner. If the
/// joiner is dropped then execution of the future continues to completion but
/// the return value is lost, aka detach-on-drop.
pub struct TaskJoiner<T> {
    state: Rc<RefCell<JoinState<T>>>,
}

impl<T> TaskJoiner<T> {
    /// Run this thread's executor until the task has finished and return the
    /// value yielded by its future. Other tasks are only driven as far as
    /// needed; whatever is left of them stays queued.
    ///
    /// *Note* This function should only be called from synchronous contexts.
    /// Use `.await` from inside a task.
    ///
    /// # Panics
    ///
    /// Panics if the task is stuck waiting for a wakeup that can never happen,
    /// e.g. on a promise whose resolver was dropped.
    pub fn join(self) -> T {
        Executor::executor_loop(|| self.state.borrow().value.is_some());

        self.state
            .borrow_mut()
            .value
            .take()
            .unwrap_or_else(|| panic!("joined task can never complete"))
    }
}

impl<T> Future for TaskJoiner<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.state.borrow_mut();

        match state.value.take() {
            Some(value) => Poll::Ready(value),
            None => {
                state.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl Executor {
    /// Spawn a new future and add it to this thread's run queue. If called from
    /// an already-running asynchronous task, the future will be queued for
    /// execution. If called from a synchronous context, the task will *not* be
    /// executed until [Executor::run] is called.
    ///
    /// A [TaskJoiner] is returned which can be used to wait for completion of
    /// the future `f` and obtain its return value.
    pub fn spawn<Fut, T>(f: Fut) -> TaskJoiner<T>
    where
        Fut: Future<Output = T> + 'static,
        T: 'static,
    {
        let state = Rc::new(RefCell::new(JoinState {
            value: None,
            waker: None,
        }));
        let completion = state.clone();

        let fut = async move {
            let value = f.await;

            let waker = {
                let mut state = completion.borrow_mut();
                state.value = Some(value);
                state.waker.take()
            };

            if let Some(waker) = waker {
                waker.wake();
            }
        };

        let task = Task {
            id: Arc::new(TaskId {
                slot: AtomicUsize::new(NOT_WAITING),
                notified: AtomicBool::new(false),
                owner: thread::current().id(),
            }),
            future: Box::pin(fut),
        };

        EXEC.with(|exec| {
            exec.borrow_mut().run_q.push_back(task);
        });

        trace!("spawned task");

        TaskJoiner { state }
    }

    /// A convenience function for waiting on a future from a synchronous
    /// context. This is the equivalent of calling:
    ///
    /// ```
    /// # use pact::task::Executor;
    /// # use std::future::Future;
    /// # fn x<Fut: Future<Output = ()> + 'static>(f: Fut) {
    /// let task = Executor::spawn(f);
    /// task.join();
    /// # }
    /// ```
    pub fn block_on<Fut, T>(f: Fut) -> T
    where
        Fut: Future<Output = T> + 'static,
        T: 'static,
    {
        Self::spawn(f).join()
    }

    /// Run the executor for this thread.
    ///
    /// This function will schedule and run all tasks that have been previously
    /// spawned with [Executor::spawn], along with any deferred promise
    /// continuations. *Note* each thread has its own set of tasks and
    /// execution environment.
    ///
    /// Returns once no task can make further progress.
    pub fn run() {
        Self::executor_loop(|| false)
    }

    /// Queue `f` to run at the start of the next scheduling turn, after every
    /// callback deferred before it.
    pub(crate) fn defer(f: impl FnOnce() + 'static) {
        EXEC.with(|exec| exec.borrow_mut().deferred.push_back(Box::new(f)));
    }

    fn drain_deferred(exec: &RefCell<Executor>) {
        loop {
            let next = exec.borrow_mut().deferred.pop_front();

            match next {
                Some(f) => f(),
                None => return,
            }
        }
    }

    /// Drive scheduling turns until `done` holds or nothing can progress.
    fn executor_loop(done: impl Fn() -> bool) {
        EXEC.with(|exec| loop {
            if done() {
                return;
            }

            Self::drain_deferred(exec);

            let next = exec.borrow_mut().run_q.pop_front();

            let Some(mut task) = next else {
                if !exec.borrow().deferred.is_empty() {
                    continue;
                }

                if Reactor::is_idle() {
                    let stalled = exec.borrow().waiting.len();
                    if stalled > 0 {
                        debug!("{stalled} task(s) waiting on wakeups that cannot arrive");
                    }
                    return;
                }

                if let Err(e) = Reactor::react() {
                    error!("reactor failed: {e}");
                    return;
                }

                continue;
            };

            task.id.notified.store(false, Ordering::Relaxed);

            let waker = Waker::from(task.id.clone());

            let mut cx = Context::from_waker(&waker);

            match task.future.as_mut().poll(&mut cx) {
                Poll::Ready(()) => trace!("task finished"),
                Poll::Pending => {
                    let mut exec = exec.borrow_mut();

                    if task.id.notified.swap(false, Ordering::Relaxed) {
                        exec.run_q.push_back(task);
                    } else {
                        let slot = exec.waiting.vacant_entry();

                        task.id.slot.store(slot.key(), Ordering::Relaxed);

                        slot.insert(task);
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::{
        cell::{Cell, RefCell},
        future::{poll_fn, Future},
        pin::Pin,
        rc::Rc,
        task::{Context, Poll, Waker},
        thread,
        time::{Duration, Instant},
    };

    use super::Executor;
    use crate::futures::timer::Timer;

    /// Returns `Pending` once, waking itself before doing so.
    struct YieldNow(bool);

    impl Future for YieldNow {
        type Output = ();

        fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
            if self.0 {
                return Poll::Ready(());
            }
            self.0 = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }

    #[test]
    fn block_on_returns_value() {
        assert_eq!(Executor::block_on(async { 40 + 2 }), 42);
    }

    #[test]
    fn tasks_run_in_spawn_order() {
        let log = Rc::new(RefCell::new(Vec::new()));

        for i in 0..4 {
            let log = log.clone();
            Executor::spawn(async move { log.borrow_mut().push(i) });
        }

        Executor::run();

        assert_eq!(*log.borrow(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn self_wake_during_poll_is_not_lost() {
        Executor::block_on(async {
            YieldNow(false).await;
            YieldNow(false).await;
        });
    }

    #[test]
    fn deferred_runs_before_next_task() {
        let log = Rc::new(RefCell::new(Vec::new()));

        let log2 = log.clone();
        Executor::spawn(async move {
            let log3 = log2.clone();
            Executor::defer(move || log3.borrow_mut().push("deferred"));
            log2.borrow_mut().push("first task");
        });

        let log2 = log.clone();
        Executor::spawn(async move { log2.borrow_mut().push("second task") });

        Executor::run();

        assert_eq!(*log.borrow(), vec!["first task", "deferred", "second task"]);
    }

    #[test]
    fn join_subtasks() {
        let before = Instant::now();

        let total = Executor::block_on(async {
            let t1 = Executor::spawn(async {
                Timer::sleep(Duration::from_millis(20)).unwrap().await;
                1
            });
            let t2 = Executor::spawn(async {
                Timer::sleep(Duration::from_millis(40)).unwrap().await;
                2
            });

            t1.await + t2.await
        });

        assert_eq!(total, 3);
        assert!(before.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn join_leaves_unrelated_tasks_queued() {
        let finished = Rc::new(Cell::new(false));

        let flag = finished.clone();
        Executor::spawn(async move {
            Timer::sleep(Duration::from_millis(300)).unwrap().await;
            flag.set(true);
        });

        let before = Instant::now();
        let value = Executor::block_on(async {
            Timer::sleep(Duration::from_millis(10)).unwrap().await;
            7
        });

        assert_eq!(value, 7);
        assert!(before.elapsed() < Duration::from_millis(200));
        assert!(!finished.get());

        Executor::run();

        assert!(finished.get());
    }

    #[test]
    fn wake_from_foreign_thread_is_ignored() {
        let parked: Rc<RefCell<Option<Waker>>> = Rc::new(RefCell::new(None));
        let woken = Rc::new(Cell::new(false));

        let (store, seen) = (parked.clone(), woken.clone());
        let task = Executor::spawn(poll_fn(move |cx| {
            if store.borrow().is_some() && seen.get() {
                return Poll::Ready(());
            }
            *store.borrow_mut() = Some(cx.waker().clone());
            Poll::Pending
        }));

        Executor::run();

        let waker = parked.borrow_mut().take().unwrap();

        let foreign = waker.clone();
        thread::spawn(move || foreign.wake()).join().unwrap();

        // The foreign wakeup must not have consumed the task's parking slot,
        // otherwise this local wakeup would be lost.
        woken.set(true);
        *parked.borrow_mut() = Some(waker.clone());
        waker.wake();

        task.join();
    }

    #[test]
    #[should_panic(expected = "can never complete")]
    fn block_on_stalled_future_panics() {
        Executor::block_on(std::future::pending::<()>());
    }
}
