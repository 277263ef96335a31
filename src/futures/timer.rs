//! Async timer related futures.
//!
//! Timers are armed with this thread's reactor, which uses an io_uring
//! `Timeout` request when the kernel allows it and a
//! [timerfd](https://man7.org/linux/man-pages/man2/timerfd_create.2.html)
//! watched by epoll otherwise. The main use-case for this is to put a task to
//! sleep for a specific period of time, or to produce a promise that settles
//! later.
//!
//! # Example
//! Let's put a task to sleep for 200 milliseconds.
//! ```
//! use pact::futures::timer::Timer;
//! use pact::task::Executor;
//! use std::time::{Duration, Instant};
//!# Executor::block_on(
//! async {
//!     let now = Instant::now();
//!
//!     Timer::sleep(Duration::from_millis(200))?.await;
//!
//!     assert!(now.elapsed() >= Duration::from_millis(200));
//!#     Ok::<(), std::io::Error>(())
//! }
//!# ).unwrap();
//! ```

use std::{
    future::Future,
    io::Result,
    pin::Pin,
    task::{Context, Poll},
    time::{Duration, Instant},
};

use crate::{
    futures::promise::Promise,
    reactor::{Reactor, TimerKey},
    task::Executor,
};

/// Asynchronous timer.
///
/// This structure is a future that will expire at some point in the future. It
/// can be obtained via the [Timer::sleep] function. Dropping a timer before it
/// expires disarms it.
pub struct Timer {
    deadline: Instant,
    key: Option<TimerKey>,
}

impl Timer {
    #[must_use = "timers do nothing unless `.await`ed"]
    /// Put the current task to sleep for the specified duration.
    ///
    /// This function returns a future, that when `.await`ed will suspend the
    /// execution of the current task until the specified duration has elapsed.
    /// At that point the runtime will queue the task for execution. Note that
    /// it is guaranteed that the task will be suspended for *at least* the
    /// specified duration; it could sleep for longer.
    ///
    /// An error is returned if this thread's reactor could not be created.
    pub fn sleep(d: Duration) -> Result<Self> {
        Reactor::ensure()?;

        Ok(Self {
            deadline: Instant::now() + d,
            key: None,
        })
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

impl Future for Timer {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if Instant::now() >= self.deadline {
            if let Some(key) = self.key.take() {
                Reactor::disarm(key);
            }
            return Poll::Ready(());
        }

        if let Some(key) = self.key {
            if Reactor::rearm(key, cx.waker()) {
                return Poll::Pending;
            }
        }

        match Reactor::arm_timer(self.deadline, cx.waker().clone()) {
            Ok(key) => {
                self.key = Some(key);
                Poll::Pending
            }
            Err(e) => panic!("failed to arm timer: {e}"),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            Reactor::disarm(key);
        }
    }
}

/// Return a promise that settles with `outcome` once `d` has elapsed.
///
/// The timer runs as its own task on this thread's executor, so the promise
/// only settles while the executor is running.
///
/// ```
/// use pact::futures::timer::settle_after;
/// use pact::task::Executor;
/// use std::time::Duration;
///
/// let late = settle_after::<_, ()>(Duration::from_millis(10), Ok("late"))?;
/// assert_eq!(Executor::block_on(late), Ok("late"));
/// # Ok::<(), std::io::Error>(())
/// ```
pub fn settle_after<T, E>(d: Duration, outcome: std::result::Result<T, E>) -> Result<Promise<T, E>>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    let timer = Timer::sleep(d)?;
    let (promise, resolver) = Promise::pending();

    Executor::spawn(async move {
        timer.await;
        resolver.settle(outcome);
    });

    Ok(promise)
}
