use std::{
    cell::RefCell,
    env, io,
    task::Waker,
    time::{Duration, Instant},
};

use log::{debug, trace, warn};

use epoll::EpollTimers;
use uring::UringTimers;

mod epoll;
mod uring;

/// Size of the submission queue used by the io_uring backend.
pub(crate) const RING_ENTRIES: u32 = 256;

/// Environment variable used to pick a reactor backend: `uring`, `epoll` or
/// `auto`.
pub(crate) const BACKEND_ENV: &str = "PACT_REACTOR";

/// Names one armed timer. The `id` is unique per backend, so a key that
/// outlives its timer never matches a later timer placed in the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TimerKey {
    slot: usize,
    id: u64,
}

enum Backend {
    Uring(UringTimers),
    Epoll(EpollTimers),
}

impl Backend {
    fn from_env() -> io::Result<Self> {
        match env::var(BACKEND_ENV).ok().as_deref() {
            Some("uring") => UringTimers::new(RING_ENTRIES).map(Self::Uring),
            Some("epoll") => EpollTimers::new().map(Self::Epoll),
            other => {
                if let Some(value) = other.filter(|v| *v != "auto") {
                    warn!("unknown {BACKEND_ENV} value {value:?}, picking a backend automatically");
                }

                match UringTimers::new(RING_ENTRIES) {
                    Ok(timers) => {
                        debug!("using io_uring timer backend");
                        Ok(Self::Uring(timers))
                    }
                    Err(e) => {
                        warn!("io_uring unavailable ({e}), falling back to epoll");
                        EpollTimers::new().map(Self::Epoll)
                    }
                }
            }
        }
    }

    fn arm(&mut self, timeout: Duration, waker: Waker) -> io::Result<TimerKey> {
        match self {
            Self::Uring(t) => t.arm(timeout, waker),
            Self::Epoll(t) => t.arm(timeout, waker),
        }
    }

    fn rearm(&mut self, key: TimerKey, waker: &Waker) -> bool {
        match self {
            Self::Uring(t) => t.rearm(key, waker),
            Self::Epoll(t) => t.rearm(key, waker),
        }
    }

    fn disarm(&mut self, key: TimerKey) {
        match self {
            Self::Uring(t) => t.disarm(key),
            Self::Epoll(t) => t.disarm(key),
        }
    }

    fn armed(&self) -> usize {
        match self {
            Self::Uring(t) => t.armed(),
            Self::Epoll(t) => t.armed(),
        }
    }

    fn react(&mut self) -> io::Result<Vec<Waker>> {
        match self {
            Self::Uring(t) => t.react(),
            Self::Epoll(t) => t.react(),
        }
    }
}

pub(crate) struct Reactor {}

thread_local! {
    static REACTOR: RefCell<Option<Backend>> = const { RefCell::new(None) };
}

impl Reactor {
    /// Create this thread's backend if it does not exist yet.
    pub fn ensure() -> io::Result<()> {
        Self::with_backend(|_| Ok(()))
    }

    fn with_backend<R>(f: impl FnOnce(&mut Backend) -> io::Result<R>) -> io::Result<R> {
        REACTOR.with(|reactor| {
            let mut reactor = reactor.borrow_mut();

            if reactor.is_none() {
                *reactor = Some(Backend::from_env()?);
            }

            match reactor.as_mut() {
                Some(backend) => f(backend),
                None => Err(io::Error::other("reactor backend missing")),
            }
        })
    }

    pub fn arm_timer(deadline: Instant, waker: Waker) -> io::Result<TimerKey> {
        let timeout = deadline.saturating_duration_since(Instant::now());
        let key = Self::with_backend(|b| b.arm(timeout, waker))?;

        trace!("armed timer {key:?} for {timeout:?}");

        Ok(key)
    }

    /// Swap the waker of a still-armed timer. Returns `false` if the timer has
    /// already fired or was disarmed.
    pub fn rearm(key: TimerKey, waker: &Waker) -> bool {
        REACTOR.with(|reactor| {
            reactor
                .borrow_mut()
                .as_mut()
                .is_some_and(|b| b.rearm(key, waker))
        })
    }

    pub fn disarm(key: TimerKey) {
        // Timers can be dropped while thread locals are torn down.
        let _ = REACTOR.try_with(|reactor| {
            if let Some(backend) = reactor.borrow_mut().as_mut() {
                backend.disarm(key);
            }
        });
    }

    /// True when no timer is armed, i.e. [Reactor::react] would never return.
    pub fn is_idle() -> bool {
        REACTOR.with(|reactor| reactor.borrow().as_ref().map_or(true, |b| b.armed() == 0))
    }

    /// Block until at least one timer fires and wake the tasks waiting on it.
    pub fn react() -> io::Result<()> {
        let wakers = Self::with_backend(|b| b.react())?;

        trace!("reactor woke {} task(s)", wakers.len());

        for waker in wakers {
            waker.wake();
        }

        Ok(())
    }
}
