//! Settle-once promises.
//!
//! A [Promise] is a handle to a value that becomes available exactly once,
//! either as a fulfillment (`Ok(T)`) or a rejection (`Err(E)`). The ability to
//! settle it lives in a separate [Resolver] handle which only the promise's
//! creator receives. Only the first settlement counts; later attempts are
//! ignored.
//!
//! Outcomes can be consumed in two ways:
//!
//! - From a task, by `.await`ing the promise, which yields `Result<T, E>`.
//! - By registering continuations with [Promise::observe] (or one of the
//!   helpers built on it). Continuations never run inside the call that
//!   registers them: they are queued on the executor and run on a later
//!   scheduling turn, in registration order, even when the promise has
//!   already settled.
//!
//! Promises are single-threaded. They are cheap to clone and every clone
//! observes the same outcome, which is cloned out to each observer.
//!
//! # Example
//!
//! ```
//! use pact::futures::promise::Promise;
//! use pact::task::Executor;
//!
//! let (promise, resolver) = Promise::<u32, String>::pending();
//! let doubled = promise.then(|v| v * 2);
//!
//! resolver.resolve(21);
//! resolver.resolve(1000); // ignored
//!
//! assert_eq!(Executor::block_on(doubled), Ok(42));
//! ```
use std::{
    cell::RefCell,
    fmt,
    future::Future,
    mem,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll, Waker},
};

use log::trace;

use crate::task::Executor;

/// Observable state of a [Promise].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State<T, E> {
    Pending,
    Fulfilled(T),
    Rejected(E),
}

type Observer<T, E> = Box<dyn FnOnce(Result<T, E>)>;

struct Inner<T, E> {
    outcome: Option<Result<T, E>>,
    observers: Vec<Observer<T, E>>,
    wakers: Vec<Waker>,
}

/// A single-assignment asynchronous value.
///
/// See the [module-level documentation](self) for more information.
pub struct Promise<T, E> {
    inner: Rc<RefCell<Inner<T, E>>>,
}

/// The capability to settle a [Promise].
///
/// Resolvers can be cloned and handed to whoever will produce the outcome.
/// Whichever clone settles first wins; all later calls are no-ops.
pub struct Resolver<T, E> {
    inner: Rc<RefCell<Inner<T, E>>>,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, E> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    /// Create an unsettled promise together with its resolver.
    pub fn pending() -> (Self, Resolver<T, E>) {
        let inner = Rc::new(RefCell::new(Inner {
            outcome: None,
            observers: Vec::new(),
            wakers: Vec::new(),
        }));

        (
            Self {
                inner: inner.clone(),
            },
            Resolver { inner },
        )
    }

    /// Create a promise and hand its resolver to `executor`, which is invoked
    /// exactly once before this function returns. The executor may settle
    /// the promise immediately or keep the resolver to settle it later.
    pub fn new(executor: impl FnOnce(Resolver<T, E>)) -> Self {
        let (promise, resolver) = Self::pending();
        executor(resolver);
        promise
    }

    /// Like [Promise::new], but an `Err` returned by `executor` rejects the
    /// promise (unless it was already settled).
    pub fn try_new(executor: impl FnOnce(Resolver<T, E>) -> Result<(), E>) -> Self {
        let (promise, resolver) = Self::pending();

        if let Err(e) = executor(resolver.clone()) {
            resolver.reject(e);
        }

        promise
    }

    /// A promise that is already fulfilled with `value`.
    pub fn resolved(value: T) -> Self {
        Self::new(|r| r.resolve(value))
    }

    /// A promise that is already rejected with `reason`.
    pub fn rejected(reason: E) -> Self {
        Self::new(|r| r.reject(reason))
    }

    /// Spawn `future` on this thread's executor and settle with its output.
    ///
    /// ```
    /// use pact::futures::promise::Promise;
    /// use pact::task::Executor;
    ///
    /// let p = Promise::<_, ()>::spawn(async { Ok("done") });
    /// assert_eq!(Executor::block_on(p), Ok("done"));
    /// ```
    pub fn spawn<Fut>(future: Fut) -> Self
    where
        Fut: Future<Output = Result<T, E>> + 'static,
    {
        let (promise, resolver) = Self::pending();

        Executor::spawn(async move { resolver.settle(future.await) });

        promise
    }

    pub fn state(&self) -> State<T, E> {
        match &self.inner.borrow().outcome {
            None => State::Pending,
            Some(Ok(v)) => State::Fulfilled(v.clone()),
            Some(Err(e)) => State::Rejected(e.clone()),
        }
    }

    pub fn is_settled(&self) -> bool {
        self.inner.borrow().outcome.is_some()
    }

    /// Register a raw observer that receives the outcome on a later scheduling
    /// turn. Observers run in registration order.
    pub fn subscribe(&self, observer: impl FnOnce(Result<T, E>) + 'static) {
        let settled = self.inner.borrow().outcome.clone();

        match settled {
            Some(outcome) => Executor::defer(move || observer(outcome)),
            None => self.inner.borrow_mut().observers.push(Box::new(observer)),
        }
    }

    /// Register a pair of continuations and return a promise that settles
    /// with whatever the invoked continuation returns.
    ///
    /// At most one of the two continuations is called, and never inline: even
    /// for a settled promise they run on a later scheduling turn.
    pub fn observe<U, F, OnFulfilled, OnRejected>(
        &self,
        on_fulfilled: OnFulfilled,
        on_rejected: OnRejected,
    ) -> Promise<U, F>
    where
        U: Clone + 'static,
        F: Clone + 'static,
        OnFulfilled: FnOnce(T) -> Result<U, F> + 'static,
        OnRejected: FnOnce(E) -> Result<U, F> + 'static,
    {
        let (derived, resolver) = Promise::pending();

        self.subscribe(move |outcome| {
            resolver.settle(match outcome {
                Ok(value) => on_fulfilled(value),
                Err(reason) => on_rejected(reason),
            })
        });

        derived
    }

    /// Map the fulfillment value; rejections pass through unchanged.
    pub fn then<U>(&self, f: impl FnOnce(T) -> U + 'static) -> Promise<U, E>
    where
        U: Clone + 'static,
    {
        self.observe(move |value| Ok(f(value)), Err)
    }

    /// Handle a rejection, either recovering with a value or producing a new
    /// reason. Fulfillments pass through unchanged.
    pub fn catch<F>(&self, f: impl FnOnce(E) -> Result<T, F> + 'static) -> Promise<T, F>
    where
        F: Clone + 'static,
    {
        self.observe(Ok, f)
    }

    /// Chain another asynchronous step: the returned promise adopts the
    /// outcome of the promise produced by `f`.
    pub fn and_then<U>(&self, f: impl FnOnce(T) -> Promise<U, E> + 'static) -> Promise<U, E>
    where
        U: Clone + 'static,
    {
        let (derived, resolver) = Promise::pending();

        self.subscribe(move |outcome| match outcome {
            Ok(value) => f(value).subscribe(move |next| resolver.settle(next)),
            Err(reason) => resolver.reject(reason),
        });

        derived
    }
}

impl<T, E> Resolver<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    pub fn resolve(&self, value: T) {
        self.settle(Ok(value))
    }

    pub fn reject(&self, reason: E) {
        self.settle(Err(reason))
    }

    /// Settle the promise with `outcome` if nothing settled it before.
    ///
    /// Queued observers are deferred to the executor in registration order
    /// and tasks awaiting the promise are woken.
    pub fn settle(&self, outcome: Result<T, E>) {
        let (observers, wakers) = {
            let mut inner = self.inner.borrow_mut();

            if inner.outcome.is_some() {
                trace!("ignoring settlement of an already settled promise");
                return;
            }

            inner.outcome = Some(outcome.clone());

            (
                mem::take(&mut inner.observers),
                mem::take(&mut inner.wakers),
            )
        };

        trace!(
            "promise {} with {} observer(s)",
            if outcome.is_ok() { "fulfilled" } else { "rejected" },
            observers.len()
        );

        for observer in observers {
            let outcome = outcome.clone();
            Executor::defer(move || observer(outcome));
        }

        for waker in wakers {
            waker.wake();
        }
    }

    pub fn is_settled(&self) -> bool {
        self.inner.borrow().outcome.is_some()
    }
}

impl<T, E> Future for Promise<T, E>
where
    T: Clone,
    E: Clone,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.inner.borrow_mut();

        if let Some(outcome) = &inner.outcome {
            return Poll::Ready(outcome.clone());
        }

        if !inner.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            inner.wakers.push(cx.waker().clone());
        }

        Poll::Pending
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner.borrow().outcome {
            None => f.write_str("Promise(<pending>)"),
            Some(Ok(v)) => f.debug_tuple("Promise::Fulfilled").field(v).finish(),
            Some(Err(e)) => f.debug_tuple("Promise::Rejected").field(e).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc, time::Duration};

    use anyhow::Result;

    use super::{Promise, State};
    use crate::{futures::timer::settle_after, task::Executor};

    #[test]
    fn settles_only_once() {
        let (promise, resolver) = Promise::<&str, &str>::pending();

        resolver.resolve("first");
        resolver.resolve("second");
        resolver.reject("late failure");

        assert_eq!(promise.state(), State::Fulfilled("first"));
        assert_eq!(Executor::block_on(promise), Ok("first"));
    }

    #[test]
    fn cloned_resolvers_race_to_settle() {
        let (promise, resolver) = Promise::<u8, u8>::pending();
        let other = resolver.clone();

        other.reject(1);
        resolver.resolve(2);

        assert!(resolver.is_settled());
        assert_eq!(promise.state(), State::Rejected(1));
    }

    #[test]
    fn observers_never_run_inline() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let promise = Promise::<u32, ()>::resolved(5);

        let seen2 = seen.clone();
        promise.subscribe(move |outcome| seen2.borrow_mut().push(outcome));
        assert!(seen.borrow().is_empty());

        Executor::run();

        assert_eq!(*seen.borrow(), vec![Ok(5)]);
    }

    #[test]
    fn observers_fire_in_registration_order() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let (promise, resolver) = Promise::<(), ()>::pending();

        for i in 0..3 {
            let order = order.clone();
            promise.subscribe(move |_| order.borrow_mut().push(i));
        }

        resolver.resolve(());

        let order2 = order.clone();
        promise.subscribe(move |_| order2.borrow_mut().push(3));

        Executor::run();

        assert_eq!(*order.borrow(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn observe_picks_matching_continuation() {
        let ok = Promise::<u32, String>::resolved(2).observe(
            |v| Ok::<_, String>(v + 1),
            |e| Err(format!("unexpected: {e}")),
        );
        let recovered = Promise::<u32, String>::rejected("boom".into())
            .observe(|v| Ok::<_, ()>(v), |e| Ok(e.len() as u32));

        assert_eq!(Executor::block_on(ok), Ok(3));
        assert_eq!(Executor::block_on(recovered), Ok(4));
    }

    #[test]
    fn then_and_catch() {
        let mapped = Promise::<u32, String>::resolved(20).then(|v| v + 1);
        let skipped = Promise::<u32, String>::rejected("no".into()).then(|v| v + 1);
        let caught = Promise::<u32, String>::rejected("no".into()).catch(|_| Ok::<_, ()>(0));

        assert_eq!(Executor::block_on(mapped), Ok(21));
        assert_eq!(Executor::block_on(skipped), Err("no".to_string()));
        assert_eq!(Executor::block_on(caught), Ok(0));
    }

    #[test]
    fn and_then_adopts_inner_outcome() -> Result<()> {
        let chained = settle_after::<u32, String>(Duration::from_millis(10), Ok(1))?
            .and_then(|v| settle_after(Duration::from_millis(10), Ok(v * 10)).unwrap());
        let failed = Promise::<u32, String>::resolved(1)
            .and_then(|_| Promise::<u32, String>::rejected("inner".to_string()));

        assert_eq!(Executor::block_on(chained), Ok(10));
        assert_eq!(Executor::block_on(failed), Err("inner".to_string()));

        Ok(())
    }

    #[test]
    fn try_new_converts_errors_to_rejection() {
        let failed = Promise::<u32, &str>::try_new(|_| Err("thrown"));
        let settled_first = Promise::<u32, &str>::try_new(|r| {
            r.resolve(1);
            Err("too late")
        });

        assert_eq!(failed.state(), State::Rejected("thrown"));
        assert_eq!(settled_first.state(), State::Fulfilled(1));
    }

    #[test]
    fn awaiting_from_several_tasks() {
        let (promise, resolver) = Promise::<String, ()>::pending();

        let a = Executor::spawn(promise.clone());
        let b = Executor::spawn(promise.clone());
        Executor::spawn(async move { resolver.resolve("shared".into()) });

        Executor::run();

        assert_eq!(a.join(), Ok("shared".to_string()));
        assert_eq!(b.join(), Ok("shared".to_string()));
    }

    #[test]
    fn spawn_settles_with_future_output() {
        let promise = Promise::<u8, String>::spawn(async { Err("failed".to_string()) });
        assert_eq!(Executor::block_on(promise), Err("failed".to_string()));
    }
}
