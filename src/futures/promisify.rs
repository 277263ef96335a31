//! Adapting callback-style functions into promise-returning ones.
//!
//! A callback-style ("node-style") function takes its arguments followed by a
//! completion callback, and eventually reports either an error or its results
//! through that callback. [promisify] turns such a function into one that
//! takes only the arguments and returns a [Promise].
//!
//! Arguments are passed as a single value, typically a tuple. The number of
//! results is fixed by the callback's declared result type: a plain value for
//! one result, a tuple for several and `()` for none.
//!
//! # Example
//!
//! ```
//! use pact::futures::promisify::{promisify, Callback};
//! use pact::task::Executor;
//!
//! fn divide((a, b): (u32, u32), done: Callback<(u32, u32), String>) -> Result<(), String> {
//!     if b == 0 {
//!         done.err("division by zero".into());
//!     } else {
//!         done.ok((a / b, a % b));
//!     }
//!     Ok(())
//! }
//!
//! let divide_async = promisify(divide);
//!
//! assert_eq!(Executor::block_on(divide_async((7, 2))), Ok((3, 1)));
//! assert_eq!(
//!     Executor::block_on(divide_async((7, 0))),
//!     Err("division by zero".to_string())
//! );
//! ```
use log::debug;

use super::promise::{Promise, Resolver};

/// The completion callback handed to a wrapped function.
///
/// Only the first report counts; anything reported afterwards, through this
/// callback or any clone of it, is ignored.
pub struct Callback<T, E> {
    resolver: Resolver<T, E>,
}

impl<T, E> Clone for Callback<T, E> {
    fn clone(&self) -> Self {
        Self {
            resolver: self.resolver.clone(),
        }
    }
}

impl<T, E> Callback<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    /// Report completion: `Err` rejects the promise, `Ok` fulfills it.
    pub fn call(&self, outcome: Result<T, E>) {
        self.resolver.settle(outcome)
    }

    pub fn ok(&self, results: T) {
        self.call(Ok(results))
    }

    pub fn err(&self, error: E) {
        self.call(Err(error))
    }
}

/// Wrap `node_style_fn` into a function returning a [Promise].
///
/// Every call of the returned function invokes `node_style_fn` exactly once
/// with the given arguments and a fresh [Callback]. If `node_style_fn` returns
/// `Err` before reporting through the callback, the promise rejects with that
/// error; the returned function itself never fails.
pub fn promisify<A, T, E, F>(node_style_fn: F) -> impl Fn(A) -> Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
    F: Fn(A, Callback<T, E>) -> Result<(), E> + 'static,
{
    move |args| {
        let (promise, resolver) = Promise::pending();
        let callback = Callback {
            resolver: resolver.clone(),
        };

        if let Err(e) = node_style_fn(args, callback) {
            if !resolver.is_settled() {
                debug!("wrapped function failed before calling back");
            }
            resolver.reject(e);
        }

        promise
    }
}
