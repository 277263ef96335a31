//! # `pact`: promises on a tiny single-threaded executor
//!
//! This crate implements settle-once promises and the three classic
//! combinators on top of them:
//!
//! - [all](futures::all::all) joins promises into one, keeping input order and
//!   failing fast on the first rejection.
//! - [race](futures::race::race) settles with whichever input settles first.
//! - [promisify](futures::promisify::promisify) turns a callback-style function
//!   into a promise-returning one.
//!
//! Promises need an event loop to deliver their continuations. `pact` ships a
//! minimal per-thread executor (see the [task] module) together with a timer
//! reactor that uses io_uring where available and falls back to epoll. Set
//! `PACT_REACTOR=epoll` to force the fallback.
//!
//! ## Example
//!
//! ```
//! use pact::{all, race, Executor};
//! use pact::futures::timer::settle_after;
//! use std::time::Duration;
//!
//! let delay = |ms, v| settle_after::<_, ()>(Duration::from_millis(ms), Ok(v)).unwrap();
//!
//! let joined = all(vec![delay(25, 'a'), delay(10, 'b'), delay(50, 'c')]);
//! let fastest = race(vec![delay(25, 'a'), delay(10, 'b'), delay(50, 'c')]);
//!
//! assert_eq!(Executor::block_on(joined), Ok(vec!['a', 'b', 'c']));
//! assert_eq!(Executor::block_on(fastest), Ok('b'));
//! ```
pub mod futures;
pub(crate) mod reactor;
pub mod task;

pub use futures::{
    all::all,
    promise::{Promise, Resolver, State},
    promisify::{promisify, Callback},
    race::race,
};
pub use task::Executor;
