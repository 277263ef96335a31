//! Future sub-modules.
//!
//! The `futures` module holds the promise primitive, the combinators built on
//! top of it, and the timer future used to make things happen later:
//!
//! - `promise`: settle-once [Promise](promise::Promise) values and their
//!   [Resolver](promise::Resolver)s.
//! - `all`: fail-fast aggregation of many promises into one.
//! - `race`: first-settlement-wins selection among promises.
//! - `promisify`: adapts callback-style functions into promise-returning ones.
//! - `timer`: timers backed by this thread's reactor.
//!
//! `all`, `race` and `promisify` depend only on the settle/observe contract of
//! `promise`; none of them suspend, they register continuations and return.
pub mod all;
pub mod promise;
pub mod promisify;
pub mod race;
pub mod timer;
