//! Fail-fast aggregation of promises.
//!
//! [all] joins an ordered collection of promises into one promise of a `Vec`.
//! The output is index-aligned with the input regardless of the order in which
//! the inputs settle, and the first rejection (in time, not by position) is
//! forwarded as soon as it happens.
//!
//! Inputs that are still running when the aggregate rejects are not
//! cancelled; their outcomes are observed and thrown away.
//!
//! # Example
//!
//! ```
//! use pact::futures::{all::all, promise::Promise, timer::settle_after};
//! use pact::task::Executor;
//! use std::time::Duration;
//!
//! let values = all(vec![
//!     settle_after::<_, ()>(Duration::from_millis(20), Ok('a'))?,
//!     Promise::resolved('b'),
//! ]);
//!
//! assert_eq!(Executor::block_on(values), Ok(vec!['a', 'b']));
//! # Ok::<(), std::io::Error>(())
//! ```
use std::{cell::RefCell, rc::Rc};

use log::trace;

use super::promise::Promise;

struct Slots<T> {
    values: Vec<Option<T>>,
    remaining: usize,
}

/// Wait for every promise in `promises` to fulfill.
///
/// Fulfills with the values in input order once all inputs have fulfilled, or
/// rejects with the reason of the first input to reject. An empty input
/// fulfills with an empty `Vec`. The same promise may appear more than once;
/// each occurrence fills its own position.
pub fn all<T, E, I>(promises: I) -> Promise<Vec<T>, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
    I: IntoIterator<Item = Promise<T, E>>,
{
    let promises: Vec<_> = promises.into_iter().collect();
    let (aggregate, resolver) = Promise::pending();

    if promises.is_empty() {
        resolver.resolve(Vec::new());
        return aggregate;
    }

    let slots = Rc::new(RefCell::new(Slots {
        values: promises.iter().map(|_| None).collect(),
        remaining: promises.len(),
    }));

    for (idx, promise) in promises.into_iter().enumerate() {
        let slots = slots.clone();
        let resolver = resolver.clone();

        promise.subscribe(move |outcome| match outcome {
            Ok(value) => {
                if resolver.is_settled() {
                    return;
                }

                let finished: Option<Vec<T>> = {
                    let mut slots = slots.borrow_mut();
                    slots.values[idx] = Some(value);
                    slots.remaining -= 1;

                    (slots.remaining == 0).then(|| slots.values.drain(..).flatten().collect())
                };

                if let Some(values) = finished {
                    resolver.resolve(values);
                }
            }
            Err(reason) => {
                if !resolver.is_settled() {
                    trace!("input {idx} rejected, failing aggregate");
                }
                resolver.reject(reason);
            }
        });
    }

    aggregate
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use anyhow::Result;

    use super::all;
    use crate::{
        futures::{
            promise::{Promise, State},
            timer::{settle_after, Timer},
        },
        task::Executor,
    };

    fn delay(ms: u64, value: &'static str) -> Promise<&'static str, String> {
        settle_after(Duration::from_millis(ms), Ok(value)).unwrap()
    }

    fn fail(ms: u64, reason: &str) -> Promise<&'static str, String> {
        settle_after(Duration::from_millis(ms), Err(reason.to_string())).unwrap()
    }

    #[test]
    fn keeps_input_order() {
        let values = all(vec![delay(25, "a"), delay(10, "b"), delay(50, "c")]);

        assert_eq!(Executor::block_on(values), Ok(vec!["a", "b", "c"]));
    }

    #[test]
    fn empty_input_fulfills() {
        let values = all(Vec::<Promise<u32, String>>::new());

        assert_eq!(values.state(), State::Fulfilled(vec![]));
    }

    #[test]
    fn rejects_without_waiting_for_pending_inputs() -> Result<()> {
        let (never, _resolver) = Promise::<&str, String>::pending();
        let values = all(vec![delay(50, "a"), fail(10, "boom"), never]);

        let elapsed = Executor::block_on(async move {
            let before = Instant::now();
            let result = values.await;
            (result, before.elapsed())
        });

        assert_eq!(elapsed.0, Err("boom".to_string()));
        assert!(elapsed.1 < Duration::from_millis(45));

        Ok(())
    }

    #[test]
    fn block_on_returns_as_soon_as_aggregate_rejects() {
        let values = all(vec![delay(1500, "slow"), fail(10, "boom")]);

        let before = Instant::now();
        let result = Executor::block_on(values);

        assert_eq!(result, Err("boom".to_string()));
        assert!(before.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn first_rejection_in_time_wins() {
        let values = all(vec![fail(30, "late"), delay(5, "a"), fail(10, "early")]);

        assert_eq!(Executor::block_on(values), Err("early".to_string()));
    }

    #[test]
    fn later_outcomes_are_discarded() {
        let values = all(vec![fail(5, "boom"), delay(20, "a")]);
        let probe = values.clone();

        Executor::block_on(async move {
            Timer::sleep(Duration::from_millis(40)).unwrap().await;
        });

        assert_eq!(probe.state(), State::Rejected("boom".to_string()));
    }

    #[test]
    fn duplicates_fill_separate_positions() {
        let shared = delay(10, "x");
        let values = all(vec![shared.clone(), Promise::resolved("y"), shared]);

        assert_eq!(Executor::block_on(values), Ok(vec!["x", "y", "x"]));
    }

    #[test]
    fn accepts_already_settled_inputs() {
        let values = all([Promise::<u8, ()>::resolved(1), Promise::resolved(2)]);

        assert_eq!(values.state(), State::Pending);
        assert_eq!(Executor::block_on(values), Ok(vec![1, 2]));
    }
}
