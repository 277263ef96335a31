//! First-settlement-wins selection.
//!
//! [race] adopts the outcome, fulfillment or rejection, of whichever input
//! promise settles first. Each input gets one observer that tries to settle
//! the shared output; the output's own settle-once rule turns every attempt
//! after the first into a no-op, so no separate "decided" flag is kept.
//!
//! When two inputs settle in the same scheduling turn, the one whose
//! continuation was queued first wins.
use super::promise::Promise;

/// Settle with the outcome of the first promise in `promises` to settle.
///
/// With no inputs the returned promise never settles.
///
/// ```
/// use pact::futures::{race::race, timer::settle_after};
/// use pact::task::Executor;
/// use std::time::Duration;
///
/// let winner = race(vec![
///     settle_after::<_, ()>(Duration::from_millis(30), Ok("slow"))?,
///     settle_after(Duration::from_millis(5), Ok("fast"))?,
/// ]);
///
/// assert_eq!(Executor::block_on(winner), Ok("fast"));
/// # Ok::<(), std::io::Error>(())
/// ```
pub fn race<T, E, I>(promises: I) -> Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
    I: IntoIterator<Item = Promise<T, E>>,
{
    let (winner, resolver) = Promise::pending();

    for promise in promises {
        let resolver = resolver.clone();
        promise.subscribe(move |outcome| resolver.settle(outcome));
    }

    winner
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::race;
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
    fn fastest_fulfillment_wins() {
        let winner = race(vec![delay(25, "a"), delay(10, "b"), delay(50, "c")]);

        assert_eq!(Executor::block_on(winner), Ok("b"));
    }

    #[test]
    fn fastest_rejection_wins() {
        let winner = race(vec![delay(25, "a"), fail(5, "too slow"), delay(50, "c")]);

        assert_eq!(Executor::block_on(winner), Err("too slow".to_string()));
    }

    #[test]
    fn block_on_returns_with_first_settlement() {
        let winner = race(vec![delay(1500, "slow"), delay(10, "quick")]);

        let before = Instant::now();

        assert_eq!(Executor::block_on(winner), Ok("quick"));
        assert!(before.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn empty_input_stays_pending() {
        let winner = race(Vec::<Promise<u32, String>>::new());
        let probe = winner.clone();

        Executor::block_on(async {
            Timer::sleep(Duration::from_millis(30)).unwrap().await;
        });

        assert_eq!(probe.state(), State::Pending);
    }

    #[test]
    fn later_settlements_are_discarded() {
        let winner = race(vec![delay(5, "first"), fail(15, "second")]);
        let probe = winner.clone();

        Executor::block_on(async {
            Timer::sleep(Duration::from_millis(40)).unwrap().await;
        });

        assert_eq!(probe.state(), State::Fulfilled("first"));
    }

    #[test]
    fn ties_go_to_first_registered() {
        let winner = race(vec![Promise::<u8, u8>::rejected(1), Promise::resolved(2)]);

        Executor::run();

        assert_eq!(winner.state(), State::Rejected(1));
    }
}
