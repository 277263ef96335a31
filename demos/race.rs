use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use pact::{all, futures::timer::settle_after, race, Executor, Promise};

/// Join and race a set of delayed promises.
///
/// Each delay becomes a promise that fulfills with its own position after that
/// many milliseconds. A delay prefixed with `!` rejects instead.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Delays in milliseconds, e.g. `25 10 50` or `25 !10 50`.
    #[arg(required = true)]
    delays: Vec<String>,
}

fn build(delays: &[String]) -> Result<Vec<Promise<usize, String>>> {
    delays
        .iter()
        .enumerate()
        .map(|(idx, spec)| -> Result<Promise<usize, String>> {
            let (fails, ms) = match spec.strip_prefix('!') {
                Some(ms) => (true, ms),
                None => (false, spec.as_str()),
            };
            let d = Duration::from_millis(ms.parse()?);
            let outcome = if fails {
                Err(format!("input {idx} failed after {ms}ms"))
            } else {
                Ok(idx)
            };

            Ok(settle_after(d, outcome)?)
        })
        .collect()
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let start = Instant::now();

    let joined = all(build(&args.delays)?);
    let winner = race(build(&args.delays)?);

    joined.subscribe(move |outcome| println!("all  -> {outcome:?} after {:?}", start.elapsed()));
    winner.subscribe(move |outcome| println!("race -> {outcome:?} after {:?}", start.elapsed()));

    Executor::run();

    Ok(())
}
