//! Producer/consumer throughput benchmark.

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tspace::{DirectoryConfig, SpaceDirectory};

/// How long a consumer waits for one message before declaring it lost
const RECEIVE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Engine {
    /// Per-key locking engine
    Tspace,
    /// Single global lock baseline
    Gspace,
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Engine::Tspace => f.write_str("tspace"),
            Engine::Gspace => f.write_str("gspace"),
        }
    }
}

pub struct BenchOptions {
    pub engine: Engine,
    pub producers: usize,
    pub consumers: usize,
    pub keys: u64,
    pub messages: u64,
}

pub fn run_bench(config: DirectoryConfig, opts: BenchOptions) -> Result<()> {
    let BenchOptions {
        engine,
        producers,
        consumers,
        keys,
        messages,
    } = opts;
    if producers == 0 || consumers == 0 || keys == 0 {
        bail!("producers, consumers and keys must all be at least 1");
    }

    let directory: SpaceDirectory<u64, u64> = SpaceDirectory::new(config);
    let space = directory.lookup(&format!("{engine}:bench"))?;
    let total = messages * producers as u64;

    // Message n goes to key n % keys; each consumer owns every key with
    // index % consumers equal to its own index.
    let expected_per_key = move |key: u64| total / keys + u64::from(key < total % keys);

    tracing::debug!(
        %engine,
        producers,
        consumers,
        keys,
        total,
        "starting benchmark"
    );

    let received = AtomicU64::new(0);
    let checksum = AtomicU64::new(0);
    let started = Instant::now();

    let outcome: Result<()> = thread::scope(|scope| {
        let producer_threads: Vec<_> = (0..producers as u64)
            .map(|producer| {
                let space = &space;
                scope.spawn(move || -> Result<()> {
                    for i in 0..messages {
                        let n = producer * messages + i;
                        space.out(n % keys, n)?;
                    }
                    Ok(())
                })
            })
            .collect();

        let consumer_threads: Vec<_> = (0..consumers as u64)
            .map(|consumer| {
                let space = &space;
                let received = &received;
                let checksum = &checksum;
                scope.spawn(move || -> Result<()> {
                    let owned = (0..keys).filter(|key| key % consumers as u64 == consumer);
                    for key in owned {
                        for _ in 0..expected_per_key(key) {
                            let value = space
                                .in_timeout(&key, RECEIVE_TIMEOUT)?
                                .with_context(|| format!("message lost on key {key}"))?;
                            received.fetch_add(1, Ordering::Relaxed);
                            checksum.fetch_add(value, Ordering::Relaxed);
                        }
                    }
                    Ok(())
                })
            })
            .collect();

        for worker in producer_threads.into_iter().chain(consumer_threads) {
            match worker.join() {
                Ok(result) => result?,
                Err(_) => bail!("benchmark thread panicked"),
            }
        }
        Ok(())
    });
    let elapsed = started.elapsed();
    outcome?;

    let received = received.into_inner();
    let expected_checksum = total * total.saturating_sub(1) / 2;
    if received != total || checksum.into_inner() != expected_checksum {
        bail!("received {received} of {total} messages or values were duplicated");
    }
    let leftover: usize = (0..keys).map(|key| space.size(&key)).sum();
    if leftover != 0 {
        bail!("{leftover} messages left in the space");
    }

    let rate = total as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
    println!("engine: {}", space.name());
    println!("{producers} producers, {consumers} consumers, {keys} keys");
    println!("{total} messages in {elapsed:.2?} ({rate:.0} msg/s)");
    println!("metrics: {}", space.metrics());

    directory.close_all()?;
    Ok(())
}
