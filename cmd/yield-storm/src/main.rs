//! Yield storm - many fibers yielding in a loop
//!
//! Every fiber yields a fixed number of times and counts how often it was
//! resumed. Each host loop tick resumes every fiber once, so the per-fiber
//! counts stay level while the storm runs.
//!
//! # Usage
//!
//! ```text
//! yield-storm [FIBERS] [YIELDS]
//! ```
//!
//! A compile-time config can be merged in:
//!
//! ```text
//! SKEIN_CONFIG_RS=$PWD/cmd/yield-storm/skein_config.rs cargo build -p skein-yield-storm
//! ```

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use skein::{Runtime, RuntimeConfig, SchedResult};

fn main() -> SchedResult<()> {
    println!("=== skein yield storm ===\n");

    let mut args = std::env::args().skip(1);
    let fibers: usize = args.next().and_then(|s| s.parse().ok()).unwrap_or(1_000);
    let yields: u64 = args.next().and_then(|s| s.parse().ok()).unwrap_or(100);

    let config = RuntimeConfig::from_env()
        .stack_size(128 * 1024)
        .max_fibers(fibers.max(1) + 1)
        .pool_capacity(fibers.min(64));
    let runtime = Runtime::new(config)?;

    let counters: Vec<Rc<Cell<u64>>> = (0..fibers).map(|_| Rc::new(Cell::new(0))).collect();

    println!("Spawning {} fibers x {} yields...", fibers, yields);
    let start = Instant::now();
    for counter in &counters {
        let (rt, counter) = (runtime.clone(), counter.clone());
        runtime.spawn(move || {
            for _ in 0..yields {
                if rt.yield_now().is_err() {
                    return;
                }
                counter.set(counter.get() + 1);
            }
        })?;
    }
    let spawn_time = start.elapsed();

    let run_start = Instant::now();
    let finished = runtime.run_until(Duration::from_secs(60), || runtime.fiber_count() == 1)?;
    let run_time = run_start.elapsed();

    let total: u64 = counters.iter().map(|c| c.get()).sum();
    let min = counters.iter().map(|c| c.get()).min().unwrap_or(0);
    let max = counters.iter().map(|c| c.get()).max().unwrap_or(0);

    println!("\n=== Results ===");
    println!("Finished:        {}", finished);
    println!("Spawn time:      {:?}", spawn_time);
    println!("Run time:        {:?}", run_time);
    println!("Resumes:         {} (min {} / max {} per fiber)", total, min, max);
    if run_time.as_secs_f64() > 0.0 {
        println!("Switch rate:     {:.0} resumes/sec", total as f64 / run_time.as_secs_f64());
    }

    runtime.teardown()
}
