// IDLE OVERSHOOT PROBE -- ONE LINE PER SAMPLE, MICROSECONDS PAST THE TARGET.
// SAME MEASUREMENT AS THE ENGINE'S IDLE COLUMN, WITHOUT A WORKLOAD.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};

use latencysuite::sched::{current_tid, LinuxScheduler, SchedulingController};
use latencysuite::timing;

pub fn run_probe(sleep_ms: u64, count: Option<u64>, priority: Option<i32>) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        flag.store(false, Ordering::Relaxed);
    })?;

    let mut sched = LinuxScheduler::new();
    let tid = current_tid();
    if let Some(p) = priority {
        sched.elevate(tid, p).context("probe elevation")?;
    }

    let target_ns = sleep_ms * 1_000_000;
    let mut taken = 0u64;
    while running.load(Ordering::Relaxed) && count.map_or(true, |c| taken < c) {
        println!("{}", timing::overshoot_us(target_ns));
        taken += 1;
    }

    sched.restore(tid)?;
    Ok(())
}
