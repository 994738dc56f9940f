// READINESS REPORT: CAN THIS MACHINE PRODUCE REAL-TIME SAMPLES?
// REQUIRED: SCHED_FIFO PERMISSION. EVERYTHING ELSE IS ADVISORY.

use std::io::Read;
use std::path::Path;

use anyhow::Result;

use latencysuite::power::online_cpus;
use latencysuite::sched::{current_tid, LinuxScheduler, SchedulingController};

fn check_kernel_config() {
    let file = match std::fs::File::open("/proc/config.gz") {
        Ok(f) => f,
        Err(_) => {
            println!("  /proc/config.gz         NOT FOUND (SKIPPED)");
            return;
        }
    };
    let mut decoder = flate2::read::GzDecoder::new(file);
    let mut config = String::new();
    if decoder.read_to_string(&mut config).is_err() {
        println!("  /proc/config.gz         UNREADABLE (SKIPPED)");
        return;
    }
    for opt in ["CONFIG_PREEMPT_RT", "CONFIG_HIGH_RES_TIMERS", "CONFIG_NO_HZ_FULL"] {
        let status = if config.contains(&format!("{}=y", opt)) { "YES" } else { "NO" };
        println!("  {:<24}{}", opt, status);
    }
}

// ELEVATE THIS THREAD TO THE LOWEST FIFO PRIORITY AND PUT IT BACK
fn check_fifo() -> bool {
    let (min, max) = match LinuxScheduler::fifo_priority_range() {
        Ok(r) => r,
        Err(e) => {
            println!("  SCHED_FIFO              UNAVAILABLE ({})", e);
            return false;
        }
    };
    let mut sched = LinuxScheduler::new();
    let tid = current_tid();
    match sched.elevate(tid, min) {
        Ok(()) => {
            let _ = sched.restore(tid);
            println!("  SCHED_FIFO              OK (priority {}..={})", min, max);
            true
        }
        Err(e) => {
            println!("  SCHED_FIFO              DENIED ({})", e);
            false
        }
    }
}

fn rtprio_limit() -> Option<u64> {
    let mut lim = libc::rlimit { rlim_cur: 0, rlim_max: 0 };
    if unsafe { libc::getrlimit(libc::RLIMIT_RTPRIO, &mut lim) } != 0 {
        return None;
    }
    Some(lim.rlim_cur as u64)
}

pub fn run_check() -> Result<()> {
    println!("LATENCYSUITE READINESS CHECK");
    println!();

    println!("SCHEDULING:");
    let fifo_ok = check_fifo();
    match rtprio_limit() {
        Some(l) => println!("  RLIMIT_RTPRIO           {}", l),
        None => println!("  RLIMIT_RTPRIO           UNKNOWN"),
    }
    println!();

    println!("POWER:");
    let qos = Path::new("/dev/cpu_dma_latency");
    let qos_ok = std::fs::OpenOptions::new().write(true).open(qos).is_ok();
    println!("  {:<24}{}", "PM-QOS WAKE LOCK", if qos_ok { "OK" } else { "UNAVAILABLE (WARNING ONLY)" });
    let governor = std::fs::read_to_string("/sys/devices/system/cpu/cpu0/cpufreq/scaling_governor")
        .unwrap_or_default()
        .trim()
        .to_string();
    if governor.is_empty() {
        println!("  {:<24}NOT PRESENT (POWER LEVELS IGNORED)", "CPUFREQ");
    } else {
        println!("  {:<24}{} (governor)", "CPUFREQ", governor);
    }
    println!("  {:<24}{}", "ONLINE CPUS", online_cpus());
    println!();

    println!("KERNEL CONFIG:");
    check_kernel_config();
    println!();

    if fifo_ok {
        println!("ALL REQUIRED CHECKS PASSED");
    } else {
        println!("SOME CHECKS FAILED");
        println!("  Real-time cases need CAP_SYS_NICE or an RLIMIT_RTPRIO budget (run as root,");
        println!("  or add '@realtime - rtprio 99' to /etc/security/limits.conf).");
        std::process::exit(1);
    }

    Ok(())
}
