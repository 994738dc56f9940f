// LATENCYSUITE TIMING
// CLOCK_MONOTONIC READS AND MEASURED IDLE.
// THE IDLE STEP IS THE ONLY PLACE A RUN IS ALLOWED TO SUSPEND THE WORKER.

pub fn now_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    (ts.tv_sec as u64) * 1_000_000_000 + (ts.tv_nsec as u64)
}

pub fn elapsed_us(since_ns: u64) -> u64 {
    now_ns().saturating_sub(since_ns) / 1_000
}

// SLEEP FOR `ms` MILLISECONDS AND RETURN THE ACTUAL ELAPSED TIME IN MICROSECONDS.
// SCHEDULER JITTER MAKES THIS DIFFER FROM THE REQUEST; THAT DIFFERENCE IS DATA.
// EINTR RESUMES WITH THE REMAINING TIME SO A SIGNAL CANNOT SHORTEN THE IDLE.
pub fn idle(ms: u64) -> u64 {
    let start = now_ns();
    if ms == 0 {
        return elapsed_us(start);
    }

    let mut req = libc::timespec {
        tv_sec: (ms / 1_000) as libc::time_t,
        tv_nsec: ((ms % 1_000) * 1_000_000) as libc::c_long,
    };
    loop {
        let mut rem = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        let rc = unsafe { libc::nanosleep(&req, &mut rem) };
        if rc == 0 {
            break;
        }
        if std::io::Error::last_os_error().raw_os_error() != Some(libc::EINTR) {
            break;
        }
        req = rem;
    }
    elapsed_us(start)
}

// SLEEP `target_ns` AND REPORT HOW FAR PAST THE TARGET THE WAKEUP LANDED
pub fn overshoot_us(target_ns: u64) -> u64 {
    let start = now_ns();
    let req = libc::timespec {
        tv_sec: (target_ns / 1_000_000_000) as libc::time_t,
        tv_nsec: (target_ns % 1_000_000_000) as libc::c_long,
    };
    unsafe {
        libc::nanosleep(&req, std::ptr::null_mut());
    }
    let elapsed_ns = now_ns().saturating_sub(start);
    elapsed_ns.saturating_sub(target_ns) / 1_000
}
