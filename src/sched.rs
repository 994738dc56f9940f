// LATENCYSUITE SCHEDULING CONTROLLER
// ELEVATES A THREAD TO SCHED_FIFO AND PUTS IT BACK.
//
// THE ENGINE ONLY SEES THE TWO-CALL CONTRACT. THE LINUX BINDING GOES STRAIGHT
// TO sched_setscheduler(2) ON THE KERNEL THREAD ID, WHICH NEEDS CAP_SYS_NICE
// OR AN RLIMIT_RTPRIO BUDGET.

use std::collections::HashMap;
use std::io;

use tracing::{debug, info};

use crate::error::ElevationError;

pub type Tid = libc::pid_t;

// KERNEL ORs THIS INTO THE POLICY RETURNED BY sched_getscheduler
const SCHED_RESET_ON_FORK: libc::c_int = 0x4000_0000;

pub fn current_tid() -> Tid {
    unsafe { libc::syscall(libc::SYS_gettid) as Tid }
}

pub trait SchedulingController {
    // SWITCH `tid` TO SCHED_FIFO AT `priority`. THE PRIOR POLICY IS REMEMBERED.
    fn elevate(&mut self, tid: Tid, priority: i32) -> Result<(), ElevationError>;

    // PUT BACK WHATEVER `elevate` REPLACED. NO-OP IF NOTHING WAS ELEVATED.
    fn restore(&mut self, tid: Tid) -> Result<(), ElevationError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct SavedPolicy {
    policy: libc::c_int,
    priority: libc::c_int,
}

#[derive(Default)]
pub struct LinuxScheduler {
    saved: HashMap<Tid, SavedPolicy>,
}

impl LinuxScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    // SCHED_FIFO PRIORITY RANGE AS REPORTED BY THE KERNEL (1..=99 ON MAINLINE)
    pub fn fifo_priority_range() -> Result<(i32, i32), ElevationError> {
        let min = unsafe { libc::sched_get_priority_min(libc::SCHED_FIFO) };
        let max = unsafe { libc::sched_get_priority_max(libc::SCHED_FIFO) };
        if min < 0 || max < 0 {
            return Err(ElevationError::from_os(
                "sched_get_priority_max",
                io::Error::last_os_error(),
            ));
        }
        Ok((min, max))
    }

    fn read_policy(tid: Tid) -> Result<SavedPolicy, ElevationError> {
        let policy = unsafe { libc::sched_getscheduler(tid) };
        if policy < 0 {
            return Err(ElevationError::from_os("sched_getscheduler", io::Error::last_os_error()));
        }
        let mut param = libc::sched_param { sched_priority: 0 };
        if unsafe { libc::sched_getparam(tid, &mut param) } < 0 {
            return Err(ElevationError::from_os("sched_getparam", io::Error::last_os_error()));
        }
        Ok(SavedPolicy {
            policy: policy & !SCHED_RESET_ON_FORK,
            priority: param.sched_priority,
        })
    }

    fn apply(tid: Tid, policy: libc::c_int, priority: libc::c_int) -> Result<(), ElevationError> {
        let param = libc::sched_param { sched_priority: priority };
        if unsafe { libc::sched_setscheduler(tid, policy, &param) } < 0 {
            return Err(ElevationError::from_os("sched_setscheduler", io::Error::last_os_error()));
        }
        Ok(())
    }
}

impl SchedulingController for LinuxScheduler {
    fn elevate(&mut self, tid: Tid, priority: i32) -> Result<(), ElevationError> {
        let (min, max) = Self::fifo_priority_range()?;
        if priority < min || priority > max {
            return Err(ElevationError::InvalidPriority { priority, min, max });
        }

        // KEEP THE ORIGINAL POLICY IF THE THREAD IS RE-ELEVATED WITHOUT A RESTORE
        let saved = match self.saved.get(&tid) {
            Some(s) => *s,
            None => Self::read_policy(tid)?,
        };

        Self::apply(tid, libc::SCHED_FIFO, priority)?;
        self.saved.insert(tid, saved);
        info!(tid, priority, prev_policy = saved.policy, "thread elevated to SCHED_FIFO");
        Ok(())
    }

    fn restore(&mut self, tid: Tid) -> Result<(), ElevationError> {
        let saved = match self.saved.remove(&tid) {
            Some(s) => s,
            None => return Ok(()),
        };
        Self::apply(tid, saved.policy, saved.priority)?;
        debug!(tid, policy = saved.policy, priority = saved.priority, "scheduling policy restored");
        Ok(())
    }
}
