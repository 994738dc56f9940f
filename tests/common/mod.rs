// SHARED TEST DOUBLES: CALL-RECORDING CONTROLLERS AND SCRIPTED WORKLOADS.
// ZERO PRIVILEGE REQUIRED. RUN OFFLINE.

#![allow(dead_code)]

use std::path::Path;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use latencysuite::engine::CancelToken;
use latencysuite::error::{ElevationError, WorkloadError};
use latencysuite::event::RunEvent;
use latencysuite::power::PowerController;
use latencysuite::sched::{SchedulingController, Tid};
use latencysuite::workload::Workload;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    SetPowerLevel(u8),
    ClearPowerLevel,
    AcquireWakeLock,
    ReleaseWakeLock,
    Elevate(i32),
    Restore,
    Pin(usize),
    ReleaseCore,
}

#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    pub fn push(&self, call: Call) {
        self.0.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    // EVERY ACQUIRE HAS EXACTLY ONE MATCHING RELEASE
    pub fn assert_balanced(&self) {
        let calls = self.calls();
        let n = |want: fn(&Call) -> bool| calls.iter().filter(|c| want(c)).count();
        assert_eq!(
            n(|c| matches!(c, Call::SetPowerLevel(_))),
            n(|c| matches!(c, Call::ClearPowerLevel)),
            "power level unbalanced: {:?}",
            calls
        );
        assert_eq!(
            n(|c| matches!(c, Call::AcquireWakeLock)),
            n(|c| matches!(c, Call::ReleaseWakeLock)),
            "wake lock unbalanced: {:?}",
            calls
        );
        assert_eq!(
            n(|c| matches!(c, Call::Elevate(_))),
            n(|c| matches!(c, Call::Restore)),
            "scheduling unbalanced: {:?}",
            calls
        );
        assert_eq!(
            n(|c| matches!(c, Call::Pin(_))),
            n(|c| matches!(c, Call::ReleaseCore)),
            "affinity unbalanced: {:?}",
            calls
        );
    }
}

// ONLY SUCCESSFUL ACQUISITIONS ARE LOGGED
pub struct MockSched {
    pub log: CallLog,
    pub deny: bool,
}

impl MockSched {
    pub fn new(log: &CallLog) -> Self {
        Self { log: log.clone(), deny: false }
    }

    pub fn denying(log: &CallLog) -> Self {
        Self { log: log.clone(), deny: true }
    }
}

impl SchedulingController for MockSched {
    fn elevate(&mut self, _tid: Tid, priority: i32) -> Result<(), ElevationError> {
        if self.deny {
            return Err(ElevationError::PermissionDenied { what: "sched_setscheduler" });
        }
        self.log.push(Call::Elevate(priority));
        Ok(())
    }

    fn restore(&mut self, _tid: Tid) -> Result<(), ElevationError> {
        self.log.push(Call::Restore);
        Ok(())
    }
}

pub struct MockPower {
    pub log: CallLog,
    pub deny_power: bool,
    pub deny_pin: bool,
}

impl MockPower {
    pub fn new(log: &CallLog) -> Self {
        Self { log: log.clone(), deny_power: false, deny_pin: false }
    }
}

impl PowerController for MockPower {
    fn acquire_wake_lock(&mut self) -> Result<(), ElevationError> {
        self.log.push(Call::AcquireWakeLock);
        Ok(())
    }

    fn release_wake_lock(&mut self) -> Result<(), ElevationError> {
        self.log.push(Call::ReleaseWakeLock);
        Ok(())
    }

    fn set_power_level(&mut self, percent: u8) -> Result<(), ElevationError> {
        if self.deny_power {
            return Err(ElevationError::PermissionDenied { what: "scaling_min_freq" });
        }
        self.log.push(Call::SetPowerLevel(percent));
        Ok(())
    }

    fn clear_power_level(&mut self) -> Result<(), ElevationError> {
        self.log.push(Call::ClearPowerLevel);
        Ok(())
    }

    fn pin_to_core(&mut self, core: usize) -> Result<(), ElevationError> {
        if self.deny_pin {
            return Err(ElevationError::InvalidCore { core, available: 1 });
        }
        self.log.push(Call::Pin(core));
        Ok(())
    }

    fn release_core(&mut self) -> Result<(), ElevationError> {
        self.log.push(Call::ReleaseCore);
        Ok(())
    }
}

// --- WORKLOADS ---

pub struct Noop;

impl Workload for Noop {
    fn name(&self) -> &str {
        "noop"
    }

    fn execute(&mut self, _parameter: u32) -> Result<(), WorkloadError> {
        Ok(())
    }
}

// CANCELS THE RUN FROM INSIDE CALL NUMBER `on_call` (1-BASED)
pub struct CancelDuring {
    pub token: CancelToken,
    pub on_call: u64,
    pub calls: u64,
    pub repeat: u32,
}

impl CancelDuring {
    pub fn new(token: CancelToken, on_call: u64) -> Self {
        Self { token, on_call, calls: 0, repeat: 1 }
    }
}

impl Workload for CancelDuring {
    fn name(&self) -> &str {
        "cancel-during"
    }

    fn execute(&mut self, _parameter: u32) -> Result<(), WorkloadError> {
        self.calls += 1;
        if self.calls == self.on_call {
            for _ in 0..self.repeat {
                self.token.cancel();
            }
        }
        Ok(())
    }
}

// FAILS ON CALL NUMBER `on_call` (1-BASED)
pub struct FailOn {
    pub on_call: u64,
    pub calls: u64,
}

impl Workload for FailOn {
    fn name(&self) -> &str {
        "fail-on"
    }

    fn execute(&mut self, _parameter: u32) -> Result<(), WorkloadError> {
        self.calls += 1;
        if self.calls == self.on_call {
            return Err("workload exploded".into());
        }
        Ok(())
    }
}

pub struct PanicOn {
    pub on_call: u64,
    pub calls: u64,
}

impl Workload for PanicOn {
    fn name(&self) -> &str {
        "panic-on"
    }

    fn execute(&mut self, _parameter: u32) -> Result<(), WorkloadError> {
        self.calls += 1;
        if self.calls == self.on_call {
            panic!("workload panicked");
        }
        Ok(())
    }
}

pub struct Sleepy(pub Duration);

impl Workload for Sleepy {
    fn name(&self) -> &str {
        "sleepy"
    }

    fn execute(&mut self, _parameter: u32) -> Result<(), WorkloadError> {
        std::thread::sleep(self.0);
        Ok(())
    }
}

// --- HELPERS ---

pub fn drain(rx: &Receiver<RunEvent>) -> Vec<RunEvent> {
    rx.try_iter().collect()
}

pub fn csv_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

// "<digits>,<digits>"
pub fn is_sample_line(line: &str) -> bool {
    match line.split_once(',') {
        Some((a, b)) => {
            !a.is_empty()
                && !b.is_empty()
                && a.bytes().all(|c| c.is_ascii_digit())
                && b.bytes().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}
