// LATENCYSUITE EXECUTION ENGINE
// ONE ENGINE PER TEST CASE. DRIVES A SINGLE RUN:
//
//   IDLE -> CONFIGURING -> MEASURING -> FINALIZING -> TERMINAL(COMPLETED|CANCELED)
//
// CONFIGURING: OPEN THE LOG, RAISE POWER LEVEL, TAKE THE WAKE LOCK,
//              ELEVATE TO SCHED_FIFO, PIN THE CORE (IN THAT ORDER).
// MEASURING:   IDLE, TIMESTAMP, WORKLOAD, TIMESTAMP, RECORD. NOTHING ELSE
//              SITS BETWEEN THE TWO TIMESTAMPS.
// FINALIZING:  UNDO CONFIGURING IN REVERSE ORDER. RUNS ON EVERY EXIT PATH,
//              INCLUDING ERRORS AND PANICS (THE GUARD'S Drop).
//
// CANCELLATION IS COOPERATIVE: THE FLAG IS READ ONCE PER ITERATION BOUNDARY.
// AN IN-FLIGHT IDLE OR WORKLOAD CALL ALWAYS RUNS TO COMPLETION.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::{RunConfiguration, TestCase};
use crate::error::{BenchError, ElevationError, Result};
use crate::event::{EventSink, RunEvent};
use crate::power::PowerController;
use crate::recorder::{result_path, Recorder};
use crate::sched::{current_tid, SchedulingController, Tid};
use crate::timing;
use crate::workload::Workload;

// MINIMUM WALL-CLOCK GAP BETWEEN PROGRESS EVENTS
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(1000);

// SINGLE WRITER (ANY EXTERNAL CALLER), SINGLE READER (THE RUN LOOP).
// CANCELING TWICE IS THE SAME AS CANCELING ONCE.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Canceled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Configuring,
    Measuring,
    Finalizing,
    Terminal(RunStatus),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunReport {
    pub test_case_id: u32,
    pub test_case_name: String,
    pub status: RunStatus,
    pub samples: u64,
    pub path: PathBuf,
}

// --- ELEVATION GUARD ---

// TRACKS EXACTLY WHAT WAS ACQUIRED SO RELEASE NEVER UNDOES SOMETHING
// THAT NEVER HAPPENED AND NEVER RUNS TWICE.
struct Elevation<'c> {
    sched: &'c mut dyn SchedulingController,
    power: &'c mut dyn PowerController,
    power_level: bool,
    wake_lock: bool,
    sched_tid: Option<Tid>,
    pinned: bool,
}

impl<'c> Elevation<'c> {
    fn new(sched: &'c mut dyn SchedulingController, power: &'c mut dyn PowerController) -> Self {
        Self {
            sched,
            power,
            power_level: false,
            wake_lock: false,
            sched_tid: None,
            pinned: false,
        }
    }

    fn acquire(&mut self, case: &TestCase, events: &dyn EventSink) -> std::result::Result<(), ElevationError> {
        if let Some(level) = case.power_level() {
            info!(case = case.name(), level, "acquiring power lock");
            self.power.set_power_level(level)?;
            self.power_level = true;
        }

        // KEEPS THE CPU OUT OF DEEP SLEEP EVEN WITHOUT A POWER LEVEL
        self.power.acquire_wake_lock()?;
        self.wake_lock = true;

        if let Some(priority) = case.realtime_priority() {
            let tid = current_tid();
            info!(case = case.name(), tid, priority, "setting real-time priority");
            self.sched.elevate(tid, priority)?;
            self.sched_tid = Some(tid);
        }

        if let Some(core) = case.cpu_core() {
            match self.power.pin_to_core(core) {
                Ok(()) => self.pinned = true,
                Err(e) => {
                    warn!(case = case.name(), core, %e, "core lock failed, continuing unpinned");
                    events.emit(RunEvent::Warning {
                        message: format!("core lock {} failed: {}", core, e),
                    });
                }
            }
        }
        Ok(())
    }

    // REVERSE ACQUISITION ORDER. FAILURES ARE LOGGED, NOT PROPAGATED:
    // ONE STUCK RELEASE MUST NOT SKIP THE OTHERS.
    fn release(&mut self) {
        if std::mem::take(&mut self.pinned) {
            if let Err(e) = self.power.release_core() {
                warn!(%e, "failed to restore cpu affinity");
            }
        }
        if let Some(tid) = self.sched_tid.take() {
            if let Err(e) = self.sched.restore(tid) {
                warn!(tid, %e, "failed to restore scheduling policy");
            }
        }
        if std::mem::take(&mut self.wake_lock) {
            if let Err(e) = self.power.release_wake_lock() {
                warn!(%e, "failed to release wake lock");
            }
        }
        if std::mem::take(&mut self.power_level) {
            if let Err(e) = self.power.clear_power_level() {
                warn!(%e, "failed to clear power level");
            }
        }
    }
}

impl Drop for Elevation<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

// --- RUN CONTEXT ---

// OWNED BY ONE execute() CALL. CREATED AT RUN START, GONE AT RUN END.
struct RunContext {
    iteration: u64,
    cancel: CancelToken,
    recorder: Recorder,
    phase: RunPhase,
}

// TAKES THE FIELD, NOT THE CONTEXT: THE RECORDER MAY ALREADY BE CONSUMED
fn enter(phase: &mut RunPhase, next: RunPhase) {
    debug!(from = ?*phase, to = ?next, "run phase");
    *phase = next;
}

// --- ENGINE ---

pub struct Engine<'a> {
    sched: &'a mut dyn SchedulingController,
    power: &'a mut dyn PowerController,
    events: &'a dyn EventSink,
    result_root: PathBuf,
    cancel: CancelToken,
}

impl<'a> Engine<'a> {
    pub fn new(
        result_root: impl Into<PathBuf>,
        sched: &'a mut dyn SchedulingController,
        power: &'a mut dyn PowerController,
        events: &'a dyn EventSink,
    ) -> Self {
        Self {
            sched,
            power,
            events,
            result_root: result_root.into(),
            cancel: CancelToken::new(),
        }
    }

    // SHARE AN EXISTING TOKEN (E.G. ONE PUBLISHED BY THE SEQUENCER BEFORE THE RUN STARTS)
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn execute(
        &mut self,
        workload: &mut dyn Workload,
        config: &RunConfiguration,
        case: &TestCase,
    ) -> Result<RunReport> {
        let events = self.events;
        case.validate()?;

        // SETUP: NOTHING TO UNWIND IF THIS FAILS.
        // THE LOG IS NAMED AFTER THE REQUESTED WORKLOAD, NOT THE IMPLEMENTATION BEHIND IT.
        let path = result_path(
            &self.result_root,
            &config.workload,
            config.parameter,
            config.idle_ms,
            config.cycles,
            case.name(),
        );
        fs::create_dir_all(&self.result_root).map_err(|source| BenchError::Setup {
            path: self.result_root.clone(),
            source,
        })?;
        let recorder = Recorder::open(&path).map_err(|source| BenchError::Setup {
            path: path.clone(),
            source,
        })?;

        let mut ctx = RunContext {
            iteration: 0,
            cancel: self.cancel.clone(),
            recorder,
            phase: RunPhase::Idle,
        };
        info!(workload = %config.workload, case = case.name(), path = %ctx.recorder.path().display(), "benchmark started");

        enter(&mut ctx.phase, RunPhase::Configuring);
        let mut elevation = Elevation::new(&mut *self.sched, &mut *self.power);
        if let Err(e) = elevation.acquire(case, events) {
            warn!(case = case.name(), %e, "elevation failed, aborting before measurement");
            elevation.release();
            if let Err(rm) = ctx.recorder.discard() {
                warn!(%rm, "failed to remove empty result log");
            }
            return Err(e.into());
        }

        events.emit(RunEvent::Started {
            test_case_name: case.name().to_string(),
        });

        enter(&mut ctx.phase, RunPhase::Measuring);
        let mut status = RunStatus::Completed;
        let mut last_progress = Instant::now();

        while ctx.iteration < config.cycles {
            if ctx.cancel.is_canceled() {
                status = RunStatus::Canceled;
                break;
            }

            let idle_us = timing::idle(config.idle_ms);

            let start = timing::now_ns();
            let outcome = workload.execute(config.parameter);
            let workload_us = timing::elapsed_us(start);

            if let Err(source) = outcome {
                enter(&mut ctx.phase, RunPhase::Finalizing);
                elevation.release();
                if let Err(rm) = ctx.recorder.discard() {
                    warn!(%rm, "failed to remove partial result log");
                }
                return Err(BenchError::Workload {
                    workload: workload.name().to_string(),
                    iteration: ctx.iteration,
                    source,
                });
            }

            if let Err(source) = ctx.recorder.write_sample(workload_us, idle_us) {
                enter(&mut ctx.phase, RunPhase::Finalizing);
                elevation.release();
                let path = ctx.recorder.path().to_path_buf();
                if let Err(rm) = ctx.recorder.discard() {
                    warn!(%rm, "failed to remove partial result log");
                }
                return Err(BenchError::RecorderWrite { path, source });
            }
            ctx.iteration += 1;

            if last_progress.elapsed() >= PROGRESS_INTERVAL {
                events.emit(RunEvent::Progress {
                    iteration: ctx.iteration - 1,
                });
                last_progress = Instant::now();
            }
        }

        enter(&mut ctx.phase, RunPhase::Finalizing);
        elevation.release();
        drop(elevation);

        let path = ctx.recorder.path().to_path_buf();
        let samples = ctx.recorder.close().map_err(|source| {
            if let Err(rm) = fs::remove_file(&path) {
                warn!(%rm, "failed to remove unflushed result log");
            }
            BenchError::RecorderWrite {
                path: path.clone(),
                source,
            }
        })?;

        let terminal = match status {
            RunStatus::Completed => RunEvent::Finished {
                test_case_id: case.id(),
                path: path.clone(),
            },
            RunStatus::Canceled => RunEvent::Canceled {
                test_case_id: case.id(),
                path: path.clone(),
            },
        };
        events.emit(terminal);

        enter(&mut ctx.phase, RunPhase::Terminal(status));
        info!(case = case.name(), phase = ?ctx.phase, samples, "benchmark terminated");

        Ok(RunReport {
            test_case_id: case.id(),
            test_case_name: case.name().to_string(),
            status,
            samples,
            path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_idempotent() {
        let token = CancelToken::new();
        assert!(!token.is_canceled());
        token.cancel();
        token.cancel();
        assert!(token.is_canceled());
    }

    #[test]
    fn cancel_is_shared_between_clones() {
        let token = CancelToken::new();
        let other = token.clone();
        other.cancel();
        assert!(token.is_canceled());
    }
}
