// LATENCYSUITE RUN SEQUENCER
// FIFO QUEUE OF (TEST CASE, RUN CONFIGURATION) REQUESTS DRAINED BY ONE
// DEDICATED WORKER THREAD. EXACTLY ONE ENGINE IS ACTIVE AT A TIME, AND
// IT NEVER RUNS ON THE THREAD THAT SUBMITS OR CANCELS.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{info, warn};

use crate::config::{RunConfiguration, TestCase};
use crate::engine::{CancelToken, Engine, RunReport};
use crate::error::{BenchError, Result};
use crate::event::{EventSink, RunEvent};
use crate::power::PowerController;
use crate::sched::SchedulingController;
use crate::workload::WorkloadRegistry;

#[derive(Clone, Debug)]
pub struct RunRequest {
    pub case: TestCase,
    pub config: RunConfiguration,
}

#[derive(Debug)]
pub enum RunOutcome {
    Ran { case: TestCase, result: Result<RunReport> },
    // DROPPED BY cancel_all() BEFORE IT STARTED
    Skipped { case: TestCase },
}

pub struct Worker {
    pub result_root: PathBuf,
    pub registry: WorkloadRegistry,
    pub sched: Box<dyn SchedulingController + Send>,
    pub power: Box<dyn PowerController + Send>,
    pub events: Sender<RunEvent>,
}

#[derive(Default)]
struct Shared {
    current: Mutex<Option<CancelToken>>,
    draining: AtomicBool,
}

// CHEAP TO CLONE, SAFE TO MOVE INTO A SIGNAL HANDLER
#[derive(Clone)]
pub struct SequencerHandle {
    shared: Arc<Shared>,
}

impl SequencerHandle {
    // COOPERATIVE: THE ACTIVE RUN STOPS AT ITS NEXT ITERATION BOUNDARY
    pub fn cancel(&self) {
        let current = self.shared.current.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(token) = current.as_ref() {
            token.cancel();
        }
    }

    // CANCEL THE ACTIVE RUN AND SKIP EVERYTHING STILL QUEUED
    pub fn cancel_all(&self) {
        self.shared.draining.store(true, Ordering::Relaxed);
        self.cancel();
    }
}

pub struct Sequencer {
    tx: Option<Sender<RunRequest>>,
    worker: Option<JoinHandle<Vec<RunOutcome>>>,
    handle: SequencerHandle,
}

impl Sequencer {
    pub fn spawn(worker: Worker) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let shared = Arc::new(Shared::default());
        let thread_shared = Arc::clone(&shared);
        let join = thread::Builder::new()
            .name("latencysuite-worker".into())
            .spawn(move || worker_loop(worker, rx, &thread_shared))?;

        Ok(Self {
            tx: Some(tx),
            worker: Some(join),
            handle: SequencerHandle { shared },
        })
    }

    pub fn handle(&self) -> SequencerHandle {
        self.handle.clone()
    }

    // HANDS THE REQUEST BACK IF THE WORKER IS GONE
    pub fn submit(&self, request: RunRequest) -> std::result::Result<(), RunRequest> {
        match self.tx.as_ref() {
            Some(tx) => tx.send(request).map_err(|e| e.0),
            None => Err(request),
        }
    }

    pub fn cancel(&self) {
        self.handle.cancel();
    }

    pub fn cancel_all(&self) {
        self.handle.cancel_all();
    }

    // CLOSE THE QUEUE, WAIT FOR THE WORKER TO DRAIN IT, COLLECT OUTCOMES IN SUBMISSION ORDER
    pub fn finish(mut self) -> thread::Result<Vec<RunOutcome>> {
        self.tx.take();
        match self.worker.take() {
            Some(join) => join.join(),
            None => Ok(Vec::new()),
        }
    }
}

impl Drop for Sequencer {
    fn drop(&mut self) {
        if self.worker.is_none() {
            return;
        }
        self.handle.cancel_all();
        self.tx.take();
        if let Some(join) = self.worker.take() {
            let _ = join.join();
        }
    }
}

fn worker_loop(mut worker: Worker, rx: Receiver<RunRequest>, shared: &Shared) -> Vec<RunOutcome> {
    let mut outcomes = Vec::new();

    for RunRequest { case, config } in rx {
        if shared.draining.load(Ordering::Relaxed) {
            info!(case = case.name(), "skipping queued run");
            outcomes.push(RunOutcome::Skipped { case });
            continue;
        }

        let token = CancelToken::new();
        *shared.current.lock().unwrap_or_else(|e| e.into_inner()) = Some(token.clone());

        let result = match worker.registry.create(&config.workload) {
            Some(mut workload) => {
                let mut engine = Engine::new(
                    worker.result_root.clone(),
                    worker.sched.as_mut(),
                    worker.power.as_mut(),
                    &worker.events,
                )
                .with_cancel_token(token);
                engine.execute(workload.as_mut(), &config, &case)
            }
            None => Err(BenchError::Config(format!("unknown workload '{}'", config.workload))),
        };

        shared.current.lock().unwrap_or_else(|e| e.into_inner()).take();

        if let Err(e) = &result {
            warn!(case = case.name(), %e, "run failed");
        }
        outcomes.push(RunOutcome::Ran { case, result });
    }

    worker.events.emit(RunEvent::AllFinished);
    outcomes
}
