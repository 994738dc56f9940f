// LATENCYSUITE LIFECYCLE EVENTS
// FIRE-AND-FORGET NOTIFICATIONS FROM THE ENGINE TO WHOEVER IS WATCHING.
// THE ENGINE NEVER BLOCKS ON A CONSUMER AND NEVER RETRIES A DELIVERY.
//
// EventLog IS THE CONSUMER-SIDE RECORD: PRE-ALLOCATED RING BUFFER,
// OLDEST ENTRIES OVERWRITTEN WHEN FULL.

use std::path::PathBuf;
use std::sync::mpsc::Sender;

use crate::timing::now_ns;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunEvent {
    Started { test_case_name: String },
    Progress { iteration: u64 },
    Finished { test_case_id: u32, path: PathBuf },
    Canceled { test_case_id: u32, path: PathBuf },
    Warning { message: String },
    // SEQUENCER ONLY: QUEUE DRAINED
    AllFinished,
}

impl RunEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished { .. } | Self::Canceled { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Started { .. } => "STARTED",
            Self::Progress { .. } => "PROGRESS",
            Self::Finished { .. } => "FINISHED",
            Self::Canceled { .. } => "CANCELED",
            Self::Warning { .. } => "WARNING",
            Self::AllFinished => "ALL_FINISHED",
        }
    }
}

pub trait EventSink {
    fn emit(&self, event: RunEvent);
}

// A DISCONNECTED RECEIVER IS NOT THE ENGINE'S PROBLEM
impl EventSink for Sender<RunEvent> {
    fn emit(&self, event: RunEvent) {
        let _ = self.send(event);
    }
}

pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: RunEvent) {}
}

const MAX_ENTRIES: usize = 4096;

#[derive(Clone, Debug)]
pub struct Entry {
    pub ts_ns: u64,
    pub event: RunEvent,
}

pub struct EventLog {
    entries: Vec<Option<Entry>>,
    head: usize,
    len: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            entries: vec![None; MAX_ENTRIES],
            head: 0,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn record(&mut self, event: RunEvent) {
        self.entries[self.head] = Some(Entry { ts_ns: now_ns(), event });
        self.head = (self.head + 1) % MAX_ENTRIES;
        if self.len < MAX_ENTRIES {
            self.len += 1;
        }
    }

    pub fn iter_chronological(&self) -> impl Iterator<Item = &Entry> {
        let start = if self.len < MAX_ENTRIES { 0 } else { self.head };
        (0..self.len).filter_map(move |i| self.entries[(start + i) % MAX_ENTRIES].as_ref())
    }

    pub fn dump(&self) {
        let mut iter = self.iter_chronological();
        let first = match iter.next() {
            Some(e) => e,
            None => return,
        };
        let base_ts = first.ts_ns;

        println!("\n{:<10} {:<14} {}", "TIME_S", "EVENT", "DETAIL");
        println!("{}", "-".repeat(72));
        for e in std::iter::once(first).chain(iter) {
            let elapsed_s = (e.ts_ns - base_ts) as f64 / 1_000_000_000.0;
            println!("{:<10.1} {:<14} {}", elapsed_s, e.event.label(), detail(&e.event));
        }

        if self.len == MAX_ENTRIES {
            println!("\n(RING BUFFER WRAPPED -- SHOWING MOST RECENT {} EVENTS)", MAX_ENTRIES);
        }
        println!("TOTAL EVENTS: {}", self.len);
    }

    // PER-KIND TOTALS
    pub fn summary(&self) {
        if self.is_empty() {
            return;
        }
        let count = |label: &str| self.iter_chronological().filter(|e| e.event.label() == label).count();

        println!("\n{}", "=".repeat(50));
        println!("LATENCYSUITE SUMMARY");
        println!("{}", "=".repeat(50));
        println!("  CASES STARTED:     {}", count("STARTED"));
        println!("  CASES FINISHED:    {}", count("FINISHED"));
        println!("  CASES CANCELED:    {}", count("CANCELED"));
        println!("  WARNINGS:          {}", count("WARNING"));
        println!("  PROGRESS UPDATES:  {}", count("PROGRESS"));
    }
}

fn detail(event: &RunEvent) -> String {
    match event {
        RunEvent::Started { test_case_name } => test_case_name.clone(),
        RunEvent::Progress { iteration } => format!("iteration {}", iteration),
        RunEvent::Finished { test_case_id, path } | RunEvent::Canceled { test_case_id, path } => {
            format!("case {} -> {}", test_case_id, path.display())
        }
        RunEvent::Warning { message } => message.clone(),
        RunEvent::AllFinished => String::new(),
    }
}
