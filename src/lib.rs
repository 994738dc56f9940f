// LATENCYSUITE -- REAL-TIME SCHEDULING LATENCY BENCHMARK HARNESS
// LIBRARY CRATE: ENGINE, CONTROLLERS, RECORDER, SEQUENCER.
// THE BINARY (main.rs) IS A THIN CLI ON TOP.

pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod power;
pub mod recorder;
pub mod sched;
pub mod sequencer;
pub mod timing;
pub mod workload;
