// LATENCYSUITE ERROR TAXONOMY
// SETUP AND ELEVATION ERRORS ABORT BEFORE ANY SAMPLE IS TAKEN.
// WORKLOAD AND RECORDER ERRORS ABORT MID-RUN AFTER CLEANUP.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type WorkloadError = Box<dyn std::error::Error + Send + Sync>;

// FAILURE OF A PRIVILEGED CONTROL REQUEST (SCHEDULING, POWER LEVEL, AFFINITY)
#[derive(Debug, Error)]
pub enum ElevationError {
    #[error("{what}: permission denied")]
    PermissionDenied { what: &'static str },

    #[error("{what}: unavailable ({reason})")]
    Unavailable { what: &'static str, reason: String },

    #[error("real-time priority {priority} outside supported range {min}..={max}")]
    InvalidPriority { priority: i32, min: i32, max: i32 },

    #[error("cpu core {core} is not available ({available} cores online)")]
    InvalidCore { core: usize, available: usize },

    #[error("{what}: {source}")]
    Os {
        what: &'static str,
        #[source]
        source: io::Error,
    },
}

impl ElevationError {
    // MAP AN OS ERROR ONTO THE TAXONOMY. EPERM/EACCES ARE NOT RETRYABLE.
    pub fn from_os(what: &'static str, err: io::Error) -> Self {
        match err.raw_os_error() {
            Some(libc::EPERM) | Some(libc::EACCES) => Self::PermissionDenied { what },
            Some(libc::ESRCH) | Some(libc::ENOSYS) | Some(libc::ENOENT) => Self::Unavailable {
                what,
                reason: err.to_string(),
            },
            _ => Self::Os { what, source: err },
        }
    }
}

#[derive(Debug, Error)]
pub enum BenchError {
    #[error("cannot prepare result log {path}: {source}")]
    Setup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("scheduling elevation failed: {0}")]
    Elevation(#[from] ElevationError),

    #[error("workload '{workload}' failed at iteration {iteration}: {source}")]
    Workload {
        workload: String,
        iteration: u64,
        #[source]
        source: WorkloadError,
    },

    #[error("cannot write result log {path}: {source}")]
    RecorderWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, BenchError>;
