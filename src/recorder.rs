// LATENCYSUITE RESULT RECORDER
// ONE CSV LINE PER ITERATION: "<workload_us>,<idle_us>\n". NO HEADER.
// THE FILE NAME IS A PURE FUNCTION OF THE RUN INPUTS, SO AN IDENTICAL
// RERUN OVERWRITES THE PREVIOUS LOG INSTEAD OF FORKING A NEW ONE.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

// STRIP WHITESPACE, TURN PATH SEPARATORS INTO DASHES
pub fn normalize_component(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == '/' || c == '\\' { '-' } else { c })
        .collect()
}

pub fn result_file_name(
    workload: &str,
    parameter: u32,
    idle_ms: u64,
    cycles: u64,
    case_name: &str,
) -> String {
    format!(
        "{}_p={}_s={}_c={}_case={}.csv",
        normalize_component(workload),
        parameter,
        idle_ms,
        cycles,
        normalize_component(case_name)
    )
}

pub fn result_path(
    root: &Path,
    workload: &str,
    parameter: u32,
    idle_ms: u64,
    cycles: u64,
    case_name: &str,
) -> PathBuf {
    root.join(result_file_name(workload, parameter, idle_ms, cycles, case_name))
}

pub struct Recorder {
    path: PathBuf,
    out: BufWriter<File>,
    samples: u64,
}

impl Recorder {
    // TRUNCATES ANY PREVIOUS LOG AT THE SAME PATH
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            out: BufWriter::new(file),
            samples: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    // BUFFERED: NO SYSCALL PER SAMPLE IN THE MEASUREMENT LOOP
    pub fn write_sample(&mut self, workload_us: u64, idle_us: u64) -> io::Result<()> {
        writeln!(self.out, "{},{}", workload_us, idle_us)?;
        self.samples += 1;
        Ok(())
    }

    // FLUSH AND FSYNC. RETURNS THE NUMBER OF SAMPLES WRITTEN.
    pub fn close(self) -> io::Result<u64> {
        let samples = self.samples;
        let file = self.out.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(samples)
    }

    // DROP THE LOG ENTIRELY. A TRUNCATED CSV WOULD READ AS A SHORT RUN.
    pub fn discard(self) -> io::Result<()> {
        let path = self.path.clone();
        drop(self);
        match fs::remove_file(&path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}
