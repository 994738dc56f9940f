// LATENCYSUITE WORKLOADS
// THE ENGINE TREATS A WORKLOAD AS OPAQUE: ONE CALL, ONE UNIT OF WORK,
// AND THE DURATION OF THAT CALL IS THE MEASUREMENT.
//
// THE TWO BUILT-INS EXIST SO THE CLI HAS SOMETHING TO RUN. REAL SUITES
// REGISTER THEIR OWN.

use std::hint::black_box;

use crate::error::WorkloadError;

pub trait Workload {
    fn name(&self) -> &str;
    fn execute(&mut self, parameter: u32) -> Result<(), WorkloadError>;
}

pub type WorkloadFactory = Box<dyn Fn() -> Box<dyn Workload + Send> + Send + Sync>;

#[derive(Default)]
pub struct WorkloadRegistry {
    entries: Vec<(String, WorkloadFactory)>,
}

impl WorkloadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        reg.register("spin", || Box::new(Spin));
        reg.register("alloc", || Box::new(Alloc));
        reg
    }

    // LATER REGISTRATIONS SHADOW EARLIER ONES WITH THE SAME NAME
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn Workload + Send> + Send + Sync + 'static,
    {
        self.entries.retain(|(n, _)| n != name);
        self.entries.push((name.to_string(), Box::new(factory)));
    }

    pub fn create(&self, name: &str) -> Option<Box<dyn Workload + Send>> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, f)| f())
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(n, _)| n.as_str()).collect()
    }
}

// INTEGER MIXING LOOP: parameter * 1000 ROUNDS
pub struct Spin;

impl Workload for Spin {
    fn name(&self) -> &str {
        "spin"
    }

    fn execute(&mut self, parameter: u32) -> Result<(), WorkloadError> {
        let rounds = u64::from(parameter) * 1_000;
        let mut acc = 0x9E37_79B9_7F4A_7C15u64;
        for i in 0..rounds {
            acc = black_box(acc.rotate_left(5) ^ i).wrapping_mul(0x100_0000_01B3);
        }
        black_box(acc);
        Ok(())
    }
}

// ALLOCATE parameter KIB AND TOUCH EVERY PAGE
pub struct Alloc;

const PAGE: usize = 4096;

impl Workload for Alloc {
    fn name(&self) -> &str {
        "alloc"
    }

    fn execute(&mut self, parameter: u32) -> Result<(), WorkloadError> {
        let bytes = parameter as usize * 1024;
        let mut buf = vec![0u8; bytes];
        for off in (0..bytes).step_by(PAGE) {
            buf[off] = off as u8;
        }
        black_box(&buf);
        Ok(())
    }
}
