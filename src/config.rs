// LATENCYSUITE RUN CONFIGURATION
// TEST CASES (WHAT GUARANTEES TO ACQUIRE) AND RUN CONFIGURATION (WHAT TO MEASURE).
// BOTH ARE IMMUTABLE ONCE HANDED TO THE ENGINE. EDITS REPLACE THE WHOLE VALUE.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{BenchError, Result};

// PICKER RANGES AND DEFAULTS. THE ENGINE NEVER ENFORCES THESE,
// THE CLI ONLY WARNS WHEN A VALUE FALLS OUTSIDE THEM.

pub const PARAMETER_MIN: u32 = 100;
pub const PARAMETER_MAX: u32 = 1000;
pub const PARAMETER_STEP: u32 = 100;
pub const PARAMETER_DEFAULT: u32 = 100;

pub const CYCLES_MIN: u64 = 1000;
pub const CYCLES_MAX: u64 = 100_000;
pub const CYCLES_STEP: u64 = 1000;
pub const CYCLES_DEFAULT: u64 = 1000;

pub const SLEEP_MIN_MS: u64 = 10;
pub const SLEEP_MAX_MS: u64 = 1000;
pub const SLEEP_STEP_MS: u64 = 10;
pub const SLEEP_DEFAULT_MS: u64 = 10;

pub const POWER_LEVEL_MAX: u8 = 100;

pub const WARMUP_CASE_NAME: &str = "Warmup Phase";
pub const WARMUP_CASE_ID: u32 = 0;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    id: u32,
    name: String,
    #[serde(default)]
    realtime_priority: Option<i32>,
    #[serde(default)]
    power_level: Option<u8>,
    #[serde(default)]
    cpu_core: Option<usize>,
}

impl TestCase {
    // ALL TUNABLES START DISABLED
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            realtime_priority: None,
            power_level: None,
            cpu_core: None,
        }
    }

    // THE CASE QUEUED AHEAD OF THE SELECTED ONES TO SETTLE CACHES AND CLOCKS
    pub fn warmup() -> Self {
        Self::new(WARMUP_CASE_ID, WARMUP_CASE_NAME)
    }

    pub fn with_realtime_priority(self, priority: i32) -> Self {
        Self { realtime_priority: Some(priority), ..self }
    }

    pub fn with_power_level(self, percent: u8) -> Self {
        Self { power_level: Some(percent), ..self }
    }

    pub fn with_cpu_core(self, core: usize) -> Self {
        Self { cpu_core: Some(core), ..self }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn realtime_priority(&self) -> Option<i32> {
        self.realtime_priority
    }

    pub fn power_level(&self) -> Option<u8> {
        self.power_level
    }

    pub fn cpu_core(&self) -> Option<usize> {
        self.cpu_core
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(BenchError::Config(format!("test case {} has an empty name", self.id)));
        }
        if let Some(p) = self.realtime_priority {
            if p < 1 {
                return Err(BenchError::Config(format!(
                    "test case '{}': real-time priority must be >= 1, got {}",
                    self.name, p
                )));
            }
        }
        if let Some(level) = self.power_level {
            if level > POWER_LEVEL_MAX {
                return Err(BenchError::Config(format!(
                    "test case '{}': power level must be 0..={}, got {}",
                    self.name, POWER_LEVEL_MAX, level
                )));
            }
        }
        Ok(())
    }

    // THREE-LINE SUMMARY OF THE TUNABLES
    pub fn describe(&self) -> String {
        let priority = match self.realtime_priority {
            Some(p) => p.to_string(),
            None => "none".to_string(),
        };
        let power = match self.power_level {
            Some(level) => format!("{}%", level),
            None => "none".to_string(),
        };
        let core = match self.cpu_core {
            Some(c) => c.to_string(),
            None => "none".to_string(),
        };
        format!(
            "Real-time priority: {}\nPower lock: {}\nCPU core lock: {}",
            priority, power, core
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunConfiguration {
    pub workload: String,
    pub parameter: u32,
    pub cycles: u64,
    pub idle_ms: u64,
}

impl RunConfiguration {
    pub fn new(workload: impl Into<String>) -> Self {
        Self {
            workload: workload.into(),
            parameter: PARAMETER_DEFAULT,
            cycles: CYCLES_DEFAULT,
            idle_ms: SLEEP_DEFAULT_MS,
        }
    }

    // HUMAN-READABLE NOTES FOR VALUES OUTSIDE THE USUAL PICKER RANGES
    pub fn range_warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if !(PARAMETER_MIN..=PARAMETER_MAX).contains(&self.parameter) {
            warnings.push(format!(
                "parameter {} outside usual range {}..={}",
                self.parameter, PARAMETER_MIN, PARAMETER_MAX
            ));
        }
        if !(CYCLES_MIN..=CYCLES_MAX).contains(&self.cycles) {
            warnings.push(format!(
                "cycles {} outside usual range {}..={}",
                self.cycles, CYCLES_MIN, CYCLES_MAX
            ));
        }
        if !(SLEEP_MIN_MS..=SLEEP_MAX_MS).contains(&self.idle_ms) {
            warnings.push(format!(
                "sleep {} ms outside usual range {}..={}",
                self.idle_ms, SLEEP_MIN_MS, SLEEP_MAX_MS
            ));
        }
        warnings
    }
}

// PARSE A JSON ARRAY OF TEST CASES. EVERY CASE IS VALIDATED AND IDS MUST BE UNIQUE.
pub fn parse_test_cases(json: &str) -> Result<Vec<TestCase>> {
    let cases: Vec<TestCase> = serde_json::from_str(json)
        .map_err(|e| BenchError::Config(format!("malformed test case list: {}", e)))?;

    for (i, case) in cases.iter().enumerate() {
        case.validate()?;
        if cases[..i].iter().any(|c| c.id == case.id) {
            return Err(BenchError::Config(format!("duplicate test case id {}", case.id)));
        }
    }
    Ok(cases)
}

pub fn load_test_cases(path: &Path) -> Result<Vec<TestCase>> {
    let raw = fs::read_to_string(path).map_err(|e| {
        BenchError::Config(format!("cannot read test cases from {}: {}", path.display(), e))
    })?;
    parse_test_cases(&raw)
}
