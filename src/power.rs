// LATENCYSUITE POWER / AFFINITY CONTROLLER
// KEEPS THE CPU OUT OF DEEP IDLE, OPTIONALLY RAISES THE FREQUENCY FLOOR,
// OPTIONALLY PINS THE WORKER TO ONE CORE.
//
// LINUX BINDING:
//   WAKE LOCK   -> /dev/cpu_dma_latency HELD OPEN WITH A 0US PM-QOS REQUEST
//   POWER LEVEL -> cpufreq scaling_min_freq RAISED TO A PERCENT OF THE HW SPAN
//   CORE LOCK   -> sched_setaffinity ON THE CALLING THREAD
//
// EVERY RELEASE IS SAFE TO CALL EVEN IF THE MATCHING ACQUIRE FAILED OR NEVER RAN.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::ElevationError;

const PM_QOS_DEVICE: &str = "/dev/cpu_dma_latency";
const SYSFS_CPU_ROOT: &str = "/sys/devices/system/cpu";

pub trait PowerController {
    fn acquire_wake_lock(&mut self) -> Result<(), ElevationError>;
    fn release_wake_lock(&mut self) -> Result<(), ElevationError>;

    // NO-OP GUARD WHEN THE PLATFORM HAS NO FREQUENCY CONTROL
    fn set_power_level(&mut self, percent: u8) -> Result<(), ElevationError>;
    fn clear_power_level(&mut self) -> Result<(), ElevationError>;

    // BEST EFFORT. CALLERS TREAT FAILURE AS A WARNING.
    fn pin_to_core(&mut self, core: usize) -> Result<(), ElevationError>;
    fn release_core(&mut self) -> Result<(), ElevationError>;
}

pub struct LinuxPower {
    sysfs_root: PathBuf,
    pm_qos_device: PathBuf,
    wake_refs: u32,
    pm_qos: Option<File>,
    saved_min_freq: Vec<(PathBuf, String)>,
    saved_affinity: Option<libc::cpu_set_t>,
}

impl Default for LinuxPower {
    fn default() -> Self {
        Self::new()
    }
}

impl LinuxPower {
    pub fn new() -> Self {
        Self::with_paths(SYSFS_CPU_ROOT, PM_QOS_DEVICE)
    }

    // ALTERNATE SYSFS/DEVICE LOCATIONS (CONTAINERS, TESTS)
    pub fn with_paths(sysfs_root: impl Into<PathBuf>, pm_qos_device: impl Into<PathBuf>) -> Self {
        Self {
            sysfs_root: sysfs_root.into(),
            pm_qos_device: pm_qos_device.into(),
            wake_refs: 0,
            pm_qos: None,
            saved_min_freq: Vec::new(),
            saved_affinity: None,
        }
    }

    pub fn wake_lock_held(&self) -> bool {
        self.wake_refs > 0
    }

    // cpuN/cpufreq DIRECTORIES, SORTED BY CPU NUMBER
    fn cpufreq_dirs(&self) -> Vec<PathBuf> {
        let entries = match fs::read_dir(&self.sysfs_root) {
            Ok(e) => e,
            Err(_) => return Vec::new(),
        };
        let mut dirs: Vec<(u32, PathBuf)> = entries
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name();
                let idx = name.to_str()?.strip_prefix("cpu")?.parse::<u32>().ok()?;
                let dir = entry.path().join("cpufreq");
                dir.is_dir().then_some((idx, dir))
            })
            .collect();
        dirs.sort_by_key(|(idx, _)| *idx);
        dirs.into_iter().map(|(_, d)| d).collect()
    }

    fn restore_min_freq(&mut self) -> Result<(), ElevationError> {
        let mut first_err = None;
        // REVERSE WRITE ORDER
        while let Some((path, value)) = self.saved_min_freq.pop() {
            if let Err(e) = fs::write(&path, &value) {
                warn!(path = %path.display(), %e, "failed to restore scaling_min_freq");
                first_err.get_or_insert(ElevationError::from_os("scaling_min_freq", e));
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn read_khz(path: &Path) -> io::Result<u64> {
    let raw = fs::read_to_string(path)?;
    raw.trim()
        .parse()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, format!("bad frequency in {}", path.display())))
}

// FREQUENCY FLOOR FOR A POWER PERCENT: min + (max - min) * percent / 100
pub fn power_level_khz(hw_min: u64, hw_max: u64, percent: u8) -> u64 {
    let span = hw_max.saturating_sub(hw_min);
    hw_min + span * u64::from(percent.min(100)) / 100
}

pub fn online_cpus() -> usize {
    let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if n < 1 { 1 } else { n as usize }
}

impl PowerController for LinuxPower {
    fn acquire_wake_lock(&mut self) -> Result<(), ElevationError> {
        self.wake_refs += 1;
        if self.wake_refs > 1 {
            return Ok(());
        }

        // THE REQUEST STAYS ACTIVE FOR AS LONG AS THE FILE IS OPEN
        let opened = OpenOptions::new()
            .write(true)
            .open(&self.pm_qos_device)
            .and_then(|mut f| f.write_all(&0i32.to_ne_bytes()).map(|_| f));
        match opened {
            Ok(f) => {
                self.pm_qos = Some(f);
                debug!(device = %self.pm_qos_device.display(), "wake lock acquired");
            }
            Err(e) => {
                warn!(device = %self.pm_qos_device.display(), %e,
                      "pm-qos request unavailable, cpu may enter deep idle");
            }
        }
        Ok(())
    }

    fn release_wake_lock(&mut self) -> Result<(), ElevationError> {
        if self.wake_refs == 0 {
            return Ok(());
        }
        self.wake_refs -= 1;
        if self.wake_refs == 0 && self.pm_qos.take().is_some() {
            debug!("wake lock released");
        }
        Ok(())
    }

    fn set_power_level(&mut self, percent: u8) -> Result<(), ElevationError> {
        let dirs = self.cpufreq_dirs();
        if dirs.is_empty() {
            warn!(percent, "no cpufreq control on this platform, power level ignored");
            return Ok(());
        }

        for dir in dirs {
            let hw_min = read_khz(&dir.join("cpuinfo_min_freq"));
            let hw_max = read_khz(&dir.join("cpuinfo_max_freq"));
            let (hw_min, hw_max) = match (hw_min, hw_max) {
                (Ok(lo), Ok(hi)) => (lo, hi),
                _ => continue,
            };
            let min_path = dir.join("scaling_min_freq");
            let previous = match fs::read_to_string(&min_path) {
                Ok(v) => v.trim().to_string(),
                Err(_) => continue,
            };

            // THE KERNEL REJECTS A FLOOR ABOVE THE CURRENT CEILING
            let ceiling = read_khz(&dir.join("scaling_max_freq")).unwrap_or(hw_max);
            let target = power_level_khz(hw_min, hw_max, percent).min(ceiling);

            if !self.saved_min_freq.iter().any(|(p, _)| p == &min_path) {
                self.saved_min_freq.push((min_path.clone(), previous));
            }
            if let Err(e) = fs::write(&min_path, target.to_string()) {
                let err = ElevationError::from_os("scaling_min_freq", e);
                let _ = self.restore_min_freq();
                return Err(err);
            }
        }

        info!(percent, cpus = self.saved_min_freq.len(), "power level applied");
        Ok(())
    }

    fn clear_power_level(&mut self) -> Result<(), ElevationError> {
        if self.saved_min_freq.is_empty() {
            return Ok(());
        }
        self.restore_min_freq()?;
        debug!("power level cleared");
        Ok(())
    }

    fn pin_to_core(&mut self, core: usize) -> Result<(), ElevationError> {
        let available = online_cpus();
        if core >= available || core >= libc::CPU_SETSIZE as usize {
            return Err(ElevationError::InvalidCore { core, available });
        }

        let mut previous: libc::cpu_set_t = unsafe { std::mem::zeroed() };
        let size = std::mem::size_of::<libc::cpu_set_t>();
        if unsafe { libc::sched_getaffinity(0, size, &mut previous) } < 0 {
            return Err(ElevationError::from_os("sched_getaffinity", io::Error::last_os_error()));
        }

        let mut set: libc::cpu_set_t = unsafe { std::mem::zeroed() };
        unsafe {
            libc::CPU_ZERO(&mut set);
            libc::CPU_SET(core, &mut set);
        }
        if unsafe { libc::sched_setaffinity(0, size, &set) } < 0 {
            return Err(ElevationError::from_os("sched_setaffinity", io::Error::last_os_error()));
        }

        // A SECOND PIN KEEPS THE ORIGINAL MASK
        if self.saved_affinity.is_none() {
            self.saved_affinity = Some(previous);
        }
        debug!(core, "worker pinned");
        Ok(())
    }

    fn release_core(&mut self) -> Result<(), ElevationError> {
        let previous = match self.saved_affinity.take() {
            Some(mask) => mask,
            None => return Ok(()),
        };
        let size = std::mem::size_of::<libc::cpu_set_t>();
        if unsafe { libc::sched_setaffinity(0, size, &previous) } < 0 {
            return Err(ElevationError::from_os("sched_setaffinity", io::Error::last_os_error()));
        }
        debug!("worker affinity restored");
        Ok(())
    }
}

impl Drop for LinuxPower {
    fn drop(&mut self) {
        // A FORGOTTEN FLOOR WOULD OUTLIVE THE PROCESS
        let _ = self.restore_min_freq();
    }
}
