use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use log::{debug, warn};

use crate::error::{Error, Result};

/// Default cgroup v2 mount point.
pub const CGROUP_ROOT: &str = "/sys/fs/cgroup";

const CPU_PERIOD_USEC: u64 = 100_000;

/// One cgroup v2 directory hosting at most one judged process at a time.
/// Created at pool construction, reused between runs, removed at shutdown.
pub struct Container {
    name: String,
    path: PathBuf,
}

impl Container {
    pub fn create(name: &str) -> Result<Self> {
        Self::create_under(Path::new(CGROUP_ROOT), name)
    }

    /// Create the container under an explicit hierarchy root. Tests point
    /// this at a scratch directory so the file protocol can be exercised
    /// without a real cgroup mount.
    pub fn create_under(root: &Path, name: &str) -> Result<Self> {
        let path = root.join(name);
        if path.exists() {
            // A stale directory from a crashed run; removal fails if it
            // still hosts processes, and mkdir below will report that.
            let _ = fs::remove_dir(&path);
        }
        fs::create_dir_all(&path).map_err(|err| {
            Error::Cgroup(format!("failed to create cgroup {}: {}", path.display(), err))
        })?;
        debug!("created cgroup {}", path.display());
        Ok(Self {
            name: name.to_string(),
            path,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_file(&self, file: &str, value: &str) -> Result<()> {
        fs::write(self.path.join(file), value).map_err(|err| {
            Error::Cgroup(format!("failed to write {} of {}: {}", file, self.name, err))
        })
    }

    fn read_file(&self, file: &str) -> Result<String> {
        fs::read_to_string(self.path.join(file)).map_err(|err| {
            Error::Cgroup(format!("failed to read {} of {}: {}", file, self.name, err))
        })
    }

    fn read_counter(&self, file: &str) -> Result<u64> {
        let content = self.read_file(file)?;
        content.trim().parse::<u64>().map_err(|err| {
            Error::Cgroup(format!("failed to parse {} of {}: {}", file, self.name, err))
        })
    }

    pub fn set_memory_limit(&self, bytes: u64) -> Result<()> {
        self.write_file("memory.max", &bytes.to_string())
    }

    /// `percent` is CPU bandwidth where 100 means one full core.
    pub fn set_cpu_limit(&self, percent: u64) -> Result<()> {
        let quota = CPU_PERIOD_USEC * percent / 100;
        self.write_file("cpu.max", &format!("{} {}", quota, CPU_PERIOD_USEC))
    }

    pub fn add_process(&self, pid: u32) -> Result<()> {
        self.write_file("cgroup.procs", &pid.to_string())
    }

    /// Peak resident memory in bytes. Kernels older than 5.19 lack
    /// `memory.peak`; the instantaneous counter is the fallback there,
    /// with reduced accuracy.
    pub fn memory_peak(&self) -> Result<u64> {
        match self.read_counter("memory.peak") {
            Ok(peak) => Ok(peak),
            Err(_) => {
                debug!("{}: memory.peak unavailable, using memory.current", self.name);
                self.read_counter("memory.current")
            }
        }
    }

    /// Cumulative CPU time in milliseconds, parsed from `cpu.stat`.
    pub fn cpu_usage_ms(&self) -> Result<u64> {
        let content = self.read_file("cpu.stat")?;
        for line in content.lines() {
            let mut parts = line.split_whitespace();
            if let (Some("usage_usec"), Some(value)) = (parts.next(), parts.next()) {
                let usec = value.parse::<u64>().map_err(|err| {
                    Error::Cgroup(format!("failed to parse usage_usec of {}: {}", self.name, err))
                })?;
                return Ok(usec / 1000);
            }
        }
        Err(Error::Cgroup(format!(
            "usage_usec not found in cpu.stat of {}",
            self.name
        )))
    }

    /// How many times the OOM killer fired inside this container. Missing
    /// `memory.events` reads as zero.
    pub fn oom_kill_count(&self) -> u64 {
        let content = match self.read_file("memory.events") {
            Ok(content) => content,
            Err(_) => return 0,
        };
        for line in content.lines() {
            let mut parts = line.split_whitespace();
            if let (Some("oom_kill"), Some(value)) = (parts.next(), parts.next()) {
                return value.parse().unwrap_or(0);
            }
        }
        0
    }

    pub fn procs(&self) -> Result<Vec<i32>> {
        let content = self.read_file("cgroup.procs")?;
        let mut pids = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let pid = line.parse::<i32>().map_err(|err| {
                Error::Cgroup(format!("bad pid in cgroup.procs of {}: {}", self.name, err))
            })?;
            pids.push(pid);
        }
        Ok(pids)
    }

    /// Make the container ready for its next tenant: kill any resident
    /// processes and wait until `cgroup.procs` is empty. Limits are not
    /// touched here, the next run rewrites them anyway.
    pub fn reset(&self) -> Result<()> {
        for _ in 0..100 {
            let pids = self.procs()?;
            if pids.is_empty() {
                return Ok(());
            }
            warn!("{}: {} resident processes, killing", self.name, pids.len());
            for pid in pids {
                unsafe {
                    libc::kill(pid, libc::SIGKILL);
                }
            }
            thread::sleep(Duration::from_millis(10));
        }
        Err(Error::Cgroup(format!(
            "{} still has resident processes after reset",
            self.name
        )))
    }

    pub fn destroy(self) -> Result<()> {
        let _ = self.reset();
        fs::remove_dir(&self.path).map_err(|err| {
            Error::Cgroup(format!("failed to remove cgroup {}: {}", self.path.display(), err))
        })
    }
}
