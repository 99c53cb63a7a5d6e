use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Child, ExitStatus};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::cell::{self, Launch, SETUP_FAILURE_EXIT};
use crate::cgroup::Container;
use crate::error::Result;
use crate::pool::ContainerPool;
use crate::{CancelToken, JudgeStatus};

const WAIT_TICK: Duration = Duration::from_millis(4);

/// Extra headroom written on top of the requested memory cap, so the
/// verdict comes from the measured peak rather than from allocator
/// failures right at the boundary.
const MEMORY_SLACK_BYTES: u64 = 1024 * 1024;

/// Result of one confined run, before output comparison.
#[derive(Debug)]
pub struct Execution {
    pub status: JudgeStatus,
    pub stdout: String,
    pub stderr: String,
    pub time_ms: u64,
    pub memory_kb: u64,
    pub message: String,
}

/// Drives a single test-case run: rents a container, launches the cell,
/// waits on child exit / wall clock / cancellation, classifies the
/// termination and collects usage numbers.
pub struct SandboxRunner {
    pool: Arc<ContainerPool>,
    cell_path: PathBuf,
    max_output_size: u64,
    no_isolate: bool,
}

enum WaitOutcome {
    Reaped(ExitStatus),
    Timeout,
    Canceled,
}

impl SandboxRunner {
    pub fn new(pool: Arc<ContainerPool>, cell_path: PathBuf, max_output_size: u64) -> Self {
        Self {
            pool,
            cell_path,
            max_output_size,
            no_isolate: false,
        }
    }

    /// Disable namespaces and seccomp in the cell. Meant for development
    /// on hosts without the needed privileges; never for production.
    pub fn without_isolation(mut self) -> Self {
        warn!("sandbox isolation disabled, untrusted code runs unconfined");
        self.no_isolate = true;
        self
    }

    pub fn run(
        &self,
        exe: &Path,
        input: &str,
        time_limit_ms: u64,
        memory_limit_mb: u64,
        cancel: &CancelToken,
    ) -> Result<Execution> {
        let container = self.pool.acquire()?;
        let execution = self.run_in(&container, exe, input, time_limit_ms, memory_limit_mb, cancel);
        // The container goes back on every path, only after the child
        // has been reaped.
        self.pool.release(container);
        execution
    }

    fn run_in(
        &self,
        container: &Container,
        exe: &Path,
        input: &str,
        time_limit_ms: u64,
        memory_limit_mb: u64,
        cancel: &CancelToken,
    ) -> Result<Execution> {
        let memory_limit_bytes = memory_limit_mb * 1024 * 1024;
        container.set_memory_limit(memory_limit_bytes + MEMORY_SLACK_BYTES)?;
        container.set_cpu_limit(100)?;
        let oom_kills_before = container.oom_kill_count();

        let work_dir = exe.parent().unwrap_or_else(|| Path::new("."));
        let input_path = work_dir.join("input.tmp");
        let output_path = work_dir.join("output.tmp");
        let error_path = work_dir.join("error.tmp");

        let stage = TempFiles {
            paths: [input_path.clone(), output_path.clone(), error_path.clone()],
        };
        fs::write(&input_path, input)?;
        fs::write(&output_path, "")?;
        fs::write(&error_path, "")?;
        // The target may run as an unprivileged user inside the sandbox.
        for path in [&input_path, &output_path, &error_path] {
            fs::set_permissions(path, fs::Permissions::from_mode(0o666))?;
        }

        let mut child = cell::spawn(
            &self.cell_path,
            &Launch {
                exe,
                stdin: &input_path,
                stdout: &output_path,
                stderr: &error_path,
                stack_limit: memory_limit_bytes,
                output_limit: self.max_output_size,
                no_isolate: self.no_isolate,
            },
        )?;
        let started = Instant::now();

        if let Err(err) = container.add_process(child.id()) {
            kill_and_reap(&mut child);
            drop(stage);
            return Ok(Execution {
                status: JudgeStatus::SystemError,
                stdout: String::new(),
                stderr: String::new(),
                time_ms: 0,
                memory_kb: 0,
                message: format!("failed to attach process to container: {}", err),
            });
        }

        let deadline = Duration::from_millis(time_limit_ms);
        let outcome = loop {
            match child.try_wait() {
                Ok(Some(status)) => break WaitOutcome::Reaped(status),
                Ok(None) => {}
                Err(err) => {
                    kill_and_reap(&mut child);
                    return Err(err.into());
                }
            }
            if cancel.is_canceled() {
                kill_and_reap(&mut child);
                break WaitOutcome::Canceled;
            }
            if started.elapsed() >= deadline {
                kill_and_reap(&mut child);
                break WaitOutcome::Timeout;
            }
            thread::sleep(WAIT_TICK);
        };
        let wall_ms = started.elapsed().as_millis() as u64;

        let time_ms = match container.cpu_usage_ms() {
            Ok(cpu_ms) => cpu_ms,
            Err(err) => {
                debug!("{}: cpu.stat unreadable ({}), using wall clock", container.name(), err);
                match outcome {
                    WaitOutcome::Timeout => time_limit_ms,
                    _ => wall_ms,
                }
            }
        };
        let memory_kb = match container.memory_peak() {
            Ok(bytes) => bytes / 1024,
            Err(err) => {
                warn!("{}: failed to read peak memory: {}", container.name(), err);
                0
            }
        };
        let oom_killed = container.oom_kill_count() > oom_kills_before;

        let status = classify(&outcome, memory_kb, memory_limit_mb, oom_killed);

        let stdout = read_clipped(&output_path, self.max_output_size);
        let mut stderr = read_clipped(&error_path, self.max_output_size);
        if let WaitOutcome::Reaped(wait) = &outcome {
            if wait.signal() == Some(libc::SIGXFSZ) {
                if !stderr.is_empty() {
                    stderr.push('\n');
                }
                stderr.push_str("output file size limit exceeded");
            }
        }
        drop(stage);

        let message = match status {
            JudgeStatus::SystemError => match outcome {
                WaitOutcome::Canceled => "run canceled".to_string(),
                _ => "sandbox setup failed".to_string(),
            },
            _ => String::new(),
        };

        Ok(Execution {
            status,
            stdout,
            stderr,
            time_ms,
            memory_kb,
            message,
        })
    }
}

/// Verdict rules for one run, in precedence order: cancellation, wall
/// timeout, fatal signal, exit code, then the memory check that catches a
/// clean exit whose measured peak was still over the cap.
fn classify(
    outcome: &WaitOutcome,
    memory_kb: u64,
    memory_limit_mb: u64,
    oom_killed: bool,
) -> JudgeStatus {
    let limit_kb = memory_limit_mb * 1024;
    match outcome {
        WaitOutcome::Canceled => JudgeStatus::SystemError,
        WaitOutcome::Timeout => JudgeStatus::TimeLimitExceeded,
        WaitOutcome::Reaped(status) => {
            if let Some(signal) = status.signal() {
                if signal == libc::SIGKILL && is_memory_kill(memory_kb, limit_kb, oom_killed) {
                    JudgeStatus::MemoryLimitExceeded
                } else {
                    JudgeStatus::RuntimeError
                }
            } else if status.code() == Some(SETUP_FAILURE_EXIT) {
                JudgeStatus::SystemError
            } else if status.code().map_or(false, |code| code != 0) {
                JudgeStatus::RuntimeError
            } else if memory_kb > limit_kb {
                JudgeStatus::MemoryLimitExceeded
            } else {
                JudgeStatus::Accepted
            }
        }
    }
}

/// The OOM killer delivers SIGKILL; the event counter is the reliable
/// signal. The 90 % heuristic remains for kernels where the counter is
/// missing, since an OOM kill can truncate the recorded peak.
fn is_memory_kill(memory_kb: u64, limit_kb: u64, oom_killed: bool) -> bool {
    oom_killed || memory_kb > limit_kb || memory_kb * 10 >= limit_kb * 9
}

fn kill_and_reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn read_clipped(path: &Path, limit: u64) -> String {
    let mut bytes = fs::read(path).unwrap_or_default();
    if bytes.len() as u64 > limit {
        bytes.truncate(limit as usize);
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Removes the per-case temp files on every exit path.
struct TempFiles {
    paths: [PathBuf; 3],
}

impl Drop for TempFiles {
    fn drop(&mut self) {
        for path in &self.paths {
            let _ = fs::remove_file(path);
        }
    }
}
