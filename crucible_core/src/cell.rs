use std::path::Path;
use std::process::{Child, Command, Stdio};

use crate::error::{Error, Result};

/// Exit code the cell uses when sandbox setup fails before exec. The
/// monitor maps it to a system error rather than blaming the submission.
pub const SETUP_FAILURE_EXIT: i32 = 203;

/// Everything the cell needs to confine one run.
pub struct Launch<'a> {
    pub exe: &'a Path,
    pub stdin: &'a Path,
    pub stdout: &'a Path,
    pub stderr: &'a Path,
    /// RLIMIT_STACK, bytes.
    pub stack_limit: u64,
    /// RLIMIT_FSIZE, bytes.
    pub output_limit: u64,
    /// Skip namespaces and seccomp; only for unprivileged development hosts.
    pub no_isolate: bool,
}

/// Spawn the cell, which redirects stdio, unshares namespaces, applies
/// rlimits and seccomp, then execs the target. The cell opens the three
/// stdio files itself; the judge process holds no handles to them while
/// the child runs.
pub fn spawn(cell_path: &Path, launch: &Launch<'_>) -> Result<Child> {
    let mut command = Command::new(cell_path);
    command
        .arg("--stdin")
        .arg(launch.stdin)
        .arg("--stdout")
        .arg(launch.stdout)
        .arg("--stderr")
        .arg(launch.stderr)
        .arg("--stack")
        .arg(launch.stack_limit.to_string())
        .arg("--fsize")
        .arg(launch.output_limit.to_string());
    if launch.no_isolate {
        command.arg("--no-isolate");
    }
    command
        .arg(launch.exe)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    command.spawn().map_err(|err| {
        Error::Sandbox(format!(
            "failed to spawn cell {}: {}",
            cell_path.display(),
            err
        ))
    })
}
