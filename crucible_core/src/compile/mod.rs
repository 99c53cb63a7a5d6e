pub mod cpp;
pub mod java;
pub mod python;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const COMPILE_TIME_LIMIT: Duration = Duration::from_secs(10);

/// Languages the judge accepts. Dispatch is a closed set on purpose:
/// adding a language means adding a driver module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Cpp,
    Python,
    Java,
}

impl Language {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "cpp" | "c++" => Some(Language::Cpp),
            "python" | "py" => Some(Language::Python),
            "java" => Some(Language::Java),
            _ => None,
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "cpp" | "cc" | "cxx" => Some(Language::Cpp),
            "py" => Some(Language::Python),
            "java" => Some(Language::Java),
            _ => None,
        }
    }

    /// File name the source is written under, by language convention.
    pub fn source_file_name(&self) -> &'static str {
        match self {
            Language::Cpp => "main.cpp",
            Language::Python => "main.py",
            Language::Java => "Main.java",
        }
    }

    /// Produce one executable artifact in `work_dir`. For interpreted and
    /// VM languages the artifact is an exec wrapper script, which keeps
    /// the launcher uniform over a single exec target.
    pub fn compile(
        &self,
        toolchain: &Toolchain,
        source: &str,
        work_dir: &Path,
    ) -> Result<CompileResult> {
        match self {
            Language::Cpp => cpp::compile(&toolchain.cpp, source, work_dir),
            Language::Python => python::compile(&toolchain.python, source, work_dir),
            Language::Java => java::compile(&toolchain.java, source, work_dir),
        }
    }

}

/// Configured compiler and interpreter paths.
#[derive(Debug, Clone)]
pub struct Toolchain {
    pub cpp: PathBuf,
    pub python: PathBuf,
    pub java: PathBuf,
}

#[derive(Debug)]
pub struct CompiledProgram {
    pub path: PathBuf,
    pub log: String,
}

#[derive(Debug)]
pub enum CompileResult {
    Ok(CompiledProgram),
    /// The compiler rejected the source; `log` carries its stderr.
    Error { log: String },
    TimedOut,
}

#[derive(Debug)]
pub enum ToolStatus {
    Ok { version: String, path: PathBuf },
    Missing,
}

/// Check that a configured tool exists and answers a version query.
/// Bare names are resolved through PATH.
pub fn probe(tool: &Path, version_arg: &str) -> ToolStatus {
    let resolved = if tool.is_absolute() {
        if tool.exists() {
            tool.to_path_buf()
        } else {
            return ToolStatus::Missing;
        }
    } else {
        match which::which(tool) {
            Ok(path) => path,
            Err(_) => return ToolStatus::Missing,
        }
    };

    let output = match Command::new(&resolved)
        .arg(version_arg)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
    {
        Ok(output) => output,
        Err(_) => return ToolStatus::Missing,
    };

    // javac prints its version on stderr
    let text = if output.stdout.is_empty() {
        String::from_utf8_lossy(&output.stderr).into_owned()
    } else {
        String::from_utf8_lossy(&output.stdout).into_owned()
    };
    let version = text.lines().next().unwrap_or("").trim().to_string();
    ToolStatus::Ok {
        version,
        path: resolved,
    }
}

/// Run a compiler with its stderr captured to `log_path`, bounded by the
/// compile wall clock. Returns the raw exit success and the log text.
pub(crate) fn run_bounded(mut command: Command, log_path: &Path) -> Result<BoundedRun> {
    let log_file = fs::File::create(log_path)?;
    command.stdout(Stdio::null()).stderr(log_file);

    let mut child = command.spawn().map_err(|err| {
        Error::Compile(format!("failed to spawn compiler: {}", err))
    })?;

    let timed_out = !wait_with_deadline(&mut child, COMPILE_TIME_LIMIT)?;
    let status = child.wait()?;
    let log = fs::read_to_string(log_path).unwrap_or_default();
    let _ = fs::remove_file(log_path);

    Ok(BoundedRun {
        success: status.success(),
        timed_out,
        log,
    })
}

pub(crate) struct BoundedRun {
    pub success: bool,
    pub timed_out: bool,
    pub log: String,
}

/// Returns false if the deadline passed and the child had to be killed.
fn wait_with_deadline(child: &mut Child, deadline: Duration) -> Result<bool> {
    let started = Instant::now();
    loop {
        if child.try_wait()?.is_some() {
            return Ok(true);
        }
        if started.elapsed() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(false);
        }
        thread::sleep(Duration::from_millis(10));
    }
}

/// Write an exec wrapper so the sandbox can treat interpreted programs
/// as a single exec target.
pub(crate) fn write_wrapper(work_dir: &Path, command_line: &str) -> Result<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    let path = work_dir.join("run.sh");
    fs::write(&path, format!("#!/bin/sh\nexec {}\n", command_line))?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_tags_parse() {
        assert_eq!(Language::from_tag("cpp"), Some(Language::Cpp));
        assert_eq!(Language::from_tag("python"), Some(Language::Python));
        assert_eq!(Language::from_tag("java"), Some(Language::Java));
        assert_eq!(Language::from_tag("brainfuck"), None);
    }

    #[test]
    fn source_names_follow_convention() {
        assert_eq!(Language::Cpp.source_file_name(), "main.cpp");
        assert_eq!(Language::Python.source_file_name(), "main.py");
        assert_eq!(Language::Java.source_file_name(), "Main.java");
    }

    #[test]
    fn wrapper_is_executable_exec_script() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = write_wrapper(dir.path(), "/usr/bin/python3 /work/main.py").unwrap();
        let body = fs::read_to_string(&path).unwrap();
        assert_eq!(body, "#!/bin/sh\nexec /usr/bin/python3 /work/main.py\n");
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn probe_missing_tool() {
        assert!(matches!(
            probe(Path::new("/nonexistent/compiler"), "--version"),
            ToolStatus::Missing
        ));
    }

    #[test]
    fn probe_finds_sh() {
        match probe(Path::new("/bin/sh"), "--version") {
            ToolStatus::Ok { path, .. } => assert_eq!(path, PathBuf::from("/bin/sh")),
            ToolStatus::Missing => panic!("/bin/sh should exist"),
        }
    }
}
