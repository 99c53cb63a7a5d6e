use std::fs;
use std::path::Path;
use std::process::Command;

use crate::error::Result;

use super::{run_bounded, write_wrapper, CompileResult, CompiledProgram};

/// Python has no build step; this runs a syntax check so broken sources
/// surface as Compile Error instead of a runtime failure on every case.
pub fn compile(interpreter: &Path, source: &str, work_dir: &Path) -> Result<CompileResult> {
    let src_path = work_dir.join("main.py");
    fs::write(&src_path, source)?;

    let mut command = Command::new(interpreter);
    command.arg("-m").arg("py_compile").arg(&src_path);

    let run = run_bounded(command, &work_dir.join("compile.log"))?;
    if run.timed_out {
        return Ok(CompileResult::TimedOut);
    }
    if !run.success {
        return Ok(CompileResult::Error { log: run.log });
    }

    let wrapper = write_wrapper(
        work_dir,
        &format!("{} {}", interpreter.display(), src_path.display()),
    )?;
    Ok(CompileResult::Ok(CompiledProgram {
        path: wrapper,
        log: String::new(),
    }))
}
