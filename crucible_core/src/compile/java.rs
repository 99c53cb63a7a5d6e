use std::fs;
use std::path::Path;
use std::process::Command;

use crate::error::Result;

use super::{run_bounded, write_wrapper, CompileResult, CompiledProgram};

pub fn compile(javac: &Path, source: &str, work_dir: &Path) -> Result<CompileResult> {
    let src_path = work_dir.join("Main.java");
    fs::write(&src_path, source)?;

    let mut command = Command::new(javac);
    command
        .arg("-encoding")
        .arg("UTF-8")
        .arg("Main.java")
        .current_dir(work_dir);

    let run = run_bounded(command, &work_dir.join("compile.log"))?;
    if run.timed_out {
        return Ok(CompileResult::TimedOut);
    }
    if !run.success {
        return Ok(CompileResult::Error { log: run.log });
    }

    let java = java_runtime_for(javac);
    let wrapper = write_wrapper(
        work_dir,
        &format!("{} -cp \"{}\" Main", java.display(), work_dir.display()),
    )?;
    Ok(CompileResult::Ok(CompiledProgram {
        path: wrapper,
        log: String::new(),
    }))
}

/// The launcher lives next to the compiler in every JDK layout; fall
/// back to the usual system path otherwise.
fn java_runtime_for(javac: &Path) -> std::path::PathBuf {
    match javac.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => {
            let java = dir.join("java");
            if java.exists() {
                java
            } else {
                "/usr/bin/java".into()
            }
        }
        _ => "/usr/bin/java".into(),
    }
}
