use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::Command;

use crate::error::Result;

use super::{run_bounded, CompileResult, CompiledProgram};

pub fn compile(compiler: &Path, source: &str, work_dir: &Path) -> Result<CompileResult> {
    let src_path = work_dir.join("main.cpp");
    let exe_path = work_dir.join("main");

    fs::write(&src_path, source)?;
    fs::set_permissions(&src_path, fs::Permissions::from_mode(0o666))?;

    let mut command = Command::new(compiler);
    command
        .arg(&src_path)
        .arg("-o")
        .arg(&exe_path)
        .args(["-O2", "-Wall", "-std=c++17"]);

    let run = run_bounded(command, &work_dir.join("compile.log"))?;
    if run.timed_out {
        return Ok(CompileResult::TimedOut);
    }
    if !run.success {
        return Ok(CompileResult::Error { log: run.log });
    }

    Ok(CompileResult::Ok(CompiledProgram {
        path: exe_path,
        // warnings still end up in the log of a successful build
        log: run.log,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::CompileResult;

    fn gpp() -> Option<std::path::PathBuf> {
        which::which("g++").ok()
    }

    #[test]
    fn rejects_broken_source() {
        let Some(gpp) = gpp() else { return };
        let dir = tempfile::tempdir().unwrap();
        let result = compile(&gpp, "int main() { this does not parse", dir.path()).unwrap();
        match result {
            CompileResult::Error { log } => assert!(!log.is_empty()),
            other => panic!("expected a compile error, got {:?}", other),
        }
    }

    #[test]
    fn builds_valid_source() {
        let Some(gpp) = gpp() else { return };
        let dir = tempfile::tempdir().unwrap();
        let source = "#include <iostream>\nint main(){int a,b;std::cin>>a>>b;std::cout<<a+b;}";
        let result = compile(&gpp, source, dir.path()).unwrap();
        match result {
            CompileResult::Ok(program) => assert!(program.path.exists()),
            other => panic!("expected success, got {:?}", other),
        }
    }
}
