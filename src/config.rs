use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crucible_core::compile::Toolchain;

use crate::error::{Error, Result};

/// Process-wide configuration, loaded once at startup. Every section has
/// workable defaults so the service runs from an empty file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub sandbox: SandboxConfig,
    pub compilers: CompilerConfig,
    pub registry: Option<RegistryConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub workers: usize,
    pub queue_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 50052,
            workers: 4,
            queue_size: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub cgroup_prefix: String,
    /// 0 means "same as the worker count".
    pub pool_size: usize,
    /// Bytes of program output kept per case.
    pub max_output_size: u64,
    /// Where per-submission work directories are created.
    pub temp_dir: PathBuf,
    /// Explicit path to the cell binary; defaults to a sibling of the
    /// service executable.
    pub cell_path: Option<PathBuf>,
    /// Run without namespaces and seccomp. Development only.
    pub no_isolate: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            cgroup_prefix: "crucible".into(),
            pool_size: 0,
            max_output_size: 16 * 1024 * 1024,
            temp_dir: "temp".into(),
            cell_path: None,
            no_isolate: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    pub cpp: PathBuf,
    pub python: PathBuf,
    pub java: PathBuf,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            cpp: "/usr/bin/g++".into(),
            python: "/usr/bin/python3".into(),
            java: "/usr/bin/javac".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub url: String,
    #[serde(default = "default_heartbeat_interval")]
    pub interval_secs: u64,
}

fn default_heartbeat_interval() -> u64 {
    5
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|err| Error::Config(format!("failed to read {}: {}", path.display(), err)))?;
        serde_yaml::from_str(&content)
            .map_err(|err| Error::Config(format!("failed to parse {}: {}", path.display(), err)))
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn pool_size(&self) -> usize {
        if self.sandbox.pool_size == 0 {
            self.server.workers
        } else {
            self.sandbox.pool_size
        }
    }

    pub fn toolchain(&self) -> Toolchain {
        Toolchain {
            cpp: self.compilers.cpp.clone(),
            python: self.compilers.python.clone(),
            java: self.compilers.java.clone(),
        }
    }
}
