pub mod cgroup;
pub mod compare;
pub mod compile;
pub mod error;
pub mod monitor;
pub mod pool;
pub mod service;
pub mod workdir;
mod cell;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::compile::Language;
use crate::workdir::WorkDir;

/// Outcome classification for a case or a whole submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JudgeStatus {
    Accepted,
    #[serde(rename = "Wrong Answer")]
    WrongAnswer,
    #[serde(rename = "Presentation Error")]
    PresentationError,
    #[serde(rename = "Time Limit Exceeded")]
    TimeLimitExceeded,
    #[serde(rename = "Memory Limit Exceeded")]
    MemoryLimitExceeded,
    #[serde(rename = "Runtime Error")]
    RuntimeError,
    #[serde(rename = "Compile Error")]
    CompileError,
    #[serde(rename = "System Error")]
    SystemError,
    Pending,
}

impl JudgeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JudgeStatus::Accepted => "Accepted",
            JudgeStatus::WrongAnswer => "Wrong Answer",
            JudgeStatus::PresentationError => "Presentation Error",
            JudgeStatus::TimeLimitExceeded => "Time Limit Exceeded",
            JudgeStatus::MemoryLimitExceeded => "Memory Limit Exceeded",
            JudgeStatus::RuntimeError => "Runtime Error",
            JudgeStatus::CompileError => "Compile Error",
            JudgeStatus::SystemError => "System Error",
            JudgeStatus::Pending => "Pending",
        }
    }
}

/// One submission handed to the worker pipeline. Immutable once built.
#[derive(Debug)]
pub struct JudgeTask {
    pub id: String,
    pub source_code: String,
    pub language: Language,
    /// Wall-clock limit per case, milliseconds.
    pub time_limit: u64,
    /// Memory limit per case, megabytes.
    pub memory_limit: u64,
    pub test_cases: Vec<TestCase>,
    pub work_dir: WorkDir,
}

/// Input and expected output are either inline data or a path to an
/// existing file; see `service::read_inline_or_file`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    pub input: String,
    pub expected_output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseResult {
    pub case_id: String,
    pub status: JudgeStatus,
    /// CPU time if the cgroup reported it, otherwise wall clock. Milliseconds.
    pub time_used: u64,
    /// Peak resident memory, kilobytes.
    pub memory_used: u64,
    pub message: String,
    pub input: String,
    pub output: String,
    pub expected_output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeResult {
    pub status: JudgeStatus,
    pub message: String,
    pub time_used: u64,
    pub memory_used: u64,
    pub compile_log: String,
    pub case_results: Vec<CaseResult>,
}

impl JudgeResult {
    pub fn system_error(message: String) -> Self {
        JudgeResult {
            status: JudgeStatus::SystemError,
            message,
            time_used: 0,
            memory_used: 0,
            compile_log: String::new(),
            case_results: Vec::new(),
        }
    }
}

/// Cooperative cancellation flag shared between the submitter and the
/// worker currently running the submission.
#[derive(Debug, Default)]
pub struct CancelToken(AtomicBool);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Shorten `s` to at most `limit` bytes, marking the cut with an ellipsis.
/// Never splits a UTF-8 code point.
pub fn clip(s: &str, limit: usize) -> String {
    if s.len() <= limit {
        return s.to_string();
    }
    let mut end = limit;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

pub(crate) fn default_cell_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("crucible_cell")))
        .unwrap_or_else(|| PathBuf::from("crucible_cell"))
}
