use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Sender, TrySendError};
use log::{debug, info, warn};

use crate::compare::{self, Comparison};
use crate::compile::{CompileResult, CompiledProgram, Toolchain};
use crate::error::{Error, Result};
use crate::monitor::SandboxRunner;
use crate::pool::ContainerPool;
use crate::{clip, CancelToken, CaseResult, JudgeResult, JudgeStatus, JudgeTask, TestCase};

struct QueuedJob {
    task: JudgeTask,
    reply: SyncSender<JudgeResult>,
    cancel: Arc<CancelToken>,
}

/// Bounded queue plus a fixed set of workers. Each worker judges one
/// submission at a time, start to finish; the pool's capacity equals the
/// worker count so a worker never waits on a container held by another
/// whole submission.
pub struct JudgeService {
    queue: Sender<QueuedJob>,
    workers: Vec<JoinHandle<()>>,
    pool: Arc<ContainerPool>,
}

impl JudgeService {
    pub fn new(
        workers: usize,
        queue_size: usize,
        pool: Arc<ContainerPool>,
        runner: SandboxRunner,
        toolchain: Toolchain,
    ) -> Self {
        let (queue, jobs) = bounded::<QueuedJob>(queue_size);
        let runner = Arc::new(runner);

        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let jobs = jobs.clone();
            let runner = runner.clone();
            let toolchain = toolchain.clone();
            handles.push(thread::spawn(move || {
                while let Ok(job) = jobs.recv() {
                    debug!("worker {} picked up submission {}", id, job.task.id);
                    let result = judge_submission(&runner, &toolchain, &job.task, &job.cancel);
                    if job.reply.try_send(result).is_err() {
                        warn!(
                            "submission {}: submitter is gone, result dropped",
                            job.task.id
                        );
                    }
                }
                debug!("worker {} stopped", id);
            }));
        }

        Self {
            queue,
            workers: handles,
            pool,
        }
    }

    /// Enqueue a submission. Returns immediately: the receiver end will
    /// carry the full result, the token cancels the run if the submitter
    /// stops caring.
    pub fn submit(&self, task: JudgeTask) -> Result<(Receiver<JudgeResult>, Arc<CancelToken>)> {
        let (reply, result_rx) = sync_channel(1);
        let cancel = Arc::new(CancelToken::new());
        let job = QueuedJob {
            task,
            reply,
            cancel: cancel.clone(),
        };
        self.queue.try_send(job).map_err(|err| match err {
            TrySendError::Full(_) => Error::Busy,
            TrySendError::Disconnected(_) => Error::Sandbox("judge service is shut down".into()),
        })?;
        Ok((result_rx, cancel))
    }

    /// Stop accepting work, let workers drain their current submissions,
    /// then tear the container pool down.
    pub fn shutdown(self) {
        info!("judge service shutting down");
        drop(self.queue);
        for handle in self.workers {
            let _ = handle.join();
        }
        self.pool.shutdown();
    }
}

/// Judge one submission: compile once, then run every test case in
/// order. Cases never short-circuit the batch, except when the submitter
/// cancelled and nobody is left to read the remaining results.
pub fn judge_submission(
    runner: &SandboxRunner,
    toolchain: &Toolchain,
    task: &JudgeTask,
    cancel: &CancelToken,
) -> JudgeResult {
    let mut result = JudgeResult {
        status: JudgeStatus::Accepted,
        message: String::new(),
        time_used: 0,
        memory_used: 0,
        compile_log: String::new(),
        case_results: Vec::with_capacity(task.test_cases.len()),
    };

    let program = match task
        .language
        .compile(toolchain, &task.source_code, task.work_dir.path())
    {
        Ok(CompileResult::Ok(program)) => {
            result.compile_log = program.log.clone();
            program
        }
        Ok(CompileResult::Error { log }) => {
            result.status = JudgeStatus::CompileError;
            result.message = "compilation failed".into();
            result.compile_log = log;
            return result;
        }
        Ok(CompileResult::TimedOut) => {
            result.status = JudgeStatus::CompileError;
            result.message = "Compilation Time Limit Exceeded".into();
            result.compile_log = "Compilation Time Limit Exceeded".into();
            return result;
        }
        Err(err) => {
            result.status = JudgeStatus::SystemError;
            result.message = err.to_string();
            return result;
        }
    };

    for case in &task.test_cases {
        let case_result = run_case(runner, task, &program, case, cancel);
        fold_case(&mut result, &case_result);
        result.case_results.push(case_result);

        if cancel.is_canceled() {
            warn!("submission {}: canceled, skipping remaining cases", task.id);
            break;
        }
    }

    result
}

/// Submission-level aggregation: maxima over time and memory, overall
/// verdict is the first non-Accepted case verdict.
fn fold_case(result: &mut JudgeResult, case: &CaseResult) {
    result.time_used = result.time_used.max(case.time_used);
    result.memory_used = result.memory_used.max(case.memory_used);
    if case.status != JudgeStatus::Accepted && result.status == JudgeStatus::Accepted {
        result.status = case.status;
        result.message = case.message.clone();
    }
}

fn run_case(
    runner: &SandboxRunner,
    task: &JudgeTask,
    program: &CompiledProgram,
    case: &TestCase,
    cancel: &CancelToken,
) -> CaseResult {
    let input = match read_inline_or_file(&case.input) {
        Ok(input) => input,
        Err(err) => {
            return error_case(case, format!("failed to read input: {}", err));
        }
    };
    let expected = match read_inline_or_file(&case.expected_output) {
        Ok(expected) => expected,
        Err(err) => {
            return error_case(case, format!("failed to read expected output: {}", err));
        }
    };

    let execution = match runner.run(
        &program.path,
        &input,
        task.time_limit,
        task.memory_limit,
        cancel,
    ) {
        Ok(execution) => execution,
        Err(err) => {
            return error_case(case, err.to_string());
        }
    };

    let mut case_result = CaseResult {
        case_id: case.id.clone(),
        status: execution.status,
        time_used: execution.time_ms,
        memory_used: execution.memory_kb,
        message: execution.message,
        input: clip(&input, 200),
        output: clip(&execution.stdout, 200),
        expected_output: clip(&expected, 200),
    };

    match execution.status {
        JudgeStatus::Accepted => match compare::compare(&execution.stdout, &expected) {
            Comparison::Same => {
                case_result.message = "OK".into();
            }
            Comparison::PatternDifferent => {
                case_result.status = JudgeStatus::PresentationError;
                case_result.message = "Format mismatch".into();
            }
            Comparison::Different => {
                case_result.status = JudgeStatus::WrongAnswer;
                case_result.message = compare::describe_difference(&expected, &execution.stdout);
            }
        },
        JudgeStatus::RuntimeError => {
            case_result.message =
                format!("Runtime Error\nStderr: {}", clip(&execution.stderr, 500));
        }
        JudgeStatus::MemoryLimitExceeded => {
            case_result.message = "Memory Limit Exceeded".into();
        }
        _ => {}
    }

    case_result
}

fn error_case(case: &TestCase, message: String) -> CaseResult {
    CaseResult {
        case_id: case.id.clone(),
        status: JudgeStatus::SystemError,
        time_used: 0,
        memory_used: 0,
        message,
        input: String::new(),
        output: String::new(),
        expected_output: String::new(),
    }
}

/// A test-case field naming an existing file is read from disk,
/// otherwise it is inline data.
fn read_inline_or_file(value: &str) -> Result<String> {
    let path = Path::new(value);
    if path.exists() {
        let bytes = fs::read(path)?;
        return Ok(String::from_utf8_lossy(&bytes).into_owned());
    }
    Ok(value.to_string())
}

/// Look for the cell binary next to the running executable, the default
/// deployment layout.
pub fn locate_cell(configured: Option<&Path>) -> PathBuf {
    match configured {
        Some(path) => path.to_path_buf(),
        None => crate::default_cell_path(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(status: JudgeStatus, time: u64, memory: u64, message: &str) -> CaseResult {
        CaseResult {
            case_id: "c".into(),
            status,
            time_used: time,
            memory_used: memory,
            message: message.into(),
            input: String::new(),
            output: String::new(),
            expected_output: String::new(),
        }
    }

    fn empty_result() -> JudgeResult {
        JudgeResult {
            status: JudgeStatus::Accepted,
            message: String::new(),
            time_used: 0,
            memory_used: 0,
            compile_log: String::new(),
            case_results: Vec::new(),
        }
    }

    #[test]
    fn fold_takes_maxima() {
        let mut result = empty_result();
        fold_case(&mut result, &case(JudgeStatus::Accepted, 120, 4000, "OK"));
        fold_case(&mut result, &case(JudgeStatus::Accepted, 80, 9000, "OK"));
        assert_eq!(result.time_used, 120);
        assert_eq!(result.memory_used, 9000);
        assert_eq!(result.status, JudgeStatus::Accepted);
    }

    #[test]
    fn first_non_accepted_verdict_wins() {
        let mut result = empty_result();
        fold_case(&mut result, &case(JudgeStatus::Accepted, 10, 10, "OK"));
        fold_case(&mut result, &case(JudgeStatus::WrongAnswer, 10, 10, "diff"));
        fold_case(&mut result, &case(JudgeStatus::TimeLimitExceeded, 10, 10, ""));
        assert_eq!(result.status, JudgeStatus::WrongAnswer);
        assert_eq!(result.message, "diff");
    }

    #[test]
    fn system_error_does_not_displace_earlier_verdict() {
        let mut result = empty_result();
        fold_case(&mut result, &case(JudgeStatus::WrongAnswer, 10, 10, "diff"));
        fold_case(&mut result, &case(JudgeStatus::SystemError, 10, 10, "io"));
        assert_eq!(result.status, JudgeStatus::WrongAnswer);
    }

    #[test]
    fn system_error_reported_when_first() {
        let mut result = empty_result();
        fold_case(&mut result, &case(JudgeStatus::SystemError, 10, 10, "io"));
        fold_case(&mut result, &case(JudgeStatus::WrongAnswer, 10, 10, "diff"));
        assert_eq!(result.status, JudgeStatus::SystemError);
    }

    #[test]
    fn inline_data_passes_through() {
        assert_eq!(read_inline_or_file("1 2").unwrap(), "1 2");
    }

    #[test]
    fn existing_path_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("1.in");
        fs::write(&file, "3 4\n").unwrap();
        assert_eq!(
            read_inline_or_file(file.to_str().unwrap()).unwrap(),
            "3 4\n"
        );
    }

    #[test]
    fn locate_cell_prefers_configuration() {
        let path = locate_cell(Some(Path::new("/opt/judge/cell")));
        assert_eq!(path, PathBuf::from("/opt/judge/cell"));
    }
}
