//! End-to-end scenarios against the real sandbox. These compile and run
//! actual programs inside cgroups and namespaces, so they are ignored by
//! default: run them as root on a cgroup-v2 host with g++ installed,
//! after `cargo build --workspace`.
//!
//!     sudo -E cargo test --test judge_e2e -- --ignored

use std::path::PathBuf;
use std::sync::Arc;

use crucible_core::compile::{Language, Toolchain};
use crucible_core::monitor::SandboxRunner;
use crucible_core::pool::ContainerPool;
use crucible_core::service::judge_submission;
use crucible_core::workdir::WorkDir;
use crucible_core::{CancelToken, JudgeResult, JudgeStatus, JudgeTask, TestCase};

fn cell_path() -> PathBuf {
    // test executables live in target/<profile>/deps
    let mut path = std::env::current_exe().unwrap();
    path.pop();
    path.pop();
    path.join("crucible_cell")
}

fn toolchain() -> Toolchain {
    Toolchain {
        cpp: "/usr/bin/g++".into(),
        python: "/usr/bin/python3".into(),
        java: "/usr/bin/javac".into(),
    }
}

fn judge_one(
    id: &str,
    language: Language,
    source: &str,
    input: &str,
    expected: &str,
    time_limit: u64,
    memory_limit: u64,
) -> JudgeResult {
    let pool = Arc::new(ContainerPool::new(1, &format!("crucible_test_{}", id)).unwrap());
    let runner = SandboxRunner::new(pool.clone(), cell_path(), 16 * 1024 * 1024);

    let base = std::env::temp_dir();
    let work_dir = WorkDir::create(&base, &format!("crucible_e2e_{}", id)).unwrap();
    let task = JudgeTask {
        id: id.into(),
        source_code: source.into(),
        language,
        time_limit,
        memory_limit,
        test_cases: vec![TestCase {
            id: "1".into(),
            input: input.into(),
            expected_output: expected.into(),
        }],
        work_dir,
    };

    let result = judge_submission(&runner, &toolchain(), &task, &CancelToken::new());
    pool.shutdown();
    result
}

#[test]
#[ignore = "requires root, cgroup v2 and g++"]
fn sum_program_is_accepted() {
    let source = r#"
#include <iostream>
int main() { int a, b; std::cin >> a >> b; std::cout << a + b; }
"#;
    let result = judge_one("ac", Language::Cpp, source, "1 2", "3", 1000, 128);
    assert_eq!(result.status, JudgeStatus::Accepted);
    assert!(result.time_used <= 1000);
    assert!(result.memory_used > 0);
}

#[test]
#[ignore = "requires root, cgroup v2 and g++"]
fn off_by_one_is_wrong_answer() {
    let source = r#"
#include <iostream>
int main() { int a, b; std::cin >> a >> b; std::cout << a + b + 1; }
"#;
    let result = judge_one("wa", Language::Cpp, source, "1 2", "3", 1000, 128);
    assert_eq!(result.status, JudgeStatus::WrongAnswer);
}

#[test]
#[ignore = "requires root, cgroup v2 and g++"]
fn collapsed_layout_is_presentation_error() {
    let source = r#"
#include <iostream>
int main() { std::cout << "1 2"; }
"#;
    let result = judge_one("pe", Language::Cpp, source, "", "1\n2", 1000, 128);
    assert_eq!(result.status, JudgeStatus::PresentationError);
}

#[test]
#[ignore = "requires root, cgroup v2 and g++"]
fn infinite_loop_ends_within_bounds() {
    let source = r#"
#include <iostream>
int main() { for (;;) std::cout << 1; }
"#;
    let started = std::time::Instant::now();
    let result = judge_one("tle", Language::Cpp, source, "", "x", 1000, 128);
    // output or time may run out first, but the run must stop promptly
    assert!(matches!(
        result.status,
        JudgeStatus::TimeLimitExceeded | JudgeStatus::MemoryLimitExceeded | JudgeStatus::RuntimeError
    ));
    // generous bound: includes compilation, the run itself must die at ~1s
    assert!(started.elapsed().as_secs() < 10);
    assert!(result.time_used <= 1500);
}

#[test]
#[ignore = "requires root, cgroup v2 and g++"]
fn unbounded_allocation_is_mle() {
    let source = r#"
#include <vector>
int main() { std::vector<int> v; for (;;) v.push_back(1); }
"#;
    let result = judge_one("mle", Language::Cpp, source, "", "x", 2000, 128);
    assert_eq!(result.status, JudgeStatus::MemoryLimitExceeded);
}

#[test]
#[ignore = "requires root, cgroup v2 and g++"]
fn division_by_zero_is_runtime_error() {
    let source = r#"
#include <iostream>
int main() { int z = 0; std::cout << 1 / z; }
"#;
    let result = judge_one("re", Language::Cpp, source, "", "x", 1000, 128);
    assert_eq!(result.status, JudgeStatus::RuntimeError);
}

#[test]
#[ignore = "requires root, cgroup v2 and a python3 interpreter"]
fn python_sum_is_accepted() {
    let source = "a,b=map(int,input().split())\nprint(a+b)\n";
    let result = judge_one("py", Language::Python, source, "1 2", "3", 3000, 512);
    assert_eq!(result.status, JudgeStatus::Accepted);
}

#[test]
#[ignore = "requires root, cgroup v2 and a JDK"]
fn java_sum_is_accepted() {
    let source = r#"
import java.util.Scanner;
public class Main {
    public static void main(String[] args) {
        Scanner in = new Scanner(System.in);
        System.out.println(in.nextInt() + in.nextInt());
    }
}
"#;
    let result = judge_one("java", Language::Java, source, "1 2", "3", 3000, 512);
    assert_eq!(result.status, JudgeStatus::Accepted);
}

#[test]
#[ignore = "requires root, cgroup v2 and g++"]
fn broken_source_is_compile_error() {
    let result = judge_one("ce", Language::Cpp, "int main( {", "", "x", 1000, 128);
    assert_eq!(result.status, JudgeStatus::CompileError);
    assert!(!result.compile_log.is_empty());
    assert!(result.case_results.is_empty());
}
