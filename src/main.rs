use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::{error, warn};

use crucible::config::Config;
use crucible::registry;
use crucible::server::{self, AppState};
use crucible_core::compile::{self, Language, ToolStatus};
use crucible_core::monitor::SandboxRunner;
use crucible_core::pool::ContainerPool;
use crucible_core::service::{self, JudgeService};
use crucible_core::workdir::WorkDir;
use crucible_core::{CancelToken, JudgeTask, TestCase};

#[derive(Parser)]
#[command(
    version,
    name = "crucible",
    about = "A fast and reliable online judge execution engine."
)]
struct Opts {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run the judge service
    Serve {
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// Compile one source file and judge it against one test case
    Judge {
        source: PathBuf,
        #[arg(short, long, help = "input file")]
        input: PathBuf,
        #[arg(short, long, help = "expected output file")]
        answer: PathBuf,
        #[arg(short = 'm', long, default_value_t = 256, help = "memory limit (MB)")]
        memory_limit: u64,
        #[arg(short = 't', long, default_value_t = 1000, help = "time limit (ms)")]
        time_limit: u64,
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// Probe the cgroup hierarchy and the configured toolchain
    Check {
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

#[actix_web::main]
async fn main() {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
    let opts = Opts::parse();

    match opts.command {
        Cmd::Serve { config } => serve(config).await,
        Cmd::Judge {
            source,
            input,
            answer,
            memory_limit,
            time_limit,
            config,
        } => judge_once(source, input, answer, memory_limit, time_limit, config),
        Cmd::Check { config } => check(config),
    }
}

fn load_config(path: Option<PathBuf>) -> Config {
    match Config::load_or_default(path.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            error!("{}", err);
            process::exit(1);
        }
    }
}

async fn serve(config_path: Option<PathBuf>) {
    let config = load_config(config_path);

    let pool = match ContainerPool::new(config.pool_size(), &config.sandbox.cgroup_prefix) {
        Ok(pool) => Arc::new(pool),
        Err(err) => {
            error!("failed to initialise container pool: {}", err);
            process::exit(1);
        }
    };

    let runner = build_runner(&config, pool.clone());
    let service = Arc::new(JudgeService::new(
        config.server.workers,
        config.server.queue_size,
        pool,
        runner,
        config.toolchain(),
    ));

    let heartbeat = config
        .registry
        .clone()
        .map(|reg| registry::start(reg, format!("0.0.0.0:{}", config.server.port)));

    let state = AppState {
        service: service.clone(),
        temp_dir: config.sandbox.temp_dir.clone(),
    };
    if let Err(err) = server::run(config.server.port, state).await {
        error!("server failed: {}", err);
        process::exit(1);
    }

    if let Some(heartbeat) = heartbeat {
        heartbeat.stop();
    }
    match Arc::try_unwrap(service) {
        Ok(service) => service.shutdown(),
        Err(_) => warn!("judge service still referenced at exit, skipping teardown"),
    }
}

fn build_runner(config: &Config, pool: Arc<ContainerPool>) -> SandboxRunner {
    let cell = service::locate_cell(config.sandbox.cell_path.as_deref());
    let runner = SandboxRunner::new(pool, cell, config.sandbox.max_output_size);
    if config.sandbox.no_isolate {
        runner.without_isolation()
    } else {
        runner
    }
}

fn judge_once(
    source: PathBuf,
    input: PathBuf,
    answer: PathBuf,
    memory_limit: u64,
    time_limit: u64,
    config_path: Option<PathBuf>,
) {
    let config = load_config(config_path);

    let extension = source.extension().and_then(|e| e.to_str()).unwrap_or("");
    let language = match Language::from_extension(extension) {
        Some(language) => language,
        None => {
            error!("cannot infer a language from {}", source.display());
            process::exit(1);
        }
    };
    let source_code = match fs::read_to_string(&source) {
        Ok(code) => code,
        Err(err) => {
            error!("failed to read {}: {}", source.display(), err);
            process::exit(1);
        }
    };

    let pool = match ContainerPool::new(1, &format!("{}_cli", config.sandbox.cgroup_prefix)) {
        Ok(pool) => Arc::new(pool),
        Err(err) => {
            error!("failed to initialise container pool: {}", err);
            process::exit(1);
        }
    };
    let runner = build_runner(&config, pool.clone());

    let work_dir = match WorkDir::create(&config.sandbox.temp_dir, &format!("cli_{}", process::id()))
    {
        Ok(dir) => dir,
        Err(err) => {
            error!("failed to create work dir: {}", err);
            process::exit(1);
        }
    };

    let task = JudgeTask {
        id: "cli".into(),
        source_code,
        language,
        time_limit,
        memory_limit,
        test_cases: vec![TestCase {
            id: "1".into(),
            input: input.display().to_string(),
            expected_output: answer.display().to_string(),
        }],
        work_dir,
    };

    let result = service::judge_submission(&runner, &config.toolchain(), &task, &CancelToken::new());
    println!("{:#?}", result);
    pool.shutdown();
}

fn check(config_path: Option<PathBuf>) {
    let config = load_config(config_path);

    let cgroup_ready = Path::new("/sys/fs/cgroup/cgroup.controllers").exists();
    println!(
        "cgroup v2: {}",
        if cgroup_ready { "mounted" } else { "NOT mounted" }
    );

    let probes = [
        ("c++ compiler", &config.compilers.cpp, "--version"),
        ("python interpreter", &config.compilers.python, "--version"),
        ("java compiler", &config.compilers.java, "-version"),
    ];
    for (label, tool, version_arg) in probes {
        match compile::probe(tool, version_arg) {
            ToolStatus::Ok { version, path } => {
                println!("{}: {} ({})", label, version, path.display())
            }
            ToolStatus::Missing => println!("{}: MISSING ({})", label, tool.display()),
        }
    }

    let cell = service::locate_cell(config.sandbox.cell_path.as_deref());
    println!(
        "cell: {}",
        if cell.exists() {
            format!("{}", cell.display())
        } else {
            format!("NOT found at {}", cell.display())
        }
    );
}
