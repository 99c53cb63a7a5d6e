//! The cell is the last judge-owned code that runs before an untrusted
//! program. It moves itself into fresh namespaces, redirects stdio to
//! files, applies rlimits, strips the environment, installs a
//! default-deny seccomp filter and execs the target. Seccomp has to be
//! installed here, in the process that will exec: a parent cannot inject
//! a filter into a running child.

use std::ffi::CString;
use std::path::Path;
use std::process::exit;

use clap::{Arg, ArgAction, Command};
use libc::*;
use seccomp_sys::*;

/// Exit code for failures before exec; the monitor reports these as
/// system errors instead of blaming the submission.
const SETUP_FAILURE_EXIT: i32 = 203;

fn main() {
    let matches = Command::new("crucible_cell")
        .version("0.3.0")
        .about("Confines one program with namespaces, rlimits and seccomp, then execs it")
        .arg(Arg::new("stdin").long("stdin").value_name("PATH").required(true))
        .arg(Arg::new("stdout").long("stdout").value_name("PATH").required(true))
        .arg(Arg::new("stderr").long("stderr").value_name("PATH").required(true))
        .arg(
            Arg::new("stack")
                .long("stack")
                .value_name("BYTES")
                .value_parser(clap::value_parser!(u64))
                .help("stack size cap"),
        )
        .arg(
            Arg::new("fsize")
                .long("fsize")
                .value_name("BYTES")
                .value_parser(clap::value_parser!(u64))
                .help("output file size cap"),
        )
        .arg(
            Arg::new("nofile")
                .long("nofile")
                .value_name("COUNT")
                .value_parser(clap::value_parser!(u64))
                .default_value("64"),
        )
        .arg(
            Arg::new("nproc")
                .long("nproc")
                .value_name("COUNT")
                .value_parser(clap::value_parser!(u64))
                .default_value("64"),
        )
        .arg(
            Arg::new("no-isolate")
                .long("no-isolate")
                .action(ArgAction::SetTrue)
                .help("skip namespaces and seccomp (development only)"),
        )
        .arg(Arg::new("exe").value_name("EXE").required(true))
        .arg(Arg::new("args").value_name("ARGS").num_args(0..).trailing_var_arg(true))
        .get_matches();

    let exe = matches.get_one::<String>("exe").expect("exe is required");
    let args: Vec<&String> = matches
        .get_many::<String>("args")
        .map(|values| values.collect())
        .unwrap_or_default();
    let no_isolate = matches.get_flag("no-isolate");

    if !Path::new(exe).exists() {
        die(&format!("target {} does not exist", exe));
    }

    if no_isolate {
        eprintln!("cell: running without namespaces or seccomp");
    } else {
        unshare_namespaces();
    }

    redirect(matches.get_one::<String>("stdin").unwrap(), STDIN_FILENO, false);
    redirect(matches.get_one::<String>("stdout").unwrap(), STDOUT_FILENO, true);
    redirect(matches.get_one::<String>("stderr").unwrap(), STDERR_FILENO, true);

    if let Some(stack) = matches.get_one::<u64>("stack") {
        set_rlimit(RLIMIT_STACK, *stack);
    }
    if let Some(fsize) = matches.get_one::<u64>("fsize") {
        set_rlimit(RLIMIT_FSIZE, *fsize);
    }
    set_rlimit(RLIMIT_NOFILE, *matches.get_one::<u64>("nofile").unwrap());
    set_rlimit(RLIMIT_NPROC, *matches.get_one::<u64>("nproc").unwrap());

    // execve arguments, NUL-terminated
    let exe_c = match CString::new(exe.as_str()) {
        Ok(c) => c,
        Err(_) => die("target path contains NUL"),
    };
    let mut arg_strings = vec![exe_c.clone()];
    for arg in args {
        match CString::new(arg.as_str()) {
            Ok(c) => arg_strings.push(c),
            Err(_) => die("argument contains NUL"),
        }
    }
    let mut argv: Vec<*const c_char> = arg_strings.iter().map(|c| c.as_ptr()).collect();
    argv.push(std::ptr::null());

    // minimal environment for the target
    let env_strings = [
        CString::new("PATH=/bin:/usr/bin").unwrap(),
        CString::new("HOME=/").unwrap(),
    ];
    let mut envp: Vec<*const c_char> = env_strings.iter().map(|c| c.as_ptr()).collect();
    envp.push(std::ptr::null());

    if !no_isolate {
        install_seccomp();
    }

    unsafe {
        execve(exe_c.as_ptr(), argv.as_ptr(), envp.as_ptr());
    }
    die("execve failed");
}

fn die(reason: &str) -> ! {
    eprintln!("cell: {}: {}", reason, std::io::Error::last_os_error());
    exit(SETUP_FAILURE_EXIT);
}

/// Fresh UTS, PID, mount, network and IPC namespaces. No user namespace:
/// the judge runs privileged and uid mapping would break file access in
/// the work directory.
fn unshare_namespaces() {
    let flags = CLONE_NEWUTS | CLONE_NEWPID | CLONE_NEWNS | CLONE_NEWNET | CLONE_NEWIPC;
    if unsafe { unshare(flags) } != 0 {
        die("unshare failed (root required)");
    }
}

fn redirect(path: &str, stdio_fd: c_int, writable: bool) {
    let c_path = match CString::new(path) {
        Ok(c) => c,
        Err(_) => die("stdio path contains NUL"),
    };
    let fd = unsafe {
        if writable {
            open(c_path.as_ptr(), O_WRONLY | O_CREAT | O_TRUNC, 0o644)
        } else {
            open(c_path.as_ptr(), O_RDONLY)
        }
    };
    if fd < 0 {
        die(&format!("failed to open {}", path));
    }
    unsafe {
        if dup2(fd, stdio_fd) < 0 {
            die("dup2 failed");
        }
        close(fd);
    }
}

fn set_rlimit(resource: __rlimit_resource_t, value: u64) {
    let lim = rlimit64 {
        rlim_cur: value,
        rlim_max: value,
    };
    if unsafe { setrlimit64(resource, &lim) } != 0 {
        die("setrlimit64 failed");
    }
}

/// Syscalls a standalone compiled program needs. Interpreters get their
/// process control through the same list; execve stays allowed because
/// the wrapper scripts for Python and Java exec their runtime.
const ALLOWED_SYSCALLS: &[c_long] = &[
    SYS_read,
    SYS_write,
    SYS_readv,
    SYS_writev,
    SYS_close,
    SYS_fstat,
    SYS_lseek,
    SYS_dup,
    SYS_dup2,
    SYS_dup3,
    SYS_mmap,
    SYS_mprotect,
    SYS_munmap,
    SYS_brk,
    SYS_mremap,
    SYS_msync,
    SYS_mincore,
    SYS_madvise,
    SYS_rt_sigaction,
    SYS_rt_sigprocmask,
    SYS_rt_sigreturn,
    SYS_rt_sigpending,
    SYS_sigaltstack,
    SYS_restart_syscall,
    SYS_clone,
    SYS_execve,
    SYS_exit,
    SYS_exit_group,
    SYS_arch_prctl,
    SYS_set_tid_address,
    SYS_set_robust_list,
    SYS_sysinfo,
    SYS_uname,
    SYS_times,
    SYS_futex,
    SYS_getrlimit,
    SYS_getuid,
    SYS_getgid,
    SYS_geteuid,
    SYS_getegid,
    SYS_getppid,
    SYS_getpgrp,
    SYS_getpid,
    SYS_gettid,
    SYS_capget,
    SYS_capset,
    SYS_prlimit64,
    SYS_stat,
    SYS_lstat,
    SYS_newfstatat,
    SYS_access,
    SYS_faccessat,
    SYS_open,
    SYS_openat,
    SYS_fcntl,
    SYS_ioctl,
    SYS_getcwd,
    SYS_readlink,
    SYS_readlinkat,
    SYS_gettimeofday,
    SYS_clock_gettime,
    SYS_clock_getres,
    SYS_clock_nanosleep,
    SYS_mbind,
    SYS_get_mempolicy,
    SYS_set_mempolicy,
];

/// Default-deny filter, loaded last so it survives into the target
/// across exec.
fn install_seccomp() {
    unsafe {
        let ctx = seccomp_init(SCMP_ACT_KILL);
        if ctx.is_null() {
            die("seccomp_init failed");
        }
        for syscall in ALLOWED_SYSCALLS {
            if seccomp_rule_add(ctx, SCMP_ACT_ALLOW, *syscall as c_int, 0) != 0 {
                die("seccomp_rule_add failed");
            }
        }
        if seccomp_load(ctx) != 0 {
            die("seccomp_load failed");
        }
    }
}
