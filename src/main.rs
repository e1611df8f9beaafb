use anyhow::Context;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use system_mutex::{
    check_valid_mutex_name, current_pid, exit_code_for_io_error, exit_code_for_mutex_error,
    generate_mutex_name, lock_dir, lock_path_in, read_lock_owner, telemetry_init,
    timed_acquire_mutex_with, AcquireOptions, SystemMutex,
};

#[derive(Parser, Debug)]
#[command(
    name = "sysmutex",
    version,
    about = "Inspect and hold named system mutexes shared across processes."
)]
struct Cli {
    /// Print detailed execution info
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug, Clone)]
enum Cmd {
    /// Print the lock-safe name derived from an arbitrary string
    Hash {
        raw: String,
        /// Prepended to the hashed token
        #[arg(long, default_value = "")]
        prefix: String,
    },
    /// Make one acquisition attempt and hold the mutex for a while
    Hold {
        name: String,
        /// Seconds to keep the mutex before releasing it
        #[arg(long, default_value_t = 30)]
        seconds: u64,
    },
    /// Acquire with retries until the timeout, then hold briefly
    Acquire {
        name: String,
        /// Seconds to wait for the mutex (default: SYSMUTEX_TIMEOUT_SECS or 20)
        #[arg(long)]
        timeout: Option<f64>,
        /// Milliseconds to hold the mutex once acquired
        #[arg(long, default_value_t = 0)]
        hold_ms: u64,
    },
    /// Show the lock file and its recorded owner
    Status { name: String },
    /// Print build and environment diagnostics
    Doctor,
}

fn say(line: &str) {
    let mut out = std::io::stdout();
    let _ = writeln!(out, "{line}");
    let _ = out.flush();
}

fn run_hold(name: &str, seconds: u64, verbose: bool) -> ExitCode {
    if let Err(e) = check_valid_mutex_name(name) {
        eprintln!("sysmutex: {e}");
        return ExitCode::from(exit_code_for_mutex_error(&e));
    }
    let mut mutex = match SystemMutex::new(name) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("sysmutex: {e}");
            return ExitCode::from(exit_code_for_io_error(&e));
        }
    };
    if !mutex.get_mutex_acquired() {
        eprintln!("sysmutex: mutex busy: {name}");
        return ExitCode::from(1);
    }
    if verbose {
        eprintln!("sysmutex: holding {} for {seconds}s", mutex.path().display());
    }
    say("acquired mutex");
    thread::sleep(Duration::from_secs(seconds));
    mutex.release_mutex();
    ExitCode::SUCCESS
}

fn run_acquire(name: &str, timeout: Option<f64>, hold_ms: u64, verbose: bool) -> ExitCode {
    let mut opts = AcquireOptions::from_env();
    if let Some(secs) = timeout.filter(|s| s.is_finite() && *s >= 0.0) {
        opts = opts.with_timeout(Duration::from_secs_f64(secs));
    }
    match timed_acquire_mutex_with(name, &opts) {
        Ok(guard) => {
            if verbose {
                eprintln!("sysmutex: acquired {}", guard.path().display());
            }
            say("acquired mutex");
            thread::sleep(Duration::from_millis(hold_ms));
            drop(guard);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("sysmutex: {e}");
            ExitCode::from(exit_code_for_mutex_error(&e))
        }
    }
}

fn run_status(name: &str) -> anyhow::Result<()> {
    let dir = lock_dir();
    let owner = read_lock_owner(&dir, name)
        .with_context(|| format!("failed to read lock owner for {name}"))?;
    say(&format!("path: {}", lock_path_in(&dir, name).display()));
    match owner {
        Some(o) => say(&format!(
            "owner: pid {} ({})",
            o.pid,
            if o.alive { "alive" } else { "dead" }
        )),
        None => say("owner: none"),
    }
    Ok(())
}

fn run_doctor() {
    eprintln!("sysmutex doctor");
    eprintln!("  version: v{}", env!("CARGO_PKG_VERSION"));
    eprintln!(
        "  build: {} / {}",
        env!("SYSMUTEX_BUILD_TARGET"),
        env!("SYSMUTEX_BUILD_PROFILE")
    );
    eprintln!("  built at: {}", env!("SYSMUTEX_BUILD_DATE"));
    eprintln!("  rustc: {}", env!("SYSMUTEX_BUILD_RUSTC"));
    eprintln!("  host: {} / {}", std::env::consts::OS, std::env::consts::ARCH);
    eprintln!("  lock dir: {}", lock_dir().display());
    eprintln!("  pid: {}", current_pid());
    eprintln!("doctor: completed diagnostics.");
}

fn main() -> ExitCode {
    telemetry_init();
    let cli = Cli::parse();

    match cli.command {
        Cmd::Hash { raw, prefix } => {
            say(&generate_mutex_name(&raw, &prefix));
            ExitCode::SUCCESS
        }
        Cmd::Hold { name, seconds } => run_hold(&name, seconds, cli.verbose),
        Cmd::Acquire {
            name,
            timeout,
            hold_ms,
        } => run_acquire(&name, timeout, hold_ms, cli.verbose),
        Cmd::Status { name } => match run_status(&name) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("sysmutex: {e:#}");
                ExitCode::from(1)
            }
        },
        Cmd::Doctor => {
            run_doctor();
            ExitCode::SUCCESS
        }
    }
}
