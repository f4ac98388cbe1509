//! Manual exercise harness for the `coredump` engine.
//!
//! Installs the signal handlers, then either raises a real fault on a
//! background thread or calls `coredump::dump()` directly, so the
//! resulting core file can be inspected with `readelf`/`gdb` by hand.
//! This is the only binary in the workspace that calls
//! `tracing_subscriber::fmt().init()`; the library itself never does.

use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::thread;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Trigger {
    /// Calls `coredump::dump()` directly, no signal involved.
    Manual,
    /// Dereferences a null pointer on a background thread.
    Segv,
    /// Calls `abort()` on a background thread.
    Abort,
}

/// Trigger a coredump engine dump, for manual inspection.
#[derive(Parser, Debug)]
#[command(name = "dump-trigger", version, about)]
struct Args {
    /// Output directory for the core file.
    #[arg(long, default_value = "/tmp/coredump-demo")]
    dir: String,

    /// Watchdog timeout in seconds.
    #[arg(long, default_value_t = 30)]
    timeout: u32,

    /// Filename-composition flag bits (see `coredump::config::flag`). 0
    /// falls back to the engine default (CORE|TID).
    #[arg(long, default_value_t = 0)]
    flags: u32,

    /// VMA filter flag bits (see `coredump::config::filter`).
    #[arg(long, default_value_t = 0)]
    filter: u32,

    /// Overrides the pid token used when composing the output filename.
    /// Purely cosmetic: the engine always dumps its own process.
    #[arg(long)]
    pid: Option<i32>,

    /// tid treated as "the" thread for manual dumps and minidump
    /// reachability. Defaults to the calling thread.
    #[arg(long)]
    tid: Option<i32>,

    /// What to do once the engine is installed.
    #[arg(long, value_enum, default_value_t = Trigger::Manual)]
    trigger: Trigger,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt().with_env_filter("info").init();

    coredump::set_dir(args.dir.clone())?;
    coredump::set_timeout(args.timeout);
    coredump::set_flag(args.flags);
    coredump::set_filter(args.filter);
    coredump::set_callback(|path| {
        info!("core file written to {path}");
    });

    coredump::enable()?;
    info!("coredump engine enabled, writing under {}", args.dir);

    match args.trigger {
        Trigger::Manual => {
            coredump::dump(None, args.tid)?;
        }
        Trigger::Segv => {
            let handle = thread::spawn(|| {
                let p: *const i32 = std::ptr::null();
                // SAFETY: none — this is the point, it's a deliberate fault.
                unsafe { std::ptr::read_volatile(p) };
            });
            handle.join().ok();
        }
        Trigger::Abort => {
            let handle = thread::spawn(|| unsafe { libc::abort() });
            handle.join().ok();
        }
    }

    // Give the (fatal) signal path a moment to run before the process
    // would otherwise have already terminated via the re-raised signal.
    thread::sleep(Duration::from_millis(200));
    Ok(())
}
