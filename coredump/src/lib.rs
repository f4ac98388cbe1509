//! In-process ELF core-dump writer for Linux userspace processes.
//!
//! Call [`enable`] once, early, to install handlers for the fatal signals
//! (`SIGSEGV`, `SIGABRT`, `SIGBUS`, `SIGFPE`, `SIGILL`, `SIGTRAP`). When one
//! fires, the engine captures every thread's registers, filters the
//! process's memory mappings, writes an `ET_CORE` ELF file, then
//! re-raises the signal so the process terminates exactly as it would
//! have without this crate in the picture. [`dump`] triggers the same
//! machinery manually, with no signal involved.
//!
//! This crate never initializes a `tracing` subscriber itself — it only
//! emits spans/events. A host process decides how (or whether) to render
//! them.

mod arch;
pub mod config;
mod elf;
mod error;
mod filename;
mod filter;
mod note;
mod orchestrator;
mod prstatus;
mod thread;
mod vma;

pub use config::{CompletionCallback, EngineConfig};
pub use error::{EngineError, Result};

/// Installs the engine's signal handlers. Safe to call more than once;
/// a second call while already enabled is a no-op.
pub fn enable() -> Result<()> {
    orchestrator::enable()
}

/// Restores whatever signal disposition preceded [`enable`].
pub fn disable() -> Result<()> {
    orchestrator::disable()
}

pub fn is_enabled() -> bool {
    orchestrator::is_enabled()
}

/// Sets the directory new core files are written into. Takes effect on
/// the next dump; does not move or rename any file already written.
/// Rejected with [`EngineError::InvalidConfig`] if `dir` is not an
/// absolute path, or exists but is not a directory.
pub fn set_dir(dir: impl Into<String>) -> Result<()> {
    orchestrator::set_dir(dir.into())
}

/// Sets the filename-composition flag bits (see [`config::flag`]). A
/// value of `0` falls back to [`config::flag::DEFAULT`].
pub fn set_flag(flag: u32) {
    orchestrator::set_flag(flag);
}

/// Sets the VMA filter flag bits (see [`config::filter`]).
pub fn set_filter(filter: u32) {
    orchestrator::set_filter(filter);
}

/// Sets the per-dump watchdog timeout, in seconds. A dump that is still
/// running when this elapses is abandoned in place (`_exit(0)`), leaving
/// whatever partial file had been written so far.
pub fn set_timeout(seconds: u32) {
    orchestrator::set_timeout(seconds);
}

/// Registers a callback invoked with the final file path once a dump
/// completes (successfully or not).
pub fn set_callback(callback: CompletionCallback) {
    orchestrator::set_callback(callback);
}

/// Loads dir/flag/filter/timeout from a YAML file, falling back to
/// defaults for anything the file does not specify (and entirely if the
/// file does not exist).
pub fn load_config(path: &std::path::Path) -> anyhow::Result<()> {
    let cfg = EngineConfig::load(path)?;
    orchestrator::set_dir(cfg.dir)?;
    orchestrator::set_flag(cfg.flag);
    orchestrator::set_filter(cfg.filter);
    orchestrator::set_timeout(cfg.timeout_secs);
    Ok(())
}

/// Manually triggers a dump of the calling process (§6). `filename`
/// overrides the composed name entirely when given; `tid` selects which
/// thread is treated as "the" thread for register capture and minidump
/// reachability, defaulting to the caller.
pub fn dump(filename: Option<String>, tid: Option<i32>) -> Result<()> {
    orchestrator::dump(filename, tid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disable_without_enable_is_a_noop() {
        assert!(!is_enabled());
        disable().unwrap();
        assert!(!is_enabled());
    }
}
