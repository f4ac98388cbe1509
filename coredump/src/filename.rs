//! Output filename composition (§6).
//!
//! Out of scope as a host-facing feature per the top-level contract, but
//! the engine needs *something* to call when no override is supplied, so
//! a reference implementation of the flag-bit rule lives here. A host
//! embedding this crate can always bypass it with an absolute
//! `DumpOption::filename` override.

use crate::config::flag;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

fn read_comm(path: &Path) -> String {
    std::fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

fn process_comm(pid: i32) -> String {
    read_comm(&PathBuf::from(format!("/proc/{pid}/comm")))
}

fn thread_comm(pid: i32, tid: i32) -> String {
    read_comm(&PathBuf::from(format!("/proc/{pid}/task/{tid}/comm")))
}

/// Composes `dir/<tokens joined by '_'>` per the enabled flag bits.
///
/// Token order matches the bit order in §6: `CORE` contributes the
/// literal `core.` prefix on the first token rather than a standalone
/// token, `PROCESS_COMM`, `PID`, `THREAD_COMM`, `TID`, `TIMESTAMP` each
/// contribute one token when their bit is set.
pub fn compose(dir: &str, flags: u32, pid: i32, tid: i32) -> PathBuf {
    let effective = if flags == 0 { flag::DEFAULT } else { flags };
    let mut tokens: Vec<String> = Vec::new();
    let mut prefix = String::new();

    if effective & flag::CORE != 0 {
        prefix.push_str("core.");
    }
    if effective & flag::PROCESS_COMM != 0 {
        tokens.push(process_comm(pid));
    }
    if effective & flag::PID != 0 {
        tokens.push(pid.to_string());
    }
    if effective & flag::THREAD_COMM != 0 {
        tokens.push(thread_comm(pid, tid));
    }
    if effective & flag::TID != 0 {
        tokens.push(tid.to_string());
    }
    if effective & flag::TIMESTAMP != 0 {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        tokens.push(secs.to_string());
    }

    let name = format!("{prefix}{}", tokens.join("_"));
    Path::new(dir).join(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_pid_tid_composes_expected_name() {
        let path = compose("/tmp", flag::CORE | flag::PID | flag::TID, 4096, 4100);
        assert_eq!(path, Path::new("/tmp/core.4096_4100"));
    }

    #[test]
    fn zero_flags_use_default() {
        let path = compose("/tmp", 0, 10, 11);
        assert_eq!(path, Path::new("/tmp/core.11"));
    }

    #[test]
    fn pid_only_has_no_separator_for_single_token() {
        let path = compose("/tmp", flag::CORE | flag::PID, 55, 56);
        assert_eq!(path, Path::new("/tmp/core.55"));
    }
}
