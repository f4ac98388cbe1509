//! Thread quiescence (§4.2): stop every task of the target pid, capture
//! register state, and reliably detach afterward.

use nix::sys::ptrace;
use nix::sys::wait::{waitpid, WaitPidFlag};
use nix::unistd::Pid;
use std::fs;
use tracing::warn;

/// One OS thread of the target process. `attached` records whether
/// `PTRACE_ATTACH` succeeded for this tid; only attached threads are
/// detached during release.
#[derive(Debug, Clone, Copy)]
pub struct ThreadRecord {
    pub tid: i32,
    pub attached: bool,
}

/// Lists every tid under `/proc/<pid>/task/` in readdir order.
fn list_tids(pid: i32) -> std::io::Result<Vec<i32>> {
    let mut tids = Vec::new();
    for entry in fs::read_dir(format!("/proc/{pid}/task"))? {
        let entry = entry?;
        if let Some(tid) = entry.file_name().to_str().and_then(|s| s.parse::<i32>().ok()) {
            tids.push(tid);
        }
    }
    Ok(tids)
}

/// Attaches to every task of `pid`, tolerating per-thread failure (§4.2
/// step 2). Returns the thread list in enumeration order; the caller is
/// responsible for reordering so the faulting tid sits at index 0
/// (§4.2 step 3, see [`crate::orchestrator::order_with_faulting_first`]).
pub fn attach_all(pid: i32) -> Vec<ThreadRecord> {
    let tids = list_tids(pid).unwrap_or_else(|e| {
        warn!("failed to list /proc/{pid}/task: {e}");
        Vec::new()
    });

    let mut threads = Vec::with_capacity(tids.len());
    for tid in tids {
        let mut record = ThreadRecord { tid, attached: false };
        match ptrace::attach(Pid::from_raw(tid)) {
            Ok(()) => {
                let flags = WaitPidFlag::WUNTRACED | WaitPidFlag::__WALL;
                match waitpid(Pid::from_raw(tid), Some(flags)) {
                    Ok(_) => record.attached = true,
                    Err(e) => warn!("waitpid after attach failed for tid {tid}: {e}"),
                }
            }
            Err(e) => warn!("ptrace attach failed for tid {tid}: {e}"),
        }
        threads.push(record);
    }
    threads
}

/// Detaches every attached thread. Always runs, even on a partially
/// failed or timed-out dump, so the target process remains runnable.
pub fn detach_all(threads: &[ThreadRecord]) {
    for t in threads {
        if t.attached {
            if let Err(e) = ptrace::detach(Pid::from_raw(t.tid), None) {
                warn!("ptrace detach failed for tid {}: {e}", t.tid);
            }
        }
    }
}

/// Raw `PTRACE_GETREGSET` call used by each architecture backend to read
/// a `NT_PRSTATUS`/`NT_FPREGSET`/etc. register set into a caller-sized
/// buffer. Returns `false` (buffer left untouched) on failure so callers
/// can zero-fill per §7's permission-denied handling.
pub fn ptrace_getregset(tid: i32, nt_type: i32, buf: &mut [u8]) -> bool {
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr() as *mut libc::c_void,
        iov_len: buf.len(),
    };
    // SAFETY: `iov` points at a live, correctly sized buffer for the
    // duration of the call; PTRACE_GETREGSET never retains the pointer.
    let ret = unsafe {
        libc::ptrace(
            libc::PTRACE_GETREGSET,
            tid,
            nt_type as *mut libc::c_void,
            &mut iov as *mut libc::iovec as *mut libc::c_void,
        )
    };
    ret == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detach_all_skips_unattached_threads() {
        // tid -1 would fail ptrace(DETACH) if attempted; attached=false
        // must short-circuit before the syscall.
        let threads = [ThreadRecord { tid: -1, attached: false }];
        detach_all(&threads); // must not panic
    }

    #[test]
    fn ptrace_getregset_fails_gracefully_on_bad_tid() {
        let mut buf = [0u8; 8];
        let ok = ptrace_getregset(i32::MAX, 1 /* NT_PRSTATUS */, &mut buf);
        assert!(!ok);
    }
}
