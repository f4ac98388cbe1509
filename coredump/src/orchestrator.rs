//! Engine state, signal handling protocol, and dump execution (§4.1, §4.2,
//! §4.4, §5).
//!
//! Two mutexes guard two different things, matching the historical engine's
//! split: the *switch* mutex ([`SWITCH`]) serializes `enable`/`disable`/
//! `dump` calls against each other, while the *handler* flag ([`DUMPING`])
//! stops a fault that occurs while a dump is already in flight (for
//! instance inside the forked child itself) from re-entering the signal
//! handler and deadlocking or forking recursively.

use crate::arch::{ArchBackend, CurrentBackend};
use crate::config::EngineConfig;
use crate::elf;
use crate::error::{EngineError, Result};
use crate::filename;
use crate::filter::{self, VmaVerdict};
use crate::note;
use crate::prstatus::{self, SignalInfo};
use crate::thread::{self, ThreadRecord};
use crate::vma::{self, VirtualMemoryArea};

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::wait::waitpid;
use nix::unistd::{fork, ForkResult};
use std::io::{self, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};
use tracing::{debug, error, warn};

/// Signals the engine installs a handler for. These are the fatal,
/// synchronous "the thread that raised this cannot safely continue"
/// signals; async signals like `SIGTERM` are the host's business.
const EXCEPTION_SIGNALS: [Signal; 6] = [
    Signal::SIGABRT,
    Signal::SIGBUS,
    Signal::SIGFPE,
    Signal::SIGILL,
    Signal::SIGSEGV,
    Signal::SIGTRAP,
];

/// A fixed upper bound on threads carried in one dump, inherited from the
/// historical engine's fixed-size thread table. Once a process has more
/// threads than this, slot 0 (the faulting thread, already promoted there
/// by [`order_with_faulting_first`]) stays put, and every further thread
/// wraps around and overwrites a later slot ring-buffer style — see
/// [`cap_thread_table`].
const MAX_THREADS: usize = 128;

/// Not exposed by every `libc` target the same way; defined locally to
/// match the kernel's `PR_SET_PTRACER` (`prctl(2)`) value directly.
const PR_SET_PTRACER: libc::c_int = 0x5961_6d61;
const PR_SET_PTRACER_ANY: libc::c_ulong = u64::MAX as libc::c_ulong;

struct EngineState {
    enabled: bool,
    old_actions: Vec<(Signal, SigAction)>,
}

static CONFIG: OnceLock<Mutex<EngineConfig>> = OnceLock::new();
static STATE: OnceLock<Mutex<EngineState>> = OnceLock::new();
static SWITCH: OnceLock<Mutex<()>> = OnceLock::new();
static DUMPING: AtomicBool = AtomicBool::new(false);

fn config() -> &'static Mutex<EngineConfig> {
    CONFIG.get_or_init(|| Mutex::new(EngineConfig::default()))
}

fn state() -> &'static Mutex<EngineState> {
    STATE.get_or_init(|| {
        Mutex::new(EngineState {
            enabled: false,
            old_actions: Vec::new(),
        })
    })
}

fn switch() -> &'static Mutex<()> {
    SWITCH.get_or_init(|| Mutex::new(()))
}

/// Everything one dump needs to know about who/why, independent of how it
/// was triggered.
pub struct DumpOption {
    pub pid: i32,
    pub tid: i32,
    pub filename: Option<String>,
    pub signo: i32,
    pub code: i32,
    pub cursig: i16,
    /// Present only on the signal-handler path; carries the faulting
    /// thread's exact machine state at the point of the fault, which is
    /// more precise than a ptrace snapshot taken after the handler runs
    /// (§4.2 step 4).
    pub ucontext: Option<*const libc::ucontext_t>,
}

pub fn read_config() -> EngineConfig {
    config().lock().unwrap().clone()
}

/// Sets the directory dumps are written to. Rejected with
/// [`EngineError::InvalidConfig`] if `dir` is not an absolute path, or is a
/// path that already exists but is not a directory — either would fail
/// every subsequent dump silently inside the forked child, where there is
/// no caller left to report it to.
pub fn set_dir(dir: String) -> Result<()> {
    let path = Path::new(&dir);
    if !path.is_absolute() {
        return Err(EngineError::InvalidConfig(format!("dump dir must be an absolute path: {dir}")));
    }
    if path.exists() && !path.is_dir() {
        return Err(EngineError::InvalidConfig(format!("dump dir exists and is not a directory: {dir}")));
    }
    config().lock().unwrap().dir = dir;
    Ok(())
}

pub fn set_flag(flag: u32) {
    config().lock().unwrap().flag = flag;
}

pub fn set_filter(filter: u32) {
    config().lock().unwrap().filter = filter;
}

pub fn set_timeout(seconds: u32) {
    config().lock().unwrap().timeout_secs = seconds;
}

pub fn set_callback(callback: crate::config::CompletionCallback) {
    config().lock().unwrap().callback = Some(callback);
}

pub fn is_enabled() -> bool {
    state().lock().unwrap().enabled
}

/// Installs the signal handler set (§4.1). Idempotent: calling twice
/// without an intervening `disable()` is a no-op.
pub fn enable() -> Result<()> {
    let _guard = switch().lock().unwrap();
    let mut st = state().lock().unwrap();
    if st.enabled {
        return Ok(());
    }

    let action = SigAction::new(
        SigHandler::SigAction(signal_handler),
        SaFlags::SA_SIGINFO | SaFlags::SA_RESTART | SaFlags::SA_ONSTACK,
        SigSet::empty(),
    );

    let mut installed = Vec::with_capacity(EXCEPTION_SIGNALS.len());
    for &sig in &EXCEPTION_SIGNALS {
        // SAFETY: `signal_handler` is async-signal-safe per its own
        // documentation; `action` does not borrow anything with a
        // shorter lifetime than `'static`.
        match unsafe { signal::sigaction(sig, &action) } {
            Ok(old) => installed.push((sig, old)),
            Err(e) => {
                // Unwind anything already installed before reporting.
                for (s, old) in installed.drain(..) {
                    let _ = unsafe { signal::sigaction(s, &old) };
                }
                return Err(EngineError::Sigaction(io::Error::from_raw_os_error(e as i32)));
            }
        }
    }

    st.old_actions = installed;
    st.enabled = true;
    Ok(())
}

/// Restores whatever signal disposition preceded `enable()`.
pub fn disable() -> Result<()> {
    let _guard = switch().lock().unwrap();
    let mut st = state().lock().unwrap();
    if !st.enabled {
        return Ok(());
    }
    for (sig, old) in st.old_actions.drain(..) {
        if let Err(e) = unsafe { signal::sigaction(sig, &old) } {
            return Err(EngineError::Sigaction(io::Error::from_raw_os_error(e as i32)));
        }
    }
    st.enabled = false;
    Ok(())
}

/// Manually triggers a dump of the calling process, independent of any
/// signal (§6's `dump()` entry point).
pub fn dump(filename_override: Option<String>, tid_override: Option<i32>) -> Result<()> {
    let pid = std::process::id() as i32;
    let tid = tid_override.unwrap_or_else(|| unsafe { libc::syscall(libc::SYS_gettid) as i32 });
    let opt = DumpOption {
        pid,
        tid,
        filename: filename_override,
        signo: 0,
        code: 0,
        cursig: 0,
        ucontext: None,
    };
    let cfg = read_config();
    execute_dump(&opt, &cfg)
}

/// Installed for every signal in [`EXCEPTION_SIGNALS`]. Must stay
/// async-signal-safe: no allocation before the handler-mutex check, no
/// locking that could already be held by the interrupted thread.
extern "C" fn signal_handler(signum: libc::c_int, info: *mut libc::siginfo_t, ctx: *mut libc::c_void) {
    if DUMPING.swap(true, Ordering::SeqCst) {
        // Re-entrant fault (e.g. inside the handler's own fork/dump path).
        // Restore the default disposition and let this one through so the
        // process terminates normally instead of looping.
        let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
        if let Ok(sig) = Signal::try_from(signum) {
            let _ = unsafe { signal::sigaction(sig, &default) };
        }
        unsafe {
            libc::raise(signum);
        }
        return;
    }

    // Disable first: a second genuine crash of the same kind must not be
    // caught again, only ever re-delivered with default disposition.
    if let Ok(sig) = Signal::try_from(signum) {
        let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
        let _ = unsafe { signal::sigaction(sig, &default) };
    }

    let pid = std::process::id() as i32;
    let tid = unsafe { libc::syscall(libc::SYS_gettid) as i32 };
    // SAFETY: `info` is non-null and valid for the duration of the
    // handler call, per the SA_SIGINFO contract.
    let (code, cursig) = if info.is_null() {
        (0, signum as i16)
    } else {
        unsafe { ((*info).si_code, signum as i16) }
    };

    let opt = DumpOption {
        pid,
        tid,
        filename: None,
        signo: signum,
        code,
        cursig,
        ucontext: Some(ctx as *const libc::ucontext_t),
    };

    let cfg = read_config();
    if let Err(e) = execute_dump(&opt, &cfg) {
        error!("core dump failed: {e}");
    }

    DUMPING.store(false, Ordering::SeqCst);
    // Release: re-deliver the signal so the process still terminates (or
    // a debugger still sees it) the way it would have without this engine.
    unsafe {
        libc::raise(signum);
    }
}

/// Dump execution protocol (§4.1): flips `PR_SET_DUMPABLE`/`PR_SET_PTRACER`
/// so the forked child is allowed to `ptrace` its parent's other threads,
/// forks an isolated writer, waits for it, then restores state and invokes
/// the completion callback.
fn execute_dump(opt: &DumpOption, cfg: &EngineConfig) -> Result<()> {
    let path = opt
        .filename
        .clone()
        .map(PathBuf::from)
        .unwrap_or_else(|| filename::compose(&cfg.dir, cfg.effective_flag(), opt.pid, opt.tid));

    unsafe {
        libc::prctl(libc::PR_SET_DUMPABLE, 1, 0, 0, 0);
        libc::prctl(PR_SET_PTRACER, PR_SET_PTRACER_ANY, 0, 0, 0);
    }

    // SAFETY: fork() is async-signal-safe; the child only touches
    // async-signal-safe APIs (or data private to it) until it exits.
    let result = unsafe { fork() };
    match result {
        Ok(ForkResult::Child) => {
            child_dump(opt, cfg, &path);
            unsafe { libc::_exit(0) };
        }
        Ok(ForkResult::Parent { child }) => {
            if let Err(e) = waitpid(child, None) {
                warn!("waitpid on dump child failed: {e}");
            }
        }
        Err(e) => {
            unsafe {
                libc::prctl(libc::PR_SET_DUMPABLE, 0, 0, 0, 0);
            }
            return Err(EngineError::Fork(e));
        }
    }

    unsafe {
        libc::prctl(libc::PR_SET_DUMPABLE, 0, 0, 0, 0);
    }

    if let Some(cb) = cfg.callback {
        cb(&path.to_string_lossy());
    }

    Ok(())
}

extern "C" fn alarm_handler(_signum: libc::c_int, _info: *mut libc::siginfo_t, _ctx: *mut libc::c_void) {
    // SAFETY: _exit is the one libc call guaranteed safe from any signal
    // context, including one that interrupted a dump mid-write.
    unsafe { libc::_exit(0) };
}

/// Runs entirely inside the forked child: ignores everything that could
/// re-enter this engine, arms the timeout, and writes the core file best
/// effort. Every failure past this point is logged and swallowed — a
/// partial core file is strictly better than none (§7).
fn child_dump(opt: &DumpOption, cfg: &EngineConfig, path: &Path) {
    for &sig in EXCEPTION_SIGNALS.iter().chain(std::iter::once(&Signal::SIGCHLD)) {
        let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
        let _ = unsafe { signal::sigaction(sig, &ignore) };
    }

    let alarm_action = SigAction::new(SigHandler::SigAction(alarm_handler), SaFlags::SA_SIGINFO, SigSet::empty());
    let _ = unsafe { signal::sigaction(Signal::SIGALRM, &alarm_action) };
    unsafe {
        libc::alarm(cfg.timeout_secs);
    }

    if let Err(e) = run_dump(opt, cfg, path) {
        warn!("core dump write failed for pid {}: {e}", opt.pid);
    }
}

/// Reorders `threads` so the faulting tid occupies slot 0 (§4.2 step 3).
/// If the faulting tid was never attached (it may have exited, or attach
/// may have failed for it specifically), the original order is kept —
/// there is no faulting thread to promote.
fn order_with_faulting_first(mut threads: Vec<ThreadRecord>, faulting_tid: i32) -> Vec<ThreadRecord> {
    if let Some(idx) = threads.iter().position(|t| t.tid == faulting_tid) {
        threads.swap(0, idx);
    }
    threads
}

/// Caps `threads` at [`MAX_THREADS`], the way the historical engine's fixed
/// thread array did: once full, slot 0 (already holding the faulting
/// thread after [`order_with_faulting_first`]) is never evicted, but every
/// thread past the limit wraps around and overwrites slot `1 + i %
/// (MAX_THREADS - 1)` instead of being dropped, so the last thread seen at
/// a given position wins.
fn cap_thread_table(threads: Vec<ThreadRecord>) -> Vec<ThreadRecord> {
    if threads.len() <= MAX_THREADS {
        return threads;
    }
    let mut capped = vec![ThreadRecord { tid: -1, attached: false }; MAX_THREADS];
    capped[0] = threads[0];
    for (i, t) in threads[1..].iter().enumerate() {
        let slot = 1 + i % (MAX_THREADS - 1);
        capped[slot] = *t;
    }
    capped
}

fn capture_prstatus_bytes(thread_index: usize, t: &ThreadRecord, opt: &DumpOption) -> Vec<u8> {
    if thread_index == 0 {
        if let Some(ctx) = opt.ucontext {
            // SAFETY: valid for the lifetime of the signal handler call
            // that produced this DumpOption; the child inherited the same
            // mapped memory via fork() and the parent is blocked in
            // waitpid for the duration.
            if !ctx.is_null() {
                return CurrentBackend::capture_ucontext(unsafe { &*ctx });
            }
        }
    }
    CurrentBackend::capture_ptrace(t.tid)
}

fn build_siginfo_desc(opt: &DumpOption) -> Vec<u8> {
    let mut desc = vec![0u8; 12];
    desc[0..4].copy_from_slice(&opt.signo.to_le_bytes());
    desc[4..8].copy_from_slice(&opt.code.to_le_bytes());
    desc[8..12].copy_from_slice(&0i32.to_le_bytes()); // errno
    desc
}

/// Assembles the full `PT_NOTE` payload: one `PRSTATUS` (+ `SIGINFO` on
/// the first thread, + any arch extras) per attached thread, then a
/// process-wide `AUXV`, then a process-wide `NT_FILE` (§3, §4.4).
fn build_note_segment(opt: &DumpOption, threads: &[ThreadRecord], vmas: &[VirtualMemoryArea]) -> Vec<u8> {
    let word = CurrentBackend::WORD;
    let mut buf = Vec::new();

    for (i, t) in threads.iter().enumerate() {
        let pr_reg = capture_prstatus_bytes(i, t, opt);
        let sig = SignalInfo {
            signo: opt.signo,
            code: opt.code,
            cursig: opt.cursig,
        };
        let prstatus_desc = prstatus::build_prstatus_desc(word, t.tid, sig, &pr_reg);
        buf.extend(elf::write_note("CORE", elf::NT_PRSTATUS, &prstatus_desc));

        if i == 0 {
            let siginfo_desc = build_siginfo_desc(opt);
            buf.extend(elf::write_note("CORE", elf::NT_SIGINFO, &siginfo_desc));
        }

        for extra in CurrentBackend::extra_notes(t.tid) {
            buf.extend(elf::write_note(extra.name, extra.n_type, &extra.desc));
        }
    }

    match note::parse_auxv(opt.pid, word) {
        Ok(entries) => {
            let desc = note::build_auxv_desc(word, &entries);
            buf.extend(elf::write_note("CORE", elf::NT_AUXV, &desc));
        }
        Err(e) => debug!("auxv read failed for pid {}: {e}", opt.pid),
    }

    let nt_file_vmas = note::nt_file_vmas(vmas);
    let desc = note::build_nt_file_desc(word, elf::page_size(), &nt_file_vmas);
    buf.extend(elf::write_note("CORE", elf::NT_FILE, &desc));

    buf
}

/// Streams one VMA's payload from `/proc/<pid>/mem` into `out` at its
/// current seek position, a page at a time. A page that fails to read is
/// replaced with zeros (the region is unreadable, e.g. a guard page) and
/// logged once; a write failure (disk full) aborts the whole dump rather
/// than producing a silently truncated file further in.
fn stream_payload(mem: &std::fs::File, out: &mut std::fs::File, vma: &VirtualMemoryArea, page_size: u64) -> io::Result<()> {
    let mut off: u64 = 0;
    let len = vma.memsz();
    let mut page = vec![0u8; page_size as usize];
    let mut warned = false;

    while off < len {
        let this_len = std::cmp::min(page_size, len - off) as usize;
        let buf = &mut page[..this_len];
        match mem.read_at(buf, vma.begin + off) {
            Ok(n) if n == this_len => {}
            _ => {
                if !warned {
                    warn!("unreadable page at {:#x} in {}, zero-filling", vma.begin + off, vma.path);
                    warned = true;
                }
                buf.fill(0);
            }
        }
        // Any write failure (ENOSPC in practice) aborts the whole dump
        // immediately rather than continuing to produce a corrupt file.
        out.write_all(buf)?;
        off += this_len as u64;
    }
    Ok(())
}

fn run_dump(opt: &DumpOption, cfg: &EngineConfig, path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let threads = order_with_faulting_first(thread::attach_all(opt.pid), opt.tid);
    let threads: Vec<ThreadRecord> = cap_thread_table(threads);

    let all_vmas = vma::parse_maps(opt.pid)?;
    let filter_flags = cfg.filter;
    let machine = CurrentBackend::MACHINE;

    let faulting_regs = if !threads.is_empty() {
        Some(capture_prstatus_bytes(0, &threads[0], opt))
    } else {
        None
    };

    let verdicts: Vec<VmaVerdict> = all_vmas
        .iter()
        .map(|v| {
            let reachable = faulting_regs
                .as_deref()
                .map(|regs| CurrentBackend::minidump_reachable(regs, v))
                .unwrap_or(false);
            filter::classify(v, filter_flags, machine, reachable)
        })
        .collect();

    let note_segment = build_note_segment(opt, &threads, &all_vmas);

    let word = CurrentBackend::WORD;
    let phnum = 1 + all_vmas.len();
    let ehdr_len = word.ehdr_size();
    let phdr_len = word.phdr_size();
    let note_offset = ehdr_len + phnum as u64 * phdr_len;
    let page_size = elf::page_size();
    let payload_start = elf::round_up(note_offset + note_segment.len() as u64, page_size);

    let mut phdrs_payload: Vec<(u64, u64, u64, u32)> = Vec::with_capacity(all_vmas.len());
    let mut running_offset = payload_start;
    for (v, verdict) in all_vmas.iter().zip(&verdicts) {
        let include_data = *verdict != VmaVerdict::Null;
        let filesz = if include_data { v.memsz() } else { 0 };
        let offset = if include_data { running_offset } else { 0 };
        if include_data {
            running_offset += filesz;
        }
        let mut p_flags = 0u32;
        if v.readable() {
            p_flags |= elf::PF_R;
        }
        if v.writable() {
            p_flags |= elf::PF_W;
        }
        if v.executable() {
            p_flags |= elf::PF_X;
        }
        phdrs_payload.push((offset, filesz, v.memsz(), p_flags));
    }

    let mut out = std::fs::File::create(path)?;
    out.write_all(&elf::write_ehdr(word, machine, phnum as u16))?;
    out.write_all(&elf::write_phdr(word, elf::PT_NOTE, note_offset, 0, note_segment.len() as u64, note_segment.len() as u64, elf::PF_R, 4))?;
    for (v, &(offset, filesz, memsz, p_flags)) in all_vmas.iter().zip(&phdrs_payload) {
        out.write_all(&elf::write_phdr(word, elf::PT_LOAD, offset, v.begin, filesz, memsz, p_flags, page_size))?;
    }
    out.write_all(&note_segment)?;

    let pad = payload_start - (note_offset + note_segment.len() as u64);
    if pad > 0 {
        out.write_all(&vec![0u8; pad as usize])?;
    }

    let mem = std::fs::File::open(format!("/proc/{}/mem", opt.pid))?;
    for (v, (verdict, &(_offset, filesz, _memsz, _flags))) in all_vmas.iter().zip(verdicts.iter().zip(&phdrs_payload)) {
        if *verdict == VmaVerdict::Null || filesz == 0 {
            continue;
        }
        stream_payload(&mem, &mut out, v, page_size)?;
    }

    thread::detach_all(&threads);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(tid: i32) -> ThreadRecord {
        ThreadRecord { tid, attached: true }
    }

    #[test]
    fn faulting_thread_is_promoted_to_slot_zero() {
        let threads = vec![record(10), record(11), record(12)];
        let ordered = order_with_faulting_first(threads, 12);
        assert_eq!(ordered[0].tid, 12);
    }

    #[test]
    fn missing_faulting_tid_leaves_order_unchanged() {
        let threads = vec![record(10), record(11)];
        let ordered = order_with_faulting_first(threads, 999);
        assert_eq!(ordered[0].tid, 10);
        assert_eq!(ordered[1].tid, 11);
    }

    #[test]
    fn siginfo_desc_carries_signo_and_code() {
        let opt = DumpOption {
            pid: 1,
            tid: 1,
            filename: None,
            signo: 11,
            code: 1,
            cursig: 11,
            ucontext: None,
        };
        let desc = build_siginfo_desc(&opt);
        assert_eq!(i32::from_le_bytes(desc[0..4].try_into().unwrap()), 11);
        assert_eq!(i32::from_le_bytes(desc[4..8].try_into().unwrap()), 1);
    }

    #[test]
    fn setters_round_trip_through_config() {
        set_dir("/tmp/dumps".to_string()).unwrap();
        set_timeout(5);
        let cfg = read_config();
        assert_eq!(cfg.dir, "/tmp/dumps");
        assert_eq!(cfg.timeout_secs, 5);
    }

    #[test]
    fn set_dir_rejects_relative_path() {
        assert!(set_dir("relative/dumps".to_string()).is_err());
    }

    #[test]
    fn set_dir_rejects_existing_non_directory() {
        let file = std::env::temp_dir().join("coredump_set_dir_test_file");
        std::fs::write(&file, b"not a directory").unwrap();
        let err = set_dir(file.to_string_lossy().into_owned());
        std::fs::remove_file(&file).unwrap();
        assert!(err.is_err());
    }

    #[test]
    fn cap_thread_table_never_evicts_slot_zero_and_wraps_the_rest() {
        let mut threads = vec![record(0)];
        for tid in 1..=(MAX_THREADS as i32 + 5) {
            threads.push(record(tid));
        }
        let capped = cap_thread_table(threads);
        assert_eq!(capped.len(), MAX_THREADS);
        assert_eq!(capped[0].tid, 0);
        // The last 5 overflow threads (tids MAX_THREADS..MAX_THREADS+5)
        // wrap back around to slots 1..6, overwriting what was there.
        for (slot, tid) in (1..6).zip(MAX_THREADS as i32..MAX_THREADS as i32 + 5) {
            assert_eq!(capped[slot].tid, tid);
        }
    }
}
