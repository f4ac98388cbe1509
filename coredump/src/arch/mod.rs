//! Per-ISA register capture (§4.5): `pt_regs` layout, ptrace/ucontext
//! register capture, arch-specific notes, and minidump reachability.
//!
//! Exactly one backend module is compiled in, selected by
//! `cfg(target_arch)` below — mirroring the original engine's
//! compile-time `#if defined(__aarch64__)` dispatch, but as a trait impl
//! instead of a chosen subclass.

use crate::elf::WordSize;
use crate::vma::VirtualMemoryArea;

pub mod arm;
pub mod arm64;
pub mod riscv64;
pub mod x86;
pub mod x86_64;

/// One additional note emitted alongside a thread's `PRSTATUS`
/// (arm64-only in practice; see §4.5).
pub struct ExtraNote {
    pub name: &'static str,
    pub n_type: u32,
    pub desc: Vec<u8>,
}

/// The contract every ISA backend implements. Register capture always
/// succeeds from the caller's point of view: on a ptrace failure the
/// backend zero-fills rather than propagating an error, per §7's
/// permission-denied handling.
pub trait ArchBackend {
    const MACHINE: u16;
    const WORD: WordSize;

    /// Raw `pt_regs` bytes for `tid`, captured via
    /// `PTRACE_GETREGSET(NT_PRSTATUS)`. Zero-filled on failure.
    fn capture_ptrace(tid: i32) -> Vec<u8>;

    /// Raw `pt_regs` bytes derived from a signal-time `ucontext`,
    /// preferred over the ptrace snapshot for the faulting thread
    /// (§4.2 step 4) because it reflects the exact faulting
    /// instruction rather than the post-handler state.
    fn capture_ucontext(ucontext: &libc::ucontext_t) -> Vec<u8>;

    /// Additional per-thread notes beyond `PRSTATUS`/`SIGINFO`
    /// (`NT_FPREGSET`, `NT_ARM_TLS`, PAC/MTE state on arm64).
    fn extra_notes(_tid: i32) -> Vec<ExtraNote> {
        Vec::new()
    }

    /// Whether any general-purpose register in `regs` (as produced by
    /// `capture_ptrace`/`capture_ucontext`) points into `vma`.
    fn minidump_reachable(regs: &[u8], vma: &VirtualMemoryArea) -> bool;
}

#[cfg(target_arch = "aarch64")]
pub use arm64::Backend as CurrentBackend;

#[cfg(target_arch = "arm")]
pub use arm::Backend as CurrentBackend;

#[cfg(target_arch = "x86_64")]
pub use x86_64::Backend as CurrentBackend;

#[cfg(target_arch = "x86")]
pub use x86::Backend as CurrentBackend;

#[cfg(target_arch = "riscv64")]
pub use riscv64::Backend as CurrentBackend;

#[cfg(not(any(
    target_arch = "aarch64",
    target_arch = "arm",
    target_arch = "x86_64",
    target_arch = "x86",
    target_arch = "riscv64"
)))]
compile_error!("coredump has no architecture backend for this target (§7: Unsupported architecture)");

pub(crate) fn reachable_u64(regs: &[u64], vma: &VirtualMemoryArea) -> bool {
    regs.iter().any(|&r| vma.contains(r))
}

pub(crate) fn reachable_u32(regs: &[u32], vma: &VirtualMemoryArea) -> bool {
    regs.iter().any(|&r| vma.contains(r as u64))
}
