//! riscv64 backend: `pt_regs` (pc, ra, sp, gp, tp, t0-t6, s0-s11, a0-a7).

use super::{reachable_u64, ArchBackend};
use crate::elf::WordSize;
use crate::thread::ptrace_getregset;
use crate::vma::VirtualMemoryArea;
use std::mem::size_of;

/// Matches the kernel's `struct user_regs_struct` (32 general registers,
/// 256 bytes), which is also the layout of `sc_regs`, the leading member
/// of glibc's riscv64 `mcontext_t` — so a raw byte copy of the front of
/// `uc_mcontext` is a valid `pt_regs` snapshot.
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct PtRegs {
    pub pc: u64,
    pub ra: u64,
    pub sp: u64,
    pub gp: u64,
    pub tp: u64,
    pub t0: u64,
    pub t1: u64,
    pub t2: u64,
    pub s0: u64,
    pub s1: u64,
    pub a0: u64,
    pub a1: u64,
    pub a2: u64,
    pub a3: u64,
    pub a4: u64,
    pub a5: u64,
    pub a6: u64,
    pub a7: u64,
    pub s2: u64,
    pub s3: u64,
    pub s4: u64,
    pub s5: u64,
    pub s6: u64,
    pub s7: u64,
    pub s8: u64,
    pub s9: u64,
    pub s10: u64,
    pub s11: u64,
    pub t3: u64,
    pub t4: u64,
    pub t5: u64,
    pub t6: u64,
}

fn regs_to_bytes(regs: &PtRegs) -> Vec<u8> {
    // SAFETY: all-u64 repr(C) struct, no padding.
    unsafe {
        std::slice::from_raw_parts(regs as *const PtRegs as *const u8, size_of::<PtRegs>()).to_vec()
    }
}

fn bytes_to_u64s(bytes: &[u8]) -> Vec<u64> {
    bytes
        .chunks_exact(8)
        .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
        .collect()
}

pub struct Backend;

impl ArchBackend for Backend {
    const MACHINE: u16 = crate::elf::EM_RISCV;
    const WORD: WordSize = WordSize::Elf64;

    fn capture_ptrace(tid: i32) -> Vec<u8> {
        let mut buf = vec![0u8; size_of::<PtRegs>()];
        if !ptrace_getregset(tid, 1 /* NT_PRSTATUS */, &mut buf) {
            buf.fill(0);
        }
        buf
    }

    fn capture_ucontext(ucontext: &libc::ucontext_t) -> Vec<u8> {
        let src = &ucontext.uc_mcontext as *const _ as *const u8;
        // SAFETY: `sc_regs` is the first 256 bytes of `mcontext_t` on
        // riscv64 and `uc_mcontext` is fully initialized by the kernel
        // before the handler runs.
        let bytes = unsafe { std::slice::from_raw_parts(src, size_of::<PtRegs>()) };
        bytes.to_vec()
    }

    fn minidump_reachable(regs: &[u8], vma: &VirtualMemoryArea) -> bool {
        reachable_u64(&bytes_to_u64s(regs), vma)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pt_regs_serializes_to_256_bytes() {
        assert_eq!(regs_to_bytes(&PtRegs::default()).len(), 256);
    }

    #[test]
    fn minidump_reachable_matches_sp_in_range() {
        let regs = PtRegs { sp: 0x9000, ..Default::default() };
        let bytes = regs_to_bytes(&regs);
        let vma = VirtualMemoryArea {
            begin: 0x8000,
            end: 0xa000,
            flags: ['r', 'w', '-', 'p'],
            offset: 0,
            major: 0,
            minor: 0,
            inode: 0,
            path: String::new(),
        };
        assert!(Backend::minidump_reachable(&bytes, &vma));
    }
}
