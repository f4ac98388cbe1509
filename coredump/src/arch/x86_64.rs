//! x86_64 backend: full `pt_regs` (27 general-purpose/segment fields).

use super::{reachable_u64, ArchBackend};
use crate::elf::WordSize;
use crate::thread::ptrace_getregset;
use crate::vma::VirtualMemoryArea;
use std::mem::size_of;

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct PtRegs {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub rbp: u64,
    pub rbx: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rax: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub orig_rax: u64,
    pub rip: u64,
    pub cs: u64,
    pub eflags: u64,
    pub rsp: u64,
    pub ss: u64,
    pub fs_base: u64,
    pub gs_base: u64,
    pub ds: u64,
    pub es: u64,
    pub fs: u64,
    pub gs: u64,
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
    const MACHINE: u16 = crate::elf::EM_X86_64;
    const WORD: WordSize = WordSize::Elf64;

    fn capture_ptrace(tid: i32) -> Vec<u8> {
        let mut buf = vec![0u8; size_of::<PtRegs>()];
        if !ptrace_getregset(tid, 1 /* NT_PRSTATUS */, &mut buf) {
            buf.fill(0);
        }
        buf
    }

    fn capture_ucontext(ucontext: &libc::ucontext_t) -> Vec<u8> {
        let g = &ucontext.uc_mcontext.gregs;
        let reg = |i: i32| g[i as usize] as u64;
        let regs = PtRegs {
            r15: reg(libc::REG_R15),
            r14: reg(libc::REG_R14),
            r13: reg(libc::REG_R13),
            r12: reg(libc::REG_R12),
            rbp: reg(libc::REG_RBP),
            rbx: reg(libc::REG_RBX),
            r11: reg(libc::REG_R11),
            r10: reg(libc::REG_R10),
            r9: reg(libc::REG_R9),
            r8: reg(libc::REG_R8),
            rax: reg(libc::REG_RAX),
            rcx: reg(libc::REG_RCX),
            rdx: reg(libc::REG_RDX),
            rsi: reg(libc::REG_RSI),
            rdi: reg(libc::REG_RDI),
            orig_rax: reg(libc::REG_RAX),
            rip: reg(libc::REG_RIP),
            eflags: reg(libc::REG_EFL),
            rsp: reg(libc::REG_RSP),
            // glibc's gregs packs cs/gs/fs/ss into REG_CSGSFS rather than
            // exposing them individually; not reconstructible from the
            // ucontext alone, left zero here (the ptrace-captured
            // snapshot for this thread carries the real values).
            ..Default::default()
        };
        regs_to_bytes(&regs)
    }

    fn minidump_reachable(regs: &[u8], vma: &VirtualMemoryArea) -> bool {
        reachable_u64(&bytes_to_u64s(regs), vma)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pt_regs_serializes_to_216_bytes() {
        assert_eq!(regs_to_bytes(&PtRegs::default()).len(), 216);
    }

    #[test]
    fn minidump_reachable_matches_rip_in_range() {
        let regs = PtRegs { rip: 0x401000, ..Default::default() };
        let bytes = regs_to_bytes(&regs);
        let vma = VirtualMemoryArea {
            begin: 0x400000,
            end: 0x402000,
            flags: ['r', '-', 'x', 'p'],
            offset: 0,
            major: 0,
            minor: 0,
            inode: 0,
            path: String::new(),
        };
        assert!(Backend::minidump_reachable(&bytes, &vma));
    }
}
