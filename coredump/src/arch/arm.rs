//! 32-bit arm backend: `pt_regs` (r0-r12, sp, lr, pc, cpsr).
//!
//! No arch-specific extra notes on this ISA. The corresponding
//! `elf_prstatus` must be written `packed` — handled in the orchestrator
//! where the full prstatus record is assembled, not here.

use super::{reachable_u32, ArchBackend};
use crate::elf::WordSize;
use crate::thread::ptrace_getregset;
use crate::vma::VirtualMemoryArea;
use std::mem::size_of;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct PtRegs {
    pub regs: [u32; 13], // r0..r12
    pub sp: u32,
    pub lr: u32,
    pub pc: u32,
    pub cpsr: u32,
}

fn regs_to_bytes(regs: &PtRegs) -> Vec<u8> {
    // SAFETY: all-u32 repr(C) struct, no padding.
    unsafe {
        std::slice::from_raw_parts(regs as *const PtRegs as *const u8, size_of::<PtRegs>()).to_vec()
    }
}

fn bytes_to_u32s(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
        .collect()
}

pub struct Backend;

impl ArchBackend for Backend {
    const MACHINE: u16 = crate::elf::EM_ARM;
    const WORD: WordSize = WordSize::Elf32;

    fn capture_ptrace(tid: i32) -> Vec<u8> {
        let mut buf = vec![0u8; size_of::<PtRegs>()];
        if !ptrace_getregset(tid, 1 /* NT_PRSTATUS */, &mut buf) {
            buf.fill(0);
        }
        buf
    }

    fn capture_ucontext(ucontext: &libc::ucontext_t) -> Vec<u8> {
        let mc = &ucontext.uc_mcontext;
        let regs = PtRegs {
            regs: [
                mc.arm_r0, mc.arm_r1, mc.arm_r2, mc.arm_r3, mc.arm_r4, mc.arm_r5, mc.arm_r6,
                mc.arm_r7, mc.arm_r8, mc.arm_r9, mc.arm_r10, mc.arm_fp, mc.arm_ip,
            ],
            sp: mc.arm_sp,
            lr: mc.arm_lr,
            pc: mc.arm_pc,
            cpsr: mc.arm_cpsr,
        };
        regs_to_bytes(&regs)
    }

    fn minidump_reachable(regs: &[u8], vma: &VirtualMemoryArea) -> bool {
        reachable_u32(&bytes_to_u32s(regs), vma)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pt_regs_serializes_to_68_bytes() {
        let regs = PtRegs { regs: [0; 13], sp: 0, lr: 0, pc: 0, cpsr: 0 };
        assert_eq!(regs_to_bytes(&regs).len(), 68);
    }

    #[test]
    fn minidump_reachable_matches_sp_in_range() {
        let regs = PtRegs { regs: [0; 13], sp: 0x3000, lr: 0, pc: 0, cpsr: 0 };
        let bytes = regs_to_bytes(&regs);
        let vma = VirtualMemoryArea {
            begin: 0x2000,
            end: 0x4000,
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
