//! aarch64 backend: `pt_regs`, `NT_FPREGSET`, `NT_ARM_TLS`, PAC/MTE notes.

use super::{reachable_u64, ArchBackend, ExtraNote};
use crate::elf::{WordSize, NT_ARM_PAC_ENABLED_KEYS, NT_ARM_PAC_MASK, NT_ARM_TAGGED_ADDR_CTRL, NT_ARM_TLS, NT_FPREGSET};
use crate::thread::ptrace_getregset;
use crate::vma::VirtualMemoryArea;
use std::mem::size_of;

/// Matches the kernel's `struct user_pt_regs` (272 bytes): this is what
/// `PTRACE_GETREGSET(NT_PRSTATUS)` returns and what `pr_reg` holds.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct PtRegs {
    pub regs: [u64; 31],
    pub sp: u64,
    pub pc: u64,
    pub pstate: u64,
}

const VA_BITS: u32 = 39;

fn genmask_ul(high: u32, low: u32) -> u64 {
    (u64::MAX << low) & (u64::MAX >> (63 - high))
}

fn regs_to_bytes(regs: &PtRegs) -> Vec<u8> {
    // SAFETY: PtRegs is `repr(C)`, contains only plain integers, and has
    // no padding given its all-u64 layout.
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
    const MACHINE: u16 = crate::elf::EM_AARCH64;
    const WORD: WordSize = WordSize::Elf64;

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
            regs: mc.regs,
            sp: mc.sp,
            pc: mc.pc,
            pstate: mc.pstate,
        };
        regs_to_bytes(&regs)
    }

    fn extra_notes(tid: i32) -> Vec<ExtraNote> {
        let mut notes = Vec::new();

        // NT_FPREGSET: kernel's struct user_fpsimd_state is 528 bytes
        // (32 x 16-byte V regs + fpsr + fpcr + padding).
        let mut fpregs = vec![0u8; 528];
        if !ptrace_getregset(tid, NT_FPREGSET as i32, &mut fpregs) {
            fpregs.fill(0);
        }
        notes.push(ExtraNote { name: "CORE", n_type: NT_FPREGSET, desc: fpregs });

        let mut tls = vec![0u8; 8];
        if !ptrace_getregset(tid, NT_ARM_TLS as i32, &mut tls) {
            tls.fill(0);
        }
        notes.push(ExtraNote { name: "LINUX", n_type: NT_ARM_TLS, desc: tls });

        let mut pac_mask = vec![0u8; 16];
        if !ptrace_getregset(tid, NT_ARM_PAC_MASK as i32, &mut pac_mask) {
            let mask = genmask_ul(54, VA_BITS);
            pac_mask[0..8].copy_from_slice(&mask.to_le_bytes());
            pac_mask[8..16].copy_from_slice(&mask.to_le_bytes());
        }
        notes.push(ExtraNote { name: "LINUX", n_type: NT_ARM_PAC_MASK, desc: pac_mask });

        let mut pac_keys = vec![0u8; 8];
        if !ptrace_getregset(tid, NT_ARM_PAC_ENABLED_KEYS as i32, &mut pac_keys) {
            pac_keys.copy_from_slice(&(-1i64).to_le_bytes());
        }
        notes.push(ExtraNote {
            name: "LINUX",
            n_type: NT_ARM_PAC_ENABLED_KEYS,
            desc: pac_keys,
        });

        let mut tagged_addr = vec![0u8; 8];
        if !ptrace_getregset(tid, NT_ARM_TAGGED_ADDR_CTRL as i32, &mut tagged_addr) {
            tagged_addr.copy_from_slice(&(-1i64).to_le_bytes());
        }
        notes.push(ExtraNote {
            name: "LINUX",
            n_type: NT_ARM_TAGGED_ADDR_CTRL,
            desc: tagged_addr,
        });

        notes
    }

    fn minidump_reachable(regs: &[u8], vma: &VirtualMemoryArea) -> bool {
        reachable_u64(&bytes_to_u64s(regs), vma)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pac_mask_fallback_matches_genmask_54_39() {
        let mask = genmask_ul(54, 39);
        assert_eq!(mask, 0x7F_FFFF_8000_0000);
    }

    #[test]
    fn pt_regs_serializes_to_272_bytes() {
        let regs = PtRegs { regs: [0; 31], sp: 0, pc: 0, pstate: 0 };
        assert_eq!(regs_to_bytes(&regs).len(), 272);
    }

    #[test]
    fn minidump_reachable_matches_pc_in_range() {
        let mut regs = PtRegs { regs: [0; 31], sp: 0, pc: 0x5000, pstate: 0 };
        regs.regs[0] = 0;
        let bytes = regs_to_bytes(&regs);
        let vma = VirtualMemoryArea {
            begin: 0x4000,
            end: 0x6000,
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
