//! 32-bit x86 backend: `pt_regs` with the kernel's explicit segment
//! register padding (`ds`/`__ds`, `es`/`__es`, ...).

use super::{reachable_u32, ArchBackend};
use crate::elf::WordSize;
use crate::thread::ptrace_getregset;
use crate::vma::VirtualMemoryArea;
use std::mem::size_of;

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct PtRegs {
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
    pub esi: u32,
    pub edi: u32,
    pub ebp: u32,
    pub eax: u32,
    pub ds: u32,
    pub __ds: u32,
    pub es: u32,
    pub __es: u32,
    pub fs: u32,
    pub __fs: u32,
    pub gs: u32,
    pub __gs: u32,
    pub orig_eax: u32,
    pub eip: u32,
    pub cs: u32,
    pub __cs: u32,
    pub eflags: u32,
    pub esp: u32,
    pub ss: u32,
    pub __ss: u32,
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
    const MACHINE: u16 = crate::elf::EM_386;
    const WORD: WordSize = WordSize::Elf32;

    fn capture_ptrace(tid: i32) -> Vec<u8> {
        let mut buf = vec![0u8; size_of::<PtRegs>()];
        if !ptrace_getregset(tid, 1 /* NT_PRSTATUS */, &mut buf) {
            buf.fill(0);
        }
        buf
    }

    fn capture_ucontext(ucontext: &libc::ucontext_t) -> Vec<u8> {
        let g = &ucontext.uc_mcontext.gregs;
        let reg = |i: i32| g[i as usize] as u32;
        let regs = PtRegs {
            ebx: reg(libc::REG_EBX),
            ecx: reg(libc::REG_ECX),
            edx: reg(libc::REG_EDX),
            esi: reg(libc::REG_ESI),
            edi: reg(libc::REG_EDI),
            ebp: reg(libc::REG_EBP),
            eax: reg(libc::REG_EAX),
            orig_eax: reg(libc::REG_EAX),
            eip: reg(libc::REG_EIP),
            eflags: reg(libc::REG_EFL),
            esp: reg(libc::REG_UESP),
            ..Default::default()
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
    fn pt_regs_serializes_to_92_bytes() {
        assert_eq!(regs_to_bytes(&PtRegs::default()).len(), 92);
    }
}
