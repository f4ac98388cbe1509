//! `elf_prstatus` descriptor construction (§3, §9): laid out bit-exactly,
//! byte by byte, rather than through a native struct — the 32-bit and
//! 64-bit kernel layouts disagree on padding in ways that differ from
//! what a naive `#[repr(C)]` struct would produce on a 32-bit target
//! (`timeval` is 2 longs either way, but the long's width changes the
//! padding ahead of `pr_sigpend`).

use crate::elf::WordSize;

/// Everything about the captured signal that `elf_prstatus` records
/// outside of the registers. `errno` is always written as 0: the
/// engine never has a meaningful POSIX errno associated with the fault.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalInfo {
    pub signo: i32,
    pub code: i32,
    pub cursig: i16,
}

/// Builds one thread's `elf_prstatus` descriptor: signal info, pid,
/// zeroed process/parent/group/session ids and timers (this engine has
/// no use for them and the historical source left them zeroed too),
/// the architecture's raw `pr_reg` bytes, and `pr_fpvalid = 0`.
pub fn build_prstatus_desc(word: WordSize, pid: i32, sig: SignalInfo, pr_reg: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();

    // pr_info: si_signo, si_code, si_errno
    buf.extend_from_slice(&sig.signo.to_le_bytes());
    buf.extend_from_slice(&sig.code.to_le_bytes());
    buf.extend_from_slice(&0i32.to_le_bytes()); // si_errno

    buf.extend_from_slice(&sig.cursig.to_le_bytes());

    match word {
        WordSize::Elf32 => {
            buf.extend_from_slice(&[0u8; 2]); // pad to 4-byte long alignment
            buf.extend_from_slice(&0u32.to_le_bytes()); // pr_sigpend
            buf.extend_from_slice(&0u32.to_le_bytes()); // pr_sighold
            buf.extend_from_slice(&pid.to_le_bytes()); // pr_pid
            buf.extend_from_slice(&0i32.to_le_bytes()); // pr_ppid
            buf.extend_from_slice(&0i32.to_le_bytes()); // pr_pgrp
            buf.extend_from_slice(&0i32.to_le_bytes()); // pr_sid
            buf.extend_from_slice(&[0u8; 8]); // pr_utime (32-bit timeval)
            buf.extend_from_slice(&[0u8; 8]); // pr_stime
            buf.extend_from_slice(&[0u8; 8]); // pr_cutime
            buf.extend_from_slice(&[0u8; 8]); // pr_cstime
        }
        WordSize::Elf64 => {
            // sigset_t is word-sized but only 4-byte aligned in the real
            // kernel elf_prstatus layout, not 8 — same 2-byte pad as Elf32.
            buf.extend_from_slice(&[0u8; 2]);
            buf.extend_from_slice(&0u64.to_le_bytes()); // pr_sigpend
            buf.extend_from_slice(&0u64.to_le_bytes()); // pr_sighold
            buf.extend_from_slice(&pid.to_le_bytes()); // pr_pid
            buf.extend_from_slice(&0i32.to_le_bytes()); // pr_ppid
            buf.extend_from_slice(&0i32.to_le_bytes()); // pr_pgrp
            buf.extend_from_slice(&0i32.to_le_bytes()); // pr_sid
            buf.extend_from_slice(&[0u8; 16]); // pr_utime (64-bit timeval)
            buf.extend_from_slice(&[0u8; 16]); // pr_stime
            buf.extend_from_slice(&[0u8; 16]); // pr_cutime
            buf.extend_from_slice(&[0u8; 16]); // pr_cstime
        }
    }

    buf.extend_from_slice(pr_reg);
    buf.extend_from_slice(&0i32.to_le_bytes()); // pr_fpvalid

    if word == WordSize::Elf64 {
        // struct alignment is 8 on LP64; pad the trailing int to a
        // multiple of 8 the way the compiler would.
        let rem = buf.len() % 8;
        if rem != 0 {
            buf.extend(std::iter::repeat(0u8).take(8 - rem));
        }
    }

    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elf64_prstatus_header_is_112_bytes_before_registers() {
        let desc = build_prstatus_desc(WordSize::Elf64, 1234, SignalInfo::default(), &[]);
        // pr_info(12) + cursig(2) + pad(2) + sigpend(8) + sighold(8)
        // + pid/ppid/pgrp/sid(16) + 4*timeval(64) = 112 bytes before pr_reg,
        // then pr_fpvalid(4) with no registers, padded up to a multiple of
        // 8 (116 -> 120).
        assert_eq!(desc.len(), 112 + 8);
    }

    #[test]
    fn elf32_prstatus_header_is_72_bytes_before_registers() {
        let desc = build_prstatus_desc(WordSize::Elf32, 1234, SignalInfo::default(), &[]);
        // pr_info(12) + cursig(2) + pad(2) + sigpend(4) + sighold(4)
        // + pid/ppid/pgrp/sid(16) + 4*timeval(32) = 72, then pr_fpvalid(4).
        assert_eq!(desc.len(), 72 + 4);
    }

    #[test]
    fn pid_is_written_at_the_documented_offset() {
        let desc = build_prstatus_desc(WordSize::Elf64, 4100, SignalInfo::default(), &[]);
        // info(12) + cursig(2) + pad(2) = 16, + sigpend(8) + sighold(8) = 32.
        let pid = i32::from_le_bytes(desc[32..36].try_into().unwrap());
        assert_eq!(pid, 4100);
    }

    #[test]
    fn registers_are_embedded_verbatim() {
        let regs = vec![0xAAu8; 216];
        let desc = build_prstatus_desc(WordSize::Elf64, 1, SignalInfo::default(), &regs);
        assert_eq!(&desc[112..112 + 216], regs.as_slice());
    }
}
