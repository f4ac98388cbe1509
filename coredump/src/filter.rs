//! VMA filter policy (§4.3): decides whether a segment's payload bytes
//! are emitted, suppressed, or forced to be kept.

use crate::config::filter as bit;
use crate::vma::VirtualMemoryArea;
use std::io::Read;
use tracing::debug;

/// Tri-state filter verdict. `Include` always wins over `Null`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmaVerdict {
    Normal,
    Null,
    Include,
}

impl VmaVerdict {
    /// Combines two verdicts for the same VMA, per §4.3: `Include` beats
    /// everything, `Null` beats `Normal`.
    pub fn merge(self, other: VmaVerdict) -> VmaVerdict {
        use VmaVerdict::*;
        match (self, other) {
            (Include, _) | (_, Include) => Include,
            (Null, _) | (_, Null) => Null,
            _ => Normal,
        }
    }
}

const SPECIAL_PATHS: [&str; 4] = [
    "/dev/binderfs/hwbinder",
    "/dev/binderfs/binder",
    "[vvar]",
    "/dev/mali0",
];

const SHADOW_PATHS: [&str; 2] = ["[anon:low shadow]", "[anon:high shadow]"];
const SHADOW_PREFIX: &str = "[anon:hwasan";
const JAVAHEAP_PREFIX: &str = "[anon:dalvik";
const JIT_CACHE_PREFIX: &str = "/memfd:jit";

fn is_special(vma: &VirtualMemoryArea) -> bool {
    SPECIAL_PATHS.contains(&vma.path.as_str())
}

fn is_sanitizer_shadow(vma: &VirtualMemoryArea) -> bool {
    SHADOW_PATHS.contains(&vma.path.as_str()) || vma.path.starts_with(SHADOW_PREFIX)
}

fn is_non_read(vma: &VirtualMemoryArea) -> bool {
    vma.flags == ['-', '-', '-', '-']
}

fn is_javaheap(vma: &VirtualMemoryArea) -> bool {
    vma.path.starts_with(JAVAHEAP_PREFIX)
}

fn is_jit_cache(vma: &VirtualMemoryArea) -> bool {
    vma.path.starts_with(JIT_CACHE_PREFIX)
}

/// The read-only-file heuristic of §4.3: a VMA whose file offset lies
/// inside a read-only `PT_LOAD` of its own backing ELF file is
/// reconstructible from disk and can be suppressed.
///
/// Any probe failure (open/read/magic mismatch/machine mismatch) yields
/// `false` — "do not suppress". This deliberately diverges from the
/// historical engine, whose probe defaulted to "suppress" on every
/// early-return path; see DESIGN.md.
fn is_reconstructible_from_file(vma: &VirtualMemoryArea, expected_machine: u16) -> bool {
    probe_reconstructible(vma, expected_machine).unwrap_or_else(|| {
        debug!(
            "read-only-file probe failed for {}, treating as non-reconstructible",
            vma.path
        );
        false
    })
}

/// Returns `None` on any probe failure, `Some(bool)` on a conclusive
/// answer. Kept separate from `is_reconstructible_from_file` so the
/// fail-open policy is a single, visible `unwrap_or` rather than buried
/// in early returns.
fn probe_reconstructible(vma: &VirtualMemoryArea, expected_machine: u16) -> Option<bool> {
    if vma.inode == 0 || vma.writable() {
        return Some(false);
    }

    let mut file = std::fs::File::open(&vma.path).ok()?;
    let mut ehdr = [0u8; 64];
    file.read_exact(&mut ehdr[..16]).ok()?;
    if ehdr[0..4] != crate::elf::ELFMAG {
        return None;
    }
    let class = ehdr[4];
    let is64 = class == crate::elf::ELFCLASS64;
    let ehdr_len = if is64 { 64 } else { 52 };
    file.read_exact(&mut ehdr[16..ehdr_len]).ok()?;

    let machine = u16::from_le_bytes([ehdr[18], ehdr[19]]);
    if machine != expected_machine {
        return None;
    }

    let (phoff, phentsize, phnum): (u64, u16, u16) = if is64 {
        (
            u64::from_le_bytes(ehdr[32..40].try_into().unwrap()),
            u16::from_le_bytes(ehdr[54..56].try_into().unwrap()),
            u16::from_le_bytes(ehdr[56..58].try_into().unwrap()),
        )
    } else {
        (
            u32::from_le_bytes(ehdr[28..32].try_into().unwrap()) as u64,
            u16::from_le_bytes(ehdr[42..44].try_into().unwrap()),
            u16::from_le_bytes(ehdr[44..46].try_into().unwrap()),
        )
    };

    use std::io::{Seek, SeekFrom};
    file.seek(SeekFrom::Start(phoff)).ok()?;
    let mut phdr_buf = vec![0u8; (phentsize as usize) * (phnum as usize)];
    file.read_exact(&mut phdr_buf).ok()?;

    for i in 0..phnum as usize {
        let entry = &phdr_buf[i * phentsize as usize..(i + 1) * phentsize as usize];
        let (p_type, p_flags, p_offset, p_filesz): (u32, u32, u64, u64) = if is64 {
            (
                u32::from_le_bytes(entry[0..4].try_into().unwrap()),
                u32::from_le_bytes(entry[4..8].try_into().unwrap()),
                u64::from_le_bytes(entry[8..16].try_into().unwrap()),
                u64::from_le_bytes(entry[32..40].try_into().unwrap()),
            )
        } else {
            (
                u32::from_le_bytes(entry[0..4].try_into().unwrap()),
                u32::from_le_bytes(entry[24..28].try_into().unwrap()),
                u32::from_le_bytes(entry[4..8].try_into().unwrap()) as u64,
                u32::from_le_bytes(entry[16..20].try_into().unwrap()) as u64,
            )
        };

        if p_type != crate::elf::PT_LOAD {
            continue;
        }
        let in_range = vma.offset >= p_offset && vma.offset < p_offset + p_filesz;
        if in_range {
            return Some(p_flags & crate::elf::PF_W == 0);
        }
    }
    Some(false)
}

/// Classifies one VMA against the enabled filter bits and, when
/// `FILTER_MINIDUMP` is set, the faulting thread's registers.
pub fn classify(
    vma: &VirtualMemoryArea,
    filter_flags: u32,
    expected_machine: u16,
    minidump_reachable: bool,
) -> VmaVerdict {
    let mut verdict = VmaVerdict::Normal;

    if filter_flags & bit::SPECIAL_VMA != 0 && is_special(vma) {
        verdict = verdict.merge(VmaVerdict::Null);
    }
    if filter_flags & bit::FILE_VMA != 0 && is_reconstructible_from_file(vma, expected_machine) {
        verdict = verdict.merge(VmaVerdict::Null);
    }
    if filter_flags & bit::SHARED_VMA != 0 && vma.shared() {
        verdict = verdict.merge(VmaVerdict::Null);
    }
    if filter_flags & bit::SANITIZER_SHADOW_VMA != 0 && is_sanitizer_shadow(vma) {
        verdict = verdict.merge(VmaVerdict::Null);
    }
    if filter_flags & bit::NON_READ_VMA != 0 && is_non_read(vma) {
        verdict = verdict.merge(VmaVerdict::Null);
    }
    if filter_flags & bit::JAVAHEAP_VMA != 0 && is_javaheap(vma) {
        verdict = verdict.merge(VmaVerdict::Null);
    }
    if filter_flags & bit::JIT_CACHE_VMA != 0 && is_jit_cache(vma) {
        verdict = verdict.merge(VmaVerdict::Null);
    }
    if filter_flags & bit::MINIDUMP != 0 {
        verdict = verdict.merge(if minidump_reachable {
            VmaVerdict::Include
        } else {
            VmaVerdict::Null
        });
    }

    verdict
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vma(path: &str, flags: [char; 4]) -> VirtualMemoryArea {
        VirtualMemoryArea {
            begin: 0x1000,
            end: 0x2000,
            flags,
            offset: 0,
            major: 0,
            minor: 0,
            inode: 0,
            path: path.to_string(),
        }
    }

    #[test]
    fn special_vma_is_suppressed() {
        let v = vma("[vvar]", ['r', '-', '-', 'p']);
        assert_eq!(classify(&v, bit::SPECIAL_VMA, 0, false), VmaVerdict::Null);
    }

    #[test]
    fn unmatched_vma_stays_normal() {
        let v = vma("[heap]", ['r', 'w', '-', 'p']);
        assert_eq!(classify(&v, bit::SPECIAL_VMA, 0, false), VmaVerdict::Normal);
    }

    #[test]
    fn include_wins_over_null() {
        let v = vma("[vvar]", ['r', '-', '-', 'p']);
        let verdict = classify(&v, bit::SPECIAL_VMA | bit::MINIDUMP, 0, true);
        assert_eq!(verdict, VmaVerdict::Include);
    }

    #[test]
    fn shared_vma_is_suppressed_when_flagged() {
        let v = vma("/memfd:foo", ['r', 'w', '-', 's']);
        assert_eq!(classify(&v, bit::SHARED_VMA, 0, false), VmaVerdict::Null);
    }

    #[test]
    fn non_read_vma_is_suppressed_when_flagged() {
        let v = vma("", ['-', '-', '-', 'p']);
        assert_eq!(classify(&v, bit::NON_READ_VMA, 0, false), VmaVerdict::Null);
    }

    #[test]
    fn probe_failure_on_missing_file_does_not_suppress() {
        let v = VirtualMemoryArea {
            begin: 0,
            end: 0x1000,
            flags: ['r', '-', '-', 'p'],
            offset: 0,
            major: 0,
            minor: 0,
            inode: 1,
            path: "/nonexistent/path/to/lib.so".to_string(),
        };
        assert_eq!(classify(&v, bit::FILE_VMA, 0, false), VmaVerdict::Normal);
    }
}
