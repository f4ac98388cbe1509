//! AUXV and NT_FILE note bodies (§3, §4.4).

use crate::elf::{align4, WordSize};
use crate::vma::VirtualMemoryArea;
use std::fs;
use tracing::warn;

/// One (type, value) pair from `/proc/<pid>/auxv`, word-sized for the
/// target ISA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuxvEntry {
    pub a_type: u64,
    pub a_val: u64,
}

const AT_NULL: u64 = 0;

/// Reads `/proc/<pid>/auxv` verbatim and decodes it into (type, value)
/// pairs up to and including the terminating `AT_NULL` entry. The kernel
/// writes this file as a flat array of word-sized pairs, so a single
/// read is enough — no separate sizing pass is needed the way a fixed
/// C buffer would require.
pub fn parse_auxv(pid: i32, word: WordSize) -> std::io::Result<Vec<AuxvEntry>> {
    let raw = fs::read(format!("/proc/{pid}/auxv"))?;
    let pair_size = (word.word_bytes() * 2) as usize;
    let mut entries = Vec::with_capacity(raw.len() / pair_size.max(1));

    for chunk in raw.chunks(pair_size) {
        if chunk.len() < pair_size {
            warn!("truncated auxv entry for pid {pid}, ignoring trailing bytes");
            break;
        }
        let (type_bytes, val_bytes) = chunk.split_at(pair_size / 2);
        let (a_type, a_val) = match word {
            WordSize::Elf32 => (
                u32::from_le_bytes(type_bytes.try_into().unwrap()) as u64,
                u32::from_le_bytes(val_bytes.try_into().unwrap()) as u64,
            ),
            WordSize::Elf64 => (
                u64::from_le_bytes(type_bytes.try_into().unwrap()),
                u64::from_le_bytes(val_bytes.try_into().unwrap()),
            ),
        };
        let done = a_type == AT_NULL;
        entries.push(AuxvEntry { a_type, a_val });
        if done {
            break;
        }
    }
    Ok(entries)
}

/// Serializes an AUXV descriptor: a flat array of word-sized (type,
/// value) pairs, in read order.
pub fn build_auxv_desc(word: WordSize, entries: &[AuxvEntry]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(entries.len() * word.word_bytes() as usize * 2);
    for e in entries {
        push_word(&mut buf, word, e.a_type);
        push_word(&mut buf, word, e.a_val);
    }
    buf
}

fn push_word(buf: &mut Vec<u8>, word: WordSize, value: u64) {
    match word {
        WordSize::Elf32 => buf.extend_from_slice(&(value as u32).to_le_bytes()),
        WordSize::Elf64 => buf.extend_from_slice(&value.to_le_bytes()),
    }
}

/// One file-backed mapping record inside `NT_FILE` (§3, §4.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NtFileEntry {
    pub begin: u64,
    pub end: u64,
    /// File offset of `begin`, in units of `page_size`.
    pub offset_pages: u64,
}

/// All VMAs get a slot in the `NT_FILE` table, not just file-backed ones:
/// an anonymous or pseudo mapping is named by its (possibly empty) `path`
/// field verbatim, the same as a real backing file would be.
pub fn nt_file_vmas(vmas: &[VirtualMemoryArea]) -> Vec<&VirtualMemoryArea> {
    vmas.iter().collect()
}

/// Builds the `NT_FILE` descriptor: `count`, `page_size`, N `NtFileEntry`
/// records, then N NUL-terminated path strings packed end to end,
/// zero-padded to a 4-byte boundary. `count` is the total VMA count, the
/// same N used throughout the rest of the note segment — anonymous
/// mappings are included with an empty path string, never dropped.
pub fn build_nt_file_desc(word: WordSize, page_size: u64, vmas: &[&VirtualMemoryArea]) -> Vec<u8> {
    let mut buf = Vec::new();
    push_word(&mut buf, word, vmas.len() as u64);
    push_word(&mut buf, word, page_size);

    for v in vmas {
        push_word(&mut buf, word, v.begin);
        push_word(&mut buf, word, v.end);
        push_word(&mut buf, word, v.offset / page_size);
    }

    let mut names_len: u64 = 0;
    for v in vmas {
        buf.extend_from_slice(v.path.as_bytes());
        buf.push(0);
        names_len += v.path.len() as u64 + 1;
    }
    let padded = align4(names_len) - names_len;
    buf.extend(std::iter::repeat(0u8).take(padded as usize));
    buf
}

/// `descsz` for the resulting `NT_FILE` note, per §3's formula.
pub fn nt_file_descsz(word: WordSize, vmas: &[&VirtualMemoryArea]) -> u64 {
    let entry_size = word.word_bytes() * 3;
    let fileslen: u64 = vmas.iter().map(|v| v.path.len() as u64 + 1).sum();
    entry_size * vmas.len() as u64 + 2 * word.word_bytes() + align4(fileslen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vma::VirtualMemoryArea;

    fn vma(begin: u64, end: u64, offset: u64, inode: u64, path: &str) -> VirtualMemoryArea {
        VirtualMemoryArea {
            begin,
            end,
            flags: ['r', '-', '-', 'p'],
            offset,
            major: 0,
            minor: 0,
            inode,
            path: path.to_string(),
        }
    }

    #[test]
    fn nt_file_vmas_includes_anonymous_and_pseudo_paths() {
        let vmas = vec![
            vma(0x1000, 0x2000, 0, 0, ""),
            vma(0x2000, 0x3000, 0, 0, "[heap]"),
            vma(0x3000, 0x4000, 0x1000, 42, "/lib/libc.so"),
        ];
        let all = nt_file_vmas(&vmas);
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].path, "");
        assert_eq!(all[1].path, "[heap]");
        assert_eq!(all[2].path, "/lib/libc.so");
    }

    #[test]
    fn nt_file_desc_contains_count_and_page_size_header() {
        let vmas = vec![
            vma(0x1000, 0x2000, 0x0, 0, ""),
            vma(0x2000, 0x3000, 0x0, 7, "/bin/true"),
        ];
        let refs: Vec<&VirtualMemoryArea> = vmas.iter().collect();
        let desc = build_nt_file_desc(WordSize::Elf64, 4096, &refs);
        let count = u64::from_le_bytes(desc[0..8].try_into().unwrap());
        let page_size = u64::from_le_bytes(desc[8..16].try_into().unwrap());
        assert_eq!(count, 2);
        assert_eq!(page_size, 4096);
        assert_eq!(desc.len() as u64, nt_file_descsz(WordSize::Elf64, &refs));
    }

    #[test]
    fn auxv_desc_roundtrips_type_value_pairs() {
        let entries = vec![
            AuxvEntry { a_type: 6, a_val: 4096 },
            AuxvEntry { a_type: 0, a_val: 0 },
        ];
        let desc = build_auxv_desc(WordSize::Elf64, &entries);
        assert_eq!(desc.len(), 32);
        assert_eq!(u64::from_le_bytes(desc[0..8].try_into().unwrap()), 6);
    }
}
