//! Virtual memory area model and `/proc/<pid>/maps` parsing (§3, §4.3).

use std::fs;
use tracing::warn;

/// One line of `/proc/<pid>/maps`. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualMemoryArea {
    pub begin: u64,
    pub end: u64,
    /// `r/w/x/p|s` in source order, `-` where the bit is clear.
    pub flags: [char; 4],
    pub offset: u64,
    pub major: u32,
    pub minor: u32,
    pub inode: u64,
    /// Backing file / pseudo-path (`[heap]`, `[anon:...]`, ...), empty for
    /// anonymous mappings with no name.
    pub path: String,
}

impl VirtualMemoryArea {
    pub fn readable(&self) -> bool {
        self.flags[0] == 'r'
    }

    pub fn writable(&self) -> bool {
        self.flags[1] == 'w'
    }

    pub fn executable(&self) -> bool {
        self.flags[2] == 'x'
    }

    pub fn shared(&self) -> bool {
        matches!(self.flags[3], 's' | 'S')
    }

    pub fn memsz(&self) -> u64 {
        self.end - self.begin
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.begin && addr < self.end
    }
}

/// Parses one line in the format emitted by the kernel's `/proc/<pid>/maps`:
/// `begin-end rwxp offset maj:min inode path`. `path` is optional and may
/// contain spaces; everything after the inode field, trimmed, is taken
/// verbatim as the path.
fn parse_line(line: &str) -> Option<VirtualMemoryArea> {
    let mut fields = line.splitn(6, ' ').filter(|s| !s.is_empty());

    let range = fields.next()?;
    let (begin_s, end_s) = range.split_once('-')?;
    let begin = u64::from_str_radix(begin_s, 16).ok()?;
    let end = u64::from_str_radix(end_s, 16).ok()?;

    let perms = fields.next()?;
    let mut flags = ['-'; 4];
    for (i, c) in perms.chars().take(4).enumerate() {
        flags[i] = c;
    }

    let offset = u64::from_str_radix(fields.next()?, 16).ok()?;

    let dev = fields.next()?;
    let (maj_s, min_s) = dev.split_once(':')?;
    let major = u32::from_str_radix(maj_s, 16).ok()?;
    let minor = u32::from_str_radix(min_s, 16).ok()?;

    let inode = fields.next()?.parse::<u64>().ok()?;

    let path = fields.next().unwrap_or("").trim_start().to_string();

    Some(VirtualMemoryArea {
        begin,
        end,
        flags,
        offset,
        major,
        minor,
        inode,
        path,
    })
}

/// Reads and parses every VMA of `pid`. Lines that fail to parse are
/// logged and skipped rather than aborting the whole scan — a partially
/// readable `/proc/<pid>/maps` should not prevent dumping the VMAs that
/// did parse.
pub fn parse_maps(pid: i32) -> std::io::Result<Vec<VirtualMemoryArea>> {
    let contents = fs::read_to_string(format!("/proc/{pid}/maps"))?;
    let mut vmas = Vec::new();
    for line in contents.lines() {
        match parse_line(line) {
            Some(vma) => vmas.push(vma),
            None => warn!("failed to parse maps line: {line}"),
        }
    }
    Ok(vmas)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_anonymous_mapping() {
        let line = "55a1b2c00000-55a1b2c21000 rw-p 00000000 00:00 0                          [heap]";
        let vma = parse_line(line).unwrap();
        assert_eq!(vma.begin, 0x55a1b2c00000);
        assert_eq!(vma.end, 0x55a1b2c21000);
        assert!(vma.readable());
        assert!(vma.writable());
        assert!(!vma.executable());
        assert!(!vma.shared());
        assert_eq!(vma.path, "[heap]");
    }

    #[test]
    fn parses_file_backed_shared_mapping() {
        let line = "7f2a1c000000-7f2a1c021000 rw-s 00001000 08:01 131203                     /memfd:foo";
        let vma = parse_line(line).unwrap();
        assert!(vma.shared());
        assert_eq!(vma.inode, 131203);
        assert_eq!(vma.major, 0x08);
        assert_eq!(vma.minor, 0x01);
        assert_eq!(vma.path, "/memfd:foo");
    }

    #[test]
    fn parses_line_with_no_path() {
        let line = "7f2a1c000000-7f2a1c021000 rw-p 00000000 00:00 0 ";
        let vma = parse_line(line).unwrap();
        assert_eq!(vma.path, "");
    }

    #[test]
    fn rejects_malformed_line() {
        assert!(parse_line("not a maps line").is_none());
    }

    #[test]
    fn memsz_is_end_minus_begin() {
        let vma = parse_line("1000-2000 r--p 0 00:00 0").unwrap();
        assert_eq!(vma.memsz(), 0x1000);
    }
}
