//! Process-wide, runtime-mutable engine configuration.
//!
//! `EngineConfig` is reached primarily through the setter contract
//! (`set_dir`, `set_flag`, `set_filter`, `set_timeout`, `set_callback`).
//! The `serde` derive and [`EngineConfig::load`] are a convenience layer
//! on top of that contract, not a replacement for it, mirroring how
//! `archon`'s `ArchonConfig` can be loaded from disk but is otherwise
//! just a plain struct passed around by value.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Filename-composition flag bits (§6).
pub mod flag {
    pub const CORE: u32 = 1;
    pub const PROCESS_COMM: u32 = 2;
    pub const PID: u32 = 4;
    pub const THREAD_COMM: u32 = 8;
    pub const TID: u32 = 16;
    pub const TIMESTAMP: u32 = 32;
    pub const ALL: u32 = CORE | PROCESS_COMM | PID | THREAD_COMM | TID | TIMESTAMP;
    /// Applied when the caller leaves the flag set at zero.
    pub const DEFAULT: u32 = CORE | TID;
}

/// VMA filter flag bits (§4.3).
pub mod filter {
    pub const SPECIAL_VMA: u32 = 1;
    pub const FILE_VMA: u32 = 2;
    pub const SHARED_VMA: u32 = 4;
    pub const SANITIZER_SHADOW_VMA: u32 = 8;
    pub const NON_READ_VMA: u32 = 16;
    pub const SIGNAL_CONTEXT: u32 = 32;
    pub const MINIDUMP: u32 = 64;
    pub const JAVAHEAP_VMA: u32 = 128;
    pub const JIT_CACHE_VMA: u32 = 256;
}

fn default_dir() -> String {
    "/data/tombstones".to_string()
}

fn default_flag() -> u32 {
    flag::DEFAULT
}

fn default_filter() -> u32 {
    0
}

fn default_timeout() -> u32 {
    120 // DEF_TIMEOUT, preserved from the historical engine
}

/// Process-wide dump configuration.
///
/// The `callback` field is intentionally excluded from (de)serialization:
/// a function pointer has no on-disk representation, and is always set
/// through [`crate::set_callback`] at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_dir")]
    pub dir: String,

    #[serde(default = "default_flag")]
    pub flag: u32,

    #[serde(default = "default_filter")]
    pub filter: u32,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,

    #[serde(skip, default)]
    pub callback: Option<CompletionCallback>,
}

/// `fn(final_path: &str)` invoked on the dumping thread once the file
/// exists on disk (or has been attempted). See §6.
pub type CompletionCallback = fn(&str);

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            flag: default_flag(),
            filter: default_filter(),
            timeout_secs: default_timeout(),
            callback: None,
        }
    }
}

impl EngineConfig {
    /// Loads configuration from a YAML file, falling back to defaults
    /// when the file does not exist. Mirrors `archon::config::load_config`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Ok(serde_yaml::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn effective_flag(&self) -> u32 {
        if self.flag == 0 {
            flag::DEFAULT
        } else {
            self.flag
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_core_and_tid() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.effective_flag(), flag::CORE | flag::TID);
        assert_eq!(cfg.timeout_secs, 120);
    }

    #[test]
    fn zero_flag_falls_back_to_default() {
        let mut cfg = EngineConfig::default();
        cfg.flag = 0;
        assert_eq!(cfg.effective_flag(), flag::DEFAULT);
    }

    #[test]
    fn load_missing_file_yields_default() {
        let cfg = EngineConfig::load(Path::new("/nonexistent/path/to/config.yaml")).unwrap();
        assert_eq!(cfg.dir, default_dir());
    }
}
