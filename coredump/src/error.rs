//! Error type for the small surface of operations that can fail before
//! per-dump best-effort suppression takes over.
//!
//! Everything inside the dump's inner loop (per-page reads, per-thread
//! attach) is logged and swallowed so the best-effort core still completes;
//! it never reaches this type. See the orchestrator module for that split.

/// Errors returned by the public engine API.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("signal handler install/restore failed: {0}")]
    Sigaction(#[source] std::io::Error),

    #[error("fork() failed: {0}")]
    Fork(#[source] nix::errno::Errno),

    #[error("architecture is not supported by this build")]
    UnsupportedArch,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
