//! Typed errors callers match on.
//!
//! Everything else flows through `anyhow`.

use std::path::PathBuf;

use thiserror::Error;

/// A snippet read was refused before touching the filesystem.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccessError {
    /// The path does not start with a known logical prefix.
    #[error("path outside memory roots: {0} (allowed: MEMORY.md, memory/, vault/, extra/, captured/)")]
    UnknownPrefix(String),

    /// The path contains a parent-directory component or is absolute.
    #[error("path traversal rejected: {0}")]
    Traversal(String),

    /// `extra/<i>/` names an index with no configured extra path.
    #[error("no extra path configured at index {index}: {path}")]
    UnknownExtra { index: String, path: String },

    /// The resolved file escapes its root, typically through a symlink.
    #[error("path resolves outside its root: {0}")]
    OutsideRoot(String),
}

/// An indexing pass could not start.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("vault directory missing or unreadable: {}", .0.display())]
    VaultMissing(PathBuf),
}
