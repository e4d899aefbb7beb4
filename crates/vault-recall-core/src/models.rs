//! Core data models shared by the indexer, the query engine, and the
//! capture pipeline.
//!
//! # Logical paths
//!
//! Every indexed file is addressed by a logical path whose prefix names the
//! root it came from:
//!
//! | Prefix          | Root                                   | [`MemorySource`] |
//! |-----------------|----------------------------------------|------------------|
//! | `vault/`        | the note vault                         | `vault`          |
//! | `MEMORY.md`     | the workspace's core memory file       | `workspace`      |
//! | `memory/`       | the workspace's session memory folder  | `workspace`      |
//! | `extra/<i>/`    | the i-th configured extra path         | `workspace`      |
//! | `captured/`     | facts captured from conversation       | `captured`       |
//!
//! # Point ids
//!
//! The vector store accepts unsigned integer point ids, and JSON clients
//! lose precision above 2^53. Ids are therefore the first eight bytes of a
//! SHA-256 digest folded into 53 bits (see [`point_id`]).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Largest id representable without loss as a JSON number.
pub const POINT_ID_MASK: u64 = (1u64 << 53) - 1;

/// Logical prefix for vault files.
pub const VAULT_PREFIX: &str = "vault/";
/// Logical path of the workspace core memory file.
pub const MEMORY_FILE: &str = "MEMORY.md";
/// Logical prefix for the workspace session memory folder.
pub const MEMORY_DIR_PREFIX: &str = "memory/";
/// Logical prefix for configured extra paths.
pub const EXTRA_PREFIX: &str = "extra/";
/// Logical prefix for captured conversational facts.
pub const CAPTURED_PREFIX: &str = "captured/";

/// A line-bounded slice of a source file.
///
/// Chunks are recreated on every indexing pass of their file and never
/// mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    /// Point id, see [`chunk_point_id`].
    pub id: u64,
    /// Logical path of the source file.
    pub file: String,
    /// First line covered, 1-based.
    pub start_line: usize,
    /// Last line covered, 1-based and inclusive.
    pub end_line: usize,
    pub text: String,
    /// SHA-256 hex digest of `text`.
    pub hash: String,
}

/// Where a search hit came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemorySource {
    Vault,
    Workspace,
    Captured,
}

impl MemorySource {
    /// Derive the source from a logical path prefix.
    pub fn from_file(file: &str) -> Self {
        if file.starts_with(VAULT_PREFIX) {
            MemorySource::Vault
        } else if file.starts_with(CAPTURED_PREFIX) {
            MemorySource::Captured
        } else {
            MemorySource::Workspace
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MemorySource::Vault => "vault",
            MemorySource::Workspace => "workspace",
            MemorySource::Captured => "captured",
        }
    }
}

impl fmt::Display for MemorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category assigned to a captured conversational fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureCategory {
    Preference,
    Project,
    Personal,
    Other,
}

impl CaptureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureCategory::Preference => "preference",
            CaptureCategory::Project => "project",
            CaptureCategory::Personal => "personal",
            CaptureCategory::Other => "other",
        }
    }

    /// The pseudo-file captured facts of this category are stored under.
    pub fn pseudo_file(&self) -> String {
        format!("{}{}", CAPTURED_PREFIX, self.as_str())
    }
}

impl fmt::Display for CaptureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CaptureCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "preference" => Ok(CaptureCategory::Preference),
            "project" => Ok(CaptureCategory::Project),
            "personal" => Ok(CaptureCategory::Personal),
            "other" => Ok(CaptureCategory::Other),
            other => anyhow::bail!(
                "Unknown capture category: {}. Use preference, project, personal, or other.",
                other
            ),
        }
    }
}

/// A durable fact extracted from conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedMemory {
    pub id: u64,
    pub text: String,
    pub category: CaptureCategory,
    /// Unix epoch milliseconds.
    pub captured_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
}

/// One ranked answer from the hybrid query engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySearchResult {
    pub id: u64,
    pub file: String,
    pub start_line: usize,
    pub end_line: usize,
    pub snippet: String,
    pub score: f64,
    pub source: MemorySource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related: Option<Vec<String>>,
}

/// SHA-256 hex digest of `text`.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Fold a stable key into the 53-bit point id space.
pub fn point_id(key: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes) & POINT_ID_MASK
}

/// Point id of the chunk covering `start..=end` of `file`.
pub fn chunk_point_id(file: &str, start_line: usize, end_line: usize) -> u64 {
    point_id(&format!("{}:{}-{}", file, start_line, end_line))
}

/// Point id of a chunk that starts or ends inside a hard-split line. Each
/// bound is `(line, piece)` where `piece` is the segment ordinal in that line.
pub fn split_chunk_point_id(file: &str, start: (usize, usize), end: (usize, usize)) -> u64 {
    point_id(&format!("{}:{}.{}-{}.{}", file, start.0, start.1, end.0, end.1))
}

/// Point id of a captured fact. `seq` comes from a per-engine counter
/// seeded at startup, so identical texts captured twice, in one run or
/// across restarts, still get distinct ids.
pub fn captured_point_id(text: &str, seq: u64) -> u64 {
    point_id(&format!("{}#{}", text, seq))
}

/// Truncate to at most `max_chars` characters, appending `…` when cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('…');
    out
}
