//! Snippet retrieval by logical path and line range.
//!
//! Used by the `recall get` CLI command and the `memory_get` tool. Logical
//! paths are resolved against the configured roots; anything outside the
//! known prefixes, or anything that escapes its root after symlink
//! resolution, is rejected with an [`AccessError`] before a byte is read.

use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use vault_recall_core::models::{
    CaptureCategory, CAPTURED_PREFIX, EXTRA_PREFIX, MEMORY_DIR_PREFIX, MEMORY_FILE, VAULT_PREFIX,
};

use crate::config::PathsConfig;
use crate::error::AccessError;

/// Where a logical path points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnippetTarget {
    /// A file on disk and the root it must stay within.
    File { path: PathBuf, root: PathBuf },
    /// The captured facts of one category.
    Captured(CaptureCategory),
}

/// Response shape of a snippet read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snippet {
    pub path: String,
    pub text: String,
}

/// Map a logical path onto a [`SnippetTarget`].
pub fn resolve(paths: &PathsConfig, logical: &str) -> Result<SnippetTarget, AccessError> {
    if logical.starts_with('/') || logical.starts_with('\\') || has_parent_component(logical) {
        return Err(AccessError::Traversal(logical.to_string()));
    }

    if logical == MEMORY_FILE {
        let path = paths.memory_file_path();
        let root = paths.workspace_root();
        return Ok(SnippetTarget::File { path, root });
    }

    if let Some(rest) = logical.strip_prefix(MEMORY_DIR_PREFIX) {
        let root = paths.memory_dir_path();
        return Ok(SnippetTarget::File {
            path: root.join(rest),
            root,
        });
    }

    if let Some(rest) = logical.strip_prefix(VAULT_PREFIX) {
        let root = paths.vault.clone();
        return Ok(SnippetTarget::File {
            path: root.join(rest),
            root,
        });
    }

    if let Some(rest) = logical.strip_prefix(EXTRA_PREFIX) {
        let (index, rest) = rest.split_once('/').unwrap_or((rest, ""));
        let unknown = || AccessError::UnknownExtra {
            index: index.to_string(),
            path: logical.to_string(),
        };
        let extra = index
            .parse::<usize>()
            .ok()
            .and_then(|i| paths.extra.get(i))
            .ok_or_else(unknown)?;

        if extra.is_file() {
            let name = extra.file_name().map(|n| n.to_string_lossy().to_string());
            if name.as_deref() != Some(rest) {
                return Err(unknown());
            }
            let root = extra.parent().map(Path::to_path_buf).unwrap_or_default();
            return Ok(SnippetTarget::File {
                path: extra.clone(),
                root,
            });
        }
        return Ok(SnippetTarget::File {
            path: extra.join(rest),
            root: extra.clone(),
        });
    }

    if let Some(rest) = logical.strip_prefix(CAPTURED_PREFIX) {
        return rest
            .parse::<CaptureCategory>()
            .map(SnippetTarget::Captured)
            .map_err(|_| AccessError::UnknownPrefix(logical.to_string()));
    }

    Err(AccessError::UnknownPrefix(logical.to_string()))
}

fn has_parent_component(logical: &str) -> bool {
    logical
        .split(['/', '\\'])
        .any(|part| part == "..")
        || Path::new(logical)
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
}

/// Read a file after confirming it resolves inside `root`.
pub async fn read_within(path: &Path, root: &Path) -> Result<String> {
    let canonical_root = tokio::fs::canonicalize(root)
        .await
        .with_context(|| format!("Root not found: {}", root.display()))?;
    let canonical = tokio::fs::canonicalize(path)
        .await
        .with_context(|| format!("File not found: {}", path.display()))?;
    if !canonical.starts_with(&canonical_root) {
        return Err(AccessError::OutsideRoot(path.display().to_string()).into());
    }
    tokio::fs::read_to_string(&canonical)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

/// Slice `text` to `lines` lines starting at 1-based line `from`.
///
/// `from` defaults to 1 and `lines` to the rest of the text. A `from` past
/// the last line yields an empty string.
pub fn slice_lines(text: &str, from: Option<usize>, lines: Option<usize>) -> String {
    let start = from.unwrap_or(1).max(1) - 1;
    let selected = text.lines().skip(start);
    match lines {
        Some(n) => selected.take(n).collect::<Vec<_>>().join("\n"),
        None => selected.collect::<Vec<_>>().join("\n"),
    }
}
