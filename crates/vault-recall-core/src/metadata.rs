//! Frontmatter, header, tag, and category extraction for Markdown notes.
//!
//! The results are attached to every vector store point of a file so that
//! searches can later be filtered by `category` or tag.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::{MEMORY_DIR_PREFIX, MEMORY_FILE};

static INLINE_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\s)#([\p{L}\p{N}_][\p{L}\p{N}_/-]*)").expect("valid inline tag regex")
});

/// Parsed frontmatter of a note.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frontmatter {
    /// Values of every array-valued field, deduplicated in order.
    pub tags: Vec<String>,
    /// Scalar fields rendered as strings.
    pub metadata: BTreeMap<String, String>,
}

/// Everything the indexer attaches to a file's points.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub category: String,
    pub tags: Vec<String>,
    pub headers: Vec<String>,
}

impl FileMetadata {
    /// Extract category, merged tags, and headers for `file`.
    pub fn extract(file: &str, text: &str) -> Self {
        let frontmatter = parse_frontmatter(text);
        let mut tags = frontmatter.tags;
        for tag in extract_inline_tags(strip_frontmatter(text)) {
            push_unique(&mut tags, tag);
        }
        FileMetadata {
            category: infer_category(file).to_string(),
            tags,
            headers: extract_headers(text),
        }
    }
}

/// Parse a leading `---` delimited YAML block.
///
/// Notes without frontmatter, or with frontmatter that is not a YAML
/// mapping, yield an empty [`Frontmatter`].
pub fn parse_frontmatter(text: &str) -> Frontmatter {
    let Some(block) = frontmatter_block(text) else {
        return Frontmatter::default();
    };

    let value: serde_yaml::Value = match serde_yaml::from_str(block) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "ignoring unparsable frontmatter");
            return Frontmatter::default();
        }
    };

    let mut out = Frontmatter::default();
    let serde_yaml::Value::Mapping(map) = value else {
        return out;
    };

    for (key, value) in map {
        let Some(key) = scalar_to_string(&key) else {
            continue;
        };
        match value {
            serde_yaml::Value::Sequence(items) => {
                for item in items.iter().filter_map(scalar_to_string) {
                    let tag = item.trim().trim_start_matches('#').to_string();
                    if !tag.is_empty() {
                        push_unique(&mut out.tags, tag);
                    }
                }
            }
            other => {
                if let Some(v) = scalar_to_string(&other) {
                    out.metadata.insert(key, v);
                }
            }
        }
    }
    out
}

/// Every Markdown ATX header, lower-cased with the `#` markers stripped.
/// Lines inside fenced code blocks are ignored.
pub fn extract_headers(text: &str) -> Vec<String> {
    let mut headers = Vec::new();
    let mut in_fence = false;
    for line in strip_frontmatter(text).lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        let level = trimmed.chars().take_while(|c| *c == '#').count();
        if !(1..=6).contains(&level) {
            continue;
        }
        let rest = &trimmed[level..];
        if !rest.is_empty() && !rest.starts_with(' ') && !rest.starts_with('\t') {
            continue;
        }
        let header = rest.trim().trim_end_matches('#').trim().to_lowercase();
        if !header.is_empty() {
            headers.push(header);
        }
    }
    headers
}

/// `#tag` tokens in the body, excluding headers and fenced code.
pub fn extract_inline_tags(text: &str) -> Vec<String> {
    let mut tags = Vec::new();
    let mut in_fence = false;
    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence || (trimmed.starts_with('#') && trimmed.trim_start_matches('#').starts_with(' ')) {
            continue;
        }
        for cap in INLINE_TAG.captures_iter(line) {
            push_unique(&mut tags, cap[1].to_string());
        }
    }
    tags
}

/// Classify a logical path.
///
/// Rules in priority order: a `journal` directory, `projects`, `topics`,
/// `people`, the session memory folder, the core memory file, else
/// `other`.
pub fn infer_category(path: &str) -> &'static str {
    if path == MEMORY_FILE {
        return "core";
    }

    let lower = path.to_lowercase();
    let dirs: Vec<&str> = lower.split('/').collect();
    let dirs = &dirs[..dirs.len().saturating_sub(1)];

    if dirs.iter().any(|d| *d == "journal" || *d == "journals" || *d == "daily") {
        "journal"
    } else if dirs.iter().any(|d| *d == "projects") {
        "project"
    } else if dirs.iter().any(|d| *d == "topics") {
        "knowledge"
    } else if dirs.iter().any(|d| *d == "people") {
        "person"
    } else if lower.starts_with(MEMORY_DIR_PREFIX) {
        "session"
    } else {
        "other"
    }
}

fn frontmatter_block(text: &str) -> Option<&str> {
    split_frontmatter(text).map(|(block, _)| block)
}

fn strip_frontmatter(text: &str) -> &str {
    split_frontmatter(text).map_or(text, |(_, body)| body)
}

/// Split into (frontmatter block, body) when the text opens with `---`.
fn split_frontmatter(text: &str) -> Option<(&str, &str)> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let rest = text
        .strip_prefix("---\n")
        .or_else(|| text.strip_prefix("---\r\n"))?;
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            return Some((&rest[..offset], &rest[offset + line.len()..]));
        }
        offset += line.len();
    }
    None
}

fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}
