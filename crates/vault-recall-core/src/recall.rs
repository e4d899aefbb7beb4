//! Formatting of the context block injected before an agent turn.

use crate::models::{truncate_chars, MemorySearchResult};

/// Opening delimiter of an injected recall block.
pub const RECALL_MARKER: &str = "<relevant-memories>";
/// Closing delimiter of an injected recall block.
pub const RECALL_MARKER_END: &str = "</relevant-memories>";

/// Whether a prompt is worth a recall lookup.
pub fn should_recall(prompt: &str, min_chars: usize) -> bool {
    prompt.trim().chars().count() >= min_chars && !prompt.contains(RECALL_MARKER)
}

/// Render results as a bullet list inside the recall delimiters.
///
/// Each snippet is flattened to one line and capped at `snippet_chars`.
/// Returns `None` for an empty result list.
pub fn format_recall_block(results: &[MemorySearchResult], snippet_chars: usize) -> Option<String> {
    if results.is_empty() {
        return None;
    }

    let mut out = String::new();
    out.push_str(RECALL_MARKER);
    out.push_str("\nThe following memories may be relevant to this conversation:\n");
    for r in results {
        let flat = r.snippet.split_whitespace().collect::<Vec<_>>().join(" ");
        out.push_str(&format!(
            "- [{}:{}-{}] {}\n",
            r.file,
            r.start_line,
            r.end_line,
            truncate_chars(&flat, snippet_chars)
        ));
    }
    out.push_str(RECALL_MARKER_END);
    Some(out)
}
