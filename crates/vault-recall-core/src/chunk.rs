//! Line-oriented text chunker with word-count targets and overlap.
//!
//! Splits a file into [`Chunk`]s whose `start_line`/`end_line` point back at
//! exact 1-based lines of the original text, so a snippet read with those
//! bounds reproduces the chunk.
//!
//! # Algorithm
//!
//! 1. Split the text into lines. Lines longer than [`MAX_LINE_CHARS`] are
//!    hard-split into segments that keep the original line number and
//!    carry their ordinal within the line.
//! 2. Accumulate segments until the running word count reaches
//!    `target_words`, then emit the chunk (whitespace-only chunks are
//!    dropped).
//! 3. Seed the next chunk with the trailing segments whose cumulative word
//!    count is closest to `overlap_words`, walking backward from the end.
//!    At least one segment is always left behind so every chunk makes
//!    progress.
//! 4. Emit whatever remains once the input is exhausted, unless it consists
//!    only of overlap carried from the previous chunk.
//!
//! A chunk that starts or ends inside a hard-split line gets its id from
//! [`split_chunk_point_id`], so several chunks cut from one long line never
//! share an id.
//!
//! # Example
//!
//! ```rust
//! use vault_recall_core::chunk::chunk_text;
//!
//! let chunks = chunk_text("vault/a.md", "one\ntwo\nthree", 400, 80);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!((chunks[0].start_line, chunks[0].end_line), (1, 3));
//! ```

use crate::models::{chunk_point_id, content_hash, split_chunk_point_id, Chunk};

/// Default chunk size in words.
pub const DEFAULT_TARGET_WORDS: usize = 400;
/// Default overlap between consecutive chunks in words.
pub const DEFAULT_OVERLAP_WORDS: usize = 80;
/// Lines longer than this many characters are hard-split.
pub const MAX_LINE_CHARS: usize = 2000;

struct Segment<'a> {
    line: usize,
    /// Ordinal within a hard-split line, 0 otherwise.
    piece: usize,
    /// Whether this segment ends its line.
    ends_line: bool,
    text: &'a str,
    words: usize,
}

/// Split `text` from logical path `file` into overlapping chunks.
///
/// Empty or whitespace-only input yields no chunks.
pub fn chunk_text(file: &str, text: &str, target_words: usize, overlap_words: usize) -> Vec<Chunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let target_words = target_words.max(1);
    let segments = split_segments(text);

    let mut chunks = Vec::new();
    let mut current: Vec<&Segment> = Vec::new();
    let mut current_words = 0usize;
    let mut fresh = false;

    for seg in &segments {
        current.push(seg);
        current_words += seg.words;
        fresh = true;

        if current_words >= target_words {
            if let Some(chunk) = make_chunk(file, &current) {
                chunks.push(chunk);
            }
            let keep = overlap_len(&current, overlap_words);
            current.drain(..current.len() - keep);
            current_words = current.iter().map(|s| s.words).sum();
            fresh = false;
        }
    }

    if fresh {
        if let Some(chunk) = make_chunk(file, &current) {
            chunks.push(chunk);
        }
    }

    chunks
}

/// Split into lines, hard-splitting overlong lines on char boundaries.
fn split_segments(text: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    for (idx, raw) in text.split('\n').enumerate() {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        let line_no = idx + 1;

        if line.chars().count() <= MAX_LINE_CHARS {
            segments.push(Segment {
                line: line_no,
                piece: 0,
                ends_line: true,
                text: line,
                words: line.split_whitespace().count(),
            });
            continue;
        }

        let mut start = 0usize;
        let mut count = 0usize;
        let mut piece = 0usize;
        for (byte_idx, _) in line.char_indices() {
            if count == MAX_LINE_CHARS {
                let text = &line[start..byte_idx];
                segments.push(Segment {
                    line: line_no,
                    piece,
                    ends_line: false,
                    text,
                    words: text.split_whitespace().count(),
                });
                start = byte_idx;
                count = 0;
                piece += 1;
            }
            count += 1;
        }
        let text = &line[start..];
        segments.push(Segment {
            line: line_no,
            piece,
            ends_line: true,
            text,
            words: text.split_whitespace().count(),
        });
    }
    segments
}

/// Number of trailing segments to carry into the next chunk.
fn overlap_len(current: &[&Segment], overlap_words: usize) -> usize {
    if overlap_words == 0 || current.len() < 2 {
        return 0;
    }

    let mut best = 0usize;
    let mut best_diff = overlap_words;
    let mut words = 0usize;
    for (k, seg) in current.iter().rev().take(current.len() - 1).enumerate() {
        words += seg.words;
        let diff = words.abs_diff(overlap_words);
        if diff < best_diff {
            best = k + 1;
            best_diff = diff;
        }
        if words > overlap_words {
            break;
        }
    }
    best
}

fn make_chunk(file: &str, segments: &[&Segment]) -> Option<Chunk> {
    let first = segments.first()?;
    let last = segments.last()?;

    let mut text = String::new();
    let mut prev_line = None;
    for seg in segments {
        // Hard-split pieces of one line are rejoined without a separator.
        if let Some(prev) = prev_line {
            if prev != seg.line {
                text.push('\n');
            }
        }
        text.push_str(seg.text);
        prev_line = Some(seg.line);
    }

    if text.trim().is_empty() {
        return None;
    }

    let id = if first.piece == 0 && last.ends_line {
        chunk_point_id(file, first.line, last.line)
    } else {
        split_chunk_point_id(file, (first.line, first.piece), (last.line, last.piece))
    };

    Some(Chunk {
        id,
        file: file.to_string(),
        start_line: first.line,
        end_line: last.line,
        hash: content_hash(&text),
        text,
    })
}
