//! In-process BM25 index over chunk text and file paths, backed by an
//! in-RAM Tantivy index.
//!
//! Two fields are searched per document: `text` (boosted) and `file`. Each
//! query term contributes an exact BM25 clause plus constant-score prefix and
//! fuzzy clauses, discounted against the exact match. A third, untokenized
//! `path` field carries the raw logical path so that
//! [`LexicalIndex::remove_by_file`] deletes exactly the documents of one file.
//!
//! # Persistence
//!
//! Only documents are written. The Tantivy index is rebuilt from them on
//! load. Deleted documents linger in segment statistics until the index is
//! compacted, so [`LexicalIndex::save`] compacts first: search results
//! before and after a reload are identical. The current format is a
//! versioned wrapper `{ "version": 1, "documents": [...] }`; a bare
//! `[...]` document array is still accepted. Anything else starts a fresh
//! index and logs a warning.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tantivy::collector::TopDocs;
use tantivy::merge_policy::NoMergePolicy;
use tantivy::query::{BooleanQuery, BoostQuery, FuzzyTermQuery, Occur, Query, TermQuery};
use tantivy::schema::{
    Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, Value, INDEXED, STORED,
    STRING,
};
use tantivy::tokenizer::{LowerCaser, SimpleTokenizer, TextAnalyzer, TokenStream};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};

use crate::models::{Chunk, MemorySource};

/// On-disk format version written by [`LexicalIndex::save`].
pub const SNAPSHOT_VERSION: u32 = 1;

const TOKENIZER: &str = "recall";
const WRITER_HEAP_BYTES: usize = 15_000_000;
const MAX_EDITS: u8 = 2;

/// Tuning knobs for [`LexicalIndex`].
#[derive(Debug, Clone)]
pub struct LexicalOptions {
    pub text_boost: f32,
    pub file_boost: f32,
    /// Maximum edit distance as a fraction of the query term length.
    pub fuzzy: f32,
    pub prefix: bool,
}

impl Default for LexicalOptions {
    fn default() -> Self {
        Self {
            text_boost: 2.0,
            file_boost: 1.0,
            fuzzy: 0.2,
            prefix: true,
        }
    }
}

const PREFIX_WEIGHT: f32 = 0.375;
const FUZZY_WEIGHT: f32 = 0.45;

/// A stored document. Mirrors the chunk it was built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LexicalDoc {
    pub id: u64,
    pub file: String,
    pub start_line: usize,
    pub end_line: usize,
    pub text: String,
    pub source: MemorySource,
}

impl From<&Chunk> for LexicalDoc {
    fn from(chunk: &Chunk) -> Self {
        LexicalDoc {
            id: chunk.id,
            file: chunk.file.clone(),
            start_line: chunk.start_line,
            end_line: chunk.end_line,
            text: chunk.text.clone(),
            source: MemorySource::from_file(&chunk.file),
        }
    }
}

/// A scored match.
#[derive(Debug, Clone, PartialEq)]
pub struct LexicalHit {
    pub doc: LexicalDoc,
    pub score: f64,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    documents: Vec<LexicalDoc>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AnySnapshot {
    Wrapped(Snapshot),
    Bare(Vec<LexicalDoc>),
}

#[derive(Clone, Copy)]
struct Fields {
    id: Field,
    path: Field,
    text: Field,
    file: Field,
}

fn build_schema() -> (Schema, Fields) {
    let tokenized = TextOptions::default().set_indexing_options(
        TextFieldIndexing::default()
            .set_tokenizer(TOKENIZER)
            .set_index_option(IndexRecordOption::WithFreqsAndPositions),
    );

    let mut builder = Schema::builder();
    let fields = Fields {
        id: builder.add_u64_field("id", INDEXED | STORED),
        path: builder.add_text_field("path", STRING),
        text: builder.add_text_field("text", tokenized.clone()),
        file: builder.add_text_field("file", tokenized),
    };
    (builder.build(), fields)
}

fn analyzer() -> TextAnalyzer {
    TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(LowerCaser)
        .build()
}

/// Lower-cased alphanumeric runs, exactly as the index tokenizes them.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut analyzer = analyzer();
    let mut stream = analyzer.token_stream(text);
    let mut tokens = Vec::new();
    while let Some(token) = stream.next() {
        tokens.push(token.text.clone());
    }
    tokens
}

fn open_backend(schema: &Schema) -> Result<(IndexWriter, IndexReader)> {
    let index = Index::create_in_ram(schema.clone());
    index.tokenizers().register(TOKENIZER, analyzer());

    let writer: IndexWriter = index
        .writer_with_num_threads(1, WRITER_HEAP_BYTES)
        .context("Failed to create lexical index writer")?;
    // Segments are merged only by compaction, so scores never shift under a
    // background merge.
    writer.set_merge_policy(Box::new(NoMergePolicy));

    let reader = index
        .reader_builder()
        .reload_policy(ReloadPolicy::Manual)
        .try_into()
        .context("Failed to create lexical index reader")?;
    Ok((writer, reader))
}

fn to_document(fields: &Fields, doc: &LexicalDoc) -> TantivyDocument {
    doc!(
        fields.id => doc.id,
        fields.path => doc.file.as_str(),
        fields.text => doc.text.as_str(),
        fields.file => doc.file.as_str()
    )
}

/// BM25 index with exact per-file removal.
pub struct LexicalIndex {
    options: LexicalOptions,
    schema: Schema,
    fields: Fields,
    writer: IndexWriter,
    reader: IndexReader,
    docs: BTreeMap<u64, LexicalDoc>,
    dirty: bool,
    /// Deletes happened since the last compaction.
    fragmented: bool,
}

impl fmt::Debug for LexicalIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LexicalIndex")
            .field("documents", &self.docs.len())
            .field("dirty", &self.dirty)
            .field("fragmented", &self.fragmented)
            .finish()
    }
}

impl LexicalIndex {
    pub fn new() -> Result<Self> {
        Self::with_options(LexicalOptions::default())
    }

    pub fn with_options(options: LexicalOptions) -> Result<Self> {
        let (schema, fields) = build_schema();
        let (writer, reader) = open_backend(&schema)?;
        Ok(Self {
            options,
            schema,
            fields,
            writer,
            reader,
            docs: BTreeMap::new(),
            dirty: false,
            fragmented: false,
        })
    }

    /// Load from `path`, accepting the wrapped and the bare format.
    ///
    /// A missing file yields an empty index. An unreadable or unrecognized
    /// file also yields an empty index, with a single warning. Errors are
    /// reserved for failures to build the in-memory index itself.
    pub fn load(path: &Path, options: LexicalOptions) -> Result<Self> {
        let mut index = Self::with_options(options)?;
        let Some(documents) = read_snapshot(path) else {
            return Ok(index);
        };

        index.docs = documents.into_iter().map(|d| (d.id, d)).collect();
        index.rebuild()?;
        index.dirty = false;
        Ok(index)
    }

    /// Write to `path` if dirty. Returns whether a write happened.
    pub fn save(&mut self, path: &Path) -> Result<bool> {
        if !self.dirty {
            return Ok(false);
        }
        if self.fragmented {
            self.rebuild()?;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            documents: self.docs.values().cloned().collect(),
        };
        let json = serde_json::to_string(&snapshot)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write lexical index: {}", path.display()))?;
        self.dirty = false;
        Ok(true)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Distinct `file` values currently indexed.
    pub fn files(&self) -> Vec<String> {
        let mut files: Vec<String> = self.docs.values().map(|d| d.file.clone()).collect();
        files.sort();
        files.dedup();
        files
    }

    /// Bulk insert. A document whose id already exists replaces it.
    pub fn add(&mut self, chunks: &[Chunk]) -> Result<()> {
        for chunk in chunks {
            self.stage_insert(LexicalDoc::from(chunk))?;
        }
        self.commit()
    }

    /// Remove every document whose `file` equals `file` exactly.
    /// Returns the number removed.
    pub fn remove_by_file(&mut self, file: &str) -> Result<usize> {
        let removed = self.stage_remove(file);
        if removed > 0 {
            self.commit()?;
        }
        Ok(removed)
    }

    /// Swap the documents of `file` for `chunks` in a single commit.
    pub fn replace_file(&mut self, file: &str, chunks: &[Chunk]) -> Result<()> {
        self.stage_remove(file);
        for chunk in chunks {
            self.stage_insert(LexicalDoc::from(chunk))?;
        }
        self.commit()
    }

    /// Top `limit` documents for `query`, best first. Ties break on id.
    ///
    /// Search failures are logged and yield no hits.
    pub fn search(&self, query: &str, limit: usize) -> Vec<LexicalHit> {
        let terms = tokenize(query);
        if terms.is_empty() || self.docs.is_empty() || limit == 0 {
            return Vec::new();
        }
        match self.run_query(&terms, limit) {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(error = %e, "lexical search failed");
                Vec::new()
            }
        }
    }

    fn run_query(&self, terms: &[String], limit: usize) -> Result<Vec<LexicalHit>> {
        let query = self.build_query(terms);
        let searcher = self.reader.searcher();
        // Over-fetch so ties at the cutoff resolve by id, not by segment order.
        let top = searcher.search(&query, &TopDocs::with_limit(limit.saturating_mul(2)))?;

        let mut hits = Vec::with_capacity(top.len());
        for (score, address) in top {
            let stored: TantivyDocument = searcher.doc(address)?;
            let Some(id) = stored.get_first(self.fields.id).and_then(|v| v.as_u64()) else {
                continue;
            };
            if let Some(doc) = self.docs.get(&id) {
                hits.push(LexicalHit {
                    doc: doc.clone(),
                    score: score as f64,
                });
            }
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.doc.id.cmp(&b.doc.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    /// One exact clause per term and field, plus prefix and fuzzy clauses
    /// scaled down so that an exact match beats a prefix match, which beats
    /// a fuzzy one.
    fn build_query(&self, terms: &[String]) -> BooleanQuery {
        let opts = &self.options;
        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();

        for (field, boost) in [
            (self.fields.text, opts.text_boost),
            (self.fields.file, opts.file_boost),
        ] {
            for t in terms {
                let term = Term::from_field_text(field, t);
                clauses.push(boosted(
                    TermQuery::new(term.clone(), IndexRecordOption::WithFreqs),
                    boost,
                ));
                if opts.prefix {
                    clauses.push(boosted(
                        FuzzyTermQuery::new_prefix(term.clone(), 0, false),
                        boost * PREFIX_WEIGHT,
                    ));
                }
                let edits = self.max_edits(t);
                if edits > 0 {
                    clauses.push(boosted(
                        FuzzyTermQuery::new(term, edits, true),
                        boost * FUZZY_WEIGHT,
                    ));
                }
            }
        }
        BooleanQuery::new(clauses)
    }

    fn max_edits(&self, term: &str) -> u8 {
        let len = term.chars().count() as f32;
        ((len * self.options.fuzzy).floor() as u8).min(MAX_EDITS)
    }

    fn stage_insert(&mut self, doc: LexicalDoc) -> Result<()> {
        if self.docs.contains_key(&doc.id) {
            self.writer
                .delete_term(Term::from_field_u64(self.fields.id, doc.id));
            self.fragmented = true;
        }
        self.writer.add_document(to_document(&self.fields, &doc))?;
        self.docs.insert(doc.id, doc);
        self.dirty = true;
        Ok(())
    }

    fn stage_remove(&mut self, file: &str) -> usize {
        let before = self.docs.len();
        self.docs.retain(|_, d| d.file != file);
        let removed = before - self.docs.len();
        if removed > 0 {
            self.writer
                .delete_term(Term::from_field_text(self.fields.path, file));
            self.fragmented = true;
            self.dirty = true;
        }
        removed
    }

    fn commit(&mut self) -> Result<()> {
        self.writer
            .commit()
            .context("Failed to commit lexical index")?;
        self.reader.reload()?;
        Ok(())
    }

    /// Replace the Tantivy index with a fresh one holding every document.
    fn rebuild(&mut self) -> Result<()> {
        let (writer, reader) = open_backend(&self.schema)?;
        self.writer = writer;
        self.reader = reader;
        for doc in self.docs.values() {
            self.writer.add_document(to_document(&self.fields, doc))?;
        }
        self.commit()?;
        self.fragmented = false;
        Ok(())
    }
}

fn boosted(query: impl Query, boost: f32) -> (Occur, Box<dyn Query>) {
    (Occur::Should, Box::new(BoostQuery::new(Box::new(query), boost)))
}

fn read_snapshot(path: &Path) -> Option<Vec<LexicalDoc>> {
    if !path.exists() {
        return None;
    }

    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "lexical index unreadable, starting fresh");
            return None;
        }
    };

    match serde_json::from_str::<AnySnapshot>(&raw) {
        Ok(AnySnapshot::Wrapped(snapshot)) if snapshot.version <= SNAPSHOT_VERSION => {
            Some(snapshot.documents)
        }
        Ok(AnySnapshot::Wrapped(snapshot)) => {
            tracing::warn!(
                path = %path.display(),
                version = snapshot.version,
                "lexical index written by a newer version, starting fresh"
            );
            None
        }
        Ok(AnySnapshot::Bare(documents)) => Some(documents),
        Err(_) => {
            tracing::warn!(path = %path.display(), "unrecognized lexical index format, starting fresh");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_text;
    use tempfile::TempDir;

    fn build() -> LexicalIndex {
        let mut index = LexicalIndex::new().unwrap();
        index
            .add(&chunk_text(
                "vault/rust.md",
                "Rust ownership and borrowing rules\nlifetimes keep references valid",
                400,
                0,
            ))
            .unwrap();
        index
            .add(&chunk_text(
                "vault/rust-async.md",
                "async rust uses futures and executors",
                400,
                0,
            ))
            .unwrap();
        index
            .add(&chunk_text(
                "memory/2024-06-01.md",
                "Talked about the garden and tomatoes",
                400,
                0,
            ))
            .unwrap();
        index
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("Hello, World! rust-async.md"), vec!["hello", "world", "rust", "async", "md"]);
    }

    #[test]
    fn test_search_ranks_relevant_first() {
        let index = build();
        let hits = index.search("borrowing lifetimes", 10);
        assert_eq!(hits[0].doc.file, "vault/rust.md");
        assert_eq!(hits[0].doc.source, MemorySource::Vault);
        assert!(hits.iter().all(|h| h.score > 0.0));
    }

    #[test]
    fn test_search_matches_file_field() {
        let index = build();
        let hits = index.search("garden", 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc.source, MemorySource::Workspace);

        let hits = index.search("async", 10);
        assert_eq!(hits[0].doc.file, "vault/rust-async.md");
    }

    #[test]
    fn test_fuzzy_and_prefix() {
        let index = build();
        let fuzzy = index.search("tomatoas", 10);
        assert_eq!(fuzzy.len(), 1);
        assert_eq!(fuzzy[0].doc.file, "memory/2024-06-01.md");

        let prefix = index.search("owner", 10);
        assert_eq!(prefix[0].doc.file, "vault/rust.md");
    }

    #[test]
    fn test_exact_beats_fuzzy() {
        let mut index = LexicalIndex::new().unwrap();
        index.add(&chunk_text("vault/a.md", "carts", 400, 0)).unwrap();
        index.add(&chunk_text("vault/b.md", "cards", 400, 0)).unwrap();
        let hits = index.search("cards", 10);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].doc.file, "vault/b.md");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn test_remove_by_file_exact() {
        let mut index = build();
        let removed = index.remove_by_file("vault/rust.md").unwrap();
        assert_eq!(removed, 1);
        assert_eq!(index.len(), 2);
        assert!(index.search("borrowing", 10).is_empty());
        // Sibling file sharing the "rust" token is untouched.
        assert_eq!(index.search("futures", 10).len(), 1);
        assert_eq!(index.remove_by_file("vault/rust").unwrap(), 0);
    }

    #[test]
    fn test_add_replaces_same_id() {
        let mut index = LexicalIndex::new().unwrap();
        index.add(&chunk_text("vault/a.md", "first version", 400, 0)).unwrap();
        index.add(&chunk_text("vault/a.md", "second version", 400, 0)).unwrap();
        assert_eq!(index.len(), 1);
        assert!(index.search("first", 10).is_empty());
        assert_eq!(index.search("second", 10).len(), 1);
    }

    #[test]
    fn test_replace_file() {
        let mut index = build();
        index
            .replace_file(
                "vault/rust.md",
                &chunk_text("vault/rust.md", "Rust macros expand at compile time", 400, 0),
            )
            .unwrap();
        assert_eq!(index.len(), 3);
        assert!(index.search("borrowing", 10).is_empty());
        assert_eq!(index.search("macros", 10)[0].doc.file, "vault/rust.md");
    }

    #[test]
    fn test_persist_reload_same_results() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("lexical.json");
        let mut index = build();
        let before = index.search("rust references", 10);
        assert!(index.save(&path).unwrap());
        assert!(!index.save(&path).unwrap());

        let reloaded = LexicalIndex::load(&path, LexicalOptions::default()).unwrap();
        assert!(!reloaded.is_dirty());
        assert_eq!(reloaded.search("rust references", 10), before);
    }

    #[test]
    fn test_persist_reload_after_deletes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("lexical.json");
        let mut index = build();
        index
            .replace_file(
                "vault/rust-async.md",
                &chunk_text("vault/rust-async.md", "tokio runs rust futures", 400, 0),
            )
            .unwrap();
        index.remove_by_file("memory/2024-06-01.md").unwrap();
        assert!(index.save(&path).unwrap());
        let before = index.search("rust futures", 10);
        assert_eq!(before.len(), 2);

        let reloaded = LexicalIndex::load(&path, LexicalOptions::default()).unwrap();
        assert_eq!(reloaded.search("rust futures", 10), before);
    }

    #[test]
    fn test_load_bare_format() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("lexical.json");
        let docs: Vec<LexicalDoc> = chunk_text("vault/a.md", "bare format note", 400, 0)
            .iter()
            .map(LexicalDoc::from)
            .collect();
        std::fs::write(&path, serde_json::to_string(&docs).unwrap()).unwrap();

        let index = LexicalIndex::load(&path, LexicalOptions::default()).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.search("bare", 5).len(), 1);
    }

    #[test]
    fn test_load_unrecognized_starts_fresh() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("lexical.json");
        std::fs::write(&path, r#"{"serializationVersion": 2, "index": {}}"#).unwrap();
        assert!(LexicalIndex::load(&path, LexicalOptions::default()).unwrap().is_empty());

        std::fs::write(&path, "not json").unwrap();
        assert!(LexicalIndex::load(&path, LexicalOptions::default()).unwrap().is_empty());
    }

    #[test]
    fn test_files() {
        let index = build();
        assert_eq!(
            index.files(),
            vec!["memory/2024-06-01.md", "vault/rust-async.md", "vault/rust.md"]
        );
    }
}
