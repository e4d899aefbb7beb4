//! # Vault Recall
//!
//! Hybrid long-term memory for conversational agents, backed by a Markdown
//! note vault.
//!
//! Vault Recall keeps a vector collection and a local keyword index in sync
//! with a directory of Markdown notes, answers hybrid (semantic + keyword)
//! queries over them, captures short facts from conversation into the same
//! collection, and injects relevant memories into outbound prompts.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ Vault + MD  │──▶│   Indexer   │──▶│ Vector store │
//! │ roots       │   │ Chunk+Embed │   │   (Qdrant)   │
//! └──────┬──────┘   └──────┬──────┘   └──────┬───────┘
//!        │ notify          │                 │
//!        ▼                 ▼                 │
//! ┌─────────────┐   ┌─────────────┐          │
//! │  Debouncer  │   │ Lexical idx │          │
//! └─────────────┘   │ Link graph  │          │
//!                   └──────┬──────┘          │
//!                          ▼                 ▼
//!                   ┌────────────────────────────┐
//!                   │        MemoryEngine        │
//!                   │ search · get · capture ·   │
//!                   │ recall · captured facts    │
//!                   └──────┬──────────────┬──────┘
//!                          ▼              ▼
//!                     ┌─────────┐   ┌──────────┐
//!                     │   CLI   │   │   HTTP   │
//!                     │(recall) │   │ (tools)  │
//!                     └─────────┘   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! recall index                          # one indexing pass
//! recall search "garden irrigation"     # hybrid search
//! recall get vault/Projects/garden.md --from 10 --lines 5
//! recall capture "I prefer dark roast coffee"
//! recall serve                          # HTTP tools + hooks, with watcher
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`embedding`] | Ollama embedding client |
//! | [`vector_store`] | Qdrant REST client |
//! | [`ingest`] | File discovery and the indexing pass |
//! | [`watcher`] | Filesystem watching and debounced re-indexing |
//! | [`get`] | Logical path resolution and snippet reads |
//! | [`engine`] | The memory engine tying everything together |
//! | [`traits`] | Agent tools and the host hook adapter |
//! | [`server`] | HTTP tool server |
//! | [`error`] | Typed access and indexing errors |
//!
//! Pure, I/O-free logic (chunking, metadata, lexical ranking, fusion,
//! capture heuristics, link graph) lives in the `vault-recall-core` crate.

pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod get;
pub mod ingest;
pub mod server;
pub mod traits;
pub mod vector_store;
pub mod watcher;
