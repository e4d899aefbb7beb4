//! # Vault Recall Core
//!
//! Network-free logic for vault-recall: data models, chunking, metadata
//! extraction, the wikilink graph, the lexical (BM25) index, hybrid score
//! fusion, auto-capture rules, recall formatting, and the embedding and
//! vector store abstractions.
//!
//! Nothing in this crate talks to a remote service. HTTP clients for the
//! embedding service and the vector database live in the `vault-recall`
//! app crate and plug in through [`embedding::Embedder`] and
//! [`store::VectorStore`].

pub mod capture;
pub mod chunk;
pub mod embedding;
pub mod lexical;
pub mod links;
pub mod metadata;
pub mod models;
pub mod recall;
pub mod search;
pub mod store;
