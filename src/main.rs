//! # recall CLI
//!
//! Command-line interface for the Vault Recall memory engine.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `recall index` | Run one indexing pass over every memory root |
//! | `recall search <query>` | Hybrid search over notes and captured facts |
//! | `recall get <path>` | Read a snippet by logical path and line range |
//! | `recall capture <text>` | Offer a message to the capture pipeline |
//! | `recall captured list` | Page through captured facts |
//! | `recall captured delete <id>` | Delete one captured fact |
//! | `recall captured export` | Dump every captured fact as JSON |
//! | `recall orphans` | Notes nothing links to |
//! | `recall health` | Check the embedding service and vector store |
//! | `recall serve` | Start the HTTP tool server with file watching |
//!
//! ## Configuration
//!
//! All commands accept a `--config` flag (default: `./config/recall.toml`).
//! Log verbosity follows `RUST_LOG` (default `info`); logs go to stderr so
//! stdout stays machine-readable.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use vault_recall::config;
use vault_recall::engine::MemoryEngine;
use vault_recall::server;
use vault_recall::traits::MemoryPlugin;
use vault_recall_core::models::CaptureCategory;

/// Vault Recall: hybrid long-term memory over a Markdown vault.
#[derive(Parser)]
#[command(
    name = "recall",
    about = "Hybrid long-term memory over a Markdown note vault",
    version
)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./config/recall.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one indexing pass and flush local state.
    ///
    /// Re-chunks and re-embeds every Markdown file under the configured
    /// roots and prunes files that disappeared since the last pass.
    Index,

    /// Hybrid search over indexed notes and captured facts.
    Search {
        /// The search query
        query: String,
        /// Maximum number of results
        #[arg(long)]
        limit: Option<usize>,
        /// Minimum vector similarity (0.0 to 1.0)
        #[arg(long)]
        min_score: Option<f64>,
    },

    /// Read a snippet by logical path.
    ///
    /// Paths look like `vault/Projects/a.md`, `MEMORY.md`,
    /// `memory/2024-01-01.md`, `extra/0/notes.md` or `captured/preference`.
    Get {
        /// Logical path
        path: String,
        /// First line to return (1-based)
        #[arg(long)]
        from: Option<usize>,
        /// Number of lines to return
        #[arg(long)]
        lines: Option<usize>,
    },

    /// Offer a message to the capture pipeline.
    Capture {
        /// Message text
        text: String,
        /// Session key used for rate limiting
        #[arg(long)]
        session: Option<String>,
    },

    /// Manage captured facts.
    Captured {
        #[command(subcommand)]
        action: CapturedAction,
    },

    /// List notes no other note links to.
    Orphans,

    /// Check the embedding service and the vector store.
    Health,

    /// Start the HTTP tool server.
    ///
    /// Runs an initial indexing pass in the background, watches the memory
    /// roots for changes, and serves until interrupted.
    Serve,
}

#[derive(Subcommand)]
enum CapturedAction {
    /// List one page of captured facts.
    List {
        /// Only facts of this category
        #[arg(long)]
        category: Option<CaptureCategory>,
        /// Page size
        #[arg(long, default_value = "20")]
        limit: usize,
        /// Cursor returned by the previous page
        #[arg(long)]
        offset: Option<u64>,
    },
    /// Delete a captured fact by id.
    Delete {
        /// Point id
        id: u64,
    },
    /// Print every captured fact as a JSON array.
    Export {
        /// Only facts of this category
        #[arg(long)]
        category: Option<CaptureCategory>,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let engine = MemoryEngine::open(cfg)?;

    match cli.command {
        Commands::Index => {
            let stats = engine.index().await?;
            engine.shutdown().await?;
            match stats {
                Some(stats) => print_json(&stats)?,
                None => println!("An indexing pass is already running."),
            }
        }
        Commands::Search {
            query,
            limit,
            min_score,
        } => {
            let search = &engine.config().search;
            let results = engine
                .search(
                    &query,
                    limit.unwrap_or(search.max_results),
                    min_score.unwrap_or(search.min_score),
                )
                .await;
            if results.is_empty() {
                println!("No results.");
            } else {
                print_json(&results)?;
            }
        }
        Commands::Get { path, from, lines } => {
            let snippet = engine.get_snippet(&path, from, lines).await?;
            println!("{}", snippet.text);
        }
        Commands::Capture { text, session } => {
            let outcome = engine.capture(&text, session.as_deref()).await;
            print_json(&outcome)?;
        }
        Commands::Captured { action } => match action {
            CapturedAction::List {
                category,
                limit,
                offset,
            } => {
                let page = engine.list_captured(category, limit, offset).await?;
                print_json(&page)?;
            }
            CapturedAction::Delete { id } => {
                engine.delete_captured(id).await?;
                println!("Deleted {}.", id);
            }
            CapturedAction::Export { category } => {
                let items = engine.export_captured(category).await?;
                print_json(&items)?;
            }
        },
        Commands::Orphans => {
            for file in engine.orphans().await {
                println!("{}", file);
            }
        }
        Commands::Health => {
            let report = engine.health().await;
            print_json(&report)?;
            if !report.is_healthy() {
                std::process::exit(1);
            }
        }
        Commands::Serve => {
            let bind = engine.config().server.bind.clone();
            let hooks = Arc::new(MemoryPlugin::new(Arc::new(engine)));

            let shutdown = CancellationToken::new();
            let signal = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("interrupt received, shutting down");
                }
                signal.cancel();
            });

            server::run_server(&bind, hooks, shutdown).await?;
        }
    }

    Ok(())
}
