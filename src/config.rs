use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub paths: PathsConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub recall: RecallConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    pub vault: PathBuf,
    #[serde(default)]
    pub workspace: Option<PathBuf>,
    #[serde(default = "default_memory_file")]
    pub memory_file: String,
    #[serde(default = "default_memory_dir")]
    pub memory_dir: String,
    #[serde(default)]
    pub extra: Vec<PathBuf>,
    #[serde(default = "default_exclude_globs")]
    pub exclude_globs: Vec<String>,
}

impl PathsConfig {
    /// Workspace root: the configured one, else the vault's parent.
    pub fn workspace_root(&self) -> PathBuf {
        match &self.workspace {
            Some(ws) => ws.clone(),
            None => self
                .vault
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        }
    }

    pub fn memory_file_path(&self) -> PathBuf {
        self.workspace_root().join(&self.memory_file)
    }

    pub fn memory_dir_path(&self) -> PathBuf {
        self.workspace_root().join(&self.memory_dir)
    }
}

fn default_memory_file() -> String {
    "MEMORY.md".to_string()
}
fn default_memory_dir() -> String {
    "memory".to_string()
}
fn default_exclude_globs() -> Vec<String> {
    vec![
        ".obsidian/**".to_string(),
        ".trash/**".to_string(),
        ".git/**".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct StateConfig {
    #[serde(default = "default_lexical_file")]
    pub lexical_file: String,
    #[serde(default = "default_graph_file")]
    pub graph_file: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            lexical_file: default_lexical_file(),
            graph_file: default_graph_file(),
        }
    }
}

fn default_lexical_file() -> String {
    ".recall-lexical.json".to_string()
}
fn default_graph_file() -> String {
    ".recall-graph.json".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorStoreConfig {
    #[serde(default = "default_vector_url")]
    pub url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            url: default_vector_url(),
            collection: default_collection(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_vector_url() -> String {
    "http://localhost:6333".to_string()
}
fn default_collection() -> String {
    "agent_memory".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_url")]
    pub url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: default_embedding_url(),
            model: default_embedding_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_target_words")]
    pub target_words: usize,
    #[serde(default = "default_overlap_words")]
    pub overlap_words: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_words: default_target_words(),
            overlap_words: default_overlap_words(),
        }
    }
}

fn default_target_words() -> usize {
    vault_recall_core::chunk::DEFAULT_TARGET_WORDS
}
fn default_overlap_words() -> usize {
    vault_recall_core::chunk::DEFAULT_OVERLAP_WORDS
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f64,
    #[serde(default = "default_text_weight")]
    pub text_weight: f64,
    #[serde(default = "default_related_limit")]
    pub related_limit: usize,
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            min_score: default_min_score(),
            vector_weight: default_vector_weight(),
            text_weight: default_text_weight(),
            related_limit: default_related_limit(),
            snippet_chars: default_snippet_chars(),
        }
    }
}

fn default_max_results() -> usize {
    6
}
fn default_min_score() -> f64 {
    0.3
}
fn default_vector_weight() -> f64 {
    0.7
}
fn default_text_weight() -> f64 {
    0.3
}
fn default_related_limit() -> usize {
    3
}
fn default_snippet_chars() -> usize {
    700
}

#[derive(Debug, Deserialize, Clone)]
pub struct CaptureConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_per_window")]
    pub max_per_window: usize,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_duplicate_threshold")]
    pub duplicate_threshold: f64,
}

impl CaptureConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_per_window: default_max_per_window(),
            window_secs: default_window_secs(),
            duplicate_threshold: default_duplicate_threshold(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_max_per_window() -> usize {
    5
}
fn default_window_secs() -> u64 {
    300
}
fn default_duplicate_threshold() -> f64 {
    0.95
}

#[derive(Debug, Deserialize, Clone)]
pub struct RecallConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_min_prompt_chars")]
    pub min_prompt_chars: usize,
    #[serde(default = "default_recall_max_results")]
    pub max_results: usize,
    #[serde(default = "default_recall_min_score")]
    pub min_score: f64,
    #[serde(default = "default_recall_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_recall_snippet_chars")]
    pub snippet_chars: usize,
}

impl RecallConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_prompt_chars: default_min_prompt_chars(),
            max_results: default_recall_max_results(),
            min_score: default_recall_min_score(),
            timeout_ms: default_recall_timeout_ms(),
            snippet_chars: default_recall_snippet_chars(),
        }
    }
}

fn default_min_prompt_chars() -> usize {
    10
}
fn default_recall_max_results() -> usize {
    3
}
fn default_recall_min_score() -> f64 {
    0.4
}
fn default_recall_timeout_ms() -> u64 {
    3000
}
fn default_recall_snippet_chars() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct WatchConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl WatchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: default_debounce_ms(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    1500
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

impl Config {
    /// Build a config for `vault` with every other setting at its default.
    pub fn for_vault(vault: impl Into<PathBuf>) -> Self {
        Self {
            paths: PathsConfig {
                vault: vault.into(),
                workspace: None,
                memory_file: default_memory_file(),
                memory_dir: default_memory_dir(),
                extra: Vec::new(),
                exclude_globs: default_exclude_globs(),
            },
            state: StateConfig::default(),
            vector_store: VectorStoreConfig::default(),
            embedding: EmbeddingConfig::default(),
            chunking: ChunkingConfig::default(),
            search: SearchConfig::default(),
            capture: CaptureConfig::default(),
            recall: RecallConfig::default(),
            watch: WatchConfig::default(),
            server: ServerConfig::default(),
        }
    }

    pub fn lexical_state_path(&self) -> PathBuf {
        self.paths.workspace_root().join(&self.state.lexical_file)
    }

    pub fn graph_state_path(&self) -> PathBuf {
        self.paths.workspace_root().join(&self.state.graph_file)
    }

    /// Check the invariants the rest of the engine relies on.
    pub fn validate(&self) -> Result<()> {
        if self.paths.vault.as_os_str().is_empty() {
            anyhow::bail!("paths.vault must be set");
        }

        if self.chunking.target_words == 0 {
            anyhow::bail!("chunking.target_words must be > 0");
        }

        if self.chunking.overlap_words >= self.chunking.target_words {
            anyhow::bail!(
                "chunking.overlap_words ({}) must be smaller than chunking.target_words ({})",
                self.chunking.overlap_words,
                self.chunking.target_words
            );
        }

        if self.search.max_results == 0 {
            anyhow::bail!("search.max_results must be >= 1");
        }

        if self.search.vector_weight < 0.0 || self.search.text_weight < 0.0 {
            anyhow::bail!("search.vector_weight and search.text_weight must be >= 0.0");
        }

        if self.capture.max_per_window == 0 {
            anyhow::bail!("capture.max_per_window must be >= 1");
        }

        if self.recall.timeout_ms == 0 {
            anyhow::bail!("recall.timeout_ms must be > 0");
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_minimal_config_defaults() {
        let file = write_config("[paths]\nvault = \"/notes/vault\"\n");
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.chunking.target_words, 400);
        assert_eq!(config.chunking.overlap_words, 80);
        assert_eq!(config.search.vector_weight, 0.7);
        assert_eq!(config.watch.debounce_ms, 1500);
        assert_eq!(config.recall.timeout_ms, 3000);
        assert_eq!(config.paths.workspace_root(), PathBuf::from("/notes"));
        assert_eq!(
            config.lexical_state_path(),
            PathBuf::from("/notes/.recall-lexical.json")
        );
    }

    #[test]
    fn test_missing_vault_is_an_error() {
        let file = write_config("[search]\nmax_results = 3\n");
        assert!(load_config(file.path()).is_err());

        let file = write_config("[paths]\nvault = \"\"\n");
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("paths.vault"));
    }

    #[test]
    fn test_overlap_must_be_smaller() {
        let file = write_config("[paths]\nvault = \"v\"\n[chunking]\ntarget_words = 50\noverlap_words = 50\n");
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_workspace_and_extras() {
        let file = write_config(
            "[paths]\nvault = \"/v\"\nworkspace = \"/ws\"\nextra = [\"/a\", \"/b/file.md\"]\n",
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.paths.memory_file_path(), PathBuf::from("/ws/MEMORY.md"));
        assert_eq!(config.paths.memory_dir_path(), PathBuf::from("/ws/memory"));
        assert_eq!(config.paths.extra.len(), 2);
    }

    #[test]
    fn test_example_config_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/recall.example.toml");
        let config = load_config(&path).unwrap();
        assert_eq!(config.vector_store.collection, "agent_memory");
        assert_eq!(config.server.bind, "127.0.0.1:7340");
    }
}
