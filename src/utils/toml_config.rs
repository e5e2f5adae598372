//! TOML-based configuration for meeple-rag
//!
//! Every section is optional; a missing section takes its defaults. Secrets
//! are referenced by environment variable name and resolved at use, never
//! stored in the file.
//!
//! ```toml
//! [embedding]
//! model = "text-embedding-3-small"
//! dimensions = 1536
//!
//! [vector_store]
//! provider = "qdrant"
//! url = "http://localhost:6334"
//!
//! [evaluation.thresholds]
//! min_precision_at_k = 0.70
//! ```

use crate::db::vectorstore::VectorStoreProvider;
use crate::evaluation::{EvaluationOptions, QualityThresholds};
use crate::rag::chunker::{ChunkerConfig, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, DEFAULT_MIN_FRAGMENT};
use crate::rag::embeddings::EmbeddingClientConfig;
use crate::rag::indexer::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "meeple-rag.toml";

/// Root configuration structure loaded from meeple-rag.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub vector_store: VectorStoreConfig,

    #[serde(default)]
    pub chunking: ChunkingConfig,

    #[serde(default)]
    pub indexing: IndexingConfig,

    #[serde(default)]
    pub evaluation: EvaluationConfig,
}

// ============= Logging Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. "info" or "meeple_rag=debug"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ============= Embedding Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Environment variable holding the bearer token. Empty sends no auth.
    #[serde(default = "default_embedding_key_env")]
    pub api_key_env: Option<String>,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    /// Ask the API to shorten vectors to `dimensions`
    #[serde(default)]
    pub request_dimensions: bool,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Texts per request when indexing
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embedding_key_env() -> Option<String> {
    Some("OPENAI_API_KEY".to_string())
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_dimensions() -> usize {
    1536
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_batch_size() -> usize {
    64
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            api_key_env: default_embedding_key_env(),
            model: default_embedding_model(),
            dimensions: default_dimensions(),
            request_dimensions: false,
            timeout_secs: default_timeout_secs(),
            batch_size: default_batch_size(),
        }
    }
}

// ============= Vector Store Configuration =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorStoreKind {
    Qdrant,
    #[serde(alias = "inmemory", alias = "in-memory")]
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    #[serde(default = "default_vector_store_kind")]
    pub provider: VectorStoreKind,

    #[serde(default = "default_qdrant_url")]
    pub url: String,

    /// Environment variable holding the Qdrant API key
    pub api_key_env: Option<String>,

    /// Collection shared by all categories
    #[serde(default = "default_collection")]
    pub collection: String,
}

fn default_vector_store_kind() -> VectorStoreKind {
    VectorStoreKind::Qdrant
}

fn default_qdrant_url() -> String {
    "http://localhost:6334".to_string()
}

fn default_collection() -> String {
    "meeple_knowledge".to_string()
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            provider: default_vector_store_kind(),
            url: default_qdrant_url(),
            api_key_env: None,
            collection: default_collection(),
        }
    }
}

// ============= Chunking / Indexing Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    #[serde(default = "default_min_fragment")]
    pub min_fragment: usize,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_chunk_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}

fn default_min_fragment() -> usize {
    DEFAULT_MIN_FRAGMENT
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            min_fragment: default_min_fragment(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

// ============= Evaluation Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default = "default_precision_k")]
    pub precision_k: Vec<usize>,

    #[serde(default)]
    pub thresholds: ThresholdsConfig,
}

fn default_top_k() -> usize {
    10
}

fn default_concurrency() -> usize {
    1
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./reports")
}

fn default_precision_k() -> Vec<usize> {
    vec![1, 3, 5, 10]
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            concurrency: default_concurrency(),
            output_dir: default_output_dir(),
            precision_k: default_precision_k(),
            thresholds: ThresholdsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdsConfig {
    #[serde(default = "default_min_precision")]
    pub min_precision_at_k: f64,

    #[serde(default = "default_precision_gate_k")]
    pub precision_gate_k: usize,

    #[serde(default = "default_min_mrr")]
    pub min_mrr: f64,

    #[serde(default = "default_max_latency_p95_ms")]
    pub max_latency_p95_ms: u64,

    #[serde(default = "default_min_success_rate")]
    pub min_success_rate: f64,

    /// Gates switched off entirely, e.g. `disabled = ["latency_p95"]`.
    #[serde(default)]
    pub disabled: Vec<GateKind>,
}

/// Names of the quality gates, as written in `[evaluation.thresholds].disabled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateKind {
    Precision,
    Mrr,
    LatencyP95,
    SuccessRate,
}

fn default_min_precision() -> f64 {
    0.70
}

fn default_precision_gate_k() -> usize {
    5
}

fn default_min_mrr() -> f64 {
    0.60
}

fn default_max_latency_p95_ms() -> u64 {
    2000
}

fn default_min_success_rate() -> f64 {
    0.95
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            min_precision_at_k: default_min_precision(),
            precision_gate_k: default_precision_gate_k(),
            min_mrr: default_min_mrr(),
            max_latency_p95_ms: default_max_latency_p95_ms(),
            min_success_rate: default_min_success_rate(),
            disabled: Vec::new(),
        }
    }
}

// ============= Errors and Warnings =============

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Environment variable '{0}' referenced in config is not set")]
    MissingEnvVar(String),
}

/// Non-fatal findings reported by `config --validate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub kind: ConfigWarningKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigWarningKind {
    MissingSecret,
    GateBeyondTopK,
    InMemoryStore,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

// ============= Loading and Validation =============

impl AppConfig {
    /// Load and validate configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Validation(e.to_string()))
    }

    /// Check ranges and cross-field constraints. Does no I/O.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chunker_config()?;

        if self.embedding.dimensions == 0 {
            return Err(ConfigError::Validation(
                "embedding.dimensions must be greater than zero".into(),
            ));
        }
        if self.embedding.batch_size == 0 {
            return Err(ConfigError::Validation(
                "embedding.batch_size must be greater than zero".into(),
            ));
        }
        if self.embedding.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "embedding.timeout_secs must be greater than zero".into(),
            ));
        }
        if self.vector_store.collection.trim().is_empty() {
            return Err(ConfigError::Validation(
                "vector_store.collection must not be empty".into(),
            ));
        }
        if cfg!(not(feature = "qdrant")) && self.vector_store.provider == VectorStoreKind::Qdrant {
            return Err(ConfigError::Validation(
                "vector_store.provider = \"qdrant\" requires the 'qdrant' feature".into(),
            ));
        }

        self.evaluation_options()
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        Ok(())
    }

    /// Validate, then collect non-fatal warnings.
    pub fn validate_with_warnings(&self) -> Result<Vec<ConfigWarning>, ConfigError> {
        self.validate()?;

        let mut warnings = Vec::new();

        if let Some(env) = self.embedding.api_key_env.as_deref().filter(|e| !e.is_empty()) {
            if std::env::var(env).is_err() {
                warnings.push(ConfigWarning {
                    kind: ConfigWarningKind::MissingSecret,
                    message: format!("Embedding API key variable '{}' is not set", env),
                });
            }
        }
        if let Some(ref env) = self.vector_store.api_key_env {
            if std::env::var(env).is_err() {
                warnings.push(ConfigWarning {
                    kind: ConfigWarningKind::MissingSecret,
                    message: format!("Vector store API key variable '{}' is not set", env),
                });
            }
        }

        let gate_k = self.evaluation.thresholds.precision_gate_k;
        if gate_k > self.evaluation.top_k {
            warnings.push(ConfigWarning {
                kind: ConfigWarningKind::GateBeyondTopK,
                message: format!(
                    "Precision gate K ({}) exceeds top_k ({}); Precision@{} can never reach 1.0",
                    gate_k, self.evaluation.top_k, gate_k
                ),
            });
        }

        if self.vector_store.provider == VectorStoreKind::Memory {
            warnings.push(ConfigWarning {
                kind: ConfigWarningKind::InMemoryStore,
                message: "In-memory vector store keeps nothing between runs".into(),
            });
        }

        Ok(warnings)
    }

    fn resolve_env(env_name: &str) -> Result<String, ConfigError> {
        std::env::var(env_name).map_err(|_| ConfigError::MissingEnvVar(env_name.to_string()))
    }

    // ============= Runtime conversions =============

    pub fn chunker_config(&self) -> Result<ChunkerConfig, ConfigError> {
        ChunkerConfig::with_min_fragment(
            self.chunking.chunk_size,
            self.chunking.chunk_overlap,
            self.chunking.min_fragment,
        )
        .map_err(|e| ConfigError::Validation(e.to_string()))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.indexing.max_retries,
            Duration::from_millis(self.indexing.retry_base_delay_ms),
        )
    }

    /// Client settings with the API key resolved from the environment.
    pub fn embedding_client_config(&self) -> Result<EmbeddingClientConfig, ConfigError> {
        let api_key = match self.embedding.api_key_env.as_deref() {
            Some(env) if !env.is_empty() => Some(Self::resolve_env(env)?),
            _ => None,
        };
        Ok(EmbeddingClientConfig {
            api_base: self.embedding.api_base.clone(),
            api_key,
            model: self.embedding.model.clone(),
            dimensions: self.embedding.dimensions,
            request_dimensions: self.embedding.request_dimensions,
            timeout: Duration::from_secs(self.embedding.timeout_secs),
        })
    }

    pub fn vector_store_provider(&self) -> Result<VectorStoreProvider, ConfigError> {
        match self.vector_store.provider {
            #[cfg(feature = "qdrant")]
            VectorStoreKind::Qdrant => {
                let api_key = match self.vector_store.api_key_env {
                    Some(ref env) => Some(Self::resolve_env(env)?),
                    None => None,
                };
                Ok(VectorStoreProvider::Qdrant {
                    url: self.vector_store.url.clone(),
                    api_key,
                    collection: self.vector_store.collection.clone(),
                })
            }
            #[cfg(not(feature = "qdrant"))]
            VectorStoreKind::Qdrant => Err(ConfigError::Validation(
                "vector_store.provider = \"qdrant\" requires the 'qdrant' feature".into(),
            )),
            VectorStoreKind::Memory => Ok(VectorStoreProvider::InMemory {
                collection: self.vector_store.collection.clone(),
            }),
        }
    }

    pub fn quality_thresholds(&self) -> QualityThresholds {
        let t = &self.evaluation.thresholds;
        let enabled = |gate: GateKind| !t.disabled.contains(&gate);
        QualityThresholds {
            min_precision_at_k: enabled(GateKind::Precision).then_some(t.min_precision_at_k),
            precision_gate_k: t.precision_gate_k,
            min_mrr: enabled(GateKind::Mrr).then_some(t.min_mrr),
            max_latency_p95_ms: enabled(GateKind::LatencyP95).then_some(t.max_latency_p95_ms),
            min_success_rate: enabled(GateKind::SuccessRate).then_some(t.min_success_rate),
        }
    }

    pub fn evaluation_options(&self) -> EvaluationOptions {
        EvaluationOptions {
            top_k: self.evaluation.top_k,
            concurrency: self.evaluation.concurrency,
            precision_ks: self.evaluation.precision_k.clone(),
            thresholds: self.quality_thresholds(),
        }
    }
}
