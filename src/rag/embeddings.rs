//! Embedding client for an OpenAI-compatible `/embeddings` endpoint.
//!
//! One call to [`Embedder::embed`] is one HTTP request. Retries are the
//! caller's business: the indexer retries transient failures, the evaluation
//! engine never does.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Dense vector for one input text.
pub type EmbeddingVector = Vec<f32>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EmbeddingError {
    #[error("No texts provided for embedding")]
    NoTextsProvided,

    #[error("Embedding API returned {status}: {body}")]
    ApiError { status: u16, body: String },

    #[error("Embedding request failed: {0}")]
    NetworkError(String),

    #[error("Embedding request timed out")]
    Timeout,

    #[error("Malformed embedding response ({response_bytes} bytes): {reason}")]
    MalformedResponse {
        reason: String,
        response_bytes: usize,
    },

    #[error("Embedding request cancelled")]
    Cancelled,
}

impl EmbeddingError {
    pub fn is_transient(&self) -> bool {
        matches!(self, EmbeddingError::Timeout | EmbeddingError::NetworkError(_))
    }
}

/// Token accounting reported by the API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

impl EmbeddingUsage {
    fn add(&mut self, other: EmbeddingUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Vectors in input order, plus usage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddingBatch {
    pub vectors: Vec<EmbeddingVector>,
    pub usage: EmbeddingUsage,
}

/// Converts text batches into dense vectors.
///
/// Implementations must return exactly one vector per input, in input order,
/// or fail the whole batch.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;

    fn dimensions(&self) -> usize;

    async fn embed(
        &self,
        texts: &[String],
        cancel: &CancellationToken,
    ) -> Result<EmbeddingBatch, EmbeddingError>;
}

/// Embed a long list as consecutive `embed` calls of at most `batch_size`.
pub async fn embed_batched(
    embedder: &dyn Embedder,
    texts: &[String],
    batch_size: usize,
    cancel: &CancellationToken,
) -> Result<EmbeddingBatch, EmbeddingError> {
    if texts.is_empty() {
        return Err(EmbeddingError::NoTextsProvided);
    }

    let mut batch = EmbeddingBatch {
        vectors: Vec::with_capacity(texts.len()),
        usage: EmbeddingUsage::default(),
    };
    for slice in texts.chunks(batch_size.max(1)) {
        let part = embedder.embed(slice, cancel).await?;
        batch.vectors.extend(part.vectors);
        batch.usage.add(part.usage);
    }
    Ok(batch)
}

// ============================================================================
// HTTP client
// ============================================================================

#[derive(Debug, Clone)]
pub struct EmbeddingClientConfig {
    /// Base URL, e.g. `https://api.openai.com/v1`.
    pub api_base: String,
    pub api_key: Option<String>,
    pub model: String,
    pub dimensions: usize,
    /// Send `dimensions` in the request body (models that support shortening).
    pub request_dimensions: bool,
    pub timeout: Duration,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    #[serde(default)]
    usage: EmbeddingUsage,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: EmbeddingVector,
}

pub struct HttpEmbeddingClient {
    http: reqwest::Client,
    config: EmbeddingClientConfig,
}

impl HttpEmbeddingClient {
    pub fn new(config: EmbeddingClientConfig) -> Result<Self, EmbeddingError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| EmbeddingError::NetworkError(format!("Failed to build client: {}", e)))?;
        Ok(Self { http, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/embeddings", self.config.api_base.trim_end_matches('/'))
    }

    async fn send(&self, texts: &[String]) -> Result<EmbeddingBatch, EmbeddingError> {
        let mut request = self.http.post(self.endpoint()).json(&EmbeddingRequest {
            model: &self.config.model,
            input: texts,
            dimensions: self.config.request_dimensions.then_some(self.config.dimensions),
        });
        if let Some(ref key) = self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status();
        let body = response.text().await.map_err(map_transport_error)?;

        if !status.is_success() {
            return Err(EmbeddingError::ApiError {
                status: status.as_u16(),
                body,
            });
        }

        self.parse_response(&body, texts.len())
    }

    fn parse_response(&self, body: &str, expected: usize) -> Result<EmbeddingBatch, EmbeddingError> {
        let malformed = |reason: String| {
            warn!(
                response_bytes = body.len(),
                expected,
                reason = %reason,
                "Malformed embedding response"
            );
            EmbeddingError::MalformedResponse {
                reason,
                response_bytes: body.len(),
            }
        };

        let parsed: EmbeddingResponse = serde_json::from_str(body)
            .map_err(|e| malformed(format!("unparsable payload: {}", e)))?;

        if parsed.data.len() != expected {
            return Err(malformed(format!(
                "expected {} vectors, got {}",
                expected,
                parsed.data.len()
            )));
        }

        let mut slots: Vec<Option<EmbeddingVector>> = vec![None; expected];
        for item in parsed.data {
            if item.embedding.len() != self.config.dimensions {
                return Err(malformed(format!(
                    "vector {} has {} dimensions, expected {}",
                    item.index,
                    item.embedding.len(),
                    self.config.dimensions
                )));
            }
            let Some(slot) = slots.get_mut(item.index) else {
                return Err(malformed(format!("index {} out of range", item.index)));
            };
            if slot.is_some() {
                return Err(malformed(format!("duplicate index {}", item.index)));
            }
            *slot = Some(item.embedding);
        }

        let vectors = slots.into_iter().flatten().collect();
        Ok(EmbeddingBatch {
            vectors,
            usage: parsed.usage,
        })
    }
}

fn map_transport_error(e: reqwest::Error) -> EmbeddingError {
    if e.is_timeout() {
        EmbeddingError::Timeout
    } else {
        EmbeddingError::NetworkError(e.to_string())
    }
}

#[async_trait]
impl Embedder for HttpEmbeddingClient {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    async fn embed(
        &self,
        texts: &[String],
        cancel: &CancellationToken,
    ) -> Result<EmbeddingBatch, EmbeddingError> {
        if texts.is_empty() {
            return Err(EmbeddingError::NoTextsProvided);
        }

        let start = Instant::now();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EmbeddingError::Cancelled),
            result = self.send(texts) => result,
        };

        debug!(
            model = %self.config.model,
            texts = texts.len(),
            ok = result.is_ok(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Embedding request finished"
        );
        result
    }
}
