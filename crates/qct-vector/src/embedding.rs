//! Embedding clients for generating vector representations
//!
//! Supports the OpenAI and Ollama embedding APIs, and user-supplied
//! functions with the same text-in, vector-out contract.
//!
//! Author: hephaex@gmail.com

use async_trait::async_trait;
use qct_core::{EmbeddingConfig, EmbeddingProvider, QctError, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

// ============================================================================
// Embedding Trait
// ============================================================================

/// Trait for embedding generation
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts (batch)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Get embedding dimension
    fn dimension(&self) -> usize;

    /// Stable identity of the provider and model, used in cache keys
    fn identity(&self) -> String;
}

fn embedding_error(provider: &str, message: impl Into<String>) -> QctError {
    QctError::Embedding {
        provider: provider.to_string(),
        message: message.into(),
    }
}

/// Reject a returned vector whose length differs from the expected one.
/// `None` means the model's size is unknown and any length is accepted.
fn check_embedding_dimension(
    provider: &str,
    expected: Option<usize>,
    vector: Vec<f32>,
) -> Result<Vec<f32>> {
    match expected {
        Some(expected) if vector.len() != expected => Err(embedding_error(
            provider,
            format!("Returned {} dimensions, expected {}", vector.len(), expected),
        )),
        _ => Ok(vector),
    }
}

// ============================================================================
// OpenAI Embedding Client
// ============================================================================

/// OpenAI embedding API client
pub struct OpenAiEmbedding {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    /// Vector size of a known model
    known_dimension: Option<usize>,
}

const OPENAI_DEFAULT_DIMENSION: usize = 1536;

#[derive(Debug, Serialize)]
struct OpenAiEmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

impl OpenAiEmbedding {
    /// Create a new OpenAI embedding client
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let model = model.into();
        let known_dimension = match model.as_str() {
            "text-embedding-3-small" => Some(1536),
            "text-embedding-3-large" => Some(3072),
            "text-embedding-ada-002" => Some(1536),
            _ => None,
        };

        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            model,
            known_dimension,
        }
    }

    /// Point the client at an OpenAI-compatible API
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Create from config
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config
            .openai_api_key
            .as_ref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| QctError::Config("OPENAI_API_KEY is required".to_string()))?;

        Ok(Self::new(api_key.clone(), config.model.clone())
            .with_base_url(config.openai_base_url.clone()))
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed_batch(&[text.to_string()]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| embedding_error("openai", "No embedding returned"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        tracing::debug!(count = texts.len(), model = %self.model, "Requesting OpenAI embeddings");

        let request = OpenAiEmbeddingRequest {
            input: texts,
            model: &self.model,
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| embedding_error("openai", format!("Embedding request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(embedding_error(
                "openai",
                format!("HTTP {status}: {error_text}"),
            ));
        }

        let result: OpenAiEmbeddingResponse = response.json().await.map_err(|e| {
            embedding_error("openai", format!("Failed to parse embedding response: {e}"))
        })?;

        if result.data.len() != texts.len() {
            return Err(embedding_error(
                "openai",
                format!(
                    "Expected {} embeddings, got {}",
                    texts.len(),
                    result.data.len()
                ),
            ));
        }

        let mut embeddings = result.data;
        embeddings.sort_by_key(|e| e.index);

        embeddings
            .into_iter()
            .map(|e| check_embedding_dimension("openai", self.known_dimension, e.embedding))
            .collect()
    }

    fn dimension(&self) -> usize {
        self.known_dimension.unwrap_or(OPENAI_DEFAULT_DIMENSION)
    }

    fn identity(&self) -> String {
        format!("openai:{}", self.model)
    }
}

// ============================================================================
// Ollama Embedding Client
// ============================================================================

/// Ollama embedding API client
pub struct OllamaEmbedding {
    client: Client,
    base_url: String,
    model: String,
    known_dimension: Option<usize>,
}

const OLLAMA_DEFAULT_DIMENSION: usize = 768;

#[derive(Debug, Serialize)]
struct OllamaEmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbedding {
    /// Create a new Ollama embedding client
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        let model = model.into();
        let known_dimension = match model.as_str() {
            "nomic-embed-text" => Some(768),
            "mxbai-embed-large" => Some(1024),
            "all-minilm" => Some(384),
            _ => None,
        };

        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model,
            known_dimension,
        }
    }

    /// Create from config
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self::new(config.ollama_url.clone(), config.model.clone())
    }
}

#[async_trait]
impl EmbeddingClient for OllamaEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = OllamaEmbeddingRequest {
            model: &self.model,
            prompt: text,
        };

        let response = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| embedding_error("ollama", format!("Embedding request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(embedding_error(
                "ollama",
                format!("HTTP {status}: {error_text}"),
            ));
        }

        let result: OllamaEmbeddingResponse = response.json().await.map_err(|e| {
            embedding_error("ollama", format!("Failed to parse embedding response: {e}"))
        })?;

        check_embedding_dimension("ollama", self.known_dimension, result.embedding)
    }

    fn dimension(&self) -> usize {
        self.known_dimension.unwrap_or(OLLAMA_DEFAULT_DIMENSION)
    }

    fn identity(&self) -> String {
        format!("ollama:{}", self.model)
    }
}

// ============================================================================
// Function Embedding
// ============================================================================

/// Signature of a user-supplied embedding function
pub type EmbeddingFn = dyn Fn(&str) -> Vec<f32> + Send + Sync;

/// Embedding client backed by a caller-supplied function
#[derive(Clone)]
pub struct FnEmbedding {
    name: String,
    dimension: usize,
    func: Arc<EmbeddingFn>,
}

impl FnEmbedding {
    /// Wrap `func`, which must return vectors of length `dimension`.
    ///
    /// `name` identifies the function in cache keys; two functions with
    /// the same name are assumed to produce the same vectors.
    pub fn new<F>(name: impl Into<String>, dimension: usize, func: F) -> Self
    where
        F: Fn(&str) -> Vec<f32> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            dimension,
            func: Arc::new(func),
        }
    }
}

impl fmt::Debug for FnEmbedding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnEmbedding")
            .field("name", &self.name)
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl EmbeddingClient for FnEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        check_embedding_dimension(&self.name, Some(self.dimension), (self.func)(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn identity(&self) -> String {
        format!("fn:{}", self.name)
    }
}

// ============================================================================
// Factory function
// ============================================================================

/// Create an embedding client from config
pub fn create_embedding_client(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingClient>> {
    match config.provider {
        EmbeddingProvider::OpenAI => Ok(Arc::new(OpenAiEmbedding::from_config(config)?)),
        EmbeddingProvider::Ollama => Ok(Arc::new(OllamaEmbedding::from_config(config))),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_dimension() {
        let client = OpenAiEmbedding::new("test-key", "text-embedding-3-small");
        assert_eq!(client.dimension(), 1536);
        assert_eq!(client.identity(), "openai:text-embedding-3-small");

        let client = OpenAiEmbedding::new("test-key", "text-embedding-3-large");
        assert_eq!(client.dimension(), 3072);
    }

    #[test]
    fn test_ollama_dimension() {
        let client = OllamaEmbedding::new("http://localhost:11434/", "nomic-embed-text");
        assert_eq!(client.dimension(), 768);
        assert_eq!(client.base_url, "http://localhost:11434");

        let client = OllamaEmbedding::new("http://localhost:11434", "mxbai-embed-large");
        assert_eq!(client.dimension(), 1024);
    }

    #[test]
    fn test_unknown_model_uses_default_dimension() {
        let client = OpenAiEmbedding::new("test-key", "my-finetune");
        assert_eq!(client.known_dimension, None);
        assert_eq!(client.dimension(), 1536);

        let client = OllamaEmbedding::new("http://localhost:11434", "custom-embed");
        assert_eq!(client.dimension(), 768);
    }

    #[test]
    fn test_check_embedding_dimension() {
        let vector = check_embedding_dimension("openai", Some(3), vec![0.1, 0.2, 0.3]).unwrap();
        assert_eq!(vector.len(), 3);

        let err = check_embedding_dimension("openai", Some(1536), vec![0.0; 768]).unwrap_err();
        assert_eq!(
            err,
            QctError::Embedding {
                provider: "openai".into(),
                message: "Returned 768 dimensions, expected 1536".into(),
            }
        );

        // Unknown model size: accepted as returned
        assert!(check_embedding_dimension("ollama", None, vec![0.0; 5]).is_ok());
    }

    #[test]
    fn test_openai_requires_api_key() {
        let config = EmbeddingConfig::default();
        let err = create_embedding_client(&config).err().unwrap();
        assert_eq!(err.kind(), qct_core::ErrorKind::Configuration);

        let config = EmbeddingConfig {
            openai_api_key: Some("sk-test".to_string()),
            ..Default::default()
        };
        assert!(create_embedding_client(&config).is_ok());
    }

    #[test]
    fn test_ollama_needs_no_key() {
        let config = EmbeddingConfig {
            provider: EmbeddingProvider::Ollama,
            model: "all-minilm".to_string(),
            ..Default::default()
        };
        let client = create_embedding_client(&config).unwrap();
        assert_eq!(client.dimension(), 384);
    }

    #[tokio::test]
    async fn test_fn_embedding() {
        let embedder = FnEmbedding::new("len", 2, |text: &str| vec![text.len() as f32, 1.0]);
        assert_eq!(embedder.embed("abc").await.unwrap(), vec![3.0, 1.0]);
        assert_eq!(embedder.identity(), "fn:len");

        let batch = embedder
            .embed_batch(&["a".to_string(), "ab".to_string()])
            .await
            .unwrap();
        assert_eq!(batch, vec![vec![1.0, 1.0], vec![2.0, 1.0]]);
    }

    #[tokio::test]
    async fn test_fn_embedding_rejects_wrong_dimension() {
        let embedder = FnEmbedding::new("short", 3, |_: &str| vec![1.0]);
        let err = embedder.embed("text").await.unwrap_err();
        assert!(matches!(err, QctError::Embedding { .. }));
    }
}
