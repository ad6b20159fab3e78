//! Embedding backends behind the core [`Embedder`] trait.
//!
//! | Config Value | Backend |
//! |-------------|---------|
//! | `"disabled"` | [`DisabledEmbedder`]: chunks are indexed without vectors |
//! | `"hash"` | [`HashEmbedder`]: deterministic, offline |
//! | `"openai"` | [`OpenAIEmbedder`]: `POST /v1/embeddings` |
//! | `"ollama"` | [`OllamaEmbedder`]: `POST {url}/api/embed` |
//! | `"local"` | `LocalEmbedder`: fastembed, behind `--features local-embeddings` |
//!
//! Each call is a single attempt. HTTP 429, 5xx, and network errors map
//! to [`EngineError::EmbeddingUnavailable`] so the orchestrator retries
//! them with backoff; any other 4xx or a malformed response maps to
//! [`EngineError::Internal`] and is not retried.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use knowledge_engine_core::embedding::{DisabledEmbedder, Embedder, HashEmbedder};
use knowledge_engine_core::error::{EngineError, EngineResult};

use crate::config::EmbeddingConfig;

const DEFAULT_HASH_DIMS: usize = 256;
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Build the embedder selected by `[embedding] provider`.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "hash" => Ok(Arc::new(HashEmbedder::new(
            config.dims.unwrap_or(DEFAULT_HASH_DIMS),
        ))),
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Arc::new(local::LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

fn http_client(config: &EmbeddingConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

/// Classify a non-success HTTP status.
fn status_error(provider: &str, status: reqwest::StatusCode, body: String) -> EngineError {
    let reason = format!("{} API error {}: {}", provider, status, body);
    if status.as_u16() == 429 || status.is_server_error() {
        EngineError::embedding_unavailable(provider, reason)
    } else {
        EngineError::internal(provider, reason)
    }
}

fn check_shape(
    provider: &str,
    vectors: Vec<Vec<f32>>,
    expected: usize,
    dims: usize,
) -> EngineResult<Vec<Vec<f32>>> {
    if vectors.len() != expected {
        return Err(EngineError::internal(
            provider,
            format!("expected {} embeddings, got {}", expected, vectors.len()),
        ));
    }
    if let Some(v) = vectors.iter().find(|v| v.len() != dims) {
        return Err(EngineError::internal(
            provider,
            format!("expected {} dimensions, got {}", dims, v.len()),
        ));
    }
    Ok(vectors)
}

fn json_vector(provider: &str, value: &serde_json::Value) -> EngineResult<Vec<f32>> {
    value
        .as_array()
        .ok_or_else(|| EngineError::internal(provider, "embedding is not an array"))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| EngineError::internal(provider, "embedding has a non-numeric value"))
        })
        .collect()
}

// ============ OpenAI ============

/// Embeddings from the OpenAI API. Requires `OPENAI_API_KEY`.
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dims: usize,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        Ok(Self {
            client: http_client(config)?,
            api_key,
            model,
            dims,
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_version(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post("https://api.openai.com/v1/embeddings")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::embedding_unavailable("openai", e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(status_error("OpenAI", status, body_text));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EngineError::internal("openai", e.to_string()))?;
        let vectors = parse_openai_response(&json)?;
        check_shape("openai", vectors, texts.len(), self.dims)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> EngineResult<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| EngineError::internal("openai", "response is missing the data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .ok_or_else(|| EngineError::internal("openai", "response item is missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, json_vector("openai", embedding)?));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

/// Embeddings from a local Ollama instance.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());

        Ok(Self {
            client: http_client(config)?,
            url: url.trim_end_matches('/').to_string(),
            model,
            dims,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_version(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                EngineError::embedding_unavailable(
                    "ollama",
                    format!("connection error (is Ollama running at {}?): {}", self.url, e),
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(status_error("Ollama", status, body_text));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EngineError::internal("ollama", e.to_string()))?;
        let vectors = parse_ollama_response(&json)?;
        check_shape("ollama", vectors, texts.len(), self.dims)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> EngineResult<Vec<Vec<f32>>> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| EngineError::internal("ollama", "response is missing the embeddings array"))?
        .iter()
        .map(|v| json_vector("ollama", v))
        .collect()
}

// ============ Local (fastembed) ============

#[cfg(feature = "local-embeddings")]
mod local {
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    use knowledge_engine_core::embedding::Embedder;
    use knowledge_engine_core::error::{EngineError, EngineResult};

    use crate::config::EmbeddingConfig;

    /// Local inference via fastembed. The model is downloaded on first
    /// use and kept loaded afterwards.
    pub struct LocalEmbedder {
        model_name: String,
        dims: usize,
        batch_size: usize,
        model: Arc<Mutex<Option<fastembed::TextEmbedding>>>,
    }

    impl LocalEmbedder {
        pub fn new(config: &EmbeddingConfig) -> Result<Self> {
            let model_name = config
                .model
                .clone()
                .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
            model_for(&model_name)?;
            let dims = config.dims.unwrap_or(match model_name.as_str() {
                "bge-base-en-v1.5" | "nomic-embed-text-v1.5" => 768,
                "bge-large-en-v1.5" => 1024,
                _ => 384,
            });
            Ok(Self {
                model_name,
                dims,
                batch_size: config.batch_size,
                model: Arc::new(Mutex::new(None)),
            })
        }
    }

    fn model_for(name: &str) -> Result<fastembed::EmbeddingModel> {
        match name {
            "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
            "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
            "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
            "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
            other => bail!(
                "Unknown local embedding model: '{}'. Supported models: all-minilm-l6-v2, \
                 bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, nomic-embed-text-v1.5",
                other
            ),
        }
    }

    #[async_trait]
    impl Embedder for LocalEmbedder {
        fn model_version(&self) -> &str {
            &self.model_name
        }

        fn dims(&self) -> usize {
            self.dims
        }

        async fn embed(&self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>> {
            let texts = texts.to_vec();
            let slot = Arc::clone(&self.model);
            let name = self.model_name.clone();
            let batch_size = self.batch_size;

            tokio::task::spawn_blocking(move || {
                let mut guard = slot
                    .lock()
                    .map_err(|_| EngineError::internal("local", "model lock poisoned"))?;
                if guard.is_none() {
                    let kind = model_for(&name).map_err(|e| EngineError::Config(e.to_string()))?;
                    let model = fastembed::TextEmbedding::try_new(
                        fastembed::InitOptions::new(kind).with_show_download_progress(false),
                    )
                    .map_err(|e| {
                        EngineError::embedding_unavailable(
                            "local",
                            format!("failed to initialize model: {}", e),
                        )
                    })?;
                    *guard = Some(model);
                }
                match guard.as_mut() {
                    Some(model) => model
                        .embed(texts, Some(batch_size))
                        .map_err(|e| EngineError::internal("local", e.to_string())),
                    None => Err(EngineError::internal("local", "model not loaded")),
                }
            })
            .await
            .map_err(|e| EngineError::internal("local", e.to_string()))?
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_disabled_and_hash() {
        let disabled = create_embedder(&EmbeddingConfig::default()).unwrap();
        assert!(!disabled.is_enabled());

        let config = EmbeddingConfig {
            provider: "hash".into(),
            dims: Some(32),
            ..Default::default()
        };
        let hash = create_embedder(&config).unwrap();
        assert!(hash.is_enabled());
        assert_eq!(hash.dims(), 32);
    }

    #[test]
    fn test_unknown_provider_fails() {
        let config = EmbeddingConfig {
            provider: "bogus".into(),
            ..Default::default()
        };
        assert!(create_embedder(&config).is_err());
    }

    #[test]
    fn test_status_classification() {
        let e = status_error("OpenAI", reqwest::StatusCode::TOO_MANY_REQUESTS, String::new());
        assert!(e.is_retryable());
        let e = status_error("OpenAI", reqwest::StatusCode::BAD_GATEWAY, String::new());
        assert!(e.is_retryable());
        let e = status_error("OpenAI", reqwest::StatusCode::UNAUTHORIZED, String::new());
        assert!(!e.is_retryable());
    }

    #[test]
    fn test_parse_openai_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        });
        let vectors = parse_openai_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_parse_ollama_rejects_missing_array() {
        let json = serde_json::json!({"error": "model not found"});
        assert!(parse_ollama_response(&json).is_err());
    }

    #[test]
    fn test_shape_mismatch_is_internal() {
        let err = check_shape("openai", vec![vec![1.0]], 2, 1).unwrap_err();
        assert_eq!(err.code(), "internal");
    }
}
