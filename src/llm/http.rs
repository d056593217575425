//! OpenAI-compatible HTTP provider.
//!
//! Speaks `/v1/chat/completions` and `/v1/embeddings` against either a
//! locally hosted server (llama.cpp, LM Studio) or a hosted endpoint with an
//! API key. The variant is an explicit configuration choice, never inferred
//! from the shape of a path or URL.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::errors::{EngineError, Result};
use super::provider::{Embedder, TextGenerator};
use super::types::GenerateRequest;

/// Backend endpoint selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProviderConfig {
    /// Local inference server, no authentication.
    Local {
        base_url: String,
        model: String,
        embedding_model: String,
        embedding_dimension: usize,
    },
    /// Hosted endpoint with bearer-token authentication.
    Hosted {
        base_url: String,
        api_key: String,
        model: String,
        embedding_model: String,
        embedding_dimension: usize,
    },
}

impl ProviderConfig {
    fn base_url(&self) -> &str {
        match self {
            ProviderConfig::Local { base_url, .. } => base_url,
            ProviderConfig::Hosted { base_url, .. } => base_url,
        }
    }

    fn api_key(&self) -> Option<&str> {
        match self {
            ProviderConfig::Local { .. } => None,
            ProviderConfig::Hosted { api_key, .. } => Some(api_key),
        }
    }

    fn model(&self) -> &str {
        match self {
            ProviderConfig::Local { model, .. } => model,
            ProviderConfig::Hosted { model, .. } => model,
        }
    }

    fn embedding_model(&self) -> &str {
        match self {
            ProviderConfig::Local {
                embedding_model, ..
            } => embedding_model,
            ProviderConfig::Hosted {
                embedding_model, ..
            } => embedding_model,
        }
    }

    fn embedding_dimension(&self) -> usize {
        match self {
            ProviderConfig::Local {
                embedding_dimension,
                ..
            } => *embedding_dimension,
            ProviderConfig::Hosted {
                embedding_dimension,
                ..
            } => *embedding_dimension,
        }
    }
}

pub struct HttpProvider {
    config: ProviderConfig,
    base_url: String,
    client: Client,
}

impl HttpProvider {
    pub fn new(config: ProviderConfig) -> Self {
        let base_url = config.base_url().trim_end_matches('/').to_string();
        Self {
            config,
            base_url,
            client: Client::new(),
        }
    }

    /// Whether the endpoint answers `/v1/models`.
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/v1/models", self.base_url);
        match self.request(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.get(url);
        if let Some(key) = self.config.api_key() {
            builder = builder.bearer_auth(key);
        }
        builder
    }

    fn post(&self, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.post(url);
        if let Some(key) = self.config.api_key() {
            builder = builder.bearer_auth(key);
        }
        builder
    }

    fn classify_send_error(err: reqwest::Error) -> EngineError {
        if err.is_timeout() || err.is_connect() {
            EngineError::transient(err)
        } else {
            EngineError::internal(err)
        }
    }

    fn classify_status(status: StatusCode, body: String) -> EngineError {
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            EngineError::TransientBackend(format!("{}: {}", status, body))
        } else {
            EngineError::Backend(format!("{}: {}", status, body))
        }
    }
}

#[async_trait]
impl TextGenerator for HttpProvider {
    fn name(&self) -> &str {
        match self.config {
            ProviderConfig::Local { .. } => "http-local",
            ProviderConfig::Hosted { .. } => "http-hosted",
        }
    }

    async fn generate(&self, request: GenerateRequest) -> Result<String> {
        let url = format!("{}/v1/chat/completions", self.base_url);

        let mut body = json!({
            "model": self.config.model(),
            "messages": request.messages,
            "stream": false,
        });

        if let Some(obj) = body.as_object_mut() {
            if let Some(t) = request.max_tokens {
                obj.insert("max_tokens".to_string(), json!(t));
            }
            if let Some(t) = request.temperature {
                obj.insert("temperature".to_string(), json!(t));
            }
            if let Some(s) = request.stop {
                obj.insert("stop".to_string(), json!(s));
            }
        }

        let res = self
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(Self::classify_send_error)?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, text));
        }

        let payload: Value = res.json().await.map_err(EngineError::internal)?;

        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        Ok(content)
    }
}

#[async_trait]
impl Embedder for HttpProvider {
    fn dimension(&self) -> usize {
        self.config.embedding_dimension()
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/v1/embeddings", self.base_url);

        let body = json!({
            "model": self.config.embedding_model(),
            "input": inputs,
        });

        let res = self
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(Self::classify_send_error)?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, text));
        }

        let payload: Value = res.json().await.map_err(EngineError::internal)?;

        let mut embeddings = Vec::new();
        if let Some(data) = payload["data"].as_array() {
            for item in data {
                if let Some(vals) = item["embedding"].as_array() {
                    let vec: Vec<f32> = vals
                        .iter()
                        .filter_map(|v| v.as_f64().map(|f| f as f32))
                        .collect();
                    embeddings.push(vec);
                }
            }
        }

        if embeddings.len() != inputs.len() {
            return Err(EngineError::Backend(format!(
                "embedding response had {} vectors for {} inputs",
                embeddings.len(),
                inputs.len()
            )));
        }

        Ok(embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_config_selects_variant_explicitly() {
        let raw = r#"{"kind": "hosted", "base_url": "https://api.example.com",
            "api_key": "sk-test", "model": "gpt-test",
            "embedding_model": "embed-test", "embedding_dimension": 384}"#;
        let config: ProviderConfig = serde_json::from_str(raw).unwrap();

        assert!(matches!(config, ProviderConfig::Hosted { .. }));
        assert_eq!(config.api_key(), Some("sk-test"));
        assert_eq!(config.embedding_dimension(), 384);
    }

    #[test]
    fn local_variant_has_no_key() {
        let config = ProviderConfig::Local {
            base_url: "http://localhost:8088/".to_string(),
            model: "qwen".to_string(),
            embedding_model: "bge-small".to_string(),
            embedding_dimension: 384,
        };
        let provider = HttpProvider::new(config);

        assert_eq!(provider.name(), "http-local");
        assert_eq!(provider.base_url, "http://localhost:8088");
        assert!(provider.config.api_key().is_none());
    }
}
