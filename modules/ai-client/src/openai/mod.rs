mod client;
pub(crate) mod types;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::traits::{ChatAgent, EmbedAgent, Message};
use crate::util::strip_think_blocks;
use client::{OpenAiClient, OPENAI_API_URL};

const DEFAULT_MAX_TOKENS: u32 = 2000;

// =============================================================================
// OpenAi Agent
// =============================================================================

/// Client for any server speaking the OpenAI chat/embeddings wire format.
#[derive(Clone)]
pub struct OpenAi {
    api_key: Option<String>,
    pub(crate) model: String,
    embedding_model: String,
    base_url: String,
    temperature: f32,
    http: reqwest::Client,
}

impl OpenAi {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            model: model.into(),
            embedding_model: "text-embedding-3-small".to_string(),
            base_url: OPENAI_API_URL.to_string(),
            temperature: 0.0,
            http: reqwest::Client::new(),
        }
    }

    /// Client for an unauthenticated local server such as Ollama (`http://localhost:11434/v1`).
    pub fn local(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: None,
            model: model.into(),
            embedding_model: "nomic-embed-text".to_string(),
            base_url: base_url.into(),
            temperature: 0.0,
            http: reqwest::Client::new(),
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Get the model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    fn client(&self) -> OpenAiClient {
        OpenAiClient::new(self.api_key.as_deref(), self.http.clone()).with_base_url(&self.base_url)
    }

    /// Single-prompt completion, the shape used by templated pipelines.
    pub async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        self.chat(vec![Message::user(prompt)], Some(max_tokens)).await
    }
}

// =============================================================================
// ChatAgent Implementation
// =============================================================================

#[async_trait]
impl ChatAgent for OpenAi {
    async fn chat(&self, messages: Vec<Message>, max_tokens: Option<u32>) -> Result<String> {
        let mut request = types::ChatRequest::new(&self.model);
        for message in &messages {
            request = request.message(message.into());
        }
        request = request.token_limit(max_tokens.unwrap_or(DEFAULT_MAX_TOKENS));
        if !types::uses_max_completion_tokens(&self.model) {
            request = request.temperature(self.temperature);
        }

        let raw = self.client().chat(&request).await?;
        Ok(strip_think_blocks(&raw))
    }
}

// =============================================================================
// EmbedAgent Implementation
// =============================================================================

#[async_trait]
impl EmbedAgent for OpenAi {
    async fn embed(&self, text: impl Into<String> + Send) -> Result<Vec<f32>> {
        self.client()
            .embed_batch(&self.embedding_model, &[text.into()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No embedding in response"))
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.client()
            .embed_batch(&self.embedding_model, &texts)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_new() {
        let ai = OpenAi::new("sk-test", "gpt-4o");
        assert_eq!(ai.model, "gpt-4o");
        assert_eq!(ai.api_key.as_deref(), Some("sk-test"));
        assert_eq!(ai.embedding_model, "text-embedding-3-small");
        assert_eq!(ai.base_url, OPENAI_API_URL);
    }

    #[test]
    fn test_local_has_no_api_key() {
        let ai = OpenAi::local("http://localhost:11434/v1", "llama3.1");
        assert!(ai.api_key.is_none());
        assert_eq!(ai.embedding_model(), "nomic-embed-text");
    }

    #[test]
    fn test_openai_with_embedding_model() {
        let ai = OpenAi::new("sk-test", "gpt-4o").with_embedding_model("text-embedding-3-large");
        assert_eq!(ai.embedding_model, "text-embedding-3-large");
    }

    #[test]
    fn test_openai_with_base_url() {
        let ai = OpenAi::new("sk-test", "gpt-4o").with_base_url("https://custom.api.com");
        assert_eq!(ai.base_url, "https://custom.api.com");
    }

    #[tokio::test]
    async fn test_embed_batch_empty_skips_request() {
        // Unroutable base URL: any request would fail.
        let ai = OpenAi::local("http://127.0.0.1:1", "llama3.1");
        let vectors = ai.embed_batch(Vec::new()).await.unwrap();
        assert!(vectors.is_empty());
    }
}
