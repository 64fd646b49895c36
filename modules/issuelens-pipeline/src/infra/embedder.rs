use ai_client::openai::OpenAi;
use ai_client::traits::EmbedAgent;
use anyhow::Result;

pub use issuelens_common::TextEmbedder;

/// Embeddings via an OpenAI-compatible `/embeddings` endpoint.
pub struct Embedder {
    client: OpenAi,
}

impl Embedder {
    /// Unauthenticated local server (Ollama and friends).
    pub fn local(base_url: &str, model: &str) -> Self {
        let client = OpenAi::local(base_url, model).with_embedding_model(model);
        Self { client }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.client = self.client.with_api_key(api_key);
        self
    }

    pub fn model(&self) -> &str {
        self.client.embedding_model()
    }
}

#[async_trait::async_trait]
impl TextEmbedder for Embedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.client.embed(text.to_string()).await
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        self.client.embed_batch(texts).await
    }
}
