use ai_client::openai::OpenAi;
use anyhow::Result;
use async_trait::async_trait;

use crate::traits::TextGenerator;

/// Chat-completion backed generator. Reasoning-model `<think>` blocks are
/// stripped by the client before the text reaches the parser.
pub struct LlmGenerator {
    client: OpenAi,
}

impl LlmGenerator {
    pub fn new(client: OpenAi) -> Self {
        Self { client }
    }

    pub fn local(base_url: &str, model: &str) -> Self {
        Self::new(OpenAi::local(base_url, model))
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.client = self.client.with_api_key(api_key);
        self
    }

    pub fn model(&self) -> &str {
        self.client.model()
    }
}

#[async_trait]
impl TextGenerator for LlmGenerator {
    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        self.client.complete(prompt, max_tokens).await
    }
}
