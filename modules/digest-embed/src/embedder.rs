use anyhow::{anyhow, Result};

use digest_common::TextEmbedder;

use crate::client::EmbeddingClient;

/// Dense embedder backed by a remote OpenAI-compatible endpoint.
pub struct RemoteEmbedder {
    client: EmbeddingClient,
    model: String,
}

impl RemoteEmbedder {
    pub fn new(client: EmbeddingClient, model: &str) -> Self {
        Self {
            client,
            model: model.to_string(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait::async_trait]
impl TextEmbedder for RemoteEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.client
            .embed_batch(&self.model, &[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No embedding in response"))
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        self.client.embed_batch(&self.model, &texts).await
    }
}
