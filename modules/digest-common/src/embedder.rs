use anyhow::Result;

/// Opaque text -> dense vector model. Implementations may return unnormalized
/// vectors; the clustering engine L2-normalizes everything it receives.
#[async_trait::async_trait]
pub trait TextEmbedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;
}
