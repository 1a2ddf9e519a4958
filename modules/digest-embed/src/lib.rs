mod client;
mod embedder;
mod types;

pub use client::EmbeddingClient;
pub use embedder::RemoteEmbedder;
