pub mod types;
pub mod config;
pub mod embedder;
pub mod error;

pub use types::*;
pub use config::*;
pub use embedder::TextEmbedder;
pub use error::DigestError;
