use thiserror::Error;

#[derive(Error, Debug)]
pub enum DigestError {
    #[error("Corpus too small: {found} posts after dedup and retweet filtering, need at least {required}")]
    CorpusTooSmall { found: usize, required: usize },

    #[error("Vectorizer error: {0}")]
    Vectorizer(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Dimension mismatch in {stage}: expected {expected}, got {found}")]
    DimensionMismatch {
        stage: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
