//! Dense and sparse views of the corpus.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, info};

use digest_common::{DigestError, NormalizedPost, SparseConfig, TextEmbedder};

use crate::stopwords;
use crate::tfidf::{DocFrequency, TfidfParams, TfidfVectorizer};
use crate::vector::normalized;

/// Produces the dense (semantic) and sparse (lexical) matrices for a corpus.
pub struct DualEmbedder {
    embedder: Arc<dyn TextEmbedder>,
    batch_size: usize,
    concurrency: usize,
    sparse: SparseConfig,
}

impl DualEmbedder {
    pub fn new(embedder: Arc<dyn TextEmbedder>, batch_size: usize, sparse: SparseConfig) -> Self {
        Self {
            embedder,
            batch_size: batch_size.max(1),
            concurrency: 1,
            sparse,
        }
    }

    /// Embed up to `concurrency` batches at once. Output order is unchanged.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Unit-length dense vectors of each post's clean text, in corpus order.
    pub async fn dense(&self, posts: &[NormalizedPost]) -> Result<Vec<Vec<f32>>, DigestError> {
        let texts: Vec<String> = posts.iter().map(|p| p.clean_text.clone()).collect();

        let batches: Vec<Vec<String>> = texts.chunks(self.batch_size).map(<[String]>::to_vec).collect();
        let results: Vec<_> = stream::iter(batches.into_iter().enumerate().map(
            |(batch_no, batch)| async move {
                (batch_no, batch.len(), self.embedder.embed_batch(batch).await)
            },
        ))
        .buffered(self.concurrency)
        .collect()
        .await;

        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(texts.len());
        for (batch_no, expected, result) in results {
            let out = result
                .map_err(|e| DigestError::Embedding(format!("batch {batch_no}: {e:#}")))?;
            if out.len() != expected {
                return Err(DigestError::Embedding(format!(
                    "batch {batch_no}: model returned {} vectors for {} texts",
                    out.len(),
                    expected
                )));
            }
            debug!(batch = batch_no, size = expected, "Embedded batch");
            vectors.extend(out);
        }

        if let Some(expected) = vectors.first().map(Vec::len) {
            if expected == 0 {
                return Err(DigestError::Embedding("model returned empty vectors".to_string()));
            }
            if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
                return Err(DigestError::DimensionMismatch {
                    stage: "dense embedding",
                    expected,
                    found: bad.len(),
                });
            }
        }

        info!(
            posts = vectors.len(),
            dim = vectors.first().map_or(0, Vec::len),
            "Dense embeddings ready"
        );
        Ok(vectors.into_iter().map(normalized).collect())
    }

    /// L2-normalized TF-IDF rows over each post's lexical document.
    pub fn sparse(&self, posts: &[NormalizedPost]) -> Result<Vec<Vec<f32>>, DigestError> {
        let docs: Vec<String> = posts.iter().map(sparse_document).collect();
        let params = TfidfParams {
            ngram_max: 2,
            min_df: DocFrequency::Count(self.sparse.min_df),
            max_df: DocFrequency::Fraction(self.sparse.max_df),
            max_features: Some(self.sparse.max_features),
        };
        let mut vectorizer = TfidfVectorizer::new(params, &stopwords::ENGLISH);
        let rows = vectorizer.fit_transform(&docs)?;

        info!(posts = rows.len(), vocabulary = vectorizer.dim(), "Sparse embeddings ready");
        Ok(rows)
    }
}

/// Clean text with entities and hashtags repeated for lexical anchoring.
pub fn sparse_document(post: &NormalizedPost) -> String {
    let repeat = |items: &[String]| {
        items
            .iter()
            .chain(items.iter())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    };
    format!(
        "{} {} {}",
        post.clean_text,
        repeat(&post.entities),
        repeat(&post.hashtags)
    )
}
