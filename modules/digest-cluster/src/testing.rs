// Test doubles for the clustering engine.
//
// - FixedEmbedder (TextEmbedder): exact vectors for registered texts, tight
//   topic blobs for texts containing a registered keyword, hash-based vectors
//   for everything else.
// - Post builders for assembling corpora in a line or two.

use std::collections::HashMap;

use anyhow::{bail, Result};
use async_trait::async_trait;

use digest_common::{Author, Metrics, Post, TextEmbedder};

// ---------------------------------------------------------------------------
// Test constants
// ---------------------------------------------------------------------------

/// Standard embedding dimension for test vectors.
pub const TEST_EMBEDDING_DIM: usize = 64;

/// How far a topic member may drift from its topic center.
const TOPIC_JITTER: f32 = 0.05;

// ---------------------------------------------------------------------------
// FixedEmbedder
// ---------------------------------------------------------------------------

/// Deterministic embedder for testing.
pub struct FixedEmbedder {
    vectors: HashMap<String, Vec<f32>>,
    topics: Vec<(String, Vec<f32>)>,
    dimension: usize,
    fail: bool,
}

impl Default for FixedEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl FixedEmbedder {
    pub fn new() -> Self {
        Self::with_dimension(TEST_EMBEDDING_DIM)
    }

    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            vectors: HashMap::new(),
            topics: Vec::new(),
            dimension,
            fail: false,
        }
    }

    /// An embedder whose every call errors, for failure-path tests.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    /// Register a text->vector mapping for controlled similarity.
    pub fn on_text(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.to_string(), vector);
        self
    }

    /// Texts containing `keyword` (case-insensitive) land near `center`.
    pub fn on_topic(mut self, keyword: &str, center: Vec<f32>) -> Self {
        self.topics.push((keyword.to_lowercase(), center));
        self
    }

    /// Generate a deterministic hash-based unit vector for unmatched text.
    fn hash_vector(&self, text: &str) -> Vec<f32> {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        text.hash(&mut hasher);
        let mut state = hasher.finish();

        let mut vec = vec![0.0f32; self.dimension];
        for v in vec.iter_mut() {
            // Simple LCG PRNG
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            *v = ((state >> 33) as f32 / (1u64 << 31) as f32) * 2.0 - 1.0;
        }
        crate::vector::normalized(vec)
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        if let Some(v) = self.vectors.get(text) {
            return v.clone();
        }
        let lowered = text.to_lowercase();
        if let Some((_, center)) = self.topics.iter().find(|(kw, _)| lowered.contains(kw.as_str())) {
            let jitter = self.hash_vector(text);
            return center
                .iter()
                .zip(jitter)
                .map(|(c, j)| c + TOPIC_JITTER * j)
                .collect();
        }
        self.hash_vector(text)
    }
}

#[async_trait]
impl TextEmbedder for FixedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.fail {
            bail!("embedding backend unavailable");
        }
        Ok(self.vector_for(text))
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if self.fail {
            bail!("embedding backend unavailable");
        }
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

/// Unit vector along `axis`.
pub fn axis(dimension: usize, axis: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dimension];
    v[axis % dimension] = 1.0;
    v
}

// ---------------------------------------------------------------------------
// Post builders
// ---------------------------------------------------------------------------

pub fn post(id: &str, text: &str) -> Post {
    Post {
        id: id.to_string(),
        text: text.to_string(),
        created_at: Some("Wed Oct 10 20:19:24 +0000 2018".to_string()),
        author: Author {
            name: format!("User {id}"),
            handle: format!("user{id}"),
        },
        metrics: Metrics::default(),
        is_retweet: false,
        is_quote: false,
    }
}

pub fn post_by(id: &str, handle: &str, text: &str, likes: u64) -> Post {
    Post {
        author: Author {
            name: handle.to_string(),
            handle: handle.to_string(),
        },
        metrics: Metrics {
            likes,
            ..Default::default()
        },
        ..post(id, text)
    }
}
