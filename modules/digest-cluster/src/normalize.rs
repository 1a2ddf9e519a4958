//! Post normalization and corpus preparation.
//!
//! Markup that would dominate embeddings (links, handles, retweet markers) is
//! stripped from the text; hashtags, cashtags, mentions and capitalized entity
//! candidates are lifted out as structured features first.

use std::collections::{BTreeSet, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use tracing::info;

use digest_common::{DigestError, NormalizedPost, Post};

static HASHTAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#(\w+)").unwrap());
static CASHTAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$([A-Z]{2,5})").unwrap());
static MENTION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"@(\w+)").unwrap());
static URL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"https?://\S+").unwrap());
static SHORT_LINK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"t\.co/\S+").unwrap());
static RT_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^RT\s+").unwrap());
static VIA_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bvia\s+@\w+").unwrap());
static NON_WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w]").unwrap());

/// Capitalized words that usually just start a sentence.
const SENTENCE_STARTERS: &[&str] = &[
    "The", "This", "That", "What", "When", "Where", "Why", "How", "I", "We", "They", "You", "It",
    "A", "An", "And", "Or", "But", "Just", "Now", "New", "Today", "Here", "So", "If", "My", "Your",
];

static SENTENCE_STARTER_SET: LazyLock<HashSet<&'static str>> =
    LazyLock::new(|| SENTENCE_STARTERS.iter().copied().collect());

fn captures(re: &Regex, text: &str) -> Vec<String> {
    re.captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Text used for embedding: links, retweet markers and handles removed.
pub fn clean_text(text: &str) -> String {
    let text = URL_RE.replace_all(text, "");
    let text = SHORT_LINK_RE.replace_all(&text, "");
    let text = RT_PREFIX_RE.replace(&text, "");
    let text = VIA_RE.replace_all(&text, "");
    let text = MENTION_RE.replace_all(&text, "@USER");
    let text = HASHTAG_RE.replace_all(&text, "$1");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Capitalized tokens from the raw text that are not sentence starters.
pub fn entity_candidates(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|word| NON_WORD_RE.replace_all(word, "").into_owned())
        .filter(|word| {
            word.chars().count() > 1
                && word.chars().next().is_some_and(char::is_uppercase)
                && !SENTENCE_STARTER_SET.contains(word.as_str())
        })
        .collect()
}

pub fn normalize_post(post: Post) -> NormalizedPost {
    let raw = post.text.as_str();
    let hashtags = captures(&HASHTAG_RE, raw);
    let cashtags = captures(&CASHTAG_RE, raw);
    let mentions = captures(&MENTION_RE, raw);

    let entities: BTreeSet<String> = entity_candidates(raw)
        .into_iter()
        .chain(hashtags.iter().cloned())
        .chain(cashtags.iter().cloned())
        .collect();

    NormalizedPost {
        clean_text: clean_text(raw),
        hashtags,
        cashtags,
        mentions,
        entities: entities.into_iter().collect(),
        post,
    }
}

/// Deduplicate by id (first occurrence wins, empty ids dropped) and drop retweets.
pub fn dedup_posts(posts: Vec<Post>) -> Vec<Post> {
    let mut seen = HashSet::new();
    posts
        .into_iter()
        .filter(|p| !p.id.is_empty() && seen.insert(p.id.clone()))
        .filter(|p| !p.is_retweet)
        .collect()
}

/// Build the normalized corpus for one run.
pub fn prepare_corpus(posts: Vec<Post>, min_posts: usize) -> Result<Vec<NormalizedPost>, DigestError> {
    let loaded = posts.len();
    let posts = dedup_posts(posts);

    info!(loaded, kept = posts.len(), "Deduplicated posts and removed retweets");

    if posts.len() < min_posts {
        return Err(DigestError::CorpusTooSmall {
            found: posts.len(),
            required: min_posts,
        });
    }

    Ok(posts.into_iter().map(normalize_post).collect())
}
