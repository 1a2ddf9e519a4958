//! Rule-based topic tagging.
//!
//! Keyword tables per topic, matched case-insensitively against the post text
//! and its hashtags, plus a table of accounts whose mention signals a topic.
//! Table order is priority order: the first matching topic is the primary.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use digest_common::{NormalizedPost, NOISE};

pub const GENERAL_TOPIC: &str = "general";

const TOPIC_PATTERNS: &[(&str, &[&str])] = &[
    (
        "ai",
        &[
            r"\bai\b", r"\bgpt", r"\bclaude\b", r"\bllm", r"\bopenai\b", r"\banthropic\b",
            r"\bgemini\b", r"\bcopilot\b", r"\bchatgpt\b", r"\bmodel\b", r"\bagent",
            r"\bmachine learning\b", r"\bdeep learning\b", r"\bneural\b",
        ],
    ),
    (
        "crypto",
        &[
            r"\bbtc\b", r"\beth\b", r"\bbitcoin\b", r"\bethereum\b", r"\bcrypto\b",
            r"\bsolana\b", r"\bnft\b", r"\bdefi\b", r"\bweb3\b", r"\btoken\b",
            r"\bwallet\b", r"\bblockchain\b",
        ],
    ),
    (
        "politics",
        &[
            r"\btrump\b", r"\bbiden\b", r"\bcongress\b", r"\bsenate\b", r"\bhouse\b",
            r"\bdemocrat", r"\brepublican", r"\bgop\b", r"\belection\b", r"\bvote\b",
            r"\bpolicy\b", r"\bgovernment\b", r"\bpolitics\b", r"\bpresident\b",
        ],
    ),
    (
        "tech",
        &[
            r"\bstartup\b", r"\bvc\b", r"\bfunding\b", r"\bipo\b", r"\bacquisition\b",
            r"\bsaas\b", r"\bapi\b", r"\bcloud\b", r"\baws\b", r"\bgoogle\b",
            r"\bmicrosoft\b", r"\bmeta\b", r"\bapple\b", r"\btesla\b",
        ],
    ),
    (
        "finance",
        &[
            r"\bstock\b", r"\bmarket\b", r"\btreasury\b", r"\byield\b", r"\bfed\b",
            r"\binflation\b", r"\brecession\b", r"\bearnings\b", r"\bipo\b",
            r"\bs&p\b", r"\bnasdaq\b", r"\bdow\b",
        ],
    ),
    (
        "culture",
        &[
            r"\bmeme\b", r"\bviral\b", r"\btrending\b", r"\bmovie\b", r"\bmusic\b",
            r"\bgame\b", r"\bsports\b", r"\bnfl\b", r"\bnba\b", r"\bmlb\b",
        ],
    ),
    (
        "science",
        &[
            r"\bspace\b", r"\bnasa\b", r"\bclimate\b", r"\bresearch\b", r"\bstudy\b",
            r"\bscientist\b", r"\bdiscovery\b", r"\bmoon\b", r"\bmars\b",
        ],
    ),
    (
        "geopolitics",
        &[
            r"\bukraine\b", r"\brussia\b", r"\bchina\b", r"\bisrael\b", r"\bgaza\b",
            r"\bpalestine\b", r"\bnato\b", r"\beu\b", r"\bwar\b", r"\bmilitary\b",
            r"\bgreenland\b", r"\bcanada\b", r"\bdavos\b",
        ],
    ),
];

/// Accounts whose mention signals a topic (lower-case handles).
const ACCOUNT_TOPICS: &[(&str, &str)] = &[
    ("sama", "ai"),
    ("klogg", "ai"),
    ("emollick", "ai"),
    ("ylecun", "ai"),
    ("ilyasut", "ai"),
    ("janleike", "ai"),
    ("vitalikbuterin", "crypto"),
    ("saylor", "crypto"),
    ("coinbase", "crypto"),
    ("brian_armstrong", "crypto"),
    ("cz_binance", "crypto"),
    ("potus", "politics"),
    ("whitehouse", "politics"),
    ("speaker", "politics"),
    ("elonmusk", "tech"),
    ("satyanadella", "tech"),
    ("timcook", "tech"),
    ("unusual_whales", "finance"),
    ("zerohedge", "finance"),
];

/// One alternation per topic, in table order.
static TOPIC_REGEXES: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    TOPIC_PATTERNS
        .iter()
        .map(|(topic, patterns)| {
            let pattern = format!("(?i)(?:{})", patterns.join("|"));
            (*topic, Regex::new(&pattern).unwrap())
        })
        .collect()
});

/// Topic names in priority order, `general` last.
pub fn topic_names() -> impl Iterator<Item = &'static str> {
    TOPIC_PATTERNS
        .iter()
        .map(|(topic, _)| *topic)
        .chain(std::iter::once(GENERAL_TOPIC))
}

/// Every topic a post matches, in table order; `["general"]` when none do.
pub fn classify(post: &NormalizedPost) -> Vec<&'static str> {
    let hashtags: Vec<String> = post.hashtags.iter().map(|h| h.to_lowercase()).collect();
    let mentions: Vec<String> = post.mentions.iter().map(|m| m.to_lowercase()).collect();

    let matched: Vec<&'static str> = TOPIC_REGEXES
        .iter()
        .filter(|(topic, re)| {
            re.is_match(&post.post.text)
                || hashtags.iter().any(|tag| re.is_match(tag))
                || mentions.iter().any(|handle| {
                    ACCOUNT_TOPICS
                        .iter()
                        .any(|(account, account_topic)| *account == handle.as_str() && account_topic == topic)
                })
        })
        .map(|(topic, _)| *topic)
        .collect();

    if matched.is_empty() {
        vec![GENERAL_TOPIC]
    } else {
        matched
    }
}

/// Topic-based cluster labels for a corpus.
#[derive(Debug, Clone)]
pub struct TopicAssignment {
    pub labels: Vec<i32>,
    pub secondary: Vec<Vec<i32>>,
    /// Cluster id to topic name.
    pub names: BTreeMap<i32, String>,
}

/// Group posts by primary topic. Topics whose primary membership falls below
/// `min_topic_size` become noise; surviving topics are numbered in table
/// order. Secondary labels are the post's other surviving topics.
pub fn assign_topics(
    posts: &[NormalizedPost],
    min_topic_size: usize,
    max_secondary: usize,
) -> TopicAssignment {
    let matches: Vec<Vec<&'static str>> = posts.iter().map(classify).collect();

    let mut primary_counts: BTreeMap<&str, usize> = BTreeMap::new();
    for topics in &matches {
        *primary_counts.entry(topics[0]).or_insert(0) += 1;
    }

    let ids: BTreeMap<&str, i32> = topic_names()
        .filter(|topic| primary_counts.get(topic).copied().unwrap_or(0) >= min_topic_size)
        .zip(0..)
        .collect();

    let mut labels = Vec::with_capacity(posts.len());
    let mut secondary = Vec::with_capacity(posts.len());
    for topics in &matches {
        match ids.get(topics[0]) {
            Some(&id) => {
                labels.push(id);
                secondary.push(
                    topics[1..]
                        .iter()
                        .filter_map(|t| ids.get(t).copied())
                        .take(max_secondary)
                        .collect(),
                );
            }
            None => {
                labels.push(NOISE);
                secondary.push(Vec::new());
            }
        }
    }

    TopicAssignment {
        labels,
        secondary,
        names: ids.into_iter().map(|(topic, id)| (id, topic.to_string())).collect(),
    }
}
