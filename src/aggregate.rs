//! Concurrent multi-source aggregation with partial-failure tolerance.
//!
//! One aggregation pass fans out one fetch+extract task per configured
//! source, waits for **all** of them to settle, then merges the survivors
//! single-threaded: concatenate, dedupe by (source, normalized title), cap
//! the total volume, and derive trending-term statistics. A slow or broken
//! source contributes zero items and never blocks or voids its siblings.

use std::collections::HashMap;
use std::time::Duration;

use itertools::Itertools;
use once_cell::sync::Lazy;
use tracing::{info, instrument, warn};

use crate::extract::{self, QualityRules};
use crate::fetch::{FetchOptions, TextFetcher};
use crate::models::{AggregatedContext, ScrapedItem};
use crate::sources::{SourceConfig, SourceKind};
use crate::utils::normalize_title;

/// Overall item cap across all sources, to bound downstream prompt size.
pub const MAX_ITEMS: usize = 24;
/// How many trending terms to derive.
pub const TOP_TERMS: usize = 8;

static STOP_WORDS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "the", "a", "an", "and", "or", "but", "of", "in", "on", "at", "to", "for", "from", "with",
        "by", "as", "is", "are", "was", "were", "be", "been", "has", "have", "had", "it", "its",
        "this", "that", "these", "those", "his", "her", "their", "they", "he", "she", "we", "you",
        "not", "no", "will", "would", "could", "should", "than", "then", "there", "here", "into",
        "over", "under", "about", "after", "before", "between", "during", "more", "most", "other",
        "some", "such", "only", "own", "same", "so", "too", "very", "can", "just", "said", "says",
        "new", "also", "out", "up", "down", "off", "all", "any", "both", "each", "few", "how",
        "what", "when", "where", "which", "who", "why",
    ]
});

/// Stateless aggregation service over an injected fetch capability.
pub struct Aggregator<F: TextFetcher> {
    fetcher: F,
    rules: QualityRules,
}

impl<F: TextFetcher> Aggregator<F> {
    pub fn new(fetcher: F, rules: QualityRules) -> Self {
        Self { fetcher, rules }
    }

    /// Fan out over `sources`, fan back in, merge.
    ///
    /// Never fails: every per-source error is absorbed as zero items, and an
    /// entirely failed pass yields an empty context.
    #[instrument(level = "info", skip_all, fields(sources = sources.len(), %topic))]
    pub async fn aggregate(&self, sources: &[SourceConfig], topic: &str) -> AggregatedContext {
        let tasks = sources.iter().map(|src| self.collect_source(src, topic));
        let settled: Vec<Vec<ScrapedItem>> = futures::future::join_all(tasks).await;

        let collected: usize = settled.iter().map(Vec::len).sum();
        let items: Vec<ScrapedItem> = settled
            .into_iter()
            .flatten()
            .unique_by(|item| (item.source.clone(), normalize_title(&item.title)))
            .take(MAX_ITEMS)
            .collect();

        let trending_terms = trending_terms(&items, TOP_TERMS);
        info!(
            collected,
            kept = items.len(),
            trending = ?trending_terms,
            "aggregation pass complete"
        );
        AggregatedContext {
            items,
            trending_terms,
        }
    }

    /// One source task: fetch, then extract per the source's kind. All
    /// failures are logged and converted to an empty contribution.
    async fn collect_source(&self, src: &SourceConfig, topic: &str) -> Vec<ScrapedItem> {
        let url = src.resolved_url(topic);
        let opts = FetchOptions {
            timeout: Duration::from_millis(src.timeout_ms),
            headers: src.headers.clone(),
        };

        let body = match self.fetcher.fetch(&url, &opts).await {
            Ok(body) => body,
            Err(e) => {
                warn!(source = %src.name, error = %e, "source fetch failed; contributing no items");
                return Vec::new();
            }
        };

        match src.kind {
            SourceKind::Rss => {
                extract::extract_rss(&body, &self.rules, &src.name, src.category.as_deref())
            }
            SourceKind::Html => match &src.cascade {
                Some(cascade) => {
                    extract::extract(&body, cascade, &self.rules, &src.name, src.category.as_deref())
                }
                None => {
                    warn!(source = %src.name, "html source has no selector cascade; skipping");
                    Vec::new()
                }
            },
        }
    }
}

/// Top-K content terms by frequency after stop-word stripping. Ties break by
/// first-seen order, so output is deterministic for a given item order.
pub fn trending_terms(items: &[ScrapedItem], k: usize) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut first_seen: Vec<String> = Vec::new();

    for item in items {
        for raw in item.content.split_whitespace() {
            let word: String = raw
                .chars()
                .filter(|c| c.is_alphanumeric())
                .flat_map(|c| c.to_lowercase())
                .collect();
            if word.len() < 4 || word.chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            if STOP_WORDS.contains(&word.as_str()) {
                continue;
            }
            let count = counts.entry(word.clone()).or_insert(0);
            if *count == 0 {
                first_seen.push(word);
            }
            *count += 1;
        }
    }

    first_seen
        .iter()
        .enumerate()
        .sorted_by_key(|(idx, word)| (std::cmp::Reverse(counts[word.as_str()]), *idx))
        .take(k)
        .map(|(_, word)| word.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::sources::SourceKind;
    use chrono::Utc;
    use std::collections::HashMap as Map;

    /// Fake fetcher: URLs map to canned bodies or failures.
    struct FakeFetcher {
        bodies: Map<String, Result<String, FetchError>>,
    }

    impl TextFetcher for FakeFetcher {
        async fn fetch(&self, url: &str, _opts: &FetchOptions) -> Result<String, FetchError> {
            match self.bodies.get(url) {
                Some(Ok(body)) => Ok(body.clone()),
                Some(Err(FetchError::Timeout(ms))) => Err(FetchError::Timeout(*ms)),
                Some(Err(FetchError::Status(code))) => Err(FetchError::Status(*code)),
                Some(Err(FetchError::Network(msg))) => Err(FetchError::Network(msg.clone())),
                None => Err(FetchError::Network(format!("unmapped url {url}"))),
            }
        }
    }

    fn html_source(name: &str, url: &str) -> SourceConfig {
        SourceConfig {
            name: name.to_string(),
            url: url.to_string(),
            kind: SourceKind::Html,
            cascade: Some(crate::extract::SelectorCascade {
                containers: vec!["article".to_string()],
                titles: vec!["h2".to_string()],
                contents: vec!["p".to_string()],
            }),
            timeout_ms: 1_000,
            headers: Vec::new(),
            category: None,
        }
    }

    fn page(title: &str) -> String {
        format!(
            "<html><body><article><h2>{title}</h2>\
             <p>The election campaign entered its final week with rallies nationwide.</p>\
             </article></body></html>"
        )
    }

    #[tokio::test]
    async fn test_partial_source_failure_tolerance() {
        let mut bodies = Map::new();
        bodies.insert(
            "http://a/".to_string(),
            Ok(page("Ruling party defends slim majority")),
        );
        bodies.insert("http://b/".to_string(), Err(FetchError::Timeout(1_000)));
        bodies.insert("http://c/".to_string(), Err(FetchError::Status(503)));
        let aggregator = Aggregator::new(FakeFetcher { bodies }, QualityRules::default());

        let sources = vec![
            html_source("a", "http://a/"),
            html_source("b", "http://b/"),
            html_source("c", "http://c/"),
        ];
        let ctx = aggregator.aggregate(&sources, "election").await;
        assert_eq!(ctx.items.len(), 1);
        assert_eq!(ctx.items[0].source, "a");
    }

    #[tokio::test]
    async fn test_total_failure_yields_empty_context() {
        let mut bodies: Map<String, Result<String, FetchError>> = Map::new();
        bodies.insert(
            "http://a/".to_string(),
            Err(FetchError::Network("refused".to_string())),
        );
        bodies.insert("http://b/".to_string(), Err(FetchError::Timeout(1_000)));
        let aggregator = Aggregator::new(FakeFetcher { bodies }, QualityRules::default());

        let sources = vec![html_source("a", "http://a/"), html_source("b", "http://b/")];
        let ctx = aggregator.aggregate(&sources, "election").await;
        assert!(ctx.is_empty());
        assert!(ctx.trending_terms.is_empty());
    }

    #[tokio::test]
    async fn test_dedupe_by_source_and_normalized_title() {
        let mut bodies = Map::new();
        // Same normalized title twice from one source, once from another.
        let double = "<html><body>\
             <article><h2>Vote Count Begins In The Capital</h2>\
             <p>Officials opened ballot boxes under observer supervision.</p></article>\
             <article><h2>vote count begins in the capital</h2>\
             <p>Officials opened ballot boxes under observer supervision.</p></article>\
             </body></html>"
            .to_string();
        bodies.insert("http://a/".to_string(), Ok(double));
        bodies.insert(
            "http://b/".to_string(),
            Ok(page("Vote Count Begins In The Capital")),
        );
        let aggregator = Aggregator::new(FakeFetcher { bodies }, QualityRules::default());

        let sources = vec![html_source("a", "http://a/"), html_source("b", "http://b/")];
        let ctx = aggregator.aggregate(&sources, "election").await;
        // One survivor per source: dedupe key includes the source name.
        assert_eq!(ctx.items.len(), 2);
    }

    #[tokio::test]
    async fn test_overall_item_cap() {
        let mut page_body = String::from("<html><body>");
        for i in 0..40 {
            page_body.push_str(&format!(
                "<article><h2>Campaign dispatch number {i:02} from the trail</h2>\
                 <p>Candidates crossed the district courting undecided voters today.</p></article>"
            ));
        }
        page_body.push_str("</body></html>");

        let mut rules = QualityRules::default();
        rules.max_containers = 40;
        let mut bodies = Map::new();
        bodies.insert("http://a/".to_string(), Ok(page_body));
        let aggregator = Aggregator::new(FakeFetcher { bodies }, rules);

        let ctx = aggregator
            .aggregate(&[html_source("a", "http://a/")], "election")
            .await;
        assert_eq!(ctx.items.len(), MAX_ITEMS);
    }

    #[test]
    fn test_trending_terms_rank_and_tie_break() {
        let item = |content: &str| ScrapedItem {
            title: "t".to_string(),
            content: content.to_string(),
            source: "s".to_string(),
            fetched_at: Utc::now(),
            category: None,
        };
        let items = vec![
            item("turnout turnout coalition ballot"),
            item("coalition turnout ballot"),
        ];
        let terms = trending_terms(&items, 3);
        // turnout: 3, coalition: 2, ballot: 2; coalition seen before ballot.
        assert_eq!(terms, vec!["turnout", "coalition", "ballot"]);
    }

    #[test]
    fn test_trending_terms_strip_stop_words_and_short_words() {
        let items = vec![ScrapedItem {
            title: "t".to_string(),
            content: "The vote was held and the votes were counted".to_string(),
            source: "s".to_string(),
            fetched_at: Utc::now(),
            category: None,
        }];
        let terms = trending_terms(&items, 5);
        assert!(!terms.contains(&"the".to_string()));
        assert!(!terms.contains(&"was".to_string()));
        // "vote" survives (4 chars, not a stop word).
        assert!(terms.contains(&"vote".to_string()));
    }
}
