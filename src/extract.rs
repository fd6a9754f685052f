//! Heuristic extraction of structured items from raw HTML and RSS.
//!
//! Extraction is best-effort and lossy by design. A selector cascade is an
//! ordered list of alternative rules tried in priority order; the first
//! container group that yields any matches wins, and title/content selectors
//! are resolved independently per container. Candidates that miss the length
//! bands, carry boilerplate markers, or match no relevance keyword are
//! silently dropped. Zero items out of a page is normal and is never an
//! error.

use chrono::Utc;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::ScrapedItem;

/// Ordered alternative selectors for containers, titles, and content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorCascade {
    /// Candidate container selectors, tried until one yields any matches.
    pub containers: Vec<String>,
    /// Title selectors tried in priority order within each container.
    pub titles: Vec<String>,
    /// Content selectors tried in priority order within each container.
    pub contents: Vec<String>,
}

/// Length bands, boilerplate markers, and relevance keywords applied to
/// every candidate, whatever the source format.
#[derive(Debug, Clone)]
pub struct QualityRules {
    pub title_min: usize,
    pub title_max: usize,
    pub content_min: usize,
    pub content_max: usize,
    /// Containers examined per page, to bound cost.
    pub max_containers: usize,
    /// Lowercase markers that disqualify a candidate outright.
    pub boilerplate: Vec<String>,
    /// Lowercase keywords; at least one must appear in title or content.
    pub relevance: Vec<String>,
}

impl Default for QualityRules {
    fn default() -> Self {
        Self {
            title_min: 10,
            title_max: 150,
            content_min: 20,
            content_max: 300,
            max_containers: 10,
            boilerplate: [
                "cookie",
                "subscribe",
                "click here",
                "sign up",
                "advertisement",
                "newsletter",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            relevance: [
                "election",
                "government",
                "minister",
                "parliament",
                "policy",
                "vote",
                "voter",
                "president",
                "party",
                "campaign",
                "poll",
                "senate",
                "congress",
                "cabinet",
                "coalition",
                "ballot",
                "candidate",
                "political",
                "lawmaker",
                "diet",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl QualityRules {
    fn title_ok(&self, text: &str) -> bool {
        text.len() > self.title_min && text.len() < self.title_max
    }

    fn content_ok(&self, text: &str) -> bool {
        text.len() > self.content_min && text.len() < self.content_max
    }

    fn has_boilerplate(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.boilerplate.iter().any(|m| lower.contains(m.as_str()))
    }

    fn is_relevant(&self, title: &str, content: &str) -> bool {
        let lower = format!("{} {}", title.to_lowercase(), content.to_lowercase());
        self.relevance.iter().any(|k| lower.contains(k.as_str()))
    }

    /// Full accept/reject decision for a resolved (title, content) pair.
    fn accepts(&self, title: &str, content: &str) -> bool {
        !title.is_empty()
            && !content.is_empty()
            && !self.has_boilerplate(title)
            && !self.has_boilerplate(content)
            && self.is_relevant(title, content)
    }
}

/// Extract items from an HTML document using a selector cascade.
///
/// Locates containers with the first selector group that matches anything,
/// then resolves title and content independently per container, accepting
/// the first selector whose trimmed text falls inside the configured band.
/// At most `rules.max_containers` containers are examined.
pub fn extract(
    html: &str,
    cascade: &SelectorCascade,
    rules: &QualityRules,
    source: &str,
    category: Option<&str>,
) -> Vec<ScrapedItem> {
    let document = Html::parse_document(html);

    let container_selector = cascade.containers.iter().find_map(|raw| {
        let sel = Selector::parse(raw).ok()?;
        document.select(&sel).next().is_some().then_some(sel)
    });
    let Some(container_selector) = container_selector else {
        debug!(%source, "no container selector matched; page yields nothing");
        return Vec::new();
    };

    let mut items = Vec::new();
    for container in document.select(&container_selector).take(rules.max_containers) {
        let title = first_in_band(&container, &cascade.titles, rules.title_min, rules.title_max);
        let content = first_in_band(
            &container,
            &cascade.contents,
            rules.content_min,
            rules.content_max,
        );
        let (Some(title), Some(content)) = (title, content) else {
            continue;
        };
        if !rules.accepts(&title, &content) {
            continue;
        }
        items.push(ScrapedItem {
            title,
            content,
            source: source.to_string(),
            fetched_at: Utc::now(),
            category: category.map(|c| c.to_string()),
        });
    }

    debug!(%source, count = items.len(), "extracted items from HTML");
    items
}

/// Resolve the first selector whose trimmed text length falls inside the
/// band `(min, max)`, exclusive on both ends.
fn first_in_band(
    container: &ElementRef,
    selectors: &[String],
    min: usize,
    max: usize,
) -> Option<String> {
    for raw in selectors {
        let Ok(sel) = Selector::parse(raw) else {
            continue;
        };
        if let Some(element) = container.select(&sel).next() {
            let text = collapse_text(element);
            if text.len() > min && text.len() < max {
                return Some(text);
            }
        }
    }
    None
}

fn collapse_text(element: ElementRef) -> String {
    let joined = element.text().collect::<Vec<_>>().join(" ");
    joined.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ---- RSS ----

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<String>,
    description: Option<String>,
}

static TAG_RE: Lazy<regex::Regex> = Lazy::new(|| regex::Regex::new(r"<[^>]+>").unwrap());

/// Extract items from an RSS 2.0 feed body.
///
/// Item titles and descriptions pass through the same quality rules as HTML
/// candidates, so extraction bounds hold uniformly across source kinds.
/// A feed that fails to parse yields zero items, not an error.
pub fn extract_rss(
    xml: &str,
    rules: &QualityRules,
    source: &str,
    category: Option<&str>,
) -> Vec<ScrapedItem> {
    let rss: Rss = match quick_xml::de::from_str(xml) {
        Ok(rss) => rss,
        Err(e) => {
            debug!(%source, error = %e, "RSS parse failed; feed yields nothing");
            return Vec::new();
        }
    };

    let mut items = Vec::new();
    for entry in rss.channel.items.into_iter().take(rules.max_containers) {
        let title = clean_feed_text(entry.title.as_deref().unwrap_or_default());
        let content = clean_feed_text(entry.description.as_deref().unwrap_or_default());
        if !rules.title_ok(&title) || !rules.content_ok(&content) {
            continue;
        }
        if !rules.accepts(&title, &content) {
            continue;
        }
        items.push(ScrapedItem {
            title,
            content,
            source: source.to_string(),
            fetched_at: Utc::now(),
            category: category.map(|c| c.to_string()),
        });
    }

    debug!(%source, count = items.len(), "extracted items from RSS");
    items
}

/// Feed descriptions routinely embed markup; strip tags and collapse
/// whitespace before the band checks.
fn clean_feed_text(raw: &str) -> String {
    let stripped = TAG_RE.replace_all(raw, " ");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}
