//! Source configurations: which pages and feeds to aggregate from.
//!
//! Rather than hard-coding one module per outlet, sources are plain data.
//! Each [`SourceConfig`] names a URL template
//! (optionally containing `{query}`, replaced with the percent-encoded
//! topic), a format kind, an optional selector cascade for HTML pages, a
//! per-source timeout, and extra request headers.
//!
//! A YAML file with a list of source configs can replace the built-in set:
//!
//! ```yaml
//! - name: politics-wire
//!   url: "https://example.org/feed?q={query}"
//!   kind: rss
//!   timeout_ms: 5000
//! ```

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::extract::SelectorCascade;

/// Body format of a configured source.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Html,
    Rss,
}

fn default_timeout_ms() -> u64 {
    8_000
}

/// One configured source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Origin identifier carried on every item scraped from this source.
    pub name: String,
    /// URL template; `{query}` is replaced with the encoded topic.
    pub url: String,
    #[serde(default)]
    pub kind: SourceKind,
    /// Selector cascade for HTML sources. Ignored for RSS.
    #[serde(default)]
    pub cascade: Option<SelectorCascade>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Extra request headers as (name, value) pairs.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub category: Option<String>,
}

impl SourceConfig {
    /// Substitute the topic into the URL template, percent-encoded.
    pub fn resolved_url(&self, topic: &str) -> String {
        self.url
            .replace("{query}", urlencoding::encode(topic).as_ref())
    }
}

/// Load source configs from a YAML file.
pub async fn load_sources(path: &str) -> Result<Vec<SourceConfig>, Box<dyn std::error::Error>> {
    let raw = tokio::fs::read_to_string(path).await?;
    let sources: Vec<SourceConfig> = serde_yaml::from_str(&raw)?;
    info!(path, count = sources.len(), "loaded source configs");
    Ok(sources)
}

/// The built-in source set used when no config file is given: one query
/// feed and two HTML politics sections.
pub fn default_sources() -> Vec<SourceConfig> {
    vec![
        SourceConfig {
            name: "google-news".to_string(),
            url: "https://news.google.com/rss/search?q={query}&hl=en-US".to_string(),
            kind: SourceKind::Rss,
            cascade: None,
            timeout_ms: 8_000,
            headers: vec![("accept".to_string(), "application/rss+xml".to_string())],
            category: None,
        },
        SourceConfig {
            name: "bbc".to_string(),
            url: "https://www.bbc.com/news/politics".to_string(),
            kind: SourceKind::Html,
            cascade: Some(SelectorCascade {
                containers: vec![
                    "div[data-testid='card-text-wrapper']".to_string(),
                    "article".to_string(),
                ],
                titles: vec!["h2".to_string(), "h3".to_string(), "a".to_string()],
                contents: vec!["p".to_string(), "div.summary".to_string()],
            }),
            timeout_ms: 8_000,
            headers: vec![("accept".to_string(), "text/html".to_string())],
            category: Some("politics".to_string()),
        },
        SourceConfig {
            name: "aljazeera".to_string(),
            url: "https://www.aljazeera.com/tag/politics/".to_string(),
            kind: SourceKind::Html,
            cascade: Some(SelectorCascade {
                containers: vec!["article.gc".to_string(), "article".to_string()],
                titles: vec!["h3 a".to_string(), "h3".to_string()],
                contents: vec!["div.gc__excerpt p".to_string(), "p".to_string()],
            }),
            timeout_ms: 8_000,
            headers: Vec::new(),
            category: Some("politics".to_string()),
        },
    ]
}
