// src/ingest/fetch.rs
use chrono::{DateTime, Utc};
use metrics::counter;
use once_cell::sync::OnceCell;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;

use crate::ingest::types::{FeedRetriever, FeedSource, FetchError, NormalizedItem, RawFeedItem};

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
pub const UNTITLED: &str = "Untitled";

/// Result of fetching one source. Never an error: failures come back as data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub items: Vec<NormalizedItem>,
    pub failure: Option<FetchError>,
}

impl FetchOutcome {
    fn failed(err: FetchError) -> Self {
        Self {
            items: Vec::new(),
            failure: Some(err),
        }
    }
}

/// Wraps a retriever with a per-fetch timeout and item normalization.
#[derive(Clone)]
pub struct FeedFetcher {
    retriever: Arc<dyn FeedRetriever>,
    timeout: Duration,
}

impl FeedFetcher {
    pub fn new(retriever: Arc<dyn FeedRetriever>) -> Self {
        Self {
            retriever,
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn fetch(&self, source: &FeedSource) -> FetchOutcome {
        let res = tokio::time::timeout(self.timeout, self.retriever.retrieve(source)).await;
        let raw = match res {
            Ok(Ok(items)) => items,
            Ok(Err(e)) => return self.report(source, e),
            Err(_elapsed) => return self.report(source, FetchError::Timeout),
        };

        let now = Utc::now();
        let items = raw
            .into_iter()
            .map(|it| normalize_item(it, &source.name, now))
            .collect();
        FetchOutcome {
            items,
            failure: None,
        }
    }

    fn report(&self, source: &FeedSource, err: FetchError) -> FetchOutcome {
        tracing::warn!(
            target: "ingest",
            feed = %source.name,
            url = %source.url,
            error_type = err.kind(),
            error = %err,
            "feed fetch failed"
        );
        counter!("f1pulse_rss_fetch_errors_total", "feed" => source.name.clone()).increment(1);
        FetchOutcome::failed(err)
    }
}

/// Apply defaults: "Untitled", link <-> guid fallback, publish time = `now`, empty content.
pub fn normalize_item(raw: RawFeedItem, source: &str, now: DateTime<Utc>) -> NormalizedItem {
    let title = raw
        .title
        .as_deref()
        .map(clean_text)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| UNTITLED.to_string());
    let link = non_blank(raw.link.clone()).or_else(|| non_blank(raw.guid.clone()));
    let guid = non_blank(raw.guid).or_else(|| non_blank(raw.link));
    let content = raw
        .content
        .as_deref()
        .or(raw.snippet.as_deref())
        .map(clean_text)
        .unwrap_or_default();

    NormalizedItem {
        title,
        link,
        guid,
        published_at: raw.published.unwrap_or(now),
        content,
        source: source.to_string(),
        image_url: non_blank(raw.image_url),
    }
}

fn non_blank(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Decode entities, strip tags, normalize curly quotes, collapse whitespace.
pub fn clean_text(s: &str) -> String {
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").expect("static regex"));
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").expect("static regex"));

    // Tags first so entity-encoded angle brackets survive as text.
    let out = re_tags.replace_all(s, " ");
    let out = html_escape::decode_html_entities(&out)
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");
    re_ws.replace_all(&out, " ").trim().to_string()
}

/// First `max_chars` characters, never splitting a code point.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::providers::FixtureRetriever;
    use chrono::TimeZone;

    #[test]
    fn defaults_are_applied() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap();
        let raw = RawFeedItem {
            guid: Some("https://example.com/g".into()),
            ..Default::default()
        };
        let n = normalize_item(raw, "FIA", now);
        assert_eq!(n.title, UNTITLED);
        assert_eq!(n.link.as_deref(), Some("https://example.com/g"));
        assert_eq!(n.guid.as_deref(), Some("https://example.com/g"));
        assert_eq!(n.published_at, now);
        assert_eq!(n.content, "");
        assert_eq!(n.source, "FIA");
    }

    #[test]
    fn guid_falls_back_to_link() {
        let now = Utc::now();
        let raw = RawFeedItem {
            title: Some("  Title  ".into()),
            link: Some("https://example.com/l".into()),
            snippet: Some("<p>Hello &amp; welcome</p>".into()),
            ..Default::default()
        };
        let n = normalize_item(raw, "RaceFans", now);
        assert_eq!(n.title, "Title");
        assert_eq!(n.guid.as_deref(), Some("https://example.com/l"));
        assert_eq!(n.content, "Hello & welcome");
    }

    #[test]
    fn clean_text_strips_tags_and_whitespace() {
        assert_eq!(
            clean_text("<p>Leclerc\u{2019}s  <b>pole</b></p>\n\n lap"),
            "Leclerc's pole lap"
        );
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("Pérez", 2), "Pé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 5), "");
    }

    #[tokio::test]
    async fn retriever_failure_becomes_outcome() {
        let r = FixtureRetriever::new().with_failure("FIA", FetchError::Timeout);
        let f = FeedFetcher::new(Arc::new(r));
        let out = f.fetch(&FeedSource::new("FIA", "https://fia.invalid")).await;
        assert!(out.items.is_empty());
        assert_eq!(out.failure, Some(FetchError::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_retriever_times_out() {
        use crate::ingest::providers::FixtureResponse;
        let r = FixtureRetriever::new();
        r.set(
            "Slow",
            FixtureResponse::Delayed(Duration::from_secs(30), "<rss/>".into()),
        );
        let f = FeedFetcher::new(Arc::new(r)).with_timeout(Duration::from_secs(10));
        let out = f.fetch(&FeedSource::new("Slow", "https://slow.invalid")).await;
        assert_eq!(out.failure.as_ref().map(FetchError::kind), Some("timeout"));
    }
}
