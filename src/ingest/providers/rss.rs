// src/ingest/providers/rss.rs
//! RSS 2.0 / Atom retrieval over HTTP and an event-driven quick-xml parser.
//!
//! The parser keys on qualified element names so namespaced fields
//! (`content:encoded`, `media:content`, `dc:date`) are picked up without a schema.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::histogram;
use once_cell::sync::OnceCell;
use quick_xml::events::{BytesStart, Event as XmlEvent};
use quick_xml::reader::Reader;
use regex::Regex;
use std::time::Duration;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;

use crate::ingest::types::{FeedRetriever, FeedSource, FetchError, RawFeedItem};

pub const USER_AGENT: &str = "F1Pulse/1.0";

/// Production retriever: GET the feed URL, parse the body.
pub struct HttpRssRetriever {
    client: reqwest::Client,
}

impl HttpRssRetriever {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Unknown(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FeedRetriever for HttpRssRetriever {
    async fn retrieve(&self, source: &FeedSource) -> Result<Vec<RawFeedItem>, FetchError> {
        let resp = self.client.get(&source.url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Unknown(format!("HTTP {status}")));
        }
        let body = resp.text().await?;
        parse_feed(&body)
    }
}

/// Parse an RSS 2.0, RSS 1.0 (RDF) or Atom document.
pub fn parse_feed(xml: &str) -> Result<Vec<RawFeedItem>, FetchError> {
    let t0 = std::time::Instant::now();
    let cleaned = scrub_html_entities_for_xml(xml);
    let mut reader = Reader::from_str(&cleaned);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<String> = Vec::new();
    let mut recognized = false;
    let mut current: Option<RawFeedItem> = None;
    let mut item_depth = 0usize;
    let mut text = String::new();
    let mut items = Vec::new();

    loop {
        let ev = reader
            .read_event()
            .map_err(|e| FetchError::MalformedData(e.to_string()))?;
        match ev {
            XmlEvent::Start(e) => {
                let name = element_name(&e);
                if stack.is_empty() {
                    recognized = matches!(name.as_str(), "rss" | "feed" | "rdf:rdf");
                    if !recognized {
                        return Err(FetchError::MalformedData(format!(
                            "unexpected root element <{name}>"
                        )));
                    }
                }
                if current.is_none() && (name == "item" || name == "entry") {
                    current = Some(RawFeedItem::default());
                    item_depth = stack.len();
                } else if let Some(item) = current.as_mut() {
                    if stack.len() == item_depth + 1 {
                        text.clear();
                    }
                    apply_attributes(item, &name, &e);
                }
                stack.push(name);
            }
            XmlEvent::Empty(e) => {
                if let Some(item) = current.as_mut() {
                    apply_attributes(item, &element_name(&e), &e);
                }
            }
            XmlEvent::Text(t) => {
                if current.is_some() && stack.len() > item_depth + 1 {
                    let s = t
                        .unescape()
                        .map(|c| c.into_owned())
                        .unwrap_or_else(|_| String::from_utf8_lossy(&t).into_owned());
                    text.push_str(&s);
                }
            }
            XmlEvent::CData(c) => {
                if current.is_some() && stack.len() > item_depth + 1 {
                    text.push_str(&String::from_utf8_lossy(&c));
                }
            }
            XmlEvent::End(_) => {
                let name = stack.pop().unwrap_or_default();
                if current.is_some() && stack.len() == item_depth {
                    if let Some(mut done) = current.take() {
                        if done.image_url.is_none() {
                            done.image_url = done
                                .content
                                .as_deref()
                                .and_then(first_img_src)
                                .or_else(|| done.snippet.as_deref().and_then(first_img_src));
                        }
                        items.push(done);
                    }
                } else if stack.len() == item_depth + 1 {
                    if let Some(item) = current.as_mut() {
                        apply_field(item, &name, text.trim());
                        text.clear();
                    }
                }
            }
            XmlEvent::Eof => break,
            _ => {}
        }
    }

    if !recognized {
        return Err(FetchError::MalformedData("empty or non-feed document".into()));
    }

    histogram!("f1pulse_feed_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    Ok(items)
}

fn element_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).to_ascii_lowercase()
}

fn attr(e: &BytesStart<'_>, key: &str) -> Option<String> {
    e.attributes().flatten().find_map(|a| {
        if a.key.as_ref().eq_ignore_ascii_case(key.as_bytes()) {
            a.unescape_value().ok().map(|v| v.trim().to_string())
        } else {
            None
        }
    })
}

fn apply_attributes(item: &mut RawFeedItem, name: &str, e: &BytesStart<'_>) {
    match name {
        // Atom: <link rel="alternate" href="..."/>
        "link" => {
            let rel = attr(e, "rel");
            if matches!(rel.as_deref(), None | Some("alternate")) && item.link.is_none() {
                item.link = attr(e, "href").filter(|h| !h.is_empty());
            }
        }
        "enclosure" => {
            if item.image_url.is_none() {
                let url = attr(e, "url").filter(|u| !u.is_empty());
                let is_image = attr(e, "type").is_some_and(|t| t.starts_with("image/"))
                    || url.as_deref().is_some_and(has_image_extension);
                if is_image {
                    item.image_url = url;
                }
            }
        }
        "media:content" | "media:thumbnail" => {
            if item.image_url.is_none() {
                item.image_url = attr(e, "url").filter(|u| !u.is_empty());
            }
        }
        _ => {}
    }
}

fn apply_field(item: &mut RawFeedItem, name: &str, value: &str) {
    if value.is_empty() {
        return;
    }
    let v = Some(value.to_string());
    match name {
        "title" => item.title = v,
        "link" => {
            if item.link.is_none() {
                item.link = v;
            }
        }
        "guid" | "id" => item.guid = v,
        "pubdate" | "published" | "dc:date" => item.published = parse_date(value),
        "updated" => {
            if item.published.is_none() {
                item.published = parse_date(value);
            }
        }
        "description" | "summary" => item.snippet = v,
        "content:encoded" | "content" => item.content = v,
        _ => {}
    }
}

/// RFC 2822 (RSS) or RFC 3339 (Atom) timestamp.
pub fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    let odt = OffsetDateTime::parse(s, &Rfc2822)
        .or_else(|_| OffsetDateTime::parse(s, &Rfc3339))
        .ok();
    match odt {
        Some(dt) => DateTime::<Utc>::from_timestamp(dt.unix_timestamp(), dt.nanosecond()),
        None => DateTime::parse_from_rfc2822(s)
            .ok()
            .map(|d| d.with_timezone(&Utc)),
    }
}

fn has_image_extension(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
    [".jpg", ".jpeg", ".png", ".gif", ".webp"]
        .iter()
        .any(|ext| path.ends_with(ext))
}

/// First `<img src>` in an HTML fragment.
pub fn first_img_src(html: &str) -> Option<String> {
    static RE_IMG: OnceCell<Regex> = OnceCell::new();
    let re = RE_IMG.get_or_init(|| {
        Regex::new(r#"(?i)<img[^>]+src\s*=\s*["']([^"']+)["']"#).expect("static regex")
    });
    re.captures(html)
        .and_then(|c| c.get(1))
        .map(|m| html_escape::decode_html_entities(m.as_str()).into_owned())
}

// Feeds routinely carry HTML entities XML does not define.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}
