// src/ingest/providers/fixture.rs
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use crate::ingest::providers::rss::parse_feed;
use crate::ingest::types::{FeedRetriever, FeedSource, FetchError, RawFeedItem};

#[derive(Debug, Clone)]
pub enum FixtureResponse {
    /// Feed document, parsed like a live response.
    Xml(String),
    Fail(FetchError),
    /// Answer only after the delay (used to exercise the fetch timeout).
    Delayed(Duration, String),
}

/// Serves canned feed documents keyed by source name. Unknown sources fail as unreachable.
#[derive(Default)]
pub struct FixtureRetriever {
    responses: RwLock<HashMap<String, FixtureResponse>>,
}

impl FixtureRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_xml(self, source: &str, xml: impl Into<String>) -> Self {
        self.set(source, FixtureResponse::Xml(xml.into()));
        self
    }

    pub fn with_failure(self, source: &str, err: FetchError) -> Self {
        self.set(source, FixtureResponse::Fail(err));
        self
    }

    /// Replace the response for `source` (e.g. between ingestion cycles).
    pub fn set(&self, source: &str, resp: FixtureResponse) {
        if let Ok(mut map) = self.responses.write() {
            map.insert(source.to_string(), resp);
        }
    }
}

#[async_trait]
impl FeedRetriever for FixtureRetriever {
    async fn retrieve(&self, source: &FeedSource) -> Result<Vec<RawFeedItem>, FetchError> {
        let resp = self
            .responses
            .read()
            .ok()
            .and_then(|m| m.get(&source.name).cloned());
        match resp {
            Some(FixtureResponse::Xml(xml)) => parse_feed(&xml),
            Some(FixtureResponse::Fail(e)) => Err(e),
            Some(FixtureResponse::Delayed(d, xml)) => {
                tokio::time::sleep(d).await;
                parse_feed(&xml)
            }
            None => Err(FetchError::NetworkUnreachable(format!(
                "no fixture for {}",
                source.name
            ))),
        }
    }
}
