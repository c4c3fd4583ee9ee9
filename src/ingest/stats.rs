// src/ingest/stats.rs
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::RwLock;

use crate::ingest::types::{FeedSource, FetchError};

/// Cumulative per-source counters since the orchestrator was built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeedStats {
    pub last_fetch_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub error_count: u64,
    pub items_total: u64,
    pub items_new: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceStatus {
    #[serde(flatten)]
    pub source: FeedSource,
    pub stats: FeedStats,
}

/// Owned by one orchestrator; readers get snapshots.
#[derive(Debug, Default)]
pub struct FeedStatsStore {
    entries: RwLock<Vec<SourceStatus>>,
}

impl FeedStatsStore {
    pub fn new(sources: &[FeedSource]) -> Self {
        let entries = sources
            .iter()
            .map(|s| SourceStatus {
                source: s.clone(),
                stats: FeedStats::default(),
            })
            .collect();
        Self {
            entries: RwLock::new(entries),
        }
    }

    fn update(&self, name: &str, f: impl FnOnce(&mut FeedStats)) {
        let Ok(mut entries) = self.entries.write() else {
            return;
        };
        if let Some(e) = entries.iter_mut().find(|e| e.source.name == name) {
            f(&mut e.stats);
        }
    }

    /// Record one fetch attempt. Success means at least one item came back.
    pub fn record_fetch(
        &self,
        name: &str,
        at: DateTime<Utc>,
        item_count: usize,
        failure: Option<&FetchError>,
    ) {
        self.update(name, |s| {
            s.last_fetch_time = Some(at);
            s.items_total += item_count as u64;
            if item_count > 0 {
                s.last_success_time = Some(at);
            }
            if let Some(err) = failure {
                s.error_count += 1;
                s.last_error = Some(err.to_string());
            }
        });
    }

    pub fn record_new(&self, name: &str, new_items: usize) {
        self.update(name, |s| s.items_new += new_items as u64);
    }

    pub fn get(&self, name: &str) -> Option<FeedStats> {
        self.entries
            .read()
            .ok()?
            .iter()
            .find(|e| e.source.name == name)
            .map(|e| e.stats.clone())
    }

    /// Sources in configured order with their stats.
    pub fn snapshot(&self) -> Vec<SourceStatus> {
        self.entries.read().map(|e| e.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fetch_and_new_counters_accumulate() {
        let st = FeedStatsStore::new(&[FeedSource::new("FIA", "https://fia"), FeedSource::new("GPFans", "https://gp")]);
        let t0 = Utc.with_ymd_and_hms(2025, 4, 1, 10, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2025, 4, 1, 10, 1, 0).unwrap();

        st.record_fetch("FIA", t0, 3, None);
        st.record_new("FIA", 2);
        st.record_fetch("FIA", t1, 0, Some(&FetchError::Timeout));

        let s = st.get("FIA").unwrap();
        assert_eq!(s.last_fetch_time, Some(t1));
        assert_eq!(s.last_success_time, Some(t0));
        assert_eq!(s.items_total, 3);
        assert_eq!(s.items_new, 2);
        assert_eq!(s.error_count, 1);
        assert_eq!(s.last_error.as_deref(), Some("feed request timed out"));

        let snap = st.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[1].source.name, "GPFans");
        assert_eq!(snap[1].stats, FeedStats::default());
    }

    #[test]
    fn unknown_source_is_ignored() {
        let st = FeedStatsStore::new(&[]);
        st.record_new("nope", 1);
        assert!(st.get("nope").is_none());
    }
}
