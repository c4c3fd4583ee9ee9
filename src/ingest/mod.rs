// src/ingest/mod.rs
pub mod backfill;
pub mod config;
pub mod fetch;
pub mod providers;
pub mod scheduler;
pub mod stats;
pub mod types;

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::sync::{Arc, RwLock};

use crate::categorize::Classifier;
use crate::ingest::fetch::{truncate_chars, FeedFetcher};
use crate::ingest::stats::{FeedStatsStore, SourceStatus};
use crate::ingest::types::{FeedSource, NormalizedItem};
use crate::notify::NotificationDispatcher;
use crate::store::{NewEvent, Store, StoreError};

pub const SUMMARY_MAX_CHARS: usize = 500;

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "f1pulse_rss_fetch_errors_total",
            "Feed fetch failures by feed."
        );
        describe_counter!("f1pulse_ingest_new_total", "Events persisted by ingestion.");
        describe_counter!(
            "f1pulse_ingest_cycles_total",
            "Scheduled ingestion cycles by result."
        );
        describe_counter!(
            "f1pulse_ingest_skipped_total",
            "Feed items skipped as already stored."
        );
        describe_histogram!("f1pulse_feed_parse_ms", "Feed document parse time in milliseconds.");
        describe_gauge!(
            "f1pulse_last_ingestion_timestamp",
            "Unix ts when the last ingestion cycle completed."
        );
    });
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CycleError {
    #[error("an ingestion cycle is already running")]
    AlreadyRunning,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub new_items: usize,
    pub skipped: usize,
    /// Sources that yielded no items this cycle.
    pub failed_sources: Vec<String>,
    pub item_errors: usize,
    pub completed_at: Option<DateTime<Utc>>,
}

enum ItemOutcome {
    New,
    Skipped,
}

/// Drives fetch -> dedup -> classify -> persist -> notify over every enabled source.
pub struct IngestOrchestrator {
    sources: Vec<FeedSource>,
    fetcher: FeedFetcher,
    classifier: Arc<Classifier>,
    store: Arc<dyn Store>,
    dispatcher: Arc<NotificationDispatcher>,
    stats: FeedStatsStore,
    running: tokio::sync::Mutex<()>,
    last_completed: RwLock<Option<DateTime<Utc>>>,
}

impl IngestOrchestrator {
    pub fn new(
        sources: Vec<FeedSource>,
        fetcher: FeedFetcher,
        classifier: Arc<Classifier>,
        store: Arc<dyn Store>,
        dispatcher: Arc<NotificationDispatcher>,
    ) -> Self {
        ensure_metrics_described();
        let stats = FeedStatsStore::new(&sources);
        Self {
            sources,
            fetcher,
            classifier,
            store,
            dispatcher,
            stats,
            running: tokio::sync::Mutex::new(()),
            last_completed: RwLock::new(None),
        }
    }

    pub fn sources(&self) -> &[FeedSource] {
        &self.sources
    }

    pub fn stats(&self) -> &FeedStatsStore {
        &self.stats
    }

    pub fn stats_snapshot(&self) -> Vec<SourceStatus> {
        self.stats.snapshot()
    }

    pub fn last_cycle_completed(&self) -> Option<DateTime<Utc>> {
        self.last_completed.read().ok().and_then(|g| *g)
    }

    /// Run one full cycle. Refuses to overlap with a cycle already in progress.
    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        let _guard = self
            .running
            .try_lock()
            .map_err(|_| CycleError::AlreadyRunning)?;

        let mut report = CycleReport::default();
        for source in self.sources.iter().filter(|s| s.enabled) {
            self.ingest_source(source, &mut report).await;
        }

        let done = Utc::now();
        if let Ok(mut g) = self.last_completed.write() {
            *g = Some(done);
        }
        report.completed_at = Some(done);

        counter!("f1pulse_ingest_new_total").increment(report.new_items as u64);
        counter!("f1pulse_ingest_skipped_total").increment(report.skipped as u64);
        gauge!("f1pulse_last_ingestion_timestamp").set(done.timestamp() as f64);

        tracing::info!(
            target: "ingest",
            new = report.new_items,
            skipped = report.skipped,
            failed_sources = report.failed_sources.len(),
            item_errors = report.item_errors,
            "ingestion cycle complete"
        );
        Ok(report)
    }

    async fn ingest_source(&self, source: &FeedSource, report: &mut CycleReport) {
        let fetched_at = Utc::now();
        let outcome = self.fetcher.fetch(source).await;
        self.stats.record_fetch(
            &source.name,
            fetched_at,
            outcome.items.len(),
            outcome.failure.as_ref(),
        );

        if outcome.items.is_empty() {
            if outcome.failure.is_none() {
                tracing::warn!(target: "ingest", feed = %source.name, "feed returned no items");
            }
            report.failed_sources.push(source.name.clone());
            return;
        }

        let mut new_here = 0usize;
        for item in outcome.items {
            match self.process_item(item).await {
                Ok(ItemOutcome::New) => new_here += 1,
                Ok(ItemOutcome::Skipped) => report.skipped += 1,
                Err((title, e)) => {
                    report.item_errors += 1;
                    tracing::error!(
                        target: "ingest",
                        feed = %source.name,
                        title = %title,
                        error = %e,
                        "item processing failed"
                    );
                }
            }
        }
        report.new_items += new_here;
        self.stats.record_new(&source.name, new_here);
    }

    async fn process_item(&self, item: NormalizedItem) -> Result<ItemOutcome, (String, StoreError)> {
        let existing = self
            .store
            .find_event_by_source_title(&item.source, &item.title)
            .await
            .map_err(|e| (item.title.clone(), e))?;
        if existing.is_some() {
            return Ok(ItemOutcome::Skipped);
        }

        let classification = self.classifier.classify(&item.title, &item.content);
        let title = item.title.clone();
        let new = NewEvent {
            summary: truncate_chars(&item.content, SUMMARY_MAX_CHARS),
            raw_content: Some(item.content).filter(|c| !c.is_empty()),
            title: item.title,
            category: classification.category,
            timestamp: item.published_at,
            source: item.source,
            link: item.link,
            image_url: item.image_url,
        };

        let event = match self.store.insert_event(new).await {
            Ok(ev) => ev,
            // lost the race against a concurrent insert of the same (source, title)
            Err(StoreError::Duplicate) => return Ok(ItemOutcome::Skipped),
            Err(e) => return Err((title, e)),
        };

        tracing::info!(
            target: "ingest",
            feed = %event.source,
            title = %event.title,
            category = %event.category,
            confidence = classification.confidence,
            "new event"
        );

        self.dispatcher.dispatch(&event).await;
        Ok(ItemOutcome::New)
    }

    /// Fill in missing images for stored events from the current feed contents.
    pub async fn backfill_images(&self) -> Result<usize, StoreError> {
        backfill::backfill_images(&self.sources, &self.fetcher, self.store.as_ref()).await
    }
}
