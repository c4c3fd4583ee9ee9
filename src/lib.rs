// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod categorize;
pub mod config;
pub mod ingest;
pub mod metrics;
pub mod notify;
pub mod ranking;
pub mod store;

use std::sync::Arc;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::categorize::{Category, Classification, Classifier};
pub use crate::config::AppConfig;
pub use crate::ingest::{CycleReport, IngestOrchestrator};
pub use crate::notify::{DispatchOutcome, NotificationDispatcher};
pub use crate::store::{Event, MemoryStore, Store};

use crate::ingest::fetch::FeedFetcher;
use crate::ingest::types::{FeedRetriever, FeedSource};
use crate::notify::PushClient;

/// Wire store, dispatcher and orchestrator into the shared HTTP state.
/// The binary passes the HTTP retriever and the configured push client; tests pass fakes.
pub fn assemble(
    cfg: &AppConfig,
    sources: Vec<FeedSource>,
    classifier: Classifier,
    retriever: Arc<dyn FeedRetriever>,
    push: Arc<dyn PushClient>,
    store: Arc<dyn Store>,
) -> AppState {
    let classifier = Arc::new(classifier);
    let dispatcher = Arc::new(NotificationDispatcher::new(
        store.clone(),
        push,
        cfg.rate_limit_policy(),
    ));
    let fetcher = FeedFetcher::new(retriever).with_timeout(cfg.fetch_timeout);
    let orchestrator = Arc::new(IngestOrchestrator::new(
        sources,
        fetcher,
        classifier.clone(),
        store.clone(),
        dispatcher,
    ));
    AppState {
        store,
        classifier,
        orchestrator,
        ranking: cfg.ranking(),
    }
}
