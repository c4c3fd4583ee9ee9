//! F1 Pulse binary entrypoint
//! Boots the Axum HTTP server, the background ingestion loop and the Prometheus endpoint.

use std::sync::Arc;

use anyhow::Context;
use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use f1_pulse::categorize::CategoryRules;
use f1_pulse::config::{AppConfig, LogFormat};
use f1_pulse::ingest::config::load_feeds_default;
use f1_pulse::ingest::providers::HttpRssRetriever;
use f1_pulse::ingest::scheduler::spawn_ingest_scheduler;
use f1_pulse::metrics::Metrics;
use f1_pulse::store::{PgStore, Store};
use f1_pulse::{api, assemble, Classifier, MemoryStore};

const DEFAULT_LOG_FILTER: &str = "f1_pulse=info,ingest=info,notify=info,api=info,tower_http=info,warn";

/// Compact logs by default, JSON when `LOG_FORMAT=json`.
/// `try_init` because the deployment runtime may already own the global subscriber.
fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let registry = tracing_subscriber::registry().with(filter);
    let res = match format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    let cfg = AppConfig::from_env();
    init_tracing(cfg.log_format);

    let rules = CategoryRules::load_default().context("load categorizer rules")?;
    let classifier = Classifier::from_rules(&rules).context("compile categorizer rules")?;
    let sources = load_feeds_default().context("load feed list")?;
    let retriever = HttpRssRetriever::new(cfg.fetch_timeout)
        .map_err(|e| anyhow::anyhow!("build feed http client: {e}"))?;

    let store: Arc<dyn Store> = match &cfg.database_url {
        Some(url) => Arc::new(PgStore::connect(url).await.context("open postgres store")?),
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory store, data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };
    let push = cfg.push_client().context("configure push delivery")?;

    tracing::info!(
        feeds = sources.len(),
        durable_store = cfg.database_url.is_some(),
        interval_secs = cfg.ingest_interval_secs,
        push_enabled = cfg.fcm.is_some(),
        "starting f1-pulse"
    );

    let state = assemble(
        &cfg,
        sources,
        classifier,
        Arc::new(retriever),
        push,
        store,
    );

    // Loop keeps running after the handle is dropped.
    let _scheduler = spawn_ingest_scheduler(state.orchestrator.clone(), cfg.scheduler());

    let backfill = state.orchestrator.clone();
    tokio::spawn(async move {
        if let Err(e) = backfill.backfill_images().await {
            tracing::warn!(target: "ingest", error = %e, "image backfill failed");
        }
    });

    let mut router = api::router(state);
    match Metrics::init() {
        Ok(m) => router = router.merge(m.router()),
        Err(e) => tracing::warn!(error = %e, "metrics endpoint disabled"),
    }

    Ok(router.into())
}
