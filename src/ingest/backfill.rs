// src/ingest/backfill.rs
use crate::ingest::fetch::FeedFetcher;
use crate::ingest::types::FeedSource;
use crate::store::{EventStore, StoreError};

/// Re-fetch enabled sources and set `image_url` on stored events (matched by source + title)
/// that have none. Returns how many events were updated.
pub async fn backfill_images<S>(
    sources: &[FeedSource],
    fetcher: &FeedFetcher,
    store: &S,
) -> Result<usize, StoreError>
where
    S: EventStore + ?Sized,
{
    let mut updated = 0usize;
    for source in sources.iter().filter(|s| s.enabled) {
        let outcome = fetcher.fetch(source).await;
        for item in outcome.items {
            let Some(image) = item.image_url else {
                continue;
            };
            let Some(existing) = store
                .find_event_by_source_title(&item.source, &item.title)
                .await?
            else {
                continue;
            };
            if existing.image_url.as_deref().is_some_and(|u| !u.trim().is_empty()) {
                continue;
            }
            store.set_event_image(existing.id, image).await?;
            updated += 1;
        }
    }
    tracing::info!(target: "ingest", updated, "image backfill complete");
    Ok(updated)
}
