// src/store/postgres.rs
//! Durable store on Postgres via sqlx.
//!
//! Schema lives in `migrations/`; `(source, title)` uniqueness is a table constraint, so a
//! concurrent insert of the same item surfaces as `StoreError::Duplicate`.

use anyhow::Context;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};
use std::time::Duration;
use uuid::Uuid;

use super::{
    AlertSensitivity, DeliveryStatus, Event, EventFilter, EventStore, NewEvent, NewNotification,
    NotificationRecord, NotificationStore, StoreError, StoreResult, Subscriber, SubscriberStore,
};

const EVENT_COLUMNS: &str =
    r#"id, title, category, "timestamp", source, link, summary, raw_content, image_url, created_at"#;
const NOTIFICATION_COLUMNS: &str =
    "id, subscriber_id, event_id, sent_at, opened_at, status, failure_reason";
const SUBSCRIBER_COLUMNS: &str =
    "id, alert_sensitivity, push_token, favorite_team, favorite_driver";

pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Duplicate,
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

fn corrupt(what: &str, e: impl std::fmt::Display) -> StoreError {
    StoreError::Unavailable(format!("corrupt {what} row: {e}"))
}

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    title: String,
    category: String,
    timestamp: DateTime<Utc>,
    source: String,
    link: Option<String>,
    summary: String,
    raw_content: Option<String>,
    image_url: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for Event {
    type Error = StoreError;

    fn try_from(r: EventRow) -> Result<Self, Self::Error> {
        Ok(Event {
            id: r.id,
            category: r.category.parse().map_err(|e| corrupt("event", e))?,
            title: r.title,
            timestamp: r.timestamp,
            source: r.source,
            link: r.link,
            summary: r.summary,
            raw_content: r.raw_content,
            image_url: r.image_url,
            created_at: r.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SubscriberRow {
    id: String,
    alert_sensitivity: String,
    push_token: Option<String>,
    favorite_team: Option<String>,
    favorite_driver: Option<String>,
}

impl TryFrom<SubscriberRow> for Subscriber {
    type Error = StoreError;

    fn try_from(r: SubscriberRow) -> Result<Self, Self::Error> {
        Ok(Subscriber {
            alert_sensitivity: r
                .alert_sensitivity
                .parse()
                .map_err(|e| corrupt("subscriber", e))?,
            id: r.id,
            push_token: r.push_token,
            favorite_team: r.favorite_team,
            favorite_driver: r.favorite_driver,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct NotificationRow {
    id: Uuid,
    subscriber_id: String,
    event_id: Uuid,
    sent_at: DateTime<Utc>,
    opened_at: Option<DateTime<Utc>>,
    status: String,
    failure_reason: Option<String>,
}

impl TryFrom<NotificationRow> for NotificationRecord {
    type Error = StoreError;

    fn try_from(r: NotificationRow) -> Result<Self, Self::Error> {
        Ok(NotificationRecord {
            status: r.status.parse().map_err(|e| corrupt("notification", e))?,
            id: r.id,
            subscriber_id: r.subscriber_id,
            event_id: r.event_id,
            sent_at: r.sent_at,
            opened_at: r.opened_at,
            failure_reason: r.failure_reason,
        })
    }
}

fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// Append `WHERE ...` for an event filter. Paging is left to the caller.
fn push_event_filter(qb: &mut QueryBuilder<'_, Postgres>, f: &EventFilter) {
    qb.push(" WHERE TRUE");
    if f.displayable_only {
        qb.push(" AND btrim(COALESCE(image_url, '')) <> '' AND btrim(COALESCE(link, '')) <> ''");
    }
    if let Some(c) = f.category {
        qb.push(" AND category = ").push_bind(c.as_str());
    }
    if let Some(src) = &f.source {
        qb.push(" AND LOWER(source) = LOWER(")
            .push_bind(src.clone())
            .push(")");
    }
    if let Some(from) = f.date_from {
        qb.push(r#" AND "timestamp" >= "#).push_bind(from);
    }
}

fn event_list_query(f: &EventFilter) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(format!("SELECT {EVENT_COLUMNS} FROM events"));
    push_event_filter(&mut qb, f);
    qb.push(r#" ORDER BY "timestamp" DESC, id DESC"#);
    if let Some(limit) = f.limit {
        qb.push(" LIMIT ").push_bind(to_i64(limit));
    }
    if f.offset > 0 {
        qb.push(" OFFSET ").push_bind(to_i64(f.offset));
    }
    qb
}

fn event_count_query(f: &EventFilter) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM events");
    push_event_filter(&mut qb, f);
    qb
}

/// Postgres-backed store. Cheap to clone: the pool is shared.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and bring the schema up to date.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .context("connect to postgres")?;
        let store = Self::from_pool(pool);
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("run database migrations")
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl EventStore for PgStore {
    async fn find_event_by_source_title(
        &self,
        source: &str,
        title: &str,
    ) -> StoreResult<Option<Event>> {
        let row: Option<EventRow> = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE source = $1 AND title = $2"
        ))
        .bind(source)
        .bind(title)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Event::try_from).transpose()
    }

    async fn insert_event(&self, new: NewEvent) -> StoreResult<Event> {
        let row: EventRow = sqlx::query_as(&format!(
            r#"INSERT INTO events (id, title, category, "timestamp", source, link, summary, raw_content, image_url, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
               RETURNING {EVENT_COLUMNS}"#
        ))
        .bind(Uuid::new_v4())
        .bind(&new.title)
        .bind(new.category.as_str())
        .bind(new.timestamp)
        .bind(&new.source)
        .bind(&new.link)
        .bind(&new.summary)
        .bind(&new.raw_content)
        .bind(&new.image_url)
        .fetch_one(&self.pool)
        .await?;
        Event::try_from(row)
    }

    async fn get_event(&self, id: Uuid) -> StoreResult<Event> {
        let row: EventRow =
            sqlx::query_as(&format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1"))
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        Event::try_from(row)
    }

    async fn list_events(&self, filter: &EventFilter) -> StoreResult<Vec<Event>> {
        let rows: Vec<EventRow> = event_list_query(filter)
            .build_query_as()
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Event::try_from).collect()
    }

    async fn count_events(&self, filter: &EventFilter) -> StoreResult<usize> {
        let n: i64 = event_count_query(filter)
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;
        Ok(usize::try_from(n).unwrap_or(0))
    }

    async fn set_event_image(&self, id: Uuid, image_url: String) -> StoreResult<()> {
        let res = sqlx::query("UPDATE events SET image_url = $2 WHERE id = $1")
            .bind(id)
            .bind(image_url)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl SubscriberStore for PgStore {
    async fn get_subscriber(&self, id: &str) -> StoreResult<Subscriber> {
        let row: SubscriberRow = sqlx::query_as(&format!(
            "SELECT {SUBSCRIBER_COLUMNS} FROM subscribers WHERE id = $1"
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Subscriber::try_from(row)
    }

    async fn upsert_subscriber(&self, sub: Subscriber) -> StoreResult<Subscriber> {
        let row: SubscriberRow = sqlx::query_as(&format!(
            r#"INSERT INTO subscribers (id, alert_sensitivity, push_token, favorite_team, favorite_driver)
               VALUES ($1, $2, $3, $4, $5)
               ON CONFLICT (id) DO UPDATE SET
                   alert_sensitivity = EXCLUDED.alert_sensitivity,
                   push_token = EXCLUDED.push_token,
                   favorite_team = EXCLUDED.favorite_team,
                   favorite_driver = EXCLUDED.favorite_driver,
                   updated_at = NOW()
               RETURNING {SUBSCRIBER_COLUMNS}"#
        ))
        .bind(&sub.id)
        .bind(sub.alert_sensitivity.as_str())
        .bind(&sub.push_token)
        .bind(&sub.favorite_team)
        .bind(&sub.favorite_driver)
        .fetch_one(&self.pool)
        .await?;
        Subscriber::try_from(row)
    }

    async fn subscribers_for(&self, accepted: &[AlertSensitivity]) -> StoreResult<Vec<Subscriber>> {
        let wanted: Vec<String> = accepted.iter().map(|s| s.as_str().to_string()).collect();
        let rows: Vec<SubscriberRow> = sqlx::query_as(&format!(
            "SELECT {SUBSCRIBER_COLUMNS} FROM subscribers WHERE alert_sensitivity = ANY($1) ORDER BY id"
        ))
        .bind(wanted)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Subscriber::try_from).collect()
    }

    async fn clear_push_token(&self, id: &str) -> StoreResult<()> {
        let res = sqlx::query(
            "UPDATE subscribers SET push_token = NULL, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl NotificationStore for PgStore {
    async fn record_notification(&self, new: NewNotification) -> StoreResult<NotificationRecord> {
        let row: NotificationRow = sqlx::query_as(&format!(
            r#"INSERT INTO notifications (id, subscriber_id, event_id, sent_at, status, failure_reason)
               VALUES ($1, $2, $3, $4, $5, $6)
               RETURNING {NOTIFICATION_COLUMNS}"#
        ))
        .bind(Uuid::new_v4())
        .bind(&new.subscriber_id)
        .bind(new.event_id)
        .bind(new.sent_at)
        .bind(new.status.as_str())
        .bind(&new.failure_reason)
        .fetch_one(&self.pool)
        .await?;
        NotificationRecord::try_from(row)
    }

    async fn count_notifications_between(
        &self,
        subscriber_id: &str,
        status: DeliveryStatus,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let n: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications
             WHERE subscriber_id = $1 AND status = $2 AND sent_at >= $3 AND sent_at <= $4",
        )
        .bind(subscriber_id)
        .bind(status.as_str())
        .bind(since)
        .bind(until)
        .fetch_one(&self.pool)
        .await?;
        Ok(usize::try_from(n).unwrap_or(0))
    }

    async fn notifications_for(
        &self,
        subscriber_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<NotificationRecord>> {
        let rows: Vec<NotificationRow> = sqlx::query_as(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications
             WHERE subscriber_id = $1 ORDER BY sent_at DESC LIMIT $2"
        ))
        .bind(subscriber_id)
        .bind(to_i64(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(NotificationRecord::try_from).collect()
    }

    async fn mark_opened(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<NotificationRecord> {
        let row: NotificationRow = sqlx::query_as(&format!(
            "UPDATE notifications SET opened_at = $2 WHERE id = $1 RETURNING {NOTIFICATION_COLUMNS}"
        ))
        .bind(id)
        .bind(at)
        .fetch_one(&self.pool)
        .await?;
        NotificationRecord::try_from(row)
    }

    async fn mark_latest_opened(
        &self,
        subscriber_id: &str,
        event_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<NotificationRecord>> {
        let row: Option<NotificationRow> = sqlx::query_as(&format!(
            r#"UPDATE notifications SET opened_at = $3
               WHERE id = (
                   SELECT id FROM notifications
                   WHERE subscriber_id = $1 AND event_id = $2 AND opened_at IS NULL
                   ORDER BY sent_at DESC
                   LIMIT 1
               )
               RETURNING {NOTIFICATION_COLUMNS}"#
        ))
        .bind(subscriber_id)
        .bind(event_id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;
        row.map(NotificationRecord::try_from).transpose()
    }
}
