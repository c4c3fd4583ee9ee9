// src/store/mod.rs
//! Persistence seam: record types, store traits, the in-process store and the Postgres store.
//!
//! Three record families live behind the traits: events (unique by `(source, title)`),
//! subscribers, and notification records (queried by subscriber + time window for the
//! hourly rate limit).

pub mod memory;
pub mod postgres;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::categorize::Category;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Unique `(source, title)` constraint hit.
    #[error("duplicate record")]
    Duplicate,
    #[error("record not found")]
    NotFound,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A classified news item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub title: String,
    pub category: Category,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub link: Option<String>,
    pub summary: String,
    pub raw_content: Option<String>,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Has both a non-empty image and link, i.e. can be shown in the feed.
    pub fn is_displayable(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        present(&self.image_url) && present(&self.link)
    }
}

/// Insert payload; id and `created_at` are assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub title: String,
    pub category: Category,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub link: Option<String>,
    pub summary: String,
    pub raw_content: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AlertSensitivity {
    #[default]
    All,
    Breaking,
}

impl AlertSensitivity {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertSensitivity::All => "all",
            AlertSensitivity::Breaking => "breaking",
        }
    }
}

impl fmt::Display for AlertSensitivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertSensitivity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(AlertSensitivity::All),
            "breaking" => Ok(AlertSensitivity::Breaking),
            other => Err(format!("invalid alert sensitivity `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: String,
    pub alert_sensitivity: AlertSensitivity,
    pub push_token: Option<String>,
    pub favorite_team: Option<String>,
    pub favorite_driver: Option<String>,
}

impl Subscriber {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            alert_sensitivity: AlertSensitivity::default(),
            push_token: None,
            favorite_team: None,
            favorite_driver: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.push_token = Some(token.into());
        self
    }

    pub fn with_sensitivity(mut self, s: AlertSensitivity) -> Self {
        self.alert_sensitivity = s;
        self
    }

    /// Token present and not blank.
    pub fn deliverable_token(&self) -> Option<&str> {
        self.push_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
        }
    }
}

impl FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(DeliveryStatus::Sent),
            "failed" => Ok(DeliveryStatus::Failed),
            other => Err(format!("invalid delivery status `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: Uuid,
    pub subscriber_id: String,
    pub event_id: Uuid,
    pub sent_at: DateTime<Utc>,
    pub opened_at: Option<DateTime<Utc>>,
    pub status: DeliveryStatus,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotification {
    pub subscriber_id: String,
    pub event_id: Uuid,
    pub sent_at: DateTime<Utc>,
    pub status: DeliveryStatus,
    pub failure_reason: Option<String>,
}

/// Filter for event listing and counting. Results are newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub category: Option<Category>,
    pub source: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub displayable_only: bool,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl EventFilter {
    pub fn matches(&self, e: &Event) -> bool {
        if self.displayable_only && !e.is_displayable() {
            return false;
        }
        if self.category.is_some_and(|c| c != e.category) {
            return false;
        }
        if let Some(src) = &self.source {
            if !src.eq_ignore_ascii_case(&e.source) {
                return false;
            }
        }
        if self.date_from.is_some_and(|from| e.timestamp < from) {
            return false;
        }
        true
    }
}

#[async_trait::async_trait]
pub trait EventStore: Send + Sync {
    async fn find_event_by_source_title(&self, source: &str, title: &str)
        -> StoreResult<Option<Event>>;
    /// Fails with `StoreError::Duplicate` when `(source, title)` already exists.
    async fn insert_event(&self, new: NewEvent) -> StoreResult<Event>;
    async fn get_event(&self, id: Uuid) -> StoreResult<Event>;
    async fn list_events(&self, filter: &EventFilter) -> StoreResult<Vec<Event>>;
    /// Ignores `offset` and `limit`.
    async fn count_events(&self, filter: &EventFilter) -> StoreResult<usize>;
    async fn set_event_image(&self, id: Uuid, image_url: String) -> StoreResult<()>;
}

#[async_trait::async_trait]
pub trait SubscriberStore: Send + Sync {
    async fn get_subscriber(&self, id: &str) -> StoreResult<Subscriber>;
    async fn upsert_subscriber(&self, sub: Subscriber) -> StoreResult<Subscriber>;
    /// Subscribers whose sensitivity is one of `accepted`, ordered by id.
    async fn subscribers_for(&self, accepted: &[AlertSensitivity]) -> StoreResult<Vec<Subscriber>>;
    async fn clear_push_token(&self, id: &str) -> StoreResult<()>;
}

#[async_trait::async_trait]
pub trait NotificationStore: Send + Sync {
    async fn record_notification(&self, new: NewNotification) -> StoreResult<NotificationRecord>;
    /// Records for `subscriber_id` with `status` and `sent_at` in `[since, until]`.
    async fn count_notifications_between(
        &self,
        subscriber_id: &str,
        status: DeliveryStatus,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> StoreResult<usize>;
    /// Newest first.
    async fn notifications_for(&self, subscriber_id: &str, limit: usize)
        -> StoreResult<Vec<NotificationRecord>>;
    async fn mark_opened(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<NotificationRecord>;
    /// Marks the most recent unopened record for this subscriber + event.
    async fn mark_latest_opened(
        &self,
        subscriber_id: &str,
        event_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<NotificationRecord>>;
}

/// Everything the service needs from persistence.
pub trait Store: EventStore + SubscriberStore + NotificationStore {}

impl<T: EventStore + SubscriberStore + NotificationStore> Store for T {}
