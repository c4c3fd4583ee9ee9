// tests/common/mod.rs
//
// Shared fakes and wiring for integration tests: a recording push client and an
// in-process app assembled over FixtureRetriever + MemoryStore.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use f1_pulse::categorize::Category;
use f1_pulse::config::AppConfig;
use f1_pulse::ingest::providers::FixtureRetriever;
use f1_pulse::ingest::types::FeedSource;
use f1_pulse::notify::{PushClient, PushError, PushMessage};
use f1_pulse::store::{
    AlertSensitivity, DeliveryStatus, Event, EventFilter, EventStore, NewEvent, NewNotification,
    NotificationRecord, NotificationStore, Store, StoreError, StoreResult, Subscriber,
    SubscriberStore,
};
use uuid::Uuid;
use f1_pulse::{assemble, AppState, Classifier, MemoryStore};

pub const MONACO_RSS: &str = include_str!("../fixtures/monaco_rss.xml");
pub const MCLAREN_ATOM: &str = include_str!("../fixtures/mclaren_atom.xml");
pub const PADDOCK_MIXED: &str = include_str!("../fixtures/paddock_mixed.xml");

/// Accepts every message except for tokens marked as rejected.
#[derive(Default)]
pub struct RecordingPush {
    sent: Mutex<Vec<PushMessage>>,
    rejected: Mutex<HashSet<String>>,
    attempts: Mutex<usize>,
}

impl RecordingPush {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reject_token(&self, token: &str) {
        self.rejected.lock().insert(token.to_string());
    }

    pub fn messages(&self) -> Vec<PushMessage> {
        self.sent.lock().clone()
    }

    pub fn tokens(&self) -> Vec<String> {
        self.sent.lock().iter().map(|m| m.token.clone()).collect()
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock()
    }
}

#[async_trait]
impl PushClient for RecordingPush {
    async fn send(&self, msg: &PushMessage) -> Result<String, PushError> {
        *self.attempts.lock() += 1;
        if self.rejected.lock().contains(&msg.token) {
            return Err(PushError::InvalidToken(
                "Requested entity was not found.".into(),
            ));
        }
        let mut sent = self.sent.lock();
        sent.push(msg.clone());
        Ok(format!("projects/f1-pulse-test/messages/{}", sent.len()))
    }
}

pub struct TestApp {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub push: Arc<RecordingPush>,
    pub retriever: Arc<FixtureRetriever>,
}

/// App over fixtures: one source per `(name, xml)` pair, embedded categorizer rules.
pub fn test_app(feeds: &[(&str, &str)]) -> TestApp {
    test_app_with_store(feeds, |mem| mem as Arc<dyn Store>)
}

/// Same wiring, but the services see `wrap(memory)`; `TestApp::store` stays the raw memory store.
pub fn test_app_with_store(
    feeds: &[(&str, &str)],
    wrap: impl FnOnce(Arc<MemoryStore>) -> Arc<dyn Store>,
) -> TestApp {
    let retriever = FixtureRetriever::new();
    let mut sources = Vec::new();
    for (name, xml) in feeds {
        retriever.set(
            name,
            f1_pulse::ingest::providers::FixtureResponse::Xml(xml.to_string()),
        );
        sources.push(FeedSource::new(
            *name,
            format!("https://feeds.example.com/{}", name.to_lowercase()),
        ));
    }
    let retriever = Arc::new(retriever);
    let store = Arc::new(MemoryStore::new());
    let push = RecordingPush::new();
    let state = assemble(
        &AppConfig::default(),
        sources,
        Classifier::embedded().expect("embedded rules"),
        retriever.clone(),
        push.clone(),
        wrap(store.clone()),
    );
    TestApp {
        state,
        store,
        push,
        retriever,
    }
}

pub async fn subscribe(
    store: &MemoryStore,
    id: &str,
    sensitivity: AlertSensitivity,
    token: Option<&str>,
) -> Subscriber {
    let mut sub = Subscriber::new(id).with_sensitivity(sensitivity);
    if let Some(t) = token {
        sub = sub.with_token(t);
    }
    store.upsert_subscriber(sub).await.expect("upsert subscriber")
}

pub fn new_event(title: &str, category: Category, ts: DateTime<Utc>) -> NewEvent {
    NewEvent {
        title: title.to_string(),
        category,
        timestamp: ts,
        source: "RaceFans".to_string(),
        link: Some(format!(
            "https://www.racefans.net/{}",
            title.to_lowercase().replace(' ', "-")
        )),
        summary: format!("{title}. More to follow."),
        raw_content: None,
        image_url: Some("https://www.racefans.net/img/lead.jpg".to_string()),
    }
}

/// Delegates to a MemoryStore but fails `insert_event` for the listed titles.
pub struct FailingInsertStore {
    inner: Arc<MemoryStore>,
    failing_titles: HashSet<String>,
}

impl FailingInsertStore {
    pub fn new(inner: Arc<MemoryStore>, titles: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            inner,
            failing_titles: titles.iter().map(|t| t.to_string()).collect(),
        })
    }
}

#[async_trait]
impl EventStore for FailingInsertStore {
    async fn find_event_by_source_title(
        &self,
        source: &str,
        title: &str,
    ) -> StoreResult<Option<Event>> {
        self.inner.find_event_by_source_title(source, title).await
    }

    async fn insert_event(&self, new: NewEvent) -> StoreResult<Event> {
        if self.failing_titles.contains(&new.title) {
            return Err(StoreError::Unavailable("connection reset".into()));
        }
        self.inner.insert_event(new).await
    }

    async fn get_event(&self, id: Uuid) -> StoreResult<Event> {
        self.inner.get_event(id).await
    }

    async fn list_events(&self, filter: &EventFilter) -> StoreResult<Vec<Event>> {
        self.inner.list_events(filter).await
    }

    async fn count_events(&self, filter: &EventFilter) -> StoreResult<usize> {
        self.inner.count_events(filter).await
    }

    async fn set_event_image(&self, id: Uuid, image_url: String) -> StoreResult<()> {
        self.inner.set_event_image(id, image_url).await
    }
}

#[async_trait]
impl SubscriberStore for FailingInsertStore {
    async fn get_subscriber(&self, id: &str) -> StoreResult<Subscriber> {
        self.inner.get_subscriber(id).await
    }

    async fn upsert_subscriber(&self, sub: Subscriber) -> StoreResult<Subscriber> {
        self.inner.upsert_subscriber(sub).await
    }

    async fn subscribers_for(&self, accepted: &[AlertSensitivity]) -> StoreResult<Vec<Subscriber>> {
        self.inner.subscribers_for(accepted).await
    }

    async fn clear_push_token(&self, id: &str) -> StoreResult<()> {
        self.inner.clear_push_token(id).await
    }
}

#[async_trait]
impl NotificationStore for FailingInsertStore {
    async fn record_notification(&self, new: NewNotification) -> StoreResult<NotificationRecord> {
        self.inner.record_notification(new).await
    }

    async fn count_notifications_between(
        &self,
        subscriber_id: &str,
        status: DeliveryStatus,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> StoreResult<usize> {
        self.inner
            .count_notifications_between(subscriber_id, status, since, until)
            .await
    }

    async fn notifications_for(
        &self,
        subscriber_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<NotificationRecord>> {
        self.inner.notifications_for(subscriber_id, limit).await
    }

    async fn mark_opened(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<NotificationRecord> {
        self.inner.mark_opened(id, at).await
    }

    async fn mark_latest_opened(
        &self,
        subscriber_id: &str,
        event_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<NotificationRecord>> {
        self.inner.mark_latest_opened(subscriber_id, event_id, at).await
    }
}
