// src/store/memory.rs
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

use super::{
    AlertSensitivity, DeliveryStatus, Event, EventFilter, EventStore, NewEvent, NewNotification,
    NotificationRecord, NotificationStore, StoreError, StoreResult, Subscriber, SubscriberStore,
};

#[derive(Default)]
struct Events {
    by_id: HashMap<Uuid, Event>,
    /// (source, title) -> id
    keys: HashMap<(String, String), Uuid>,
}

/// In-process store. Each map sits behind its own lock, so a write is visible to every
/// later read in the same process.
#[derive(Default)]
pub struct MemoryStore {
    events: RwLock<Events>,
    subscribers: RwLock<HashMap<String, Subscriber>>,
    notifications: RwLock<Vec<NotificationRecord>>,
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Unavailable("lock poisoned".into())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total notification records (all statuses). Handy for tests and admin views.
    pub fn notification_count(&self) -> usize {
        self.notifications.read().map(|n| n.len()).unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl EventStore for MemoryStore {
    async fn find_event_by_source_title(
        &self,
        source: &str,
        title: &str,
    ) -> StoreResult<Option<Event>> {
        let ev = self.events.read().map_err(poisoned)?;
        Ok(ev
            .keys
            .get(&(source.to_string(), title.to_string()))
            .and_then(|id| ev.by_id.get(id))
            .cloned())
    }

    async fn insert_event(&self, new: NewEvent) -> StoreResult<Event> {
        let mut ev = self.events.write().map_err(poisoned)?;
        let key = (new.source.clone(), new.title.clone());
        if ev.keys.contains_key(&key) {
            return Err(StoreError::Duplicate);
        }
        let event = Event {
            id: Uuid::new_v4(),
            title: new.title,
            category: new.category,
            timestamp: new.timestamp,
            source: new.source,
            link: new.link,
            summary: new.summary,
            raw_content: new.raw_content,
            image_url: new.image_url,
            created_at: Utc::now(),
        };
        ev.keys.insert(key, event.id);
        ev.by_id.insert(event.id, event.clone());
        Ok(event)
    }

    async fn get_event(&self, id: Uuid) -> StoreResult<Event> {
        let ev = self.events.read().map_err(poisoned)?;
        ev.by_id.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn list_events(&self, filter: &EventFilter) -> StoreResult<Vec<Event>> {
        let ev = self.events.read().map_err(poisoned)?;
        let mut out: Vec<Event> = ev
            .by_id
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        let iter = out.into_iter().skip(filter.offset);
        Ok(match filter.limit {
            Some(n) => iter.take(n).collect(),
            None => iter.collect(),
        })
    }

    async fn count_events(&self, filter: &EventFilter) -> StoreResult<usize> {
        let ev = self.events.read().map_err(poisoned)?;
        Ok(ev.by_id.values().filter(|e| filter.matches(e)).count())
    }

    async fn set_event_image(&self, id: Uuid, image_url: String) -> StoreResult<()> {
        let mut ev = self.events.write().map_err(poisoned)?;
        let e = ev.by_id.get_mut(&id).ok_or(StoreError::NotFound)?;
        e.image_url = Some(image_url);
        Ok(())
    }
}

#[async_trait::async_trait]
impl SubscriberStore for MemoryStore {
    async fn get_subscriber(&self, id: &str) -> StoreResult<Subscriber> {
        let subs = self.subscribers.read().map_err(poisoned)?;
        subs.get(id).cloned().ok_or(StoreError::NotFound)
    }

    async fn upsert_subscriber(&self, sub: Subscriber) -> StoreResult<Subscriber> {
        let mut subs = self.subscribers.write().map_err(poisoned)?;
        subs.insert(sub.id.clone(), sub.clone());
        Ok(sub)
    }

    async fn subscribers_for(&self, accepted: &[AlertSensitivity]) -> StoreResult<Vec<Subscriber>> {
        let subs = self.subscribers.read().map_err(poisoned)?;
        let mut out: Vec<Subscriber> = subs
            .values()
            .filter(|s| accepted.contains(&s.alert_sensitivity))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn clear_push_token(&self, id: &str) -> StoreResult<()> {
        let mut subs = self.subscribers.write().map_err(poisoned)?;
        let s = subs.get_mut(id).ok_or(StoreError::NotFound)?;
        s.push_token = None;
        Ok(())
    }
}

#[async_trait::async_trait]
impl NotificationStore for MemoryStore {
    async fn record_notification(&self, new: NewNotification) -> StoreResult<NotificationRecord> {
        let rec = NotificationRecord {
            id: Uuid::new_v4(),
            subscriber_id: new.subscriber_id,
            event_id: new.event_id,
            sent_at: new.sent_at,
            opened_at: None,
            status: new.status,
            failure_reason: new.failure_reason,
        };
        self.notifications
            .write()
            .map_err(poisoned)?
            .push(rec.clone());
        Ok(rec)
    }

    async fn count_notifications_between(
        &self,
        subscriber_id: &str,
        status: DeliveryStatus,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let n = self.notifications.read().map_err(poisoned)?;
        Ok(n.iter()
            .filter(|r| r.subscriber_id == subscriber_id && r.status == status)
            .filter(|r| r.sent_at >= since && r.sent_at <= until)
            .count())
    }

    async fn notifications_for(
        &self,
        subscriber_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<NotificationRecord>> {
        let n = self.notifications.read().map_err(poisoned)?;
        let mut out: Vec<NotificationRecord> = n
            .iter()
            .filter(|r| r.subscriber_id == subscriber_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));
        out.truncate(limit);
        Ok(out)
    }

    async fn mark_opened(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<NotificationRecord> {
        let mut n = self.notifications.write().map_err(poisoned)?;
        let rec = n.iter_mut().find(|r| r.id == id).ok_or(StoreError::NotFound)?;
        rec.opened_at = Some(at);
        Ok(rec.clone())
    }

    async fn mark_latest_opened(
        &self,
        subscriber_id: &str,
        event_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<NotificationRecord>> {
        let mut n = self.notifications.write().map_err(poisoned)?;
        let latest = n
            .iter_mut()
            .filter(|r| {
                r.subscriber_id == subscriber_id && r.event_id == event_id && r.opened_at.is_none()
            })
            .max_by_key(|r| r.sent_at);
        Ok(latest.map(|r| {
            r.opened_at = Some(at);
            r.clone()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::categorize::Category;
    use chrono::{Duration, TimeZone};

    fn new_event(source: &str, title: &str, ts: DateTime<Utc>) -> NewEvent {
        NewEvent {
            title: title.into(),
            category: Category::TeamNews,
            timestamp: ts,
            source: source.into(),
            link: Some("https://example.com/a".into()),
            summary: String::new(),
            raw_content: None,
            image_url: None,
        }
    }

    #[tokio::test]
    async fn source_title_is_unique() {
        let s = MemoryStore::new();
        let t = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        s.insert_event(new_event("FIA", "Same", t)).await.unwrap();
        let dup = s.insert_event(new_event("FIA", "Same", t)).await;
        assert_eq!(dup.unwrap_err(), StoreError::Duplicate);
        // same title from another source is a different event
        s.insert_event(new_event("RaceFans", "Same", t)).await.unwrap();
        assert_eq!(s.count_events(&EventFilter::default()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn list_is_newest_first_with_paging() {
        let s = MemoryStore::new();
        let t = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        for i in 0..5 {
            s.insert_event(new_event("FIA", &format!("n{i}"), t + Duration::minutes(i)))
                .await
                .unwrap();
        }
        let page = s
            .list_events(&EventFilter {
                offset: 1,
                limit: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        let titles: Vec<&str> = page.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["n3", "n2"]);
    }

    #[tokio::test]
    async fn window_count_is_inclusive_and_status_scoped() {
        let s = MemoryStore::new();
        let now = Utc.with_ymd_and_hms(2025, 1, 8, 12, 0, 0).unwrap();
        let ev = Uuid::new_v4();
        for (mins, status) in [
            (0, DeliveryStatus::Sent),
            (60, DeliveryStatus::Sent),
            (61, DeliveryStatus::Sent),
            (5, DeliveryStatus::Failed),
        ] {
            s.record_notification(NewNotification {
                subscriber_id: "u1".into(),
                event_id: ev,
                sent_at: now - Duration::minutes(mins),
                status,
                failure_reason: None,
            })
            .await
            .unwrap();
        }
        let n = s
            .count_notifications_between("u1", DeliveryStatus::Sent, now - Duration::hours(1), now)
            .await
            .unwrap();
        assert_eq!(n, 2);
    }

    #[tokio::test]
    async fn latest_unopened_is_marked() {
        let s = MemoryStore::new();
        let now = Utc.with_ymd_and_hms(2025, 1, 8, 12, 0, 0).unwrap();
        let ev = Uuid::new_v4();
        let older = s
            .record_notification(NewNotification {
                subscriber_id: "u1".into(),
                event_id: ev,
                sent_at: now - Duration::minutes(10),
                status: DeliveryStatus::Sent,
                failure_reason: None,
            })
            .await
            .unwrap();
        let newer = s
            .record_notification(NewNotification {
                subscriber_id: "u1".into(),
                event_id: ev,
                sent_at: now - Duration::minutes(1),
                status: DeliveryStatus::Sent,
                failure_reason: None,
            })
            .await
            .unwrap();

        let marked = s.mark_latest_opened("u1", ev, now).await.unwrap().unwrap();
        assert_eq!(marked.id, newer.id);
        let marked = s.mark_latest_opened("u1", ev, now).await.unwrap().unwrap();
        assert_eq!(marked.id, older.id);
        assert!(s.mark_latest_opened("u1", ev, now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sensitivity_lookup_and_token_clearing() {
        let s = MemoryStore::new();
        s.upsert_subscriber(Subscriber::new("u1").with_token("tok"))
            .await
            .unwrap();
        s.upsert_subscriber(
            Subscriber::new("u2")
                .with_token("tok2")
                .with_sensitivity(AlertSensitivity::Breaking),
        )
        .await
        .unwrap();
        assert_eq!(s.subscribers_for(&[AlertSensitivity::All]).await.unwrap().len(), 1);
        let both = s
            .subscribers_for(&[AlertSensitivity::All, AlertSensitivity::Breaking])
            .await
            .unwrap();
        assert_eq!(both.len(), 2);

        s.clear_push_token("u1").await.unwrap();
        let u1 = s.get_subscriber("u1").await.unwrap();
        assert_eq!(u1.deliverable_token(), None);
        assert_eq!(s.clear_push_token("nobody").await, Err(StoreError::NotFound));
    }
}
