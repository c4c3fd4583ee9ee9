// src/notify/mod.rs
//! Notification dispatch: subscriber matching, hourly rate limit, push delivery and
//! the audit trail of every attempt.

pub mod push;
pub mod rate_limit;

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::sync::Arc;

use crate::ingest::fetch::truncate_chars;
use crate::store::{
    AlertSensitivity, DeliveryStatus, Event, NewNotification, Store, StoreError, Subscriber,
};

pub use push::{
    AccessTokenSource, DisabledPush, FcmPushClient, PushClient, PushError, PushMessage,
    PushPayload, ServiceAccountTokens, StaticToken,
};
pub use rate_limit::RateLimitPolicy;

pub const INVALID_TOKEN_REASON: &str = "invalid_token";
pub const MAX_FAILURE_REASON_CHARS: usize = 500;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "f1pulse_notifications_total",
            "Notification dispatch outcomes by status."
        );
    });
}

/// What happened for one subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Sent,
    Failed { reason: String },
    RateLimited,
    NoToken,
    /// Persistence failed for this subscriber; others are unaffected.
    Errored { message: String },
}

impl DispatchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            DispatchOutcome::Sent => "sent",
            DispatchOutcome::Failed { .. } => "failed",
            DispatchOutcome::RateLimited => "rate_limited",
            DispatchOutcome::NoToken => "no_token",
            DispatchOutcome::Errored { .. } => "errored",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriberOutcome {
    pub subscriber_id: String,
    pub outcome: DispatchOutcome,
}

/// Sensitivities that receive an event of this category.
pub fn audience_for(event: &Event) -> &'static [AlertSensitivity] {
    if event.category.is_breaking() {
        &[AlertSensitivity::All, AlertSensitivity::Breaking]
    } else {
        &[AlertSensitivity::All]
    }
}

pub struct NotificationDispatcher {
    store: Arc<dyn Store>,
    push: Arc<dyn PushClient>,
    policy: RateLimitPolicy,
}

impl NotificationDispatcher {
    pub fn new(store: Arc<dyn Store>, push: Arc<dyn PushClient>, policy: RateLimitPolicy) -> Self {
        ensure_metrics_described();
        Self {
            store,
            push,
            policy,
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    pub async fn dispatch(&self, event: &Event) -> Vec<SubscriberOutcome> {
        self.dispatch_at(event, Utc::now()).await
    }

    /// Attempt delivery of `event` to every matching subscriber, as of `now`.
    pub async fn dispatch_at(&self, event: &Event, now: DateTime<Utc>) -> Vec<SubscriberOutcome> {
        if !self.push.is_enabled() {
            tracing::debug!(target: "notify", title = %event.title, "push disabled; skipping dispatch");
            return Vec::new();
        }

        let subscribers = match self.store.subscribers_for(audience_for(event)).await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(target: "notify", error = %e, title = %event.title, "subscriber lookup failed");
                return Vec::new();
            }
        };

        let unrestricted = self.policy.is_unrestricted(now);
        let mut out = Vec::with_capacity(subscribers.len());
        for sub in subscribers {
            let outcome = match self.deliver(event, &sub, now, unrestricted).await {
                Ok(o) => o,
                Err(e) => {
                    tracing::warn!(
                        target: "notify",
                        subscriber_id = %sub.id,
                        error = %e,
                        "notification bookkeeping failed"
                    );
                    DispatchOutcome::Errored {
                        message: e.to_string(),
                    }
                }
            };
            counter!("f1pulse_notifications_total", "status" => outcome.label()).increment(1);
            out.push(SubscriberOutcome {
                subscriber_id: sub.id,
                outcome,
            });
        }

        let sent = out
            .iter()
            .filter(|o| o.outcome == DispatchOutcome::Sent)
            .count();
        tracing::info!(
            target: "notify",
            title = %event.title,
            category = %event.category,
            attempted = out.len(),
            sent,
            "dispatch complete"
        );
        out
    }

    async fn deliver(
        &self,
        event: &Event,
        sub: &Subscriber,
        now: DateTime<Utc>,
        unrestricted: bool,
    ) -> Result<DispatchOutcome, StoreError> {
        let Some(token) = sub.deliverable_token() else {
            return Ok(DispatchOutcome::NoToken);
        };

        if !unrestricted {
            let sent = self
                .store
                .count_notifications_between(
                    &sub.id,
                    DeliveryStatus::Sent,
                    self.policy.window_start(now),
                    now,
                )
                .await?;
            if self.policy.is_limited(sent) {
                tracing::debug!(target: "notify", subscriber_id = %sub.id, sent, "rate limited");
                return Ok(DispatchOutcome::RateLimited);
            }
        }

        let msg = PushMessage {
            token: token.to_string(),
            payload: PushPayload::for_event(event),
        };

        let (status, reason) = match self.push.send(&msg).await {
            Ok(_) => (DeliveryStatus::Sent, None),
            Err(PushError::InvalidToken(detail)) => {
                tracing::info!(
                    target: "notify",
                    subscriber_id = %sub.id,
                    detail = %detail,
                    "push token rejected; clearing"
                );
                self.store.clear_push_token(&sub.id).await?;
                (DeliveryStatus::Failed, Some(INVALID_TOKEN_REASON.to_string()))
            }
            Err(PushError::Unauthenticated(detail)) => {
                tracing::error!(
                    target: "notify",
                    subscriber_id = %sub.id,
                    error = %detail,
                    "push credentials rejected by FCM; check the service account"
                );
                (
                    DeliveryStatus::Failed,
                    Some(truncate_chars(
                        &format!("unauthenticated: {detail}"),
                        MAX_FAILURE_REASON_CHARS,
                    )),
                )
            }
            Err(PushError::Delivery(detail)) => {
                tracing::warn!(
                    target: "notify",
                    subscriber_id = %sub.id,
                    error = %detail,
                    "push delivery failed"
                );
                (
                    DeliveryStatus::Failed,
                    Some(truncate_chars(&detail, MAX_FAILURE_REASON_CHARS)),
                )
            }
        };

        self.store
            .record_notification(NewNotification {
                subscriber_id: sub.id.clone(),
                event_id: event.id,
                sent_at: now,
                status,
                failure_reason: reason.clone(),
            })
            .await?;

        Ok(match reason {
            None => DispatchOutcome::Sent,
            Some(reason) => DispatchOutcome::Failed { reason },
        })
    }
}
