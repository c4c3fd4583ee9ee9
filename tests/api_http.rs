// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.

mod common;

use chrono::{Duration, Utc};
use serde_json::json;
use serde_json::Value as Json;
use shuttle_axum::axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use tower::ServiceExt as _; // for `oneshot`

use common::{new_event, subscribe, test_app, TestApp, MONACO_RSS, PADDOCK_MIXED};
use f1_pulse::api;
use f1_pulse::categorize::Category;
use f1_pulse::store::{AlertSensitivity, EventStore, NotificationStore, SubscriberStore};

const BODY_LIMIT: usize = 1024 * 1024;

fn router_for(app: &TestApp) -> Router {
    api::router(app.state.clone())
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
    let resp = router.clone().oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    (status, bytes)
}

async fn get_json(router: &Router, uri: &str) -> (StatusCode, Json) {
    let req = Request::get(uri).body(Body::empty()).unwrap();
    let (status, bytes) = send(router, req).await;
    (status, serde_json::from_slice(&bytes).unwrap_or(Json::Null))
}

async fn post_json(router: &Router, uri: &str, payload: Json) -> (StatusCode, Json) {
    let req = Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap();
    let (status, bytes) = send(router, req).await;
    (status, serde_json::from_slice(&bytes).unwrap_or(Json::Null))
}

#[tokio::test]
async fn health_returns_ok() {
    let app = test_app(&[]);
    let router = router_for(&app);
    let (status, bytes) = send(&router, Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(String::from_utf8(bytes).unwrap().trim(), "OK");

    let (status, v) = get_json(&router, "/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["status"], "ok");
    assert!(v["last_ingestion"].is_null());
}

#[tokio::test]
async fn feed_lists_only_displayable_events() {
    let app = test_app(&[("PlanetF1", PADDOCK_MIXED), ("RaceFans", MONACO_RSS)]);
    app.state.orchestrator.run_cycle().await.unwrap();
    let router = router_for(&app);

    let (status, v) = get_json(&router, "/api/feed?page=1&limit=10").await;
    assert_eq!(status, StatusCode::OK);
    let titles: Vec<&str> = v["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["title"].as_str().unwrap())
        .collect();
    // Only the two items carrying an image are displayable.
    assert_eq!(titles.len(), 2);
    assert!(titles.contains(&"Verstappen wins the Monaco Grand Prix"));
    assert!(titles.contains(&"Hamilton handed five-second time penalty in Austria"));
    assert_eq!(v["pagination"]["total"], 2);
    assert_eq!(v["pagination"]["total_pages"], 1);
    assert_eq!(v["pagination"]["limit"], 10);

    let (_, v) = get_json(&router, "/api/feed?category=Penalty").await;
    assert_eq!(v["data"].as_array().unwrap().len(), 1);
    assert_eq!(v["data"][0]["category"], "Penalty");

    let (status, v) = get_json(&router, "/api/feed?category=Gossip").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(v["error"]["message"].as_str().unwrap().contains("Gossip"));

    let (status, _) = get_json(&router, "/api/feed?date_from=not-a-date").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // junk paging values fall back to defaults
    let (status, v) = get_json(&router, "/api/feed?page=abc&limit=-3").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["pagination"]["page"], 1);
    assert_eq!(v["pagination"]["limit"], 20);
}

#[tokio::test]
async fn create_then_fetch_event() {
    let app = test_app(&[]);
    let router = router_for(&app);

    let payload = json!({
        "title": "Alonso signs with Aston Martin until 2027",
        "source": "Manual",
        "summary": "The two-time champion extends his stay."
    });
    let (status, created) = post_json(&router, "/api/events", payload.clone()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["category"], "Driver Transfer");
    let id = created["id"].as_str().unwrap().to_string();

    let (status, got) = get_json(&router, &format!("/api/events/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(got["title"], payload["title"]);

    let (status, v) = post_json(&router, "/api/events", payload).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(v["error"]["message"].is_string());

    let (status, _) = post_json(&router, "/api/events", json!({ "title": "No source" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post_json(
        &router,
        "/api/events",
        json!({ "title": "Explicit", "source": "Manual", "category": "qualifying" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = get_json(&router, &format!("/api/events/{}", uuid::Uuid::new_v4())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = get_json(&router, "/api/events/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, list) = get_json(&router, "/api/events?source=manual&limit=5").await;
    assert_eq!(list.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn categories_follow_display_order() {
    let app = test_app(&[]);
    let now = Utc::now();
    for (title, cat) in [
        ("Stewards hand out grid drop", Category::Penalty),
        ("Another grid drop", Category::Penalty),
        ("Monaco classification", Category::RaceResult),
        ("Something odd", Category::Uncategorized),
        ("Team principal change", Category::TeamNews),
    ] {
        app.store
            .insert_event(new_event(title, cat, now - Duration::hours(1)))
            .await
            .unwrap();
    }
    let mut hidden = new_event("No picture", Category::Qualifying, now);
    hidden.image_url = None;
    app.store.insert_event(hidden).await.unwrap();

    let (status, v) = get_json(&router_for(&app), "/api/categories").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        v,
        json!([
            { "name": "Race Result", "count": 1 },
            { "name": "Penalty", "count": 2 },
            { "name": "Team News", "count": 1 },
            { "name": "Uncategorized", "count": 1 },
        ])
    );
}

#[tokio::test]
async fn preferences_and_token_registration() {
    let app = test_app(&[]);
    let router = router_for(&app);

    let (status, _) = get_json(&router, "/api/users/u42/preferences").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, v) = post_json(
        &router,
        "/api/users/u42/preferences",
        json!({ "favorite_team": "Ferrari", "alert_sensitivity": "breaking" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["favorite_team"], "Ferrari");
    assert_eq!(v["alert_sensitivity"], "breaking");

    let (status, v) = post_json(
        &router,
        "/api/users/u42/preferences",
        json!({ "alert_sensitivity": "sometimes" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(v["error"]["message"].as_str().unwrap().contains("sometimes"));

    let (status, _) = post_json(&router, "/api/users/u42/preferences", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, v) = post_json(&router, "/api/users/u42/fcm-token", json!({ "token": "fcm-abc" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["userId"], "u42");
    let (status, _) = post_json(&router, "/api/users/u42/fcm-token", json!({ "token": "  " })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let sub = app.store.get_subscriber("u42").await.unwrap();
    assert_eq!(sub.push_token.as_deref(), Some("fcm-abc"));
    assert_eq!(sub.alert_sensitivity, AlertSensitivity::Breaking);
    assert_eq!(sub.favorite_team.as_deref(), Some("Ferrari"));

    let (_, v) = get_json(&router, "/api/users/u42/preferences").await;
    assert_eq!(v["favorite_team"], "Ferrari");
    assert!(v["favorite_driver"].is_null());
}

#[tokio::test]
async fn notification_history_and_open_tracking() {
    let app = test_app(&[("RaceFans", MONACO_RSS)]);
    subscribe(&app.store, "fan", AlertSensitivity::All, Some("tok-fan")).await;
    app.state.orchestrator.run_cycle().await.unwrap();
    let router = router_for(&app);

    let (status, history) = get_json(&router, "/api/users/fan/notifications").await;
    assert_eq!(status, StatusCode::OK);
    let recs = history.as_array().unwrap();
    assert_eq!(recs.len(), 1);
    assert_eq!(recs[0]["status"], "sent");
    assert!(recs[0]["opened_at"].is_null());
    let event_id = recs[0]["event_id"].as_str().unwrap().to_string();

    let (status, v) = post_json(
        &router,
        &format!("/api/events/{event_id}/track-open"),
        json!({ "user_id": "fan" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["tracked"], true);
    assert!(v["notificationId"].is_string());

    let recs = app.store.notifications_for("fan", 10).await.unwrap();
    assert!(recs[0].opened_at.is_some());

    let (status, v) = post_json(&router, &format!("/api/notifications/{}/opened", recs[0].id), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["id"], recs[0].id.to_string());

    let (status, v) = post_json(
        &router,
        &format!("/api/notifications/{}/opened", uuid::Uuid::new_v4()),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(v["error"]["message"], "Notification not found");
}

#[tokio::test]
async fn admin_sources_reports_stats() {
    let app = test_app(&[("RaceFans", MONACO_RSS), ("PlanetF1", PADDOCK_MIXED)]);
    app.state.orchestrator.run_cycle().await.unwrap();

    let (status, v) = get_json(&router_for(&app), "/admin/sources").await;
    assert_eq!(status, StatusCode::OK);
    assert!(v["last_ingestion"].is_string());
    let sources = v["sources"].as_array().unwrap();
    assert_eq!(sources.len(), 2);
    assert_eq!(sources[0]["name"], "RaceFans");
    assert_eq!(sources[0]["stored_events"], 1);
    assert_eq!(sources[0]["stats"]["items_new"], 1);
    assert_eq!(sources[1]["name"], "PlanetF1");
    assert_eq!(sources[1]["stored_events"], 3);
    assert_eq!(sources[1]["stats"]["error_count"], 0);
}

#[derive(Clone, Default)]
struct LogBuffer(std::sync::Arc<parking_lot::Mutex<Vec<u8>>>);

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn requests_are_logged_with_status() {
    let logs = LogBuffer::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let app = test_app(&[]);
    let router = router_for(&app);
    let (status, _) = get_json(&router, "/api/events/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let text = String::from_utf8(logs.0.lock().clone()).unwrap();
    assert!(text.contains("finished processing request"), "{text}");
    assert!(text.contains("uri=/api/events/not-a-uuid"), "{text}");
    assert!(text.contains("status=400"), "{text}");
}
