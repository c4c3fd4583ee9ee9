// src/api.rs
//! HTTP boundary: feed, events, categories, subscriber preferences and notification tracking.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shuttle_axum::axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use uuid::Uuid;

use crate::categorize::{Category, Classifier};
use crate::ingest::fetch::truncate_chars;
use crate::ingest::stats::FeedStats;
use crate::ingest::{IngestOrchestrator, SUMMARY_MAX_CHARS};
use crate::ranking::{rank_page, FeedPage, FeedQuery, RankingConfig, MAX_PAGE_LIMIT};
use crate::store::{
    AlertSensitivity, Event, EventFilter, NewEvent, NotificationRecord, Store, StoreError,
    Subscriber,
};

const DEFAULT_EVENTS_LIMIT: usize = 50;
const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Category tabs in display order; anything else with events is appended after these.
pub const CATEGORY_DISPLAY_ORDER: [Category; 9] = [
    Category::RaceResult,
    Category::Penalty,
    Category::DriverTransfer,
    Category::ContractNews,
    Category::TechnicalUpdate,
    Category::TeamNews,
    Category::PracticeTesting,
    Category::Qualifying,
    Category::OfficialStatement,
];

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub classifier: Arc<Classifier>,
    pub orchestrator: Arc<IngestOrchestrator>,
    pub ranking: RankingConfig,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/health", get(api_health))
        .route("/api/feed", get(feed))
        .route("/api/events", get(list_events).post(create_event))
        .route("/api/events/{id}", get(get_event))
        .route("/api/events/{id}/track-open", post(track_open))
        .route("/api/categories", get(categories))
        .route(
            "/api/users/{id}/preferences",
            get(get_preferences).post(set_preferences),
        )
        .route("/api/users/{id}/fcm-token", post(register_token))
        .route("/api/users/{id}/notifications", get(notification_history))
        .route("/api/notifications/{id}/opened", post(notification_opened))
        .route("/admin/sources", get(admin_sources))
        .layer(CorsLayer::very_permissive())
        // one `request` span per call, one INFO line with status and latency on completion
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Duplicate => ApiError::Conflict("event already exists".into()),
            StoreError::NotFound => ApiError::NotFound("not found".into()),
            StoreError::Unavailable(m) => ApiError::Internal(m),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(target: "api", error = %self, "request failed");
        }
        (status, Json(json!({ "error": { "message": self.to_string() } }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn not_found(what: &str) -> impl FnOnce(ApiError) -> ApiError + '_ {
    move |e| match e {
        ApiError::NotFound(_) => ApiError::NotFound(format!("{what} not found")),
        other => other,
    }
}

fn parse_uuid(raw: &str, what: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|_| ApiError::BadRequest(format!("invalid {what} id")))
}

fn parse_category(raw: Option<&str>) -> ApiResult<Option<Category>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => s
            .parse()
            .map(Some)
            .map_err(|e: crate::categorize::UnknownCategory| ApiError::BadRequest(e.to_string())),
    }
}

/// RFC 3339 timestamp or a plain `YYYY-MM-DD` date (midnight UTC).
fn parse_date_from(raw: Option<&str>) -> ApiResult<Option<DateTime<Utc>>> {
    let Some(s) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(Some(dt.with_timezone(&Utc)));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Some(naive.and_utc()))
        .ok_or_else(|| ApiError::BadRequest(format!("invalid date_from `{s}`")))
}

/// Lenient numeric query value: junk reads as absent.
fn lenient_usize(raw: Option<&str>) -> Option<usize> {
    raw.and_then(|s| s.trim().parse().ok())
}

fn required(field: Option<String>) -> Option<String> {
    field.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

async fn api_health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "last_ingestion": state.orchestrator.last_cycle_completed(),
    }))
}

#[derive(Debug, Default, Deserialize)]
struct FeedParams {
    page: Option<String>,
    limit: Option<String>,
    category: Option<String>,
    date_from: Option<String>,
}

async fn feed(
    State(state): State<AppState>,
    Query(p): Query<FeedParams>,
) -> ApiResult<Json<FeedPage>> {
    let mut q = FeedQuery::new(
        lenient_usize(p.page.as_deref()),
        lenient_usize(p.limit.as_deref()),
    );
    q.category = parse_category(p.category.as_deref())?;
    q.date_from = parse_date_from(p.date_from.as_deref())?;

    let candidates = state.store.list_events(&q.filter()).await?;
    Ok(Json(rank_page(candidates, &q, Utc::now(), &state.ranking)))
}

#[derive(Debug, Default, Deserialize)]
struct EventsParams {
    category: Option<String>,
    source: Option<String>,
    limit: Option<String>,
    offset: Option<String>,
}

async fn list_events(
    State(state): State<AppState>,
    Query(p): Query<EventsParams>,
) -> ApiResult<Json<Vec<Event>>> {
    let filter = EventFilter {
        category: parse_category(p.category.as_deref())?,
        source: required(p.source),
        offset: lenient_usize(p.offset.as_deref()).unwrap_or(0),
        limit: Some(
            lenient_usize(p.limit.as_deref())
                .unwrap_or(DEFAULT_EVENTS_LIMIT)
                .clamp(1, MAX_PAGE_LIMIT),
        ),
        ..Default::default()
    };
    Ok(Json(state.store.list_events(&filter).await?))
}

async fn get_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Event>> {
    let id = parse_uuid(&id, "event")?;
    let ev = state
        .store
        .get_event(id)
        .await
        .map_err(ApiError::from)
        .map_err(not_found("Event"))?;
    Ok(Json(ev))
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateEventReq {
    pub title: Option<String>,
    pub source: Option<String>,
    pub category: Option<String>,
    pub summary: Option<String>,
    pub raw_content: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub link: Option<String>,
    pub image_url: Option<String>,
}

/// Manual submission. Category is taken as given or classified from the text; no
/// notifications are sent for manually created events.
async fn create_event(
    State(state): State<AppState>,
    Json(req): Json<CreateEventReq>,
) -> ApiResult<(StatusCode, Json<Event>)> {
    let (Some(title), Some(source)) = (required(req.title), required(req.source)) else {
        return Err(ApiError::BadRequest("title and source are required".into()));
    };

    let raw_content = required(req.raw_content);
    let summary = required(req.summary);
    let text = raw_content
        .clone()
        .or_else(|| summary.clone())
        .unwrap_or_default();
    let category = match parse_category(req.category.as_deref())? {
        Some(c) => c,
        None => state.classifier.categorize(&title, &text),
    };

    let new = NewEvent {
        summary: summary.unwrap_or_else(|| truncate_chars(&text, SUMMARY_MAX_CHARS)),
        title,
        category,
        timestamp: req.timestamp.unwrap_or_else(Utc::now),
        source,
        link: required(req.link),
        raw_content,
        image_url: required(req.image_url),
    };
    let ev = state.store.insert_event(new).await?;
    tracing::info!(target: "api", id = %ev.id, category = %ev.category, "event created");
    Ok((StatusCode::CREATED, Json(ev)))
}

#[derive(Debug, Deserialize)]
struct TrackOpenReq {
    user_id: Option<String>,
}

async fn track_open(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<TrackOpenReq>,
) -> ApiResult<Json<serde_json::Value>> {
    let event_id = parse_uuid(&id, "event")?;
    let user_id = required(req.user_id)
        .ok_or_else(|| ApiError::BadRequest("user_id is required".into()))?;
    let marked = state
        .store
        .mark_latest_opened(&user_id, event_id, Utc::now())
        .await?;
    Ok(Json(json!({
        "tracked": true,
        "eventId": event_id,
        "notificationId": marked.map(|r| r.id),
    })))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCount {
    pub name: Category,
    pub count: usize,
}

async fn categories(State(state): State<AppState>) -> ApiResult<Json<Vec<CategoryCount>>> {
    let filter = EventFilter {
        displayable_only: true,
        ..Default::default()
    };
    let mut counts: HashMap<Category, usize> = HashMap::new();
    for ev in state.store.list_events(&filter).await? {
        *counts.entry(ev.category).or_default() += 1;
    }

    let mut out: Vec<CategoryCount> = CATEGORY_DISPLAY_ORDER
        .iter()
        .filter_map(|c| counts.remove(c).map(|count| CategoryCount { name: *c, count }))
        .collect();
    let mut extra: Vec<CategoryCount> = counts
        .into_iter()
        .map(|(name, count)| CategoryCount { name, count })
        .collect();
    extra.sort_by(|a, b| b.count.cmp(&a.count).then(a.name.as_str().cmp(b.name.as_str())));
    out.extend(extra);
    Ok(Json(out))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Preferences {
    pub favorite_team: Option<String>,
    pub favorite_driver: Option<String>,
    pub alert_sensitivity: AlertSensitivity,
}

impl From<&Subscriber> for Preferences {
    fn from(s: &Subscriber) -> Self {
        Self {
            favorite_team: s.favorite_team.clone(),
            favorite_driver: s.favorite_driver.clone(),
            alert_sensitivity: s.alert_sensitivity,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PreferencesReq {
    pub favorite_team: Option<String>,
    pub favorite_driver: Option<String>,
    pub alert_sensitivity: Option<String>,
}

async fn load_or_new(store: &dyn Store, id: &str) -> ApiResult<Subscriber> {
    match store.get_subscriber(id).await {
        Ok(s) => Ok(s),
        Err(StoreError::NotFound) => Ok(Subscriber::new(id)),
        Err(e) => Err(e.into()),
    }
}

async fn get_preferences(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Preferences>> {
    let sub = state
        .store
        .get_subscriber(&id)
        .await
        .map_err(ApiError::from)
        .map_err(not_found("User"))?;
    Ok(Json(Preferences::from(&sub)))
}

async fn set_preferences(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<PreferencesReq>,
) -> ApiResult<Json<Preferences>> {
    if req.favorite_team.is_none() && req.favorite_driver.is_none() && req.alert_sensitivity.is_none()
    {
        return Err(ApiError::BadRequest(
            "provide at least one of: favorite_team, favorite_driver, alert_sensitivity".into(),
        ));
    }
    let sensitivity = req
        .alert_sensitivity
        .as_deref()
        .map(str::parse::<AlertSensitivity>)
        .transpose()
        .map_err(ApiError::BadRequest)?;

    let mut sub = load_or_new(state.store.as_ref(), &id).await?;
    if let Some(team) = req.favorite_team {
        sub.favorite_team = Some(team).filter(|t| !t.trim().is_empty());
    }
    if let Some(driver) = req.favorite_driver {
        sub.favorite_driver = Some(driver).filter(|d| !d.trim().is_empty());
    }
    if let Some(s) = sensitivity {
        sub.alert_sensitivity = s;
    }
    let saved = state.store.upsert_subscriber(sub).await?;
    Ok(Json(Preferences::from(&saved)))
}

#[derive(Debug, Deserialize)]
struct TokenReq {
    token: Option<String>,
}

async fn register_token(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<TokenReq>,
) -> ApiResult<Json<serde_json::Value>> {
    let token = required(req.token)
        .ok_or_else(|| ApiError::BadRequest("token is required and must be a string".into()))?;
    let sub = load_or_new(state.store.as_ref(), &id).await?.with_token(token);
    let saved = state.store.upsert_subscriber(sub).await?;
    tracing::info!(target: "api", subscriber_id = %saved.id, "push token registered");
    Ok(Json(json!({ "message": "FCM token registered", "userId": saved.id })))
}

#[derive(Debug, Default, Deserialize)]
struct HistoryParams {
    limit: Option<String>,
}

async fn notification_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(p): Query<HistoryParams>,
) -> ApiResult<Json<Vec<NotificationRecord>>> {
    let limit = lenient_usize(p.limit.as_deref())
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_PAGE_LIMIT);
    Ok(Json(state.store.notifications_for(&id, limit).await?))
}

async fn notification_opened(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<NotificationRecord>> {
    let id = parse_uuid(&id, "notification")?;
    let rec = state
        .store
        .mark_opened(id, Utc::now())
        .await
        .map_err(ApiError::from)
        .map_err(not_found("Notification"))?;
    Ok(Json(rec))
}

#[derive(Debug, Serialize)]
struct SourceRow {
    name: String,
    url: String,
    enabled: bool,
    stats: FeedStats,
    stored_events: usize,
}

async fn admin_sources(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let mut per_source: HashMap<String, usize> = HashMap::new();
    for ev in state.store.list_events(&EventFilter::default()).await? {
        *per_source.entry(ev.source).or_default() += 1;
    }
    let rows: Vec<SourceRow> = state
        .orchestrator
        .stats_snapshot()
        .into_iter()
        .map(|s| SourceRow {
            stored_events: per_source.get(&s.source.name).copied().unwrap_or(0),
            name: s.source.name,
            url: s.source.url,
            enabled: s.source.enabled,
            stats: s.stats,
        })
        .collect();
    Ok(Json(json!({
        "last_ingestion": state.orchestrator.last_cycle_completed(),
        "sources": rows,
    })))
}
