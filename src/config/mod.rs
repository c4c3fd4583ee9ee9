// src/config/mod.rs
//! Process configuration from environment variables (`.env` is loaded by the binary).
//! Invalid values fall back to defaults with a warning; the data tables (feeds,
//! categorizer keywords) have their own loaders.

use anyhow::Context;
use chrono::Weekday;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::ingest::fetch::DEFAULT_FETCH_TIMEOUT;
use crate::ingest::scheduler::{IngestSchedulerCfg, DEFAULT_INTERVAL_SECS};
use crate::notify::push::DEFAULT_FCM_BASE_URL;
use crate::notify::rate_limit::{parse_weekdays, DEFAULT_MAX_PER_HOUR};
use crate::notify::{
    AccessTokenSource, DisabledPush, FcmPushClient, PushClient, RateLimitPolicy,
    ServiceAccountTokens, StaticToken,
};
use crate::ranking::{RankingConfig, DEFAULT_MAX_CONSECUTIVE};

pub const ENV_INGEST_INTERVAL_SECS: &str = "INGEST_INTERVAL_SECS";
pub const ENV_FEED_FETCH_TIMEOUT_SECS: &str = "FEED_FETCH_TIMEOUT_SECS";
pub const ENV_NOTIFY_RATE_LIMIT_PER_HOUR: &str = "NOTIFY_RATE_LIMIT_PER_HOUR";
pub const ENV_NOTIFY_UNRESTRICTED_DAYS: &str = "NOTIFY_UNRESTRICTED_DAYS";
pub const ENV_FEED_MAX_CONSECUTIVE: &str = "FEED_MAX_CONSECUTIVE";
pub const ENV_FCM_PROJECT_ID: &str = "FCM_PROJECT_ID";
pub const ENV_FCM_SERVICE_ACCOUNT_PATH: &str = "FCM_SERVICE_ACCOUNT_PATH";
pub const ENV_GOOGLE_APPLICATION_CREDENTIALS: &str = "GOOGLE_APPLICATION_CREDENTIALS";
pub const ENV_FCM_ACCESS_TOKEN: &str = "FCM_ACCESS_TOKEN";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_FCM_BASE_URL: &str = "FCM_BASE_URL";
pub const ENV_LOG_FORMAT: &str = "LOG_FORMAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FcmCredentials {
    /// Service-account key file; access tokens are minted and refreshed from it.
    ServiceAccount(PathBuf),
    /// Pre-minted bearer token. Expires after about an hour.
    StaticToken(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FcmConfig {
    /// Falls back to the `project_id` field of the service-account key.
    pub project_id: Option<String>,
    pub credentials: FcmCredentials,
    pub base_url: String,
}

#[derive(serde::Deserialize)]
struct ServiceAccountProject {
    project_id: Option<String>,
}

fn service_account_project(path: &Path) -> anyhow::Result<Option<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read service account key {}", path.display()))?;
    let key: ServiceAccountProject = serde_json::from_str(&raw)
        .with_context(|| format!("parse service account key {}", path.display()))?;
    Ok(key.project_id)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub ingest_interval_secs: u64,
    pub fetch_timeout: Duration,
    pub rate_limit_per_hour: usize,
    pub unrestricted_days: Vec<Weekday>,
    pub max_consecutive: usize,
    /// None when credentials are absent: push delivery is disabled.
    pub fcm: Option<FcmConfig>,
    /// Postgres connection string; None keeps everything in memory.
    pub database_url: Option<String>,
    pub log_format: LogFormat,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ingest_interval_secs: DEFAULT_INTERVAL_SECS,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            rate_limit_per_hour: DEFAULT_MAX_PER_HOUR,
            unrestricted_days: RateLimitPolicy::default().unrestricted_days,
            max_consecutive: DEFAULT_MAX_CONSECUTIVE,
            fcm: None,
            database_url: None,
            log_format: LogFormat::Compact,
        }
    }
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> T
where
    T: FromStr,
    T::Err: Display,
{
    match raw.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        None => default,
        Some(s) => s.parse().unwrap_or_else(|e| {
            tracing::warn!(key, value = s, error = %e, "invalid config value; using default");
            default
        }),
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from any key lookup (env in production, a map in tests).
    pub fn from_lookup<F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();

        let ingest_interval_secs = match parse_or(
            ENV_INGEST_INTERVAL_SECS,
            get(ENV_INGEST_INTERVAL_SECS),
            d.ingest_interval_secs,
        ) {
            0 => {
                tracing::warn!(key = ENV_INGEST_INTERVAL_SECS, "interval must be > 0; using default");
                d.ingest_interval_secs
            }
            n => n,
        };

        let timeout_secs = parse_or(
            ENV_FEED_FETCH_TIMEOUT_SECS,
            get(ENV_FEED_FETCH_TIMEOUT_SECS),
            d.fetch_timeout.as_secs(),
        );
        let fetch_timeout = if timeout_secs == 0 {
            d.fetch_timeout
        } else {
            Duration::from_secs(timeout_secs)
        };

        let unrestricted_days = match get(ENV_NOTIFY_UNRESTRICTED_DAYS) {
            None => d.unrestricted_days.clone(),
            Some(raw) => parse_weekdays(&raw).unwrap_or_else(|e| {
                tracing::warn!(key = ENV_NOTIFY_UNRESTRICTED_DAYS, error = %e, "invalid weekday list; using default");
                d.unrestricted_days.clone()
            }),
        };

        let non_blank = |k: &str| get(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let project_id = non_blank(ENV_FCM_PROJECT_ID);
        let key_path = non_blank(ENV_FCM_SERVICE_ACCOUNT_PATH)
            .or_else(|| non_blank(ENV_GOOGLE_APPLICATION_CREDENTIALS));
        let credentials = match (key_path, non_blank(ENV_FCM_ACCESS_TOKEN)) {
            (Some(path), _) => Some(FcmCredentials::ServiceAccount(PathBuf::from(path))),
            // a bare token names no project
            (None, Some(token)) if project_id.is_some() => Some(FcmCredentials::StaticToken(token)),
            _ => None,
        };
        let fcm = credentials.map(|credentials| FcmConfig {
            project_id,
            credentials,
            base_url: non_blank(ENV_FCM_BASE_URL).unwrap_or_else(|| DEFAULT_FCM_BASE_URL.to_string()),
        });

        let log_format = match get(ENV_LOG_FORMAT).as_deref().map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        };

        Self {
            ingest_interval_secs,
            fetch_timeout,
            rate_limit_per_hour: parse_or(
                ENV_NOTIFY_RATE_LIMIT_PER_HOUR,
                get(ENV_NOTIFY_RATE_LIMIT_PER_HOUR),
                d.rate_limit_per_hour,
            ),
            unrestricted_days,
            max_consecutive: parse_or(
                ENV_FEED_MAX_CONSECUTIVE,
                get(ENV_FEED_MAX_CONSECUTIVE),
                d.max_consecutive,
            ),
            fcm,
            database_url: non_blank(ENV_DATABASE_URL),
            log_format,
        }
    }

    pub fn rate_limit_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy::new(self.rate_limit_per_hour, self.unrestricted_days.clone())
    }

    pub fn ranking(&self) -> RankingConfig {
        RankingConfig {
            max_consecutive: self.max_consecutive,
            ..Default::default()
        }
    }

    pub fn scheduler(&self) -> IngestSchedulerCfg {
        IngestSchedulerCfg {
            interval_secs: self.ingest_interval_secs,
        }
    }

    /// Fails when configured credentials cannot be loaded.
    pub fn push_client(&self) -> anyhow::Result<Arc<dyn PushClient>> {
        let Some(f) = &self.fcm else {
            tracing::warn!("FCM credentials not set; push notifications disabled");
            return Ok(Arc::new(DisabledPush));
        };

        let (tokens, key_project): (Arc<dyn AccessTokenSource>, _) = match &f.credentials {
            FcmCredentials::ServiceAccount(path) => {
                let project = service_account_project(path)?;
                let tokens = ServiceAccountTokens::from_file(path)
                    .with_context(|| format!("load service account key {}", path.display()))?;
                (Arc::new(tokens) as Arc<dyn AccessTokenSource>, project)
            }
            FcmCredentials::StaticToken(token) => {
                tracing::warn!("using static FCM_ACCESS_TOKEN; it will not be refreshed");
                (Arc::new(StaticToken(token.clone())) as Arc<dyn AccessTokenSource>, None)
            }
        };
        let project_id = f
            .project_id
            .clone()
            .or(key_project)
            .context("FCM project id missing: set FCM_PROJECT_ID or use a key with project_id")?;

        Ok(Arc::new(
            FcmPushClient::new(project_id, tokens).with_base_url(f.base_url.clone()),
        ))
    }
}
