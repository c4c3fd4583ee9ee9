// src/notify/rate_limit.rs
use chrono::{DateTime, Datelike, Duration as ChronoDuration, Utc, Weekday};

pub const DEFAULT_MAX_PER_HOUR: usize = 10;

/// Per-subscriber hourly cap on delivered notifications.
/// - Counts only `sent` records inside `[now - window, now]`.
/// - Limited once the count reaches `max_per_hour`.
/// - On an unrestricted weekday (UTC) the cap does not apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_per_hour: usize,
    pub window: ChronoDuration,
    pub unrestricted_days: Vec<Weekday>,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_per_hour: DEFAULT_MAX_PER_HOUR,
            window: ChronoDuration::hours(1),
            unrestricted_days: vec![Weekday::Fri, Weekday::Sat, Weekday::Sun],
        }
    }
}

impl RateLimitPolicy {
    pub fn new(max_per_hour: usize, unrestricted_days: Vec<Weekday>) -> Self {
        Self {
            max_per_hour,
            unrestricted_days,
            ..Default::default()
        }
    }

    /// Race weekends: no cap at all.
    pub fn is_unrestricted(&self, now: DateTime<Utc>) -> bool {
        self.unrestricted_days.contains(&now.weekday())
    }

    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.window
    }

    pub fn is_limited(&self, sent_in_window: usize) -> bool {
        sent_in_window >= self.max_per_hour
    }
}

/// Parse `fri,sat,sun` (short or long names, any case). Empty input yields no days.
pub fn parse_weekdays(s: &str) -> Result<Vec<Weekday>, String> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| {
            p.parse::<Weekday>()
                .map_err(|_| format!("invalid weekday `{p}`"))
        })
        .collect()
}
