// src/ranking.rs
//! Feed ordering: static relevance score, then category diversification.
//!
//! score = category weight + recency tier + notable-entity boost.
//! Sorted by score desc, then timestamp desc. Without a category filter the whole sorted
//! candidate list is diversified so no more than `max_consecutive` neighbours share a
//! category, and pages are cut from that one sequence. Every page is a slice of the same
//! order, so pages never overlap and together cover every candidate.

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::Serialize;
use std::collections::VecDeque;

use crate::categorize::Category;
use crate::store::{Event, EventFilter};

pub const DEFAULT_PAGE_LIMIT: usize = 20;
pub const MAX_PAGE_LIMIT: usize = 100;
pub const DEFAULT_MAX_CONSECUTIVE: usize = 2;
pub const NOTABLE_ENTITY_BOOST: u32 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankingConfig {
    pub max_consecutive: usize,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            max_consecutive: DEFAULT_MAX_CONSECUTIVE,
        }
    }
}

pub fn category_weight(c: Category) -> u32 {
    match c {
        Category::RaceResult => 50,
        Category::Penalty => 45,
        Category::DriverTransfer => 40,
        Category::ContractNews => 35,
        Category::Qualifying => 30,
        Category::TechnicalUpdate => 25,
        Category::OfficialStatement | Category::TeamNews => 20,
        Category::PracticeTesting => 15,
        Category::Uncategorized => 10,
    }
}

pub fn recency_weight(ts: DateTime<Utc>, now: DateTime<Utc>) -> u32 {
    if ts > now - Duration::hours(6) {
        40
    } else if ts > now - Duration::hours(24) {
        25
    } else if ts > now - Duration::days(3) {
        10
    } else {
        0
    }
}

pub fn entity_boost(title: &str) -> u32 {
    static RE_NOTABLE: OnceCell<Regex> = OnceCell::new();
    let re = RE_NOTABLE.get_or_init(|| {
        Regex::new(r"(?i)verstappen|hamilton|leclerc|norris|red bull|ferrari|mercedes|mclaren")
            .expect("static regex")
    });
    if re.is_match(title) {
        NOTABLE_ENTITY_BOOST
    } else {
        0
    }
}

pub fn relevance_score(event: &Event, now: DateTime<Utc>) -> u32 {
    category_weight(event.category) + recency_weight(event.timestamp, now) + entity_boost(&event.title)
}

/// Score desc, timestamp desc.
pub fn sort_by_relevance(events: &mut [Event], now: DateTime<Utc>) {
    events.sort_by_cached_key(|e| {
        (
            std::cmp::Reverse(relevance_score(e, now)),
            std::cmp::Reverse(e.timestamp),
        )
    });
}

/// Reorder so that at most `max_consecutive` adjacent items share a key. When a streak is
/// full, the nearest later item with a different key is pulled forward; everything else keeps
/// its relative order. With nothing left to pull, the remainder is appended as is.
pub fn diversify_by<T, K, F>(items: Vec<T>, max_consecutive: usize, key: F) -> Vec<T>
where
    K: PartialEq,
    F: Fn(&T) -> K,
{
    if max_consecutive == 0 {
        return items;
    }
    let mut pending: VecDeque<T> = items.into();
    let mut out: Vec<T> = Vec::with_capacity(pending.len());
    let mut streak = 0usize;

    while let Some(front) = pending.front() {
        let last_key = out.last().map(&key);
        let continues = last_key.as_ref().is_some_and(|k| *k == key(front));

        if continues && streak >= max_consecutive {
            let Some(k) = last_key else { break };
            match pending.iter().position(|it| key(it) != k) {
                Some(pos) => {
                    if let Some(it) = pending.remove(pos) {
                        out.push(it);
                        streak = 1;
                    }
                }
                None => {
                    out.extend(pending.drain(..));
                    break;
                }
            }
            continue;
        }

        if let Some(it) = pending.pop_front() {
            streak = if continues { streak + 1 } else { 1 };
            out.push(it);
        }
    }
    out
}

pub fn diversify(items: Vec<Event>, max_consecutive: usize) -> Vec<Event> {
    diversify_by(items, max_consecutive, |e| e.category)
}

/// Paging and filter parameters of a feed read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedQuery {
    pub page: usize,
    pub limit: usize,
    pub category: Option<Category>,
    pub date_from: Option<DateTime<Utc>>,
}

impl Default for FeedQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
            category: None,
            date_from: None,
        }
    }
}

impl FeedQuery {
    /// Page defaults to 1; limit defaults to 20 and is clamped to 1..=100.
    pub fn new(page: Option<usize>, limit: Option<usize>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT),
            ..Default::default()
        }
    }

    pub fn offset(&self) -> usize {
        (self.page - 1) * self.limit
    }

    /// Candidate filter: displayable events (image + link), plus category/date.
    pub fn filter(&self) -> EventFilter {
        EventFilter {
            category: self.category,
            date_from: self.date_from,
            displayable_only: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    pub total_pages: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedPage {
    pub data: Vec<Event>,
    pub pagination: Pagination,
}

/// Rank the filtered candidates and cut one page. `total` counts every candidate.
/// Pages are slices of one diversified order: disjoint, and together complete.
pub fn rank_page(
    mut candidates: Vec<Event>,
    query: &FeedQuery,
    now: DateTime<Utc>,
    cfg: &RankingConfig,
) -> FeedPage {
    let total = candidates.len();
    sort_by_relevance(&mut candidates, now);

    let ordered = if query.category.is_none() {
        diversify(candidates, cfg.max_consecutive)
    } else {
        candidates
    };
    let data: Vec<Event> = ordered
        .into_iter()
        .skip(query.offset())
        .take(query.limit)
        .collect();

    FeedPage {
        data,
        pagination: Pagination {
            page: query.page,
            limit: query.limit,
            total,
            total_pages: total.div_ceil(query.limit),
        },
    }
}
