// src/categorize/mod.rs
//! Rule-based event categorizer with confidence scoring.
//!
//! Every category carries a weighted keyword table (see `config/categories.toml`).
//! A keyword found in the lower-cased title scores `weight * 2`; found only in the
//! body it scores `weight`. The category with the strictly highest total wins (ties go
//! to the category defined first) and its score is normalized against a per-category
//! ceiling into a 0–100 confidence. Below the configured threshold the event is
//! reported as `Uncategorized`, still carrying the sub-threshold confidence.

pub mod rules;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use crate::categorize::rules::{CategoryRules, KeywordCfg, RuleCfg};

/// Closed taxonomy of F1 event categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "&'static str", try_from = "String")]
pub enum Category {
    RaceResult,
    Qualifying,
    PracticeTesting,
    Penalty,
    DriverTransfer,
    ContractNews,
    TechnicalUpdate,
    OfficialStatement,
    TeamNews,
    Uncategorized,
}

impl Category {
    /// Categories that can be matched by keyword rules, in definition order.
    pub const ALL_RULED: [Category; 9] = [
        Category::RaceResult,
        Category::Qualifying,
        Category::PracticeTesting,
        Category::Penalty,
        Category::DriverTransfer,
        Category::ContractNews,
        Category::TechnicalUpdate,
        Category::OfficialStatement,
        Category::TeamNews,
    ];

    /// Categories delivered to "breaking"-only subscribers.
    pub const BREAKING: [Category; 3] = [
        Category::RaceResult,
        Category::Penalty,
        Category::DriverTransfer,
    ];

    pub fn is_breaking(self) -> bool {
        Category::BREAKING.contains(&self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::RaceResult => "Race Result",
            Category::Qualifying => "Qualifying",
            Category::PracticeTesting => "Practice & Testing",
            Category::Penalty => "Penalty",
            Category::DriverTransfer => "Driver Transfer",
            Category::ContractNews => "Contract News",
            Category::TechnicalUpdate => "Technical Update",
            Category::OfficialStatement => "Official Statement",
            Category::TeamNews => "Team News",
            Category::Uncategorized => "Uncategorized",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Category> for &'static str {
    fn from(c: Category) -> Self {
        c.as_str()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown category `{0}`")]
pub struct UnknownCategory(pub String);

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Category::ALL_RULED
            .iter()
            .copied()
            .chain(std::iter::once(Category::Uncategorized))
            .find(|c| c.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

impl TryFrom<String> for Category {
    type Error = UnknownCategory;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Per-category raw score, reported for every ruled category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CategoryScore {
    pub category: Category,
    pub score: u32,
}

/// Outcome of classifying one article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub category: Category,
    /// 0..=100
    pub confidence: u8,
    pub scores: Vec<CategoryScore>,
}

#[derive(Debug, Clone)]
struct Keyword {
    term: String,
    weight: u32,
}

#[derive(Debug, Clone)]
struct CompiledRule {
    category: Category,
    keywords: Vec<Keyword>,
    /// Score of a perfect match on the two strongest keywords (both in the title).
    ceiling: u32,
}

impl CompiledRule {
    fn score(&self, title_lc: &str, content_lc: &str) -> u32 {
        self.keywords
            .iter()
            .map(|k| {
                if title_lc.contains(k.term.as_str()) {
                    k.weight.saturating_mul(2)
                } else if content_lc.contains(k.term.as_str()) {
                    k.weight
                } else {
                    0
                }
            })
            .fold(0u32, u32::saturating_add)
    }
}

/// Immutable classifier: keyword tables plus the ceiling lookup computed once at construction.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<CompiledRule>,
    threshold: u8,
}

impl Classifier {
    /// Build from validated rules.
    pub fn from_rules(rules: &CategoryRules) -> anyhow::Result<Self> {
        rules.validate()?;

        let mut compiled = Vec::with_capacity(rules.categories.len());
        for rule in &rules.categories {
            let category: Category = rule.name.parse()?;
            let keywords: Vec<Keyword> = rule
                .keywords
                .iter()
                .map(|k| Keyword {
                    term: k.term.trim().to_lowercase(),
                    weight: k.weight,
                })
                .collect();

            let mut weights: Vec<u32> = keywords.iter().map(|k| k.weight).collect();
            weights.sort_unstable_by(|a, b| b.cmp(a));
            let ceiling = weights
                .iter()
                .take(2)
                .map(|w| w.saturating_mul(2))
                .fold(0u32, u32::saturating_add)
                .max(1);

            compiled.push(CompiledRule {
                category,
                keywords,
                ceiling,
            });
        }

        Ok(Self {
            rules: compiled,
            threshold: rules.threshold,
        })
    }

    /// Classifier over the table embedded in the binary.
    pub fn embedded() -> anyhow::Result<Self> {
        Self::from_rules(&CategoryRules::embedded()?)
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    /// Ceiling used to normalize confidence for `category` (None for Uncategorized).
    pub fn ceiling_for(&self, category: Category) -> Option<u32> {
        self.rules
            .iter()
            .find(|r| r.category == category)
            .map(|r| r.ceiling)
    }

    /// Score an article against every category.
    pub fn classify(&self, title: &str, content: &str) -> Classification {
        let title_lc = title.to_lowercase();
        let content_lc = content.to_lowercase();

        let mut scores = Vec::with_capacity(self.rules.len());
        let mut best: Option<(&CompiledRule, u32)> = None;

        for rule in &self.rules {
            let score = rule.score(&title_lc, &content_lc);
            scores.push(CategoryScore {
                category: rule.category,
                score,
            });
            // strictly greater: the first-defined category keeps an exact tie
            if score > best.map_or(0, |(_, s)| s) {
                best = Some((rule, score));
            }
        }

        let (category, confidence) = match best {
            Some((rule, score)) => (rule.category, normalize(score, rule.ceiling)),
            None => (Category::Uncategorized, 0),
        };

        if confidence < self.threshold {
            return Classification {
                category: Category::Uncategorized,
                confidence,
                scores,
            };
        }

        Classification {
            category,
            confidence,
            scores,
        }
    }

    /// Convenience wrapper returning just the category.
    pub fn categorize(&self, title: &str, content: &str) -> Category {
        self.classify(title, content).category
    }
}

fn normalize(score: u32, ceiling: u32) -> u8 {
    let pct = (f64::from(score) / f64::from(ceiling.max(1)) * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}
