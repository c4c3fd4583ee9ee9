// src/categorize/rules.rs
use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use super::Category;

pub const ENV_CATEGORIZER_CONFIG_PATH: &str = "CATEGORIZER_CONFIG_PATH";
pub const DEFAULT_CATEGORIZER_CONFIG_PATH: &str = "config/categories.toml";

/// Upper bound for a single keyword weight.
pub const MAX_KEYWORD_WEIGHT: u32 = 1_000;

const EMBEDDED_RULES: &str = include_str!("../../config/categories.toml");

fn default_threshold() -> u8 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeywordCfg {
    pub term: String,
    pub weight: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuleCfg {
    pub name: String,
    #[serde(default)]
    pub keywords: Vec<KeywordCfg>,
}

/// Keyword tables for every ruled category plus the confidence threshold.
#[derive(Debug, Clone, Deserialize)]
pub struct CategoryRules {
    #[serde(default = "default_threshold")]
    pub threshold: u8,
    #[serde(default)]
    pub categories: Vec<RuleCfg>,
}

impl CategoryRules {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let rules: CategoryRules = toml::from_str(s).context("parsing categorizer TOML")?;
        rules.validate()?;
        Ok(rules)
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let rules: CategoryRules = serde_json::from_str(s).context("parsing categorizer JSON")?;
        rules.validate()?;
        Ok(rules)
    }

    /// The table compiled into the binary.
    pub fn embedded() -> Result<Self> {
        Self::from_toml_str(EMBEDDED_RULES)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading categorizer rules from {}", path.display()))?;
        let is_json = path
            .extension()
            .and_then(|s| s.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_toml_str(&content)
        }
    }

    /// Env var + fallbacks:
    /// 1) $CATEGORIZER_CONFIG_PATH
    /// 2) config/categories.toml
    /// 3) embedded table
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CATEGORIZER_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!(
                    "{ENV_CATEGORIZER_CONFIG_PATH} points to non-existent path"
                ));
            }
            return Self::load_from(&pb);
        }
        let p = PathBuf::from(DEFAULT_CATEGORIZER_CONFIG_PATH);
        if p.exists() {
            return Self::load_from(&p);
        }
        Self::embedded()
    }

    pub fn validate(&self) -> Result<()> {
        if self.threshold > 100 {
            bail!("threshold must be within 0..=100, got {}", self.threshold);
        }
        let mut seen = HashSet::new();
        for rule in &self.categories {
            let cat: Category = rule.name.parse()?;
            if cat == Category::Uncategorized {
                bail!("`Uncategorized` cannot carry a keyword table");
            }
            if !seen.insert(cat) {
                bail!("duplicate category `{}`", rule.name);
            }
            for kw in &rule.keywords {
                if kw.term.trim().is_empty() {
                    bail!("empty keyword in `{}`", rule.name);
                }
                if kw.weight == 0 {
                    bail!("keyword `{}` in `{}` has zero weight", kw.term, rule.name);
                }
                if kw.weight > MAX_KEYWORD_WEIGHT {
                    bail!(
                        "keyword `{}` in `{}` has weight {} (max {MAX_KEYWORD_WEIGHT})",
                        kw.term,
                        rule.name,
                        kw.weight
                    );
                }
            }
        }
        Ok(())
    }
}
