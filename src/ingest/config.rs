// src/ingest/config.rs
use anyhow::{anyhow, Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::ingest::types::FeedSource;

pub const ENV_FEEDS_PATH: &str = "FEEDS_CONFIG_PATH";

/// Built-in source list used when no config file is present.
pub fn default_feeds() -> Vec<FeedSource> {
    [
        (
            "Formula 1",
            "https://www.formula1.com/content/fom-website/en/latest/all.xml",
        ),
        ("FIA", "https://www.fia.com/rss/news"),
        ("Autosport", "https://www.autosport.com/rss/feed/f1"),
        ("Motorsport.com", "https://www.motorsport.com/rss/f1/news/"),
        ("RaceFans", "https://www.racefans.net/feed/"),
        ("PlanetF1", "https://www.planetf1.com/feed/"),
        ("The Race", "https://the-race.com/feed/"),
        ("GPFans", "https://www.gpfans.com/en/rss.xml"),
    ]
    .into_iter()
    .map(|(name, url)| FeedSource::new(name, url))
    .collect()
}

/// Load feeds from an explicit path. Supports TOML or JSON formats.
pub fn load_feeds_from(path: &Path) -> Result<Vec<FeedSource>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading feeds from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_feeds(&content, ext.as_str())
}

/// Load feeds using env var + fallbacks:
/// 1) $FEEDS_CONFIG_PATH
/// 2) config/feeds.toml
/// 3) config/feeds.json
/// 4) built-in list
pub fn load_feeds_default() -> Result<Vec<FeedSource>> {
    if let Ok(p) = std::env::var(ENV_FEEDS_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_feeds_from(&pb);
        } else {
            return Err(anyhow!("FEEDS_CONFIG_PATH points to non-existent path"));
        }
    }
    let toml_p = PathBuf::from("config/feeds.toml");
    if toml_p.exists() {
        return load_feeds_from(&toml_p);
    }
    let json_p = PathBuf::from("config/feeds.json");
    if json_p.exists() {
        return load_feeds_from(&json_p);
    }
    Ok(default_feeds())
}

fn parse_feeds(s: &str, hint_ext: &str) -> Result<Vec<FeedSource>> {
    let try_toml = hint_ext == "toml" || s.contains("[[feeds]]");
    if try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    if let Ok(v) = parse_json(s) {
        return Ok(v);
    }
    if !try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    Err(anyhow!("unsupported feeds format"))
}

fn parse_toml(s: &str) -> Result<Vec<FeedSource>> {
    #[derive(serde::Deserialize)]
    struct TomlFeeds {
        feeds: Vec<FeedSource>,
    }
    let v: TomlFeeds = toml::from_str(s)?;
    Ok(clean_list(v.feeds))
}

fn parse_json(s: &str) -> Result<Vec<FeedSource>> {
    let v: Vec<FeedSource> = serde_json::from_str(s)?;
    Ok(clean_list(v))
}

/// Trim, drop blanks, keep the first entry per name (case-insensitive). Order is preserved.
fn clean_list(items: Vec<FeedSource>) -> Vec<FeedSource> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(items.len());
    for it in items {
        let name = it.name.trim().to_string();
        let url = it.url.trim().to_string();
        if name.is_empty() || url.is_empty() {
            continue;
        }
        if seen.insert(name.to_ascii_lowercase()) {
            out.push(FeedSource {
                name,
                url,
                enabled: it.enabled,
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, fs};

    #[test]
    fn dedup_trim_and_formats_work() {
        let toml = r#"
[[feeds]]
name = " FIA "
url = "https://www.fia.com/rss/news"

[[feeds]]
name = "fia"
url = "https://dup.example.com"

[[feeds]]
name = "GPFans"
url = "https://www.gpfans.com/en/rss.xml"
enabled = false

[[feeds]]
name = ""
url = "https://blank.example.com"
"#;
        let out = parse_toml(toml).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].name, "FIA");
        assert!(out[0].enabled);
        assert!(!out[1].enabled);

        let json = r#"[{"name": "RaceFans", "url": " https://www.racefans.net/feed/ "}]"#;
        let out = parse_json(json).unwrap();
        assert_eq!(out[0].url, "https://www.racefans.net/feed/");
        assert!(out[0].enabled);
    }

    #[test]
    fn builtin_list_has_eight_enabled_sources() {
        let feeds = default_feeds();
        assert_eq!(feeds.len(), 8);
        assert!(feeds.iter().all(|f| f.enabled && f.url.starts_with("https://")));
    }

    #[serial_test::serial]
    #[test]
    fn default_uses_env_then_fallbacks() {
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();

        env::remove_var(ENV_FEEDS_PATH);

        let v = load_feeds_default().unwrap();
        assert_eq!(v, default_feeds());

        let p_json = tmp.path().join("feeds.json");
        fs::write(&p_json, r#"[{"name": "X", "url": "https://x.example.com"}]"#).unwrap();
        env::set_var(ENV_FEEDS_PATH, p_json.display().to_string());
        let v2 = load_feeds_default().unwrap();
        assert_eq!(v2, vec![FeedSource::new("X", "https://x.example.com")]);

        env::set_var(ENV_FEEDS_PATH, tmp.path().join("nope.toml"));
        assert!(load_feeds_default().is_err());
        env::remove_var(ENV_FEEDS_PATH);

        env::set_current_dir(&old).unwrap();
    }
}
