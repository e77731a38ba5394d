use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use crate::error::{EngineError, Result};
use crate::lemmatizer::Language;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteConfig {
    pub url: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub search_capacity: usize,
    pub page_capacity: usize,
    pub lemma_capacity: usize,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { search_capacity: 1000, page_capacity: 1000, lemma_capacity: 10_000, ttl_secs: 600 }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub sites: Vec<SiteConfig>,
    pub user_agent: String,
    pub referrer: String,
    /// Concurrent crawl tasks shared by all sites of a run.
    pub workers: usize,
    pub fetch_timeout_secs: u64,
    pub politeness_delay_ms: u64,
    /// URL suffixes (without the dot) never followed by the crawler.
    pub skip_extensions: Vec<String>,
    pub language: Language,
    pub cache: CacheConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
        Self {
            sites: Vec::new(),
            user_agent: "sitesearch-bot/0.1 (+https://example.com/bot)".to_string(),
            referrer: "https://www.google.com".to_string(),
            workers: cpus * 2,
            fetch_timeout_secs: 10,
            politeness_delay_ms: 100,
            skip_extensions: ["pdf", "jpg", "jpeg", "png", "gif", "zip"].iter().map(|s| s.to_string()).collect(),
            language: Language::English,
            cache: CacheConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = File::open(path)?;
        let config: AppConfig = serde_json::from_reader(BufReader::new(f))?;
        config.normalized()
    }

    /// Trim trailing slashes from site URLs and reject anything that is not absolute http(s).
    pub fn normalized(mut self) -> Result<Self> {
        for site in self.sites.iter_mut() {
            let trimmed = site.url.trim().trim_end_matches('/').to_string();
            let parsed = url::Url::parse(&trimmed)
                .map_err(|e| EngineError::Config(format!("site url {:?}: {e}", site.url)))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(EngineError::Config(format!("site url {:?} is not http(s)", site.url)));
            }
            site.url = trimmed;
        }
        if self.workers == 0 {
            return Err(EngineError::Config("workers must be at least 1".into()));
        }
        for ext in self.skip_extensions.iter_mut() {
            *ext = ext.trim_start_matches('.').to_lowercase();
        }
        Ok(self)
    }

    /// The configured site whose root covers `url`.
    pub fn site_for(&self, url: &str) -> Option<&SiteConfig> {
        self.sites.iter().find(|s| crate::index::is_under(&s.url, url))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn politeness_delay(&self) -> Duration {
        Duration::from_millis(self.politeness_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_and_normalizes_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            r#"{{"sites":[{{"url":"https://example.com/","name":"Example"}}],"workers":3,"skip_extensions":[".PDF"]}}"#
        )
        .unwrap();
        let cfg = AppConfig::from_file(f.path()).unwrap();
        assert_eq!(cfg.sites[0].url, "https://example.com");
        assert_eq!(cfg.workers, 3);
        assert_eq!(cfg.skip_extensions, vec!["pdf".to_string()]);
        assert_eq!(cfg.fetch_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.cache.lemma_capacity, 10_000);
    }

    #[test]
    fn rejects_relative_site_url() {
        let cfg = AppConfig {
            sites: vec![SiteConfig { url: "example.com".into(), name: "x".into() }],
            ..AppConfig::default()
        };
        assert!(matches!(cfg.normalized(), Err(EngineError::Config(_))));
    }

    #[test]
    fn site_for_matches_prefix() {
        let cfg = AppConfig {
            sites: vec![
                SiteConfig { url: "https://a.test".into(), name: "A".into() },
                SiteConfig { url: "https://b.test".into(), name: "B".into() },
            ],
            ..AppConfig::default()
        };
        assert_eq!(cfg.site_for("https://b.test/x").map(|s| s.name.as_str()), Some("B"));
        assert!(cfg.site_for("https://c.test/").is_none());
        assert!(cfg.site_for("https://a.testing.org/x").is_none());
        assert!(cfg.site_for("https://a.test.evil.org/").is_none());
    }
}
