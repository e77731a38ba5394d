//! In-memory transport for crawler tests.

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Url;
use std::collections::HashMap;
use std::time::Duration;

use crate::fetch::{extract_links, FetchError, FetchedPage, Fetcher};

enum Canned {
    Page { status: u16, html: String },
    Failure(String),
}

/// In-memory site graph. Unknown URLs answer 404.
#[derive(Default)]
pub struct MemoryFetcher {
    pages: HashMap<String, Canned>,
    latency: Duration,
    hits: DashMap<String, usize>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(self, url: &str, html: &str) -> Self {
        self.status(url, 200, html)
    }

    pub fn status(mut self, url: &str, status: u16, html: &str) -> Self {
        self.pages.insert(canonical(url), Canned::Page { status, html: html.to_string() });
        self
    }

    pub fn failure(mut self, url: &str, message: &str) -> Self {
        self.pages.insert(canonical(url), Canned::Failure(message.to_string()));
        self
    }

    /// Delay applied to every fetch.
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Times `url` was fetched.
    pub fn hits(&self, url: &str) -> usize {
        self.hits.get(&canonical(url)).map_or(0, |n| *n)
    }

    pub fn total_hits(&self) -> usize {
        self.hits.iter().map(|e| *e.value()).sum()
    }
}

#[async_trait]
impl Fetcher for MemoryFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let key = canonical(url);
        *self.hits.entry(key.clone()).or_insert(0) += 1;
        match self.pages.get(&key) {
            Some(Canned::Page { status, html }) => {
                let links = Url::parse(&key).map(|base| extract_links(&base, html)).unwrap_or_default();
                Ok(FetchedPage { status: *status, html: html.clone(), links, is_html: true })
            }
            Some(Canned::Failure(message)) => {
                Err(FetchError::Transport { url: url.to_string(), message: message.clone() })
            }
            None => Ok(FetchedPage { status: 404, html: String::new(), links: Vec::new(), is_html: true }),
        }
    }
}

fn canonical(url: &str) -> String {
    Url::parse(url).map(|u| u.to_string()).unwrap_or_else(|_| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_fetcher_counts_hits() {
        let f = MemoryFetcher::new().page("https://a.test", r#"<a href="/b">b</a>"#).failure("https://a.test/c", "reset");
        let root = f.fetch("https://a.test/").await.unwrap();
        assert_eq!(root.links, vec!["https://a.test/b"]);
        assert_eq!(f.fetch("https://a.test/b").await.unwrap().status, 404);
        assert!(f.fetch("https://a.test/c").await.is_err());
        assert_eq!(f.hits("https://a.test"), 1);
        assert_eq!(f.total_hits(), 3);
    }
}
