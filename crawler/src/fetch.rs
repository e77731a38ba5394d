use async_trait::async_trait;
use lazy_static::lazy_static;
use reqwest::{header, Client, Url};
use scraper::{Html, Selector};
use thiserror::Error;

use search_core::AppConfig;

lazy_static! {
    static ref ANCHORS: Selector = Selector::parse("a[href]").expect("valid selector");
}

/// A fetch that produced an HTTP response, whatever its status.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status: u16,
    pub html: String,
    /// Absolute http(s) targets of every `<a href>`, in document order.
    pub links: Vec<String>,
    pub is_html: bool,
}

impl FetchedPage {
    /// 4xx/5xx and non-HTML responses are skipped, not treated as errors.
    pub fn is_indexable(&self) -> bool {
        self.is_html && !(400..600).contains(&self.status)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("timed out fetching {url}")]
    Timeout { url: String },

    #[error("failed to fetch {url}: {message}")]
    Transport { url: String, message: String },
}

impl FetchError {
    fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout { url: url.to_string() }
        } else {
            FetchError::Transport { url: url.to_string(), message: err.to_string() }
        }
    }
}

/// Transport used by the crawler and the single-page indexer.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError>;
}

pub struct HttpFetcher {
    client: Client,
    referrer: String,
}

impl HttpFetcher {
    pub fn new(config: &AppConfig) -> reqwest::Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(config.fetch_timeout())
            .build()?;
        Ok(Self { client, referrer: config.referrer.clone() })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let resp = self
            .client
            .get(url)
            .header(header::REFERER, &self.referrer)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;
        let status = resp.status().as_u16();
        let final_url = resp.url().clone();
        let is_html = resp
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map_or(true, |v| v.contains("html"));
        if !is_html || (400..600).contains(&status) {
            return Ok(FetchedPage { status, html: String::new(), links: Vec::new(), is_html });
        }
        let bytes = resp.bytes().await.map_err(|e| FetchError::from_reqwest(url, e))?;
        let html = String::from_utf8_lossy(&bytes).into_owned();
        let links = extract_links(&final_url, &html);
        Ok(FetchedPage { status, html, links, is_html })
    }
}

/// Resolve every `<a href>` of `html` against `base`, keeping http(s) targets.
pub fn extract_links(base: &Url, html: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    let mut links = Vec::new();
    for a in doc.select(&ANCHORS) {
        if let Some(h) = a.value().attr("href") {
            if let Ok(u) = base.join(h.trim()) {
                if u.scheme().starts_with("http") {
                    links.push(u.to_string());
                }
            }
        }
    }
    links
}
