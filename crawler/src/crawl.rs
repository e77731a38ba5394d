use dashmap::DashSet;
use search_core::{is_under, AppConfig, Site, SiteStatus, TtlLruCache};
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

use crate::fetch::FetchedPage;
use crate::{index_page, IndexingContext};

type Visit = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Debug, Clone)]
pub struct CrawlSettings {
    pub workers: usize,
    pub politeness: Duration,
    pub skip_extensions: Vec<String>,
}

impl From<&AppConfig> for CrawlSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            workers: config.workers.max(1),
            politeness: config.politeness_delay(),
            skip_extensions: config.skip_extensions.clone(),
        }
    }
}

/// A child link is followed only inside the site, without fragments or skipped extensions.
pub fn is_admissible(root: &str, url: &str, skip_extensions: &[String]) -> bool {
    if !is_under(root, url) || url.contains('#') {
        return false;
    }
    let lower = url.to_ascii_lowercase();
    !skip_extensions.iter().any(|ext| {
        lower.len() > ext.len() && lower.ends_with(ext.as_str()) && lower.as_bytes()[lower.len() - ext.len() - 1] == b'.'
    })
}

/// State shared by every crawl task of one run across all sites.
pub struct CrawlRun {
    ctx: IndexingContext,
    settings: CrawlSettings,
    permits: Semaphore,
    cancelled: AtomicBool,
    visited: DashSet<String>,
    known_pages: Arc<TtlLruCache<String, bool>>,
    done: watch::Sender<bool>,
}

impl CrawlRun {
    pub fn new(ctx: IndexingContext, settings: CrawlSettings, known_pages: Arc<TtlLruCache<String, bool>>) -> Self {
        Self {
            permits: Semaphore::new(settings.workers),
            ctx,
            settings,
            cancelled: AtomicBool::new(false),
            visited: DashSet::new(),
            known_pages,
            done: watch::channel(false).0,
        }
    }

    /// Ask every task to stop at its next check point; waiting tasks are released.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.permits.close();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Called once every site tree of the run has returned.
    pub fn mark_done(&self) {
        self.done.send_replace(true);
    }

    /// Resolves when no task of this run is left.
    pub async fn drained(&self) {
        let mut rx = self.done.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Drop what earlier runs stored for the site, then walk it from its root.
    pub async fn crawl_site(self: Arc<Self>, site: Site) {
        if self.is_cancelled() {
            tracing::info!(site = %site.url, "run stopped before the crawl began");
            return;
        }
        let site = Arc::new(site);
        let merger = self.ctx.merger.clone();
        let site_id = site.id;
        match tokio::task::spawn_blocking(move || merger.purge_site(site_id)).await {
            Ok(Ok(purged)) if purged > 0 => tracing::info!(site = %site.url, pages = purged, "dropped previous pages"),
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                tracing::error!(site = %site.url, error = %e, "could not drop previous pages");
                self.fail_site(&site, &e.to_string());
                return;
            }
            Err(e) => {
                tracing::error!(site = %site.url, error = %e, "purge task failed");
                self.fail_site(&site, &e.to_string());
                return;
            }
        }
        self.clone().visit(site.clone(), site.url.clone()).await;
        tracing::info!(site = %site.url, cancelled = self.is_cancelled(), "site crawl finished");
    }

    /// One node of the crawl tree: process `url`, then run every child as its own
    /// task and wait for all of them.
    fn visit(self: Arc<Self>, site: Arc<Site>, url: String) -> Visit {
        Box::pin(async move {
            let children = self.process(&site, &url).await;
            if children.is_empty() {
                return;
            }
            let mut tasks = JoinSet::new();
            for child in children {
                tasks.spawn(self.clone().visit(site.clone(), child));
            }
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    tracing::error!(site = %site.url, error = %e, "crawl task panicked");
                }
            }
        })
    }

    /// Fetch and index one page; returns the child URLs to follow.
    async fn process(&self, site: &Site, url: &str) -> Vec<String> {
        if self.is_cancelled() {
            self.abandon(url);
            return Vec::new();
        }
        let path = site.relative_path(url);
        let key = format!("{}{}", site.url, path);
        if !self.visited.insert(key.clone()) {
            return Vec::new();
        }
        let Ok(_permit) = self.permits.acquire().await else {
            self.abandon(url);
            return Vec::new();
        };
        if self.already_stored(site, &path, &key) {
            return Vec::new();
        }

        let fetched = self.ctx.fetcher.fetch(url).await;
        if self.is_cancelled() {
            self.abandon(url);
            return Vec::new();
        }
        let children = match fetched {
            Ok(page) if page.is_indexable() => {
                self.store(site, &path, &key, &page).await;
                self.admissible_children(site, &page.links)
            }
            Ok(page) => {
                tracing::warn!(url, status = page.status, html = page.is_html, "skipping non-indexable response");
                Vec::new()
            }
            Err(e) => {
                tracing::error!(url, error = %e, "fetch failed");
                self.fail_site(site, &e.to_string());
                Vec::new()
            }
        };
        if !self.settings.politeness.is_zero() {
            tokio::time::sleep(self.settings.politeness).await;
        }
        children
    }

    fn already_stored(&self, site: &Site, path: &str, key: &String) -> bool {
        if self.known_pages.get(key).unwrap_or(false) {
            return true;
        }
        match self.ctx.store.page_exists(site.id, path) {
            Ok(true) => {
                self.known_pages.insert(key.clone(), true);
                true
            }
            Ok(false) => false,
            Err(e) => {
                tracing::warn!(site = %site.url, path, error = %e, "page lookup failed");
                false
            }
        }
    }

    async fn store(&self, site: &Site, path: &str, key: &str, page: &FetchedPage) {
        let ctx = self.ctx.clone();
        let (site_id, owned_path, html, status) = (site.id, path.to_string(), page.html.clone(), page.status);
        let stored = tokio::task::spawn_blocking(move || index_page(&ctx, site_id, &owned_path, status, &html)).await;
        match stored {
            Ok(Ok(p)) => {
                self.known_pages.insert(key.to_string(), true);
                tracing::debug!(site = %site.url, path, page = p.id, "indexed page");
            }
            Ok(Err(e)) if e.is_conflict() => {
                tracing::debug!(site = %site.url, path, "page already stored by another task");
            }
            Ok(Err(e)) => {
                tracing::error!(site = %site.url, path, error = %e, "could not store page");
                self.fail_site(site, &e.to_string());
            }
            Err(e) => tracing::error!(site = %site.url, path, error = %e, "index task failed"),
        }
    }

    fn admissible_children(&self, site: &Site, links: &[String]) -> Vec<String> {
        let mut seen = HashSet::new();
        links
            .iter()
            .filter(|link| is_admissible(&site.url, link, &self.settings.skip_extensions))
            .filter(|link| {
                let key = format!("{}{}", site.url, site.relative_path(link));
                !self.visited.contains(&key) && seen.insert(key)
            })
            .cloned()
            .collect()
    }

    /// The coordinator already marked the run's sites as stopped.
    fn abandon(&self, url: &str) {
        tracing::info!(url, "crawl cancelled");
    }

    /// Record a failure; a stopped run leaves site rows alone since a newer
    /// run may own them.
    fn fail_site(&self, site: &Site, message: &str) {
        if self.is_cancelled() {
            tracing::debug!(site = %site.url, message, "run stopped, site status left as is");
            return;
        }
        if let Err(e) = self.ctx.store.set_site_status(site.id, SiteStatus::Failed, Some(message)) {
            tracing::error!(site = %site.url, error = %e, "could not mark site failed");
        }
    }
}
