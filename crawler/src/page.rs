use search_core::{AppConfig, EngineError, SiteConfig, SiteStatus};
use std::sync::Arc;

use crate::{index_page, IndexingContext, IndexingOutcome, OUTSIDE_SITES};

/// Re-indexes a single URL of a configured site, outside any crawl run.
pub struct PageIndexer {
    config: Arc<AppConfig>,
    ctx: IndexingContext,
}

impl PageIndexer {
    pub fn new(config: Arc<AppConfig>, ctx: IndexingContext) -> Self {
        Self { config, ctx }
    }

    pub async fn index_one(&self, url: &str) -> IndexingOutcome {
        let url = url.trim();
        let Some(site) = self.config.site_for(url) else {
            tracing::warn!(url, "page outside configured sites");
            return IndexingOutcome::rejected(OUTSIDE_SITES);
        };
        match self.reindex(site, url).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(url, error = %e, "page indexing failed");
                IndexingOutcome::failed(500, e.to_string())
            }
        }
    }

    async fn reindex(&self, configured: &SiteConfig, url: &str) -> Result<IndexingOutcome, EngineError> {
        let store = &self.ctx.store;
        let site = match store.site_by_url(&configured.url)? {
            Some(site) => site,
            None => store.upsert_site(&configured.url, &configured.name, SiteStatus::Indexed)?,
        };
        let path = site.relative_path(url);
        if let Some(previous) = store.page(site.id, &path)? {
            self.ctx.merger.remove_page(&previous)?;
            tracing::debug!(url, page = previous.id, "removed previous version");
        }

        let fetched = match self.ctx.fetcher.fetch(url).await {
            Ok(fetched) => fetched,
            Err(e) => {
                tracing::error!(url, error = %e, "fetch failed");
                return Ok(IndexingOutcome::failed(500, e.to_string()));
            }
        };
        if !fetched.is_success() {
            return Ok(IndexingOutcome::failed(fetched.status, format!("HTTP status {}", fetched.status)));
        }
        if !fetched.is_html {
            return Ok(IndexingOutcome::failed(415, "Response is not an HTML page"));
        }

        let ctx = self.ctx.clone();
        let (site_id, status) = (site.id, fetched.status);
        let html = fetched.html;
        let page = tokio::task::spawn_blocking(move || index_page(&ctx, site_id, &path, status, &html))
            .await
            .map_err(|e| EngineError::Task(e.to_string()))??;
        tracing::info!(url, page = page.id, "page indexed");
        Ok(IndexingOutcome::ok())
    }
}
