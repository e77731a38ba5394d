use parking_lot::Mutex;
use search_core::{AppConfig, SiteStatus, TtlLruCache};
use std::sync::Arc;
use tokio::sync::watch;

use crate::crawl::{CrawlRun, CrawlSettings};
use crate::{IndexingContext, IndexingOutcome, ALREADY_RUNNING, NOT_RUNNING, STOPPED_BY_USER};

/// Owns the "is indexing running" state. At most one crawl run exists at a time;
/// the gate serializes start, stop and natural completion.
///
/// A stopped run is kept in `draining` until the next start. The new run waits
/// for its tasks to return before touching the index.
pub struct IndexingCoordinator {
    config: Arc<AppConfig>,
    ctx: IndexingContext,
    gate: Mutex<Option<Arc<CrawlRun>>>,
    draining: Mutex<Option<Arc<CrawlRun>>>,
    running: watch::Sender<bool>,
}

impl IndexingCoordinator {
    pub fn new(config: Arc<AppConfig>, ctx: IndexingContext) -> Arc<Self> {
        let (running, _) = watch::channel(false);
        Arc::new(Self { config, ctx, gate: Mutex::new(None), draining: Mutex::new(None), running })
    }

    /// Launch a crawl of every configured site and return without waiting for it.
    /// Must be called from within a tokio runtime.
    pub fn start(self: &Arc<Self>) -> IndexingOutcome {
        let mut gate = self.gate.lock();
        if gate.is_some() {
            tracing::warn!("start requested while indexing is running");
            return IndexingOutcome::rejected(ALREADY_RUNNING);
        }

        let known_pages = Arc::new(TtlLruCache::new(self.config.cache.page_capacity, self.config.cache.ttl()));
        let run = Arc::new(CrawlRun::new(self.ctx.clone(), CrawlSettings::from(&*self.config), known_pages));
        let mut sites = Vec::with_capacity(self.config.sites.len());
        for site in &self.config.sites {
            match self.ctx.store.upsert_site(&site.url, &site.name, SiteStatus::Indexing) {
                Ok(row) => {
                    tracing::info!(site = %row.url, id = row.id, "indexing site");
                    sites.push(row);
                }
                Err(e) => tracing::error!(site = %site.url, error = %e, "could not register site"),
            }
        }
        *gate = Some(run.clone());
        self.running.send_replace(true);
        let previous = self.draining.lock().take();

        let this = self.clone();
        tokio::spawn(async move {
            if let Some(previous) = previous {
                tracing::info!("waiting for the stopped run to drain");
                previous.drained().await;
            }
            this.ctx.merger.reset();
            let trees: Vec<_> = sites.into_iter().map(|row| tokio::spawn(run.clone().crawl_site(row))).collect();
            for tree in trees {
                if let Err(e) = tree.await {
                    tracing::error!(error = %e, "site crawl panicked");
                }
            }
            run.mark_done();
            this.finish(&run);
        });
        IndexingOutcome::ok()
    }

    /// Cancel the current run. Sites still INDEXING become FAILED.
    pub fn stop(&self) -> IndexingOutcome {
        let mut gate = self.gate.lock();
        let Some(run) = gate.take() else {
            tracing::warn!("stop requested while idle");
            return IndexingOutcome::rejected(NOT_RUNNING);
        };
        run.cancel();
        self.mark_indexing_sites(SiteStatus::Failed, Some(STOPPED_BY_USER));
        *self.draining.lock() = Some(run);
        self.running.send_replace(false);
        tracing::info!("indexing stopped");
        IndexingOutcome::ok()
    }

    pub fn is_indexing(&self) -> bool {
        *self.running.borrow()
    }

    /// Resolves once no run is active.
    pub async fn wait_until_idle(&self) {
        let mut rx = self.running.subscribe();
        let _ = rx.wait_for(|running| !*running).await;
    }

    /// Resolves once the tasks of the last stopped run have returned.
    pub async fn wait_for_drain(&self) {
        let stopped = self.draining.lock().clone();
        if let Some(run) = stopped {
            run.drained().await;
        }
    }

    /// Natural completion; a run that was stopped or replaced changes nothing.
    fn finish(&self, run: &Arc<CrawlRun>) {
        let mut gate = self.gate.lock();
        match gate.as_ref() {
            Some(current) if Arc::ptr_eq(current, run) => {}
            _ => return,
        }
        self.mark_indexing_sites(SiteStatus::Indexed, None);
        *gate = None;
        self.running.send_replace(false);
        tracing::info!("indexing finished");
    }

    fn mark_indexing_sites(&self, status: SiteStatus, error: Option<&str>) {
        let sites = match self.ctx.store.sites_by_status(SiteStatus::Indexing) {
            Ok(sites) => sites,
            Err(e) => {
                tracing::error!(error = %e, "could not list indexing sites");
                return;
            }
        };
        for site in sites {
            if let Err(e) = self.ctx.store.set_site_status(site.id, status, error) {
                tracing::error!(site = %site.url, error = %e, "could not update site status");
            }
        }
    }
}
