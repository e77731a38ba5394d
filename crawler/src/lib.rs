//! Site crawling and indexing: the fetch layer, the per-run crawl tree, the
//! start/stop coordinator and the single-page indexer.

pub mod coordinator;
pub mod crawl;
pub mod fetch;
pub mod page;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use coordinator::IndexingCoordinator;
pub use fetch::{FetchError, FetchedPage, Fetcher, HttpFetcher};
pub use page::PageIndexer;
#[cfg(any(test, feature = "testing"))]
pub use testing::MemoryFetcher;

use indexer::IndexMerger;
use search_core::{AppConfig, Lemmatizer, Page, SiteId, StemmingLemmatizer, Storage};
use serde::Serialize;
use std::sync::Arc;

pub const ALREADY_RUNNING: &str = "Indexing is already running";
pub const NOT_RUNNING: &str = "Indexing is not running";
pub const STOPPED_BY_USER: &str = "Indexing stopped by user";
pub const OUTSIDE_SITES: &str = "This page is outside the sites listed in the configuration file";

/// Collaborators shared by crawl runs and single-page indexing.
#[derive(Clone)]
pub struct IndexingContext {
    pub store: Arc<dyn Storage>,
    pub lemmatizer: Arc<dyn Lemmatizer>,
    pub merger: Arc<IndexMerger>,
    pub fetcher: Arc<dyn Fetcher>,
}

impl IndexingContext {
    pub fn new(config: &AppConfig, store: Arc<dyn Storage>, fetcher: Arc<dyn Fetcher>) -> Self {
        let merger = Arc::new(IndexMerger::new(store.clone(), &config.cache));
        Self {
            store,
            lemmatizer: Arc::new(StemmingLemmatizer::new(config.language)),
            merger,
            fetcher,
        }
    }
}

/// Result of a start/stop/index-one command.
///
/// `status` is the HTTP status the command maps to: 200 on success, 400 for a
/// rejected request, the upstream code for a non-2xx page, 500 otherwise.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexingOutcome {
    pub result: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub status: u16,
}

impl IndexingOutcome {
    pub fn ok() -> Self {
        Self { result: true, error: None, status: 200 }
    }

    pub fn rejected(message: &str) -> Self {
        Self::failed(400, message)
    }

    pub fn failed(status: u16, message: impl Into<String>) -> Self {
        Self { result: false, error: Some(message.into()), status }
    }
}

/// Store a fetched page and merge its lemmas. Blocking; run off the async workers.
pub(crate) fn index_page(
    ctx: &IndexingContext,
    site_id: SiteId,
    path: &str,
    code: u16,
    html: &str,
) -> search_core::Result<Page> {
    let page = ctx.store.insert_page(site_id, path, code, html)?;
    let text = ctx.lemmatizer.plain_text(html);
    let frequencies = ctx.lemmatizer.lemma_frequencies(&text);
    if let Err(e) = ctx.merger.merge(&page, &frequencies) {
        if let Err(undo) = ctx.store.delete_page(page.id) {
            tracing::error!(page = page.id, error = %undo, "could not drop half-indexed page");
        }
        return Err(e);
    }
    Ok(page)
}
