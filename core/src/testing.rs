//! Storage fault injection for tests of the layers above `Storage`.

use crate::error::{EngineError, Result};
use crate::persist::{SledStore, Storage};
use crate::{Lemma, LemmaId, Page, PageId, Posting, Site, SiteId, SiteStatus};
use std::sync::atomic::{AtomicBool, Ordering};

/// Which operations of a [`FaultyStore`] misbehave.
#[derive(Debug, Clone, Copy, Default)]
pub struct Faults {
    /// `insert_postings` returns a storage error.
    pub postings_write: bool,
    /// `page_ids` panics, as a crashed blocking task would.
    pub page_scan_panic: bool,
}

/// A temporary [`SledStore`] that fails the operations switched on in [`Faults`].
pub struct FaultyStore {
    inner: SledStore,
    postings_write: AtomicBool,
    page_scan_panic: AtomicBool,
}

impl FaultyStore {
    pub fn new(faults: Faults) -> Result<Self> {
        Ok(Self {
            inner: SledStore::temporary()?,
            postings_write: AtomicBool::new(faults.postings_write),
            page_scan_panic: AtomicBool::new(faults.page_scan_panic),
        })
    }

    /// Replace the active faults; `Faults::default()` heals the store.
    pub fn set_faults(&self, faults: Faults) {
        self.postings_write.store(faults.postings_write, Ordering::SeqCst);
        self.page_scan_panic.store(faults.page_scan_panic, Ordering::SeqCst);
    }
}

impl Storage for FaultyStore {
    fn next_id(&self) -> Result<u64> {
        self.inner.next_id()
    }

    fn site(&self, id: SiteId) -> Result<Option<Site>> {
        self.inner.site(id)
    }

    fn site_by_url(&self, url: &str) -> Result<Option<Site>> {
        self.inner.site_by_url(url)
    }

    fn upsert_site(&self, url: &str, name: &str, status: SiteStatus) -> Result<Site> {
        self.inner.upsert_site(url, name, status)
    }

    fn set_site_status(&self, id: SiteId, status: SiteStatus, error: Option<&str>) -> Result<Option<Site>> {
        self.inner.set_site_status(id, status, error)
    }

    fn sites(&self) -> Result<Vec<Site>> {
        self.inner.sites()
    }

    fn sites_by_status(&self, status: SiteStatus) -> Result<Vec<Site>> {
        self.inner.sites_by_status(status)
    }

    fn insert_page(&self, site_id: SiteId, path: &str, code: u16, content: &str) -> Result<Page> {
        self.inner.insert_page(site_id, path, code, content)
    }

    fn page(&self, site_id: SiteId, path: &str) -> Result<Option<Page>> {
        self.inner.page(site_id, path)
    }

    fn page_by_id(&self, id: PageId) -> Result<Option<Page>> {
        self.inner.page_by_id(id)
    }

    fn page_exists(&self, site_id: SiteId, path: &str) -> Result<bool> {
        self.inner.page_exists(site_id, path)
    }

    fn delete_page(&self, id: PageId) -> Result<Vec<Posting>> {
        self.inner.delete_page(id)
    }

    fn count_pages(&self, site_id: SiteId) -> Result<usize> {
        self.inner.count_pages(site_id)
    }

    fn page_ids(&self, site_id: SiteId) -> Result<Vec<PageId>> {
        if self.page_scan_panic.load(Ordering::SeqCst) {
            panic!("page scan of site {site_id} crashed");
        }
        self.inner.page_ids(site_id)
    }

    fn lemma(&self, site_id: SiteId, text: &str) -> Result<Option<Lemma>> {
        self.inner.lemma(site_id, text)
    }

    fn lemma_by_id(&self, id: LemmaId) -> Result<Option<Lemma>> {
        self.inner.lemma_by_id(id)
    }

    fn save_lemma(&self, lemma: &Lemma) -> Result<()> {
        self.inner.save_lemma(lemma)
    }

    fn delete_lemma(&self, lemma: &Lemma) -> Result<()> {
        self.inner.delete_lemma(lemma)
    }

    fn lemmas_by_texts(&self, texts: &[String], site_id: Option<SiteId>) -> Result<Vec<Lemma>> {
        self.inner.lemmas_by_texts(texts, site_id)
    }

    fn count_lemmas(&self, site_id: SiteId) -> Result<usize> {
        self.inner.count_lemmas(site_id)
    }

    fn count_sites_with_lemma(&self, text: &str) -> Result<usize> {
        self.inner.count_sites_with_lemma(text)
    }

    fn insert_postings(&self, postings: &[Posting]) -> Result<()> {
        if self.postings_write.load(Ordering::SeqCst) {
            return Err(EngineError::Corrupt(format!("postings write of {} rows refused", postings.len())));
        }
        self.inner.insert_postings(postings)
    }

    fn postings_for(&self, pages: &[PageId], lemmas: &[LemmaId]) -> Result<Vec<Posting>> {
        self.inner.postings_for(pages, lemmas)
    }

    fn pages_with_all_lemmas(&self, texts: &[String], site_id: Option<SiteId>) -> Result<Vec<Page>> {
        self.inner.pages_with_all_lemmas(texts, site_id)
    }
}
