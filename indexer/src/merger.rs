use parking_lot::{Mutex, MutexGuard};
use search_core::{CacheConfig, Lemma, Page, Posting, Result, SiteId, Storage, TtlLruCache};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

const LOCK_SHARDS: usize = 64;

type LemmaKey = (SiteId, String);

/// Applies one page's lemma counts to the site's Lemma and Posting records.
///
/// Read-increment-write of a lemma's frequency runs under a lock sharded by
/// `(site, text)`, so pages merged concurrently never lose an increment.
pub struct IndexMerger {
    store: Arc<dyn Storage>,
    lemmas: TtlLruCache<LemmaKey, Lemma>,
    locks: Vec<Mutex<()>>,
}

impl IndexMerger {
    pub fn new(store: Arc<dyn Storage>, cache: &CacheConfig) -> Self {
        Self {
            store,
            lemmas: TtlLruCache::new(cache.lemma_capacity, cache.ttl()),
            locks: (0..LOCK_SHARDS).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Drop cached lemma records; called at the start of every crawl run.
    pub fn reset(&self) {
        self.lemmas.clear();
    }

    /// Count `page` once in every lemma it contains and write its postings.
    ///
    /// On any storage error the increments already applied are taken back, so
    /// frequencies never count a page whose postings were not written.
    pub fn merge(&self, page: &Page, frequencies: &HashMap<String, u32>) -> Result<usize> {
        let mut counted = Vec::with_capacity(frequencies.len());
        let mut postings = Vec::with_capacity(frequencies.len());
        let written = self
            .count_page(page, frequencies, &mut counted, &mut postings)
            .and_then(|()| self.store.insert_postings(&postings));
        if let Err(e) = written {
            tracing::warn!(page = page.id, path = %page.path, error = %e, "merge failed, rolling back lemma counts");
            for key in &counted {
                if let Err(undo) = self.uncount(key) {
                    tracing::error!(page = page.id, lemma = %key.1, error = %undo, "could not roll back lemma count");
                }
            }
            return Err(e);
        }
        tracing::debug!(page = page.id, path = %page.path, lemmas = postings.len(), "merged page");
        Ok(postings.len())
    }

    /// Delete `page` with its postings and take it back out of every lemma's frequency.
    pub fn remove_page(&self, page: &Page) -> Result<()> {
        let removed = self.store.delete_page(page.id)?;
        for posting in removed {
            let Some(stored) = self.store.lemma_by_id(posting.lemma_id)? else { continue };
            self.uncount(&(stored.site_id, stored.text))?;
        }
        tracing::debug!(page = page.id, path = %page.path, "removed page from index");
        Ok(())
    }

    /// Remove every page of a site from the index; returns how many were dropped.
    pub fn purge_site(&self, site_id: SiteId) -> Result<usize> {
        let ids = self.store.page_ids(site_id)?;
        let mut purged = 0;
        for id in ids {
            if let Some(page) = self.store.page_by_id(id)? {
                self.remove_page(&page)?;
                purged += 1;
            }
        }
        Ok(purged)
    }

    fn count_page(
        &self,
        page: &Page,
        frequencies: &HashMap<String, u32>,
        counted: &mut Vec<LemmaKey>,
        postings: &mut Vec<Posting>,
    ) -> Result<()> {
        for (text, &count) in frequencies {
            let key = (page.site_id, text.clone());
            let _guard = self.lock(&key);
            let mut lemma = match self.cached(&key)? {
                Some(lemma) => lemma,
                None => Lemma { id: self.store.next_id()?, site_id: page.site_id, text: text.clone(), frequency: 0 },
            };
            lemma.frequency += 1;
            self.store.save_lemma(&lemma)?;
            postings.push(Posting { page_id: page.id, lemma_id: lemma.id, weight: count as f32 });
            self.lemmas.insert(key.clone(), lemma);
            counted.push(key);
        }
        Ok(())
    }

    /// Take one page out of the lemma at `key`, deleting the lemma at zero.
    fn uncount(&self, key: &LemmaKey) -> Result<()> {
        let _guard = self.lock(key);
        let Some(mut lemma) = self.cached(key)? else { return Ok(()) };
        lemma.frequency = lemma.frequency.saturating_sub(1);
        if lemma.frequency == 0 {
            self.store.delete_lemma(&lemma)?;
            self.lemmas.remove(key);
        } else {
            self.store.save_lemma(&lemma)?;
            self.lemmas.insert(key.clone(), lemma);
        }
        Ok(())
    }

    /// Current record for `key`; callers hold the key's shard lock.
    fn cached(&self, key: &LemmaKey) -> Result<Option<Lemma>> {
        if let Some(lemma) = self.lemmas.get(key) {
            return Ok(Some(lemma));
        }
        self.store.lemma(key.0, &key.1)
    }

    fn lock(&self, key: &LemmaKey) -> MutexGuard<'_, ()> {
        let mut h = DefaultHasher::new();
        key.hash(&mut h);
        self.locks[(h.finish() as usize) % self.locks.len()].lock()
    }
}
