use crate::error::{EngineError, Result};
use crate::{now_unix, Lemma, LemmaId, Page, PageId, Posting, Site, SiteId, SiteStatus};
use bincode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::{Batch, Db, Tree};
use std::collections::BTreeSet;
use std::path::Path;

/// Persistence contract the crawler, merger and search engine rely on.
pub trait Storage: Send + Sync {
    /// Fresh id for a new record.
    fn next_id(&self) -> Result<u64>;

    fn site(&self, id: SiteId) -> Result<Option<Site>>;
    fn site_by_url(&self, url: &str) -> Result<Option<Site>>;
    /// Create the site row or refresh its name, moving it to `status`.
    fn upsert_site(&self, url: &str, name: &str, status: SiteStatus) -> Result<Site>;
    /// Atomically move a site to `status`; `None` when the site does not exist.
    fn set_site_status(&self, id: SiteId, status: SiteStatus, error: Option<&str>) -> Result<Option<Site>>;
    fn sites(&self) -> Result<Vec<Site>>;
    fn sites_by_status(&self, status: SiteStatus) -> Result<Vec<Site>>;

    /// Store a new page; `EngineError::Conflict` if `(site, path)` is taken.
    fn insert_page(&self, site_id: SiteId, path: &str, code: u16, content: &str) -> Result<Page>;
    fn page(&self, site_id: SiteId, path: &str) -> Result<Option<Page>>;
    fn page_by_id(&self, id: PageId) -> Result<Option<Page>>;
    fn page_exists(&self, site_id: SiteId, path: &str) -> Result<bool>;
    /// Delete a page and its postings, returning the postings removed.
    fn delete_page(&self, id: PageId) -> Result<Vec<Posting>>;
    fn count_pages(&self, site_id: SiteId) -> Result<usize>;
    fn page_ids(&self, site_id: SiteId) -> Result<Vec<PageId>>;

    fn lemma(&self, site_id: SiteId, text: &str) -> Result<Option<Lemma>>;
    fn lemma_by_id(&self, id: LemmaId) -> Result<Option<Lemma>>;
    fn save_lemma(&self, lemma: &Lemma) -> Result<()>;
    fn delete_lemma(&self, lemma: &Lemma) -> Result<()>;
    /// Lemma rows for any of `texts`, in one site or across all sites.
    fn lemmas_by_texts(&self, texts: &[String], site_id: Option<SiteId>) -> Result<Vec<Lemma>>;
    fn count_lemmas(&self, site_id: SiteId) -> Result<usize>;
    fn count_sites_with_lemma(&self, text: &str) -> Result<usize>;

    fn insert_postings(&self, postings: &[Posting]) -> Result<()>;
    /// Postings of `pages` for `lemmas`, rarest lemma first.
    fn postings_for(&self, pages: &[PageId], lemmas: &[LemmaId]) -> Result<Vec<Posting>>;
    /// Pages holding a posting for every one of `texts`, ordered by site then page id.
    fn pages_with_all_lemmas(&self, texts: &[String], site_id: Option<SiteId>) -> Result<Vec<Page>>;
}

/// `Storage` on an embedded sled database with bincode records.
pub struct SledStore {
    db: Db,
    sites: Tree,
    site_urls: Tree,
    pages: Tree,
    page_paths: Tree,
    lemmas: Tree,
    lemma_texts: Tree,
    postings: Tree,
    lemma_pages: Tree,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        tracing::debug!(path = %path.as_ref().display(), "opening index store");
        Self::from_db(sled::open(path)?)
    }

    /// Store that is removed when dropped.
    pub fn temporary() -> Result<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self> {
        Ok(Self {
            sites: db.open_tree("sites")?,
            site_urls: db.open_tree("site_urls")?,
            pages: db.open_tree("pages")?,
            page_paths: db.open_tree("page_paths")?,
            lemmas: db.open_tree("lemmas")?,
            lemma_texts: db.open_tree("lemma_texts")?,
            postings: db.open_tree("postings")?,
            lemma_pages: db.open_tree("lemma_pages")?,
            db,
        })
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn lemma_ids(&self, site_id: SiteId, texts: &[String]) -> Result<Option<Vec<LemmaId>>> {
        let mut ids = Vec::with_capacity(texts.len());
        for text in texts {
            match self.lemma_texts.get(scoped_key(site_id, text))? {
                Some(v) => ids.push(decode_id(&v)?),
                None => return Ok(None),
            }
        }
        Ok(Some(ids))
    }

    fn pages_of_lemma(&self, lemma_id: LemmaId) -> Result<BTreeSet<PageId>> {
        let mut out = BTreeSet::new();
        for kv in self.lemma_pages.scan_prefix(id_key(lemma_id)) {
            let (k, _) = kv?;
            out.insert(decode_id(&k[8..])?);
        }
        Ok(out)
    }

    fn site_ids(&self, scope: Option<SiteId>) -> Result<Vec<SiteId>> {
        match scope {
            Some(id) => Ok(vec![id]),
            None => Ok(self.sites()?.into_iter().map(|s| s.id).collect()),
        }
    }
}

impl Storage for SledStore {
    fn next_id(&self) -> Result<u64> {
        // id 0 is never handed out so big-endian keys stay non-empty prefixes
        Ok(self.db.generate_id()? + 1)
    }

    fn site(&self, id: SiteId) -> Result<Option<Site>> {
        get_record(&self.sites, id_key(id))
    }

    fn site_by_url(&self, url: &str) -> Result<Option<Site>> {
        match self.site_urls.get(url.as_bytes())? {
            Some(v) => self.site(decode_id(&v)?),
            None => Ok(None),
        }
    }

    fn upsert_site(&self, url: &str, name: &str, status: SiteStatus) -> Result<Site> {
        let mut site = match self.site_by_url(url)? {
            Some(existing) => existing,
            None => {
                let id = self.next_id()?;
                self.site_urls.insert(url.as_bytes(), &id_key(id)[..])?;
                Site {
                    id,
                    url: url.to_string(),
                    name: name.to_string(),
                    status,
                    status_time: now_unix(),
                    last_error: None,
                }
            }
        };
        site.name = name.to_string();
        site.transition(status, None);
        put_record(&self.sites, id_key(site.id), &site)?;
        Ok(site)
    }

    fn set_site_status(&self, id: SiteId, status: SiteStatus, error: Option<&str>) -> Result<Option<Site>> {
        let updated = self.sites.update_and_fetch(id_key(id), |old| {
            let mut site: Site = bincode::deserialize(old?).ok()?;
            site.transition(status, error);
            bincode::serialize(&site).ok()
        })?;
        match updated {
            Some(v) => {
                tracing::debug!(site = id, %status, "site status changed");
                Ok(Some(bincode::deserialize(&v)?))
            }
            None => Ok(None),
        }
    }

    fn sites(&self) -> Result<Vec<Site>> {
        let mut out = Vec::new();
        for kv in self.sites.iter() {
            let (_, v) = kv?;
            out.push(bincode::deserialize(&v)?);
        }
        Ok(out)
    }

    fn sites_by_status(&self, status: SiteStatus) -> Result<Vec<Site>> {
        Ok(self.sites()?.into_iter().filter(|s| s.status == status).collect())
    }

    fn insert_page(&self, site_id: SiteId, path: &str, code: u16, content: &str) -> Result<Page> {
        let id = self.next_id()?;
        let claimed = self
            .page_paths
            .compare_and_swap(scoped_key(site_id, path), None as Option<&[u8]>, Some(&id_key(id)[..]))?;
        if claimed.is_err() {
            return Err(EngineError::Conflict { path: path.to_string() });
        }
        let page = Page { id, site_id, path: path.to_string(), code, content: content.to_string() };
        put_record(&self.pages, id_key(id), &page)?;
        Ok(page)
    }

    fn page(&self, site_id: SiteId, path: &str) -> Result<Option<Page>> {
        match self.page_paths.get(scoped_key(site_id, path))? {
            Some(v) => self.page_by_id(decode_id(&v)?),
            None => Ok(None),
        }
    }

    fn page_by_id(&self, id: PageId) -> Result<Option<Page>> {
        get_record(&self.pages, id_key(id))
    }

    fn page_exists(&self, site_id: SiteId, path: &str) -> Result<bool> {
        Ok(self.page_paths.contains_key(scoped_key(site_id, path))?)
    }

    fn delete_page(&self, id: PageId) -> Result<Vec<Posting>> {
        let Some(page) = self.page_by_id(id)? else { return Ok(Vec::new()) };
        let mut removed = Vec::new();
        let mut postings = Batch::default();
        let mut reverse = Batch::default();
        for kv in self.postings.scan_prefix(id_key(id)) {
            let (k, v) = kv?;
            let lemma_id = decode_id(&k[8..])?;
            let weight: f32 = bincode::deserialize(&v)?;
            postings.remove(k);
            reverse.remove(&pair_key(lemma_id, id)[..]);
            removed.push(Posting { page_id: id, lemma_id, weight });
        }
        self.postings.apply_batch(postings)?;
        self.lemma_pages.apply_batch(reverse)?;
        self.pages.remove(id_key(id))?;
        self.page_paths.remove(scoped_key(page.site_id, &page.path))?;
        Ok(removed)
    }

    fn count_pages(&self, site_id: SiteId) -> Result<usize> {
        Ok(self.page_paths.scan_prefix(id_key(site_id)).count())
    }

    fn page_ids(&self, site_id: SiteId) -> Result<Vec<PageId>> {
        let mut ids = Vec::new();
        for kv in self.page_paths.scan_prefix(id_key(site_id)) {
            let (_, v) = kv?;
            ids.push(decode_id(&v)?);
        }
        Ok(ids)
    }

    fn lemma(&self, site_id: SiteId, text: &str) -> Result<Option<Lemma>> {
        match self.lemma_texts.get(scoped_key(site_id, text))? {
            Some(v) => self.lemma_by_id(decode_id(&v)?),
            None => Ok(None),
        }
    }

    fn lemma_by_id(&self, id: LemmaId) -> Result<Option<Lemma>> {
        get_record(&self.lemmas, id_key(id))
    }

    fn save_lemma(&self, lemma: &Lemma) -> Result<()> {
        put_record(&self.lemmas, id_key(lemma.id), lemma)?;
        self.lemma_texts.insert(scoped_key(lemma.site_id, &lemma.text), &id_key(lemma.id)[..])?;
        Ok(())
    }

    fn delete_lemma(&self, lemma: &Lemma) -> Result<()> {
        self.lemma_texts.remove(scoped_key(lemma.site_id, &lemma.text))?;
        self.lemmas.remove(id_key(lemma.id))?;
        Ok(())
    }

    fn lemmas_by_texts(&self, texts: &[String], site_id: Option<SiteId>) -> Result<Vec<Lemma>> {
        let mut out = Vec::new();
        for sid in self.site_ids(site_id)? {
            for text in texts {
                if let Some(lemma) = self.lemma(sid, text)? {
                    out.push(lemma);
                }
            }
        }
        Ok(out)
    }

    fn count_lemmas(&self, site_id: SiteId) -> Result<usize> {
        Ok(self.lemma_texts.scan_prefix(id_key(site_id)).count())
    }

    fn count_sites_with_lemma(&self, text: &str) -> Result<usize> {
        let mut n = 0;
        for sid in self.site_ids(None)? {
            if self.lemma_texts.contains_key(scoped_key(sid, text))? {
                n += 1;
            }
        }
        Ok(n)
    }

    fn insert_postings(&self, postings: &[Posting]) -> Result<()> {
        let mut forward = Batch::default();
        let mut reverse = Batch::default();
        for p in postings {
            forward.insert(&pair_key(p.page_id, p.lemma_id)[..], bincode::serialize(&p.weight)?);
            reverse.insert(&pair_key(p.lemma_id, p.page_id)[..], &b""[..]);
        }
        self.postings.apply_batch(forward)?;
        self.lemma_pages.apply_batch(reverse)?;
        Ok(())
    }

    fn postings_for(&self, pages: &[PageId], lemmas: &[LemmaId]) -> Result<Vec<Posting>> {
        let mut ordered: Vec<(u32, LemmaId)> = Vec::with_capacity(lemmas.len());
        for &id in lemmas {
            if let Some(lemma) = self.lemma_by_id(id)? {
                ordered.push((lemma.frequency, id));
            }
        }
        ordered.sort_unstable();
        let mut out = Vec::new();
        for (_, lemma_id) in ordered {
            for &page_id in pages {
                if let Some(v) = self.postings.get(pair_key(page_id, lemma_id))? {
                    out.push(Posting { page_id, lemma_id, weight: bincode::deserialize(&v)? });
                }
            }
        }
        Ok(out)
    }

    fn pages_with_all_lemmas(&self, texts: &[String], site_id: Option<SiteId>) -> Result<Vec<Page>> {
        let mut out = Vec::new();
        if texts.is_empty() {
            return Ok(out);
        }
        for sid in self.site_ids(site_id)? {
            let Some(ids) = self.lemma_ids(sid, texts)? else { continue };
            // intersect starting from the rarest lemma
            let mut by_size: Vec<BTreeSet<PageId>> =
                ids.into_iter().map(|id| self.pages_of_lemma(id)).collect::<Result<_>>()?;
            by_size.sort_by_key(|s| s.len());
            let mut sets = by_size.into_iter();
            let Some(mut matched) = sets.next() else { continue };
            for set in sets {
                if matched.is_empty() {
                    break;
                }
                matched = matched.intersection(&set).copied().collect();
            }
            for page_id in matched {
                if let Some(page) = self.page_by_id(page_id)? {
                    out.push(page);
                }
            }
        }
        Ok(out)
    }
}

fn id_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

fn pair_key(a: u64, b: u64) -> [u8; 16] {
    let mut k = [0u8; 16];
    k[..8].copy_from_slice(&a.to_be_bytes());
    k[8..].copy_from_slice(&b.to_be_bytes());
    k
}

fn scoped_key(scope: u64, text: &str) -> Vec<u8> {
    let mut k = Vec::with_capacity(8 + text.len());
    k.extend_from_slice(&scope.to_be_bytes());
    k.extend_from_slice(text.as_bytes());
    k
}

fn decode_id(bytes: &[u8]) -> Result<u64> {
    let arr: [u8; 8] = bytes
        .get(..8)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| EngineError::Corrupt(format!("id of {} bytes", bytes.len())))?;
    Ok(u64::from_be_bytes(arr))
}

fn get_record<T: DeserializeOwned>(tree: &Tree, key: impl AsRef<[u8]>) -> Result<Option<T>> {
    match tree.get(key)? {
        Some(v) => Ok(Some(bincode::deserialize(&v)?)),
        None => Ok(None),
    }
}

fn put_record<T: Serialize>(tree: &Tree, key: impl AsRef<[u8]>, value: &T) -> Result<()> {
    tree.insert(key, bincode::serialize(value)?)?;
    Ok(())
}
