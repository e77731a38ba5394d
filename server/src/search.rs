use search_core::html::page_title;
use search_core::{CacheConfig, EngineError, Lemma, Lemmatizer, Page, PageId, Result, Site, SiteId, Storage, TtlLruCache};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::snippet;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub site: String,
    pub site_name: String,
    pub uri: String,
    pub title: String,
    pub snippet: String,
    /// Relative to the best hit of the same query, in `0..=1`.
    pub relevance: f64,
}

/// One page of a ranked result list and the size of the whole list.
#[derive(Debug, Clone)]
pub struct SearchPage {
    pub total: usize,
    pub hits: Vec<SearchHit>,
}

/// Ranked AND search over the lemma index with a TTL-LRU result cache.
///
/// Cached lists are never invalidated when pages are re-indexed; a query can be
/// answered from a list up to the cache TTL old.
pub struct SearchEngine {
    store: Arc<dyn Storage>,
    lemmatizer: Arc<dyn Lemmatizer>,
    results: TtlLruCache<String, Arc<Vec<SearchHit>>>,
}

impl SearchEngine {
    pub fn new(store: Arc<dyn Storage>, lemmatizer: Arc<dyn Lemmatizer>, cache: &CacheConfig) -> Self {
        Self { store, lemmatizer, results: TtlLruCache::new(cache.search_capacity, cache.ttl()) }
    }

    /// Search every indexed site, or only `site` when given, returning `limit`
    /// results starting at `offset` of the full ranked list.
    pub async fn search(&self, query: &str, site: Option<&str>, offset: usize, limit: usize) -> Result<SearchPage> {
        let query = query.trim();
        if query.is_empty() {
            return Err(EngineError::validation("Empty search query"));
        }
        let site = site.map(|s| s.trim().trim_end_matches('/')).filter(|s| !s.is_empty());
        let key = format!("{}|{}", site.unwrap_or("all"), query);

        let ranked = match self.results.get(&key) {
            Some(cached) => {
                tracing::debug!(query, "search cache hit");
                cached
            }
            None => {
                let fresh = Arc::new(self.rank(query, site).await?);
                self.results.insert(key, fresh.clone());
                fresh
            }
        };
        let hits: Vec<SearchHit> = ranked.iter().skip(offset).take(limit).cloned().collect();
        tracing::info!(query, site = site.unwrap_or("all"), offset, limit, total = ranked.len(), "search finished");
        Ok(SearchPage { total: ranked.len(), hits })
    }

    async fn rank(&self, query: &str, site: Option<&str>) -> Result<Vec<SearchHit>> {
        let lemma_set = self.lemmatizer.lemma_set(query);
        if lemma_set.is_empty() {
            return Ok(Vec::new());
        }
        let scope = match site {
            Some(url) => match self.store.site_by_url(url)? {
                Some(site) => Some(site.id),
                None => return Ok(Vec::new()),
            },
            None => None,
        };

        let mut texts: Vec<String> = lemma_set.iter().cloned().collect();
        texts.sort();
        let pages = self.store.pages_with_all_lemmas(&texts, scope)?;
        if pages.is_empty() {
            return Ok(Vec::new());
        }
        let lemmas = self.store.lemmas_by_texts(&texts, scope)?;
        let rarest_first = self.rarest_first(&texts, &lemmas)?;

        let scored = self.score(pages, &lemmas)?;
        self.materialize(scored, Arc::new(rarest_first), Arc::new(lemma_set)).await
    }

    /// Query lemmas ordered by total frequency in scope, then by how many sites hold them.
    fn rarest_first(&self, texts: &[String], lemmas: &[Lemma]) -> Result<Vec<String>> {
        let mut frequency: HashMap<&str, u64> = HashMap::new();
        for lemma in lemmas {
            *frequency.entry(lemma.text.as_str()).or_insert(0) += u64::from(lemma.frequency);
        }
        let mut keyed = Vec::with_capacity(texts.len());
        for text in texts {
            let f = frequency.get(text.as_str()).copied().unwrap_or(0);
            keyed.push((f, self.store.count_sites_with_lemma(text)?, text.clone()));
        }
        keyed.sort();
        Ok(keyed.into_iter().map(|(_, _, text)| text).collect())
    }

    /// Raw relevance is the sum of matching posting weights, then divided by the
    /// best raw score. Ties keep encounter order.
    fn score(&self, pages: Vec<Page>, lemmas: &[Lemma]) -> Result<Vec<(Page, f64)>> {
        let page_ids: Vec<PageId> = pages.iter().map(|p| p.id).collect();
        let lemma_ids: Vec<_> = lemmas.iter().map(|l| l.id).collect();
        let mut raw: HashMap<PageId, f64> = HashMap::with_capacity(pages.len());
        for posting in self.store.postings_for(&page_ids, &lemma_ids)? {
            *raw.entry(posting.page_id).or_insert(0.0) += f64::from(posting.weight);
        }
        let max = raw.values().copied().fold(0.0, f64::max);
        let mut scored: Vec<(Page, f64)> = pages
            .into_iter()
            .map(|page| {
                let r = raw.get(&page.id).copied().unwrap_or(0.0);
                let relevance = if max > 0.0 { r / max } else { 0.0 };
                (page, relevance)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored)
    }

    /// Title and snippet for every hit, built on the blocking pool in parallel and
    /// collected back in rank order.
    async fn materialize(
        &self,
        scored: Vec<(Page, f64)>,
        rarest_first: Arc<Vec<String>>,
        lemma_set: Arc<HashSet<String>>,
    ) -> Result<Vec<SearchHit>> {
        let mut sites: HashMap<SiteId, Arc<Site>> = HashMap::new();
        let mut tasks = Vec::with_capacity(scored.len());
        for (page, relevance) in scored {
            let site = match sites.get(&page.site_id) {
                Some(site) => site.clone(),
                None => {
                    let Some(site) = self.store.site(page.site_id)? else { continue };
                    let site = Arc::new(site);
                    sites.insert(page.site_id, site.clone());
                    site
                }
            };
            let lemmatizer = self.lemmatizer.clone();
            let rarest_first = rarest_first.clone();
            let lemma_set = lemma_set.clone();
            tasks.push(tokio::task::spawn_blocking(move || {
                let text = lemmatizer.plain_text(&page.content);
                SearchHit {
                    site: site.url.clone(),
                    site_name: site.name.clone(),
                    uri: page.path.clone(),
                    title: page_title(&page.content),
                    snippet: snippet::build(lemmatizer.as_ref(), &text, &rarest_first, &lemma_set),
                    relevance,
                }
            }));
        }
        let mut hits = Vec::with_capacity(tasks.len());
        for task in tasks {
            hits.push(task.await.map_err(|e| EngineError::Task(e.to_string()))?);
        }
        Ok(hits)
    }
}
