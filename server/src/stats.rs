use search_core::{Result, SiteStatus, Storage};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct TotalStatistics {
    pub sites: usize,
    pub pages: usize,
    pub lemmas: usize,
    pub indexing: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteStatistics {
    pub url: String,
    pub name: String,
    pub status: SiteStatus,
    /// Unix seconds.
    pub status_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub pages: usize,
    pub lemmas: usize,
}

#[derive(Debug, Serialize)]
pub struct Statistics {
    pub total: TotalStatistics,
    pub detailed: Vec<SiteStatistics>,
}

pub fn collect(store: &dyn Storage, indexing: bool) -> Result<Statistics> {
    let mut detailed = Vec::new();
    for site in store.sites()? {
        detailed.push(SiteStatistics {
            pages: store.count_pages(site.id)?,
            lemmas: store.count_lemmas(site.id)?,
            url: site.url,
            name: site.name,
            status: site.status,
            status_time: site.status_time,
            error: site.last_error,
        });
    }
    let total = TotalStatistics {
        sites: detailed.len(),
        pages: detailed.iter().map(|s| s.pages).sum(),
        lemmas: detailed.iter().map(|s| s.lemmas).sum(),
        indexing,
    };
    Ok(Statistics { total, detailed })
}
