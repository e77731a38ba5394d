use anyhow::{Context, Result};
use clap::Parser;
use crawler::{HttpFetcher, IndexingContext, IndexingCoordinator, PageIndexer};
use search_core::{AppConfig, SledStore, Storage};
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "crawler")]
#[command(about = "Crawl the configured sites into the search index")]
struct Cli {
    /// JSON configuration file listing the sites to index
    #[arg(long, default_value = "./config.json")]
    config: String,
    /// Directory of the index database
    #[arg(long, default_value = "./data/index")]
    data: String,
    /// Re-index this single URL instead of crawling every site
    #[arg(long)]
    page: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Cli::parse();

    let config = Arc::new(AppConfig::from_file(&args.config).with_context(|| format!("loading {}", args.config))?);
    let store = Arc::new(SledStore::open(&args.data).with_context(|| format!("opening {}", args.data))?);
    let fetcher = Arc::new(HttpFetcher::new(&config)?);
    let ctx = IndexingContext::new(&config, store.clone(), fetcher);

    if let Some(url) = args.page {
        let outcome = PageIndexer::new(config.clone(), ctx).index_one(&url).await;
        store.flush()?;
        match outcome.error {
            None => tracing::info!(%url, "page indexed"),
            Some(e) => anyhow::bail!("indexing {url} failed ({}): {e}", outcome.status),
        }
        return Ok(());
    }

    let coordinator = IndexingCoordinator::new(config.clone(), ctx);
    let outcome = coordinator.start();
    if let Some(e) = outcome.error {
        anyhow::bail!(e);
    }
    tokio::select! {
        _ = coordinator.wait_until_idle() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupted, stopping");
            coordinator.stop();
            coordinator.wait_for_drain().await;
        }
    }
    store.flush()?;

    for site in store.sites()? {
        let at = OffsetDateTime::from_unix_timestamp(site.status_time)
            .ok()
            .and_then(|t| t.format(&Rfc3339).ok())
            .unwrap_or_default();
        tracing::info!(
            site = %site.url,
            status = %site.status,
            at,
            pages = store.count_pages(site.id)?,
            lemmas = store.count_lemmas(site.id)?,
            error = site.last_error.as_deref().unwrap_or(""),
            "site summary"
        );
    }
    Ok(())
}
