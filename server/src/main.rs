use anyhow::{Context, Result};
use axum::Router;
use clap::Parser;
use crawler::HttpFetcher;
use search_core::{AppConfig, SledStore};
use server::{build_app, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
struct Args {
    /// JSON configuration file listing the sites to index
    #[arg(long, default_value = "./config.json")]
    config: String,
    /// Directory of the index database
    #[arg(long, default_value = "./data/index")]
    data: String,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();

    let config = Arc::new(AppConfig::from_file(&args.config).with_context(|| format!("loading {}", args.config))?);
    let store = Arc::new(SledStore::open(&args.data).with_context(|| format!("opening {}", args.data))?);
    let fetcher = Arc::new(HttpFetcher::new(&config)?);
    tracing::info!(sites = config.sites.len(), data = %args.data, "index opened");
    let app: Router = build_app(AppState::new(config, store.clone(), fetcher));

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    store.flush()?;
    Ok(())
}
