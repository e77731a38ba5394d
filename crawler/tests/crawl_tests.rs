use crawler::{
    IndexingContext, IndexingCoordinator, MemoryFetcher, PageIndexer, ALREADY_RUNNING, NOT_RUNNING, OUTSIDE_SITES,
    STOPPED_BY_USER,
};
use search_core::testing::{FaultyStore, Faults};
use search_core::{AppConfig, SiteConfig, SiteStatus, SledStore, Storage};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const ROOT: &str = "https://a.test";

fn config(workers: usize) -> Arc<AppConfig> {
    let config = AppConfig {
        sites: vec![SiteConfig { url: format!("{ROOT}/"), name: "A".into() }],
        workers,
        politeness_delay_ms: 0,
        ..AppConfig::default()
    };
    Arc::new(config.normalized().unwrap())
}

fn setup(fetcher: MemoryFetcher, workers: usize) -> (Arc<SledStore>, Arc<MemoryFetcher>, Arc<IndexingCoordinator>) {
    let config = config(workers);
    let store = Arc::new(SledStore::temporary().unwrap());
    let fetcher = Arc::new(fetcher);
    let ctx = IndexingContext::new(&config, store.clone(), fetcher.clone());
    (store, fetcher, IndexingCoordinator::new(config, ctx))
}

async fn run_to_completion(coordinator: &Arc<IndexingCoordinator>) {
    let outcome = coordinator.start();
    assert!(outcome.result, "{outcome:?}");
    tokio::time::timeout(Duration::from_secs(10), coordinator.wait_until_idle())
        .await
        .expect("crawl did not finish");
}

fn site_graph() -> MemoryFetcher {
    MemoryFetcher::new()
        .page(ROOT, r#"<title>Home</title><a href="/a">a</a><a href="/b">b</a>"#)
        .page(&format!("{ROOT}/a"), r#"<p>rust crabs</p><a href="/b">b</a><a href="/c">c</a><a href="/">home</a>"#)
        .page(&format!("{ROOT}/b"), r#"<p>rust river</p><a href="/a">a</a>"#)
        .page(&format!("{ROOT}/c"), r#"<p>crab</p><a href="https://a.test">home</a>"#)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_reachable_page_is_fetched_once() {
    let (store, fetcher, coordinator) = setup(site_graph(), 3);
    run_to_completion(&coordinator).await;

    let site = store.site_by_url(ROOT).unwrap().unwrap();
    assert_eq!(site.status, SiteStatus::Indexed);
    assert_eq!(site.last_error, None);
    assert_eq!(store.count_pages(site.id).unwrap(), 4);
    for path in ["/", "/a", "/b", "/c"] {
        assert!(store.page_exists(site.id, path).unwrap(), "missing {path}");
        assert_eq!(fetcher.hits(&format!("{ROOT}{path}")), 1, "{path} fetched more than once");
    }
    assert_eq!(fetcher.total_hits(), 4);
    assert_eq!(store.lemma(site.id, "rust").unwrap().unwrap().frequency, 2);
    assert!(!coordinator.is_indexing());
}

#[tokio::test]
async fn filtered_links_are_never_fetched() {
    let fetcher = MemoryFetcher::new()
        .page(
            ROOT,
            r#"<a href="/doc.PDF">pdf</a><a href="/a#part">frag</a><a href="https://b.test/x">other</a>
               <a href="/img/logo.png">img</a><a href="/missing">gone</a><a href="/ok">ok</a>"#,
        )
        .page(&format!("{ROOT}/ok"), "<p>fine</p>");
    let (store, fetcher, coordinator) = setup(fetcher, 2);
    run_to_completion(&coordinator).await;

    assert_eq!(fetcher.hits(&format!("{ROOT}/doc.PDF")), 0);
    assert_eq!(fetcher.hits(&format!("{ROOT}/a")), 0);
    assert_eq!(fetcher.hits("https://b.test/x"), 0);
    assert_eq!(fetcher.hits(&format!("{ROOT}/img/logo.png")), 0);
    // a 404 is fetched, skipped, and does not fail the site
    assert_eq!(fetcher.hits(&format!("{ROOT}/missing")), 1);

    let site = store.site_by_url(ROOT).unwrap().unwrap();
    assert_eq!(site.status, SiteStatus::Indexed);
    let paths: HashSet<_> = ["/", "/ok"].into_iter().collect();
    for path in &paths {
        assert!(store.page_exists(site.id, path).unwrap());
    }
    assert_eq!(store.count_pages(site.id).unwrap(), paths.len());
}

#[tokio::test]
async fn transport_error_fails_the_site() {
    let fetcher = MemoryFetcher::new()
        .page(ROOT, r#"<a href="/down">down</a><a href="/up">up</a>"#)
        .page(&format!("{ROOT}/up"), "<p>up</p>")
        .failure(&format!("{ROOT}/down"), "connection reset");
    let (store, _, coordinator) = setup(fetcher, 2);
    run_to_completion(&coordinator).await;

    let site = store.site_by_url(ROOT).unwrap().unwrap();
    assert_eq!(site.status, SiteStatus::Failed);
    assert!(site.last_error.unwrap().contains("connection reset"));
    assert!(store.page_exists(site.id, "/up").unwrap());
}

#[tokio::test]
async fn second_start_is_rejected_while_running() {
    let fetcher = site_graph().latency(Duration::from_millis(20));
    let (_, _, coordinator) = setup(fetcher, 1);

    assert!(coordinator.start().result);
    let again = coordinator.start();
    assert!(!again.result);
    assert_eq!(again.status, 400);
    assert_eq!(again.error.as_deref(), Some(ALREADY_RUNNING));

    tokio::time::timeout(Duration::from_secs(10), coordinator.wait_until_idle()).await.unwrap();
    assert!(coordinator.start().result, "a finished run frees the gate");
    coordinator.wait_until_idle().await;
}

#[tokio::test]
async fn stop_while_idle_is_rejected() {
    let (_, _, coordinator) = setup(site_graph(), 1);
    let outcome = coordinator.stop();
    assert!(!outcome.result);
    assert_eq!(outcome.status, 400);
    assert_eq!(outcome.error.as_deref(), Some(NOT_RUNNING));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_fails_sites_still_indexing() {
    let mut fetcher = MemoryFetcher::new().latency(Duration::from_millis(30));
    for i in 0..20 {
        fetcher = fetcher.page(&format!("{ROOT}/p{i}"), &format!(r#"<a href="/p{}">next</a>"#, i + 1));
    }
    fetcher = fetcher.page(ROOT, r#"<a href="/p0">first</a>"#);
    let (store, fetcher, coordinator) = setup(fetcher, 1);

    assert!(coordinator.start().result);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(coordinator.stop().result);
    assert!(!coordinator.is_indexing());
    coordinator.wait_until_idle().await;
    coordinator.wait_for_drain().await;

    assert!(store.sites_by_status(SiteStatus::Indexing).unwrap().is_empty());
    let site = store.site_by_url(ROOT).unwrap().unwrap();
    assert_eq!(site.status, SiteStatus::Failed);
    assert_eq!(site.last_error.as_deref(), Some(STOPPED_BY_USER));
    assert!(fetcher.total_hits() < 21);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn start_right_after_stop_waits_for_the_old_run() {
    let fetcher = MemoryFetcher::new()
        .latency(Duration::from_millis(150))
        .page(ROOT, r#"<a href="/a">a</a>"#)
        .page(&format!("{ROOT}/a"), r#"<p>rust</p><a href="/b">b</a>"#)
        .page(&format!("{ROOT}/b"), "<p>rust crabs</p>");
    let (store, fetcher, coordinator) = setup(fetcher, 1);

    assert!(coordinator.start().result);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(coordinator.stop().result);
    run_to_completion(&coordinator).await;

    let site = store.site_by_url(ROOT).unwrap().unwrap();
    assert_eq!(site.status, SiteStatus::Indexed);
    assert_eq!(site.last_error, None);
    assert_eq!(store.count_pages(site.id).unwrap(), 3);
    assert_eq!(store.lemma(site.id, "rust").unwrap().unwrap().frequency, 2);
    // the stopped run fetched the root and followed nothing
    assert_eq!(fetcher.hits(ROOT), 2);
    assert_eq!(fetcher.total_hits(), 4);
}

#[tokio::test]
async fn crashed_purge_fails_the_site() {
    let config = config(1);
    let store = Arc::new(FaultyStore::new(Faults { page_scan_panic: true, ..Faults::default() }).unwrap());
    let fetcher = Arc::new(site_graph());
    let ctx = IndexingContext::new(&config, store.clone(), fetcher.clone());
    let coordinator = IndexingCoordinator::new(config, ctx);
    run_to_completion(&coordinator).await;

    let site = store.site_by_url(ROOT).unwrap().unwrap();
    assert_eq!(site.status, SiteStatus::Failed);
    assert!(site.last_error.is_some());
    assert_eq!(fetcher.total_hits(), 0);
}

#[tokio::test]
async fn lookalike_hosts_are_not_crawled() {
    let fetcher = MemoryFetcher::new()
        .page(ROOT, r#"<a href="https://a.test.evil.org/steal">x</a><a href="https://a.testing.org/">y</a><a href="/ok">ok</a>"#)
        .page("https://a.test.evil.org/steal", "<p>foreign</p>")
        .page("https://a.testing.org/", "<p>foreign</p>")
        .page(&format!("{ROOT}/ok"), "<p>local</p>");
    let (store, fetcher, coordinator) = setup(fetcher, 2);
    run_to_completion(&coordinator).await;

    let site = store.site_by_url(ROOT).unwrap().unwrap();
    assert_eq!(store.count_pages(site.id).unwrap(), 2);
    assert_eq!(fetcher.hits("https://a.test.evil.org/steal"), 0);
    assert_eq!(fetcher.hits("https://a.testing.org/"), 0);
}

#[tokio::test]
async fn new_run_replaces_previous_pages() {
    let (store, fetcher, coordinator) = setup(site_graph(), 2);
    run_to_completion(&coordinator).await;
    run_to_completion(&coordinator).await;

    let site = store.site_by_url(ROOT).unwrap().unwrap();
    assert_eq!(site.status, SiteStatus::Indexed);
    assert_eq!(store.count_pages(site.id).unwrap(), 4);
    assert_eq!(fetcher.hits(ROOT), 2);
    assert_eq!(store.lemma(site.id, "rust").unwrap().unwrap().frequency, 2);
}

fn page_indexer(fetcher: MemoryFetcher) -> (Arc<SledStore>, PageIndexer) {
    let config = config(1);
    let store = Arc::new(SledStore::temporary().unwrap());
    let ctx = IndexingContext::new(&config, store.clone(), Arc::new(fetcher));
    (store, PageIndexer::new(config, ctx))
}

#[tokio::test]
async fn index_one_replaces_the_stored_page() {
    let url = format!("{ROOT}/a");
    let (store, indexer) = page_indexer(MemoryFetcher::new().page(&url, "<p>rust crabs rust</p>"));

    for _ in 0..2 {
        let outcome = indexer.index_one(&url).await;
        assert!(outcome.result, "{outcome:?}");
        assert_eq!(outcome.status, 200);
    }

    let site = store.site_by_url(ROOT).unwrap().unwrap();
    assert_eq!(site.status, SiteStatus::Indexed);
    assert_eq!(store.count_pages(site.id).unwrap(), 1);
    let rust = store.lemma(site.id, "rust").unwrap().unwrap();
    assert_eq!(rust.frequency, 1);
    let page = store.page(site.id, "/a").unwrap().unwrap();
    let postings = store.postings_for(&[page.id], &[rust.id]).unwrap();
    assert_eq!(postings.len(), 1);
    assert_eq!(postings[0].weight, 2.0);
}

#[tokio::test]
async fn index_one_rejects_foreign_urls() {
    let (store, indexer) = page_indexer(MemoryFetcher::new());
    let outcome = indexer.index_one("https://elsewhere.test/a").await;
    assert_eq!(outcome.status, 400);
    assert_eq!(outcome.error.as_deref(), Some(OUTSIDE_SITES));
    assert!(store.sites().unwrap().is_empty());
}

#[tokio::test]
async fn index_one_rejects_lookalike_hosts() {
    let fetcher = MemoryFetcher::new().page("https://a.testing.org/x", "<p>rust</p>");
    let (store, indexer) = page_indexer(fetcher);
    for url in ["https://a.testing.org/x", "https://a.test.evil.org/"] {
        let outcome = indexer.index_one(url).await;
        assert_eq!(outcome.status, 400, "{url}");
        assert_eq!(outcome.error.as_deref(), Some(OUTSIDE_SITES));
    }
    assert!(store.sites().unwrap().is_empty());
}

#[tokio::test]
async fn index_one_surfaces_upstream_status() {
    let url = format!("{ROOT}/gone");
    let (store, indexer) = page_indexer(MemoryFetcher::new().status(&url, 410, "gone"));
    let outcome = indexer.index_one(&url).await;
    assert!(!outcome.result);
    assert_eq!(outcome.status, 410);
    assert_eq!(outcome.error.as_deref(), Some("HTTP status 410"));

    let missing = indexer.index_one(&format!("{ROOT}/nothing")).await;
    assert_eq!(missing.status, 404);
    let site = store.site_by_url(ROOT).unwrap().unwrap();
    assert_eq!(store.count_pages(site.id).unwrap(), 0);
}

#[tokio::test]
async fn index_one_reports_transport_errors() {
    let url = format!("{ROOT}/flaky");
    let (_, indexer) = page_indexer(MemoryFetcher::new().failure(&url, "timed out"));
    let outcome = indexer.index_one(&url).await;
    assert_eq!(outcome.status, 500);
    assert!(outcome.error.unwrap().contains("timed out"));
}
