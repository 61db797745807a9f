use std::{
    collections::HashMap,
    fs,
    sync::{Arc, Mutex},
    time::Duration,
};

use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use wcb::canon::{default_exclude_patterns, SiteScope};
use wcb::engine::{CrawlEngine, CrawlOptions, CrawlSummary};
use wcb::fetch::{FetchOptions, HttpFetcher};
use wcb::observe::{Observer, PageStatus};
use wcb::storage::{FsStorage, Storage};

/// Records discovery and terminal events so tests can check the observer
/// invariants.
#[derive(Default)]
struct RecordingObserver {
    discovered: Mutex<Vec<String>>,
    terminal: Mutex<Vec<(String, PageStatus, Option<String>)>>,
}

impl Observer for RecordingObserver {
    fn on_discovered(&self, url: &Url, _depth: usize, _parent: Option<&Url>) {
        self.discovered
            .lock()
            .unwrap()
            .push(url.as_str().to_string());
    }

    fn on_status(
        &self,
        url: &Url,
        status: PageStatus,
        _title: Option<&str>,
        _links_found: Option<usize>,
        error: Option<&str>,
    ) {
        if matches!(
            status,
            PageStatus::Success | PageStatus::Failed | PageStatus::Skipped
        ) {
            self.terminal.lock().unwrap().push((
                url.as_str().to_string(),
                status,
                error.map(String::from),
            ));
        }
    }
}

fn html_page(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/html; charset=utf-8")
}

async fn run_crawl(
    seed: &Url,
    max_depth: Option<usize>,
    max_retries: u32,
    out: &TempDir,
) -> (CrawlSummary, Arc<RecordingObserver>, Arc<FsStorage>) {
    let scope = SiteScope::new(seed, true, default_exclude_patterns());
    let fetcher = HttpFetcher::new(
        FetchOptions {
            timeout: Duration::from_secs(5),
            max_retries,
            ..FetchOptions::default()
        },
        4,
    )
    .unwrap();
    let storage = Arc::new(FsStorage::new(out.path().to_path_buf(), "merged.md"));
    let observer = Arc::new(RecordingObserver::default());

    let engine = CrawlEngine::new(
        CrawlOptions {
            max_concurrent: 4,
            max_depth,
            delay_between_requests: Duration::ZERO,
            poll_interval: Duration::from_millis(100),
        },
        scope,
        fetcher,
        observer.clone() as Arc<dyn Observer>,
        storage.clone() as Arc<dyn Storage>,
    );

    let summary = engine.run(seed).await.unwrap();
    (summary, observer, storage)
}

async fn requests_for(server: &MockServer, p: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == p)
        .count()
}

#[tokio::test]
async fn crawls_a_link_cycle_exactly_once_and_terminates() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_page(
            r#"<html><body><main><h1>Root</h1><a href="/a">a</a></main></body></html>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(html_page(
            r#"<html><body><main><h1>A</h1><a href="/b">b</a></main></body></html>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(html_page(
            r#"<html><body><main><h1>B</h1><a href="/">home</a></main></body></html>"#,
        ))
        .mount(&server)
        .await;

    let seed = Url::parse(&server.uri()).unwrap();
    let out = TempDir::new().unwrap();
    let (summary, observer, storage) = run_crawl(&seed, None, 3, &out).await;

    assert_eq!(summary.pages_crawled, 3);
    assert_eq!(requests_for(&server, "/").await, 1);
    assert_eq!(requests_for(&server, "/a").await, 1);
    assert_eq!(requests_for(&server, "/b").await, 1);

    // Every terminal event was preceded by exactly one discovery.
    let discovered = observer.discovered.lock().unwrap().clone();
    let terminal = observer.terminal.lock().unwrap().clone();
    let mut discovery_counts: HashMap<&str, usize> = HashMap::new();
    for url in &discovered {
        *discovery_counts.entry(url.as_str()).or_default() += 1;
    }
    assert!(discovery_counts.values().all(|&n| n == 1));
    for (url, _, _) in &terminal {
        assert_eq!(discovery_counts.get(url.as_str()), Some(&1), "{url}");
    }

    // One file per SUCCESS event.
    let page_files = fs::read_dir(storage.pages_dir()).unwrap().count();
    assert_eq!(page_files, 3);
    assert_eq!(storage.saved_count(), 3);
}

#[tokio::test]
async fn deduplicates_urls_differing_only_in_query_order() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_page(
            r#"<html><body><main><h1>Root</h1>
               <a href="/x?b=2&amp;a=1">one</a>
               <a href="/x?a=1&amp;b=2">two</a></main></body></html>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/x"))
        .respond_with(html_page(
            r#"<html><body><main><h1>X</h1><p>x page</p></main></body></html>"#,
        ))
        .mount(&server)
        .await;

    let seed = Url::parse(&server.uri()).unwrap();
    let out = TempDir::new().unwrap();
    let (summary, _observer, _storage) = run_crawl(&seed, None, 3, &out).await;

    assert_eq!(summary.pages_crawled, 2);
    assert_eq!(requests_for(&server, "/x").await, 1);
}

#[tokio::test]
async fn depth_limit_stops_enqueueing_children() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_page(
            r#"<html><body><main><h1>Root</h1><a href="/a">a</a></main></body></html>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(html_page(
            r#"<html><body><main><h1>A</h1><a href="/b">b</a></main></body></html>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(html_page(
            r#"<html><body><main><h1>B</h1><a href="/c">c</a></main></body></html>"#,
        ))
        .mount(&server)
        .await;

    let seed = Url::parse(&server.uri()).unwrap();
    let out = TempDir::new().unwrap();
    let (summary, observer, _storage) = run_crawl(&seed, Some(1), 3, &out).await;

    assert_eq!(summary.pages_crawled, 2);
    assert_eq!(requests_for(&server, "/b").await, 0);

    let discovered = observer.discovered.lock().unwrap().clone();
    assert!(discovered.iter().all(|u| !u.ends_with("/b")));
}

#[tokio::test]
async fn seed_only_crawl_at_depth_zero() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_page(
            r#"<html><body><main><h1>Root</h1><a href="/a">a</a></main></body></html>"#,
        ))
        .mount(&server)
        .await;

    let seed = Url::parse(&server.uri()).unwrap();
    let out = TempDir::new().unwrap();
    let (summary, _observer, _storage) = run_crawl(&seed, Some(0), 3, &out).await;

    assert_eq!(summary.pages_crawled, 1);
    assert_eq!(requests_for(&server, "/a").await, 0);
}

#[tokio::test]
async fn retries_transient_server_errors_with_backoff() {
    let server = MockServer::start().await;
    // Two failures, then success. Earlier mocks win until exhausted.
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_page(
            r#"<html><body><main><h1>Recovered</h1><p>ok</p></main></body></html>"#,
        ))
        .mount(&server)
        .await;

    let seed = Url::parse(&server.uri()).unwrap();
    let out = TempDir::new().unwrap();
    let start = std::time::Instant::now();
    let (summary, _observer, _storage) = run_crawl(&seed, None, 3, &out).await;
    let elapsed = start.elapsed();

    assert_eq!(summary.pages_crawled, 1);
    assert_eq!(requests_for(&server, "/").await, 3);
    // Backoffs of ~1s and ~2s between the three attempts.
    assert!(elapsed >= Duration::from_secs(3), "elapsed {elapsed:?}");
}

#[tokio::test]
async fn permanent_failures_are_skipped_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_page(
            r#"<html><body><main><h1>Root</h1><a href="/gone">gone</a></main></body></html>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let seed = Url::parse(&server.uri()).unwrap();
    let out = TempDir::new().unwrap();
    let (summary, observer, _storage) = run_crawl(&seed, None, 3, &out).await;

    assert_eq!(summary.pages_crawled, 1);
    assert_eq!(summary.pages_skipped, 1);
    assert_eq!(requests_for(&server, "/gone").await, 1);

    let terminal = observer.terminal.lock().unwrap().clone();
    let gone = terminal.iter().find(|(u, _, _)| u.ends_with("/gone")).unwrap();
    assert_eq!(gone.1, PageStatus::Skipped);
    assert!(gone.2.as_deref().unwrap().contains("404"));
}

#[tokio::test]
async fn non_html_pages_are_skipped_and_excluded_extensions_never_fetched() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_page(
            r#"<html><body><main><h1>Root</h1>
               <a href="/gen.php">json</a>
               <a href="/paper.pdf">paper</a></main></body></html>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gen.php"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("{\"not\": \"html\"}".to_string(), "application/json"),
        )
        .mount(&server)
        .await;

    let seed = Url::parse(&server.uri()).unwrap();
    let out = TempDir::new().unwrap();
    let (summary, observer, _storage) = run_crawl(&seed, None, 3, &out).await;

    assert_eq!(summary.pages_crawled, 1);
    assert_eq!(summary.pages_skipped, 1);
    // The PDF was dropped at admission; no request, no events.
    assert_eq!(requests_for(&server, "/paper.pdf").await, 0);
    let discovered = observer.discovered.lock().unwrap().clone();
    assert!(discovered.iter().all(|u| !u.ends_with(".pdf")));

    let terminal = observer.terminal.lock().unwrap().clone();
    let skipped = terminal
        .iter()
        .find(|(u, _, _)| u.ends_with("/gen.php"))
        .unwrap();
    assert_eq!(skipped.1, PageStatus::Skipped);
    assert!(skipped.2.as_deref().unwrap().contains("not HTML"));
}

#[tokio::test]
async fn merged_output_is_identical_across_runs() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_page(
            r#"<html><body><main><h1>Root</h1>
               <a href="/a">a</a><a href="/b">b</a></main></body></html>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(html_page(
            r#"<html><body><main><h1>A</h1><p>alpha</p></main></body></html>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(html_page(
            r#"<html><body><main><h1>B</h1><p>beta</p></main></body></html>"#,
        ))
        .mount(&server)
        .await;

    let seed = Url::parse(&server.uri()).unwrap();

    let out1 = TempDir::new().unwrap();
    let (_, _, storage1) = run_crawl(&seed, None, 3, &out1).await;
    let merged1 = fs::read(storage1.merge().unwrap()).unwrap();

    let out2 = TempDir::new().unwrap();
    let (_, _, storage2) = run_crawl(&seed, None, 3, &out2).await;
    let merged2 = fs::read(storage2.merge().unwrap()).unwrap();

    assert_eq!(merged1, merged2);
}
