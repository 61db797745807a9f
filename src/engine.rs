use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{Context, Result};
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    canon::{self, SiteScope},
    fetch::Fetcher,
    frontier::{Frontier, FrontierItem},
    observe::{Observer, PageStatus},
    reduce,
    storage::Storage,
};

#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub max_concurrent: usize,
    /// `None` means unlimited. With `Some(0)` the seed is processed but no
    /// children are ever enqueued.
    pub max_depth: Option<usize>,
    pub delay_between_requests: Duration,
    /// How long a worker waits on an empty queue before re-checking the
    /// termination predicate.
    pub poll_interval: Duration,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            max_depth: None,
            delay_between_requests: Duration::from_millis(100),
            poll_interval: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CrawlSummary {
    pub pages_crawled: usize,
    pub pages_failed: usize,
    pub pages_skipped: usize,
}

/// The crawl coordinator: a pool of `max_concurrent` workers feeding a
/// self-refilling frontier. The engine owns the permits and the in-flight
/// counter; observer and storage are borrowed capabilities it only invokes.
pub struct CrawlEngine<F> {
    inner: Arc<EngineInner<F>>,
}

struct EngineInner<F> {
    opts: CrawlOptions,
    scope: SiteScope,
    fetcher: F,
    frontier: Frontier,
    observer: Arc<dyn Observer>,
    storage: Arc<dyn Storage>,
    permits: Semaphore,
    in_flight: Mutex<usize>,
    success: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
}

impl<F: Fetcher> CrawlEngine<F> {
    pub fn new(
        opts: CrawlOptions,
        scope: SiteScope,
        fetcher: F,
        observer: Arc<dyn Observer>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        let permits = Semaphore::new(opts.max_concurrent.max(1));
        Self {
            inner: Arc::new(EngineInner {
                opts,
                scope,
                fetcher,
                frontier: Frontier::new(),
                observer,
                storage,
                permits,
                in_flight: Mutex::new(0),
                success: AtomicUsize::new(0),
                failed: AtomicUsize::new(0),
                skipped: AtomicUsize::new(0),
            }),
        }
    }

    /// Crawl breadth-first from `seed` until the frontier drains and no
    /// worker holds an item. Workers never let an error escape; every
    /// admitted URL ends in exactly one terminal observer event.
    pub async fn run(&self, seed: &Url) -> Result<CrawlSummary> {
        let inner = &self.inner;

        inner.storage.begin()?;
        inner.observer.on_run_start();

        let seed = canon::canonical(seed.clone());
        inner.observer.on_discovered(&seed, 0, None);
        if inner.frontier.try_admit(&seed) {
            inner.frontier.push(FrontierItem {
                url: seed.clone(),
                depth: 0,
                parent: None,
            });
        }

        info!(%seed, workers = inner.opts.max_concurrent, max_depth = ?inner.opts.max_depth, "starting crawl");

        let mut workers: JoinSet<()> = JoinSet::new();
        for worker_id in 0..inner.opts.max_concurrent.max(1) {
            let inner = Arc::clone(&self.inner);
            workers.spawn(async move { worker(worker_id, inner).await });
        }
        while let Some(res) = workers.join_next().await {
            res.context("crawl worker panicked")?;
        }

        inner.observer.on_run_end();

        let summary = CrawlSummary {
            pages_crawled: inner.success.load(Ordering::Relaxed),
            pages_failed: inner.failed.load(Ordering::Relaxed),
            pages_skipped: inner.skipped.load(Ordering::Relaxed),
        };
        info!(
            crawled = summary.pages_crawled,
            failed = summary.pages_failed,
            skipped = summary.pages_skipped,
            discovered = inner.frontier.seen_count(),
            "crawl finished"
        );
        Ok(summary)
    }
}

/// Worker loop: poll, process, repeat. A poll timeout with an empty queue
/// and a zero in-flight count means no item exists and none can appear, so
/// the worker exits.
async fn worker<F: Fetcher>(worker_id: usize, inner: Arc<EngineInner<F>>) {
    loop {
        let Some(item) = inner.frontier.pop(inner.opts.poll_interval).await else {
            let idle = *inner.in_flight.lock().expect("in-flight lock poisoned") == 0;
            if idle && inner.frontier.is_empty() {
                debug!(worker_id, "frontier drained, exiting");
                return;
            }
            continue;
        };

        *inner.in_flight.lock().expect("in-flight lock poisoned") += 1;
        process(&inner, &item).await;
        *inner.in_flight.lock().expect("in-flight lock poisoned") -= 1;
    }
}

async fn process<F: Fetcher>(inner: &EngineInner<F>, item: &FrontierItem) {
    let _permit = inner
        .permits
        .acquire()
        .await
        .expect("engine semaphore closed");
    let url = &item.url;

    inner
        .observer
        .on_status(url, PageStatus::Crawling, None, None, None);
    debug!(%url, depth = item.depth, "fetching");

    let html = match inner.fetcher.fetch(url).await {
        Ok(body) => body,
        Err(e) => {
            debug!(%url, reason = %e, "skipped");
            inner.skipped.fetch_add(1, Ordering::Relaxed);
            inner
                .observer
                .on_status(url, PageStatus::Skipped, None, None, Some(&e.to_string()));
            return;
        }
    };

    let reduced = match reduce::reduce(&html, url) {
        Ok(r) => r,
        Err(e) => {
            warn!(%url, error = %e, "reduce failed");
            inner.failed.fetch_add(1, Ordering::Relaxed);
            inner
                .observer
                .on_status(url, PageStatus::Failed, None, None, Some(&format!("{e:#}")));
            return;
        }
    };

    if let Err(e) = inner.storage.save(url, &reduced.markdown) {
        warn!(%url, error = %e, "save failed");
        inner.failed.fetch_add(1, Ordering::Relaxed);
        inner
            .observer
            .on_status(url, PageStatus::Failed, None, None, Some(&format!("{e:#}")));
        return;
    }

    inner.success.fetch_add(1, Ordering::Relaxed);
    inner.observer.on_status(
        url,
        PageStatus::Success,
        Some(&reduced.title),
        Some(reduced.links.len()),
        None,
    );

    let next_depth = item.depth + 1;
    let within_depth = inner.opts.max_depth.is_none_or(|max| next_depth <= max);
    if within_depth {
        for link in &reduced.links {
            let candidate = canon::canonical(link.clone());
            if !inner.scope.admit(&candidate) {
                continue;
            }
            if inner.frontier.try_admit(&candidate) {
                inner
                    .observer
                    .on_discovered(&candidate, next_depth, Some(url));
                inner.frontier.push(FrontierItem {
                    url: candidate,
                    depth: next_depth,
                    parent: Some(url.clone()),
                });
            }
        }
    }

    if !inner.opts.delay_between_requests.is_zero() {
        tokio::time::sleep(inner.opts.delay_between_requests).await;
    }
}
