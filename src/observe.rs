use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
    sync::Mutex,
};

use anyhow::{Context, Result};
use serde::Serialize;
use url::Url;

/// Lifecycle state of a page. Transitions are monotonic:
/// `Pending -> Crawling -> (Success | Failed | Skipped)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PageStatus {
    Pending,
    Crawling,
    Success,
    Failed,
    Skipped,
}

/// Read-only sink of crawl lifecycle events. The engine invokes these from
/// multiple workers concurrently and never reads observer state back;
/// implementations serialize internally as needed.
pub trait Observer: Send + Sync {
    fn on_run_start(&self) {}

    /// A URL was admitted to the frontier at `depth`, discovered on `parent`
    /// (`None` for the seed).
    fn on_discovered(&self, url: &Url, depth: usize, parent: Option<&Url>) {
        let _ = (url, depth, parent);
    }

    /// A page changed state. `title` and `links_found` accompany `Success`;
    /// `error` accompanies `Failed` and `Skipped`.
    fn on_status(
        &self,
        url: &Url,
        status: PageStatus,
        title: Option<&str>,
        links_found: Option<usize>,
        error: Option<&str>,
    ) {
        let _ = (url, status, title, links_found, error);
    }

    fn on_run_end(&self) {}
}

pub struct NoopObserver;

impl Observer for NoopObserver {}

/// Fans events out to several observers in order.
pub struct MultiObserver {
    observers: Vec<Box<dyn Observer>>,
}

impl MultiObserver {
    pub fn new(observers: Vec<Box<dyn Observer>>) -> Self {
        Self { observers }
    }
}

impl Observer for MultiObserver {
    fn on_run_start(&self) {
        for o in &self.observers {
            o.on_run_start();
        }
    }

    fn on_discovered(&self, url: &Url, depth: usize, parent: Option<&Url>) {
        for o in &self.observers {
            o.on_discovered(url, depth, parent);
        }
    }

    fn on_status(
        &self,
        url: &Url,
        status: PageStatus,
        title: Option<&str>,
        links_found: Option<usize>,
        error: Option<&str>,
    ) {
        for o in &self.observers {
            o.on_status(url, status, title, links_found, error);
        }
    }

    fn on_run_end(&self) {
        for o in &self.observers {
            o.on_run_end();
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum CrawlEvent<'a> {
    RunStart,
    Discovered {
        url: &'a str,
        depth: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        parent: Option<&'a str>,
    },
    Status {
        url: &'a str,
        status: PageStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<&'a str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        links_found: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<&'a str>,
    },
    RunEnd,
}

/// Structured log writer: appends one JSON object per event to a file.
pub struct JsonlObserver {
    out: Mutex<BufWriter<File>>,
}

impl JsonlObserver {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("failed to create event log: {}", path.display()))?;
        Ok(Self {
            out: Mutex::new(BufWriter::new(file)),
        })
    }

    fn write(&self, event: &CrawlEvent<'_>) {
        let Ok(line) = serde_json::to_string(event) else {
            return;
        };
        let mut out = self.out.lock().expect("event log lock poisoned");
        let _ = writeln!(out, "{line}");
    }
}

impl Observer for JsonlObserver {
    fn on_run_start(&self) {
        self.write(&CrawlEvent::RunStart);
    }

    fn on_discovered(&self, url: &Url, depth: usize, parent: Option<&Url>) {
        self.write(&CrawlEvent::Discovered {
            url: url.as_str(),
            depth,
            parent: parent.map(Url::as_str),
        });
    }

    fn on_status(
        &self,
        url: &Url,
        status: PageStatus,
        title: Option<&str>,
        links_found: Option<usize>,
        error: Option<&str>,
    ) {
        self.write(&CrawlEvent::Status {
            url: url.as_str(),
            status,
            title,
            links_found,
            error,
        });
    }

    fn on_run_end(&self) {
        self.write(&CrawlEvent::RunEnd);
        if let Ok(mut out) = self.out.lock() {
            let _ = out.flush();
        }
    }
}
