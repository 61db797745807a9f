use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use url::Url;

use crate::observe::{Observer, PageStatus};

/// Terminal progress display: a single bar tracking completed pages against
/// pages discovered so far, with per-status tallies in the message slot.
pub struct ProgressObserver {
    bar: ProgressBar,
    success: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
}

impl ProgressObserver {
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} [{elapsed_precise}] {bar:30} {pos}/{len} pages {msg}",
            )
            .expect("static progress template"),
        );
        bar.enable_steady_tick(Duration::from_millis(120));
        Self {
            bar,
            success: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
        }
    }

    fn refresh_message(&self) {
        let ok = self.success.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let skipped = self.skipped.load(Ordering::Relaxed);
        self.bar
            .set_message(format!("(ok {ok}, failed {failed}, skipped {skipped})"));
    }
}

impl Default for ProgressObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl Observer for ProgressObserver {
    fn on_discovered(&self, _url: &Url, _depth: usize, _parent: Option<&Url>) {
        self.bar.inc_length(1);
    }

    fn on_status(
        &self,
        _url: &Url,
        status: PageStatus,
        _title: Option<&str>,
        _links_found: Option<usize>,
        _error: Option<&str>,
    ) {
        match status {
            PageStatus::Success => {
                self.success.fetch_add(1, Ordering::Relaxed);
            }
            PageStatus::Failed => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
            PageStatus::Skipped => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
            }
            PageStatus::Pending | PageStatus::Crawling => return,
        }
        self.bar.inc(1);
        self.refresh_message();
    }

    fn on_run_end(&self) {
        self.refresh_message();
        self.bar.finish();
    }
}
