use std::{env, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::{
    canon::{self, SiteScope},
    engine::{CrawlEngine, CrawlOptions},
    fetch::{FetchOptions, HttpFetcher},
    observe::{JsonlObserver, MultiObserver, NoopObserver, Observer},
    progress::ProgressObserver,
    storage::{FsStorage, Storage},
    util,
};

#[derive(Debug, Clone)]
struct CliOptions {
    output: PathBuf,
    concurrent: usize,
    depth: Option<usize>,
    delay_secs: f64,
    timeout_secs: u64,
    max_retries: u32,
    cross_subdomain: bool,
    no_progress: bool,
    no_merge: bool,
    merged_name: Option<String>,
    user_agent: Option<String>,
    events: Option<PathBuf>,
}

impl Default for CliOptions {
    fn default() -> Self {
        Self {
            output: PathBuf::from("./output"),
            concurrent: 5,
            depth: None,
            delay_secs: 0.1,
            timeout_secs: 30,
            max_retries: 3,
            cross_subdomain: false,
            no_progress: false,
            no_merge: false,
            merged_name: None,
            user_agent: None,
            events: None,
        }
    }
}

/// Parse flags, run the crawl, merge, and report. Returns the process exit
/// code: 0 with at least one page crawled, 1 otherwise, 130 on interrupt.
pub async fn run() -> Result<i32> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let argv: Vec<String> = env::args().skip(1).collect();
    let (opts, positional) = parse_flags(argv)?;

    let raw_seed = positional
        .first()
        .ok_or_else(|| anyhow!("missing URL (see --help)"))?;
    let seed = Url::parse(&util::ensure_scheme(raw_seed))
        .with_context(|| format!("invalid URL: {raw_seed}"))?;
    let seed = canon::canonical(seed);

    print_banner();
    println!("Starting crawl: {seed}");
    println!("Output directory: {}", opts.output.display());
    println!(
        "Max concurrent: {} | Max depth: {}",
        opts.concurrent,
        opts.depth
            .map_or_else(|| "unlimited".to_string(), |d| d.to_string())
    );
    println!(
        "Subdomain restriction: {}",
        if opts.cross_subdomain {
            "cross-subdomain allowed"
        } else {
            "same subdomain only"
        }
    );
    println!();

    let scope = SiteScope::new(
        &seed,
        !opts.cross_subdomain,
        canon::default_exclude_patterns(),
    );

    let mut fetch_opts = FetchOptions {
        timeout: Duration::from_secs(opts.timeout_secs),
        max_retries: opts.max_retries,
        ..FetchOptions::default()
    };
    if let Some(ua) = &opts.user_agent {
        fetch_opts.user_agent = ua.clone();
    }
    let fetcher = HttpFetcher::new(fetch_opts, opts.concurrent)?;

    let merged_name = opts
        .merged_name
        .clone()
        .unwrap_or_else(|| util::merged_filename_for(&seed));
    let storage = Arc::new(FsStorage::new(opts.output.clone(), &merged_name));

    let mut observers: Vec<Box<dyn Observer>> = Vec::new();
    if !opts.no_progress {
        observers.push(Box::new(ProgressObserver::new()));
    }
    if let Some(path) = &opts.events {
        observers.push(Box::new(JsonlObserver::create(path)?));
    }
    let observer: Arc<dyn Observer> = if observers.is_empty() {
        Arc::new(NoopObserver)
    } else {
        Arc::new(MultiObserver::new(observers))
    };

    let crawl_opts = CrawlOptions {
        max_concurrent: opts.concurrent,
        max_depth: opts.depth,
        delay_between_requests: Duration::from_secs_f64(opts.delay_secs.max(0.0)),
        ..CrawlOptions::default()
    };

    let engine = CrawlEngine::new(
        crawl_opts,
        scope,
        fetcher,
        observer,
        storage.clone() as Arc<dyn Storage>,
    );

    let crawl = engine.run(&seed);
    tokio::pin!(crawl);
    let summary = tokio::select! {
        res = &mut crawl => res?,
        // Dropping the crawl future aborts the workers; partial pages are
        // already on disk and the merge is skipped.
        _ = tokio::signal::ctrl_c() => {
            println!("\nCrawl interrupted by user");
            return Ok(130);
        }
    };

    if summary.pages_crawled == 0 {
        println!("No pages were successfully crawled.");
        return Ok(1);
    }
    println!("Successfully crawled {} pages", summary.pages_crawled);
    if summary.pages_skipped > 0 || summary.pages_failed > 0 {
        println!(
            "({} skipped, {} failed)",
            summary.pages_skipped, summary.pages_failed
        );
    }

    if !opts.no_merge {
        println!("Merging pages into single file...");
        let merged = storage.merge()?;
        println!("Merged file created: {}", merged.display());
    }

    println!();
    println!("Output files:");
    println!("  Individual pages: {}", storage.pages_dir().display());
    if !opts.no_merge {
        println!("  Merged file: {}", storage.merged_path().display());
    }

    Ok(0)
}

fn parse_flags(argv: Vec<String>) -> Result<(CliOptions, Vec<String>)> {
    let mut opts = CliOptions::default();
    let mut positional: Vec<String> = Vec::new();

    let mut i = 0;
    while i < argv.len() {
        let t = &argv[i];

        if t == "--" {
            positional.extend(argv[i + 1..].iter().cloned());
            break;
        }

        match t.as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-V" | "--version" => {
                println!("wcb {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "-o" | "--output" => {
                let v = argv
                    .get(i + 1)
                    .ok_or_else(|| anyhow!("--output requires a value"))?;
                opts.output = PathBuf::from(v);
                i += 2;
            }
            "-c" | "--concurrent" => {
                let v = argv
                    .get(i + 1)
                    .ok_or_else(|| anyhow!("--concurrent requires a value"))?;
                opts.concurrent = v.parse::<usize>().context("invalid --concurrent")?;
                if opts.concurrent == 0 {
                    return Err(anyhow!("--concurrent must be at least 1"));
                }
                i += 2;
            }
            "-d" | "--depth" => {
                let v = argv
                    .get(i + 1)
                    .ok_or_else(|| anyhow!("--depth requires a value"))?;
                opts.depth = Some(v.parse::<usize>().context("invalid --depth")?);
                i += 2;
            }
            "--delay" => {
                let v = argv
                    .get(i + 1)
                    .ok_or_else(|| anyhow!("--delay requires a value"))?;
                opts.delay_secs = v.parse::<f64>().context("invalid --delay")?;
                i += 2;
            }
            "--timeout" => {
                let v = argv
                    .get(i + 1)
                    .ok_or_else(|| anyhow!("--timeout requires a value"))?;
                opts.timeout_secs = v.parse::<u64>().context("invalid --timeout")?;
                i += 2;
            }
            "--max-retries" => {
                let v = argv
                    .get(i + 1)
                    .ok_or_else(|| anyhow!("--max-retries requires a value"))?;
                opts.max_retries = v.parse::<u32>().context("invalid --max-retries")?;
                i += 2;
            }
            "--cross-subdomain" => {
                opts.cross_subdomain = true;
                i += 1;
            }
            "--same-subdomain" => {
                opts.cross_subdomain = false;
                i += 1;
            }
            "--no-progress" => {
                opts.no_progress = true;
                i += 1;
            }
            "--no-merge" => {
                opts.no_merge = true;
                i += 1;
            }
            "-m" | "--merged-name" => {
                let v = argv
                    .get(i + 1)
                    .ok_or_else(|| anyhow!("--merged-name requires a value"))?;
                opts.merged_name = Some(v.to_string());
                i += 2;
            }
            "--user-agent" => {
                let v = argv
                    .get(i + 1)
                    .ok_or_else(|| anyhow!("--user-agent requires a value"))?;
                opts.user_agent = Some(v.to_string());
                i += 2;
            }
            "--events" => {
                let v = argv
                    .get(i + 1)
                    .ok_or_else(|| anyhow!("--events requires a value"))?;
                opts.events = Some(PathBuf::from(v));
                i += 2;
            }
            _ => {
                positional.push(t.clone());
                i += 1;
            }
        }
    }

    Ok((opts, positional))
}

fn print_banner() {
    println!("==============================================================");
    println!("                    Web Context Builder");
    println!("            Scrape websites to LLM-optimized Markdown");
    println!("==============================================================");
    println!();
}

fn print_help() {
    let help = r#"wcb - scrape a website into LLM-optimized Markdown

USAGE:
  wcb [FLAGS] URL

URL is the starting page to crawl; https:// is assumed when the scheme is
missing. Only pages on the same site as the seed are scraped.

FLAGS:
  -o, --output <DIR>       Output directory (default: ./output)
  -c, --concurrent <N>     Maximum concurrent requests (default: 5)
  -d, --depth <N>          Maximum crawl depth (default: unlimited)
      --delay <SECS>       Delay between requests in seconds (default: 0.1)
      --timeout <SECS>     Request timeout in seconds (default: 30)
      --max-retries <N>    Attempts per page for transient failures (default: 3)
      --cross-subdomain    Allow crawling across subdomains
      --same-subdomain     Restrict to the seed's subdomain (default)
      --no-progress        Disable the progress display
      --no-merge           Skip merging pages into a single file
  -m, --merged-name <FILE> Name of the merged output file (default: <host>.md)
      --user-agent <UA>    Override the User-Agent header
      --events <FILE>      Append crawl lifecycle events as JSON lines
  -h, --help               Print help
  -V, --version            Print version

EXAMPLES:
  wcb https://docs.example.com
  wcb https://docs.example.com -o ./my-docs -d 3
  wcb https://docs.example.com --cross-subdomain
"#;
    eprintln!("{help}");
}
