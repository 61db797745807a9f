use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::{Mutex, OnceLock},
};

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use url::Url;

/// Persistence for reduced pages. `save` must be safe under concurrent
/// workers; `merge` is called once, after every worker has exited.
pub trait Storage: Send + Sync {
    /// Create output locations.
    fn begin(&self) -> Result<()>;

    /// Persist one page, returning the path written.
    fn save(&self, url: &Url, markdown: &str) -> Result<PathBuf>;

    /// Concatenate all previously saved pages into one document with a
    /// table of contents, returning its path.
    fn merge(&self) -> Result<PathBuf>;

    fn saved_count(&self) -> usize;
}

const PAGE_SEPARATOR: &str = "\n\n---\n\n";

/// Filesystem storage: one Markdown file per page under `pages/`, plus a
/// merged document at the output root.
pub struct FsStorage {
    output_dir: PathBuf,
    pages_dir: PathBuf,
    merged_path: PathBuf,
    saved: Mutex<Vec<(String, PathBuf)>>,
}

impl FsStorage {
    pub fn new(output_dir: PathBuf, merged_filename: &str) -> Self {
        let pages_dir = output_dir.join("pages");
        let merged_path = output_dir.join(merged_filename);
        Self {
            output_dir,
            pages_dir,
            merged_path,
            saved: Mutex::new(Vec::new()),
        }
    }

    pub fn pages_dir(&self) -> &Path {
        &self.pages_dir
    }

    pub fn merged_path(&self) -> &Path {
        &self.merged_path
    }
}

impl Storage for FsStorage {
    fn begin(&self) -> Result<()> {
        fs::create_dir_all(&self.pages_dir).with_context(|| {
            format!("failed to create pages dir: {}", self.pages_dir.display())
        })?;
        Ok(())
    }

    fn save(&self, url: &Url, markdown: &str) -> Result<PathBuf> {
        let path = self.pages_dir.join(url_to_filename(url));
        let content = format!("<!-- Source: {url} -->\n\n{markdown}");
        write_atomic(&path, content.as_bytes())?;

        let mut saved = self.saved.lock().expect("saved-files lock poisoned");
        saved.push((url.as_str().to_string(), path.clone()));
        Ok(path)
    }

    fn merge(&self) -> Result<PathBuf> {
        let mut files = self.saved.lock().expect("saved-files lock poisoned").clone();
        // Sort by URL so merged output is deterministic regardless of
        // completion order.
        files.sort_by(|a, b| a.0.cmp(&b.0));

        let mut merged = String::new();
        merged.push_str("# Merged Documentation\n");
        merged.push_str(&format!("**Total Pages:** {}\n", files.len()));
        merged.push_str("\n## Table of Contents\n");

        for (i, (url, _)) in files.iter().enumerate() {
            let anchor = anchor_for(url);
            merged.push_str(&format!("{}. [{url}](#{anchor})\n", i + 1));
        }
        merged.push_str(PAGE_SEPARATOR);

        for (url, path) in &files {
            let content = fs::read_to_string(path)
                .with_context(|| format!("failed to read saved page: {}", path.display()))?;
            let anchor = anchor_for(url);
            merged.push_str(&format!("<a id=\"{anchor}\"></a>\n\n"));
            merged.push_str(&format!("## Source: {url}\n\n"));
            merged.push_str(&content);
            merged.push_str(PAGE_SEPARATOR);
        }

        write_atomic(&self.merged_path, merged.as_bytes())?;
        Ok(self.merged_path.clone())
    }

    fn saved_count(&self) -> usize {
        self.saved.lock().expect("saved-files lock poisoned").len()
    }
}

fn unsafe_char_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\w\-.]").unwrap())
}

fn anchor_char_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\w\-]").unwrap())
}

/// Map a URL to its page filename: the path with separators flattened to
/// `_`, capped at 200 chars, plus an 8-hex md5 suffix so distinct URLs with
/// the same path (query strings) never collide.
pub fn url_to_filename(url: &Url) -> String {
    let path = url.path().trim_matches('/');
    let base = if path.is_empty() { "index" } else { path };
    let flat = base.replace('/', "_");
    let mut name = unsafe_char_regex().replace_all(&flat, "_").into_owned();
    name.truncate(200);

    let digest = md5::compute(url.as_str().as_bytes());
    let hash8 = &format!("{digest:x}")[..8];
    format!("{name}_{hash8}.md")
}

/// Intra-document anchor for a URL: every non-word character becomes `-`.
pub fn anchor_for(url: &str) -> String {
    anchor_char_regex().replace_all(url, "-").into_owned()
}

/// Write via a temp file in the same directory, then rename, so readers
/// never observe a partially written page.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create dir: {}", parent.display()))?;

    let file_name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("page.md");
    let tmp_path = parent.join(format!(".{file_name}.tmp"));

    {
        let mut f = fs::File::create(&tmp_path)
            .with_context(|| format!("failed to create temp file: {}", tmp_path.display()))?;
        f.write_all(bytes)
            .with_context(|| format!("failed to write temp file: {}", tmp_path.display()))?;
        f.flush().ok();
    }

    fs::rename(&tmp_path, path).with_context(|| {
        format!(
            "failed to replace {} with temp file {}",
            path.display(),
            tmp_path.display()
        )
    })?;
    Ok(())
}
