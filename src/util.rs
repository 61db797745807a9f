use regex::Regex;
use std::sync::OnceLock;
use url::Url;

pub fn is_url_like(s: &str) -> bool {
    let s = s.trim();
    s.starts_with("https://") || s.starts_with("http://")
}

/// Prefix `https://` when the seed was given without a scheme.
pub fn ensure_scheme(s: &str) -> String {
    let s = s.trim();
    if is_url_like(s) {
        s.to_string()
    } else {
        format!("https://{s}")
    }
}

fn host_char_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\w\-.]").unwrap())
}

/// Derive the default merged-output filename from the seed URL,
/// e.g. `https://docs.example.com/api` -> `docs.example.com.md`.
pub fn merged_filename_for(url: &Url) -> String {
    let host = url.host_str().unwrap_or("site");
    let clean = host_char_regex().replace_all(host, "-");
    format!("{clean}.md")
}
