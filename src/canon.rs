use regex::Regex;
use url::{Host, Url};

/// Resolve `raw` against `base` when relative, then normalize to canonical
/// form. Returns `None` for strings that are not URLs at all.
pub fn canonicalize(raw: &str, base: Option<&Url>) -> Option<Url> {
    let url = match Url::parse(raw) {
        Ok(u) => u,
        Err(url::ParseError::RelativeUrlWithoutBase) => base?.join(raw).ok()?,
        Err(_) => return None,
    };
    Some(canonical(url))
}

/// Normalize an absolute URL to the form used as its deduplication key:
/// no fragment, lowercase scheme and host (guaranteed by the parser),
/// `/` for the empty path, no trailing slash on non-root paths, and query
/// pairs sorted by their raw `key=value` text.
pub fn canonical(mut url: Url) -> Url {
    url.set_fragment(None);

    let path = url.path().to_string();
    if path.is_empty() {
        url.set_path("/");
    } else if path != "/" && path.ends_with('/') {
        let trimmed = path.trim_end_matches('/');
        if trimmed.is_empty() {
            url.set_path("/");
        } else {
            url.set_path(trimmed);
        }
    }

    match url.query() {
        Some("") | None => url.set_query(None),
        Some(q) => {
            let mut pairs: Vec<&str> = q.split('&').collect();
            pairs.sort_unstable();
            let sorted = pairs.join("&");
            url.set_query(Some(&sorted));
        }
    }

    url
}

/// Public-suffix-aware `(subdomain, registered domain)` split of a URL's
/// host. `None` when the host is an IP literal or has no known suffix.
fn split_site(url: &Url) -> Option<(String, String)> {
    let host = match url.host() {
        Some(Host::Domain(h)) => h.to_ascii_lowercase(),
        _ => return None,
    };
    let domain = psl::domain(host.as_bytes()).filter(|d| d.suffix().is_known())?;
    let registered = std::str::from_utf8(domain.as_bytes()).ok()?.to_string();
    let subdomain = host
        .strip_suffix(registered.as_str())
        .unwrap_or("")
        .trim_end_matches('.')
        .to_string();
    Some((subdomain, registered))
}

/// Site membership and admission rules derived from the seed URL.
#[derive(Debug)]
pub struct SiteScope {
    seed_host: String,
    seed_site: Option<(String, String)>,
    stay_on_subdomain: bool,
    exclude: Vec<Regex>,
}

impl SiteScope {
    pub fn new(seed: &Url, stay_on_subdomain: bool, exclude: Vec<Regex>) -> Self {
        Self {
            seed_host: seed.host_str().unwrap_or("").to_ascii_lowercase(),
            seed_site: split_site(seed),
            stay_on_subdomain,
            exclude,
        }
    }

    /// Registered domains must match; with `stay_on_subdomain`, subdomains
    /// must match too. Hosts without a registrable domain (IP literals,
    /// `localhost`) count as the same site only when identical to the seed
    /// host.
    pub fn same_site(&self, url: &Url) -> bool {
        match (split_site(url), &self.seed_site) {
            (Some((sub, registered)), Some((seed_sub, seed_registered))) => {
                registered == *seed_registered && (!self.stay_on_subdomain || sub == *seed_sub)
            }
            _ => url
                .host_str()
                .is_some_and(|h| h.eq_ignore_ascii_case(&self.seed_host)),
        }
    }

    /// The admission predicate: http(s) scheme, same site, and no exclude
    /// pattern matching the canonical form.
    pub fn admit(&self, url: &Url) -> bool {
        if url.scheme() != "http" && url.scheme() != "https" {
            return false;
        }
        if !self.same_site(url) {
            return false;
        }
        !self.exclude.iter().any(|re| re.is_match(url.as_str()))
    }
}

/// Exclude patterns for URLs that are never HTML: documents and archives,
/// images, styles/scripts/fonts, and media.
pub fn default_exclude_patterns() -> Vec<Regex> {
    [
        r"(?i).*\.(pdf|zip|tar|gz|exe|dmg|pkg|deb|rpm)$",
        r"(?i).*\.(png|jpg|jpeg|gif|svg|ico|webp)$",
        r"(?i).*\.(css|js|woff|woff2|ttf|eot)$",
        r"(?i).*\.(mp3|mp4|wav|avi|mov|webm)$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static exclude pattern"))
    .collect()
}
