//! Result URL extraction and cleaning
//!
//! URLs are discovered by four fixed text patterns (redirect-style
//! `/url?q=`, direct anchors adjacent to a result marker, `<cite>` display
//! URLs, `data-href` attributes) plus a JSON-LD fallback. Each candidate is
//! percent-decoded, entity-expanded, unwrapped from redirect parameters,
//! and validated before emission. Positions are 1-based in emission order.

use std::sync::OnceLock;

use percent_encoding::percent_decode_str;
use regex::Regex;
use url::Url;

use crate::urlutil;

use super::EngineOptions;

static REDIRECT_RE: OnceLock<Regex> = OnceLock::new();
static DIRECT_RE: OnceLock<Regex> = OnceLock::new();
static CITE_RE: OnceLock<Regex> = OnceLock::new();
static DATA_HREF_RE: OnceLock<Regex> = OnceLock::new();
static JSONLD_SCRIPT_RE: OnceLock<Regex> = OnceLock::new();
static JSONLD_URL_RE: OnceLock<Regex> = OnceLock::new();
static NEXT_PAGE_RES: OnceLock<Vec<Regex>> = OnceLock::new();
static TOTAL_RESULTS_RE: OnceLock<Regex> = OnceLock::new();

/// The engine's own hosts plus well-known affiliates, never emitted as
/// results. Matched on the exact host or any subdomain.
const SELF_DOMAINS: &[&str] = &[
    "google.com",
    "google.co",
    "googleapis.com",
    "gstatic.com",
    "googleusercontent.com",
    "google-analytics.com",
    "googleadservices.com",
    "googlesyndication.com",
    "doubleclick.net",
    "youtube.com",
    "youtu.be",
    "schema.org",
    "w3.org",
];

/// One extracted result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    /// Cleaned absolute URL.
    pub url: String,
    /// 1-based position, monotonic within the page.
    pub position: usize,
}

/// Extraction output for one response body.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub hits: Vec<SearchHit>,
    /// Candidates before cleaning, for diagnostics.
    pub raw_urls: Vec<String>,
    pub has_next_page: bool,
    /// The engine's "About N results" estimate, when present.
    pub total_results: Option<String>,
}

/// Extract result URLs from a response body.
pub fn extract(options: &EngineOptions, body: &str) -> Extraction {
    let mut extraction = Extraction {
        has_next_page: detect_next_page(body),
        total_results: detect_total_results(body),
        ..Extraction::default()
    };

    let mut seen: Vec<String> = Vec::new();
    let mut position = 0usize;

    let mut emit = |raw: &str, extraction: &mut Extraction| {
        extraction.raw_urls.push(raw.to_string());

        let Some(cleaned) = clean_url(raw) else {
            return;
        };
        if seen.iter().any(|s| s == &cleaned) {
            return;
        }
        let Some(host) = urlutil::host_of(&cleaned) else {
            return;
        };
        if is_self_domain(&host) || is_excluded(options, &host) {
            return;
        }

        seen.push(cleaned.clone());
        position += 1;
        extraction.hits.push(SearchHit {
            url: cleaned,
            position,
        });
    };

    // Pattern 1: redirect-style /url?q=... links
    let redirect = REDIRECT_RE.get_or_init(|| {
        Regex::new(
            r#"<a[^>]+href="(/url\?q=|/url\?esrc=s&amp;source=web&amp;rct=j&amp;url=)([^"&]+)"#,
        )
        .unwrap()
    });
    for caps in redirect.captures_iter(body) {
        if let Some(m) = caps.get(2) {
            // Re-attach the redirect prefix so cleaning unwraps the target
            let raw = format!("/url?q={}", m.as_str());
            emit(&raw, &mut extraction);
        }
    }

    // Pattern 2: direct anchors carrying a result marker
    let direct = DIRECT_RE
        .get_or_init(|| Regex::new(r#"<a[^>]+href="(https?://[^"]+)"[^>]*data-ved="#).unwrap());
    for caps in direct.captures_iter(body) {
        if let Some(m) = caps.get(1) {
            emit(m.as_str(), &mut extraction);
        }
    }

    // Pattern 3: <cite> display URLs
    let cite = CITE_RE.get_or_init(|| Regex::new(r"<cite[^>]*>([^<]+)</cite>").unwrap());
    for caps in cite.captures_iter(body) {
        if let Some(m) = caps.get(1) {
            emit(m.as_str(), &mut extraction);
        }
    }

    // Pattern 4: data-href attributes
    let data_href =
        DATA_HREF_RE.get_or_init(|| Regex::new(r#"data-href="(https?://[^"]+)""#).unwrap());
    for caps in data_href.captures_iter(body) {
        if let Some(m) = caps.get(1) {
            emit(m.as_str(), &mut extraction);
        }
    }

    // JSON-LD fallback: "url":"https?://..." pairs inside ld+json blocks
    let script = JSONLD_SCRIPT_RE.get_or_init(|| {
        Regex::new(r#"<script[^>]*type="application/ld\+json"[^>]*>([^<]+)</script>"#).unwrap()
    });
    let json_url =
        JSONLD_URL_RE.get_or_init(|| Regex::new(r#""url"\s*:\s*"(https?://[^"]+)""#).unwrap());
    for caps in script.captures_iter(body) {
        if let Some(block) = caps.get(1) {
            for url_caps in json_url.captures_iter(block.as_str()) {
                if let Some(m) = url_caps.get(1) {
                    emit(m.as_str(), &mut extraction);
                }
            }
        }
    }

    extraction
}

/// Clean and validate one URL candidate.
///
/// Percent-decodes, expands the common HTML entities, unwraps redirect
/// `q=`/`url=` parameters, and validates the final string (scheme in
/// {http, https}, non-empty host). Returns `None` for anything invalid.
pub fn clean_url(raw: &str) -> Option<String> {
    let decoded = percent_decode_str(raw)
        .decode_utf8()
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string());

    let decoded = decoded
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");
    let mut cleaned = decoded.trim().to_string();

    // Unwrap redirect-style URLs: prefer q=, fall back to url=
    if cleaned.contains("/url?") {
        if let Some(query) = cleaned.split_once('?').map(|(_, q)| q) {
            let mut q_param = None;
            let mut url_param = None;
            for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
                match key.as_ref() {
                    "q" if q_param.is_none() => q_param = Some(value.into_owned()),
                    "url" if url_param.is_none() => url_param = Some(value.into_owned()),
                    _ => {}
                }
            }
            if let Some(target) = q_param.or(url_param) {
                cleaned = target;
            }
        }
    }

    let parsed = Url::parse(&cleaned).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    parsed.host_str().filter(|h| !h.is_empty())?;

    Some(cleaned)
}

fn is_self_domain(host: &str) -> bool {
    if SELF_DOMAINS
        .iter()
        .any(|d| host == *d || host.ends_with(&format!(".{d}")))
    {
        return true;
    }
    // Localized engine hosts: google.<tld> in any country form
    host.starts_with("google.") || host.starts_with("www.google.")
}

fn is_excluded(options: &EngineOptions, host: &str) -> bool {
    options
        .exclude_domains
        .iter()
        .any(|d| urlutil::host_matches(host, d))
}

fn detect_next_page(body: &str) -> bool {
    let patterns = NEXT_PAGE_RES.get_or_init(|| {
        vec![
            Regex::new(r#"aria-label="Next page""#).unwrap(),
            Regex::new(r#"id="pnnext""#).unwrap(),
            Regex::new(r#"<a[^>]+class="[^"]*pn[^"]*"[^>]*>Next<"#).unwrap(),
            Regex::new(r#"aria-label="Page \d+""#).unwrap(),
        ]
    });
    patterns.iter().any(|p| p.is_match(body))
}

fn detect_total_results(body: &str) -> Option<String> {
    let re = TOTAL_RESULTS_RE.get_or_init(|| Regex::new(r"About ([\d,]+) results").unwrap());
    re.captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
