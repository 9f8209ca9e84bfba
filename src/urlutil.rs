//! Shared URL helpers: host extraction, domain validation, registrable
//! domains, and dedup normalization.
//!
//! Every function here is pure so the filter pipeline, the engine adapter,
//! and the proxy parser all share one implementation.

use std::sync::OnceLock;

use regex::Regex;
use url::Url;

static IPV4_RE: OnceLock<Regex> = OnceLock::new();
static DOMAIN_RE: OnceLock<Regex> = OnceLock::new();

/// Two-label public suffixes. Anything else falls back to the last two
/// labels of the host.
const TWO_LABEL_SUFFIXES: &[&str] = &[
    "co.uk", "com.au", "co.jp", "co.kr", "co.nz", "co.za", "com.br",
    "com.cn", "com.mx", "com.tw", "org.uk", "net.au", "gov.uk",
];

/// Query parameters stripped during normalization. `utm_` is matched as a
/// prefix; the rest are exact keys.
const TRACKING_PARAM_KEYS: &[&str] = &[
    "fbclid", "gclid", "gclsrc", "dclid", "msclkid", "mc_cid", "mc_eid",
    "_ga", "_gl", "igshid", "yclid", "wbraid", "gbraid",
];

/// Check whether a host is an IPv4 dotted-quad or a syntactically valid
/// DNS name (letters/digits/hyphens, labels up to 63 chars, no leading or
/// trailing hyphen).
pub fn is_valid_host(host: &str) -> bool {
    let ipv4 = IPV4_RE.get_or_init(|| Regex::new(r"^(\d{1,3}\.){3}\d{1,3}$").unwrap());
    if ipv4.is_match(host) {
        return true;
    }

    let domain = DOMAIN_RE.get_or_init(|| {
        Regex::new(
            r"^[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(\.[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
        )
        .unwrap()
    });
    domain.is_match(host)
}

/// Extract the host from a URL string, lowercased. Returns `None` when the
/// string does not parse or has no host component.
pub fn host_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed.host_str().map(|h| h.to_ascii_lowercase())
}

/// Derive the registrable ("top") domain from a host.
///
/// Uses the short two-label public-suffix table; unknown suffixes fall back
/// to the last two labels. Hosts with fewer than two labels are returned
/// unchanged.
pub fn top_domain(host: &str) -> String {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 2 {
        return host;
    }

    let last_two = labels[labels.len() - 2..].join(".");
    if labels.len() >= 3 && TWO_LABEL_SUFFIXES.contains(&last_two.as_str()) {
        return labels[labels.len() - 3..].join(".");
    }
    last_two
}

/// Check whether `host` equals `pattern` or is a subdomain of it.
/// A pattern of `*.example.com` (or bare `example.com`) matches both the
/// apex and any label-prefixed variant.
pub fn host_matches(host: &str, pattern: &str) -> bool {
    let host = host.to_ascii_lowercase();
    let pattern = pattern
        .trim_start_matches("*.")
        .trim()
        .to_ascii_lowercase();
    if pattern.is_empty() {
        return false;
    }
    host == pattern || host.ends_with(&format!(".{pattern}"))
}

/// Whether a URL carries query parameters (both `?` and `=` present).
pub fn has_params(url: &str) -> bool {
    url.contains('?') && url.contains('=')
}

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAM_KEYS.contains(&key.as_str())
}

/// Normalize a URL string for deduplication.
///
/// - scheme and host lowercased, default ports elided (both courtesy of
///   `Url::parse`)
/// - fragment removed
/// - trailing slash removed from non-root paths
/// - tracking parameters removed, remaining parameters sorted, empty query
///   omitted
///
/// Normalization is idempotent; inputs that fail to parse are returned
/// trimmed but otherwise untouched so that they still produce a stable key.
pub fn normalize(url: &str) -> String {
    let mut parsed = match Url::parse(url.trim()) {
        Ok(u) => u,
        Err(_) => return url.trim().to_string(),
    };

    parsed.set_fragment(None);

    let path = parsed.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        parsed.set_path(&path[..path.len() - 1]);
    }

    if let Some(query) = parsed.query() {
        let mut params: Vec<&str> = query
            .split('&')
            .filter(|p| {
                let key = p.split('=').next().unwrap_or("");
                !key.is_empty() && !is_tracking_param(key)
            })
            .collect();

        if params.is_empty() {
            parsed.set_query(None);
        } else {
            params.sort_unstable();
            let joined = params.join("&");
            parsed.set_query(Some(&joined));
        }
    }

    parsed.into()
}
