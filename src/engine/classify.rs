//! Response classification
//!
//! Classifies a raw response body into one of four verdicts using fixed
//! case-insensitive substring tables, checked in order
//! captcha -> blocked -> empty -> ok with the first positive match
//! short-circuiting.

/// Classification of one search response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Results page; extraction can proceed.
    Ok,
    /// CAPTCHA interstitial.
    Captcha,
    /// Hard block / ban page.
    Blocked,
    /// Valid page with no results.
    Empty,
}

const CAPTCHA_MARKERS: &[&str] = &[
    "captcha",
    "recaptcha",
    "g-recaptcha",
    "unusual traffic",
    "automated queries",
    "/sorry/",
    "ipv4.google.com/sorry",
    "please verify",
    "not a robot",
    "verify you're human",
    "solve this puzzle",
];

const BLOCK_MARKERS: &[&str] = &[
    "403 forbidden",
    "access denied",
    "blocked",
    "your ip has been",
    "temporarily blocked",
    "unusual traffic from your computer",
    "too many requests",
    "rate limit",
];

const EMPTY_MARKERS: &[&str] = &[
    "did not match any documents",
    "no results found",
    "your search -",
    "did not return any results",
];

/// Minimum plausible length of a real results page. Anything shorter that
/// does not even contain an `<html` tag is treated as a block page.
const MIN_PLAUSIBLE_BODY: usize = 1000;

/// Classify a response body.
pub fn classify(body: &str) -> Verdict {
    let lower = body.to_lowercase();

    if CAPTCHA_MARKERS.iter().any(|m| lower.contains(m)) {
        return Verdict::Captcha;
    }

    if BLOCK_MARKERS.iter().any(|m| lower.contains(m)) {
        return Verdict::Blocked;
    }
    if body.len() < MIN_PLAUSIBLE_BODY && !lower.contains("<html") {
        return Verdict::Blocked;
    }

    if EMPTY_MARKERS.iter().any(|m| lower.contains(m)) {
        return Verdict::Empty;
    }

    Verdict::Ok
}
