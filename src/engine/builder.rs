//! Search URL construction

use url::Url;

use super::EngineOptions;

/// Build the search URL for one (query, page) pair.
///
/// Page 0 must not emit `start`; later pages emit
/// `start = page * results_per_page`.
pub fn build_search_url(options: &EngineOptions, query: &str, page: usize, results_per_page: usize) -> String {
    // The base is a fixed well-formed URL; only the query string varies.
    let mut url = Url::parse(&format!("https://{}/search", options.domain))
        .unwrap_or_else(|_| Url::parse("https://www.google.com/search").unwrap());

    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("q", query);
        pairs.append_pair("hl", &options.language);
        pairs.append_pair("gl", &options.country);
        pairs.append_pair("num", &results_per_page.to_string());
        if page > 0 {
            pairs.append_pair("start", &(page * results_per_page).to_string());
        }
        if options.safe_search {
            pairs.append_pair("safe", "active");
        }
        pairs.append_pair("ie", "UTF-8");
        pairs.append_pair("oe", "UTF-8");
    }

    url.into()
}
