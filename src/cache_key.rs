//! Canonical cache keys for search queries
//!
//! The warmer and the query-serving path derive keys independently, so any
//! divergence here turns into a permanent cache miss. Both sides build their
//! queries through [`author_query`] / [`title_query`] and encode them with
//! [`encode`].
//!
//! Key format: `search:{kind}:{name1}={value1}&{name2}={value2}...` with
//! names sorted, names and text values lower-cased and trimmed, and absent
//! parameters omitted.

use crate::models::{SearchKind, SearchQuery};

/// Prefix shared by every search cache key
pub const KEY_PREFIX: &str = "search";

/// Lower-case and trim a name or text value
pub fn normalize_text(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Escape the characters that carry structure in a key
fn escape(component: &str) -> String {
    let mut out = String::with_capacity(component.len());
    for c in component.chars() {
        match c {
            '%' => out.push_str("%25"),
            '&' => out.push_str("%26"),
            '=' => out.push_str("%3d"),
            _ => out.push(c),
        }
    }
    out
}

/// Encode a query into its cache key
pub fn encode(query: &SearchQuery) -> String {
    let params = query
        .params()
        .map(|(name, value)| format!("{}={}", escape(name), escape(value)))
        .collect::<Vec<_>>()
        .join("&");
    format!("{}:{}:{}", KEY_PREFIX, query.kind(), params)
}

/// Encode from a loose parameter mapping in one call
pub fn encode_params<I, K, V>(kind: SearchKind, params: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<crate::models::ParamValue>,
{
    encode(&SearchQuery::from_params(kind, params))
}

/// Author search as issued by both the warmer and the serving path
pub fn author_query(name: &str, limit: usize) -> SearchQuery {
    SearchQuery::new(SearchKind::Author)
        .with_param("name", name)
        .with_param("limit", limit)
}

/// Title search as issued by both the warmer and the serving path
pub fn title_query(title: &str, max_results: usize) -> SearchQuery {
    SearchQuery::new(SearchKind::Title)
        .with_param("title", title)
        .with_param("maxresults", max_results)
}
