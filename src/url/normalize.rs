use crate::UrlError;
use url::Url;

/// Query keys that carry click attribution or session state rather than content
const VOLATILE_PARAMS: &[&str] = &[
    "fbclid",
    "gclid",
    "msclkid",
    "mc_eid",
    "_ga",
    "sessionid",
    "sid",
    "phpsessid",
    "jsessionid",
];

fn is_volatile(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || VOLATILE_PARAMS.contains(&key.as_str())
}

/// Canonical form of a link used for dedupe fingerprints
///
/// Two links that reach the same page through different spellings collapse
/// to one value: the host is lowercased and loses a leading `www.`, empty path
/// segments and a trailing slash are dropped, the fragment is removed, and the
/// query keeps only non-volatile pairs, sorted. Scheme and port are kept since
/// test fixtures and staging mirrors commonly differ only there.
///
/// ```
/// use harrow::url::normalize_url;
///
/// let url = normalize_url("https://WWW.EXAMPLE.COM/page/?utm_source=x").unwrap();
/// assert_eq!(url.as_str(), "https://example.com/page");
/// ```
pub fn normalize_url(raw: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(raw.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(UrlError::InvalidScheme(other.to_string())),
    }

    let host = url
        .host_str()
        .map(|h| h.to_ascii_lowercase())
        .ok_or(UrlError::MissingDomain)?;
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    url.set_host(Some(&host))
        .map_err(|e| UrlError::Malformed(format!("{}: {}", host, e)))?;

    let path = canonical_path(&url);
    url.set_path(&path);
    url.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_volatile(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();

    if pairs.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }

    Ok(url)
}

/// Joins the non-empty path segments; dot segments are already resolved by the parser
fn canonical_path(url: &Url) -> String {
    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();
    format!("/{}", segments.join("/"))
}
