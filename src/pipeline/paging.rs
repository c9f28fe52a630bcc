use crate::config::{Entrypoint, SourceConfig};
use url::Url;

/// Placeholder substituted with the page number
pub const PAGE_PLACEHOLDER: &str = "{page}";

/// Listing URLs for every entrypoint of a source, in configuration order
pub fn expand_entrypoints(source: &SourceConfig) -> Vec<String> {
    source.entrypoints.iter().flat_map(expand_entrypoint).collect()
}

/// Listing URLs for one entrypoint
///
/// Without paging the entrypoint yields its URL once, with any placeholder
/// set to page 1.
pub fn expand_entrypoint(entrypoint: &Entrypoint) -> Vec<String> {
    let Some(url) = entrypoint.url.as_deref() else {
        return Vec::new();
    };

    match &entrypoint.paging {
        None => vec![url.replace(PAGE_PLACEHOLDER, "1")],
        Some(paging) => (0..paging.pages)
            .map(|i| paging.start.saturating_add(i.saturating_mul(paging.step)))
            .map(|page| page_url(url, &paging.param, page))
            .collect(),
    }
}

/// Builds the URL of page `page` from a template
pub fn page_url(template: &str, param: &str, page: u32) -> String {
    if template.contains(PAGE_PLACEHOLDER) {
        return template.replace(PAGE_PLACEHOLDER, &page.to_string());
    }

    let Ok(mut url) = Url::parse(template) else {
        return template.to_string();
    };

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != param)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair(param, &page.to_string());

    url.to_string()
}
