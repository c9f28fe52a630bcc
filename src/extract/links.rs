//! Link discovery driven by a source's discovery rule

use crate::config::DiscoveryConfig;
use crate::extract::LinkExtractor;
use crate::url::{resolve_link, same_host};
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

/// How links are matched on a listing page
#[derive(Debug, Clone)]
enum Matcher {
    /// Regex tested against each resolved link URL
    Regex(Regex),
    /// CSS selector; the parsed form is rebuilt per page
    Css(String),
    /// Every anchor
    All,
}

/// A compiled discovery rule
///
/// Exactly one method is active per source. Without a rule every anchor on
/// the listing page's host is taken.
#[derive(Debug, Clone)]
pub struct DiscoveryRule {
    matcher: Matcher,
    same_host: bool,
}

impl DiscoveryRule {
    /// Compiles a discovery configuration
    pub fn compile(config: Option<&DiscoveryConfig>) -> Result<Self, String> {
        let Some(config) = config else {
            return Ok(Self {
                matcher: Matcher::All,
                same_host: true,
            });
        };

        if config.xpath.is_some() {
            return Err("xpath discovery is not supported".to_string());
        }

        let matcher = match (&config.regex, &config.css) {
            (Some(_), Some(_)) => {
                return Err("discovery sets both regex and css".to_string());
            }
            (Some(pattern), None) => Matcher::Regex(
                Regex::new(pattern).map_err(|e| format!("invalid discovery regex: {}", e))?,
            ),
            (None, Some(selector)) => {
                Selector::parse(selector)
                    .map_err(|e| format!("invalid discovery selector '{}': {:?}", selector, e))?;
                Matcher::Css(selector.clone())
            }
            (None, None) => {
                return Ok(Self {
                    matcher: Matcher::All,
                    same_host: true,
                })
            }
        };

        Ok(Self {
            matcher,
            same_host: config.same_host,
        })
    }

    /// Short human description used in diagnostics
    pub fn describe(&self) -> String {
        match &self.matcher {
            Matcher::Regex(re) => format!("regex {}", re.as_str()),
            Matcher::Css(selector) => format!("css {}", selector),
            Matcher::All => "all same-host links".to_string(),
        }
    }
}

impl LinkExtractor for DiscoveryRule {
    fn extract_links(&self, html: &str, base_url: &Url) -> Vec<String> {
        extract_links(html, base_url, self)
    }
}

/// Extracts candidate links from `html` according to `rule`
///
/// Links are resolved against `base_url`, skipped when they use a
/// non-HTTP scheme or carry a `download` attribute, and de-duplicated within
/// the page in document order.
pub fn extract_links(html: &str, base_url: &Url, rule: &DiscoveryRule) -> Vec<String> {
    let document = Html::parse_document(html);

    let hrefs: Vec<String> = match &rule.matcher {
        Matcher::Css(selector) => match Selector::parse(selector) {
            Ok(selector) => document
                .select(&selector)
                .filter_map(|element| {
                    element.value().attr("href").map(str::to_string).or_else(|| {
                        // Containers such as cards carry the link on a child anchor
                        let anchor = Selector::parse("a[href]").ok()?;
                        element
                            .select(&anchor)
                            .next()
                            .and_then(|a| a.value().attr("href"))
                            .map(str::to_string)
                    })
                })
                .collect(),
            Err(_) => Vec::new(),
        },
        Matcher::Regex(_) | Matcher::All => match Selector::parse("a[href]") {
            Ok(selector) => document
                .select(&selector)
                .filter(|element| element.value().attr("download").is_none())
                .filter_map(|element| element.value().attr("href").map(str::to_string))
                .collect(),
            Err(_) => Vec::new(),
        },
    };

    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for href in hrefs {
        let Some(absolute) = resolve_link(&href, base_url) else {
            continue;
        };
        if rule.same_host && !same_host(&absolute, base_url) {
            continue;
        }
        if let Matcher::Regex(re) = &rule.matcher {
            if !re.is_match(absolute.as_str()) {
                continue;
            }
        }
        let absolute = absolute.to_string();
        if seen.insert(absolute.clone()) {
            links.push(absolute);
        }
    }

    links
}
