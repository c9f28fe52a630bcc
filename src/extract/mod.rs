//! HTML extraction collaborators
//!
//! Link discovery and HTML-to-item conversion are pure functions of
//! `(html, base_url)`. The pipeline consumes them through the
//! [`LinkExtractor`] and [`ItemExtractor`] traits; this module also ships the
//! default implementations driven by a source's discovery rule.

mod item;
mod links;

pub use item::{item_text, item_title, DefaultItemExtractor, Item};
pub use links::{extract_links, DiscoveryRule};

use scraper::{Html, Node, Selector};
use url::Url;

/// Finds candidate detail-page URLs on a listing page
pub trait LinkExtractor: Send + Sync {
    fn extract_links(&self, html: &str, base_url: &Url) -> Vec<String>;
}

impl<F> LinkExtractor for F
where
    F: Fn(&str, &Url) -> Vec<String> + Send + Sync,
{
    fn extract_links(&self, html: &str, base_url: &Url) -> Vec<String> {
        self(html, base_url)
    }
}

/// Converts a detail page into a structured item
pub trait ItemExtractor: Send + Sync {
    fn extract_item(&self, html: &str, url: &Url) -> Item;
}

/// Elements whose text never reaches the reader
const INVISIBLE: &[&str] = &["script", "style", "noscript", "template", "head"];

/// Extracts the human-visible text of a document, whitespace collapsed
pub fn visible_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut words: Vec<&str> = Vec::new();

    for node in document.root_element().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| match ancestor.value() {
            Node::Element(element) => INVISIBLE.contains(&element.name()),
            _ => false,
        });
        if !hidden {
            words.extend(text.split_whitespace());
        }
    }

    words.join(" ")
}

/// Extracts the page title from the `<title>` tag
pub fn extract_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let title_selector = Selector::parse("title").ok()?;

    document
        .select(&title_selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}
