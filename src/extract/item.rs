use crate::extract::{extract_title, visible_text, ItemExtractor};
use scraper::{Html, Selector};
use serde_json::{Map, Value};
use url::Url;

/// A structured item: a flat JSON object
pub type Item = Map<String, Value>;

/// Default HTML-to-item converter
///
/// Produces `url`, `title` (first `<h1>`, falling back to `<title>`),
/// `description` (meta description when present) and `text` (visible text).
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultItemExtractor;

impl ItemExtractor for DefaultItemExtractor {
    fn extract_item(&self, html: &str, url: &Url) -> Item {
        let mut item = Item::new();
        item.insert("url".to_string(), Value::String(url.to_string()));

        let (heading, description) = {
            let document = Html::parse_document(html);
            (first_text(&document, "h1"), meta_description(&document))
        };

        if let Some(title) = heading.or_else(|| extract_title(html)) {
            item.insert("title".to_string(), Value::String(title));
        }
        if let Some(description) = description {
            item.insert("description".to_string(), Value::String(description));
        }

        item.insert("text".to_string(), Value::String(visible_text(html)));
        item
    }
}

fn first_text(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<Vec<_>>().join(" "))
        .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|s| !s.is_empty())
}

fn meta_description(document: &Html) -> Option<String> {
    let selector = Selector::parse(r#"meta[name="description"]"#).ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Reads the `title` field of an item
pub fn item_title(item: &Item) -> Option<&str> {
    item.get("title").and_then(Value::as_str)
}

/// Reads the `text` field of an item
pub fn item_text(item: &Item) -> &str {
    item.get("text").and_then(Value::as_str).unwrap_or("")
}
