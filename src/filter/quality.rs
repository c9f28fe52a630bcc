use crate::extract::{item_text, Item};
use crate::fetch::block::classify_block;
use scraper::{Html, Node};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Phrases that mark a text segment as site chrome rather than content
const BOILERPLATE_MARKERS: &[&str] = &[
    "all rights reserved",
    "privacy policy",
    "terms of service",
    "terms of use",
    "cookie",
    "subscribe to our newsletter",
    "sign up for",
    "skip to content",
    "follow us",
    "©",
];

/// Elements whose text counts as boilerplate wholesale
const CHROME_ELEMENTS: &[&str] = &["nav", "footer", "header", "aside"];

const INVISIBLE: &[&str] = &["script", "style", "noscript", "template", "head"];

/// Per-source item acceptance rules
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct QualityRules {
    /// Minimum length of the item's `text` field, in characters
    #[serde(default)]
    pub min_text_len: usize,

    /// Largest tolerated share (0.0 - 1.0) of page text that is site chrome
    #[serde(default)]
    pub max_boilerplate_ratio: Option<f64>,

    #[serde(default)]
    pub required_fields: Vec<String>,

    /// Drop items whose page looks like a captcha, login wall or empty shell
    #[serde(default = "default_reject_blocked")]
    pub reject_blocked: bool,
}

fn default_reject_blocked() -> bool {
    true
}

impl Default for QualityRules {
    fn default() -> Self {
        Self {
            min_text_len: 0,
            max_boilerplate_ratio: None,
            required_fields: Vec::new(),
            reject_blocked: default_reject_blocked(),
        }
    }
}

/// One reason an item failed the rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityIssue {
    pub code: String,
    pub field: Option<String>,
    pub message: String,
}

impl QualityIssue {
    fn new(code: &str, field: Option<&str>, message: String) -> Self {
        Self {
            code: code.to_string(),
            field: field.map(str::to_string),
            message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityVerdict {
    pub keep: bool,
    pub issues: Vec<QualityIssue>,
}

/// Applies [`QualityRules`] to extracted items
#[derive(Debug, Clone, Default)]
pub struct QualityFilter {
    rules: QualityRules,
}

impl QualityFilter {
    pub fn new(rules: QualityRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &QualityRules {
        &self.rules
    }

    /// Evaluates an item and, when available, the page it came from
    ///
    /// Every rule is checked so the verdict lists all issues at once.
    pub fn evaluate(&self, item: &Item, raw_html: Option<&str>) -> QualityVerdict {
        let mut issues = Vec::new();

        for field in &self.rules.required_fields {
            let present = match item.get(field) {
                None | Some(Value::Null) => false,
                Some(Value::String(s)) => !s.trim().is_empty(),
                Some(Value::Array(a)) => !a.is_empty(),
                Some(_) => true,
            };
            if !present {
                issues.push(QualityIssue::new(
                    "missing_field",
                    Some(field),
                    format!("required field '{}' is missing or empty", field),
                ));
            }
        }

        let text_len = item_text(item).chars().count();
        if text_len < self.rules.min_text_len {
            issues.push(QualityIssue::new(
                "text_too_short",
                Some("text"),
                format!(
                    "text has {} characters, minimum is {}",
                    text_len, self.rules.min_text_len
                ),
            ));
        }

        if let Some(html) = raw_html {
            if let Some(max_ratio) = self.rules.max_boilerplate_ratio {
                let ratio = boilerplate_ratio(html);
                if ratio > max_ratio {
                    issues.push(QualityIssue::new(
                        "boilerplate",
                        None,
                        format!("boilerplate ratio {:.2} exceeds {:.2}", ratio, max_ratio),
                    ));
                }
            }

            if self.rules.reject_blocked {
                if let Some(signal) = classify_block(None, html, &BTreeMap::new()) {
                    issues.push(QualityIssue::new(
                        "blocked",
                        None,
                        format!("page looks like a {} response", signal),
                    ));
                }
            }
        }

        QualityVerdict {
            keep: issues.is_empty(),
            issues,
        }
    }
}

/// Share of visible text characters that belong to site chrome
///
/// Returns 0.0 for a page without visible text.
pub fn boilerplate_ratio(html: &str) -> f64 {
    let document = Html::parse_document(html);
    let mut total = 0usize;
    let mut chrome = 0usize;

    for node in document.root_element().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let segment = text.trim();
        if segment.is_empty() {
            continue;
        }

        let mut in_chrome = false;
        let mut hidden = false;
        for ancestor in node.ancestors() {
            if let Node::Element(element) = ancestor.value() {
                hidden |= INVISIBLE.contains(&element.name());
                in_chrome |= CHROME_ELEMENTS.contains(&element.name());
            }
        }
        if hidden {
            continue;
        }

        let len = segment.chars().count();
        total += len;
        let lower = segment.to_lowercase();
        if in_chrome || BOILERPLATE_MARKERS.iter().any(|m| lower.contains(m)) {
            chrome += len;
        }
    }

    if total == 0 {
        0.0
    } else {
        chrome as f64 / total as f64
    }
}
