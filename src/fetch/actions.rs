//! Scripted interactions run inside a rendered page

use crate::fetch::result::{FetchError, FetchErrorKind};
use chromiumoxide::layout::Point;
use chromiumoxide::Page;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Selectors tried by `dismiss_popup` when none are configured
pub const DEFAULT_POPUP_SELECTORS: &[&str] = &[
    "#onetrust-accept-btn-handler",
    "button[aria-label='Accept all']",
    "button[aria-label='Close']",
    ".cookie-consent button",
    "[data-testid='close-button']",
];

/// One step of a browser action script
///
/// Scripts are written in TOML or JSON as tagged tables, for example
/// `{ action = "scroll", times = 3 }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BrowserAction {
    Scroll {
        #[serde(default = "default_scroll_times")]
        times: u32,
        #[serde(default = "default_scroll_pixels")]
        pixels: i64,
    },
    Click {
        selector: String,
    },
    Hover {
        selector: String,
    },
    Type {
        selector: String,
        text: String,
    },
    DismissPopup {
        #[serde(default)]
        selectors: Vec<String>,
    },
    Sleep {
        ms: u64,
    },
    MouseDrift {
        #[serde(default = "default_drift_moves")]
        moves: u32,
    },
}

fn default_scroll_times() -> u32 {
    1
}

fn default_scroll_pixels() -> i64 {
    800
}

fn default_drift_moves() -> u32 {
    4
}

impl BrowserAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Scroll { .. } => "scroll",
            Self::Click { .. } => "click",
            Self::Hover { .. } => "hover",
            Self::Type { .. } => "type",
            Self::DismissPopup { .. } => "dismiss_popup",
            Self::Sleep { .. } => "sleep",
            Self::MouseDrift { .. } => "mouse_drift",
        }
    }
}

/// Random pause between 150 and 650 ms
pub fn human_pause() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(150..=650))
}

/// Runs `actions` in order, pausing after each one
///
/// Stops at the first failing action. A popup that is not present is not a
/// failure.
pub async fn run_actions(
    page: &Page,
    actions: &[BrowserAction],
    viewport: (u32, u32),
) -> Result<(), FetchError> {
    for action in actions {
        tracing::trace!("Running browser action {}", action.name());
        run_action(page, action, viewport).await.map_err(|e| {
            FetchError::new(
                FetchErrorKind::Browser,
                format!("action {} failed: {}", action.name(), e),
                false,
            )
        })?;
        tokio::time::sleep(human_pause()).await;
    }
    Ok(())
}

async fn run_action(
    page: &Page,
    action: &BrowserAction,
    viewport: (u32, u32),
) -> Result<(), chromiumoxide::error::CdpError> {
    match action {
        BrowserAction::Scroll { times, pixels } => {
            for _ in 0..*times {
                page.evaluate(format!("window.scrollBy(0, {})", pixels))
                    .await?;
                tokio::time::sleep(human_pause()).await;
            }
        }
        BrowserAction::Click { selector } => {
            page.find_element(selector.as_str()).await?.click().await?;
        }
        BrowserAction::Hover { selector } => {
            page.find_element(selector.as_str()).await?.hover().await?;
        }
        BrowserAction::Type { selector, text } => {
            page.find_element(selector.as_str())
                .await?
                .click()
                .await?
                .type_str(text)
                .await?;
        }
        BrowserAction::DismissPopup { selectors } => {
            let candidates: Vec<&str> = if selectors.is_empty() {
                DEFAULT_POPUP_SELECTORS.to_vec()
            } else {
                selectors.iter().map(String::as_str).collect()
            };
            for selector in candidates {
                if let Ok(element) = page.find_element(selector).await {
                    if element.click().await.is_ok() {
                        tracing::debug!("Dismissed popup via {}", selector);
                        break;
                    }
                }
            }
        }
        BrowserAction::Sleep { ms } => {
            tokio::time::sleep(Duration::from_millis(*ms)).await;
        }
        BrowserAction::MouseDrift { moves } => {
            for point in drift_path(*moves, viewport) {
                page.move_mouse(point).await?;
                let pause = rand::thread_rng().gen_range(40..=160);
                tokio::time::sleep(Duration::from_millis(pause)).await;
            }
        }
    }
    Ok(())
}

/// Random points inside the viewport, generated up front
fn drift_path(moves: u32, (width, height): (u32, u32)) -> Vec<Point> {
    let mut rng = rand::thread_rng();
    (0..moves)
        .map(|_| Point {
            x: rng.gen_range(0.0..f64::from(width.max(1))),
            y: rng.gen_range(0.0..f64::from(height.max(1))),
        })
        .collect()
}
