//! Heuristic detection of bot-mitigation walls

use crate::extract::visible_text;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Markers that identify a challenge page wherever they appear
const CAPTCHA_MARKERS: &[&str] = &[
    "g-recaptcha",
    "h-captcha",
    "hcaptcha.com",
    "cf-challenge",
    "challenge-platform",
    "cf-turnstile",
    "verify you are human",
    "verify you are a human",
    "are you a robot",
    "press & hold",
    "unusual traffic from your computer",
];

const LOGIN_MARKERS: &[&str] = &[
    "please log in",
    "please sign in",
    "sign in to continue",
    "log in to continue",
    "login required",
    "you must be logged in",
    "sign in to view",
];

/// Pages with less visible text than this are considered thin
const THIN_PAGE_CHARS: usize = 1500;

/// 2xx pages with less visible text than this are empty shells
const EMPTY_SHELL_CHARS: usize = 64;

/// Heuristic indication that a page is a wall rather than content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockSignal {
    Captcha,
    LoginWall,
    RateLimited,
    EmptyShell,
}

impl BlockSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Captcha => "captcha",
            Self::LoginWall => "login_wall",
            Self::RateLimited => "rate_limited",
            Self::EmptyShell => "empty_shell",
        }
    }
}

impl fmt::Display for BlockSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies a response as a block wall, if it looks like one
///
/// Header names are expected in lowercase, as engines record them.
pub fn classify_block(
    status: Option<u16>,
    body: &str,
    headers: &BTreeMap<String, String>,
) -> Option<BlockSignal> {
    if status == Some(429) || (status == Some(503) && headers.contains_key("retry-after")) {
        return Some(BlockSignal::RateLimited);
    }

    if headers
        .get("cf-mitigated")
        .is_some_and(|v| v.eq_ignore_ascii_case("challenge"))
    {
        return Some(BlockSignal::Captcha);
    }

    let lower = body.to_lowercase();
    if CAPTCHA_MARKERS.iter().any(|m| lower.contains(m)) {
        return Some(BlockSignal::Captcha);
    }

    let text = visible_text(body);
    let text_len = text.chars().count();

    if text_len < THIN_PAGE_CHARS {
        let text_lower = text.to_lowercase();
        if text_lower.contains("captcha") {
            return Some(BlockSignal::Captcha);
        }
        if status == Some(401) || LOGIN_MARKERS.iter().any(|m| text_lower.contains(m)) {
            return Some(BlockSignal::LoginWall);
        }
    }

    let success = status.map_or(true, |s| (200..300).contains(&s) && s != 204);
    if success && text_len < EMPTY_SHELL_CHARS {
        return Some(BlockSignal::EmptyShell);
    }

    None
}
