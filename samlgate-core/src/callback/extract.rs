//! Scraping the single-sign-on token out of the application's callback reply.
//!
//! The application answers the relayed assertion with an HTML page whose
//! inline script assigns the token as `token: '<value>',`. The first match
//! wins; the value never spans lines.

use std::sync::LazyLock;

use regex::Regex;

use super::CallbackError;

static TOKEN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"token: '(.+?)',").expect("token pattern is a valid regex")
});

/// Extract the token from a relay response body.
pub fn extract_token(body: &str) -> Result<String, CallbackError> {
    TOKEN_PATTERN
        .captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| CallbackError::TokenNotFound {
            body: body.to_string(),
        })
}
