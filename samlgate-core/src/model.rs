//! Values handed back to the caller of a flow.

use serde::Serialize;

use crate::callback::CallbackError;
use crate::store::Secret;

/// What the callback handler scraped from the application's reply.
#[derive(Debug, Clone)]
pub struct SsoCode {
    /// The opaque single-sign-on token.
    pub token: Secret,

    /// Raw `Set-Cookie` values from the relay response.
    pub cookies: Vec<String>,
}

/// Outcome of the single callback request: the scraped code or why it failed.
pub type CallbackResult = Result<SsoCode, CallbackError>;

/// Successful authentication.
///
/// Only `auth_token` is required. `cookies` carries whatever the application
/// set on the relay response; `csrf_token` is left for collaborators that
/// exchange the token for a session.
#[derive(Debug, Clone, Serialize)]
pub struct AuthData {
    pub auth_token: Secret,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cookies: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csrf_token: Option<Secret>,
}

impl AuthData {
    pub fn new(auth_token: Secret) -> Self {
        Self {
            auth_token,
            cookies: Vec::new(),
            csrf_token: None,
        }
    }

    pub fn with_cookies(mut self, cookies: Vec<String>) -> Self {
        self.cookies = cookies;
        self
    }

    pub fn with_csrf_token(mut self, csrf_token: impl Into<String>) -> Self {
        self.csrf_token = Some(Secret::new(csrf_token));
        self
    }
}

impl From<SsoCode> for AuthData {
    fn from(code: SsoCode) -> Self {
        AuthData::new(code.token).with_cookies(code.cookies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_data_from_sso_code() {
        let code = SsoCode {
            token: Secret::new("xyz"),
            cookies: vec!["session=1; Path=/".to_string()],
        };

        let auth = AuthData::from(code);
        assert_eq!(auth.auth_token.expose(), "xyz");
        assert_eq!(auth.cookies.len(), 1);
        assert!(auth.csrf_token.is_none());
    }

    #[test]
    fn test_auth_data_json_omits_empty_fields() {
        let auth = AuthData::new(Secret::new("abc"));
        let json = serde_json::to_value(&auth).unwrap();

        assert_eq!(json["auth_token"], "abc");
        assert!(json.get("cookies").is_none());
        assert!(json.get("csrf_token").is_none());
    }

    #[test]
    fn test_auth_data_debug_redacts_token() {
        let auth = AuthData::new(Secret::new("very-secret")).with_csrf_token("csrf-value");
        let debug = format!("{:?}", auth);

        assert!(!debug.contains("very-secret"));
        assert!(!debug.contains("csrf-value"));
    }
}
