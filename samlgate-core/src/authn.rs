//! SAML authentication request URLs (HTTP-Redirect binding).
//!
//! Requests are never signed. The request XML is DEFLATE-compressed, base64
//! encoded and appended to the identity provider's first single-sign-on
//! location as the `SAMLRequest` query parameter.

use std::io::Write;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, SecondsFormat, Utc};
use flate2::Compression;
use flate2::write::DeflateEncoder;
use quick_xml::escape::escape;
use thiserror::Error;
use url::Url;

use crate::metadata::IdentityProviderDescriptor;
use crate::trust::TrustStore;

const HTTP_POST_BINDING: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST";
const NAME_ID_FORMAT_UNSPECIFIED: &str = "urn:oasis:names:tc:SAML:1.1:nameid-format:unspecified";

/// Error type for authentication request construction.
#[derive(Debug, Error)]
pub enum RequestBuildError {
    #[error("identity provider metadata has no single sign-on location")]
    MissingSsoLocation,

    #[error("identity provider metadata has no entity ID")]
    MissingEntityId,

    #[error("service provider issuer must not be empty")]
    MissingIssuer,

    #[error("assertion consumer service URL must not be empty")]
    MissingAcsUrl,

    #[error("invalid single sign-on location {location}: {source}")]
    InvalidUrl {
        location: String,
        #[source]
        source: url::ParseError,
    },

    #[error("failed to encode authentication request: {0}")]
    Encode(#[from] std::io::Error),
}

/// Assertion consumer URL served by the local callback listener.
pub fn callback_url(port: u16) -> String {
    format!("http://localhost:{}/callback", port)
}

/// An unsigned `samlp:AuthnRequest` addressed to one identity provider.
#[derive(Debug, Clone)]
pub struct AuthnRequest {
    pub id: String,
    pub issue_instant: DateTime<Utc>,
    pub destination: String,
    pub idp_entity_id: String,
    pub issuer: String,
    pub assertion_consumer_service_url: String,
    pub relay_state: Option<String>,
}

impl AuthnRequest {
    /// Validate the descriptor and start a request for it.
    ///
    /// The assertion consumer URL is set separately because the listener port
    /// is only known once it is bound.
    pub fn new(
        descriptor: &IdentityProviderDescriptor,
        issuer: impl Into<String>,
    ) -> Result<Self, RequestBuildError> {
        let destination = descriptor
            .sso_location()
            .ok_or(RequestBuildError::MissingSsoLocation)?
            .to_string();

        if descriptor.entity_id.is_empty() {
            return Err(RequestBuildError::MissingEntityId);
        }

        let issuer = issuer.into();
        if issuer.is_empty() {
            return Err(RequestBuildError::MissingIssuer);
        }

        if descriptor.want_authn_requests_signed {
            tracing::warn!(
                entity_id = %descriptor.entity_id,
                "Identity provider asks for signed requests; sending an unsigned request"
            );
        }

        Ok(Self {
            id: format!("_{}", uuid::Uuid::new_v4()),
            issue_instant: Utc::now(),
            destination,
            idp_entity_id: descriptor.entity_id.clone(),
            issuer,
            assertion_consumer_service_url: String::new(),
            relay_state: None,
        })
    }

    pub fn with_acs_url(mut self, url: impl Into<String>) -> Self {
        self.assertion_consumer_service_url = url.into();
        self
    }

    pub fn with_relay_state(mut self, relay_state: impl Into<String>) -> Self {
        self.relay_state = Some(relay_state.into());
        self
    }

    /// Serialize the request.
    pub fn to_xml(&self) -> String {
        format!(
            r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="{id}" Version="2.0" IssueInstant="{instant}" Destination="{destination}" AssertionConsumerServiceURL="{acs}" ProtocolBinding="{binding}"><saml:Issuer>{issuer}</saml:Issuer><samlp:NameIDPolicy Format="{format}" AllowCreate="true"/></samlp:AuthnRequest>"#,
            id = escape(self.id.as_str()),
            instant = self.issue_instant.to_rfc3339_opts(SecondsFormat::Secs, true),
            destination = escape(self.destination.as_str()),
            acs = escape(self.assertion_consumer_service_url.as_str()),
            binding = HTTP_POST_BINDING,
            issuer = escape(self.issuer.as_str()),
            format = NAME_ID_FORMAT_UNSPECIFIED,
        )
    }

    /// Encode the request for the HTTP-Redirect binding.
    pub fn encode(&self) -> Result<String, RequestBuildError> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(self.to_xml().as_bytes())?;
        let compressed = encoder.finish()?;
        Ok(STANDARD.encode(compressed))
    }

    /// Build the URL the browser is sent to.
    pub fn redirect_url(&self) -> Result<Url, RequestBuildError> {
        if self.assertion_consumer_service_url.is_empty() {
            return Err(RequestBuildError::MissingAcsUrl);
        }

        let mut url = Url::parse(&self.destination).map_err(|source| RequestBuildError::InvalidUrl {
            location: self.destination.clone(),
            source,
        })?;

        let encoded = self.encode()?;
        url.query_pairs_mut().append_pair("SAMLRequest", &encoded);
        if let Some(relay_state) = self.relay_state.as_deref().filter(|s| !s.is_empty()) {
            url.query_pairs_mut().append_pair("RelayState", relay_state);
        }

        tracing::debug!(
            request_id = %self.id,
            destination = %self.destination,
            acs = %self.assertion_consumer_service_url,
            "Built SAML authentication request"
        );

        Ok(url)
    }
}

/// Build the authentication URL for `descriptor` in one step.
///
/// `callback_base` is the local listener origin, e.g. `http://localhost:8400`.
/// `trust` must have been built from the same descriptor; the request itself
/// is unsigned, so it only gates the call.
pub fn build_auth_url(
    trust: &TrustStore,
    descriptor: &IdentityProviderDescriptor,
    callback_base: &str,
    issuer: &str,
) -> Result<Url, RequestBuildError> {
    tracing::trace!(roots = trust.len(), "Building authentication URL");
    AuthnRequest::new(descriptor, issuer)?
        .with_acs_url(format!("{}/callback", callback_base.trim_end_matches('/')))
        .redirect_url()
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use flate2::read::DeflateDecoder;

    use super::*;
    use crate::metadata::SsoService;

    fn descriptor(location: &str) -> IdentityProviderDescriptor {
        IdentityProviderDescriptor {
            entity_id: "https://idp.example/metadata".to_string(),
            sso_services: vec![SsoService {
                binding: "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect".to_string(),
                location: location.to_string(),
            }],
            ..Default::default()
        }
    }

    fn decode_request(url: &Url) -> String {
        let encoded = url
            .query_pairs()
            .find(|(k, _)| k == "SAMLRequest")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        let compressed = STANDARD.decode(encoded).unwrap();
        let mut xml = String::new();
        DeflateDecoder::new(compressed.as_slice())
            .read_to_string(&mut xml)
            .unwrap();
        xml
    }

    #[test]
    fn test_build_auth_url() {
        let url = build_auth_url(
            &TrustStore::default(),
            &descriptor("https://idp.example/sso"),
            "http://localhost:8400",
            "samlgate",
        )
        .unwrap();

        assert!(url.as_str().starts_with("https://idp.example/sso?SAMLRequest="));

        let xml = decode_request(&url);
        assert!(xml.contains(r#"AssertionConsumerServiceURL="http://localhost:8400/callback""#));
        assert!(xml.contains(r#"Destination="https://idp.example/sso""#));
        assert!(xml.contains("<saml:Issuer>samlgate</saml:Issuer>"));
        assert!(xml.contains(HTTP_POST_BINDING));
    }

    #[test]
    fn test_existing_query_is_preserved() {
        let d = descriptor("https://idp.example/sso?tenant=acme");
        let url = build_auth_url(&TrustStore::default(), &d, "http://localhost:1", "sp").unwrap();

        let keys: Vec<String> = url.query_pairs().map(|(k, _)| k.into_owned()).collect();
        assert_eq!(keys, vec!["tenant", "SAMLRequest"]);
    }

    #[test]
    fn test_relay_state_only_when_non_empty() {
        let request = AuthnRequest::new(&descriptor("https://idp.example/sso"), "sp")
            .unwrap()
            .with_acs_url(callback_url(8400));

        let without = request.clone().with_relay_state("").redirect_url().unwrap();
        assert!(!without.as_str().contains("RelayState"));

        let with = request.with_relay_state("cli").redirect_url().unwrap();
        assert!(with.as_str().contains("RelayState=cli"));
    }

    #[test]
    fn test_issuer_is_escaped() {
        let request = AuthnRequest::new(&descriptor("https://idp.example/sso"), "a&b<c>")
            .unwrap()
            .with_acs_url(callback_url(1));

        assert!(request.to_xml().contains("<saml:Issuer>a&amp;b&lt;c&gt;</saml:Issuer>"));
    }

    #[test]
    fn test_request_ids_are_unique() {
        let d = descriptor("https://idp.example/sso");
        let first = AuthnRequest::new(&d, "sp").unwrap();
        let second = AuthnRequest::new(&d, "sp").unwrap();

        assert!(first.id.starts_with('_'));
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn test_missing_sso_location() {
        let mut d = descriptor("https://idp.example/sso");
        d.sso_services.clear();

        let err = AuthnRequest::new(&d, "sp").unwrap_err();
        assert!(matches!(err, RequestBuildError::MissingSsoLocation));
    }

    #[test]
    fn test_missing_entity_id() {
        let mut d = descriptor("https://idp.example/sso");
        d.entity_id.clear();

        let err = AuthnRequest::new(&d, "sp").unwrap_err();
        assert!(matches!(err, RequestBuildError::MissingEntityId));
    }

    #[test]
    fn test_missing_issuer() {
        let err = AuthnRequest::new(&descriptor("https://idp.example/sso"), "").unwrap_err();
        assert!(matches!(err, RequestBuildError::MissingIssuer));
    }

    #[test]
    fn test_invalid_location() {
        let d = descriptor("not a url");
        let err = build_auth_url(&TrustStore::default(), &d, "http://localhost:1", "sp").unwrap_err();
        assert!(matches!(err, RequestBuildError::InvalidUrl { .. }));
    }

    #[test]
    fn test_missing_acs_url() {
        let request = AuthnRequest::new(&descriptor("https://idp.example/sso"), "sp").unwrap();
        assert!(matches!(request.redirect_url(), Err(RequestBuildError::MissingAcsUrl)));
    }
}
