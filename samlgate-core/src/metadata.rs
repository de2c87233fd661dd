//! Identity provider metadata loading.
//!
//! Reads a SAML 2.0 `EntityDescriptor` from a URL or a local file and keeps
//! only what the flow needs: the entity ID, the single-sign-on endpoints and
//! the signing certificates. Elements are matched on their local name so any
//! namespace prefix is accepted.

use std::path::{Path, PathBuf};

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use thiserror::Error;

/// Error type for metadata loading.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// The metadata URL could not be fetched.
    #[error("error downloading SAML metadata from {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The metadata URL answered with a non-success status.
    #[error("error downloading SAML metadata from {url}: HTTP {status}")]
    Status { url: String, status: u16 },

    /// The metadata file could not be read.
    #[error("error reading SAML metadata file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document is not a usable entity descriptor.
    #[error("error parsing SAML metadata from {origin}: {message}")]
    Parse { origin: String, message: String },
}

/// A single-sign-on endpoint advertised by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsoService {
    pub binding: String,
    pub location: String,
}

/// The parts of an identity provider's metadata the flow relies on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityProviderDescriptor {
    /// `entityID` of the identity provider.
    pub entity_id: String,

    /// Single-sign-on endpoints in document order.
    pub sso_services: Vec<SsoService>,

    /// Base64 DER certificates from the IdP's key descriptors, whitespace removed.
    pub certificates: Vec<String>,

    /// Whether the IdP asks for signed authentication requests.
    pub want_authn_requests_signed: bool,
}

impl IdentityProviderDescriptor {
    /// Location of the first single-sign-on endpoint, if any.
    pub fn sso_location(&self) -> Option<&str> {
        self.sso_services
            .first()
            .map(|s| s.location.as_str())
            .filter(|l| !l.is_empty())
    }
}

/// Download and parse metadata from a URL.
pub async fn load_from_url(url: &str) -> Result<IdentityProviderDescriptor, MetadataError> {
    tracing::debug!(url, "Downloading SAML metadata");

    let network = |source| MetadataError::Network {
        url: url.to_string(),
        source,
    };

    let response = reqwest::get(url).await.map_err(network)?;
    let status = response.status();
    if !status.is_success() {
        return Err(MetadataError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let body = response.text().await.map_err(network)?;
    parse(&body, url)
}

/// Read and parse metadata from a local file.
pub async fn load_from_file(path: impl AsRef<Path>) -> Result<IdentityProviderDescriptor, MetadataError> {
    let path = path.as_ref();
    tracing::debug!(?path, "Reading SAML metadata file");

    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| MetadataError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    parse(&raw, &path.display().to_string())
}

/// Parse an `EntityDescriptor` document.
///
/// `origin` is only used in error messages. The first `EntityDescriptor` in the
/// document wins, including one nested in an `EntitiesDescriptor`.
pub fn parse(xml: &str, origin: &str) -> Result<IdentityProviderDescriptor, MetadataError> {
    let parse_error = |message: String| MetadataError::Parse {
        origin: origin.to_string(),
        message,
    };

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut descriptor = IdentityProviderDescriptor::default();
    let mut found_entity = false;
    let mut entity_depth = 0usize;
    let mut in_idp = false;
    let mut in_key_descriptor = false;
    let mut in_certificate = false;
    let mut certificate_text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let name = local_name(e);
                if entity_depth > 0 {
                    entity_depth += 1;
                }
                match name.as_str() {
                    "EntityDescriptor" if !found_entity => {
                        found_entity = true;
                        entity_depth = 1;
                        descriptor.entity_id = attribute(e, "entityID").unwrap_or_default();
                    }
                    "IDPSSODescriptor" if entity_depth > 0 => {
                        in_idp = true;
                        descriptor.want_authn_requests_signed =
                            attribute(e, "WantAuthnRequestsSigned").as_deref() == Some("true");
                    }
                    "KeyDescriptor" if in_idp => in_key_descriptor = true,
                    "X509Certificate" if in_key_descriptor => {
                        in_certificate = true;
                        certificate_text.clear();
                    }
                    "SingleSignOnService" if in_idp => descriptor.sso_services.push(sso_service(e)),
                    _ => {}
                }
            }
            Ok(Event::Empty(ref e)) => match local_name(e).as_str() {
                "EntityDescriptor" if !found_entity => {
                    found_entity = true;
                    descriptor.entity_id = attribute(e, "entityID").unwrap_or_default();
                }
                "SingleSignOnService" if in_idp => descriptor.sso_services.push(sso_service(e)),
                "X509Certificate" if in_key_descriptor => descriptor.certificates.push(String::new()),
                _ => {}
            },
            Ok(Event::Text(ref e)) if in_certificate => {
                let text = e
                    .unescape()
                    .map_err(|err| parse_error(format!("invalid certificate text: {}", err)))?;
                certificate_text.push_str(&text);
            }
            Ok(Event::CData(e)) if in_certificate => {
                certificate_text.push_str(&String::from_utf8_lossy(&e.into_inner()));
            }
            Ok(Event::End(ref e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                match name.as_str() {
                    "X509Certificate" if in_certificate => {
                        in_certificate = false;
                        descriptor
                            .certificates
                            .push(certificate_text.split_whitespace().collect());
                    }
                    "KeyDescriptor" => in_key_descriptor = false,
                    "IDPSSODescriptor" => in_idp = false,
                    _ => {}
                }
                if entity_depth > 0 {
                    entity_depth -= 1;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(parse_error(format!(
                    "malformed XML at position {}: {}",
                    reader.error_position(),
                    e
                )));
            }
            _ => {}
        }
    }

    if !found_entity {
        return Err(parse_error("no EntityDescriptor element found".to_string()));
    }

    tracing::debug!(
        entity_id = %descriptor.entity_id,
        sso_services = descriptor.sso_services.len(),
        certificates = descriptor.certificates.len(),
        "Parsed SAML metadata"
    );

    Ok(descriptor)
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).to_string()
}

fn attribute(e: &BytesStart<'_>, key: &str) -> Option<String> {
    e.attributes().flatten().find_map(|attr| {
        if attr.key.local_name().as_ref() == key.as_bytes() {
            attr.unescape_value().ok().map(|v| v.to_string())
        } else {
            None
        }
    })
}

fn sso_service(e: &BytesStart<'_>) -> SsoService {
    SsoService {
        binding: attribute(e, "Binding").unwrap_or_default(),
        location: attribute(e, "Location").unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const METADATA: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata"
    xmlns:ds="http://www.w3.org/2000/09/xmldsig#"
    entityID="https://idp.example/metadata">
  <md:IDPSSODescriptor WantAuthnRequestsSigned="true"
      protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
    <md:KeyDescriptor use="signing">
      <ds:KeyInfo>
        <ds:X509Data>
          <ds:X509Certificate>
            MIIB
            AAAA
          </ds:X509Certificate>
        </ds:X509Data>
      </ds:KeyInfo>
    </md:KeyDescriptor>
    <md:KeyDescriptor use="encryption">
      <ds:KeyInfo><ds:X509Data><ds:X509Certificate>BBBB</ds:X509Certificate></ds:X509Data></ds:KeyInfo>
    </md:KeyDescriptor>
    <md:SingleSignOnService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect"
        Location="https://idp.example/sso"/>
    <md:SingleSignOnService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST"
        Location="https://idp.example/sso/post"/>
  </md:IDPSSODescriptor>
</md:EntityDescriptor>"#;

    #[test]
    fn test_parse_prefixed_metadata() {
        let descriptor = parse(METADATA, "test").unwrap();

        assert_eq!(descriptor.entity_id, "https://idp.example/metadata");
        assert_eq!(descriptor.sso_services.len(), 2);
        assert_eq!(descriptor.sso_location(), Some("https://idp.example/sso"));
        assert_eq!(descriptor.certificates, vec!["MIIBAAAA", "BBBB"]);
        assert!(descriptor.want_authn_requests_signed);
    }

    #[test]
    fn test_parse_default_namespace() {
        let xml = r#"<EntityDescriptor xmlns="urn:oasis:names:tc:SAML:2.0:metadata" entityID="idp">
            <IDPSSODescriptor>
              <SingleSignOnService Binding="b" Location="https://idp/sso"/>
            </IDPSSODescriptor>
          </EntityDescriptor>"#;

        let descriptor = parse(xml, "test").unwrap();
        assert_eq!(descriptor.entity_id, "idp");
        assert_eq!(descriptor.sso_location(), Some("https://idp/sso"));
        assert!(descriptor.certificates.is_empty());
        assert!(!descriptor.want_authn_requests_signed);
    }

    #[test]
    fn test_parse_entities_descriptor_takes_first_entity() {
        let xml = r#"<EntitiesDescriptor>
            <EntityDescriptor entityID="first">
              <IDPSSODescriptor><SingleSignOnService Location="https://first/sso"/></IDPSSODescriptor>
            </EntityDescriptor>
            <EntityDescriptor entityID="second">
              <IDPSSODescriptor><SingleSignOnService Location="https://second/sso"/></IDPSSODescriptor>
            </EntityDescriptor>
          </EntitiesDescriptor>"#;

        let descriptor = parse(xml, "test").unwrap();
        assert_eq!(descriptor.entity_id, "first");
        assert_eq!(descriptor.sso_services.len(), 1);
        assert_eq!(descriptor.sso_location(), Some("https://first/sso"));
    }

    #[test]
    fn test_parse_ignores_sp_descriptor_certificates() {
        let xml = r#"<EntityDescriptor entityID="idp">
            <SPSSODescriptor>
              <KeyDescriptor><KeyInfo><X509Data><X509Certificate>SPCERT</X509Certificate></X509Data></KeyInfo></KeyDescriptor>
            </SPSSODescriptor>
            <IDPSSODescriptor>
              <KeyDescriptor><KeyInfo><X509Data><X509Certificate>IDPCERT</X509Certificate></X509Data></KeyInfo></KeyDescriptor>
            </IDPSSODescriptor>
          </EntityDescriptor>"#;

        let descriptor = parse(xml, "test").unwrap();
        assert_eq!(descriptor.certificates, vec!["IDPCERT"]);
    }

    #[test]
    fn test_parse_keeps_empty_certificate_entries() {
        let xml = r#"<EntityDescriptor entityID="idp">
            <IDPSSODescriptor>
              <KeyDescriptor><KeyInfo><X509Data><X509Certificate/></X509Data></KeyInfo></KeyDescriptor>
            </IDPSSODescriptor>
          </EntityDescriptor>"#;

        let descriptor = parse(xml, "test").unwrap();
        assert_eq!(descriptor.certificates, vec![String::new()]);
    }

    #[test]
    fn test_parse_certificate_in_cdata() {
        let xml = r#"<EntityDescriptor entityID="idp">
            <IDPSSODescriptor>
              <KeyDescriptor><KeyInfo><X509Data>
                <X509Certificate><![CDATA[
                  MIIB AAAA
                ]]></X509Certificate>
              </X509Data></KeyInfo></KeyDescriptor>
            </IDPSSODescriptor>
          </EntityDescriptor>"#;

        let descriptor = parse(xml, "test").unwrap();
        assert_eq!(descriptor.certificates, vec!["MIIBAAAA".to_string()]);
    }

    #[test]
    fn test_parse_rejects_non_metadata() {
        let result = parse("this is not xml at all", "test");
        assert!(matches!(result, Err(MetadataError::Parse { .. })));
    }

    #[test]
    fn test_parse_rejects_malformed_xml() {
        let result = parse("<EntityDescriptor entityID=\"x\"><IDPSSODescriptor></EntityDescriptor>", "test");
        assert!(matches!(result, Err(MetadataError::Parse { .. })));
    }

    #[test]
    fn test_sso_location_missing() {
        let descriptor = IdentityProviderDescriptor::default();
        assert!(descriptor.sso_location().is_none());
    }

    #[tokio::test]
    async fn test_load_from_file_missing() {
        let result = load_from_file("/nonexistent/samlgate/metadata.xml").await;
        assert!(matches!(result, Err(MetadataError::Io { .. })));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("idp.xml");
        std::fs::write(&path, METADATA).unwrap();

        let descriptor = load_from_file(&path).await.unwrap();
        assert_eq!(descriptor.entity_id, "https://idp.example/metadata");
    }
}
