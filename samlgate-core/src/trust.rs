//! Trust material derived from identity provider metadata.
//!
//! Every certificate in the descriptor must decode and parse before anything
//! touches the network. The ephemeral service provider key pair exists only
//! because some identity providers insist on one; nothing is verified against
//! it locally and it is never persisted.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rcgen::{CertificateParams, DnType, KeyPair};
use thiserror::Error;

use crate::metadata::IdentityProviderDescriptor;
use crate::store::Secret;

const EPHEMERAL_COMMON_NAME: &str = "samlgate service provider";

/// Error type for trust material construction.
#[derive(Debug, Error)]
pub enum TrustError {
    /// A metadata certificate is empty, not base64 or not X.509 DER.
    #[error("metadata certificate({index}) is invalid: {reason}")]
    InvalidCertificate { index: usize, reason: String },

    /// The ephemeral key pair could not be generated.
    #[error("failed to generate ephemeral key material: {message}")]
    KeyGeneration { message: String },
}

/// An identity provider certificate accepted as a trust root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedCertificate {
    pub der: Vec<u8>,
    pub subject: String,
}

/// Trust roots taken 1:1 from the descriptor's certificates.
#[derive(Debug, Clone, Default)]
pub struct TrustStore {
    roots: Vec<TrustedCertificate>,
}

impl TrustStore {
    /// Decode and parse every certificate; the first bad entry aborts the build.
    pub fn from_descriptor(descriptor: &IdentityProviderDescriptor) -> Result<Self, TrustError> {
        let roots = descriptor
            .certificates
            .iter()
            .enumerate()
            .map(|(index, encoded)| decode_certificate(index, encoded))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { roots })
    }

    pub fn roots(&self) -> &[TrustedCertificate] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

fn decode_certificate(index: usize, encoded: &str) -> Result<TrustedCertificate, TrustError> {
    let invalid = |reason: String| TrustError::InvalidCertificate { index, reason };

    if encoded.is_empty() {
        return Err(invalid("must not be empty".to_string()));
    }

    let der = STANDARD
        .decode(encoded)
        .map_err(|e| invalid(format!("not valid base64: {}", e)))?;

    let subject = match x509_parser::parse_x509_certificate(&der) {
        Ok((_, cert)) => cert.subject().to_string(),
        Err(e) => return Err(invalid(format!("not a valid X.509 certificate: {}", e))),
    };

    Ok(TrustedCertificate { der, subject })
}

/// Locally generated service provider key pair and self-signed certificate.
#[derive(Debug, Clone)]
pub struct EphemeralKeyMaterial {
    pub certificate_pem: String,
    pub certificate_der: Vec<u8>,
    pub private_key_pem: Secret,
}

impl EphemeralKeyMaterial {
    /// Generate a fresh key pair and self-signed certificate.
    pub fn generate() -> Result<Self, TrustError> {
        let key_generation = |e: rcgen::Error| TrustError::KeyGeneration {
            message: e.to_string(),
        };

        let key_pair = KeyPair::generate().map_err(key_generation)?;
        let mut params = CertificateParams::new(Vec::<String>::new()).map_err(key_generation)?;
        params
            .distinguished_name
            .push(DnType::CommonName, EPHEMERAL_COMMON_NAME);
        let cert = params.self_signed(&key_pair).map_err(key_generation)?;

        Ok(Self {
            certificate_pem: cert.pem(),
            certificate_der: cert.der().to_vec(),
            private_key_pem: Secret::new(key_pair.serialize_pem()),
        })
    }
}

/// Everything the flow needs from the trust layer for one attempt.
#[derive(Debug, Clone)]
pub struct TrustMaterial {
    pub store: TrustStore,
    pub ephemeral: EphemeralKeyMaterial,
}

impl TrustMaterial {
    /// Build the trust store and generate fresh ephemeral key material.
    pub fn build(descriptor: &IdentityProviderDescriptor) -> Result<Self, TrustError> {
        let store = TrustStore::from_descriptor(descriptor)?;
        if store.is_empty() {
            tracing::warn!(
                entity_id = %descriptor.entity_id,
                "Identity provider metadata contains no certificates"
            );
        }

        let ephemeral = EphemeralKeyMaterial::generate()?;
        tracing::debug!(roots = store.len(), "Built trust material");

        Ok(Self { store, ephemeral })
    }
}
