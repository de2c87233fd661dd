//! # samlgate core
//!
//! Browser-based SAML single sign-on for command-line processes.
//!
//! This crate provides:
//! - Identity provider metadata loading and parsing
//! - Trust material (IdP certificate roots, ephemeral SP key pair)
//! - HTTP-Redirect binding AuthnRequest URLs
//! - A short-lived loopback callback server that relays the assertion to the
//!   application and scrapes the single-sign-on token from its reply
//! - The lifecycle coordinator tying the pieces together
//! - A credential cache abstraction for callers that want to keep the token
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use samlgate_core::{FlowConfig, SamlFlow, SystemBrowser, metadata};
//!
//! # async fn login() -> Result<(), samlgate_core::SamlError> {
//! let descriptor = metadata::load_from_url("https://idp.example/metadata").await?;
//! let config = FlowConfig::new("https://app.example", "samlgate-cli");
//! let flow = SamlFlow::new(config, SystemBrowser::detect());
//! let auth = flow.authenticate(&descriptor).await?;
//! println!("{}", auth.auth_token.expose());
//! # Ok(())
//! # }
//! ```

pub mod authn;
pub mod browser;
pub mod callback;
pub mod error;
pub mod flow;
pub mod metadata;
pub mod model;
pub mod store;
pub mod trust;

// Re-export commonly used types at crate root
pub use authn::{AuthnRequest, build_auth_url};

pub use browser::{BrowserOpener, CommandBrowser, NoBrowser, SystemBrowser};

pub use callback::{CallbackError, CallbackHandle, CallbackServer, Relay};

pub use error::SamlError;

pub use flow::{DEFAULT_CALLBACK_PORT, DEFAULT_TIMEOUT, FlowConfig, SamlFlow};

pub use metadata::{IdentityProviderDescriptor, MetadataError, SsoService};

pub use model::{AuthData, CallbackResult, SsoCode};

pub use store::{
    CredentialCache,
    MemoryCache,
    NullCache,
    Secret,
    StoreError,
    create_cache,
};

#[cfg(feature = "keyring-store")]
pub use store::KeyringCache;

pub use trust::{EphemeralKeyMaterial, TrustError, TrustMaterial, TrustStore, TrustedCertificate};
