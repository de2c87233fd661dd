//! The authentication lifecycle.
//!
//! One [`SamlFlow::authenticate`] call runs a complete attempt: derive trust
//! material, build the request, bind the callback listener, open the browser,
//! and wait for the single callback. The listener is closed on every exit
//! path before the call returns.

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::authn::{AuthnRequest, callback_url};
use crate::browser::BrowserOpener;
use crate::callback::{CallbackServer, Relay};
use crate::error::SamlError;
use crate::metadata::IdentityProviderDescriptor;
use crate::model::AuthData;
use crate::trust::TrustMaterial;

/// Default port of the loopback callback listener.
pub const DEFAULT_CALLBACK_PORT: u16 = 8400;

/// How long to wait for the browser to come back.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Settings for one authentication attempt.
#[derive(Debug, Clone)]
pub struct FlowConfig {
    /// Base URL of the application the assertion is relayed to.
    pub app_url: String,
    /// Service provider entity ID sent as the request issuer.
    pub service_provider_issuer: String,
    pub bind_ip: IpAddr,
    /// `0` binds an ephemeral port.
    pub callback_port: u16,
    pub timeout: Duration,
    pub relay_state: Option<String>,
}

impl FlowConfig {
    pub fn new(app_url: impl Into<String>, service_provider_issuer: impl Into<String>) -> Self {
        Self {
            app_url: app_url.into(),
            service_provider_issuer: service_provider_issuer.into(),
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            callback_port: DEFAULT_CALLBACK_PORT,
            timeout: DEFAULT_TIMEOUT,
            relay_state: None,
        }
    }

    pub fn with_callback_port(mut self, port: u16) -> Self {
        self.callback_port = port;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_bind_ip(mut self, ip: IpAddr) -> Self {
        self.bind_ip = ip;
        self
    }

    pub fn with_relay_state(mut self, relay_state: impl Into<String>) -> Self {
        self.relay_state = Some(relay_state.into());
        self
    }
}

type ManualUrlHandler = Box<dyn Fn(&str) + Send + Sync>;

/// Coordinates a browser-based SAML login.
pub struct SamlFlow<B: BrowserOpener> {
    config: FlowConfig,
    opener: B,
    manual_url: ManualUrlHandler,
}

impl<B: BrowserOpener> SamlFlow<B> {
    pub fn new(config: FlowConfig, opener: B) -> Self {
        Self {
            config,
            opener,
            manual_url: Box::new(|url| {
                eprintln!("Open the following URL in your browser to sign in:\n\n  {}\n", url);
            }),
        }
    }

    /// Replace what happens with the URL when the browser cannot be opened.
    pub fn with_manual_url_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.manual_url = Box::new(handler);
        self
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    /// Run one attempt until it succeeds, fails, or times out.
    pub async fn authenticate(
        &self,
        descriptor: &IdentityProviderDescriptor,
    ) -> Result<AuthData, SamlError> {
        self.authenticate_until(descriptor, std::future::pending()).await
    }

    /// Like [`authenticate`](Self::authenticate), but gives up with
    /// [`SamlError::Cancelled`] once `cancel` completes.
    pub async fn authenticate_until<C>(
        &self,
        descriptor: &IdentityProviderDescriptor,
        cancel: C,
    ) -> Result<AuthData, SamlError>
    where
        C: Future<Output = ()>,
    {
        let trust = TrustMaterial::build(descriptor)?;
        debug!(
            roots = trust.store.len(),
            sp_certificate_bytes = trust.ephemeral.certificate_der.len(),
            "Derived trust material"
        );

        let mut request = AuthnRequest::new(descriptor, self.config.service_provider_issuer.as_str())?;
        if let Some(relay_state) = &self.config.relay_state {
            request = request.with_relay_state(relay_state.as_str());
        }

        let bind_addr = SocketAddr::new(self.config.bind_ip, self.config.callback_port);
        let server = CallbackServer::bind(bind_addr, Relay::new(&self.config.app_url)).await?;
        let port = server.local_addr().port();

        // Listener is bound but not yet serving; dropping it on error closes it.
        let auth_url = request.with_acs_url(callback_url(port)).redirect_url()?;

        let mut handle = server.spawn();

        if !self.opener.open(auth_url.as_str()) {
            warn!("Could not open a browser; showing the sign-in URL instead");
            (self.manual_url)(auth_url.as_str());
        }

        info!(port, timeout_secs = self.config.timeout.as_secs(), "Waiting for SAML callback");

        let outcome = tokio::select! {
            result = handle.wait(self.config.timeout) => Some(result),
            _ = cancel => None,
        };

        match outcome {
            Some(result) => {
                let code = result?;
                info!("SAML authentication complete");
                Ok(AuthData::from(code))
            }
            None => {
                handle.cancel().await;
                info!("SAML authentication cancelled");
                Err(SamlError::Cancelled)
            }
        }
    }
}
