//! Top-level error type for the SAML flow.

use std::net::SocketAddr;

use thiserror::Error;

use crate::authn::RequestBuildError;
use crate::callback::CallbackError;
use crate::metadata::MetadataError;
use crate::trust::TrustError;

/// Every terminal failure of an authentication attempt.
///
/// There is no retry at this level: a caller that wants another attempt
/// starts over from metadata loading.
#[derive(Debug, Error)]
pub enum SamlError {
    /// Metadata could not be downloaded, read or parsed.
    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    /// Certificate material in the metadata is unusable.
    #[error("trust error: {0}")]
    Trust(#[from] TrustError),

    /// The authentication request could not be built.
    #[error("request build error: {0}")]
    RequestBuild(#[from] RequestBuildError),

    /// The browser callback failed.
    #[error("callback error: {0}")]
    Callback(#[from] CallbackError),

    /// The callback listener could not be bound.
    #[error("failed to bind callback listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The callback listener stopped without producing a result.
    #[error("callback server error: {message}")]
    Server { message: String },

    /// No callback arrived in time.
    #[error("timed out after {seconds}s waiting for the browser callback")]
    Timeout { seconds: u64 },

    /// The wait was cancelled by the caller.
    #[error("authentication cancelled")]
    Cancelled,
}
