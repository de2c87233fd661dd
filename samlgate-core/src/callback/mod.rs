//! The loopback callback server.
//!
//! The identity provider posts its assertion through the user's browser to
//! this listener. The single meaningful request is relayed to the
//! application's own SAML callback endpoint, the token is scraped from the
//! reply, the browser gets a self-closing page, and exactly one result is
//! published.
//!
//! # Lifecycle
//!
//! 1. [`CallbackServer::bind`] binds the listener.
//! 2. [`CallbackServer::spawn`] starts the accept loop and a watcher task.
//! 3. Each connection runs on its own task. Favicon probes get a 404 and
//!    CORS preflights an empty 200; neither ends the flow. Anything else is
//!    the callback.
//! 4. Handlers publish into a single-slot channel without blocking.
//! 5. The watcher takes the first result, stops the accept loop, waits for
//!    the listener to be dropped, and only then hands the result to
//!    [`CallbackHandle::wait`]. Later results are discarded.

mod extract;
mod http;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, SET_COOKIE};
use thiserror::Error;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::error::SamlError;
use crate::model::{CallbackResult, SsoCode};
use crate::store::Secret;

pub use extract::extract_token;

use self::http::{Request, Response};

/// Path of the application's SAML assertion consumer, relative to its base URL.
pub const RELAY_CALLBACK_PATH: &str = "/api/v1/saml/callback";

const CONFIRMATION_PAGE: &str = r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="utf-8">
    <title>samlgate</title>
    <style>
      html { background: #f3f7f4; }
      body { display: flex; justify-content: center; align-items: center; height: 100vh; margin: 0; }
      #wrapper { text-align: center; font-family: monospace, monospace; }
    </style>
  </head>
  <body>
    <div id="wrapper">
      <p>YOU MAY CLOSE THIS WINDOW</p>
      <script type="text/javascript">
        window.close()
      </script>
    </div>
  </body>
</html>
"#;

const FAILURE_PAGE: &str = r#"<!doctype html>
<html lang="en">
  <head><meta charset="utf-8"><title>samlgate</title></head>
  <body>
    <p>Authentication failed. Return to your terminal for details.</p>
  </body>
</html>
"#;

/// Failures of the single callback request.
#[derive(Debug, Error)]
pub enum CallbackError {
    /// The browser's request could not be read.
    #[error("bad SAML callback request: {source}")]
    Read {
        #[source]
        source: std::io::Error,
    },

    /// The assertion could not be posted to the application.
    #[error("error posting SAML assertion: {source}")]
    Relay {
        #[source]
        source: reqwest::Error,
    },

    /// The application's reply could not be read.
    #[error("error reading SAML response body: {source}")]
    ResponseRead {
        #[source]
        source: reqwest::Error,
    },

    /// The application's reply did not contain a token.
    #[error("could not find SSO code in SAML authentication response. Response: {body}")]
    TokenNotFound { body: String },

    /// The confirmation page could not be sent to the browser.
    #[error("failed to send auto-close response: {source}")]
    ResponseWrite {
        #[source]
        source: std::io::Error,
    },
}

/// Forwards the browser's assertion to the application.
#[derive(Debug, Clone)]
pub struct Relay {
    callback_url: String,
}

impl Relay {
    /// Relay to `<app_url>/api/v1/saml/callback`.
    pub fn new(app_url: &str) -> Self {
        Self {
            callback_url: format!("{}{}", app_url.trim_end_matches('/'), RELAY_CALLBACK_PATH),
        }
    }

    pub fn callback_url(&self) -> &str {
        &self.callback_url
    }

    /// Post `payload` verbatim and scrape the token from the reply.
    ///
    /// Each call uses a fresh client with its own cookie store that does not
    /// follow redirects: the token is in the first response.
    pub async fn forward(&self, payload: Vec<u8>) -> CallbackResult {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .cookie_store(true)
            .build()
            .map_err(|source| CallbackError::Relay { source })?;

        debug!(url = %self.callback_url, bytes = payload.len(), "Relaying SAML assertion");

        let response = client
            .post(&self.callback_url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(payload)
            .send()
            .await
            .map_err(|source| CallbackError::Relay { source })?;

        let status = response.status();
        let cookies = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(String::from)
            .collect();

        let body = response
            .text()
            .await
            .map_err(|source| CallbackError::ResponseRead { source })?;
        debug!(%status, bytes = body.len(), "Received relay response");

        let token = extract_token(&body)?;
        Ok(SsoCode {
            token: Secret::new(token),
            cookies,
        })
    }
}

/// A bound, not yet running, callback listener.
pub struct CallbackServer {
    listener: TcpListener,
    addr: SocketAddr,
    relay: Arc<Relay>,
}

impl CallbackServer {
    /// Bind the listener. Port 0 picks a free port.
    pub async fn bind(addr: SocketAddr, relay: Relay) -> Result<Self, SamlError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| SamlError::Bind { addr, source })?;
        let addr = listener
            .local_addr()
            .map_err(|source| SamlError::Bind { addr, source })?;

        Ok(Self {
            listener,
            addr,
            relay: Arc::new(relay),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Start serving. The returned handle yields the single result.
    pub fn spawn(self) -> CallbackHandle {
        let (result_tx, result_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let (deliver_tx, deliver_rx) = oneshot::channel();

        let server = tokio::spawn(accept_loop(self.listener, self.relay, result_tx, shutdown_rx));
        tokio::spawn(watch(result_rx, server, shutdown_tx, cancel_rx, deliver_tx));

        info!(addr = %self.addr, "Listening for SAML callback");

        CallbackHandle {
            addr: self.addr,
            result: Some(deliver_rx),
            cancel: Some(cancel_tx),
        }
    }
}

/// Handle to a running callback server.
///
/// Dropping the handle closes the listener.
pub struct CallbackHandle {
    addr: SocketAddr,
    result: Option<oneshot::Receiver<Result<SsoCode, SamlError>>>,
    cancel: Option<oneshot::Sender<()>>,
}

impl CallbackHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Wait for the result, closing the listener if none arrives in `timeout`.
    ///
    /// The listener is always closed by the time this returns.
    pub async fn wait(&mut self, timeout: Duration) -> Result<SsoCode, SamlError> {
        let Some(result) = self.result.as_mut() else {
            return Err(SamlError::Server {
                message: "callback result already consumed".to_string(),
            });
        };

        let outcome = match tokio::time::timeout(timeout, &mut *result).await {
            Ok(received) => flatten(received),
            Err(_) => {
                warn!("No SAML callback within {:?}", timeout);
                if let Some(cancel) = self.cancel.take() {
                    let _ = cancel.send(());
                }
                after_deadline(result.await, timeout)
            }
        };

        self.result = None;
        outcome
    }

    /// Stop waiting and close the listener.
    pub async fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        if let Some(result) = self.result.take() {
            let _ = result.await;
        }
    }
}

/// Outcome of a wait whose deadline passed before the watcher answered.
///
/// A callback result that raced the deadline wins, success or failure;
/// anything else is a timeout.
fn after_deadline(
    received: Result<Result<SsoCode, SamlError>, oneshot::error::RecvError>,
    timeout: Duration,
) -> Result<SsoCode, SamlError> {
    match received {
        Ok(Ok(code)) => Ok(code),
        Ok(Err(e @ SamlError::Callback(_))) => Err(e),
        _ => Err(SamlError::Timeout {
            seconds: timeout.as_secs(),
        }),
    }
}

fn flatten(
    received: Result<Result<SsoCode, SamlError>, oneshot::error::RecvError>,
) -> Result<SsoCode, SamlError> {
    received.unwrap_or_else(|_| {
        Err(SamlError::Server {
            message: "callback watcher stopped without a result".to_string(),
        })
    })
}

async fn accept_loop(
    listener: TcpListener,
    relay: Arc<Relay>,
    results: mpsc::Sender<CallbackResult>,
    mut shutdown: oneshot::Receiver<()>,
) -> std::io::Result<()> {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                debug!("Callback server shutdown signal received");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "Accepted callback connection");
                    connections.spawn(handle_connection(stream, relay.clone(), results.clone()));
                }
                Err(e) if is_connection_error(&e) => {
                    debug!("Dropped callback connection before accept: {}", e);
                }
                Err(e) => return Err(e),
            },
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = joined {
                    warn!("Callback connection task failed: {}", e);
                }
            }
        }
    }

    // Dropping the listener releases the port; dropping the set aborts
    // connections still in flight.
    drop(listener);
    connections.shutdown().await;
    Ok(())
}

/// Accept failures that concern one pending connection rather than the listener.
fn is_connection_error(e: &std::io::Error) -> bool {
    use std::io::ErrorKind;

    matches!(
        e.kind(),
        ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionRefused
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
            | ErrorKind::TimedOut
    )
}

async fn watch(
    mut results: mpsc::Receiver<CallbackResult>,
    mut server: JoinHandle<std::io::Result<()>>,
    shutdown: oneshot::Sender<()>,
    mut cancel: oneshot::Receiver<()>,
    deliver: oneshot::Sender<Result<SsoCode, SamlError>>,
) {
    let mut server_finished = false;

    let outcome = tokio::select! {
        biased;

        received = results.recv() => match received {
            Some(result) => result.map_err(SamlError::from),
            None => Err(SamlError::Server {
                message: "callback handlers stopped without a result".to_string(),
            }),
        },
        joined = &mut server => {
            server_finished = true;
            Err(server_exit_error(joined))
        }
        _ = &mut cancel => Err(SamlError::Cancelled),
    };

    results.close();
    let _ = shutdown.send(());

    if !server_finished {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Callback listener failed during shutdown: {}", e),
            Err(e) => warn!("Callback listener task failed during shutdown: {}", e),
        }
    }
    info!("Callback listener closed");

    let _ = deliver.send(outcome);
}

fn server_exit_error(joined: Result<std::io::Result<()>, JoinError>) -> SamlError {
    let message = match joined {
        Ok(Ok(())) => "callback listener stopped unexpectedly".to_string(),
        Ok(Err(e)) => format!("callback listener failed: {}", e),
        Err(e) => format!("callback listener task failed: {}", e),
    };
    SamlError::Server { message }
}

fn publish(results: &mpsc::Sender<CallbackResult>, result: CallbackResult) {
    if results.try_send(result).is_err() {
        debug!("A callback result was already published; discarding this one");
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    relay: Arc<Relay>,
    results: mpsc::Sender<CallbackResult>,
) {
    let (reader, mut writer) = stream.split();
    let mut reader = BufReader::new(reader);

    let request: Request = match http::read_request(&mut reader).await {
        Ok(Some(request)) => request,
        Ok(None) => {
            debug!("Connection closed without a request");
            return;
        }
        Err(source) => {
            let _ = http::write_response(&mut writer, &Response::html(400, FAILURE_PAGE)).await;
            publish(&results, Err(CallbackError::Read { source }));
            return;
        }
    };

    debug!(method = %request.method, path = %request.path(), "Callback request");

    if request.path().ends_with("/favicon.ico") {
        let _ = http::write_response(&mut writer, &Response::empty(404)).await;
        return;
    }

    // Private network access preflight
    if request.method.eq_ignore_ascii_case("OPTIONS") {
        let response = Response::empty(200)
            .with_header("Access-Control-Allow-Origin", "*")
            .with_header("Access-Control-Allow-Methods", "POST, OPTIONS")
            .with_header("Access-Control-Allow-Headers", "*")
            .with_header("Access-Control-Allow-Private-Network", "true");
        let _ = http::write_response(&mut writer, &response).await;
        return;
    }

    match relay.forward(request.body).await {
        Ok(code) => {
            let page = Response::html(200, CONFIRMATION_PAGE);
            match http::write_response(&mut writer, &page).await {
                Ok(()) => publish(&results, Ok(code)),
                Err(source) => publish(&results, Err(CallbackError::ResponseWrite { source })),
            }
        }
        Err(e) => {
            warn!("SAML callback failed: {}", e);
            let _ = http::write_response(&mut writer, &Response::html(400, FAILURE_PAGE)).await;
            publish(&results, Err(e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_url() {
        assert_eq!(
            Relay::new("https://app.example/").callback_url(),
            "https://app.example/api/v1/saml/callback"
        );
        assert_eq!(
            Relay::new("http://localhost:3000").callback_url(),
            "http://localhost:3000/api/v1/saml/callback"
        );
    }

    #[tokio::test]
    async fn test_publish_never_blocks() {
        let (tx, mut rx) = mpsc::channel(1);

        publish(&tx, Err(CallbackError::TokenNotFound { body: "first".into() }));
        publish(&tx, Err(CallbackError::TokenNotFound { body: "second".into() }));

        match rx.recv().await {
            Some(Err(CallbackError::TokenNotFound { body })) => assert_eq!(body, "first"),
            other => panic!("unexpected: {:?}", other.map(|r| r.is_ok())),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_raced_result_beats_timeout() {
        let timeout = Duration::from_secs(1);

        let code = SsoCode {
            token: Secret::new("late"),
            cookies: Vec::new(),
        };
        assert_eq!(after_deadline(Ok(Ok(code)), timeout).unwrap().token.expose(), "late");

        let failure = SamlError::Callback(CallbackError::TokenNotFound { body: "denied".into() });
        match after_deadline(Ok(Err(failure)), timeout) {
            Err(SamlError::Callback(CallbackError::TokenNotFound { body })) => assert_eq!(body, "denied"),
            other => panic!("unexpected: {:?}", other.map(|c| c.cookies)),
        }
    }

    #[tokio::test]
    async fn test_cancelled_or_closed_after_deadline_is_timeout() {
        let timeout = Duration::from_secs(3);

        let cancelled = after_deadline(Ok(Err(SamlError::Cancelled)), timeout);
        assert!(matches!(cancelled, Err(SamlError::Timeout { seconds: 3 })));

        let (tx, rx) = oneshot::channel::<Result<SsoCode, SamlError>>();
        drop(tx);
        let closed = after_deadline(rx.await, timeout);
        assert!(matches!(closed, Err(SamlError::Timeout { seconds: 3 })));
    }

    #[test]
    fn test_connection_level_accept_errors_are_not_fatal() {
        use std::io::{Error, ErrorKind};

        assert!(is_connection_error(&Error::from(ErrorKind::ConnectionAborted)));
        assert!(is_connection_error(&Error::from(ErrorKind::ConnectionReset)));
        assert!(is_connection_error(&Error::from(ErrorKind::Interrupted)));
        assert!(!is_connection_error(&Error::other("too many open files")));
        assert!(!is_connection_error(&Error::from(ErrorKind::PermissionDenied)));
    }

    #[tokio::test]
    async fn test_cancel_closes_listener() {
        let server = CallbackServer::bind("127.0.0.1:0".parse().unwrap(), Relay::new("http://127.0.0.1:9"))
            .await
            .unwrap();
        let addr = server.local_addr();

        let mut handle = server.spawn();
        assert!(TcpStream::connect(addr).await.is_ok());

        handle.cancel().await;
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_bind_conflict() {
        let first = CallbackServer::bind("127.0.0.1:0".parse().unwrap(), Relay::new("http://x"))
            .await
            .unwrap();

        let result = CallbackServer::bind(first.local_addr(), Relay::new("http://x")).await;
        assert!(matches!(result, Err(SamlError::Bind { .. })));
    }
}
