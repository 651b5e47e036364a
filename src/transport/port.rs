//! Bidirectional RPC port to one UI or script context.
//!
//! A [`Port`] carries JSON frames over a pair of string channels. The
//! WebSocket bridge in [`super::websocket`] feeds those channels from a
//! socket; tests cross-wire two ports with [`Port::pair`].
//!
//! # Event flow
//!
//! - Inbound requests are routed through the registered
//!   [`RequestRouter`]s in order; the first one returning `Some` answers.
//!   Hello and ping are answered by the port itself.
//! - Inbound responses complete the matching outstanding [`Port::request`],
//!   or are handed to the `on_response` listeners.
//! - When the inbound channel ends, or [`Port::close`] is called, pending
//!   requests fail, routers and listeners are dropped and the close
//!   listeners run. This happens once.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Value, from_str, to_string};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep, timeout};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{PortId, RequestId};
use crate::protocol::{HELLO, Message, Notification, PING, RpcRequest, RpcResponse};

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for requests sent over a port.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum outstanding requests per port.
const MAX_PENDING_REQUESTS: usize = 100;

// ============================================================================
// Types
// ============================================================================

/// Map of request IDs to response channels.
type CorrelationMap = FxHashMap<RequestId, oneshot::Sender<RpcResponse>>;

/// Listener for responses nobody is waiting on.
type ResponseListener = Arc<dyn Fn(&RpcResponse) + Send + Sync>;

/// One-shot listener run when the port closes.
type CloseListener = Box<dyn FnOnce() + Send>;

/// What is on the other end of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortKind {
    /// A content script injected in a web page.
    Script,
    /// A foreground UI: popup, tab or page.
    Foreground,
    /// The background, seen from a foreground UI.
    Background,
}

/// Handles inbound requests on a port.
#[async_trait]
pub trait RequestRouter: Send + Sync {
    /// Returns `None` if this router does not handle the method.
    async fn route(&self, port: &Port, request: &RpcRequest) -> Option<Result<Value>>;
}

// ============================================================================
// Port
// ============================================================================

struct PortInner {
    id: PortId,
    kind: PortKind,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    correlation: Mutex<CorrelationMap>,
    routers: Mutex<Vec<Arc<dyn RequestRouter>>>,
    response_listeners: Mutex<Vec<ResponseListener>>,
    close_listeners: Mutex<Vec<CloseListener>>,
    hello: watch::Sender<bool>,
    closed: AtomicBool,
    closed_tx: watch::Sender<bool>,
}

/// RPC port. Cloning shares the port.
#[derive(Clone)]
pub struct Port {
    inner: Arc<PortInner>,
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl PartialEq for Port {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Port {}

// ============================================================================
// Port - Constructor
// ============================================================================

impl Port {
    /// Creates a port over a pair of frame channels.
    ///
    /// Spawns the read loop. Must be called inside a tokio runtime.
    #[must_use]
    pub fn new(
        kind: PortKind,
        outbound: mpsc::UnboundedSender<String>,
        inbound: mpsc::UnboundedReceiver<String>,
    ) -> Self {
        let (hello, _) = watch::channel(false);
        let (closed_tx, _) = watch::channel(false);

        let port = Self {
            inner: Arc::new(PortInner {
                id: PortId::generate(),
                kind,
                outbound: Mutex::new(Some(outbound)),
                correlation: Mutex::new(CorrelationMap::default()),
                routers: Mutex::new(Vec::new()),
                response_listeners: Mutex::new(Vec::new()),
                close_listeners: Mutex::new(Vec::new()),
                hello,
                closed: AtomicBool::new(false),
                closed_tx,
            }),
        };

        tokio::spawn(port.clone().run_read_loop(inbound));

        debug!(port_id = %port.id(), ?kind, "Port opened");

        port
    }

    /// Creates two ports wired to each other.
    ///
    /// Returns the `left` end then the `right` end; each port's kind names
    /// its peer.
    #[must_use]
    pub fn pair(left: PortKind, right: PortKind) -> (Self, Self) {
        let (left_tx, right_rx) = mpsc::unbounded_channel();
        let (right_tx, left_rx) = mpsc::unbounded_channel();

        (
            Self::new(right, left_tx, left_rx),
            Self::new(left, right_tx, right_rx),
        )
    }
}

// ============================================================================
// Port - Accessors
// ============================================================================

impl Port {
    /// Returns the port id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> PortId {
        self.inner.id
    }

    /// Returns what the other end is.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> PortKind {
        self.inner.kind
    }

    /// Returns `true` once the port has closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Returns the number of outstanding requests.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.correlation.lock().len()
    }
}

// ============================================================================
// Port - Outbound
// ============================================================================

impl Port {
    /// Sends a request and waits for its response (30s timeout).
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the port closes first
    /// - [`Error::RequestTimeout`] if no response arrives in time
    /// - [`Error::Protocol`] if too many requests are outstanding
    pub async fn request(&self, request: RpcRequest) -> Result<RpcResponse> {
        self.request_with_timeout(request, DEFAULT_REQUEST_TIMEOUT)
            .await
    }

    /// Sends a request and waits for its response.
    pub async fn request_with_timeout(
        &self,
        request: RpcRequest,
        request_timeout: Duration,
    ) -> Result<RpcResponse> {
        let request_id = request.id;
        let json = to_string(&request)?;

        let response_rx = {
            let mut correlation = self.inner.correlation.lock();
            if correlation.len() >= MAX_PENDING_REQUESTS {
                warn!(port_id = %self.id(), pending = correlation.len(), "Too many pending requests");
                return Err(Error::protocol(format!(
                    "Too many pending requests: {}/{}",
                    correlation.len(),
                    MAX_PENDING_REQUESTS
                )));
            }

            let (response_tx, response_rx) = oneshot::channel();
            correlation.insert(request_id, response_tx);
            response_rx
        };

        if let Err(e) = self.send_frame(json) {
            self.inner.correlation.lock().remove(&request_id);
            return Err(e);
        }

        trace!(port_id = %self.id(), %request_id, method = %request.method, "Request sent");

        match timeout(request_timeout, response_rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                self.inner.correlation.lock().remove(&request_id);
                Err(Error::request_timeout(
                    request_id,
                    request_timeout.as_millis() as u64,
                ))
            }
        }
    }

    /// Pushes a notification without waiting for an answer.
    ///
    /// Failures are logged only.
    pub fn notify(&self, notification: Notification) {
        let request = notification.into_request();
        let result = to_string(&request)
            .map_err(Error::from)
            .and_then(|json| self.send_frame(json));

        if let Err(e) = result {
            debug!(port_id = %self.id(), method = %request.method, error = %e, "Notification dropped");
        }
    }

    /// Sends the hello handshake.
    pub fn send_hello(&self) {
        self.notify(Notification::Hello);
    }

    fn send_response(&self, response: &RpcResponse) {
        let result = to_string(response)
            .map_err(Error::from)
            .and_then(|json| self.send_frame(json));

        if let Err(e) = result {
            debug!(port_id = %self.id(), id = %response.id, error = %e, "Response dropped");
        }
    }

    fn send_frame(&self, json: String) -> Result<()> {
        let outbound = self.inner.outbound.lock();
        let sender = outbound.as_ref().ok_or(Error::ConnectionClosed)?;
        sender.send(json).map_err(|_| Error::ConnectionClosed)
    }
}

// ============================================================================
// Port - Handshake & Keep-alive
// ============================================================================

impl Port {
    /// Waits for the other end's hello.
    ///
    /// # Errors
    ///
    /// - [`Error::HandshakeTimeout`] if no hello arrives in time
    /// - [`Error::ConnectionClosed`] if the port closes first
    pub async fn wait_hello(&self, hello_timeout: Duration) -> Result<()> {
        let mut hello = self.inner.hello.subscribe();
        let mut closed = self.inner.closed_tx.subscribe();

        let wait = async {
            tokio::select! {
                result = hello.wait_for(|received| *received) => {
                    result.map(|_| ()).map_err(|_| Error::ConnectionClosed)
                }
                _ = closed.wait_for(|closed| *closed) => Err(Error::ConnectionClosed),
            }
        };

        match timeout(hello_timeout, wait).await {
            Ok(result) => {
                if result.is_ok() {
                    debug!(port_id = %self.id(), "Hello received");
                }
                result
            }
            Err(_) => Err(Error::handshake_timeout(hello_timeout.as_millis() as u64)),
        }
    }

    /// Pings the other end every `interval` until the port closes.
    ///
    /// A ping left unanswered for one interval closes the port.
    pub async fn run_ping_loop(self, interval: Duration) {
        loop {
            tokio::select! {
                _ = self.closed() => break,
                _ = sleep(interval) => {}
            }

            let ping = RpcRequest::new(PING, Value::Array(Vec::new()));
            if let Err(e) = self.request_with_timeout(ping, interval).await {
                debug!(port_id = %self.id(), error = %e, "Ping failed");
                self.close();
                break;
            }
        }

        trace!(port_id = %self.id(), "Ping loop ended");
    }
}

// ============================================================================
// Port - Listeners
// ============================================================================

impl Port {
    /// Appends a request router.
    ///
    /// Ignored once the port has closed.
    pub fn add_router(&self, router: Arc<dyn RequestRouter>) {
        if !self.is_closed() {
            self.inner.routers.lock().push(router);
        }
    }

    /// Registers a listener for uncorrelated responses.
    pub fn on_response(&self, listener: impl Fn(&RpcResponse) + Send + Sync + 'static) {
        if !self.is_closed() {
            self.inner.response_listeners.lock().push(Arc::new(listener));
        }
    }

    /// Registers a listener run once when the port closes.
    ///
    /// Runs immediately if the port is already closed.
    pub fn on_close(&self, listener: impl FnOnce() + Send + 'static) {
        {
            let mut listeners = self.inner.close_listeners.lock();
            if !self.is_closed() {
                listeners.push(Box::new(listener));
                return;
            }
        }
        listener();
    }

    /// Resolves when the port closes.
    pub async fn closed(&self) {
        let mut closed = self.inner.closed_tx.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
    }
}

// ============================================================================
// Port - Lifecycle
// ============================================================================

impl Port {
    /// Closes the port.
    ///
    /// Idempotent: only the first call fails pending requests and runs the
    /// close listeners.
    pub fn close(&self) {
        let listeners = {
            // Holding the listener lock orders this against `on_close`.
            let mut listeners = self.inner.close_listeners.lock();
            if self.inner.closed.swap(true, Ordering::SeqCst) {
                return;
            }
            std::mem::take(&mut *listeners)
        };

        self.inner.outbound.lock().take();
        self.inner.routers.lock().clear();
        self.inner.response_listeners.lock().clear();

        let pending: Vec<_> = self.inner.correlation.lock().drain().collect();
        if !pending.is_empty() {
            debug!(port_id = %self.id(), count = pending.len(), "Failed pending requests on close");
        }
        drop(pending);

        self.inner.closed_tx.send_replace(true);

        for listener in listeners {
            listener();
        }

        debug!(port_id = %self.id(), kind = ?self.kind(), "Port closed");
    }

    async fn run_read_loop(self, mut inbound: mpsc::UnboundedReceiver<String>) {
        loop {
            tokio::select! {
                frame = inbound.recv() => {
                    match frame {
                        Some(text) => self.handle_incoming_message(&text),
                        None => {
                            debug!(port_id = %self.id(), "Inbound channel ended");
                            break;
                        }
                    }
                }
                _ = self.closed() => break,
            }
        }

        self.close();
    }

    fn handle_incoming_message(&self, text: &str) {
        match from_str::<Message>(text) {
            Ok(Message::Response(response)) => self.handle_response(response),
            Ok(Message::Request(request)) => self.handle_request(request),
            Err(e) => warn!(port_id = %self.id(), error = %e, "Failed to parse incoming message"),
        }
    }

    fn handle_response(&self, response: RpcResponse) {
        let tx = self.inner.correlation.lock().remove(&response.id);

        if let Some(tx) = tx {
            let _ = tx.send(response);
            return;
        }

        let listeners: Vec<ResponseListener> = self.inner.response_listeners.lock().clone();
        if listeners.is_empty() {
            trace!(port_id = %self.id(), id = %response.id, "Uncorrelated response dropped");
        }
        for listener in listeners {
            listener(&response);
        }
    }

    fn handle_request(&self, request: RpcRequest) {
        match request.method.as_str() {
            HELLO => {
                self.inner.hello.send_replace(true);
                self.send_response(&RpcResponse::ok(request.id, Value::Null));
            }
            PING => {
                self.send_response(&RpcResponse::ok(request.id, Value::Null));
            }
            _ => {
                let port = self.clone();
                tokio::spawn(async move {
                    let result = port.route(&request).await;
                    if let Err(e) = &result {
                        debug!(port_id = %port.id(), method = %request.method, error = %e, "Request failed");
                    }
                    port.send_response(&RpcResponse::from_result(request.id, result));
                });
            }
        }
    }

    async fn route(&self, request: &RpcRequest) -> Result<Value> {
        let routers: Vec<Arc<dyn RequestRouter>> = self.inner.routers.lock().clone();

        for router in routers {
            if let Some(result) = router.route(self, request).await {
                return result;
            }
        }

        Err(Error::method_not_found(&request.method))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl RequestRouter for Echo {
        async fn route(&self, _port: &Port, request: &RpcRequest) -> Option<Result<Value>> {
            (request.method == "echo").then(|| Ok(request.params.clone()))
        }
    }

    struct Fails;

    #[async_trait]
    impl RequestRouter for Fails {
        async fn route(&self, _port: &Port, request: &RpcRequest) -> Option<Result<Value>> {
            (request.method == "fail").then(|| Err(Error::user_rejected("no")))
        }
    }

    #[tokio::test]
    async fn test_request_routed() {
        let (client, server) = Port::pair(PortKind::Foreground, PortKind::Background);
        server.add_router(Arc::new(Fails));
        server.add_router(Arc::new(Echo));

        let response = client
            .request(RpcRequest::new("echo", json!([1, 2])))
            .await
            .expect("response");
        assert_eq!(response.into_result().expect("ok"), json!([1, 2]));

        let response = client
            .request(RpcRequest::new("fail", json!([])))
            .await
            .expect("response");
        assert!(matches!(response.into_result(), Err(Error::UserRejected { .. })));
    }

    #[tokio::test]
    async fn test_unhandled_method() {
        let (client, _server) = Port::pair(PortKind::Foreground, PortKind::Background);

        let response = client
            .request(RpcRequest::new("nope", json!([])))
            .await
            .expect("response");
        assert!(matches!(response.into_result(), Err(Error::MethodNotFound { .. })));
    }

    #[tokio::test]
    async fn test_hello_handshake() {
        let (client, server) = Port::pair(PortKind::Foreground, PortKind::Background);

        server.send_hello();
        client
            .wait_hello(Duration::from_secs(1))
            .await
            .expect("hello");
    }

    #[tokio::test(start_paused = true)]
    async fn test_hello_timeout() {
        let (client, _server) = Port::pair(PortKind::Foreground, PortKind::Background);

        let err = client
            .wait_hello(Duration::from_millis(1000))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::HandshakeTimeout { timeout_ms: 1000 }));
    }

    #[tokio::test]
    async fn test_close_runs_listeners_once() {
        let (client, server) = Port::pair(PortKind::Foreground, PortKind::Background);
        let count = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&count);
        server.on_close(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        client.close();
        server.closed().await;
        server.close();
        server.close();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(server.is_closed());
    }

    #[tokio::test]
    async fn test_on_close_after_close_runs_immediately() {
        let (client, _server) = Port::pair(PortKind::Foreground, PortKind::Background);
        client.close();

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        client.on_close(move || flag.store(true, Ordering::SeqCst));

        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_pending_request_fails_on_close() {
        let (client, server) = Port::pair(PortKind::Foreground, PortKind::Background);

        let pending = tokio::spawn({
            let client = client.clone();
            async move { client.request(RpcRequest::new("never", json!([]))).await }
        });

        server.close();
        client.closed().await;

        let result = pending.await.expect("join");
        assert!(matches!(result, Err(Error::ConnectionClosed)));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_uncorrelated_response_reaches_listener() {
        let (client, server) = Port::pair(PortKind::Foreground, PortKind::Background);
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));

        client.on_response(move |response| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(response.id);
            }
        });

        let id = RequestId::generate();
        server.send_response(&RpcResponse::ok(id, json!("done")));

        assert_eq!(rx.await.expect("listener"), id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_loop_closes_dead_port() {
        let (tx, _peer_rx) = mpsc::unbounded_channel();
        let (_peer_tx, rx) = mpsc::unbounded_channel::<String>();
        let port = Port::new(PortKind::Script, tx, rx);

        tokio::spawn(port.clone().run_ping_loop(Duration::from_secs(1)));
        port.closed().await;

        assert!(port.is_closed());
    }
}
