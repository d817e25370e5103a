//! Connection - the request/response correlator
//!
//! One connection owns one transport. A dedicated reader task drains
//! inbound messages and completes per-id waiters; callers share the write
//! half and park on oneshot channels. This keeps event delivery prompt and
//! lets any number of concurrent callers issue overlapping commands; the
//! correlator never assumes replies arrive in order.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use chromite_protocol::{CdpError, Command, Event, IdAllocator, Message, ProtocolError};
use chromite_transport::{
    DEFAULT_MAX_MESSAGE_SIZE, Endpoint, TransportError, TransportRx, TransportTx, WsConfig,
    WsEndpoint, WsTransport,
};

use crate::error::{Error, Result};
use crate::events::{EventFilter, Subscription};
use crate::session::Session;

/// Connection configuration
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// How long `call` waits for a reply before failing with `Timeout`
    pub timeout: Duration,

    /// Abort the connection on inbound messages larger than this
    pub max_message_size: usize,

    /// Log full wire payloads at debug level instead of trace
    pub verbose: bool,

    /// Extra PEM root certificates for `wss://` endpoints
    pub extra_roots: Vec<PathBuf>,

    /// Event fan-out capacity; the oldest events are dropped when a
    /// subscriber lags this far behind
    pub event_buffer: usize,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            verbose: false,
            extra_roots: Vec::new(),
            event_buffer: 256,
        }
    }
}

pub(crate) struct ConnectionInner {
    tx: Box<dyn TransportTx>,
    pending: DashMap<u64, oneshot::Sender<Result<Value>>>,
    ids: IdAllocator,
    /// Dropped on shutdown so subscriptions observe the end of the stream
    events: parking_lot::Mutex<Option<broadcast::Sender<Event>>>,
    /// sessionId -> targetId for sessions attached through this connection
    sessions: DashMap<String, String>,
    closed: AtomicBool,
    timeout: Duration,
    verbose: bool,
}

impl ConnectionInner {
    pub(crate) async fn call(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&str>,
    ) -> Result<Value> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed.into());
        }
        if method.is_empty() {
            return Err(ProtocolError::MissingField("method").into());
        }

        let id = self.ids.next();
        let command = Command::new(id, method, params, session_id);
        let text = command.serialize()?;

        // Register before sending so a reply racing the registration still
        // finds its waiter
        let (waiter_tx, waiter_rx) = oneshot::channel();
        self.pending.insert(id, waiter_tx);

        // Shutdown sets the flag before draining, so an entry inserted after
        // the drain is always caught here
        if self.closed.load(Ordering::SeqCst) {
            self.pending.remove(&id);
            return Err(TransportError::ConnectionClosed.into());
        }

        if self.verbose {
            debug!("send: {}", text);
        } else {
            trace!("send: {}", text);
        }

        if let Err(e) = self.tx.send(&text).await {
            self.pending.remove(&id);
            if e.is_fatal() {
                self.shutdown();
            }
            return Err(e.into());
        }

        match tokio::time::timeout(self.timeout, waiter_rx).await {
            Ok(Ok(result)) => result,
            // Waiter dropped without a reply: the connection shut down
            Ok(Err(_)) => Err(TransportError::ConnectionClosed.into()),
            Err(_) => {
                self.pending.remove(&id);
                debug!("call {} (id {}) timed out", method, id);
                Err(TransportError::Timeout.into())
            }
        }
    }

    pub(crate) fn subscribe(&self, filter: EventFilter) -> Subscription {
        let rx = self.events.lock().as_ref().map(|tx| tx.subscribe());
        Subscription::new(rx, filter)
    }

    pub(crate) fn register_session(&self, session_id: &str, target_id: &str) {
        self.sessions
            .insert(session_id.to_string(), target_id.to_string());
    }

    pub(crate) fn unregister_session(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    pub(crate) fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn complete(&self, id: u64, result: Result<Value>) {
        match self.pending.remove(&id) {
            Some((_, waiter)) => {
                let _ = waiter.send(result);
            }
            // Late replies after a timeout land here; not fatal
            None => trace!("no pending call for id {}, dropping reply", id),
        }
    }

    fn publish(&self, event: Event) {
        if let Some(tx) = self.events.lock().as_ref() {
            // Fails only when no subscriber exists, which is fine
            let _ = tx.send(event);
        }
    }

    /// Mark dead and wake everyone; returns false when already down
    fn shutdown(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }

        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, waiter)) = self.pending.remove(&id) {
                let _ = waiter.send(Err(TransportError::ConnectionClosed.into()));
            }
        }

        self.sessions.clear();
        self.events.lock().take();
        true
    }
}

/// A live channel to one DevTools endpoint
///
/// Exposes the two primitives everything else builds on: `call` and
/// `subscribe`. Cheap operations apart from the wire wait itself; the
/// transport write path is serialized internally.
pub struct Connection {
    inner: Arc<ConnectionInner>,
    reader: JoinHandle<()>,
}

impl Connection {
    /// Open a WebSocket connection to a `ws://` or `wss://` URL
    pub async fn connect(url: &str, options: ConnectOptions) -> Result<Self> {
        let endpoint = WsEndpoint::parse(url)?;
        Self::open(&Endpoint::Ws(endpoint), options).await
    }

    /// Open a connection to an endpoint of either scheme
    pub async fn open(endpoint: &Endpoint, options: ConnectOptions) -> Result<Self> {
        match endpoint {
            Endpoint::Ws(ws) => {
                let transport = WsTransport::connect(
                    ws,
                    WsConfig {
                        max_message_size: options.max_message_size,
                        extra_roots: options.extra_roots.clone(),
                    },
                )
                .await?;

                let (tx, rx) = transport.split();
                Ok(Self::from_transport(Box::new(tx), Box::new(rx), &options))
            }
            #[cfg(unix)]
            Endpoint::Pipe(pipe) => {
                let transport = chromite_transport::PipeTransport::open(pipe)?;
                let (tx, rx) = transport.split();
                Ok(Self::from_transport(Box::new(tx), Box::new(rx), &options))
            }
            #[cfg(not(unix))]
            Endpoint::Pipe(_) => Err(TransportError::InvalidUrl(
                "pipe endpoints are only supported on unix".to_string(),
            )
            .into()),
        }
    }

    /// Assemble a connection over pre-split transport halves
    ///
    /// Used for pipe-mode launches and by tests that drive the correlator
    /// over in-memory channels.
    pub fn from_transport(
        tx: Box<dyn TransportTx>,
        rx: Box<dyn TransportRx>,
        options: &ConnectOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(options.event_buffer);

        let inner = Arc::new(ConnectionInner {
            tx,
            pending: DashMap::new(),
            ids: IdAllocator::new(),
            events: parking_lot::Mutex::new(Some(events)),
            sessions: DashMap::new(),
            closed: AtomicBool::new(false),
            timeout: options.timeout,
            verbose: options.verbose,
        });

        let reader = tokio::spawn(reader_loop(rx, inner.clone()));

        Self { inner, reader }
    }

    /// Send a command and await the matching reply
    ///
    /// Blocks the caller until the reply with the same id arrives or the
    /// per-call timeout elapses. A CDP-level error, a timeout, or an
    /// unparseable reply leaves the connection usable; `ConnectionClosed`
    /// and `ConnectionReset` are final.
    pub async fn call(&self, method: &str, params: Value, session_id: Option<&str>) -> Result<Value> {
        self.inner.call(method, params, session_id).await
    }

    /// Subscribe to events matching `filter`
    ///
    /// Events are delivered in arrival order through a bounded queue that
    /// drops the oldest entries when the subscriber lags.
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        self.inner.subscribe(filter)
    }

    /// Attach to a target and register the resulting session
    pub async fn attach_to_target(&self, target_id: &str) -> Result<Session> {
        let result = self
            .call(
                "Target.attachToTarget",
                serde_json::json!({"targetId": target_id, "flatten": true}),
                None,
            )
            .await?;

        let session_id = result
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingField("sessionId"))?;

        self.inner.register_session(session_id, target_id);
        debug!("attached to target {} as session {}", target_id, session_id);

        Ok(Session::new(
            session_id,
            target_id,
            Arc::downgrade(&self.inner),
        ))
    }

    /// Close the connection; idempotent
    ///
    /// Every pending call wakes with `ConnectionClosed` and every
    /// subsequent call fails the same way without touching the wire.
    pub async fn close(&self) {
        if self.inner.shutdown() {
            // Best-effort CLOSE frame; the endpoint may already be gone
            let _ = self.inner.tx.close().await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Attached sessions currently registered
    pub fn session_count(&self) -> usize {
        self.inner.session_count()
    }

    /// Calls currently awaiting their reply
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
        // Wake anything still parked through a Session handle
        self.inner.shutdown();
    }
}

async fn reader_loop(mut rx: Box<dyn TransportRx>, inner: Arc<ConnectionInner>) {
    loop {
        let text = match rx.recv().await {
            Ok(text) => text,
            Err(e) => {
                if !inner.closed.load(Ordering::SeqCst) {
                    match e {
                        TransportError::ConnectionClosed => debug!("transport closed"),
                        ref other => warn!("transport failed: {}", other),
                    }
                }
                inner.shutdown();
                break;
            }
        };

        if inner.verbose {
            debug!("recv: {}", text);
        } else {
            trace!("recv: {}", text);
        }

        match Message::parse(&text) {
            Ok(Message::Response(response)) => {
                inner.complete(response.id, Ok(response.result));
            }
            Ok(Message::Error(reply)) => {
                inner.complete(reply.id, Err(Error::Cdp(CdpError::from(reply.error))));
            }
            // Events are fanned out after correlation work and outside any
            // lock a subscriber could re-enter `call` under
            Ok(Message::Event(event)) => inner.publish(event),
            Err(e) => warn!("dropping unparseable message: {}", e),
        }
    }
}
