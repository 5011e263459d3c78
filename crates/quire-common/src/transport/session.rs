//! RealtimeSession - one live connection per document.
//!
//! The session owns the connection lifecycle: dial, authenticate, run the
//! initial sync exchange, relay updates both ways and reconnect with backoff
//! after transient closures. Everything it learns is reported as a
//! [`SessionEvent`]; nothing is thrown at the caller.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use url::Url;

use super::{
    CLOSE_ABNORMAL, CLOSE_NORMAL, CloseKind, CollabMessage, ConnectRequest, Connection, Connector,
    Frame,
};
use crate::config::RealtimeSettings;
use crate::error::QuireError;
use crate::sync::{DeltaOrigin, DocumentSync};

/// Error type for session operations
#[derive(Debug, thiserror::Error, Diagnostic)]
pub enum SessionError {
    #[error("authentication failed: {0}")]
    #[diagnostic(
        code(quire::session::auth),
        help("the server rejected the identity token; the session will not retry")
    )]
    AuthenticationFailed(SmolStr),

    #[error("server closed the connection (code {0})")]
    #[diagnostic(code(quire::session::server))]
    ServerError(u16),

    #[error("session closed")]
    #[diagnostic(code(quire::session::closed))]
    SessionClosed,

    #[error("a session for document {0} is already open")]
    #[diagnostic(code(quire::session::duplicate))]
    AlreadyOpen(SmolStr),

    #[error("failed to connect")]
    #[diagnostic(code(quire::session::connect))]
    Connect(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("failed to send frame")]
    #[diagnostic(code(quire::session::send))]
    Send(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("failed to encode message")]
    #[diagnostic(code(quire::session::encode))]
    Encode(#[source] postcard::Error),
}

/// Connection lifecycle, as observed by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    /// Initial full-state exchange finished on the current connection.
    Synced,
    /// Credential rejected. Terminal.
    AuthFailed,
    Closed,
}

/// Events emitted by a realtime session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Transport is up; authentication is in flight.
    Connected,
    /// Initial sync exchange completed on this connection.
    Synced,
    /// A remote delta was merged into the document.
    RemoteUpdate { len: usize },
    /// Side-channel message from the server or another client.
    Stateless(String),
    /// Credential rejected. No reconnect will follow.
    AuthenticationFailed { reason: SmolStr },
    /// Abnormal or policy closure. A reconnect may follow.
    ServerError { code: u16 },
    /// Transient closure. A reconnect will follow if the policy allows.
    Disconnected { code: u16 },
    /// Waiting before the next connection attempt.
    Reconnecting { attempt: u32, delay: Duration },
    /// The session stopped for good.
    Closed,
}

/// Exponential backoff for transient disconnects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (zero based), or `None` once exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if self.max_attempts.is_some_and(|max| attempt >= max) {
            return None;
        }
        let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        let delay = self
            .initial_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Some(Duration::from_millis(delay))
    }
}

/// Host hooks fired alongside the event stream.
pub trait ServerHandler: Send + Sync {
    fn on_connect(&self) {}
    fn on_server_error(&self) {}
}

/// Open parameters for a session.
#[derive(Debug, Clone)]
pub struct SessionParams {
    /// Document id; doubles as the session name.
    pub document: SmolStr,
    pub endpoint: Url,
    pub query: Vec<(SmolStr, SmolStr)>,
    /// Opaque serialized caller identity.
    pub token: String,
    pub reconnect: ReconnectPolicy,
}

impl SessionParams {
    pub fn new(document: impl Into<SmolStr>, endpoint: Url, token: impl Into<String>) -> Self {
        Self {
            document: document.into(),
            endpoint,
            query: Vec::new(),
            token: token.into(),
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Parameters from the `realtime` config section.
    pub fn from_settings(
        document: impl Into<SmolStr>,
        settings: &RealtimeSettings,
        token: impl Into<String>,
    ) -> Result<Self, QuireError> {
        let mut params = Self::new(document, settings.endpoint_url()?, token)
            .with_reconnect(settings.reconnect.clone());
        for (key, value) in &settings.query {
            params = params.with_query(key.as_str(), value.as_str());
        }
        Ok(params)
    }

    pub fn with_query(mut self, key: impl Into<SmolStr>, value: impl Into<SmolStr>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    fn connect_request(&self) -> ConnectRequest {
        let mut url = self.endpoint.clone();
        if !self.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.query {
                pairs.append_pair(key, value);
            }
        }
        ConnectRequest {
            url,
            document: self.document.clone(),
        }
    }
}

/// Tracks which documents have a live session, enforcing one per document.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    active: Arc<Mutex<HashSet<SmolStr>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a session for `document` is currently open.
    pub fn is_open(&self, document: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(document)
    }

    /// Open a session for `params.document`.
    ///
    /// Must be called from within a tokio runtime; the connection is driven
    /// by a spawned task. Returns the handle and its event stream.
    pub fn open<C: Connector>(
        &self,
        params: SessionParams,
        connector: C,
        document: Arc<dyn DocumentSync>,
        handler: Option<Arc<dyn ServerHandler>>,
    ) -> Result<(RealtimeSession, SessionEvents), SessionError> {
        {
            let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            if !active.insert(params.document.clone()) {
                return Err(SessionError::AlreadyOpen(params.document));
            }
        }

        let (state_tx, _) = watch::channel(ConnectionState::Connecting);
        let state = Arc::new(state_tx);
        let flags = Arc::new(SessionFlags::default());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        tracing::info!(document = %params.document, endpoint = %params.endpoint, "opening realtime session");

        let document_id = params.document.clone();
        let driver = Driver {
            params,
            connector,
            document,
            handler,
            state: state.clone(),
            flags: flags.clone(),
            events: events_tx,
            outbound: outbound_rx,
        };
        let task = tokio::spawn(driver.run());

        let session = RealtimeSession {
            document: document_id,
            outbound: outbound_tx,
            state,
            flags,
            registry: self.clone(),
            closed: false,
            task: Some(task),
        };
        Ok((session, SessionEvents { rx: events_rx }))
    }

    fn release(&self, document: &str) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(document);
    }
}

#[derive(Default)]
struct SessionFlags {
    synced: AtomicBool,
    connection_failed: AtomicBool,
}

enum Outbound {
    Stateless(String),
    Shutdown,
}

/// Handle to an open session. Dropping it closes the session.
pub struct RealtimeSession {
    document: SmolStr,
    outbound: mpsc::UnboundedSender<Outbound>,
    state: Arc<watch::Sender<ConnectionState>>,
    flags: Arc<SessionFlags>,
    registry: SessionRegistry,
    closed: bool,
    task: Option<JoinHandle<()>>,
}

impl RealtimeSession {
    pub fn document_id(&self) -> &str {
        &self.document
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch connection state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// True once any connection of this session completed its initial sync.
    pub fn has_synced(&self) -> bool {
        self.flags.synced.load(Ordering::Acquire)
    }

    /// True after an authentication failure or a server-error closure,
    /// until the next successful sync.
    pub fn has_connection_failed(&self) -> bool {
        self.flags.connection_failed.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Fire-and-forget side-channel message. Dropped if not yet authenticated.
    pub fn send_stateless(&self, payload: impl Into<String>) -> Result<(), SessionError> {
        if self.closed {
            tracing::warn!(document = %self.document, "stateless send on closed session");
            return Err(SessionError::SessionClosed);
        }
        self.outbound
            .send(Outbound::Stateless(payload.into()))
            .map_err(|_| SessionError::SessionClosed)
    }

    /// Close the session. The document id is released immediately and every
    /// later operation on this handle fails with `SessionClosed`.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.registry.release(&self.document);
        self.state.send_replace(ConnectionState::Closed);
        let _ = self.outbound.send(Outbound::Shutdown);
        tracing::info!(document = %self.document, "realtime session closed");
    }

    /// Close and wait for the driver task to finish its goodbye.
    pub async fn shutdown(mut self) {
        self.close();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(document = %self.document, error = %e, "session task failed");
            }
        }
    }
}

impl Drop for RealtimeSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Stream of events for one session.
pub struct SessionEvents {
    rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl SessionEvents {
    /// Next event; `None` once the driver is gone and the queue is drained.
    pub async fn next(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }

    /// Next queued event without waiting.
    pub fn try_next(&mut self) -> Option<SessionEvent> {
        self.rx.try_recv().ok()
    }
}

enum Outcome {
    AuthFailed(SmolStr),
    Closed(u16),
    Shutdown,
}

struct Driver<C: Connector> {
    params: SessionParams,
    connector: C,
    document: Arc<dyn DocumentSync>,
    handler: Option<Arc<dyn ServerHandler>>,
    state: Arc<watch::Sender<ConnectionState>>,
    flags: Arc<SessionFlags>,
    events: mpsc::UnboundedSender<SessionEvent>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
}

impl<C: Connector> Driver<C> {
    async fn run(mut self) {
        let request = self.params.connect_request();
        let mut attempt: u32 = 0;

        loop {
            self.set_state(ConnectionState::Connecting);
            let connected = tokio::select! {
                result = self.connector.connect(&request) => Some(result),
                _ = wait_for_shutdown(&mut self.outbound) => None,
            };

            let mut conn = match connected {
                None => break,
                Some(Ok(conn)) => conn,
                Some(Err(e)) => {
                    tracing::warn!(document = %self.params.document, error = %e, "connect failed");
                    self.emit(SessionEvent::Disconnected {
                        code: CLOSE_ABNORMAL,
                    });
                    if self.backoff(&mut attempt).await {
                        continue;
                    }
                    break;
                }
            };

            attempt = 0;
            self.set_state(ConnectionState::Connected);
            self.emit(SessionEvent::Connected);
            if let Some(handler) = &self.handler {
                handler.on_connect();
            }

            match self.serve(&mut conn).await {
                Outcome::Shutdown => {
                    conn.close(CLOSE_NORMAL).await;
                    break;
                }
                Outcome::AuthFailed(reason) => {
                    tracing::warn!(document = %self.params.document, %reason, "authentication failed");
                    self.flags.connection_failed.store(true, Ordering::Release);
                    self.set_state(ConnectionState::AuthFailed);
                    self.emit(SessionEvent::AuthenticationFailed { reason });
                    if let Some(handler) = &self.handler {
                        handler.on_server_error();
                    }
                    conn.close(CLOSE_NORMAL).await;
                    return;
                }
                Outcome::Closed(code) => match CloseKind::classify(code) {
                    CloseKind::ServerError => {
                        tracing::warn!(document = %self.params.document, code, "server error closure");
                        self.flags.connection_failed.store(true, Ordering::Release);
                        self.emit(SessionEvent::ServerError { code });
                        if let Some(handler) = &self.handler {
                            handler.on_server_error();
                        }
                    }
                    CloseKind::Transient => {
                        tracing::debug!(document = %self.params.document, code, "connection closed");
                        self.emit(SessionEvent::Disconnected { code });
                    }
                },
            }

            if !self.backoff(&mut attempt).await {
                break;
            }
        }

        self.set_state(ConnectionState::Closed);
        self.emit(SessionEvent::Closed);
    }

    /// Run one connection until it ends.
    async fn serve(&mut self, conn: &mut C::Conn) -> Outcome {
        let mut deltas = self.document.subscribe();
        let mut deltas_open = true;
        let mut authenticated = false;
        let mut synced = false;

        let auth = CollabMessage::Auth {
            document: self.params.document.clone(),
            token: self.params.token.clone(),
            params: self.params.query.clone(),
        };
        if let Err(outcome) = self.send(conn, &auth).await {
            return outcome;
        }

        loop {
            tokio::select! {
                frame = conn.recv() => {
                    let bytes = match frame {
                        None => return Outcome::Closed(CLOSE_ABNORMAL),
                        Some(Frame::Close { code, reason }) => {
                            tracing::debug!(document = %self.params.document, code, %reason, "close frame");
                            return Outcome::Closed(code);
                        }
                        Some(Frame::Binary(bytes)) => bytes,
                    };
                    let message = match CollabMessage::from_bytes(&bytes) {
                        Ok(message) => message,
                        Err(e) => {
                            tracing::warn!(document = %self.params.document, error = %e, "failed to decode collab message");
                            continue;
                        }
                    };
                    match message {
                        CollabMessage::Authenticated => {
                            authenticated = true;
                            let step1 = CollabMessage::SyncStep1 {
                                state_vector: self.document.state_vector(),
                            };
                            if let Err(outcome) = self.send(conn, &step1).await {
                                return outcome;
                            }
                        }
                        CollabMessage::AuthenticationFailed { reason } => {
                            return Outcome::AuthFailed(reason);
                        }
                        CollabMessage::SyncStep1 { state_vector } => {
                            match self.document.updates_since(&state_vector) {
                                Ok(update) => {
                                    let step2 = CollabMessage::SyncStep2 { update };
                                    if let Err(outcome) = self.send(conn, &step2).await {
                                        return outcome;
                                    }
                                }
                                Err(e) => {
                                    tracing::warn!(document = %self.params.document, error = %e, "failed to answer sync step 1");
                                }
                            }
                        }
                        CollabMessage::SyncStep2 { update } => {
                            self.merge(&update);
                            if !synced {
                                synced = true;
                                self.flags.synced.store(true, Ordering::Release);
                                self.flags.connection_failed.store(false, Ordering::Release);
                                self.set_state(ConnectionState::Synced);
                                self.emit(SessionEvent::Synced);
                            }
                        }
                        CollabMessage::Update { data } => self.merge(&data),
                        CollabMessage::Stateless { payload } => {
                            self.emit(SessionEvent::Stateless(payload));
                        }
                        other @ CollabMessage::Auth { .. } => {
                            tracing::warn!(kind = other.kind(), "unexpected message from server");
                        }
                    }
                }
                outbound = self.outbound.recv() => match outbound {
                    Some(Outbound::Stateless(payload)) => {
                        if authenticated {
                            let message = CollabMessage::Stateless { payload };
                            if let Err(outcome) = self.send(conn, &message).await {
                                return outcome;
                            }
                        } else {
                            tracing::debug!("dropping stateless message sent before authentication");
                        }
                    }
                    Some(Outbound::Shutdown) | None => return Outcome::Shutdown,
                },
                delta = deltas.recv(), if deltas_open => match delta {
                    Ok(delta) if delta.origin == DeltaOrigin::Local => {
                        // Before authentication the sync exchange carries local edits.
                        if authenticated {
                            let message = CollabMessage::Update { data: delta.data.to_vec() };
                            if let Err(outcome) = self.send(conn, &message).await {
                                return outcome;
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "local delta stream lagged, resending full update set");
                        if authenticated {
                            match self.document.updates_since(&[]) {
                                Ok(data) => {
                                    let message = CollabMessage::Update { data };
                                    if let Err(outcome) = self.send(conn, &message).await {
                                        return outcome;
                                    }
                                }
                                Err(e) => tracing::warn!(error = %e, "failed to export updates"),
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => deltas_open = false,
                },
            }
        }
    }

    async fn send(&self, conn: &mut C::Conn, message: &CollabMessage) -> Result<(), Outcome> {
        let bytes = match message.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(kind = message.kind(), error = %e, "failed to encode message");
                return Ok(());
            }
        };
        conn.send(bytes).await.map_err(|e| {
            tracing::warn!(document = %self.params.document, kind = message.kind(), error = %e, "send failed");
            Outcome::Closed(CLOSE_ABNORMAL)
        })
    }

    fn merge(&self, data: &[u8]) {
        match self.document.apply_delta(data, DeltaOrigin::Remote) {
            Ok(()) => self.emit(SessionEvent::RemoteUpdate { len: data.len() }),
            Err(e) => {
                tracing::warn!(document = %self.params.document, error = %e, "failed to merge remote delta");
            }
        }
    }

    async fn backoff(&mut self, attempt: &mut u32) -> bool {
        let Some(delay) = self.params.reconnect.delay_for(*attempt) else {
            tracing::info!(document = %self.params.document, attempts = *attempt, "giving up reconnecting");
            return false;
        };
        *attempt += 1;
        self.emit(SessionEvent::Reconnecting {
            attempt: *attempt,
            delay,
        });
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = wait_for_shutdown(&mut self.outbound) => false,
        }
    }

    fn set_state(&self, state: ConnectionState) {
        // A closed handle wins over anything the driver reports afterwards.
        if *self.state.borrow() == ConnectionState::Closed && state != ConnectionState::Closed {
            return;
        }
        self.state.send_replace(state);
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

/// Resolves once the handle asks for shutdown (or is gone). Stateless
/// messages queued while disconnected are dropped: delivery is best effort.
async fn wait_for_shutdown(outbound: &mut mpsc::UnboundedReceiver<Outbound>) {
    loop {
        match outbound.recv().await {
            Some(Outbound::Stateless(_)) => {
                tracing::debug!("dropping stateless message while disconnected");
            }
            Some(Outbound::Shutdown) | None => return,
        }
    }
}
