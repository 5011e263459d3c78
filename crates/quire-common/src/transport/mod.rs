//! Realtime collaboration transport.
//!
//! - `CollabMessage`: wire protocol for auth, sync exchange, updates and stateless messages
//! - `Connector` / `Connection`: the byte pipe (websocket, or in-memory for tests)
//! - `SessionRegistry` / `RealtimeSession`: per-document session lifecycle
//! - `PresenceTracker`: awareness built on stateless messages

mod connection;
pub mod memory;
mod messages;
mod presence;
mod session;
#[cfg(feature = "websocket")]
mod websocket;

pub use connection::{
    CLOSE_ABNORMAL, CLOSE_NORMAL, CLOSE_POLICY_VIOLATION, CloseKind, ConnectRequest, Connection,
    Connector, Frame,
};
pub use messages::CollabMessage;
pub use presence::{Collaborator, PresenceMessage, PresenceTracker, RemoteCursor};
pub use session::{
    ConnectionState, RealtimeSession, ReconnectPolicy, ServerHandler, SessionError, SessionEvent,
    SessionEvents, SessionParams, SessionRegistry,
};
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketConnector};
