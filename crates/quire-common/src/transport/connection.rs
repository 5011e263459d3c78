//! Connection abstraction: a bidirectional pipe of binary frames.

use std::future::Future;

use smol_str::SmolStr;
use url::Url;

use super::SessionError;

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// Connection dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Server closed the connection because a policy was violated.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// A frame received from a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Binary(Vec<u8>),
    Close { code: u16, reason: SmolStr },
}

/// How the session should react to a closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// Surface as a server error (the host shows an error affordance).
    ServerError,
    /// Quietly eligible for reconnect.
    Transient,
}

impl CloseKind {
    pub fn classify(code: u16) -> Self {
        match code {
            CLOSE_ABNORMAL | CLOSE_POLICY_VIOLATION => Self::ServerError,
            _ => Self::Transient,
        }
    }
}

/// Everything a connector needs to dial the collaboration server.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectRequest {
    /// Endpoint with the query parameters already appended.
    pub url: Url,
    /// Document (session) name.
    pub document: SmolStr,
}

/// Opens connections to a collaboration server.
pub trait Connector: Send + Sync + 'static {
    type Conn: Connection;

    fn connect(
        &self,
        request: &ConnectRequest,
    ) -> impl Future<Output = Result<Self::Conn, SessionError>> + Send;
}

/// An open connection.
///
/// `recv` must be cancel-safe: the session driver races it against outbound work.
pub trait Connection: Send + 'static {
    fn send(&mut self, data: Vec<u8>) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Next frame, or `None` once the underlying stream is gone.
    fn recv(&mut self) -> impl Future<Output = Option<Frame>> + Send;

    fn close(&mut self, code: u16) -> impl Future<Output = ()> + Send;
}
