//! In-process connector.
//!
//! Each `connect` hands the server half of a channel pair to the matching
//! [`MemoryListener`], which lets tests (or an embedded server) play the
//! collaboration server without sockets.

use std::io;

use tokio::sync::mpsc;

use super::{CollabMessage, ConnectRequest, Connection, Connector, Frame, SessionError};

/// Create a connected connector/listener pair.
pub fn channel() -> (MemoryConnector, MemoryListener) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MemoryConnector { incoming: tx }, MemoryListener { incoming: rx })
}

#[derive(Clone)]
pub struct MemoryConnector {
    incoming: mpsc::UnboundedSender<MemoryPeer>,
}

impl Connector for MemoryConnector {
    type Conn = MemoryConnection;

    async fn connect(&self, request: &ConnectRequest) -> Result<Self::Conn, SessionError> {
        let (to_server, from_client) = mpsc::unbounded_channel();
        let (to_client, from_server) = mpsc::unbounded_channel();
        let peer = MemoryPeer {
            request: request.clone(),
            tx: to_client,
            rx: from_client,
        };
        self.incoming.send(peer).map_err(|_| {
            SessionError::Connect(Box::new(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "memory listener dropped",
            )))
        })?;
        Ok(MemoryConnection {
            tx: to_server,
            rx: from_server,
        })
    }
}

/// Client half of an in-memory connection.
pub struct MemoryConnection {
    tx: mpsc::UnboundedSender<Frame>,
    rx: mpsc::UnboundedReceiver<Frame>,
}

impl Connection for MemoryConnection {
    async fn send(&mut self, data: Vec<u8>) -> Result<(), SessionError> {
        self.tx.send(Frame::Binary(data)).map_err(|_| {
            SessionError::Send(Box::new(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "memory peer dropped",
            )))
        })
    }

    async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    async fn close(&mut self, code: u16) {
        let _ = self.tx.send(Frame::Close {
            code,
            reason: Default::default(),
        });
    }
}

/// Accepts in-memory connections.
pub struct MemoryListener {
    incoming: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryListener {
    /// Wait for the next client to connect.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.incoming.recv().await
    }
}

/// Server half of an in-memory connection.
pub struct MemoryPeer {
    request: ConnectRequest,
    tx: mpsc::UnboundedSender<Frame>,
    rx: mpsc::UnboundedReceiver<Frame>,
}

impl MemoryPeer {
    pub fn request(&self) -> &ConnectRequest {
        &self.request
    }

    /// Send a message to the client. Returns false if the client is gone.
    pub fn send(&self, message: &CollabMessage) -> bool {
        match message.to_bytes() {
            Ok(bytes) => self.tx.send(Frame::Binary(bytes)).is_ok(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode message for memory peer");
                false
            }
        }
    }

    /// Next message from the client. `None` once the client closed or went away.
    pub async fn recv(&mut self) -> Option<CollabMessage> {
        loop {
            match self.rx.recv().await? {
                Frame::Binary(bytes) => match CollabMessage::from_bytes(&bytes) {
                    Ok(message) => return Some(message),
                    Err(e) => {
                        tracing::warn!(error = %e, "memory peer received undecodable frame");
                        continue;
                    }
                },
                Frame::Close { .. } => return None,
            }
        }
    }

    /// Close the connection from the server side with the given code.
    pub fn close(&self, code: u16) {
        let _ = self.tx.send(Frame::Close {
            code,
            reason: Default::default(),
        });
    }
}
