//! Websocket connector built on tokio-tungstenite.

use futures_util::{SinkExt, StreamExt};
use smol_str::SmolStr;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::{CLOSE_ABNORMAL, ConnectRequest, Connection, Connector, Frame, SessionError};

/// Dials the collaboration server over a websocket.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl Connector for WebSocketConnector {
    type Conn = WebSocketConnection;

    async fn connect(&self, request: &ConnectRequest) -> Result<Self::Conn, SessionError> {
        let (stream, _response) = connect_async(request.url.as_str())
            .await
            .map_err(|e| SessionError::Connect(Box::new(e)))?;
        tracing::debug!(document = %request.document, url = %request.url, "websocket connected");
        Ok(WebSocketConnection { stream })
    }
}

pub struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Connection for WebSocketConnection {
    async fn send(&mut self, data: Vec<u8>) -> Result<(), SessionError> {
        self.stream
            .send(Message::Binary(data))
            .await
            .map_err(|e| SessionError::Send(Box::new(e)))
    }

    async fn recv(&mut self) -> Option<Frame> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Binary(data)) => return Some(Frame::Binary(data)),
                Ok(Message::Close(frame)) => {
                    let (code, reason): (u16, SmolStr) = frame
                        .map(|f| (u16::from(f.code), f.reason.as_ref().into()))
                        .unwrap_or((CLOSE_ABNORMAL, Default::default()));
                    return Some(Frame::Close { code, reason });
                }
                // ping/pong are answered by tungstenite; text frames are not part of the protocol
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "websocket receive error");
                    return Some(Frame::Close {
                        code: CLOSE_ABNORMAL,
                        reason: "receive error".into(),
                    });
                }
            }
        }
    }

    async fn close(&mut self, code: u16) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: "".into(),
        };
        if let Err(e) = self.stream.close(Some(frame)).await {
            tracing::debug!(error = %e, "websocket close failed");
        }
    }
}
