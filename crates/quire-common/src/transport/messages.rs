//! Wire protocol for collaborative editing messages.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Messages exchanged between a client and the collaboration server.
///
/// One websocket binary frame carries exactly one postcard-encoded message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CollabMessage {
    /// Client hello: which document, who we are, and extra parameters.
    Auth {
        /// Document (session) name
        document: SmolStr,
        /// Opaque identity credential, passed through untouched
        token: String,
        /// Host supplied key/value parameters
        params: Vec<(SmolStr, SmolStr)>,
    },

    /// Server accepted the credential.
    Authenticated,

    /// Server rejected the credential. Terminal for the session.
    AuthenticationFailed {
        /// Human readable reason from the server
        reason: SmolStr,
    },

    /// "Here is what I have": an encoded state vector.
    SyncStep1 {
        /// Encoded version vector of the sender
        state_vector: Vec<u8>,
    },

    /// "Here is what you are missing", in response to `SyncStep1`.
    SyncStep2 {
        /// CRDT update bytes
        update: Vec<u8>,
    },

    /// Incremental CRDT update, broadcast as edits happen.
    Update {
        /// CRDT update bytes
        data: Vec<u8>,
    },

    /// Ephemeral side-channel payload, never part of document state.
    Stateless {
        /// Opaque payload (JSON by convention)
        payload: String,
    },
}

impl CollabMessage {
    /// Serialize message to postcard bytes for wire transmission.
    pub fn to_bytes(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_stdvec(self)
    }

    /// Deserialize message from postcard bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::Authenticated => "authenticated",
            Self::AuthenticationFailed { .. } => "authentication-failed",
            Self::SyncStep1 { .. } => "sync-step-1",
            Self::SyncStep2 { .. } => "sync-step-2",
            Self::Update { .. } => "update",
            Self::Stateless { .. } => "stateless",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_roundtrip() {
        let msg = CollabMessage::Auth {
            document: "page-42".into(),
            token: r#"{"id":"u1","name":"Alice"}"#.into(),
            params: vec![("workspaceSlug".into(), "acme".into())],
        };
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(CollabMessage::from_bytes(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_garbage_fails_to_decode() {
        assert!(CollabMessage::from_bytes(&[0xff, 0xff, 0xff]).is_err());
    }
}
