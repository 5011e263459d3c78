//! The seam between replicated documents and the things that move their bytes.
//!
//! Transports and caches never see the CRDT library directly. They talk to a
//! `DocumentSync` implementor, which hands out state vectors, missing updates,
//! accepts remote deltas, and broadcasts every delta it accepts.

use bytes::Bytes;
use tokio::sync::broadcast;

/// Where a delta came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeltaOrigin {
    /// Produced by an edit on this replica.
    Local,
    /// Received from the collaboration server.
    Remote,
    /// Replayed from the offline cache.
    Cache,
}

/// An accepted incremental change, as broadcast to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentDelta {
    pub origin: DeltaOrigin,
    pub data: Bytes,
}

/// Errors raised by `DocumentSync` implementors.
pub type SyncError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A replicated document as seen by transports and caches.
///
/// All operations are safe to call from any task; implementors must merge
/// commutatively and idempotently.
pub trait DocumentSync: Send + Sync + 'static {
    /// Stable identifier of the document (the session name).
    fn document_id(&self) -> &str;

    /// Encoded state vector describing what this replica has seen.
    fn state_vector(&self) -> Vec<u8>;

    /// Encode every update the holder of `state_vector` is missing.
    fn updates_since(&self, state_vector: &[u8]) -> Result<Vec<u8>, SyncError>;

    /// Merge a delta that originated elsewhere. The delta is re-broadcast
    /// with the given origin once accepted.
    fn apply_delta(&self, data: &[u8], origin: DeltaOrigin) -> Result<(), SyncError>;

    /// Subscribe to every delta this replica accepts from now on.
    fn subscribe(&self) -> broadcast::Receiver<DocumentDelta>;
}
