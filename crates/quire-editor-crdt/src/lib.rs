//! CRDT-backed documents and collaborative editor sessions.
//!
//! This crate provides:
//! - `ReplicatedDocument`: Loro-backed document implementing `DocumentSync`
//! - `cache`: offline persistence of document deltas (file or in-memory)
//! - `EditorSession`: the host-facing editor facade, optionally bound to a document
//! - `CollaborativeEditor`: cache + realtime session + facade for one document

pub mod cache;
mod collab;
mod document;
mod error;
mod session;

pub use cache::{CacheHandle, CacheStore, CachedState, FileCacheStore, MemoryCacheStore};
pub use collab::{CollaborativeEditor, RealtimeListener};
pub use document::ReplicatedDocument;
pub use error::CrdtError;
pub use session::{DocumentSnapshot, EditorSession};

// Re-export Loro types that consumers need
pub use loro::{LoroDoc, VersionVector};
