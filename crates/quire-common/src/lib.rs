//! Shared plumbing for the quire collaborative editor.
//!
//! This crate provides:
//! - `QuireError` and friends: the umbrella error types
//! - `config`: file-backed configuration (`.json` / `.toml`)
//! - `telemetry`: tracing subscriber setup
//! - `sync`: the `DocumentSync` seam between transports, caches and the CRDT
//! - `transport`: the realtime collaboration session and its wire protocol

pub mod config;
pub mod error;
pub mod perf;
pub mod sync;
pub mod telemetry;
pub mod transport;

pub use crate::config::{CacheSettings, Config, EditorSettings, FileStore, Loader, RealtimeSettings, Saver};
pub use crate::error::{QuireError, SerDeError};
pub use crate::sync::{DeltaOrigin, DocumentDelta, DocumentSync, SyncError};
pub use smol_str::SmolStr;
