//! Error types for CRDT and cache operations.

use miette::Diagnostic;
use thiserror::Error;

/// Errors that can occur during CRDT operations.
#[derive(Error, Debug, Diagnostic)]
#[non_exhaustive]
pub enum CrdtError {
    /// Failed to import CRDT data.
    #[error("failed to import CRDT data: {0}")]
    #[diagnostic(code(quire::crdt::import))]
    Import(String),

    /// Failed to export CRDT data.
    #[error("failed to export CRDT data: {0}")]
    #[diagnostic(code(quire::crdt::export))]
    Export(String),

    /// The offline cache could not be read or written.
    #[error("cache error: {0}")]
    #[diagnostic(code(quire::crdt::cache))]
    Cache(String),

    #[error(transparent)]
    #[diagnostic(code(quire::crdt::io))]
    Io(#[from] std::io::Error),

    /// The realtime session could not be opened.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Session(#[from] quire_common::transport::SessionError),
}

impl From<loro::LoroError> for CrdtError {
    fn from(e: loro::LoroError) -> Self {
        CrdtError::Import(e.to_string())
    }
}
