//! Editor error taxonomy.

use miette::Diagnostic;
use smol_str::SmolStr;

/// Errors raised by editor operations.
///
/// Most of these are logged and swallowed at the host-facing surface; they
/// are returned as values so callers and tests can observe them.
#[derive(Debug, thiserror::Error, Diagnostic)]
#[non_exhaustive]
pub enum EditorError {
    /// Operation on a destroyed editor.
    #[error("editor session is closed")]
    #[diagnostic(code(quire::editor::closed))]
    SessionClosed,

    #[error("no command registered for key {0:?}")]
    #[diagnostic(code(quire::editor::command_not_found))]
    CommandNotFound(SmolStr),

    /// Markup could not be turned into a valid document; prior state kept.
    #[error("failed to sync content")]
    #[diagnostic(code(quire::editor::content_sync))]
    ContentSyncFailed(#[source] MarkupError),

    #[error("image {src:?} failed to load")]
    #[diagnostic(
        code(quire::editor::attachment),
        help("the node shows its error state; no further retries happen for this node")
    )]
    AttachmentLoadFailed { src: Option<String> },

    #[error("invalid attributes: {0}")]
    #[diagnostic(code(quire::editor::attributes))]
    InvalidAttributes(String),
}

/// Markup parse errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Diagnostic)]
pub enum MarkupError {
    #[error("unknown element <{0}>")]
    #[diagnostic(code(quire::markup::unknown_element))]
    UnknownElement(SmolStr),

    #[error("expected </{expected}>, found </{found}>")]
    #[diagnostic(code(quire::markup::mismatched))]
    Mismatched { expected: SmolStr, found: SmolStr },

    #[error("unexpected </{0}>")]
    #[diagnostic(code(quire::markup::unexpected_close))]
    UnexpectedClose(SmolStr),

    #[error("<{0}> is never closed")]
    #[diagnostic(code(quire::markup::unclosed))]
    Unclosed(SmolStr),

    #[error("<{0}> is not allowed here")]
    #[diagnostic(code(quire::markup::misplaced))]
    Misplaced(SmolStr),

    #[error("malformed tag at byte {0}")]
    #[diagnostic(code(quire::markup::malformed))]
    MalformedTag(usize),
}
