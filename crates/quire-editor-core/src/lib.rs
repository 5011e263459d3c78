//! quire-editor-core: rich-text editor logic without framework dependencies.
//!
//! This crate provides:
//! - the block/inline document schema and position arithmetic
//! - HTML parsing and rendering, markdown and JSON export
//! - `Editor`, the state container and host command surface
//! - menu item commands, typed events and per-extension storage
//! - the image node lifecycle with scoped viewport listeners

pub mod commands;
pub mod config;
pub mod editor;
pub mod error;
pub mod events;
pub mod history;
pub mod image;
pub mod json;
pub mod markdown;
pub mod markup;
pub mod schema;
pub mod storage;
pub mod transform;
pub mod types;
pub mod viewport;

pub use commands::{CommandArgs, MenuItem};
pub use config::{
    EditorConfig, EmbedHandler, EmbedSuggestion, FileHandler, MentionHandler, MentionSuggestion,
    RestoreError, RestoreImage,
};
pub use editor::{Editor, EditorState, ExternalValue};
pub use error::{EditorError, MarkupError};
pub use events::{EditorEvent, EventBus, EventKind, Subscription};
pub use image::{AttributeSink, ImageLifecycle, ImagePhase, MIN_SIZE, WeakImageLifecycle};
pub use markup::{EMPTY_DOCUMENT, parse_html, render_html};
pub use schema::{Block, BlockKind, Document, ImageAttrs, Inline, MarkType, Marks};
pub use smol_str::SmolStr;
pub use storage::{AssetsUploadStatus, DocumentInfo, HeadingMarking};
pub use types::{ChangeOrigin, ScrollBehavior, Selection};
pub use viewport::{ListenerGuard, PointerEvent, PointerEventKind, Viewport};
