//! Editor construction options and host capabilities.
//!
//! [`EditorConfig`] is what a host hands to an editor when it mounts one.
//! The serializable part of it lives in `quire_common::EditorSettings`; the
//! handlers are trait objects the host supplies at runtime.

use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use n0_future::boxed::BoxFuture;
use quire_common::EditorSettings;
use smol_str::SmolStr;

/// Extension names the editor understands.
pub mod extension {
    pub const HEADING_LIST: &str = "heading-list";
    pub const SIDE_MENU: &str = "side-menu";
    pub const COLLABORATION: &str = "collaboration";
    pub const AI: &str = "ai";
    pub const IMAGE: &str = "image";
    pub const SLASH_COMMANDS: &str = "slash-commands";
    pub const MENTIONS: &str = "mentions";
}

/// A mention candidate offered while typing `@`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MentionSuggestion {
    pub id: SmolStr,
    pub label: String,
}

/// Source of mention suggestions.
pub trait MentionHandler {
    fn suggestions(&self, query: &str) -> Vec<MentionSuggestion>;
}

/// An embeddable reference, such as a work item, offered by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedSuggestion {
    pub id: SmolStr,
    pub title: String,
}

/// Host-side lookup for embedded references.
pub trait EmbedHandler {
    fn search(&self, query: &str) -> Vec<EmbedSuggestion>;
}

pub type RestoreError = Box<dyn std::error::Error + Send + Sync>;

/// Re-resolves an asset whose canonical source failed to load.
pub trait RestoreImage: Send + Sync {
    /// Returns the source to re-point the node at.
    fn restore(&self, src: &str) -> BoxFuture<Result<String, RestoreError>>;
}

/// Attachment storage hooks.
pub trait FileHandler {
    /// An image node carrying `src` was removed by a local edit.
    fn on_asset_removed(&self, src: &str);

    /// Restore capability, if the storage service offers one.
    fn restorer(&self) -> Option<Arc<dyn RestoreImage>> {
        None
    }
}

/// Options for constructing an editor.
#[derive(Clone)]
pub struct EditorConfig {
    pub editable: bool,
    /// Markup to start from. Blank values become an empty paragraph.
    pub initial_value: Option<String>,
    pub extensions: BTreeSet<SmolStr>,
    pub disabled_extensions: BTreeSet<SmolStr>,
    pub flagged_extensions: BTreeSet<SmolStr>,
    pub placeholder: Option<String>,
    pub tab_index: Option<i32>,
    pub mention_handler: Option<Rc<dyn MentionHandler>>,
    pub file_handler: Option<Rc<dyn FileHandler>>,
    pub embed_handler: Option<Rc<dyn EmbedHandler>>,
    /// Local undo history. Off for collaborative documents.
    pub enable_history: bool,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            editable: true,
            initial_value: None,
            extensions: BTreeSet::new(),
            disabled_extensions: BTreeSet::new(),
            flagged_extensions: BTreeSet::new(),
            placeholder: None,
            tab_index: None,
            mention_handler: None,
            file_handler: None,
            embed_handler: None,
            enable_history: true,
        }
    }
}

impl fmt::Debug for EditorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EditorConfig")
            .field("editable", &self.editable)
            .field("initial_value", &self.initial_value)
            .field("extensions", &self.extensions)
            .field("disabled_extensions", &self.disabled_extensions)
            .field("flagged_extensions", &self.flagged_extensions)
            .field("placeholder", &self.placeholder)
            .field("tab_index", &self.tab_index)
            .field("mention_handler", &self.mention_handler.is_some())
            .field("file_handler", &self.file_handler.is_some())
            .field("embed_handler", &self.embed_handler.is_some())
            .field("enable_history", &self.enable_history)
            .finish()
    }
}

impl EditorConfig {
    pub fn from_settings(settings: &EditorSettings) -> Self {
        Self {
            editable: settings.editable,
            placeholder: settings.placeholder.clone(),
            tab_index: settings.tab_index,
            disabled_extensions: settings.disabled_extensions.iter().map(SmolStr::from).collect(),
            flagged_extensions: settings.flagged_extensions.iter().map(SmolStr::from).collect(),
            ..Self::default()
        }
    }

    pub fn with_initial_value(mut self, value: impl Into<String>) -> Self {
        self.initial_value = Some(value.into());
        self
    }

    pub fn with_extension(mut self, name: impl Into<SmolStr>) -> Self {
        self.extensions.insert(name.into());
        self
    }

    pub fn with_file_handler(mut self, handler: Rc<dyn FileHandler>) -> Self {
        self.file_handler = Some(handler);
        self
    }

    pub fn with_embed_handler(mut self, handler: Rc<dyn EmbedHandler>) -> Self {
        self.embed_handler = Some(handler);
        self
    }

    pub fn with_mention_handler(mut self, handler: Rc<dyn MentionHandler>) -> Self {
        self.mention_handler = Some(handler);
        self
    }

    /// Neither disabled nor flagged.
    pub fn is_enabled(&self, extension: &str) -> bool {
        !self.disabled_extensions.contains(extension) && !self.flagged_extensions.contains(extension)
    }

    /// Whether the side menu offers AI actions.
    pub fn ai_enabled(&self) -> bool {
        !self.disabled_extensions.contains(extension::AI)
    }

    /// Adjust for a collaborative document: outline, side menu and
    /// collaboration extensions on, local history off.
    pub fn collaborative(mut self) -> Self {
        for name in [
            extension::HEADING_LIST,
            extension::SIDE_MENU,
            extension::COLLABORATION,
        ] {
            self.extensions.insert(name.into());
        }
        self.enable_history = false;
        self
    }

    pub fn restorer(&self) -> Option<Arc<dyn RestoreImage>> {
        self.file_handler.as_ref().and_then(|h| h.restorer())
    }
}
