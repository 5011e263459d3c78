//! The editor: an [`EditorState`] plus the command surface hosts drive it with.
//!
//! Every mutation goes through one commit path that keeps the state
//! schema-valid, bumps the content version, records history, notifies the
//! file handler about removed images and publishes events. A failed command
//! leaves the state untouched.

use std::collections::BTreeSet;
use std::rc::Rc;

use serde_json::Value;

use crate::commands::{CommandArgs, MenuItem};
use crate::config::{EditorConfig, EmbedSuggestion, MentionSuggestion, extension};
use crate::error::EditorError;
use crate::events::{EditorEvent, EventBus, EventKind, Subscription};
use crate::history::History;
use crate::json::to_json;
use crate::markdown::to_markdown;
use crate::markup::{EMPTY_DOCUMENT, parse_html, render_blocks, render_html};
use crate::schema::{Block, BlockKind, Document, ImageAttrs, ResolvedPos};
use crate::storage::{AssetsUploadStatus, DocumentInfo, HeadingMarking, UtilityStorage, headings};
use crate::transform::{delete_range, insert_fragment, replace_range};
use crate::types::{ChangeOrigin, ScrollBehavior, Selection};

/// Content, selection and view flags.
#[derive(Debug, Clone, PartialEq)]
pub struct EditorState {
    pub doc: Document,
    pub selection: Selection,
    pub editable: bool,
    pub focused: bool,
}

/// Content a host offers from outside the editor, e.g. refreshed from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalValue {
    /// The host does not want its value synced.
    NoSync,
    /// The host's data has not arrived yet.
    NotLoaded,
    Value(String),
}

impl From<Option<String>> for ExternalValue {
    /// `None` maps to [`ExternalValue::NoSync`], an empty string to
    /// [`ExternalValue::NotLoaded`].
    fn from(value: Option<String>) -> Self {
        match value {
            None => Self::NoSync,
            Some(v) if v.is_empty() => Self::NotLoaded,
            Some(v) => Self::Value(v),
        }
    }
}

struct Commit {
    origin: ChangeOrigin,
    emit_update: bool,
    /// Skip `on_asset_removed` for images this change drops.
    skip_file_deletion: bool,
}

impl Commit {
    fn local() -> Self {
        Self {
            origin: ChangeOrigin::Local,
            emit_update: true,
            skip_file_deletion: false,
        }
    }
}

pub struct Editor {
    state: EditorState,
    config: EditorConfig,
    storage: UtilityStorage,
    headings: Rc<[HeadingMarking]>,
    events: EventBus,
    history: Option<History>,
    pending_external: Option<String>,
    content_version: u64,
    destroyed: bool,
}

impl Editor {
    pub fn new(config: EditorConfig) -> Self {
        let doc = match config.initial_value.as_deref() {
            Some(value) if !value.trim().is_empty() => parse_html(value).unwrap_or_else(|error| {
                tracing::warn!(%error, "initial value is not valid markup, starting empty");
                Document::empty()
            }),
            _ => Document::empty(),
        };
        let headings = headings(&doc).into();
        let history = config.enable_history.then(History::default);
        Self {
            state: EditorState {
                doc,
                selection: Selection::collapsed(1),
                editable: config.editable,
                focused: false,
            },
            config,
            storage: UtilityStorage::default(),
            headings,
            events: EventBus::new(),
            history,
            pending_external: None,
            content_version: 0,
            destroyed: false,
        }
    }

    // === Accessors ===

    pub fn state(&self) -> &EditorState {
        &self.state
    }

    pub fn document(&self) -> &Document {
        &self.state.doc
    }

    pub fn selection(&self) -> Selection {
        self.state.selection
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn storage(&self) -> &UtilityStorage {
        &self.storage
    }

    /// Bumped on every content change, whatever its origin.
    pub fn content_version(&self) -> u64 {
        self.content_version
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn is_editable(&self) -> bool {
        self.state.editable
    }

    pub fn has_extension(&self, name: &str) -> bool {
        self.config.extensions.contains(name) && self.config.is_enabled(name)
    }

    pub fn set_editable(&mut self, editable: bool) -> Result<(), EditorError> {
        self.ensure_alive()?;
        self.state.editable = editable;
        Ok(())
    }

    fn ensure_alive(&self) -> Result<(), EditorError> {
        if self.destroyed {
            Err(EditorError::SessionClosed)
        } else {
            Ok(())
        }
    }

    // === Commit path ===

    fn commit(&mut self, doc: Document, selection: Selection, commit: Commit) {
        let doc_changed = doc != self.state.doc;
        let selection = selection.clamped(doc.size());

        if doc_changed {
            if commit.origin == ChangeOrigin::Local {
                if let Some(history) = self.history.as_mut() {
                    history.record(&self.state.doc, self.state.selection);
                }
                if !commit.skip_file_deletion {
                    self.notify_removed_images(&doc);
                }
            }
            self.state.doc = doc;
            self.content_version += 1;
            self.headings = headings(&self.state.doc).into();
        }
        self.state.selection = selection;

        self.events.emit(&EditorEvent::Transaction {
            origin: commit.origin,
            selection,
            doc_changed,
        });
        if doc_changed && commit.emit_update {
            self.events.emit(&EditorEvent::Update {
                origin: commit.origin,
                headings: self.headings.clone(),
            });
        }
    }

    fn notify_removed_images(&self, next: &Document) {
        let Some(handler) = self.config.file_handler.as_ref() else {
            return;
        };
        let kept: BTreeSet<&str> = next.images().filter_map(|a| a.src.as_deref()).collect();
        let gone: BTreeSet<&str> = self
            .state
            .doc
            .images()
            .filter_map(|a| a.src.as_deref())
            .filter(|src| !kept.contains(src))
            .collect();
        for src in gone {
            tracing::debug!(%src, "image removed from document");
            handler.on_asset_removed(src);
        }
    }

    fn replace_document(&mut self, markup: &str, commit: Commit) -> Result<(), EditorError> {
        let doc = parse_html(markup).map_err(EditorError::ContentSyncFailed)?;
        let from = self.state.selection.start();
        let selection = Selection::collapsed(from.min(doc.size().saturating_sub(1)));
        self.commit(doc, selection, commit);
        Ok(())
    }

    // === Content commands ===

    /// Replace the whole document. Malformed markup leaves the state as it was.
    pub fn set_content(&mut self, markup: &str, emit_update: bool) -> Result<(), EditorError> {
        self.ensure_alive()?;
        self.replace_document(
            markup,
            Commit {
                emit_update,
                ..Commit::local()
            },
        )
    }

    /// Reset to an empty paragraph. Attachments are not deleted.
    pub fn clear(&mut self, emit_update: bool) -> Result<(), EditorError> {
        self.ensure_alive()?;
        self.replace_document(
            EMPTY_DOCUMENT,
            Commit {
                origin: ChangeOrigin::Local,
                emit_update,
                skip_file_deletion: true,
            },
        )
    }

    /// Replace the selection with `markup`.
    pub fn insert_at_cursor(&mut self, markup: &str) -> Result<(), EditorError> {
        self.ensure_alive()?;
        let fragment = parse_html(markup).map_err(EditorError::ContentSyncFailed)?;
        let mut doc = self.state.doc.clone();
        let (cursor, _) = replace_range(
            &mut doc,
            self.state.selection.start(),
            self.state.selection.end(),
            fragment,
        );
        self.commit(doc, Selection::collapsed(cursor), Commit::local());
        Ok(())
    }

    /// Insert `markup` at `pos`, clamped into the document.
    pub fn insert_at_position(&mut self, pos: usize, markup: &str) -> Result<(), EditorError> {
        self.ensure_alive()?;
        let fragment = parse_html(markup).map_err(EditorError::ContentSyncFailed)?;
        let mut doc = self.state.doc.clone();
        let pos = pos.min(doc.size());
        let cursor = insert_fragment(&mut doc, pos, fragment);
        self.commit(doc, Selection::collapsed(cursor), Commit::local());
        Ok(())
    }

    /// Insert markup over the selection, or on a new line after it.
    /// Does nothing without a selection.
    pub fn insert_text(&mut self, markup: &str, insert_on_next_line: bool) -> Result<(), EditorError> {
        self.ensure_alive()?;
        let selection = self.state.selection;
        if selection.is_empty() {
            return Ok(());
        }
        let fragment = parse_html(markup).map_err(EditorError::ContentSyncFailed)?;
        let mut doc = self.state.doc.clone();
        let cursor = if insert_on_next_line {
            let line_break = parse_html("<br>").map_err(EditorError::ContentSyncFailed)?;
            let after_break = insert_fragment(&mut doc, selection.end(), line_break);
            insert_fragment(&mut doc, after_break, fragment)
        } else {
            delete_range(&mut doc, selection.start(), selection.end());
            insert_fragment(&mut doc, selection.start(), fragment)
        };
        self.commit(doc, Selection::collapsed(cursor), Commit::local());
        Ok(())
    }

    pub fn set_selection(&mut self, selection: Selection) -> Result<(), EditorError> {
        self.ensure_alive()?;
        let doc = self.state.doc.clone();
        self.commit(doc, selection, Commit::local());
        Ok(())
    }

    // === Menu items ===

    pub fn execute_menu_item(&mut self, key: &str, args: &CommandArgs) -> Result<(), EditorError> {
        self.ensure_alive()?;
        let item = MenuItem::lookup(key, &self.config)?;
        let mut doc = self.state.doc.clone();
        if let Some(selection) = item.run(&mut doc, self.state.selection, args)? {
            self.commit(doc, selection, Commit::local());
        }
        Ok(())
    }

    /// Unknown or unavailable keys are never active.
    pub fn is_menu_item_active(&self, key: &str) -> bool {
        MenuItem::lookup(key, &self.config)
            .map(|item| item.is_active(&self.state.doc, self.state.selection))
            .unwrap_or(false)
    }

    // === History ===

    pub fn undo(&mut self) -> Result<bool, EditorError> {
        self.ensure_alive()?;
        let restored = self
            .history
            .as_mut()
            .and_then(|h| h.undo(&self.state.doc, self.state.selection));
        Ok(self.restore(restored))
    }

    pub fn redo(&mut self) -> Result<bool, EditorError> {
        self.ensure_alive()?;
        let restored = self
            .history
            .as_mut()
            .and_then(|h| h.redo(&self.state.doc, self.state.selection));
        Ok(self.restore(restored))
    }

    fn restore(&mut self, restored: Option<(Document, Selection)>) -> bool {
        let Some((doc, selection)) = restored else {
            return false;
        };
        // Restoring must not record itself.
        let history = self.history.take();
        self.commit(doc, selection, Commit::local());
        self.history = history;
        true
    }

    // === Reads ===

    pub fn html(&self) -> String {
        render_html(&self.state.doc)
    }

    pub fn markdown(&self) -> String {
        to_markdown(&self.state.doc)
    }

    pub fn json(&self) -> Value {
        to_json(&self.state.doc)
    }

    /// Markup of every top-level block the selection touches.
    pub fn selected_text(&self) -> Option<String> {
        let selection = self.state.selection;
        if selection.is_empty() {
            return None;
        }
        let blocks: Vec<Block> = self
            .state
            .doc
            .blocks_in_range(selection.start(), selection.end())
            .into_iter()
            .filter_map(|i| self.state.doc.blocks().get(i).cloned())
            .collect();
        Some(render_blocks(&blocks))
    }

    pub fn document_info(&self) -> DocumentInfo {
        DocumentInfo::of(&self.state.doc)
    }

    pub fn headings(&self) -> Rc<[HeadingMarking]> {
        self.headings.clone()
    }

    pub fn cursor_position(&self) -> usize {
        self.state.selection.head
    }

    pub fn mention_suggestions(&self, query: &str) -> Vec<MentionSuggestion> {
        if !self.config.is_enabled(extension::MENTIONS) {
            return Vec::new();
        }
        self.config
            .mention_handler
            .as_ref()
            .map(|h| h.suggestions(query))
            .unwrap_or_default()
    }

    /// Embeddable references matching `query`; empty without a handler.
    pub fn embed_suggestions(&self, query: &str) -> Vec<EmbedSuggestion> {
        self.config
            .embed_handler
            .as_ref()
            .map(|h| h.search(query))
            .unwrap_or_default()
    }

    pub fn image_at(&self, pos: usize) -> Option<&ImageAttrs> {
        let ResolvedPos::Boundary { index } = self.state.doc.resolve(pos) else {
            return None;
        };
        match &self.state.doc.blocks().get(index)?.kind {
            BlockKind::Image(attrs) => Some(attrs),
            _ => None,
        }
    }

    /// Position of the image with the same source and upload id as `image`.
    /// When several match, the one closest to `near` wins.
    pub fn locate_image(&self, image: &ImageAttrs, near: usize) -> Option<usize> {
        let doc = &self.state.doc;
        doc.blocks()
            .iter()
            .zip(doc.block_starts())
            .filter_map(|(block, start)| match &block.kind {
                BlockKind::Image(attrs) if attrs.src == image.src && attrs.id == image.id => Some(start),
                _ => None,
            })
            .min_by_key(|start| start.abs_diff(near))
    }

    /// Write new attributes onto the image starting at `pos`.
    pub fn update_image_attrs(&mut self, pos: usize, attrs: ImageAttrs) -> Result<(), EditorError> {
        self.ensure_alive()?;
        let index = match self.state.doc.resolve(pos) {
            ResolvedPos::Boundary { index } if self.image_at(pos).is_some() => index,
            _ => {
                return Err(EditorError::InvalidAttributes(format!(
                    "no image at position {pos}"
                )));
            }
        };
        let mut doc = self.state.doc.clone();
        doc.with_blocks_mut(|blocks| blocks[index].kind = BlockKind::Image(attrs));
        let selection = self.state.selection;
        self.commit(doc, selection, Commit::local());
        Ok(())
    }

    // === Focus and scrolling ===

    pub fn focus(&mut self) -> Result<(), EditorError> {
        self.ensure_alive()?;
        self.state.focused = true;
        self.events.emit(&EditorEvent::Focus {
            position: self.state.selection.head,
        });
        Ok(())
    }

    pub fn blur(&mut self) -> Result<(), EditorError> {
        self.ensure_alive()?;
        if self.state.focused {
            self.state.focused = false;
            self.events.emit(&EditorEvent::Blur);
        }
        Ok(())
    }

    /// Open an empty paragraph at `pos` (clamped) and focus into it.
    pub fn set_focus_at_position(&mut self, pos: usize) -> Result<(), EditorError> {
        if self.destroyed {
            tracing::error!(pos, "cannot set focus on a destroyed editor");
            return Err(EditorError::SessionClosed);
        }
        let mut doc = self.state.doc.clone();
        let pos = pos.min(doc.size());
        let cursor = insert_fragment(&mut doc, pos, Document::empty());
        self.commit(doc, Selection::collapsed(cursor), Commit::local());
        self.focus()
    }

    /// Ask the host view to scroll `pos` (clamped) into view.
    pub fn scroll_to_position(&mut self, pos: usize, behavior: ScrollBehavior) -> Result<(), EditorError> {
        self.ensure_alive()?;
        let position = pos.min(self.state.doc.size());
        self.events.emit(&EditorEvent::Scroll { position, behavior });
        Ok(())
    }

    // === Uploads and external values ===

    /// Replace upload progress. When the last upload finishes, a deferred
    /// external value is applied.
    pub fn update_assets_upload_status(&mut self, status: AssetsUploadStatus) -> Result<(), EditorError> {
        self.ensure_alive()?;
        self.storage.update_assets_upload_status(status);
        if !self.storage.upload_in_progress() {
            if let Some(value) = self.pending_external.take() {
                tracing::debug!("applying deferred external value");
                self.sync_external_value(ExternalValue::Value(value))?;
            }
        }
        Ok(())
    }

    pub fn is_ready_to_discard(&self) -> bool {
        !self.storage.upload_in_progress()
    }

    /// Bring in a value the host holds. Returns whether the document changed.
    ///
    /// While an upload is running the value is held back and applied once
    /// the upload finishes; a newer value replaces a held one.
    pub fn sync_external_value(&mut self, value: ExternalValue) -> Result<bool, EditorError> {
        self.ensure_alive()?;
        let ExternalValue::Value(markup) = value else {
            return Ok(false);
        };
        if self.storage.upload_in_progress() {
            self.pending_external = Some(markup);
            return Ok(false);
        }
        let before = self.content_version;
        self.replace_document(
            &markup,
            Commit {
                origin: ChangeOrigin::External,
                emit_update: false,
                skip_file_deletion: true,
            },
        )?;
        Ok(self.content_version != before)
    }

    /// Apply content that arrived from another replica.
    pub fn apply_remote_markup(&mut self, markup: &str) -> Result<bool, EditorError> {
        self.ensure_alive()?;
        let doc = parse_html(markup).map_err(EditorError::ContentSyncFailed)?;
        if doc == self.state.doc {
            return Ok(false);
        }
        let selection = self.state.selection;
        self.commit(
            doc,
            selection,
            Commit {
                origin: ChangeOrigin::Remote,
                emit_update: true,
                skip_file_deletion: true,
            },
        );
        Ok(true)
    }

    // === Subscriptions ===

    pub fn subscribe(&self, kind: EventKind, listener: impl Fn(&EditorEvent) + 'static) -> Subscription {
        self.events.subscribe(kind, listener)
    }

    /// Called with the full outline after every content update.
    pub fn on_heading_change(&self, callback: impl Fn(&[HeadingMarking]) + 'static) -> Subscription {
        self.events.subscribe(EventKind::Update, move |event| {
            if let EditorEvent::Update { headings, .. } = event {
                callback(headings);
            }
        })
    }

    /// Called on every transaction, selection-only ones included.
    pub fn on_state_change(&self, callback: impl Fn(Selection, bool) + 'static) -> Subscription {
        self.events.subscribe(EventKind::Transaction, move |event| {
            if let EditorEvent::Transaction {
                selection,
                doc_changed,
                ..
            } = event
            {
                callback(*selection, *doc_changed);
            }
        })
    }

    /// Tear down. Listeners hear `Destroy` once and are then dropped; later
    /// operations fail with `SessionClosed`.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.pending_external = None;
        self.events.emit(&EditorEvent::Destroy);
        self.events.clear();
    }
}

impl Drop for Editor {
    fn drop(&mut self) {
        self.destroy();
    }
}
