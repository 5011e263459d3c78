//! The editor session facade.
//!
//! [`EditorSession`] is the one thing host screens talk to. It owns an
//! [`Editor`] and, for collaborative editing, a link to a
//! [`ReplicatedDocument`]: local changes are written into the document after
//! every command, and deltas merged from elsewhere are folded back into the
//! editor by [`EditorSession::process_remote_changes`] and before every
//! command.
//!
//! A local write is the edit from the content the editor last agreed with
//! to its current content, rebased over anything merged since, so a remote
//! change that has not reached the editor yet is kept rather than
//! overwritten.
//!
//! Command and sync failures are logged and swallowed here; only
//! `SessionClosed` (and attribute errors the caller can act on) come back
//! as errors.
//!
//! Event listeners run while the editor is borrowed, so they must not call
//! back into the session synchronously.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::sync::Arc;

use quire_common::{DeltaOrigin, DocumentDelta, DocumentSync};
use quire_editor_core::{
    AssetsUploadStatus, AttributeSink, CommandArgs, DocumentInfo, Editor, EditorConfig,
    EditorError, EditorEvent, EventKind, ExternalValue, HeadingMarking, ImageAttrs,
    ImageLifecycle, ScrollBehavior, Selection, Subscription, Viewport, WeakImageLifecycle,
};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::ReplicatedDocument;

/// Export of the current content.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    /// Full CRDT state; `None` for editors without a replicated document.
    pub binary: Option<Vec<u8>>,
    pub html: String,
    pub json: Option<Value>,
}

struct DocumentLink {
    document: Arc<ReplicatedDocument>,
    deltas: broadcast::Receiver<DocumentDelta>,
    /// Editor content version last written to (or read from) the document.
    pushed_version: u64,
    /// Document content the editor last agreed with.
    base: String,
}

impl DocumentLink {
    /// Fold merged deltas into `editor`. Returns whether its content changed.
    fn absorb(&mut self, editor: &mut Editor) -> Result<bool, EditorError> {
        let mut foreign = false;
        loop {
            match self.deltas.try_recv() {
                Ok(delta) => foreign |= delta.origin != DeltaOrigin::Local,
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::debug!(document = %self.document.id(), skipped, "delta receiver lagged");
                    foreign = true;
                }
                Err(_) => break,
            }
        }
        if !foreign || self.document.is_empty() {
            return Ok(false);
        }

        let content = self.document.content();
        match editor.apply_remote_markup(&content) {
            Ok(changed) => {
                self.pushed_version = editor.content_version();
                self.base = content;
                Ok(changed)
            }
            Err(error @ EditorError::ContentSyncFailed(_)) => {
                tracing::warn!(document = %self.document.id(), %error, "remote content not applied");
                Ok(false)
            }
            Err(error) => Err(error),
        }
    }

    /// Write the editor's content into the document if it moved since the
    /// last write. Anything merged in the meantime is shown afterwards.
    fn push(&mut self, editor: &mut Editor) {
        let version = editor.content_version();
        if version == self.pushed_version {
            return;
        }
        self.pushed_version = version;
        let html = editor.html();
        if let Err(error) = self.document.merge_content(&self.base, &html) {
            tracing::error!(document = %self.document.id(), %error, "failed to record local change");
            return;
        }

        let merged = self.document.content();
        if merged == html {
            self.base = merged;
            return;
        }
        match editor.apply_remote_markup(&merged) {
            Ok(_) => {
                self.pushed_version = editor.content_version();
                self.base = merged;
            }
            Err(error) => {
                tracing::warn!(document = %self.document.id(), %error, "merged content not applied");
                self.base = html;
            }
        }
    }
}

pub struct EditorSession {
    editor: Rc<RefCell<Editor>>,
    link: Option<Rc<RefCell<DocumentLink>>>,
    mounted: RefCell<Vec<WeakImageLifecycle>>,
}

impl EditorSession {
    /// A standalone editor with no replicated document.
    pub fn new(config: EditorConfig) -> Self {
        Self {
            editor: Rc::new(RefCell::new(Editor::new(config))),
            link: None,
            mounted: RefCell::default(),
        }
    }

    /// An editor bound to `document`.
    ///
    /// A non-empty document is authoritative: its content replaces the
    /// configured initial value. An empty one is left alone until the first
    /// local edit, so a replica that has not synced yet never seeds content
    /// the server already holds.
    pub fn with_document(config: EditorConfig, document: Arc<ReplicatedDocument>) -> Self {
        let mut editor = Editor::new(config);
        let deltas = document.subscribe();
        let mut base = document.content();
        if !document.is_empty() {
            if let Err(error) = editor.apply_remote_markup(&base) {
                tracing::warn!(document = %document.id(), %error, "replicated content is not valid markup");
                base = editor.html();
            }
        }
        let pushed_version = editor.content_version();
        Self {
            editor: Rc::new(RefCell::new(editor)),
            link: Some(Rc::new(RefCell::new(DocumentLink {
                document,
                deltas,
                pushed_version,
                base,
            }))),
            mounted: RefCell::default(),
        }
    }

    pub fn document(&self) -> Option<Arc<ReplicatedDocument>> {
        self.link.as_ref().map(|link| link.borrow().document.clone())
    }

    /// Read access to the underlying editor.
    pub fn with_editor<R>(&self, f: impl FnOnce(&Editor) -> R) -> R {
        f(&self.editor.borrow())
    }

    pub fn is_destroyed(&self) -> bool {
        self.editor.borrow().is_destroyed()
    }

    // === Command plumbing ===

    fn run(
        &mut self,
        command: &'static str,
        f: impl FnOnce(&mut Editor) -> Result<(), EditorError>,
    ) -> Result<(), EditorError> {
        if let Err(error) = self.process_remote_changes() {
            tracing::debug!(command, %error, "remote changes not applied before command");
        }
        let result = {
            let mut editor = self.editor.borrow_mut();
            let result = f(&mut *editor);
            if let (Ok(()), Some(link)) = (&result, &self.link) {
                link.borrow_mut().push(&mut *editor);
            }
            result
        };
        match result {
            Ok(()) => Ok(()),
            Err(EditorError::SessionClosed) => {
                tracing::warn!(command, "command on a closed editor session");
                Err(EditorError::SessionClosed)
            }
            Err(error @ (EditorError::ContentSyncFailed(_) | EditorError::CommandNotFound(_))) => {
                tracing::warn!(command, %error, "editor command failed");
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    // === Host commands ===

    pub fn blur(&mut self) -> Result<(), EditorError> {
        self.run("blur", Editor::blur)
    }

    pub fn focus(&mut self) -> Result<(), EditorError> {
        self.run("focus", Editor::focus)
    }

    pub fn set_editable(&mut self, editable: bool) -> Result<(), EditorError> {
        self.run("set-editable", |e| e.set_editable(editable))
    }

    /// Reset to an empty paragraph without deleting attachments.
    pub fn clear_editor(&mut self, emit_update: bool) -> Result<(), EditorError> {
        self.run("clear-editor", |e| e.clear(emit_update))
    }

    pub fn set_editor_value(&mut self, markup: &str, emit_update: bool) -> Result<(), EditorError> {
        self.run("set-editor-value", |e| e.set_content(markup, emit_update))
    }

    pub fn set_editor_value_at_cursor(&mut self, markup: &str) -> Result<(), EditorError> {
        self.run("set-editor-value-at-cursor", |e| e.insert_at_cursor(markup))
    }

    pub fn insert_at_position(&mut self, pos: usize, markup: &str) -> Result<(), EditorError> {
        self.run("insert-at-position", |e| e.insert_at_position(pos, markup))
    }

    pub fn insert_text(&mut self, markup: &str, insert_on_next_line: bool) -> Result<(), EditorError> {
        self.run("insert-text", |e| e.insert_text(markup, insert_on_next_line))
    }

    pub fn set_selection(&mut self, selection: Selection) -> Result<(), EditorError> {
        self.run("set-selection", |e| e.set_selection(selection))
    }

    pub fn execute_menu_item_command(&mut self, key: &str, args: &CommandArgs) -> Result<(), EditorError> {
        self.run("execute-menu-item", |e| e.execute_menu_item(key, args))
    }

    pub fn is_menu_item_active(&self, key: &str) -> bool {
        self.editor.borrow().is_menu_item_active(key)
    }

    pub fn set_focus_at_position(&mut self, pos: usize) -> Result<(), EditorError> {
        self.run("set-focus-at-position", |e| e.set_focus_at_position(pos))
    }

    pub fn scroll_to_position(&mut self, pos: usize, behavior: ScrollBehavior) -> Result<(), EditorError> {
        self.run("scroll-to-position", |e| e.scroll_to_position(pos, behavior))
    }

    pub fn undo(&mut self) -> Result<(), EditorError> {
        self.run("undo", |e| e.undo().map(|_| ()))
    }

    pub fn redo(&mut self) -> Result<(), EditorError> {
        self.run("redo", |e| e.redo().map(|_| ()))
    }

    pub fn update_assets_upload_status(&mut self, status: AssetsUploadStatus) -> Result<(), EditorError> {
        self.run("update-assets-upload-status", |e| e.update_assets_upload_status(status))
    }

    pub fn is_ready_to_discard(&self) -> bool {
        self.editor.borrow().is_ready_to_discard()
    }

    /// Bring in a host-held value; see [`ExternalValue`].
    pub fn sync_external_value(&mut self, value: impl Into<ExternalValue>) -> Result<(), EditorError> {
        let value = value.into();
        self.run("sync-external-value", |e| e.sync_external_value(value).map(|_| ()))
    }

    // === Reads ===

    pub fn html(&self) -> String {
        self.editor.borrow().html()
    }

    pub fn markdown(&self) -> String {
        self.editor.borrow().markdown()
    }

    pub fn selected_text(&self) -> Option<String> {
        self.editor.borrow().selected_text()
    }

    pub fn document_info(&self) -> DocumentInfo {
        self.editor.borrow().document_info()
    }

    pub fn headings(&self) -> Rc<[HeadingMarking]> {
        self.editor.borrow().headings()
    }

    pub fn cursor_position(&self) -> usize {
        self.editor.borrow().cursor_position()
    }

    /// Binary state, markup and structured tree, as of now.
    pub fn snapshot(&self) -> Result<DocumentSnapshot, EditorError> {
        let editor = self.editor.borrow();
        if editor.is_destroyed() {
            tracing::warn!("snapshot of a closed editor session");
            return Err(EditorError::SessionClosed);
        }
        let binary = self.link.as_ref().and_then(|link| {
            let link = link.borrow();
            link.document
                .encode_full_state()
                .inspect_err(|error| tracing::error!(document = %link.document.id(), %error, "failed to encode document"))
                .ok()
        });
        Ok(DocumentSnapshot {
            binary,
            html: editor.html(),
            json: Some(editor.json()),
        })
    }

    // === Replication ===

    /// Merge a binary update into the replicated document and show it.
    pub fn set_provider_document(&mut self, update: &[u8]) -> Result<(), EditorError> {
        if self.is_destroyed() {
            tracing::warn!("provider update on a closed editor session");
            return Err(EditorError::SessionClosed);
        }
        let Some(document) = self.document() else {
            tracing::warn!("provider update on an editor without a replicated document");
            return Ok(());
        };
        if let Err(error) = document.apply(update, DeltaOrigin::Remote) {
            tracing::warn!(document = %document.id(), %error, "rejected provider update");
            return Ok(());
        }
        self.process_remote_changes().map(|_| ())
    }

    /// Fold deltas merged from the network or the cache into the editor.
    /// Returns whether the editor content changed.
    pub fn process_remote_changes(&mut self) -> Result<bool, EditorError> {
        match &self.link {
            Some(link) => link.borrow_mut().absorb(&mut self.editor.borrow_mut()),
            None => Ok(false),
        }
    }

    // === Events ===

    pub fn subscribe(&self, kind: EventKind, listener: impl Fn(&EditorEvent) + 'static) -> Subscription {
        self.editor.borrow().subscribe(kind, listener)
    }

    pub fn on_heading_change(&self, callback: impl Fn(&[HeadingMarking]) + 'static) -> Subscription {
        self.editor.borrow().on_heading_change(callback)
    }

    pub fn on_state_change(&self, callback: impl Fn(Selection, bool) + 'static) -> Subscription {
        self.editor.borrow().on_state_change(callback)
    }

    // === Attachments ===

    /// Start the lifecycle of the image at `pos`. Attribute changes it makes
    /// go through the editor and on into the replicated document.
    ///
    /// The node is found again by its source and upload id on every write,
    /// so edits elsewhere that move it are fine.
    pub fn mount_image(&self, pos: usize, viewport: Viewport) -> Option<ImageLifecycle> {
        let editor = self.editor.borrow();
        let attrs = editor.image_at(pos)?.clone();
        let restorer = editor.config().restorer();
        let sink = attribute_sink(
            Rc::downgrade(&self.editor),
            self.link.as_ref().map(Rc::downgrade),
            attrs.clone(),
            pos,
        );
        let image = ImageLifecycle::new(attrs, viewport, restorer, sink);
        let mut mounted = self.mounted.borrow_mut();
        mounted.retain(|weak| weak.upgrade().is_some());
        mounted.push(image.downgrade());
        Some(image)
    }

    /// Tear down the editor, unmount every image it handed out and drop the
    /// document link.
    pub fn destroy(&mut self) {
        for image in self.mounted.take() {
            if let Some(image) = image.upgrade() {
                image.unmount();
            }
        }
        self.editor.borrow_mut().destroy();
        self.link = None;
    }
}

fn attribute_sink(
    editor: Weak<RefCell<Editor>>,
    link: Option<Weak<RefCell<DocumentLink>>>,
    mounted: ImageAttrs,
    pos: usize,
) -> AttributeSink {
    // Identity of the node as last written, and where it was.
    let node = RefCell::new(mounted);
    let near = Cell::new(pos);
    Rc::new(move |attrs: &ImageAttrs| {
        let editor = editor.upgrade().ok_or(EditorError::SessionClosed)?;
        let mut editor = editor
            .try_borrow_mut()
            .map_err(|_| EditorError::InvalidAttributes("editor is busy".into()))?;
        let link = match &link {
            Some(weak) => Some(weak.upgrade().ok_or(EditorError::SessionClosed)?),
            None => None,
        };
        let mut link = match &link {
            Some(link) => Some(
                link.try_borrow_mut()
                    .map_err(|_| EditorError::InvalidAttributes("editor is busy".into()))?,
            ),
            None => None,
        };
        if let Some(link) = link.as_mut() {
            link.absorb(&mut editor)?;
        }

        let mut node = node.borrow_mut();
        let pos = editor
            .locate_image(&node, near.get())
            .ok_or_else(|| EditorError::InvalidAttributes("image is no longer in the document".into()))?;
        let mut next = editor.image_at(pos).cloned().unwrap_or_else(|| node.clone());
        next.width = attrs.width;
        next.height = attrs.height;
        next.aspect_ratio = attrs.aspect_ratio;
        // Source and upload id only change when the lifecycle changed them.
        if attrs.src != node.src {
            next.src = attrs.src.clone();
        }
        if attrs.id != node.id {
            next.id = attrs.id.clone();
        }
        editor.update_image_attrs(pos, next.clone())?;
        *node = next;
        near.set(pos);

        if let Some(link) = link.as_mut() {
            link.push(&mut editor);
        }
        Ok(())
    })
}

impl Drop for EditorSession {
    fn drop(&mut self) {
        for image in self.mounted.get_mut().drain(..) {
            if let Some(image) = image.upgrade() {
                image.unmount();
            }
        }
        if let Ok(mut editor) = self.editor.try_borrow_mut() {
            editor.destroy();
        }
    }
}
