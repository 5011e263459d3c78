//! Collaborative editor wiring.
//!
//! [`CollaborativeEditor`] puts the pieces together for one document: the
//! offline cache is replayed first, the editor is built from whatever that
//! produced, and the realtime session is opened last. The host then drives
//! it with [`CollaborativeEditor::next_event`], which folds remote changes
//! into the editor and hands side-channel messages to listeners.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::sync::Arc;

use quire_common::transport::{
    ConnectionState, Connector, PresenceMessage, PresenceTracker, RealtimeSession, ServerHandler,
    SessionError, SessionEvent, SessionEvents, SessionParams, SessionRegistry,
};
use quire_editor_core::EditorConfig;

use crate::cache::{self, CacheHandle, CacheStore};
use crate::session::EditorSession;
use crate::{CrdtError, ReplicatedDocument};

type RealtimeCallback = Rc<dyn Fn(&str)>;

#[derive(Default)]
struct Listeners {
    entries: RefCell<Vec<(u64, RealtimeCallback)>>,
    next_id: Cell<u64>,
}

impl Listeners {
    fn dispatch(&self, payload: &str) {
        // Snapshot so a callback may drop its own listener.
        let callbacks: Vec<RealtimeCallback> =
            self.entries.borrow().iter().map(|(_, cb)| cb.clone()).collect();
        for callback in callbacks {
            callback(payload);
        }
    }
}

/// A registered side-channel listener. Dropping it turns the listener off.
#[must_use = "the listener is removed when this is dropped"]
pub struct RealtimeListener {
    listeners: Weak<Listeners>,
    id: u64,
}

impl RealtimeListener {
    pub fn off(self) {}
}

impl Drop for RealtimeListener {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.entries.borrow_mut().retain(|(id, _)| *id != self.id);
        }
    }
}

pub struct CollaborativeEditor {
    editor: EditorSession,
    realtime: RealtimeSession,
    events: SessionEvents,
    cache: Option<CacheHandle>,
    listeners: Rc<Listeners>,
    presence: PresenceTracker,
}

impl CollaborativeEditor {
    /// Open `params.document` with an offline cache in `store`.
    pub async fn open<C: Connector, S: CacheStore>(
        registry: &SessionRegistry,
        params: SessionParams,
        connector: C,
        store: Arc<S>,
        config: EditorConfig,
        handler: Option<Arc<dyn ServerHandler>>,
    ) -> Result<Self, CrdtError> {
        if registry.is_open(&params.document) {
            return Err(SessionError::AlreadyOpen(params.document).into());
        }
        let document = Arc::new(ReplicatedDocument::new(params.document.clone()));
        let cache = cache::attach(store, document.clone()).await?;
        match Self::assemble(registry, params, connector, document, config, handler) {
            Ok(editor) => Ok(Self {
                cache: Some(cache),
                ..editor
            }),
            Err(error) => {
                cache.detach().await?;
                Err(error)
            }
        }
    }

    /// Open `params.document` without offline persistence.
    pub fn open_uncached<C: Connector>(
        registry: &SessionRegistry,
        params: SessionParams,
        connector: C,
        config: EditorConfig,
        handler: Option<Arc<dyn ServerHandler>>,
    ) -> Result<Self, CrdtError> {
        let document = Arc::new(ReplicatedDocument::new(params.document.clone()));
        Self::assemble(registry, params, connector, document, config, handler)
    }

    fn assemble<C: Connector>(
        registry: &SessionRegistry,
        params: SessionParams,
        connector: C,
        document: Arc<ReplicatedDocument>,
        config: EditorConfig,
        handler: Option<Arc<dyn ServerHandler>>,
    ) -> Result<Self, CrdtError> {
        let editor = EditorSession::with_document(config.collaborative(), document.clone());
        let (realtime, events) = registry.open(params, connector, document, handler)?;
        Ok(Self {
            editor,
            realtime,
            events,
            cache: None,
            listeners: Rc::default(),
            presence: PresenceTracker::new(),
        })
    }

    pub fn editor(&self) -> &EditorSession {
        &self.editor
    }

    pub fn editor_mut(&mut self) -> &mut EditorSession {
        &mut self.editor
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.realtime.state()
    }

    /// True once the initial exchange with the server has completed.
    pub fn has_server_synced(&self) -> bool {
        self.realtime.has_synced()
    }

    /// True after an authentication failure or server error, until the next sync.
    pub fn has_server_connection_failed(&self) -> bool {
        self.realtime.has_connection_failed()
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    /// Wait for the next session event and apply it.
    ///
    /// Remote updates reach the editor before this returns. `None` once the
    /// session has stopped and every event was handed out.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        let event = self.events.next().await?;
        match &event {
            SessionEvent::RemoteUpdate { .. } | SessionEvent::Synced => {
                if let Err(error) = self.editor.process_remote_changes() {
                    tracing::warn!(document = %self.realtime.document_id(), %error, "remote changes not applied");
                }
            }
            SessionEvent::Stateless(payload) => {
                if let Some(message) = PresenceMessage::from_payload(payload) {
                    self.presence.apply(&message);
                }
                self.listeners.dispatch(payload);
            }
            SessionEvent::AuthenticationFailed { reason } => {
                tracing::warn!(document = %self.realtime.document_id(), %reason, "collaboration server rejected credentials");
            }
            _ => {}
        }
        Some(event)
    }

    /// Send a fire-and-forget side-channel message.
    pub fn emit_realtime_update(&self, payload: impl Into<String>) -> Result<(), SessionError> {
        self.realtime.send_stateless(payload)
    }

    /// Announce our own presence on the side channel.
    pub fn announce(&self, message: &PresenceMessage) -> Result<(), SessionError> {
        let payload = message
            .to_payload()
            .map_err(|e| SessionError::Send(Box::new(e)))?;
        self.realtime.send_stateless(payload)
    }

    /// Listen to side-channel messages until the returned handle is dropped.
    pub fn listen_to_realtime_update(&self, callback: impl Fn(&str) + 'static) -> RealtimeListener {
        let id = self.listeners.next_id.get();
        self.listeners.next_id.set(id + 1);
        self.listeners
            .entries
            .borrow_mut()
            .push((id, Rc::new(callback)));
        RealtimeListener {
            listeners: Rc::downgrade(&self.listeners),
            id,
        }
    }

    /// Tear everything down: editor first, then the network, then flush and
    /// compact the cache.
    pub async fn close(self) -> Result<(), CrdtError> {
        let Self {
            mut editor,
            realtime,
            cache,
            ..
        } = self;
        editor.destroy();
        realtime.shutdown().await;
        if let Some(cache) = cache {
            cache.detach().await?;
        }
        Ok(())
    }
}
