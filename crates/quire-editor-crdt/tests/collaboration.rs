//! A collaborative editor against an in-memory collaboration server.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use quire_common::DeltaOrigin;
use quire_common::DocumentSync;
use quire_common::transport::memory::{self, MemoryListener, MemoryPeer};
use quire_common::transport::{
    CLOSE_POLICY_VIOLATION, CollabMessage, ConnectionState, PresenceMessage, ReconnectPolicy,
    SessionEvent, SessionParams, SessionRegistry,
};
use quire_editor_core::EditorConfig;
use quire_editor_crdt::{CacheStore, CollaborativeEditor, CrdtError, MemoryCacheStore, ReplicatedDocument};
use tokio::time::timeout;
use url::Url;

const WAIT: Duration = Duration::from_secs(2);

fn params(document: &str) -> SessionParams {
    SessionParams::new(
        document,
        Url::parse("ws://collab.test/collaboration").unwrap(),
        r#"{"id":"u1","name":"Alice"}"#,
    )
    .with_reconnect(ReconnectPolicy {
        initial_delay_ms: 5,
        max_delay_ms: 20,
        max_attempts: Some(2),
    })
}

async fn accept(listener: &mut MemoryListener) -> MemoryPeer {
    timeout(WAIT, listener.accept())
        .await
        .expect("timed out waiting for connection")
        .expect("connector dropped")
}

/// Play the server side of the initial exchange from `server`'s state.
async fn serve_handshake(peer: &mut MemoryPeer, server: &ReplicatedDocument) {
    assert!(matches!(peer.recv().await, Some(CollabMessage::Auth { .. })));
    assert!(peer.send(&CollabMessage::Authenticated));
    let Some(CollabMessage::SyncStep1 { state_vector }) = peer.recv().await else {
        panic!("expected sync step 1");
    };
    let update = server.updates_since(&state_vector).unwrap();
    assert!(peer.send(&CollabMessage::SyncStep2 { update }));
}

async fn wait_for(editor: &mut CollaborativeEditor, wanted: impl Fn(&SessionEvent) -> bool) {
    loop {
        let event = timeout(WAIT, editor.next_event())
            .await
            .expect("timed out waiting for event")
            .expect("event stream ended");
        if wanted(&event) {
            return;
        }
    }
}

#[tokio::test]
async fn test_sync_edit_and_close() {
    let server = ReplicatedDocument::new("page-1");
    server.replace_content("<p>from the server</p>").unwrap();

    let (connector, mut listener) = memory::channel();
    let registry = SessionRegistry::new();
    let store = Arc::new(MemoryCacheStore::new());
    let mut editor = CollaborativeEditor::open(
        &registry,
        params("page-1"),
        connector,
        store.clone(),
        EditorConfig::default(),
        None,
    )
    .await
    .unwrap();
    assert!(!editor.has_server_synced());
    assert!(registry.is_open("page-1"));

    let mut peer = accept(&mut listener).await;
    serve_handshake(&mut peer, &server).await;
    wait_for(&mut editor, |e| *e == SessionEvent::Synced).await;

    assert!(editor.has_server_synced());
    assert_eq!(editor.connection_state(), ConnectionState::Synced);
    assert_eq!(editor.editor().html(), "<p>from the server</p>");
    assert!(editor.editor().with_editor(|e| e.has_extension("collaboration")));

    // A local edit goes out as an update.
    editor
        .editor_mut()
        .set_editor_value("<p>from the server, edited</p>", true)
        .unwrap();
    let Some(CollabMessage::Update { data }) = timeout(WAIT, peer.recv()).await.unwrap() else {
        panic!("expected an update");
    };
    server.apply(&data, DeltaOrigin::Remote).unwrap();
    assert_eq!(server.content(), "<p>from the server, edited</p>");

    // And a remote one comes in.
    let before = server.version();
    server.replace_content("<h1>Title</h1><p>from the server, edited</p>").unwrap();
    assert!(peer.send(&CollabMessage::Update {
        data: server.export_updates_since(&before).unwrap(),
    }));
    wait_for(&mut editor, |e| matches!(e, SessionEvent::RemoteUpdate { .. })).await;
    assert_eq!(
        editor.editor().html(),
        "<h1>Title</h1><p>from the server, edited</p>"
    );
    assert_eq!(editor.editor().headings().len(), 1);

    editor.close().await.unwrap();
    assert!(!registry.is_open("page-1"));

    // The cache holds everything, compacted.
    let cached = store.load("page-1").await.unwrap();
    assert!(cached.deltas.is_empty());
    let restored = ReplicatedDocument::from_snapshot("page-1", &cached.snapshot.unwrap()).unwrap();
    assert_eq!(restored.content(), server.content());
}

#[tokio::test]
async fn test_command_before_remote_event_keeps_remote_edit() {
    let server = ReplicatedDocument::new("page-6");
    server.replace_content("<p>base</p>").unwrap();

    let (connector, mut listener) = memory::channel();
    let registry = SessionRegistry::new();
    let mut editor = CollaborativeEditor::open_uncached(
        &registry,
        params("page-6"),
        connector,
        EditorConfig::default(),
        None,
    )
    .unwrap();
    let mut peer = accept(&mut listener).await;
    serve_handshake(&mut peer, &server).await;
    wait_for(&mut editor, |e| *e == SessionEvent::Synced).await;

    let before = server.version();
    server.replace_content("<p>base</p><p>remote line</p>").unwrap();
    assert!(peer.send(&CollabMessage::Update {
        data: server.export_updates_since(&before).unwrap(),
    }));

    // The network task merges it; the host has not polled for the event yet.
    let document = editor.editor().document().unwrap();
    timeout(WAIT, async {
        while !document.content().contains("remote line") {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("remote update never merged");

    editor
        .editor_mut()
        .insert_at_position(0, "<p>local</p>")
        .unwrap();
    assert_eq!(
        document.content(),
        "<p>local</p><p>base</p><p>remote line</p>"
    );
    assert_eq!(editor.editor().html(), document.content());
    editor.close().await.unwrap();
}

#[tokio::test]
async fn test_cached_content_is_shown_before_connecting() {
    let store = Arc::new(MemoryCacheStore::new());
    {
        let offline = ReplicatedDocument::new("page-2");
        offline.replace_content("<p>written offline</p>").unwrap();
        store
            .compact("page-2", &offline.encode_full_state().unwrap())
            .await
            .unwrap();
    }

    let (connector, _listener) = memory::channel();
    let registry = SessionRegistry::new();
    let editor = CollaborativeEditor::open(
        &registry,
        params("page-2"),
        connector,
        store,
        EditorConfig::default(),
        None,
    )
    .await
    .unwrap();
    assert!(!editor.has_server_synced());
    assert_eq!(editor.editor().html(), "<p>written offline</p>");
    editor.close().await.unwrap();
}

#[tokio::test]
async fn test_one_editor_per_document() {
    let (connector, _listener) = memory::channel();
    let registry = SessionRegistry::new();
    let first = CollaborativeEditor::open_uncached(
        &registry,
        params("page-3"),
        connector.clone(),
        EditorConfig::default(),
        None,
    )
    .unwrap();
    let second = CollaborativeEditor::open(
        &registry,
        params("page-3"),
        connector,
        Arc::new(MemoryCacheStore::new()),
        EditorConfig::default(),
        None,
    )
    .await;
    assert!(matches!(second, Err(CrdtError::Session(_))));
    first.close().await.unwrap();
}

#[tokio::test]
async fn test_stateless_messages_and_presence() {
    let server = ReplicatedDocument::new("page-4");
    let (connector, mut listener) = memory::channel();
    let registry = SessionRegistry::new();
    let mut editor = CollaborativeEditor::open_uncached(
        &registry,
        params("page-4"),
        connector,
        EditorConfig::default(),
        None,
    )
    .unwrap();
    let mut peer = accept(&mut listener).await;
    serve_handshake(&mut peer, &server).await;
    wait_for(&mut editor, |e| *e == SessionEvent::Synced).await;

    let heard = Rc::new(RefCell::new(Vec::<String>::new()));
    let listener_handle = editor.listen_to_realtime_update({
        let heard = heard.clone();
        move |payload| heard.borrow_mut().push(payload.to_owned())
    });

    let join = PresenceMessage::Join {
        client_id: "bob".into(),
        display_name: "Bob".into(),
    };
    assert!(peer.send(&CollabMessage::Stateless {
        payload: join.to_payload().unwrap(),
    }));
    wait_for(&mut editor, |e| matches!(e, SessionEvent::Stateless(_))).await;
    assert_eq!(heard.borrow().len(), 1);
    assert!(editor.presence().contains("bob"));

    // Turned off: later messages are not heard.
    listener_handle.off();
    assert!(peer.send(&CollabMessage::Stateless {
        payload: r#"{"action":"locked"}"#.into(),
    }));
    wait_for(&mut editor, |e| matches!(e, SessionEvent::Stateless(_))).await;
    assert_eq!(heard.borrow().len(), 1);

    editor.emit_realtime_update("ping").unwrap();
    match timeout(WAIT, peer.recv()).await.unwrap() {
        Some(CollabMessage::Stateless { payload }) => assert_eq!(payload, "ping"),
        other => panic!("expected stateless, got {other:?}"),
    }
    editor.close().await.unwrap();
}

#[tokio::test]
async fn test_policy_close_flags_connection_failure() {
    let server = ReplicatedDocument::new("page-5");
    let (connector, mut listener) = memory::channel();
    let registry = SessionRegistry::new();
    let mut editor = CollaborativeEditor::open_uncached(
        &registry,
        params("page-5"),
        connector,
        EditorConfig::default(),
        None,
    )
    .unwrap();
    let mut peer = accept(&mut listener).await;
    serve_handshake(&mut peer, &server).await;
    wait_for(&mut editor, |e| *e == SessionEvent::Synced).await;
    assert!(!editor.has_server_connection_failed());

    peer.close(CLOSE_POLICY_VIOLATION);
    wait_for(&mut editor, |e| matches!(e, SessionEvent::ServerError { .. })).await;
    assert!(editor.has_server_connection_failed());
    editor.close().await.unwrap();
}
