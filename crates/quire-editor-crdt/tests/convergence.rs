//! Replicas converge whatever order deltas arrive in.

use quire_common::{DeltaOrigin, DocumentSync};
use quire_editor_crdt::ReplicatedDocument;

/// Every delta `document` broadcasts while `edit` runs.
fn capture(document: &ReplicatedDocument, edit: impl FnOnce(&ReplicatedDocument)) -> Vec<Vec<u8>> {
    let mut rx = document.subscribe();
    edit(document);
    let mut deltas = Vec::new();
    while let Ok(delta) = rx.try_recv() {
        deltas.push(delta.data.to_vec());
    }
    deltas
}

fn assert_same_state(a: &ReplicatedDocument, b: &ReplicatedDocument) {
    assert_eq!(a.content(), b.content());
    assert_eq!(a.version(), b.version());
    assert_eq!(a.state_vector(), b.state_vector());
}

#[test]
fn test_any_order_with_duplicates_converges() {
    let alice = ReplicatedDocument::new("page");
    let bob = ReplicatedDocument::new("page");

    let mut deltas = capture(&alice, |doc| {
        doc.replace_content("<p>shared</p>").unwrap();
    });
    bob.apply(&deltas[0], DeltaOrigin::Remote).unwrap();

    // Concurrent edits from a common base.
    deltas.extend(capture(&alice, |doc| {
        doc.replace_content("<p>shared by alice</p>").unwrap();
        doc.replace_content("<p>shared by alice.</p>").unwrap();
    }));
    deltas.extend(capture(&bob, |doc| {
        doc.replace_content("<h1>Notes</h1><p>shared</p>").unwrap();
    }));
    assert_eq!(deltas.len(), 4);

    let forward = ReplicatedDocument::new("page");
    for delta in &deltas {
        forward.apply(delta, DeltaOrigin::Remote).unwrap();
    }

    let shuffled = ReplicatedDocument::new("page");
    for i in [3, 1, 3, 0, 2, 1, 0] {
        shuffled.apply(&deltas[i], DeltaOrigin::Remote).unwrap();
    }

    assert_same_state(&forward, &shuffled);
    assert!(forward.content().contains("<h1>Notes</h1>"));
    assert!(forward.content().contains("alice."));

    // The authors converge too once they swap what they are missing.
    alice
        .apply(&bob.updates_since(&alice.state_vector()).unwrap(), DeltaOrigin::Remote)
        .unwrap();
    bob.apply(&alice.updates_since(&bob.state_vector()).unwrap(), DeltaOrigin::Remote)
        .unwrap();
    assert_same_state(&alice, &bob);
    assert_same_state(&alice, &forward);
}

#[test]
fn test_full_state_round_trip() {
    let source = ReplicatedDocument::new("page");
    source.replace_content("<p>one</p>").unwrap();
    source.replace_content("<p>one two</p>").unwrap();

    let encoded = source.encode_full_state().unwrap();
    let replica = ReplicatedDocument::new("page");
    replica.apply(&encoded, DeltaOrigin::Remote).unwrap();
    assert_same_state(&source, &replica);

    // Applying it again changes nothing.
    let version = replica.version();
    replica.apply(&encoded, DeltaOrigin::Remote).unwrap();
    assert_eq!(replica.version(), version);

    let seeded = ReplicatedDocument::from_snapshot("page", &replica.encode_full_state().unwrap()).unwrap();
    assert_same_state(&source, &seeded);
}

#[test]
fn test_garbage_delta_is_rejected_without_damage() {
    let doc = ReplicatedDocument::new("page");
    doc.replace_content("<p>safe</p>").unwrap();
    assert!(doc.apply(b"definitely not loro", DeltaOrigin::Remote).is_err());
    assert_eq!(doc.content(), "<p>safe</p>");
}
