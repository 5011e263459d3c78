//! Loro-backed replicated document.
//!
//! The document holds a single text container, `content`, carrying the
//! canonical markup of the editor state. Local edits are written as a
//! minimal splice so concurrent edits to different regions merge cleanly.
//! Every accepted change is broadcast as a [`DocumentDelta`] tagged with its
//! origin.

use std::borrow::Cow;
use std::sync::Mutex;

use bytes::Bytes;
use loro::{ExportMode, LoroDoc, LoroText, VersionVector};
use quire_common::{DeltaOrigin, DocumentDelta, DocumentSync, SyncError};
use smol_str::SmolStr;
use tokio::sync::broadcast;

use crate::CrdtError;

const CONTENT: &str = "content";
const DELTA_CAPACITY: usize = 256;

pub struct ReplicatedDocument {
    id: SmolStr,
    doc: LoroDoc,
    content: LoroText,
    deltas: broadcast::Sender<DocumentDelta>,
    /// Serializes local writes with each other and with merges.
    write_lock: Mutex<()>,
}

impl ReplicatedDocument {
    /// Create a new empty document.
    pub fn new(id: impl Into<SmolStr>) -> Self {
        let doc = LoroDoc::new();
        let content = doc.get_text(CONTENT);
        let (deltas, _) = broadcast::channel(DELTA_CAPACITY);
        Self {
            id: id.into(),
            doc,
            content,
            deltas,
            write_lock: Mutex::new(()),
        }
    }

    /// Create a document from a full-state encoding.
    pub fn from_snapshot(id: impl Into<SmolStr>, snapshot: &[u8]) -> Result<Self, CrdtError> {
        let document = Self::new(id);
        document.doc.import(snapshot)?;
        Ok(document)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current markup.
    pub fn content(&self) -> String {
        self.content.to_string()
    }

    pub fn is_empty(&self) -> bool {
        self.content.len_unicode() == 0
    }

    pub fn version(&self) -> VersionVector {
        self.doc.oplog_vv()
    }

    /// Replace the markup with `next`, writing only the changed middle.
    /// Returns false if nothing changed.
    pub fn replace_content(&self, next: &str) -> Result<bool, CrdtError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        match Splice::between(&self.content.to_string(), next) {
            Some(splice) => self.write(splice),
            None => Ok(false),
        }
    }

    /// Write the edit that turns `base` into `next`, rebased over whatever
    /// was merged into the document since it last held `base`.
    ///
    /// Where both sides touched the same span, the merged text keeps theirs
    /// and places ours after it. Returns false if the edit was empty.
    pub fn merge_content(&self, base: &str, next: &str) -> Result<bool, CrdtError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let Some(local) = Splice::between(base, next) else {
            return Ok(false);
        };
        let splice = match Splice::between(base, &self.content.to_string()) {
            Some(merged) => local.rebase(&merged),
            None => local,
        };
        self.write(splice)
    }

    /// Commit one splice and broadcast it. Callers hold `write_lock`.
    fn write(&self, splice: Splice) -> Result<bool, CrdtError> {
        if splice.delete_len == 0 && splice.insert.is_empty() {
            return Ok(false);
        }
        let before = self.doc.oplog_vv();
        if splice.delete_len > 0 {
            self.content.delete(splice.start, splice.delete_len)?;
        }
        if !splice.insert.is_empty() {
            self.content.insert(splice.start, &splice.insert)?;
        }
        self.doc.commit();

        let update = self
            .doc
            .export(ExportMode::Updates {
                from: Cow::Owned(before),
            })
            .map_err(|e| CrdtError::Export(e.to_string()))?;
        tracing::trace!(document = %self.id, bytes = update.len(), "local change committed");
        self.publish(DeltaOrigin::Local, update);
        Ok(true)
    }

    /// Merge a delta from anywhere. Duplicate and out-of-order deltas are
    /// fine; empty ones are ignored.
    pub fn apply(&self, data: &[u8], origin: DeltaOrigin) -> Result<(), CrdtError> {
        if data.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let before = self.doc.oplog_vv();
        self.doc.import(data)?;
        if self.doc.oplog_vv() != before {
            self.publish(origin, data.to_vec());
        }
        Ok(())
    }

    /// Full state at call time, usable to seed a new replica.
    pub fn encode_full_state(&self) -> Result<Vec<u8>, CrdtError> {
        quire_common::perf::measure("encode full state", || {
            self.doc
                .export(ExportMode::Snapshot)
                .map_err(|e| CrdtError::Export(e.to_string()))
        })
    }

    /// Every update a replica at `version` is missing. An empty vector
    /// means everything.
    pub fn export_updates_since(&self, version: &VersionVector) -> Result<Vec<u8>, CrdtError> {
        self.doc
            .export(ExportMode::Updates {
                from: Cow::Borrowed(version),
            })
            .map_err(|e| CrdtError::Export(e.to_string()))
    }

    fn publish(&self, origin: DeltaOrigin, data: Vec<u8>) {
        // No receivers is fine.
        let _ = self.deltas.send(DocumentDelta {
            origin,
            data: Bytes::from(data),
        });
    }
}

impl std::fmt::Debug for ReplicatedDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicatedDocument")
            .field("id", &self.id)
            .field("len", &self.content.len_unicode())
            .finish()
    }
}

impl DocumentSync for ReplicatedDocument {
    fn document_id(&self) -> &str {
        &self.id
    }

    fn state_vector(&self) -> Vec<u8> {
        self.doc.oplog_vv().encode()
    }

    fn updates_since(&self, state_vector: &[u8]) -> Result<Vec<u8>, SyncError> {
        let version = if state_vector.is_empty() {
            VersionVector::default()
        } else {
            VersionVector::decode(state_vector).map_err(|e| CrdtError::Import(e.to_string()))?
        };
        Ok(self.export_updates_since(&version)?)
    }

    fn apply_delta(&self, data: &[u8], origin: DeltaOrigin) -> Result<(), SyncError> {
        Ok(self.apply(data, origin)?)
    }

    fn subscribe(&self) -> broadcast::Receiver<DocumentDelta> {
        self.deltas.subscribe()
    }
}

/// Character-level replacement turning one string into another.
#[derive(Debug, PartialEq, Eq)]
struct Splice {
    start: usize,
    delete_len: usize,
    insert: String,
}

impl Splice {
    fn between(current: &str, next: &str) -> Option<Self> {
        if current == next {
            return None;
        }
        let a: Vec<char> = current.chars().collect();
        let b: Vec<char> = next.chars().collect();
        let prefix = a.iter().zip(&b).take_while(|(x, y)| x == y).count();
        let max_suffix = a.len().min(b.len()) - prefix;
        let suffix = a
            .iter()
            .rev()
            .zip(b.iter().rev())
            .take(max_suffix)
            .take_while(|(x, y)| x == y)
            .count();
        Some(Self {
            start: prefix,
            delete_len: a.len() - prefix - suffix,
            insert: b[prefix..b.len() - suffix].iter().collect(),
        })
    }

    fn end(&self) -> usize {
        self.start + self.delete_len
    }

    /// Move this splice, taken against the same base as `other`, onto the
    /// text `other` produced.
    fn rebase(self, other: &Splice) -> Self {
        let inserted = other.insert.chars().count();
        if self.end() <= other.start {
            self
        } else if self.start >= other.end() {
            Self {
                start: self.start + inserted - other.delete_len,
                ..self
            }
        } else {
            // Overlap: their text stays, ours goes after it, and only the
            // part of our deletion past theirs survives.
            Self {
                start: other.start + inserted,
                delete_len: self.end().saturating_sub(other.end()),
                insert: self.insert,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splice_is_minimal() {
        let splice = Splice::between("<p>hello</p>", "<p>help</p>").unwrap();
        assert_eq!(
            splice,
            Splice {
                start: 6,
                delete_len: 2,
                insert: "p".into(),
            }
        );
        assert_eq!(Splice::between("same", "same"), None);
    }

    #[test]
    fn test_splice_repeated_chars() {
        // Prefix and suffix must not overlap.
        let splice = Splice::between("aaa", "aaaa").unwrap();
        assert_eq!(splice.start, 3);
        assert_eq!(splice.delete_len, 0);
        assert_eq!(splice.insert, "a");
    }

    #[test]
    fn test_rebase_shifts_past_earlier_edit() {
        let base = "<p>a</p><p>b</p>";
        let ours = Splice::between(base, "<p>a</p><p>bee</p>").unwrap();
        let theirs = Splice::between(base, "<p>aaa</p><p>b</p>").unwrap();
        let rebased = ours.rebase(&theirs);
        assert_eq!(rebased.start, 14);

        let doc = ReplicatedDocument::new("d");
        doc.replace_content(base).unwrap();
        doc.replace_content("<p>aaa</p><p>b</p>").unwrap();
        assert!(doc.merge_content(base, "<p>a</p><p>bee</p>").unwrap());
        assert_eq!(doc.content(), "<p>aaa</p><p>bee</p>");
    }

    #[test]
    fn test_merge_keeps_concurrent_append() {
        let doc = ReplicatedDocument::new("d");
        doc.replace_content("<p>base</p>").unwrap();
        doc.replace_content("<p>base</p><p>remote line</p>").unwrap();
        doc.merge_content("<p>base</p>", "<p>local</p><p>base</p>").unwrap();
        assert_eq!(doc.content(), "<p>local</p><p>base</p><p>remote line</p>");
    }

    #[test]
    fn test_merge_overlap_keeps_both() {
        let doc = ReplicatedDocument::new("d");
        doc.replace_content("<p>cat</p>").unwrap();
        doc.replace_content("<p>cow</p>").unwrap();
        doc.merge_content("<p>cat</p>", "<p>cut</p>").unwrap();
        assert_eq!(doc.content(), "<p>cowu</p>");
    }

    #[test]
    fn test_replace_content_broadcasts_local_delta() {
        let doc = ReplicatedDocument::new("doc-1");
        let mut rx = doc.subscribe();
        assert!(doc.replace_content("<p>hi</p>").unwrap());
        assert!(!doc.replace_content("<p>hi</p>").unwrap());

        let delta = rx.try_recv().unwrap();
        assert_eq!(delta.origin, DeltaOrigin::Local);
        assert!(rx.try_recv().is_err());

        let other = ReplicatedDocument::new("doc-1");
        other.apply(&delta.data, DeltaOrigin::Remote).unwrap();
        assert_eq!(other.content(), "<p>hi</p>");
    }

    #[test]
    fn test_empty_and_duplicate_deltas() {
        let a = ReplicatedDocument::new("d");
        a.replace_content("<p>x</p>").unwrap();
        let all = a.updates_since(&[]).unwrap();

        let b = ReplicatedDocument::new("d");
        let mut rx = b.subscribe();
        b.apply(&[], DeltaOrigin::Remote).unwrap();
        b.apply(&all, DeltaOrigin::Remote).unwrap();
        b.apply(&all, DeltaOrigin::Remote).unwrap();
        assert_eq!(b.content(), "<p>x</p>");

        // Only the first application changed anything.
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_state_vector_exchange() {
        let a = ReplicatedDocument::new("d");
        let b = ReplicatedDocument::new("d");
        a.replace_content("<p>one</p>").unwrap();
        b.apply(&a.updates_since(&b.state_vector()).unwrap(), DeltaOrigin::Remote)
            .unwrap();
        a.replace_content("<p>one two</p>").unwrap();

        let missing = a.updates_since(&b.state_vector()).unwrap();
        b.apply(&missing, DeltaOrigin::Remote).unwrap();
        assert_eq!(b.content(), "<p>one two</p>");
    }
}
