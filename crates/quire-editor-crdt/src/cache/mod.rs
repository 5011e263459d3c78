//! Offline cache mirroring a replicated document.
//!
//! [`attach`] replays whatever the store holds for a document into it, then
//! follows every accepted local and remote delta into the store from a
//! background writer. [`CacheHandle::detach`] flushes the writer and
//! compacts the stored deltas into one snapshot.

mod file;
mod memory;

use std::future::Future;
use std::sync::{Arc, Weak};

use quire_common::{DeltaOrigin, DocumentDelta, DocumentSync};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

use crate::{CrdtError, ReplicatedDocument};

pub use file::FileCacheStore;
pub use memory::MemoryCacheStore;

/// What a store holds for one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachedState {
    pub snapshot: Option<Vec<u8>>,
    /// Deltas written after the snapshot, oldest first.
    pub deltas: Vec<Vec<u8>>,
}

impl CachedState {
    pub fn is_empty(&self) -> bool {
        self.snapshot.is_none() && self.deltas.is_empty()
    }
}

/// Durable storage for document state, keyed by document id.
///
/// Each write must be atomic: a reader sees a delta or snapshot completely
/// or not at all.
pub trait CacheStore: Send + Sync + 'static {
    fn load(&self, id: &str) -> impl Future<Output = Result<CachedState, CrdtError>> + Send;

    fn append_delta(&self, id: &str, data: &[u8]) -> impl Future<Output = Result<(), CrdtError>> + Send;

    /// Replace everything stored for `id` with one snapshot.
    fn compact(&self, id: &str, snapshot: &[u8]) -> impl Future<Output = Result<(), CrdtError>> + Send;
}

/// A document's live link to the cache.
pub struct CacheHandle {
    document: Arc<ReplicatedDocument>,
    shutdown: Option<oneshot::Sender<()>>,
    writer: Option<JoinHandle<Result<(), CrdtError>>>,
}

/// Load cached state into `document` and start mirroring its deltas.
pub async fn attach<S: CacheStore>(
    store: Arc<S>,
    document: Arc<ReplicatedDocument>,
) -> Result<CacheHandle, CrdtError> {
    let id = document.id().to_owned();
    let cached = store.load(&id).await?;
    if !cached.is_empty() {
        tracing::debug!(
            document = %id,
            snapshot = cached.snapshot.is_some(),
            deltas = cached.deltas.len(),
            "replaying cached state"
        );
    }
    if let Some(snapshot) = &cached.snapshot {
        document.apply(snapshot, DeltaOrigin::Cache)?;
    }
    for delta in &cached.deltas {
        // A damaged delta is skipped; the rest still merge.
        if let Err(error) = document.apply(delta, DeltaOrigin::Cache) {
            tracing::warn!(document = %id, %error, "skipping unreadable cached delta");
        }
    }

    let deltas = document.subscribe();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let writer = tokio::spawn(write_deltas(
        store,
        Arc::downgrade(&document),
        id,
        deltas,
        shutdown_rx,
    ));
    Ok(CacheHandle {
        document,
        shutdown: Some(shutdown_tx),
        writer: Some(writer),
    })
}

impl CacheHandle {
    pub fn document(&self) -> &Arc<ReplicatedDocument> {
        &self.document
    }

    /// Flush pending writes, compact, and stop mirroring.
    pub async fn detach(mut self) -> Result<(), CrdtError> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        match self.writer.take() {
            Some(writer) => writer
                .await
                .map_err(|e| CrdtError::Cache(format!("cache writer failed: {e}")))?,
            None => Ok(()),
        }
    }
}

impl Drop for CacheHandle {
    fn drop(&mut self) {
        // Dropping the shutdown sender stops the writer after it drains.
        self.shutdown.take();
    }
}

async fn write_deltas<S: CacheStore>(
    store: Arc<S>,
    document: Weak<ReplicatedDocument>,
    id: String,
    mut deltas: broadcast::Receiver<DocumentDelta>,
    mut shutdown: oneshot::Receiver<()>,
) -> Result<(), CrdtError> {
    loop {
        tokio::select! {
            biased;
            delta = deltas.recv() => match delta {
                Ok(delta) => persist(&*store, &id, delta.origin, &delta.data).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(document = %id, skipped, "cache writer lagged, writing full update");
                    persist_everything(&*store, &document, &id).await;
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            },
            _ = &mut shutdown => break,
        }
    }

    // Flush what is already queued.
    loop {
        match deltas.try_recv() {
            Ok(delta) => persist(&*store, &id, delta.origin, &delta.data).await,
            Err(broadcast::error::TryRecvError::Lagged(_)) => {
                persist_everything(&*store, &document, &id).await;
            }
            Err(_) => break,
        }
    }

    let Some(document) = document.upgrade() else {
        return Ok(());
    };
    let _stopwatch = quire_common::perf::Stopwatch::start("cache compaction");
    let snapshot = document.encode_full_state()?;
    store.compact(&id, &snapshot).await
}

async fn persist<S: CacheStore>(store: &S, id: &str, origin: DeltaOrigin, data: &[u8]) {
    if origin == DeltaOrigin::Cache {
        return;
    }
    if let Err(error) = store.append_delta(id, data).await {
        tracing::error!(document = %id, %error, "failed to persist delta");
    }
}

async fn persist_everything<S: CacheStore>(store: &S, document: &Weak<ReplicatedDocument>, id: &str) {
    let Some(document) = document.upgrade() else {
        return;
    };
    match document.updates_since(&[]) {
        Ok(all) => persist(store, id, DeltaOrigin::Local, &all).await,
        Err(error) => tracing::error!(document = %id, %error, "failed to export updates for cache"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mirrors_local_and_remote_but_not_cache() {
        let store = Arc::new(MemoryCacheStore::new());
        let doc = Arc::new(ReplicatedDocument::new("doc"));
        let handle = attach(store.clone(), doc.clone()).await.unwrap();

        doc.replace_content("<p>local</p>").unwrap();
        let peer = ReplicatedDocument::new("doc");
        peer.apply(&doc.updates_since(&[]).unwrap(), DeltaOrigin::Remote).unwrap();
        peer.replace_content("<p>local remote</p>").unwrap();
        doc.apply(&peer.updates_since(&doc.state_vector()).unwrap(), DeltaOrigin::Remote)
            .unwrap();

        handle.detach().await.unwrap();
        let cached = store.load("doc").await.unwrap();
        assert!(cached.deltas.is_empty(), "detach compacts deltas");

        let restored = ReplicatedDocument::from_snapshot("doc", cached.snapshot.as_deref().unwrap()).unwrap();
        assert_eq!(restored.content(), "<p>local remote</p>");
    }

    #[tokio::test]
    async fn test_attach_replays_into_fresh_document() {
        let store = Arc::new(MemoryCacheStore::new());
        {
            let doc = Arc::new(ReplicatedDocument::new("offline"));
            let handle = attach(store.clone(), doc.clone()).await.unwrap();
            doc.replace_content("<p>draft</p>").unwrap();
            handle.detach().await.unwrap();
        }
        let doc = Arc::new(ReplicatedDocument::new("offline"));
        let handle = attach(store.clone(), doc.clone()).await.unwrap();
        assert_eq!(doc.content(), "<p>draft</p>");
        handle.detach().await.unwrap();
    }
}
