//! In-memory cache store for tests and hosts without persistent storage.

use std::collections::HashMap;
use std::sync::Mutex;

use super::{CacheStore, CachedState};
use crate::CrdtError;

#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    documents: Mutex<HashMap<String, CachedState>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut HashMap<String, CachedState>) -> R) -> R {
        let mut documents = self.documents.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut documents)
    }
}

impl CacheStore for MemoryCacheStore {
    async fn load(&self, id: &str) -> Result<CachedState, CrdtError> {
        Ok(self.with(|docs| docs.get(id).cloned().unwrap_or_default()))
    }

    async fn append_delta(&self, id: &str, data: &[u8]) -> Result<(), CrdtError> {
        self.with(|docs| docs.entry(id.to_owned()).or_default().deltas.push(data.to_vec()));
        Ok(())
    }

    async fn compact(&self, id: &str, snapshot: &[u8]) -> Result<(), CrdtError> {
        self.with(|docs| {
            docs.insert(
                id.to_owned(),
                CachedState {
                    snapshot: Some(snapshot.to_vec()),
                    deltas: Vec::new(),
                },
            )
        });
        Ok(())
    }
}
