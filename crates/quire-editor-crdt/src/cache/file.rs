//! Directory-backed cache store.
//!
//! Layout per document:
//!
//! ```text
//! <root>/<document-id>/snapshot.bin
//! <root>/<document-id>/00000001.delta
//! <root>/<document-id>/00000002.delta
//! ```
//!
//! The directory name is the percent-encoded id, with dots encoded too, so
//! distinct ids never share a directory.
//!
//! Every file is written under a temporary name and renamed into place, so
//! a crash mid-write never leaves a truncated snapshot or delta behind.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use quire_common::CacheSettings;
use tokio::fs;
use tokio::sync::Mutex;

use super::{CacheStore, CachedState};
use crate::CrdtError;

const SNAPSHOT: &str = "snapshot.bin";
const DELTA_EXT: &str = "delta";
const TMP_EXT: &str = "tmp";

#[derive(Debug)]
pub struct FileCacheStore {
    root: PathBuf,
    /// Delta numbering is read-then-write; appends take turns.
    append_lock: Mutex<()>,
}

impl FileCacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            append_lock: Mutex::new(()),
        }
    }

    /// A store under the configured root, if caching is on and a root is set.
    pub fn from_settings(settings: &CacheSettings) -> Option<Self> {
        match (&settings.root, settings.enabled) {
            (Some(root), true) => Some(Self::new(root)),
            _ => None,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_dir(&self, id: &str) -> PathBuf {
        self.root.join(dir_name(id))
    }

    /// Delta files in the directory, sorted by sequence number.
    async fn deltas(dir: &Path) -> Result<Vec<(u64, PathBuf)>, CrdtError> {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut deltas = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(DELTA_EXT) {
                continue;
            }
            let seq = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok());
            if let Some(seq) = seq {
                deltas.push((seq, path));
            }
        }
        deltas.sort_by_key(|(seq, _)| *seq);
        Ok(deltas)
    }
}

fn dir_name(id: &str) -> String {
    if id.is_empty() {
        // Never produced by encoding a non-empty id.
        return "%".to_owned();
    }
    urlencoding::encode(id).replace('.', "%2E")
}

async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), CrdtError> {
    let tmp = path.with_extension(TMP_EXT);
    fs::write(&tmp, data).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, CrdtError> {
    match fs::read(path).await {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

impl CacheStore for FileCacheStore {
    async fn load(&self, id: &str) -> Result<CachedState, CrdtError> {
        let dir = self.document_dir(id);
        let snapshot = read_optional(&dir.join(SNAPSHOT)).await?;
        let mut deltas = Vec::new();
        for (_, path) in Self::deltas(&dir).await? {
            if let Some(data) = read_optional(&path).await? {
                deltas.push(data);
            }
        }
        Ok(CachedState { snapshot, deltas })
    }

    async fn append_delta(&self, id: &str, data: &[u8]) -> Result<(), CrdtError> {
        let _guard = self.append_lock.lock().await;
        let dir = self.document_dir(id);
        fs::create_dir_all(&dir).await?;
        let next = Self::deltas(&dir)
            .await?
            .last()
            .map(|(seq, _)| seq + 1)
            .unwrap_or(1);
        write_atomic(&dir.join(format!("{next:08}.{DELTA_EXT}")), data).await
    }

    async fn compact(&self, id: &str, snapshot: &[u8]) -> Result<(), CrdtError> {
        let _guard = self.append_lock.lock().await;
        let dir = self.document_dir(id);
        fs::create_dir_all(&dir).await?;
        let folded = Self::deltas(&dir).await?;
        write_atomic(&dir.join(SNAPSHOT), snapshot).await?;
        for (_, path) in folded {
            if let Err(error) = fs::remove_file(&path).await {
                tracing::warn!(path = %path.display(), %error, "failed to remove compacted delta");
            }
        }
        tracing::debug!(document = %id, bytes = snapshot.len(), "cache compacted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deltas_then_compaction() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::new(dir.path());

        assert!(store.load("doc/1").await.unwrap().is_empty());
        store.append_delta("doc/1", b"one").await.unwrap();
        store.append_delta("doc/1", b"two").await.unwrap();

        let loaded = store.load("doc/1").await.unwrap();
        assert_eq!(loaded.deltas, vec![b"one".to_vec(), b"two".to_vec()]);
        assert!(dir.path().join("doc%2F1").join("00000002.delta").exists());

        store.compact("doc/1", b"snap").await.unwrap();
        let loaded = store.load("doc/1").await.unwrap();
        assert_eq!(loaded.snapshot.as_deref(), Some(&b"snap"[..]));
        assert!(loaded.deltas.is_empty());

        // Numbering restarts after compaction without clobbering anything.
        store.append_delta("doc/1", b"three").await.unwrap();
        assert_eq!(store.load("doc/1").await.unwrap().deltas, vec![b"three".to_vec()]);
    }

    #[tokio::test]
    async fn test_similar_ids_do_not_share_a_cache() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::new(dir.path());
        store.append_delta("doc/1", b"secret").await.unwrap();

        for other in ["doc_1", "doc 1", "doc%2F1", "doc.1"] {
            assert!(store.load(other).await.unwrap().is_empty(), "{other}");
        }
        for id in ["..", ".", ""] {
            store.append_delta(id, b"x").await.unwrap();
        }
        assert_eq!(store.load("doc/1").await.unwrap().deltas, vec![b"secret".to_vec()]);
        assert_eq!(store.load("..").await.unwrap().deltas.len(), 1);
        assert!(!dir.path().join("00000001.delta").exists());
    }

    #[test]
    fn test_dir_names_stay_inside_root() {
        assert_eq!(dir_name("doc/1"), "doc%2F1");
        assert_eq!(dir_name("doc_1"), "doc_1");
        assert_eq!(dir_name(".."), "%2E%2E");
        assert_eq!(dir_name(""), "%");
    }

    #[tokio::test]
    async fn test_leftover_temp_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::new(dir.path());
        store.append_delta("d", b"ok").await.unwrap();
        std::fs::write(dir.path().join("d").join("00000002.tmp"), b"partial").unwrap();

        assert_eq!(store.load("d").await.unwrap().deltas, vec![b"ok".to_vec()]);
    }

    #[test]
    fn test_from_settings() {
        let mut settings = CacheSettings::default();
        assert!(FileCacheStore::from_settings(&settings).is_none());
        settings.root = Some("/tmp/quire".into());
        assert!(FileCacheStore::from_settings(&settings).is_some());
        settings.enabled = false;
        assert!(FileCacheStore::from_settings(&settings).is_none());
    }
}
