// src/store.rs
//! Document store seam plus two implementations.
//!
//! Records are stored with their `id` filled in; the caller's copy is not
//! touched, ids come back positionally.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use uuid::Uuid;

use crate::error::PersistenceError;
use crate::model::CanonicalEvent;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert all records; ids are returned in input order.
    async fn insert_many(&self, records: &[CanonicalEvent]) -> Result<Vec<String>, PersistenceError>;
    async fn find_one(&self, id: &str) -> Result<Option<CanonicalEvent>, PersistenceError>;
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// In-process store (default when no directory is configured).
#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: RwLock<HashMap<String, CanonicalEvent>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        match self.docs.read() {
            Ok(g) => g.len(),
            Err(poison) => poison.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert_many(&self, records: &[CanonicalEvent]) -> Result<Vec<String>, PersistenceError> {
        let mut guard = self
            .docs
            .write()
            .map_err(|_| PersistenceError("memory store lock poisoned".into()))?;
        let mut ids = Vec::with_capacity(records.len());
        for rec in records {
            let id = new_id();
            let mut doc = rec.clone();
            doc.id = Some(id.clone());
            guard.insert(id.clone(), doc);
            ids.push(id);
        }
        Ok(ids)
    }

    async fn find_one(&self, id: &str) -> Result<Option<CanonicalEvent>, PersistenceError> {
        let guard = self
            .docs
            .read()
            .map_err(|_| PersistenceError("memory store lock poisoned".into()))?;
        Ok(guard.get(id).cloned())
    }
}

/// One pretty-printed JSON file per record: `<dir>/<id>.json`.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Creates the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| PersistenceError(format!("create {}: {e}", dir.display())))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

async fn write_atomic(path: &Path, body: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, path).await
}

#[async_trait]
impl DocumentStore for JsonFileStore {
    async fn insert_many(&self, records: &[CanonicalEvent]) -> Result<Vec<String>, PersistenceError> {
        let mut ids = Vec::with_capacity(records.len());
        for rec in records {
            let id = new_id();
            let mut doc = rec.clone();
            doc.id = Some(id.clone());
            let body = serde_json::to_vec_pretty(&doc).map_err(|e| PersistenceError(e.to_string()))?;
            let path = self.path_for(&id);
            write_atomic(&path, &body)
                .await
                .map_err(|e| PersistenceError(format!("write {}: {e}", path.display())))?;
            ids.push(id);
        }
        Ok(ids)
    }

    async fn find_one(&self, id: &str) -> Result<Option<CanonicalEvent>, PersistenceError> {
        // ids are uuids; anything else cannot name a file of ours
        if Uuid::parse_str(id).is_err() {
            return Ok(None);
        }
        let path = self.path_for(id);
        let body = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PersistenceError(format!("read {}: {e}", path.display()))),
        };
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|e| PersistenceError(format!("decode {}: {e}", path.display())))
    }
}

// --- Test helper ---

/// Store whose writes always fail; reads find nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingStore;

#[async_trait]
impl DocumentStore for FailingStore {
    async fn insert_many(&self, _records: &[CanonicalEvent]) -> Result<Vec<String>, PersistenceError> {
        Err(PersistenceError("store unavailable".into()))
    }

    async fn find_one(&self, _id: &str) -> Result<Option<CanonicalEvent>, PersistenceError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Origin;
    use chrono::Utc;

    fn ev(title: &str) -> CanonicalEvent {
        CanonicalEvent {
            id: None,
            title: title.into(),
            location: "Pune".into(),
            tags: vec!["music".into()],
            source_url: "https://x.test/e".into(),
            month: "May".into(),
            content: "One. Two.".into(),
            fetched_at: Utc::now(),
            origin: Origin::Scraped,
        }
    }

    #[tokio::test]
    async fn memory_store_assigns_ids_in_order() {
        let store = MemoryStore::new();
        let ids = store.insert_many(&[ev("a"), ev("b")]).await.unwrap();
        assert_eq!(ids.len(), 2);
        let b = store.find_one(&ids[1]).await.unwrap().unwrap();
        assert_eq!(b.title, "b");
        assert_eq!(b.id.as_deref(), Some(ids[1].as_str()));
        assert!(store.find_one("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn json_store_round_trips_and_leaves_no_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("events")).unwrap();
        let ids = store.insert_many(&[ev("a")]).await.unwrap();
        let got = store.find_one(&ids[0]).await.unwrap().unwrap();
        assert_eq!(got.title, "a");
        assert!(store.find_one("../../etc/passwd").await.unwrap().is_none());

        let names: Vec<String> = std::fs::read_dir(store.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![format!("{}.json", ids[0])]);
    }
}
