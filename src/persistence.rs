//! Snapshot storage abstraction
//!
//! The engine only sees [`SnapshotStore`]; documents are opaque JSON values
//! so that schema decoding stays in [`crate::snapshot`].

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::PersistenceError;

/// Per-user snapshot storage.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Load a user's document, `None` when nothing has been saved yet.
    async fn load(&self, user_id: &str) -> Result<Option<Value>, PersistenceError>;

    /// Replace a user's document.
    async fn save(&self, user_id: &str, snapshot: &Value) -> Result<(), PersistenceError>;
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshotStore {
    documents: Arc<RwLock<HashMap<String, Value>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user_id: impl Into<String>, snapshot: Value) {
        self.documents.write().insert(user_id.into(), snapshot);
    }

    pub fn get(&self, user_id: &str) -> Option<Value> {
        self.documents.read().get(user_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load(&self, user_id: &str) -> Result<Option<Value>, PersistenceError> {
        Ok(self.get(user_id))
    }

    async fn save(&self, user_id: &str, snapshot: &Value) -> Result<(), PersistenceError> {
        self.insert(user_id, snapshot.clone());
        Ok(())
    }
}

/// One JSON file per user under a directory.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    root: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File path for a user.
    ///
    /// Lowercase ASCII letters, digits and `-` are kept; every other byte
    /// becomes `_` plus two lowercase hex digits. Distinct ids never share a
    /// file, even on case-insensitive file systems.
    pub fn path_for(&self, user_id: &str) -> PathBuf {
        self.root.join(format!("{}.json", encode_file_stem(user_id)))
    }
}

fn encode_file_stem(user_id: &str) -> String {
    let mut stem = String::with_capacity(user_id.len());
    for byte in user_id.bytes() {
        if byte.is_ascii_lowercase() || byte.is_ascii_digit() || byte == b'-' {
            stem.push(byte as char);
        } else {
            stem.push_str(&format!("_{byte:02x}"));
        }
    }
    stem
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn load(&self, user_id: &str) -> Result<Option<Value>, PersistenceError> {
        let path = self.path_for(user_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    async fn save(&self, user_id: &str, snapshot: &Value) -> Result<(), PersistenceError> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.path_for(user_id);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}
