//! Session stores: where the sealed context and identity records live.
//!
//! The store moves sealed blobs only; it never holds a key and never
//! interprets properties. Ordering between operations on the same record id
//! is serializable; distinct ids may proceed concurrently.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use palisade_envelope::SecureRecord;
use uuid::Uuid;

use crate::error::SessionError;

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Persistence backend for the engine.
///
/// Implement this for your infrastructure:
/// - MemoryStore (testing)
/// - FileStore (development)
/// - Your database (production)
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn fetch_local_session_context(&self) -> Result<Option<Vec<u8>>, SessionError>;
    async fn update_local_session_context(&self, sealed: Vec<u8>) -> Result<(), SessionError>;

    /// Create a new identity record. Duplicate ids are an error.
    async fn create_session_identity(&self, record: SecureRecord) -> Result<(), SessionError>;
    async fn fetch_all_session_identities(&self) -> Result<Vec<SecureRecord>, SessionError>;
    async fn update_session_identity(&self, record: SecureRecord) -> Result<(), SessionError>;
    async fn delete_session_identity(&self, id: Uuid) -> Result<(), SessionError>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// In-memory storage (for testing and ephemeral use).
#[derive(Default)]
pub struct MemoryStore {
    context: RwLock<Option<Vec<u8>>>,
    identities: RwLock<HashMap<Uuid, SecureRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn fetch_local_session_context(&self) -> Result<Option<Vec<u8>>, SessionError> {
        Ok(self.context.read().unwrap().clone())
    }

    async fn update_local_session_context(&self, sealed: Vec<u8>) -> Result<(), SessionError> {
        *self.context.write().unwrap() = Some(sealed);
        Ok(())
    }

    async fn create_session_identity(&self, record: SecureRecord) -> Result<(), SessionError> {
        let mut identities = self.identities.write().unwrap();
        if identities.contains_key(&record.id()) {
            return Err(SessionError::DatabaseError(format!(
                "duplicate identity: {}",
                record.id()
            )));
        }
        identities.insert(record.id(), record);
        Ok(())
    }

    async fn fetch_all_session_identities(&self) -> Result<Vec<SecureRecord>, SessionError> {
        Ok(self.identities.read().unwrap().values().cloned().collect())
    }

    async fn update_session_identity(&self, record: SecureRecord) -> Result<(), SessionError> {
        let mut identities = self.identities.write().unwrap();
        if !identities.contains_key(&record.id()) {
            return Err(SessionError::DatabaseError(format!(
                "unknown identity: {}",
                record.id()
            )));
        }
        identities.insert(record.id(), record);
        Ok(())
    }

    async fn delete_session_identity(&self, id: Uuid) -> Result<(), SessionError> {
        self.identities.write().unwrap().remove(&id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// File store
// ---------------------------------------------------------------------------

/// File-based storage (one blob per record).
///
/// Directory layout:
/// ```text
/// <dir>/
///   context.bin
///   identities/
///     {record_id}.bin
/// ```
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, SessionError> {
        let dir = dir.into();
        std::fs::create_dir_all(dir.join("identities"))
            .map_err(|e| SessionError::DatabaseError(format!("create dir: {}", e)))?;
        Ok(Self { dir })
    }

    fn context_path(&self) -> PathBuf {
        self.dir.join("context.bin")
    }

    fn identity_path(&self, id: Uuid) -> PathBuf {
        self.dir
            .join("identities")
            .join(format!("{}.bin", hex::encode(id.as_bytes())))
    }

    // Atomic write: write to temp, then rename.
    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), SessionError> {
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| SessionError::DatabaseError(format!("write: {}", e)))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| SessionError::DatabaseError(format!("rename: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for FileStore {
    async fn fetch_local_session_context(&self) -> Result<Option<Vec<u8>>, SessionError> {
        match tokio::fs::read(self.context_path()).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SessionError::DatabaseError(format!("read: {}", e))),
        }
    }

    async fn update_local_session_context(&self, sealed: Vec<u8>) -> Result<(), SessionError> {
        self.write_atomic(&self.context_path(), &sealed).await
    }

    async fn create_session_identity(&self, record: SecureRecord) -> Result<(), SessionError> {
        let path = self.identity_path(record.id());
        if tokio::fs::try_exists(&path)
            .await
            .map_err(|e| SessionError::DatabaseError(format!("stat: {}", e)))?
        {
            return Err(SessionError::DatabaseError(format!(
                "duplicate identity: {}",
                record.id()
            )));
        }
        self.write_atomic(&path, record.sealed_bytes()).await
    }

    async fn fetch_all_session_identities(&self) -> Result<Vec<SecureRecord>, SessionError> {
        let mut out = Vec::new();
        let mut entries = tokio::fs::read_dir(self.dir.join("identities"))
            .await
            .map_err(|e| SessionError::DatabaseError(format!("readdir: {}", e)))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SessionError::DatabaseError(format!("entry: {}", e)))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("bin") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Ok(raw) = hex::decode(stem) else {
                continue;
            };
            let Ok(id_bytes) = <[u8; 16]>::try_from(raw.as_slice()) else {
                continue;
            };
            let sealed = tokio::fs::read(&path)
                .await
                .map_err(|e| SessionError::DatabaseError(format!("read: {}", e)))?;
            out.push(SecureRecord::from_parts(Uuid::from_bytes(id_bytes), sealed));
        }
        Ok(out)
    }

    async fn update_session_identity(&self, record: SecureRecord) -> Result<(), SessionError> {
        let path = self.identity_path(record.id());
        if !tokio::fs::try_exists(&path)
            .await
            .map_err(|e| SessionError::DatabaseError(format!("stat: {}", e)))?
        {
            return Err(SessionError::DatabaseError(format!(
                "unknown identity: {}",
                record.id()
            )));
        }
        self.write_atomic(&path, record.sealed_bytes()).await
    }

    async fn delete_session_identity(&self, id: Uuid) -> Result<(), SessionError> {
        let path = self.identity_path(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SessionError::DatabaseError(format!("delete: {}", e))),
        }
    }
}
