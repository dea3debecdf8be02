// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Whole-document JSON persistence
//!
//! Shared state files are always read in full, mutated in memory and written
//! back in full. Writes go to a sibling temp file that is then renamed over
//! the target, so readers observe either the old or the new document, never
//! a torn one.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::domain::error::{CoordinationError, CoordinationResult};
use crate::infrastructure::lock::FileLock;

/// Loads `path`, or `T::default()` if it does not exist yet.
///
/// A file that exists but does not parse is an error: silently replacing it
/// with an empty document would drop every agent's state on the next write.
pub async fn load_document<T>(path: &Path) -> CoordinationResult<T>
where
    T: DeserializeOwned + Default,
{
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(T::default()),
        Err(e) => return Err(CoordinationError::io(path, e)),
    };

    if content.trim().is_empty() {
        return Ok(T::default());
    }

    serde_json::from_str(&content).map_err(|e| {
        CoordinationError::Serialization(format!("{}: {}", path.display(), e))
    })
}

/// Atomically replaces `path` with the pretty-printed document.
pub async fn save_document<T>(path: &Path, document: &T) -> CoordinationResult<()>
where
    T: Serialize,
{
    let json = serde_json::to_vec_pretty(document)?;
    let tmp = temp_path(path);

    let write = async {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&json).await?;
        file.write_all(b"\n").await?;
        file.sync_all().await?;
        tokio::fs::rename(&tmp, path).await
    };

    if let Err(e) = write.await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(CoordinationError::io(path, e));
    }

    debug!(path = %path.display(), bytes = json.len(), "Saved document");
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    path.with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4().simple()))
}

/// Read-modify-write of JSON documents under a lock file.
#[derive(Debug, Clone, Default)]
pub struct DocumentStore {
    lock: FileLock,
}

impl DocumentStore {
    pub fn new(lock: FileLock) -> Self {
        Self { lock }
    }

    pub fn lock(&self) -> &FileLock {
        &self.lock
    }

    /// Lock-free read; may observe slightly stale state.
    pub async fn read<T>(&self, path: &Path) -> CoordinationResult<T>
    where
        T: DeserializeOwned + Default,
    {
        load_document(path).await
    }

    /// Loads the document under `lock_path`, applies `mutate`, and writes it
    /// back if it changed. Nothing is written when `mutate` fails.
    pub async fn update<T, R, F>(&self, lock_path: &Path, path: &Path, mutate: F) -> CoordinationResult<R>
    where
        T: DeserializeOwned + Serialize + Default + PartialEq + Clone,
        F: FnOnce(&mut T) -> CoordinationResult<R>,
    {
        self.lock
            .with_lock(lock_path, || async move {
                let mut document: T = load_document(path).await?;
                let before = document.clone();
                let output = mutate(&mut document)?;
                if document != before {
                    save_document(path, &document).await?;
                }
                Ok(output)
            })
            .await
    }
}
