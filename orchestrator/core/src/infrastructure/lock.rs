// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Cross-process lock manager
//!
//! Mutual exclusion over a sentinel lock file (`.state.lock` per project).
//! The file is created with `create_new`, so exactly one process can hold it,
//! and carries the holder's owner token (`pid:uuid`). A lock older than the
//! stale threshold (2x the acquire timeout) is treated as abandoned by a
//! crashed holder and taken over.
//!
//! Takeover renames the stale file aside before deleting it, and only
//! deletes it if the parked file still carries the token that was judged
//! stale. A contender that lost the race to another takeover therefore never
//! removes the winner's fresh lock.
//!
//! Release is bound to a scope guard, so the lock is released on every exit
//! path of the critical section: success, error, panic or cancellation of
//! the surrounding future. The guard only removes a file that still carries
//! its own token.

use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use scopeguard::ScopeGuard;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::config::LockConfig;
use crate::domain::error::{CoordinationError, CoordinationResult};

/// The lock file a guard is responsible for, and the token it wrote there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockOwner {
    path: PathBuf,
    token: String,
}

impl LockOwner {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            token: format!("{}:{}", std::process::id(), Uuid::new_v4().simple()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Held lock. Dropping it removes the lock file if this holder still owns it.
pub type LockGuard = ScopeGuard<LockOwner, fn(LockOwner)>;

fn release_lock_file(owner: LockOwner) {
    let path = &owner.path;
    match std::fs::read_to_string(path) {
        Ok(holder) if holder == owner.token => match std::fs::remove_file(path) {
            Ok(()) => debug!(lock = %path.display(), "Released lock"),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(lock = %path.display(), "Lock file already gone on release");
            }
            Err(e) => warn!(lock = %path.display(), error = %e, "Failed to release lock"),
        },
        Ok(holder) => warn!(
            lock = %path.display(),
            holder = %holder,
            "Lock was taken over while held; leaving the new holder's lock"
        ),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!(lock = %path.display(), "Lock file already gone on release");
        }
        Err(e) => warn!(lock = %path.display(), error = %e, "Failed to read lock on release"),
    }
}

fn is_older_than(modified: SystemTime, threshold: Duration) -> bool {
    SystemTime::now()
        .duration_since(modified)
        .map(|age| age > threshold)
        .unwrap_or(false)
}

#[derive(Debug, Clone, Default)]
pub struct FileLock {
    config: LockConfig,
}

impl FileLock {
    pub fn new(config: LockConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Runs `f` while holding the lock at `lock_path`.
    ///
    /// Fails with [`CoordinationError::LockContention`] once the retry budget
    /// is spent; `f` is not run in that case.
    pub async fn with_lock<F, Fut, T>(&self, lock_path: &Path, f: F) -> CoordinationResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CoordinationResult<T>>,
    {
        let guard = self.acquire(lock_path).await?;
        let result = f().await;
        drop(guard);
        result
    }

    pub async fn acquire(&self, lock_path: &Path) -> CoordinationResult<LockGuard> {
        let mut attempt: u32 = 0;
        let mut took_over_stale = false;

        loop {
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(lock_path)
                .await
            {
                Ok(mut file) => {
                    let guard = scopeguard::guard(
                        LockOwner::new(lock_path),
                        release_lock_file as fn(LockOwner),
                    );
                    let written = async {
                        file.write_all(guard.token.as_bytes()).await?;
                        file.flush().await
                    }
                    .await;
                    if let Err(e) = written {
                        // The file may not hold our token yet; remove it directly.
                        ScopeGuard::into_inner(guard);
                        if let Err(remove_err) = tokio::fs::remove_file(lock_path).await {
                            warn!(lock = %lock_path.display(), error = %remove_err, "Failed to remove unwritten lock");
                        }
                        return Err(CoordinationError::io(lock_path, e));
                    }
                    debug!(lock = %lock_path.display(), attempt, "Acquired lock");
                    return Ok(guard);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if !took_over_stale {
                        if let Some(stale_token) = self.stale_holder(lock_path).await {
                            took_over_stale = true;
                            if self.take_over_stale(lock_path, &stale_token).await? {
                                warn!(
                                    lock = %lock_path.display(),
                                    stale_after_ms = self.config.stale_threshold().as_millis() as u64,
                                    "Took over stale lock"
                                );
                                metrics::counter!("council_lock_stale_takeovers_total").increment(1);
                            }
                            continue;
                        }
                    }

                    if attempt >= self.config.retries {
                        metrics::counter!("council_lock_contention_total").increment(1);
                        return Err(CoordinationError::LockContention {
                            path: lock_path.to_path_buf(),
                            retries: self.config.retries,
                        });
                    }

                    let delay = self.backoff(attempt);
                    debug!(
                        lock = %lock_path.display(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Lock busy, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    // Project directory does not exist yet.
                    let parent = lock_path.parent().unwrap_or_else(|| Path::new("."));
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| CoordinationError::io(parent, e))?;
                }
                Err(e) => return Err(CoordinationError::io(lock_path, e)),
            }
        }
    }

    /// Exponential backoff starting at `min_backoff`, capped at `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.config
            .min_backoff
            .saturating_mul(factor)
            .min(self.config.max_backoff)
    }

    /// Token of the current holder if its lock is past the stale threshold.
    async fn stale_holder(&self, lock_path: &Path) -> Option<String> {
        let modified = tokio::fs::metadata(lock_path)
            .await
            .and_then(|m| m.modified())
            .ok()?;
        if !is_older_than(modified, self.config.stale_threshold()) {
            return None;
        }
        tokio::fs::read_to_string(lock_path).await.ok()
    }

    /// Removes the lock at `lock_path` only if it is still the stale lock
    /// held by `stale_token`. Returns whether it was removed.
    ///
    /// The file is first renamed to a name unique to this attempt, so two
    /// contenders can never both act on the same file. If the parked file
    /// turns out to be a fresh lock, it is linked back into place.
    async fn take_over_stale(&self, lock_path: &Path, stale_token: &str) -> CoordinationResult<bool> {
        let file_name = lock_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "lock".to_string());
        let parked = lock_path.with_file_name(format!(
            "{}.{}.stale",
            file_name,
            Uuid::new_v4().simple()
        ));

        match tokio::fs::rename(lock_path, &parked).await {
            Ok(()) => {}
            // Another contender already moved it.
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(CoordinationError::io(lock_path, e)),
        }

        let parked_token = tokio::fs::read_to_string(&parked).await.unwrap_or_default();
        let still_stale = tokio::fs::metadata(&parked)
            .await
            .and_then(|m| m.modified())
            .map(|modified| is_older_than(modified, self.config.stale_threshold()))
            .unwrap_or(false);

        if parked_token == stale_token && still_stale {
            if let Err(e) = tokio::fs::remove_file(&parked).await {
                warn!(lock = %parked.display(), error = %e, "Failed to remove parked stale lock");
            }
            return Ok(true);
        }

        // A fresh lock replaced the stale one after it was inspected.
        if let Err(e) = tokio::fs::hard_link(&parked, lock_path).await {
            warn!(
                lock = %lock_path.display(),
                error = %e,
                "Could not restore a lock displaced during stale takeover"
            );
        }
        if let Err(e) = tokio::fs::remove_file(&parked).await {
            warn!(lock = %parked.display(), error = %e, "Failed to remove parked lock");
        }
        Ok(false)
    }
}

/// Whether some process currently holds the lock.
pub fn is_locked(lock_path: &Path) -> bool {
    lock_path.exists()
}

/// Removes the lock file regardless of holder. Returns whether one existed.
pub async fn force_unlock(lock_path: &Path) -> CoordinationResult<bool> {
    match tokio::fs::remove_file(lock_path).await {
        Ok(()) => {
            warn!(lock = %lock_path.display(), "Forcibly removed lock");
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(CoordinationError::io(lock_path, e)),
    }
}
