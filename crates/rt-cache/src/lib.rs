//! On-disk cache with atomic-replace semantics, and the fixed
//! attempts/backoff retry policy that wraps every network fetch (§4.8).
//!
//! Grounded on the teacher's `write_cache_file_atomic` (temp file, rename,
//! tolerate a racing winner) and its in-memory content-hash side table.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("fetch of {key} failed after {attempts} attempts: {source}")]
    ExhaustedRetries {
        key: String,
        attempts: u32,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Fixed attempts/backoff retry policy (§4.2, §4.8). `n` total attempts,
/// `backoff` between each.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(attempts: u32, backoff: Duration) -> Self {
        Self { attempts, backoff }
    }

    /// Runs `op` up to `self.attempts` times, sleeping `self.backoff` between
    /// attempts (not before the first or after the last). Every attempt logs.
    /// Backoff time is charged only here, never to the operation's own
    /// timeout (§8 property: wall time before terminal failure is ≥ n·b,
    /// charged to backoff only).
    pub async fn run<T, E, F, Fut>(&self, key: &str, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = core::result::Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let mut last_err: Option<E> = None;
        for attempt in 0..self.attempts.max(1) {
            info!(key, attempt, attempts = self.attempts, "fetch attempt");
            match op(attempt).await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    warn!(key, attempt, error = %e, "fetch attempt failed");
                    last_err = Some(e);
                    if attempt + 1 < self.attempts {
                        tokio::time::sleep(self.backoff).await;
                    }
                }
            }
        }
        Err(Error::ExhaustedRetries {
            key: key.to_string(),
            attempts: self.attempts,
            source: Box::new(last_err.expect("at least one attempt ran")),
        })
    }
}

fn hash_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        let _ = write!(&mut out, "{b:02x}");
    }
    out
}

/// Whether `fetch` should consult the cache before going to the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// Serve from cache on a hit; fetch and populate on a miss.
    PreferCache,
    /// Always fetch, then atomically replace the cache entry.
    ForceRefresh,
}

/// (key → file) mapping with atomic-replace semantics. Readers never
/// observe a half-written entry.
pub struct Cache {
    dir: PathBuf,
    present: DashMap<String, ()>,
    write_sequence: AtomicU64,
}

impl Cache {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            present: DashMap::new(),
            write_sequence: AtomicU64::new(0),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(hash_key(key))
    }

    /// Reads a cached entry's bytes, if present.
    pub async fn read(&self, key: &str) -> Option<Vec<u8>> {
        if !self.present.contains_key(key) {
            return None;
        }
        tokio::fs::read(self.path_for(key)).await.ok()
    }

    /// Fetches `key`, consulting the cache per `mode`, downloading via
    /// `download` on a miss (or when forced), and atomically replacing the
    /// cache entry on success.
    pub async fn fetch<E, F, Fut>(
        &self,
        key: &str,
        mode: UpdateMode,
        retry: RetryPolicy,
        download: F,
    ) -> Result<Vec<u8>>
    where
        F: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = core::result::Result<Vec<u8>, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        if mode == UpdateMode::PreferCache {
            if let Some(bytes) = self.read(key).await {
                return Ok(bytes);
            }
        }
        match retry.run(key, download).await {
            Ok(bytes) => {
                self.write_atomic(key, &bytes).await?;
                Ok(bytes)
            }
            Err(e) => {
                self.delete_key(key);
                Err(e)
            }
        }
    }

    async fn write_atomic(&self, key: &str, bytes: &[u8]) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let final_path = self.path_for(key);
        let sequence = self.write_sequence.fetch_add(1, Ordering::Relaxed);
        let tmp_path = final_path.with_extension(format!("tmp-{}-{sequence}", std::process::id()));
        tokio::fs::write(&tmp_path, bytes).await?;
        match tokio::fs::rename(&tmp_path, &final_path).await {
            Ok(()) => {
                self.present.insert(key.to_string(), ());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let _ = tokio::fs::remove_file(&tmp_path).await;
                self.present.insert(key.to_string(), ());
                Ok(())
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&tmp_path).await;
                Err(e.into())
            }
        }
    }

    /// Forgets the mapping immediately; the file itself is pruned later.
    pub fn delete_key(&self, key: &str) {
        self.present.remove(key);
    }

    #[must_use]
    pub fn cache_path(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fetch_populates_and_serves_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path());
        let calls = std::sync::atomic::AtomicU32::new(0);
        let bytes = cache
            .fetch(
                "k",
                UpdateMode::PreferCache,
                RetryPolicy::new(1, Duration::from_millis(1)),
                |_| {
                    calls.fetch_add(1, Ordering::Relaxed);
                    async { Ok::<_, std::io::Error>(b"hello".to_vec()) }
                },
            )
            .await
            .unwrap();
        assert_eq!(bytes, b"hello");

        let bytes2 = cache
            .fetch(
                "k",
                UpdateMode::PreferCache,
                RetryPolicy::new(1, Duration::from_millis(1)),
                |_| {
                    calls.fetch_add(1, Ordering::Relaxed);
                    async { Ok::<_, std::io::Error>(b"should not run".to_vec()) }
                },
            )
            .await
            .unwrap();
        assert_eq!(bytes2, b"hello");
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_evict_cache_key() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path());
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result = cache
            .fetch(
                "k",
                UpdateMode::ForceRefresh,
                RetryPolicy::new(3, Duration::from_millis(1)),
                |_| {
                    attempts.fetch_add(1, Ordering::Relaxed);
                    async {
                        Err::<Vec<u8>, _>(std::io::Error::other("boom"))
                    }
                },
            )
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::Relaxed), 3);
        assert!(cache.read("k").await.is_none());
    }

    #[tokio::test]
    async fn delete_key_forgets_mapping_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path());
        cache
            .fetch(
                "k",
                UpdateMode::PreferCache,
                RetryPolicy::new(1, Duration::from_millis(1)),
                |_| async { Ok::<_, std::io::Error>(b"x".to_vec()) },
            )
            .await
            .unwrap();
        cache.delete_key("k");
        assert!(cache.read("k").await.is_none());
    }
}
