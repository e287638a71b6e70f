//! Two-tier session cache: in-memory map, then an on-disk MessagePack file,
//! then the caller's loader. Ported from the original implementation's
//! `get_cached_telemetry` three-step contract
//! (`backend/app/cache/session_cache.py`), swapping `asyncio.Lock` /
//! `aiofiles` for `tokio::sync::Mutex` / `tokio::fs`.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use model::{SessionData, SessionKey};
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache (de)serialization error: {0}")]
    Codec(String),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub memory_entries: usize,
}

/// Keyed by [`SessionKey`]. Tier 1 is never auto-evicted (explicit
/// [`SessionCache::clear`] only); tier 2 is one file per session under
/// `cache_dir`.
pub struct SessionCache {
    cache_dir: PathBuf,
    memory: Mutex<HashMap<SessionKey, Arc<SessionData>>>,
    /// A single process-wide load lock, not one per key: the original only
    /// ever held one `asyncio.Lock` for the whole cache, so a miss on any
    /// key briefly serializes against misses on every other key too.
    load_lock: Mutex<()>,
}

impl SessionCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            memory: Mutex::new(HashMap::new()),
            load_lock: Mutex::new(()),
        }
    }

    fn disk_path(&self, key: &SessionKey) -> PathBuf {
        self.cache_dir.join(format!("{}_telemetry.msgpack", key.cache_stem()))
    }

    async fn read_disk(&self, key: &SessionKey) -> Option<SessionData> {
        let path = self.disk_path(key);
        let bytes = tokio::fs::read(&path).await.ok()?;
        match rmp_serde::from_slice(&bytes) {
            Ok(data) => Some(data),
            Err(err) => {
                tracing::warn!(?path, error = %err, "cache: disk entry failed to decode, ignoring");
                None
            }
        }
    }

    fn spawn_disk_write(&self, key: SessionKey, data: Arc<SessionData>) {
        let path = self.disk_path(&key);
        tokio::spawn(async move {
            let encoded = match rmp_serde::to_vec_named(data.as_ref()) {
                Ok(bytes) => bytes,
                Err(err) => {
                    tracing::warn!(error = %err, "cache: failed to encode session for disk write");
                    return;
                }
            };
            if let Some(parent) = path.parent() {
                if let Err(err) = tokio::fs::create_dir_all(parent).await {
                    tracing::warn!(?path, error = %err, "cache: failed to create cache directory");
                    return;
                }
            }
            if let Err(err) = tokio::fs::write(&path, encoded).await {
                tracing::warn!(?path, error = %err, "cache: disk write-through failed");
            }
        });
    }

    /// Memory hit -> return. Disk hit -> populate memory, return. Miss ->
    /// take the load lock, re-check both tiers (another task may have just
    /// filled them), then run `loader`, populate memory, and fire off an
    /// async disk write that never blocks or fails this call.
    pub async fn get_cached<F, Fut>(
        &self,
        key: SessionKey,
        refresh: bool,
        loader: F,
    ) -> Result<Arc<SessionData>, anyhow::Error>
    where
        F: FnOnce(SessionKey) -> Fut,
        Fut: Future<Output = Result<SessionData, anyhow::Error>>,
    {
        if !refresh {
            if let Some(hit) = self.memory.lock().await.get(&key).cloned() {
                tracing::debug!(?key, "cache: memory hit");
                return Ok(hit);
            }
            if let Some(data) = self.read_disk(&key).await {
                let data = Arc::new(data);
                self.memory.lock().await.insert(key, data.clone());
                tracing::debug!(?key, "cache: disk hit");
                return Ok(data);
            }
        }

        let _guard = self.load_lock.lock().await;

        if !refresh {
            if let Some(hit) = self.memory.lock().await.get(&key).cloned() {
                return Ok(hit);
            }
            if let Some(data) = self.read_disk(&key).await {
                let data = Arc::new(data);
                self.memory.lock().await.insert(key, data.clone());
                return Ok(data);
            }
        }

        tracing::info!(?key, "cache: miss, invoking loader");
        let data = Arc::new(loader(key).await?);
        self.memory.lock().await.insert(key, data.clone());
        self.spawn_disk_write(key, data.clone());
        Ok(data)
    }

    pub async fn clear(&self) {
        self.memory.lock().await.clear();
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            memory_entries: self.memory.lock().await.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::SessionType;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn empty_session_data() -> SessionData {
        SessionData {
            frames: vec![],
            total_laps: 0,
            track_geometry: vec![],
            driver_colors: Default::default(),
            driver_numbers: Default::default(),
            driver_teams: Default::default(),
            track_statuses: vec![],
            race_start_time: None,
            low_position_coverage: false,
        }
    }

    #[tokio::test]
    async fn memory_hit_skips_the_loader() {
        let dir = std::env::temp_dir().join(format!("replay-cache-test-{}", std::process::id()));
        let cache = SessionCache::new(&dir);
        let key = SessionKey::new(2024, 1, SessionType::R);
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            let _ = cache
                .get_cached(key, false, move |_| {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(empty_session_data())
                    }
                })
                .await
                .expect("get_cached should succeed");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn refresh_forces_the_loader_even_on_a_memory_hit() {
        let dir = std::env::temp_dir().join(format!("replay-cache-test-refresh-{}", std::process::id()));
        let cache = SessionCache::new(&dir);
        let key = SessionKey::new(2024, 2, SessionType::Q);
        let calls = Arc::new(AtomicUsize::new(0));

        {
            let calls = calls.clone();
            cache
                .get_cached(key, false, move |_| {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(empty_session_data())
                    }
                })
                .await
                .unwrap();
        }
        {
            let calls = calls.clone();
            cache
                .get_cached(key, true, move |_| {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(empty_session_data())
                    }
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn clear_forgets_memory_entries() {
        let dir = std::env::temp_dir().join(format!("replay-cache-test-clear-{}", std::process::id()));
        let cache = SessionCache::new(&dir);
        let key = SessionKey::new(2024, 3, SessionType::S);
        cache
            .get_cached(key, false, |_| async { Ok(empty_session_data()) })
            .await
            .unwrap();
        assert_eq!(cache.stats().await.memory_entries, 1);
        cache.clear().await;
        assert_eq!(cache.stats().await.memory_entries, 0);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
