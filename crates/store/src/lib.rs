//! Session Store: load-once-share-many registry plus progress fan-out.
//! Grounded on the teacher's `AppSession`/`Inner` pattern, generalized from
//! one in-memory lap map to a keyed registry of async-loaded sessions.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use model::{Session, SessionKey};
use parking_lot::Mutex as SyncMutex;
use tokio::sync::RwLock;

/// Cadence at which a session's progress fan-out task samples
/// `Session::progress`/`loading_status` and pushes them to subscribers
/// (spec.md §5 "inter-progress-update sleeps in the loader ~0.5s").
const PROGRESS_FANOUT_PERIOD: std::time::Duration = std::time::Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Loading,
    Loaded,
    Failed,
}

pub type ProgressCallback = Box<dyn Fn(LoadState, u8, String) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackId(u64);

/// A session plus its progress-callback list. The callback list lives
/// behind a `parking_lot::Mutex`: register/unregister is O(1), and a
/// notify pass snapshots the list under the lock then releases it before
/// invoking anything, so a slow or reentrant callback can't block
/// registration. Callbacks are stored behind `Arc` so the snapshot can be
/// an owned `Vec<Arc<ProgressCallback>>` rather than a borrow of the guard
/// — the lock is dropped before any callback runs.
pub struct SessionEntry {
    pub session: Arc<Session>,
    callbacks: SyncMutex<Vec<(u64, Arc<ProgressCallback>)>>,
    next_callback_id: AtomicU64,
}

impl SessionEntry {
    fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            callbacks: SyncMutex::new(Vec::new()),
            next_callback_id: AtomicU64::new(0),
        }
    }

    pub fn register_progress_callback(&self, callback: ProgressCallback) -> CallbackId {
        let id = self.next_callback_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks.lock().push((id, Arc::new(callback)));
        CallbackId(id)
    }

    pub fn unregister_progress_callback(&self, id: CallbackId) {
        self.callbacks.lock().retain(|(cb_id, _)| *cb_id != id.0);
    }

    /// Best-effort fan-out: a callback that panics is caught and logged,
    /// never allowed to poison the list or abort the loader.
    pub fn notify(&self, state: LoadState, progress: u8, message: String) {
        // clone the Arcs (not the closures) under the lock, then drop the
        // guard before calling out — a callback that re-enters register/
        // unregister, or simply runs long, never holds up the list.
        let to_invoke: Vec<Arc<ProgressCallback>> = self
            .callbacks
            .lock()
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for callback in &to_invoke {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback(state, progress, message.clone());
            }));
            if result.is_err() {
                tracing::warn!("store: progress callback panicked, dropping it for this notification");
            }
        }
    }
}

/// Registry of in-flight and completed sessions, keyed by [`SessionKey`].
/// No I/O is ever performed while the map lock is held: the loader future
/// is only spawned after the write lock is released.
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionKey, Arc<SessionEntry>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the existing entry for `key` if present; otherwise creates
    /// one, registers it, and spawns `loader` against the fresh `Session`.
    /// Concurrent callers racing on the same unseen key all observe the
    /// same `SessionEntry` and exactly one loader task runs.
    pub async fn get_or_create<F, Fut>(&self, key: SessionKey, loader: F) -> Arc<SessionEntry>
    where
        F: FnOnce(Arc<Session>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if let Some(entry) = self.sessions.read().await.get(&key).cloned() {
            return entry;
        }

        let mut sessions = self.sessions.write().await;
        if let Some(entry) = sessions.get(&key).cloned() {
            return entry;
        }

        let session = Arc::new(Session::new(key));
        let entry = Arc::new(SessionEntry::new(session.clone()));
        sessions.insert(key, entry.clone());
        drop(sessions);

        tracing::info!(year = key.year, round = key.round, "store: spawning loader for new session");
        tokio::spawn(loader(session));
        tokio::spawn(Self::fan_out_progress(entry.clone()));

        entry
    }

    /// Bridges the loader's plain atomic progress writes into pushed
    /// callback notifications, so a loader only has to call
    /// `Session::set_progress`/`publish`/`fail` and never needs a handle to
    /// the callback list itself (spec.md §4.4 progress fan-out).
    async fn fan_out_progress(entry: Arc<SessionEntry>) {
        loop {
            let session = &entry.session;
            if session.is_loaded() {
                let state = if session.load_error().is_some() {
                    LoadState::Failed
                } else {
                    LoadState::Loaded
                };
                entry.notify(state, session.progress(), session.loading_status());
                return;
            }
            entry.notify(LoadState::Loading, session.progress(), session.loading_status());
            tokio::time::sleep(PROGRESS_FANOUT_PERIOD).await;
        }
    }

    pub async fn lookup(&self, key: &SessionKey) -> Option<Arc<SessionEntry>> {
        self.sessions.read().await.get(key).cloned()
    }

    pub async fn evict(&self, key: &SessionKey) -> Option<Arc<SessionEntry>> {
        self.sessions.write().await.remove(key)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::SessionType;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn concurrent_get_or_create_shares_one_session_identity() {
        let store = Arc::new(SessionStore::new());
        let key = SessionKey::new(2024, 1, SessionType::R);
        let loader_runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..100 {
            let store = store.clone();
            let loader_runs = loader_runs.clone();
            handles.push(tokio::spawn(async move {
                let loader_runs = loader_runs.clone();
                let entry = store
                    .get_or_create(key, move |session| async move {
                        loader_runs.fetch_add(1, Ordering::SeqCst);
                        session.set_progress(100, "done");
                    })
                    .await;
                Arc::as_ptr(&entry) as usize
            }));
        }

        let mut pointers = Vec::with_capacity(100);
        for handle in handles {
            pointers.push(handle.await.unwrap());
        }

        assert!(pointers.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(store.len().await, 1);
    }

    #[test]
    fn progress_callbacks_register_and_unregister() {
        let entry = SessionEntry::new(Arc::new(Session::new(SessionKey::new(2024, 1, model::SessionType::R))));
        let calls = Arc::new(SyncMutex::new(Vec::new()));
        let calls_clone = calls.clone();
        let id = entry.register_progress_callback(Box::new(move |state, progress, message| {
            calls_clone.lock().push((state, progress, message));
        }));
        entry.notify(LoadState::Loading, 50, "halfway".to_string());
        assert_eq!(calls.lock().len(), 1);

        entry.unregister_progress_callback(id);
        entry.notify(LoadState::Loaded, 100, "done".to_string());
        assert_eq!(calls.lock().len(), 1);
    }

    #[test]
    fn a_panicking_callback_does_not_block_the_others() {
        let entry = SessionEntry::new(Arc::new(Session::new(SessionKey::new(2024, 1, model::SessionType::R))));
        entry.register_progress_callback(Box::new(|_, _, _| panic!("boom")));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        entry.register_progress_callback(Box::new(move |_, _, _| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        }));
        entry.notify(LoadState::Loading, 10, "start".to_string());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fan_out_delivers_a_terminal_notification_once_loaded() {
        let session = Arc::new(Session::new(SessionKey::new(2024, 1, SessionType::R)));
        let entry = Arc::new(SessionEntry::new(session.clone()));
        let seen_states = Arc::new(SyncMutex::new(Vec::new()));
        let seen_states_clone = seen_states.clone();
        entry.register_progress_callback(Box::new(move |state, progress, _message| {
            seen_states_clone.lock().push((state, progress));
        }));

        session.fail("synthetic failure for the test");
        SessionStore::fan_out_progress(entry.clone()).await;

        let states = seen_states.lock();
        assert_eq!(states.last(), Some(&(LoadState::Failed, 0)));
    }
}
