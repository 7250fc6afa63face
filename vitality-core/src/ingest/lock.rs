//! Per-key async mutexes.
//!
//! Holders of the same key run one at a time; different keys never wait on
//! each other. Entries are dropped from the map once nobody holds or waits
//! on them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

struct Entry {
    mutex: Arc<AsyncMutex<()>>,
    /// Live registrations: the holder plus every waiter.
    users: usize,
}

type LockMap = HashMap<String, Entry>;

#[derive(Clone, Default)]
pub struct KeyedLocks {
    inner: Arc<Mutex<LockMap>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other guard for `key` is alive.
    ///
    /// Dropping the returned future before it completes gives up the wait
    /// and forgets the key if nobody else uses it.
    pub async fn lock(&self, key: &str) -> KeyedGuard {
        let (registration, mutex) = Registration::new(&self.inner, key);
        let guard = mutex.lock_owned().await;
        KeyedGuard {
            _guard: guard,
            _registration: registration,
        }
    }

    /// Number of keys currently held or awaited.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Counts one user of a key for as long as it lives.
struct Registration {
    key: String,
    locks: Arc<Mutex<LockMap>>,
}

impl Registration {
    fn new(locks: &Arc<Mutex<LockMap>>, key: &str) -> (Self, Arc<AsyncMutex<()>>) {
        let mut map = locks.lock().unwrap_or_else(|e| e.into_inner());
        let entry = map.entry(key.to_string()).or_insert_with(|| Entry {
            mutex: Arc::new(AsyncMutex::new(())),
            users: 0,
        });
        entry.users += 1;
        let mutex = Arc::clone(&entry.mutex);
        let registration = Self {
            key: key.to_string(),
            locks: Arc::clone(locks),
        };
        (registration, mutex)
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = map.get_mut(&self.key) {
            entry.users = entry.users.saturating_sub(1);
            if entry.users == 0 {
                map.remove(&self.key);
            }
        }
    }
}

pub struct KeyedGuard {
    // fields drop in order: the mutex is released before the key is deregistered
    _guard: OwnedMutexGuard<()>,
    _registration: Registration,
}
