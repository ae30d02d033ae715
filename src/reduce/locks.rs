use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// Per-key mutual exclusion: at most one reduction in flight per key.
///
/// Keys are namespaced by event stream, so kinds that fold the same stream
/// serialize against each other.
#[derive(Clone, Default)]
pub struct KeyLocks {
    locks: Arc<RwLock<HashMap<String, Arc<Mutex<()>>>>>,
}

pub type KeyGuard = OwnedMutexGuard<()>;

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lock_for(&self, stream: &str, key: &str) -> Arc<Mutex<()>> {
        let name = format!("{}/{}", stream, key);
        {
            let read = self.locks.read().await;
            if let Some(lock) = read.get(&name) {
                return lock.clone();
            }
        }

        let mut write = self.locks.write().await;
        write
            .entry(name)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait until the key is free, then hold it until the guard drops.
    pub async fn acquire(&self, stream: &str, key: &str) -> KeyGuard {
        self.lock_for(stream, key).await.lock_owned().await
    }

    /// Take the key only if nobody holds it.
    pub async fn try_acquire(&self, stream: &str, key: &str) -> Option<KeyGuard> {
        self.lock_for(stream, key).await.try_lock_owned().ok()
    }

    /// Drop entries nobody holds or waits on.
    pub async fn prune(&self) -> usize {
        let mut write = self.locks.write().await;
        let before = write.len();
        write.retain(|_, lock| Arc::strong_count(lock) > 1 || lock.try_lock().is_err());
        before - write.len()
    }
}
