use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tokio::sync::{Mutex, OwnedMutexGuard};

use storeshift_core::model::EntityKey;

const PRUNE_THRESHOLD: usize = 1024;

/// Per-entity-key async mutexes.
///
/// Holding a key's guard orders the primary write and the enqueue of its
/// shadow write against every other writer of the same key. Unused entries
/// are pruned once the map grows past a threshold.
#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<EntityKey, Weak<Mutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: EntityKey) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.lock().await;
            if locks.len() >= PRUNE_THRESHOLD {
                locks.retain(|_, lock| lock.strong_count() > 0);
            }
            match locks.get(&key).and_then(Weak::upgrade) {
                Some(mutex) => mutex,
                None => {
                    let mutex = Arc::new(Mutex::new(()));
                    locks.insert(key, Arc::downgrade(&mutex));
                    mutex
                }
            }
        };
        mutex.lock_owned().await
    }

    #[cfg(test)]
    async fn tracked(&self) -> usize {
        self.locks.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use storeshift_core::model::EntityType;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = Arc::new(KeyLocks::new());
        let key = EntityKey::new(EntityType::User, Uuid::new_v4());

        let guard = locks.lock(key).await;
        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.lock(key).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = KeyLocks::new();
        let _a = locks.lock(EntityKey::new(EntityType::User, Uuid::new_v4())).await;
        let _b = locks.lock(EntityKey::new(EntityType::User, Uuid::new_v4())).await;
        assert_eq!(locks.tracked().await, 2);
    }
}
