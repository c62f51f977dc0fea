// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::HashMap;
use std::sync::Arc;

use digest::Digest;
use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;

struct Entry {
    /// Holders plus waiters. The entry is removed when this reaches zero.
    holders: usize,
    lock: Arc<tokio::sync::Mutex<()>>,
}

/// A process-wide map of per-digest mutexes used to serialize save and
/// delete of the same blob without a store-wide bottleneck. Entries are
/// refcounted: the map only holds digests somebody is actively waiting on
/// or holding, so a churning workload cannot grow it without bound.
#[derive(Clone)]
pub struct HashLockRegistry {
    inner: Arc<Mutex<HashMap<Digest, Entry>>>,
}

impl HashLockRegistry {
    pub fn new() -> Self {
        HashLockRegistry {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Acquire the lock for `digest`, waiting for any current holder. The
    /// returned guard excludes other holders of the same digest until it is
    /// dropped.
    pub async fn hold(&self, digest: Digest) -> HashLockGuard {
        let lock = {
            let mut map = self.inner.lock();
            let entry = map.entry(digest).or_insert_with(|| Entry {
                holders: 0,
                lock: Arc::new(tokio::sync::Mutex::new(())),
            });
            entry.holders += 1;
            entry.lock.clone()
        };

        // The registry mutex is not held while waiting; only the per-digest
        // mutex is contended here.
        let permit = lock.lock_owned().await;

        HashLockGuard {
            digest,
            registry: self.inner.clone(),
            _permit: permit,
        }
    }

    /// Number of digests currently tracked.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

/// Scoped exclusion for one digest. Dropping the guard releases the lock on
/// every exit path.
pub struct HashLockGuard {
    digest: Digest,
    registry: Arc<Mutex<HashMap<Digest, Entry>>>,
    _permit: OwnedMutexGuard<()>,
}

impl Drop for HashLockGuard {
    fn drop(&mut self) {
        let mut map = self.registry.lock();
        if let Some(entry) = map.get_mut(&self.digest) {
            entry.holders -= 1;
            if entry.holders == 0 {
                map.remove(&self.digest);
            }
        }
    }
}
