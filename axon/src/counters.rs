// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use serde::Serialize;

use crate::engine::AxonOpts;
use crate::error::AxonError;

const FILE_COUNT: &[u8] = b"file:count";
const SIZE_BYTES: &[u8] = b"size:bytes";

/// Point-in-time view of the persistent counters plus the configured
/// limits, as reported by `Axon::metrics` and the health endpoint.
#[derive(Clone, Debug, Serialize, Eq, PartialEq)]
pub struct MetricsSnapshot {
    #[serde(rename = "file:count")]
    pub file_count: u64,
    #[serde(rename = "size:bytes")]
    pub size_bytes: u64,
    #[serde(rename = "max:bytes", skip_serializing_if = "Option::is_none")]
    pub max_bytes: Option<u64>,
    #[serde(rename = "max:count", skip_serializing_if = "Option::is_none")]
    pub max_count: Option<u64>,
}

/// The two persistent counters bound to the size-index: `file:count` is the
/// number of size-index entries and `size:bytes` the sum of their sizes.
/// Updates happen inside the per-digest save/delete critical sections, one
/// compare-and-swap per key. A missing counter at open (first boot, or a
/// crash wiped the tree) triggers a rebuild from the size-index.
pub struct Counters {
    tree: sled::Tree,
}

impl Counters {
    pub fn open(db: &sled::Db, sizes: &sled::Tree) -> Result<Self, AxonError> {
        let tree = db.open_tree("metrics")?;
        let counters = Counters { tree };

        if counters.tree.get(FILE_COUNT)?.is_none() || counters.tree.get(SIZE_BYTES)?.is_none() {
            counters.rebuild(sizes)?;
        }

        Ok(counters)
    }

    /// Recompute both counters by scanning the size-index.
    fn rebuild(&self, sizes: &sled::Tree) -> Result<(), AxonError> {
        let mut file_count = 0u64;
        let mut size_bytes = 0u64;
        for item in sizes.iter() {
            let (_, value) = item?;
            file_count += 1;
            size_bytes += decode_or_zero(Some(&value));
        }
        self.tree.insert(FILE_COUNT, &file_count.to_be_bytes()[..])?;
        self.tree.insert(SIZE_BYTES, &size_bytes.to_be_bytes()[..])?;
        log::info!("Rebuilt axon counters: file:count={file_count} size:bytes={size_bytes}");
        Ok(())
    }

    pub fn file_count(&self) -> Result<u64, AxonError> {
        Ok(decode_or_zero(self.tree.get(FILE_COUNT)?.as_deref()))
    }

    pub fn size_bytes(&self) -> Result<u64, AxonError> {
        Ok(decode_or_zero(self.tree.get(SIZE_BYTES)?.as_deref()))
    }

    pub fn add_blob(&self, size: u64) -> Result<(), AxonError> {
        self.bump(FILE_COUNT, 1)?;
        self.bump(SIZE_BYTES, size as i64)
    }

    pub fn del_blob(&self, size: u64) -> Result<(), AxonError> {
        self.bump(FILE_COUNT, -1)?;
        self.bump(SIZE_BYTES, -(size as i64))
    }

    fn bump(&self, key: &[u8], delta: i64) -> Result<(), AxonError> {
        self.tree.update_and_fetch(key, |old| {
            let current = decode_or_zero(old) as i64;
            let next = current.saturating_add(delta).max(0) as u64;
            Some(next.to_be_bytes().to_vec())
        })?;
        Ok(())
    }

    pub fn snapshot(&self, opts: &AxonOpts) -> Result<MetricsSnapshot, AxonError> {
        Ok(MetricsSnapshot {
            file_count: self.file_count()?,
            size_bytes: self.size_bytes()?,
            max_bytes: opts.max_bytes,
            max_count: opts.max_count,
        })
    }
}

fn decode_or_zero(raw: Option<&[u8]>) -> u64 {
    match raw {
        Some(raw) if raw.len() == 8 => {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(raw);
            u64::from_be_bytes(bytes)
        }
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::Counters;

    fn open_trees(dir: &std::path::Path) -> (sled::Db, sled::Tree) {
        let db = sled::open(dir).unwrap();
        let sizes = db.open_tree("sizes").unwrap();
        (db, sizes)
    }

    #[test]
    fn counters_start_at_zero() {
        let dir = tempfile::tempdir().unwrap();
        let (db, sizes) = open_trees(dir.path());
        let counters = Counters::open(&db, &sizes).unwrap();
        assert_eq!(counters.file_count().unwrap(), 0);
        assert_eq!(counters.size_bytes().unwrap(), 0);
    }

    #[test]
    fn add_and_del_track_totals() {
        let dir = tempfile::tempdir().unwrap();
        let (db, sizes) = open_trees(dir.path());
        let counters = Counters::open(&db, &sizes).unwrap();

        counters.add_blob(100).unwrap();
        counters.add_blob(50).unwrap();
        assert_eq!(counters.file_count().unwrap(), 2);
        assert_eq!(counters.size_bytes().unwrap(), 150);

        counters.del_blob(100).unwrap();
        assert_eq!(counters.file_count().unwrap(), 1);
        assert_eq!(counters.size_bytes().unwrap(), 50);
    }

    #[test]
    fn missing_counters_rebuild_from_size_index() {
        let dir = tempfile::tempdir().unwrap();
        let (db, sizes) = open_trees(dir.path());
        sizes.insert(&[1u8; 32], &7u64.to_be_bytes()[..]).unwrap();
        sizes.insert(&[2u8; 32], &9u64.to_be_bytes()[..]).unwrap();

        let counters = Counters::open(&db, &sizes).unwrap();
        assert_eq!(counters.file_count().unwrap(), 2);
        assert_eq!(counters.size_bytes().unwrap(), 16);
    }
}
