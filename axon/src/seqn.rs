// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};

use digest::Digest;

use crate::error::AxonError;

/// A committed `(digest, size)` pair, the row type shared by the sequence
/// and history tables.
pub type Row = (Digest, u64);

pub fn encode_row(digest: Digest, size: u64) -> [u8; 40] {
    let mut row = [0u8; 40];
    row[..32].copy_from_slice(&digest.hash);
    row[32..].copy_from_slice(&size.to_be_bytes());
    row
}

pub fn decode_row(raw: &[u8]) -> Result<Row, AxonError> {
    if raw.len() != 40 {
        return Err(AxonError::Internal(format!(
            "corrupt index row of length {}",
            raw.len()
        )));
    }
    let digest = Digest::from_slice(&raw[..32]).map_err(AxonError::Internal)?;
    let mut size = [0u8; 8];
    size.copy_from_slice(&raw[32..]);
    Ok((digest, u64::from_be_bytes(size)))
}

fn decode_be64(raw: &[u8]) -> Result<u64, AxonError> {
    let bytes: [u8; 8] = raw
        .try_into()
        .map_err(|_| AxonError::Internal(format!("corrupt index key of length {}", raw.len())))?;
    Ok(u64::from_be_bytes(bytes))
}

/// Append-only log of committed `(digest, size)` pairs keyed by a dense,
/// monotonically increasing offset. This is the replication feed: a reader
/// at offset O resumes from O+1 after processing. Offsets are never reused.
pub struct Sequence {
    tree: sled::Tree,
    next_offs: AtomicU64,
}

impl Sequence {
    pub fn open(db: &sled::Db) -> Result<Self, AxonError> {
        let tree = db.open_tree("axonseqn")?;
        let next_offs = match tree.last()? {
            Some((key, _)) => decode_be64(&key)? + 1,
            None => 0,
        };
        Ok(Sequence {
            tree,
            next_offs: AtomicU64::new(next_offs),
        })
    }

    pub fn add(&self, digest: Digest, size: u64) -> Result<u64, AxonError> {
        let offs = self.next_offs.fetch_add(1, Ordering::SeqCst);
        self.tree
            .insert(offs.to_be_bytes(), &encode_row(digest, size)[..])?;
        Ok(offs)
    }

    /// Iterate entries from `offs` forward in offset order.
    pub fn iter(
        &self,
        offs: u64,
    ) -> impl Iterator<Item = Result<(u64, Row), AxonError>> + Send + 'static {
        self.tree.range(offs.to_be_bytes()..).map(|item| {
            let (key, value) = item?;
            Ok((decode_be64(&key)?, decode_row(&value)?))
        })
    }
}

/// Time-bucketed index of committed writes keyed by millisecond timestamp
/// plus a disambiguator, so identical timestamps never collide. Tolerates
/// small backward clock jumps; key order is the query order.
pub struct History {
    tree: sled::Tree,
    disambig: AtomicU64,
}

impl History {
    pub fn open(db: &sled::Db) -> Result<Self, AxonError> {
        let tree = db.open_tree("history")?;
        let disambig = match tree.last()? {
            Some((key, _)) if key.len() == 16 => decode_be64(&key[8..])? + 1,
            _ => 0,
        };
        Ok(History {
            tree,
            disambig: AtomicU64::new(disambig),
        })
    }

    pub fn add(&self, time_ms: u64, digest: Digest, size: u64) -> Result<(), AxonError> {
        let mut key = [0u8; 16];
        key[..8].copy_from_slice(&time_ms.to_be_bytes());
        key[8..].copy_from_slice(&self.disambig.fetch_add(1, Ordering::SeqCst).to_be_bytes());
        self.tree.insert(key, &encode_row(digest, size)[..])?;
        Ok(())
    }

    /// Iterate entries with `tick <= time < tock` in ascending time order.
    /// An absent `tock` leaves the range open-ended.
    pub fn carve(
        &self,
        tick: u64,
        tock: Option<u64>,
    ) -> impl Iterator<Item = Result<(u64, Row), AxonError>> + Send + 'static {
        let mut lo = [0u8; 16];
        lo[..8].copy_from_slice(&tick.to_be_bytes());

        let hi = match tock {
            Some(tock) => {
                let mut hi = [0u8; 16];
                hi[..8].copy_from_slice(&tock.to_be_bytes());
                Bound::Excluded(hi)
            }
            None => Bound::Unbounded,
        };

        self.tree
            .range((Bound::Included(lo), hi))
            .map(|item| {
                let (key, value) = item?;
                Ok((decode_be64(&key[..8])?, decode_row(&value)?))
            })
    }
}
