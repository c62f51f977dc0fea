// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt;

use bytes::Bytes;
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest as Sha2Digest, Sha256, Sha512};

const HASH_SIZE_BYTES: usize = 32;

const EMPTY_HASH_BYTES: [u8; HASH_SIZE_BYTES] = [
    0xe3, 0xb0, 0xc4, 0x42, 0x98, 0xfc, 0x1c, 0x14, 0x9a, 0xfb, 0xf4, 0xc8, 0x99, 0x6f, 0xb9, 0x24,
    0x27, 0xae, 0x41, 0xe4, 0x64, 0x9b, 0x93, 0x4c, 0xa4, 0x95, 0x99, 0x1b, 0x78, 0x52, 0xb8, 0x55,
];

/// The SHA-256 of a blob's bytes. This is the primary key for every stored
/// blob; sizes and timestamps live in the store's index tables.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Digest {
    pub hash: [u8; HASH_SIZE_BYTES],
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest<{}>", hex::encode(self.hash))
    }
}

impl Digest {
    /// The digest of the empty input.
    pub const EMPTY: Self = Self {
        hash: EMPTY_HASH_BYTES,
    };

    pub fn new(hash_str: &str) -> Result<Self, String> {
        let hash =
            hex::decode(hash_str).map_err(|err| format!("Failed to convert digest: {err}"))?;
        Self::from_slice(&hash)
    }

    pub fn from_slice(hash: &[u8]) -> Result<Self, String> {
        if hash.len() != HASH_SIZE_BYTES {
            return Err(format!("Digest had unexpected length {}", hash.len()));
        }
        let mut digest = Digest {
            hash: [0; HASH_SIZE_BYTES],
        };
        digest.hash.clone_from_slice(hash);
        Ok(digest)
    }

    pub fn of_bytes(content: &Bytes) -> Self {
        let mut hasher = Sha256::default();
        hasher.update(&content[..]);
        let hash = hasher.finalize();
        let mut digest = Digest {
            hash: [0; HASH_SIZE_BYTES],
        };
        digest.hash.clone_from_slice(hash.as_slice());
        digest
    }

    pub fn hex(&self) -> String {
        hex::encode(self.hash)
    }
}

/// Incremental SHA-256 state for content arriving in pieces.
#[derive(Clone)]
pub struct Hasher {
    state: Sha256,
}

impl Hasher {
    pub fn new() -> Self {
        Hasher {
            state: Sha256::default(),
        }
    }

    pub fn update(&mut self, content: &[u8]) {
        self.state.update(content);
    }

    /// Consume the state and produce the digest of everything written so far.
    pub fn finalize(self) -> Digest {
        let hash = self.state.finalize();
        let mut digest = Digest {
            hash: [0; HASH_SIZE_BYTES],
        };
        digest.hash.clone_from_slice(hash.as_slice());
        digest
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercase hex digests produced by a `MultiHasher`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MultiDigests {
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
    pub sha512: String,
}

/// Accumulates MD5, SHA-1, SHA-256, and SHA-512 over one pass of the input.
/// Used by the upload and fetch paths to report every digest a caller might
/// key on, not just the store's primary SHA-256.
pub struct MultiHasher {
    md5: Md5,
    sha1: Sha1,
    sha256: Sha256,
    sha512: Sha512,
    size: u64,
}

impl MultiHasher {
    pub fn new() -> Self {
        MultiHasher {
            md5: Md5::default(),
            sha1: Sha1::default(),
            sha256: Sha256::default(),
            sha512: Sha512::default(),
            size: 0,
        }
    }

    pub fn update(&mut self, content: &[u8]) {
        self.md5.update(content);
        self.sha1.update(content);
        self.sha256.update(content);
        self.sha512.update(content);
        self.size += content.len() as u64;
    }

    /// Total bytes written so far.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn finalize(self) -> MultiDigests {
        MultiDigests {
            md5: hex::encode(self.md5.finalize()),
            sha1: hex::encode(self.sha1.finalize()),
            sha256: hex::encode(self.sha256.finalize()),
            sha512: hex::encode(self.sha512.finalize()),
        }
    }
}

impl Default for MultiHasher {
    fn default() -> Self {
        Self::new()
    }
}
