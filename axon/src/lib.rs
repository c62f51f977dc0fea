// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
#![allow(clippy::new_without_default, clippy::len_without_is_empty)]

pub mod api;

mod counters;
mod engine;
mod error;
mod fetch;
mod hashlock;
mod seqn;
mod upload;

pub mod testutil;

pub use counters::MetricsSnapshot;
pub use digest::Digest;
pub use engine::{Axon, AxonOpts, BoxBlobStream, BoxRowStream};
pub use error::AxonError;
pub use fetch::{WgetHashes, WgetInfo, WgetRequest};
pub use hashlock::{HashLockGuard, HashLockRegistry};
pub use upload::Upload;

/// Size of the chunks a blob is split into on disk. The final chunk of a
/// blob may be shorter.
pub const CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Upload sessions buffer in memory up to this size, then spill to a
/// temporary file.
pub const MAX_SPOOL_SIZE: usize = CHUNK_SIZE * 32; // 512 MiB

/// Cap on a single HTTP streaming upload.
pub const MAX_HTTP_UPLOAD_SIZE: u64 = 4 * 1024 * 1024 * 1024 * 1024; // 4 TiB
