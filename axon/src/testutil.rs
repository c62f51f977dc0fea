// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use bytes::Bytes;
use digest::Digest;

use crate::engine::{Axon, AxonOpts};

/// Container for digest/bytes of test content.
#[derive(Clone, Debug)]
pub struct TestData {
    /// The actual bytes of the content.
    pub bytes: Bytes,

    /// Digest of the content.
    pub digest: Digest,
}

impl TestData {
    pub fn from_static(content: &'static [u8]) -> Self {
        Self::from_bytes(Bytes::from_static(content))
    }

    pub fn from_bytes(bytes: Bytes) -> Self {
        let digest = Digest::of_bytes(&bytes);
        Self { bytes, digest }
    }
}

/// An Axon backed by a scratch directory that lives as long as the value.
pub struct TestAxon {
    pub axon: Axon,
    _dir: tempfile::TempDir,
}

pub fn new_axon() -> TestAxon {
    new_axon_with_opts(AxonOpts::default())
}

pub fn new_axon_with_opts(opts: AxonOpts) -> TestAxon {
    let dir = tempfile::tempdir().expect("create scratch dir");
    let axon = Axon::open(dir.path(), opts).expect("open axon");
    TestAxon { axon, _dir: dir }
}
