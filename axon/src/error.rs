// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt;

use digest::Digest;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AxonError {
    /// The requested digest is not present in the size-index.
    NoSuchBlob(Digest),
    /// A configured `max:bytes` / `max:count` cap would be crossed.
    LimitExceeded(String),
    /// A digest argument was not exactly 32 bytes / 64 hex characters.
    BadDigest(String),
    /// A malformed request body or argument.
    BadRequest(String),
    /// The permission oracle denied the operation.
    Unauthorized(String),
    /// An operation was cancelled mid-stream.
    Aborted(String),
    /// A transport-level failure in the URL fetcher. Folded into the wget
    /// result rather than raised to callers.
    Transport(String),
    /// An operation on an upload session after `close`.
    SessionClosed,
    /// Storage corruption or unexpected I/O failure.
    Internal(String),
}

impl AxonError {
    /// Stable error-kind name used in the HTTP error envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            AxonError::NoSuchBlob(_) => "NoSuchBlob",
            AxonError::LimitExceeded(_) => "LimitExceeded",
            AxonError::BadDigest(_) => "BadDigest",
            AxonError::BadRequest(_) => "BadRequest",
            AxonError::Unauthorized(_) => "Unauthorized",
            AxonError::Aborted(_) => "Aborted",
            AxonError::Transport(_) => "Transport",
            AxonError::SessionClosed => "SessionClosed",
            AxonError::Internal(_) => "Internal",
        }
    }
}

impl std::error::Error for AxonError {}

impl fmt::Display for AxonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AxonError::NoSuchBlob(digest) => {
                write!(f, "Axon does not contain the requested file: {digest:?}")
            }
            AxonError::LimitExceeded(mesg) => write!(f, "{mesg}"),
            AxonError::BadDigest(mesg) => write!(f, "Bad digest: {mesg}"),
            AxonError::BadRequest(mesg) => write!(f, "Bad request: {mesg}"),
            AxonError::Unauthorized(mesg) => write!(f, "Unauthorized: {mesg}"),
            AxonError::Aborted(mesg) => write!(f, "Aborted: {mesg}"),
            AxonError::Transport(mesg) => write!(f, "Transport failure: {mesg}"),
            AxonError::SessionClosed => write!(f, "Upload session is closed"),
            AxonError::Internal(mesg) => write!(f, "{mesg}"),
        }
    }
}

impl From<sled::Error> for AxonError {
    fn from(err: sled::Error) -> Self {
        AxonError::Internal(format!("storage error: {err}"))
    }
}

impl From<std::io::Error> for AxonError {
    fn from(err: std::io::Error) -> Self {
        AxonError::Internal(format!("i/o error: {err}"))
    }
}

impl From<String> for AxonError {
    fn from(mesg: String) -> Self {
        AxonError::Internal(mesg)
    }
}

impl From<AxonError> for String {
    fn from(err: AxonError) -> Self {
        format!("{err}")
    }
}
