// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::io::SeekFrom;
use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use digest::{Digest, Hasher};
use futures::Stream;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::engine::Axon;
use crate::error::AxonError;
use crate::{CHUNK_SIZE, MAX_SPOOL_SIZE};

/// Backing storage for an upload in progress: in memory until the spool
/// threshold, then an anonymous temporary file. The transition is one-way
/// within a session; `reset` collapses back to memory.
enum SpooledBuffer {
    InMemory(BytesMut),
    OnDisk { file: File, len: u64 },
}

/// A session used to manage streaming uploads to the Axon. Bytes written
/// since the last reset are buffered alongside a running SHA-256; `save`
/// commits them as one blob and resets the session so it may be reused.
pub struct Upload {
    axon: Axon,
    buffer: SpooledBuffer,
    size: u64,
    sha256: Hasher,
    spool_size: usize,
    closed: bool,
}

impl Upload {
    pub fn new(axon: Axon) -> Self {
        Self::with_spool_size(axon, MAX_SPOOL_SIZE)
    }

    fn with_spool_size(axon: Axon, spool_size: usize) -> Self {
        Upload {
            axon,
            buffer: SpooledBuffer::InMemory(BytesMut::new()),
            size: 0,
            sha256: Hasher::new(),
            spool_size,
            closed: false,
        }
    }

    /// Append bytes to the session, updating the running size and SHA-256.
    pub async fn write(&mut self, byts: &[u8]) -> Result<(), AxonError> {
        if self.closed {
            return Err(AxonError::SessionClosed);
        }

        self.size += byts.len() as u64;
        self.sha256.update(byts);

        match &mut self.buffer {
            SpooledBuffer::InMemory(buf) if buf.len() + byts.len() > self.spool_size => {
                // Roll the spool to disk and keep appending there.
                let mut file = File::from_std(tempfile::tempfile()?);
                file.write_all(buf).await?;
                file.write_all(byts).await?;
                let len = (buf.len() + byts.len()) as u64;
                self.buffer = SpooledBuffer::OnDisk { file, len };
            }
            SpooledBuffer::InMemory(buf) => {
                buf.extend_from_slice(byts);
            }
            SpooledBuffer::OnDisk { file, len } => {
                file.write_all(byts).await?;
                *len += byts.len() as u64;
            }
        }

        Ok(())
    }

    /// Save the currently buffered bytes to the Axon and reset the session
    /// so it may be reused. Returns the size and SHA-256 of the bytes
    /// written since the last reset. When the Axon already has the content,
    /// nothing is written. A refused save (a limit, an abort) leaves the
    /// buffered bytes in place, so the same session can retry.
    pub async fn save(&mut self) -> Result<(u64, Digest), AxonError> {
        if self.closed {
            return Err(AxonError::SessionClosed);
        }

        let sha256 = self.sha256.clone().finalize();
        let rsize = self.size;

        if self.axon.has(sha256).await? {
            self.reset();
            return Ok((rsize, sha256));
        }

        let axon = self.axon.clone();
        let genr = chunk_stream(&mut self.buffer).await?;
        axon.save(sha256, genr).await?;

        self.reset();
        Ok((rsize, sha256))
    }

    /// Discard buffered contents and restart the size and SHA-256. An
    /// unrolled buffer is truncated in place to keep its allocation.
    pub fn reset(&mut self) {
        match &mut self.buffer {
            SpooledBuffer::InMemory(buf) => buf.clear(),
            SpooledBuffer::OnDisk { .. } => {
                // Dropping the handle deletes the anonymous temp file.
                self.buffer = SpooledBuffer::InMemory(BytesMut::new());
            }
        }
        self.size = 0;
        self.sha256 = Hasher::new();
    }

    /// Release the session's resources. Subsequent operations fail with
    /// `SessionClosed`.
    pub fn close(&mut self) {
        self.buffer = SpooledBuffer::InMemory(BytesMut::new());
        self.size = 0;
        self.closed = true;
    }
}

/// Rewind the buffer and produce the chunk stream the blob engine drives.
/// The buffered bytes are only borrowed: when the engine refuses the save,
/// they stay in place for a retry.
async fn chunk_stream(
    buffer: &mut SpooledBuffer,
) -> Result<Pin<Box<dyn Stream<Item = Result<Bytes, AxonError>> + Send + '_>>, AxonError> {
    match buffer {
        SpooledBuffer::InMemory(buf) => {
            let stream = async_stream::stream! {
                let mut start = 0usize;
                while start < buf.len() {
                    let end = (start + CHUNK_SIZE).min(buf.len());
                    yield Ok::<Bytes, AxonError>(Bytes::copy_from_slice(&buf[start..end]));
                    start = end;
                }
            };
            Ok(Box::pin(stream))
        }
        SpooledBuffer::OnDisk { file, len } => {
            file.seek(SeekFrom::Start(0)).await?;
            let len = *len;
            let stream = async_stream::stream! {
                let mut remaining = len;
                while remaining > 0 {
                    let want = (remaining as usize).min(CHUNK_SIZE);
                    let mut buf = BytesMut::zeroed(want);
                    if let Err(err) = file.read_exact(&mut buf).await {
                        yield Err(AxonError::from(err));
                        return;
                    }
                    remaining -= want as u64;
                    yield Ok::<Bytes, AxonError>(buf.freeze());
                }
            };
            Ok(Box::pin(stream))
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use futures::TryStreamExt;

    use super::Upload;
    use crate::error::AxonError;
    use crate::testutil::{new_axon, new_axon_with_opts, TestData};
    use crate::AxonOpts;

    #[tokio::test]
    async fn write_then_save_round_trips() {
        let test = new_axon();
        let content = TestData::from_static(b"streamed in two pieces");

        let mut upfd = test.axon.upload();
        upfd.write(&content.bytes[..10]).await.unwrap();
        upfd.write(&content.bytes[10..]).await.unwrap();
        let (size, sha256) = upfd.save().await.unwrap();

        assert_eq!(size, content.bytes.len() as u64);
        assert_eq!(sha256, content.digest);

        let chunks = test
            .axon
            .get(sha256)
            .await
            .unwrap()
            .try_collect::<Vec<_>>()
            .await
            .unwrap();
        assert_eq!(Bytes::from(chunks.concat()), content.bytes);
    }

    #[tokio::test]
    async fn session_is_reusable_after_save() {
        let test = new_axon();
        let first = TestData::from_static(b"first payload");
        let second = TestData::from_static(b"second payload");

        let mut upfd = test.axon.upload();
        upfd.write(&first.bytes).await.unwrap();
        let (_, sha1) = upfd.save().await.unwrap();

        upfd.write(&second.bytes).await.unwrap();
        let (size2, sha2) = upfd.save().await.unwrap();

        assert_eq!(sha1, first.digest);
        assert_eq!(sha2, second.digest);
        assert_eq!(size2, second.bytes.len() as u64);
        assert!(test.axon.has(first.digest).await.unwrap());
        assert!(test.axon.has(second.digest).await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_content_saves_without_writing() {
        let test = new_axon();
        let content = TestData::from_static(b"already stored");

        test.axon.put(content.bytes.clone()).await.unwrap();

        let mut upfd = test.axon.upload();
        upfd.write(&content.bytes).await.unwrap();
        let (size, sha256) = upfd.save().await.unwrap();
        assert_eq!(size, content.bytes.len() as u64);
        assert_eq!(sha256, content.digest);

        let metrics = test.axon.metrics().await.unwrap();
        assert_eq!(metrics.file_count, 1);
    }

    #[tokio::test]
    async fn reset_discards_buffered_bytes() {
        let test = new_axon();
        let discarded = TestData::from_static(b"do not keep this");
        let kept = TestData::from_static(b"keep this");

        let mut upfd = test.axon.upload();
        upfd.write(&discarded.bytes).await.unwrap();
        upfd.reset();

        upfd.write(&kept.bytes).await.unwrap();
        let (size, sha256) = upfd.save().await.unwrap();
        assert_eq!(size, kept.bytes.len() as u64);
        assert_eq!(sha256, kept.digest);
        assert!(!test.axon.has(discarded.digest).await.unwrap());
    }

    #[tokio::test]
    async fn spooled_session_rolls_to_disk() {
        let test = new_axon();
        let content = TestData::from_static(b"bigger than the tiny spool for this test");

        let mut upfd = Upload::with_spool_size(test.axon.clone(), 8);
        for piece in content.bytes.chunks(7) {
            upfd.write(piece).await.unwrap();
        }
        let (size, sha256) = upfd.save().await.unwrap();
        assert_eq!(size, content.bytes.len() as u64);
        assert_eq!(sha256, content.digest);

        let chunks = test
            .axon
            .get(sha256)
            .await
            .unwrap()
            .try_collect::<Vec<_>>()
            .await
            .unwrap();
        assert_eq!(Bytes::from(chunks.concat()), content.bytes);

        // The rolled session keeps working for the next payload.
        let next = TestData::from_static(b"short follow-up");
        upfd.write(&next.bytes).await.unwrap();
        let (_, sha256) = upfd.save().await.unwrap();
        assert_eq!(sha256, next.digest);
    }

    #[tokio::test]
    async fn failed_save_preserves_the_session_for_retry() {
        let test = new_axon_with_opts(AxonOpts {
            max_count: Some(1),
            ..AxonOpts::default()
        });
        let blocker = TestData::from_static(b"occupies the only slot");
        let content = TestData::from_static(b"retried content");

        test.axon.put(blocker.bytes.clone()).await.unwrap();

        let mut upfd = test.axon.upload();
        upfd.write(&content.bytes).await.unwrap();
        match upfd.save().await {
            Err(AxonError::LimitExceeded(_)) => (),
            other => panic!("expected LimitExceeded, got {other:?}"),
        }

        // Freeing the slot lets the same session retry without rewriting.
        test.axon.del(blocker.digest).await.unwrap();
        let (size, sha256) = upfd.save().await.unwrap();
        assert_eq!(size, content.bytes.len() as u64);
        assert_eq!(sha256, content.digest);

        let chunks = test
            .axon
            .get(sha256)
            .await
            .unwrap()
            .try_collect::<Vec<_>>()
            .await
            .unwrap();
        assert_eq!(Bytes::from(chunks.concat()), content.bytes);
    }

    #[tokio::test]
    async fn failed_save_retries_from_a_rolled_spool() {
        let test = new_axon_with_opts(AxonOpts {
            max_count: Some(1),
            ..AxonOpts::default()
        });
        let blocker = TestData::from_static(b"spool blocker");
        let content = TestData::from_static(b"a payload long enough to roll the tiny spool");

        test.axon.put(blocker.bytes.clone()).await.unwrap();

        let mut upfd = Upload::with_spool_size(test.axon.clone(), 8);
        for piece in content.bytes.chunks(5) {
            upfd.write(piece).await.unwrap();
        }
        match upfd.save().await {
            Err(AxonError::LimitExceeded(_)) => (),
            other => panic!("expected LimitExceeded, got {other:?}"),
        }

        test.axon.del(blocker.digest).await.unwrap();
        let (size, sha256) = upfd.save().await.unwrap();
        assert_eq!(size, content.bytes.len() as u64);
        assert_eq!(sha256, content.digest);

        let chunks = test
            .axon
            .get(sha256)
            .await
            .unwrap()
            .try_collect::<Vec<_>>()
            .await
            .unwrap();
        assert_eq!(Bytes::from(chunks.concat()), content.bytes);
    }

    #[tokio::test]
    async fn closed_session_rejects_operations() {
        let test = new_axon();

        let mut upfd = test.axon.upload();
        upfd.write(b"pending bytes").await.unwrap();
        upfd.close();

        assert!(matches!(
            upfd.write(b"more").await,
            Err(AxonError::SessionClosed)
        ));
        assert!(matches!(upfd.save().await, Err(AxonError::SessionClosed)));
    }

    #[tokio::test]
    async fn empty_session_saves_the_empty_blob() {
        let test = new_axon();

        let mut upfd = test.axon.upload();
        let (size, sha256) = upfd.save().await.unwrap();
        assert_eq!(size, 0);
        assert_eq!(
            sha256.hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert!(test.axon.has(sha256).await.unwrap());
    }
}
