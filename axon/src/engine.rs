// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use digest::Digest;
use futures::{Stream, StreamExt};

use crate::counters::{Counters, MetricsSnapshot};
use crate::error::AxonError;
use crate::fetch::{self, WgetInfo, WgetRequest};
use crate::hashlock::HashLockRegistry;
use crate::seqn::{History, Row, Sequence};
use crate::upload::Upload;

/// Alias for the type of a blob read stream.
pub type BoxBlobStream = Pin<Box<dyn Stream<Item = Result<Bytes, AxonError>> + Send + 'static>>;

/// Alias for the type of a sequence/history row stream.
pub type BoxRowStream = Pin<Box<dyn Stream<Item = Result<(u64, Row), AxonError>> + Send + 'static>>;

/// Recognized engine options.
#[derive(Clone, Debug, Default)]
pub struct AxonOpts {
    /// Hard cap on total stored bytes.
    pub max_bytes: Option<u64>,

    /// Hard cap on stored blob count.
    pub max_count: Option<u64>,

    /// SOCKS/HTTP proxy URL used by the wget API.
    pub http_proxy: Option<String>,
}

struct Inner {
    axon_db: sled::Db,
    blob_db: sled::Db,

    /// digest -> size_be64. Presence here is the authoritative "this blob
    /// exists" predicate.
    sizes: sled::Tree,

    /// digest || ordinal_be64 -> chunk bytes. Keys sort in reconstruction
    /// order.
    blobs: sled::Tree,

    seqn: Sequence,
    hist: History,
    counters: Counters,
    hashlocks: HashLockRegistry,
    opts: AxonOpts,
}

/// The blob engine: owns the on-disk tables and exposes the save / get /
/// delete operations plus the enumeration and replication feeds. Cheap to
/// clone; all clones share one store.
#[derive(Clone)]
pub struct Axon {
    inner: Arc<Inner>,
}

impl Axon {
    pub fn open(dirn: impl AsRef<Path>, opts: AxonOpts) -> Result<Axon, AxonError> {
        let dirn = dirn.as_ref();
        std::fs::create_dir_all(dirn)?;

        let axon_db = sled::open(dirn.join("axon.sled"))?;
        let sizes = axon_db.open_tree("sizes")?;
        let hist = History::open(&axon_db)?;
        let seqn = Sequence::open(&axon_db)?;
        let counters = Counters::open(&axon_db, &sizes)?;

        let blob_db = sled::open(dirn.join("blob.sled"))?;
        let blobs = blob_db.open_tree("blobs")?;

        Ok(Axon {
            inner: Arc::new(Inner {
                axon_db,
                blob_db,
                sizes,
                blobs,
                seqn,
                hist,
                counters,
                hashlocks: HashLockRegistry::new(),
                opts,
            }),
        })
    }

    /// Check if the Axon has a file.
    pub async fn has(&self, sha256: Digest) -> Result<bool, AxonError> {
        Ok(self.inner.sizes.contains_key(sha256.hash)?)
    }

    /// Get the size of a file, or None when it is not present.
    pub async fn size(&self, sha256: Digest) -> Result<Option<u64>, AxonError> {
        match self.inner.sizes.get(sha256.hash)? {
            Some(value) => Ok(Some(decode_size(&value)?)),
            None => Ok(None),
        }
    }

    /// Stream the bytes of a file as its stored chunks, in order. Fails
    /// with `NoSuchBlob` up front when the digest is absent.
    pub async fn get(&self, sha256: Digest) -> Result<BoxBlobStream, AxonError> {
        if !self.has(sha256).await? {
            return Err(AxonError::NoSuchBlob(sha256));
        }

        log::debug!("Getting blob [{}].", sha256.hex());

        let blobs = self.inner.blobs.clone();
        let stream = async_stream::try_stream! {
            for item in blobs.scan_prefix(&sha256.hash[..]) {
                let (_, value) = item?;
                metrics::counter!("axon_bytes_read_total", value.len() as u64);
                yield Bytes::copy_from_slice(&value);
                tokio::task::yield_now().await;
            }
        };

        Ok(Box::pin(stream))
    }

    /// Commit a stream of chunk buffers as the content of `sha256`.
    /// Idempotent: when the digest is already stored, the producer is left
    /// undrained and the stored size is returned without touching storage.
    /// The caller is trusted to have digested the produced bytes.
    pub async fn save<S>(&self, sha256: Digest, genr: S) -> Result<u64, AxonError>
    where
        S: Stream<Item = Result<Bytes, AxonError>> + Send,
    {
        let _hold = self.inner.hashlocks.hold(sha256).await;

        if let Some(value) = self.inner.sizes.get(sha256.hash)? {
            return Ok(decode_size(&value)?);
        }

        // Taken before the write, not atomically with the counter update;
        // overshoot is bounded by the one in-flight blob.
        self.req_below_limit()?;

        log::debug!("Saving blob [{}].", sha256.hex());
        metrics::counter!("axon_blobs_written_total", 1);

        let size = self.save_blob_chunks(sha256, genr).await?;

        self.inner
            .sizes
            .insert(sha256.hash, &size.to_be_bytes()[..])?;

        self.inner.seqn.add(sha256, size)?;
        self.inner.hist.add(now_ms(), sha256, size)?;

        // After the size-index put: a crash in between under-counts, which
        // the rebuild pass at open can repair.
        self.inner.counters.add_blob(size)?;

        Ok(size)
    }

    async fn save_blob_chunks<S>(&self, sha256: Digest, genr: S) -> Result<u64, AxonError>
    where
        S: Stream<Item = Result<Bytes, AxonError>> + Send,
    {
        futures::pin_mut!(genr);

        let mut size = 0u64;
        let mut ordinal = 0u64;
        while let Some(chunk_result) = genr.next().await {
            let chunk = match chunk_result {
                Ok(chunk) => chunk,
                Err(AxonError::Aborted(mesg)) => return Err(AxonError::Aborted(mesg)),
                // Partial writes are invisible (no size-index entry) and
                // swept up by a later garbage collection pass.
                Err(err) => return Err(AxonError::Aborted(format!("blob producer failed: {err}"))),
            };

            size += chunk.len() as u64;
            metrics::counter!("axon_bytes_written_total", chunk.len() as u64);
            self.inner
                .blobs
                .insert(chunk_key(sha256, ordinal), &chunk[..])?;
            ordinal += 1;
            tokio::task::yield_now().await;
        }

        Ok(size)
    }

    fn req_below_limit(&self) -> Result<(), AxonError> {
        if let Some(max_bytes) = self.inner.opts.max_bytes {
            if self.inner.counters.size_bytes()? >= max_bytes {
                return Err(AxonError::LimitExceeded(format!(
                    "Axon is at size:bytes limit: {max_bytes}"
                )));
            }
        }

        if let Some(max_count) = self.inner.opts.max_count {
            if self.inner.counters.file_count()? >= max_count {
                return Err(AxonError::LimitExceeded(format!(
                    "Axon is at file:count limit: {max_count}"
                )));
            }
        }

        Ok(())
    }

    /// Remove the given file. Returns false when it was not present.
    pub async fn del(&self, sha256: Digest) -> Result<bool, AxonError> {
        let _hold = self.inner.hashlocks.hold(sha256).await;

        let value = match self.inner.sizes.remove(sha256.hash)? {
            Some(value) => value,
            None => return Ok(false),
        };

        log::debug!("Deleting blob [{}].", sha256.hex());
        metrics::counter!("axon_blobs_deleted_total", 1);

        let size = decode_size(&value)?;
        self.inner.counters.del_blob(size)?;

        // Chunks go after the size-index pop: a crash mid-delete leaves
        // orphan chunks, never a size entry without chunks.
        self.del_blob_chunks(sha256).await?;

        Ok(true)
    }

    async fn del_blob_chunks(&self, sha256: Digest) -> Result<(), AxonError> {
        for item in self.inner.blobs.scan_prefix(&sha256.hash[..]).keys() {
            let lkey = item?;
            self.inner.blobs.remove(lkey)?;
            tokio::task::yield_now().await;
        }
        Ok(())
    }

    /// Delete a batch of files, returning one flag per digest in request
    /// order.
    pub async fn dels(&self, sha256s: Vec<Digest>) -> Result<Vec<bool>, AxonError> {
        let mut flags = Vec::with_capacity(sha256s.len());
        for sha256 in sha256s {
            flags.push(self.del(sha256).await?);
        }
        Ok(flags)
    }

    /// Filter the input down to the digests the Axon does not have,
    /// preserving order.
    pub async fn wants(&self, sha256s: Vec<Digest>) -> Result<Vec<Digest>, AxonError> {
        let mut missing = Vec::new();
        for sha256 in sha256s {
            if !self.has(sha256).await? {
                missing.push(sha256);
            }
        }
        Ok(missing)
    }

    /// Stream `(offset, (digest, size))` rows from the sequence starting at
    /// `offs`, skipping rows whose blob has since been deleted.
    pub fn hashes(&self, offs: u64) -> BoxRowStream {
        let iter = self.inner.seqn.iter(offs);
        let sizes = self.inner.sizes.clone();

        let stream = async_stream::try_stream! {
            for item in iter {
                let (offs, (sha256, size)) = item?;
                if sizes.contains_key(sha256.hash)? {
                    yield (offs, (sha256, size));
                }
                tokio::task::yield_now().await;
            }
        };

        Box::pin(stream)
    }

    /// Stream `(time_ms, (digest, size))` rows with `tick <= time < tock`,
    /// open-ended when `tock` is None.
    pub fn history(&self, tick: u64, tock: Option<u64>) -> BoxRowStream {
        let iter = self.inner.hist.carve(tick, tock);

        let stream = async_stream::try_stream! {
            for item in iter {
                let row = item?;
                yield row;
                tokio::task::yield_now().await;
            }
        };

        Box::pin(stream)
    }

    /// Store a one-shot set of bytes, returning its size and digest.
    pub async fn put(&self, byts: Bytes) -> Result<(u64, Digest), AxonError> {
        let mut upfd = self.upload();
        upfd.write(&byts).await?;
        upfd.save().await
    }

    /// Store a batch of one-shot payloads through a single reused upload
    /// session.
    pub async fn puts(&self, files: Vec<Bytes>) -> Result<Vec<(u64, Digest)>, AxonError> {
        let mut upfd = self.upload();
        let mut results = Vec::with_capacity(files.len());
        for byts in files {
            upfd.write(&byts).await?;
            results.push(upfd.save().await?);
        }
        Ok(results)
    }

    /// Open an upload session for streaming ingest.
    pub fn upload(&self) -> Upload {
        Upload::new(self.clone())
    }

    /// Snapshot of the persistent counters and configured limits.
    pub async fn metrics(&self) -> Result<MetricsSnapshot, AxonError> {
        self.inner.counters.snapshot(&self.inner.opts)
    }

    /// Stream a URL's response body directly into the Axon.
    pub async fn wget(&self, request: WgetRequest) -> Result<WgetInfo, AxonError> {
        log::debug!("Wget called for [{}].", request.url);
        fetch::wget(self, request).await
    }

    pub(crate) fn http_proxy(&self) -> Option<&str> {
        self.inner.opts.http_proxy.as_deref()
    }

    /// Flush both stores to disk.
    pub async fn flush(&self) -> Result<(), AxonError> {
        self.inner.axon_db.flush_async().await?;
        self.inner.blob_db.flush_async().await?;
        Ok(())
    }
}

fn chunk_key(sha256: Digest, ordinal: u64) -> [u8; 40] {
    let mut lkey = [0u8; 40];
    lkey[..32].copy_from_slice(&sha256.hash);
    lkey[32..].copy_from_slice(&ordinal.to_be_bytes());
    lkey
}

fn decode_size(raw: &[u8]) -> Result<u64, AxonError> {
    let bytes: [u8; 8] = raw
        .try_into()
        .map_err(|_| AxonError::Internal(format!("corrupt size entry of length {}", raw.len())))?;
    Ok(u64::from_be_bytes(bytes))
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use digest::Digest;
    use futures::{StreamExt, TryStreamExt};
    use rand::RngCore;

    use crate::error::AxonError;
    use crate::testutil::{new_axon, new_axon_with_opts, TestData};
    use crate::{AxonOpts, CHUNK_SIZE};

    async fn consolidate(axon: &crate::Axon, sha256: Digest) -> Bytes {
        let chunks = axon
            .get(sha256)
            .await
            .unwrap()
            .try_collect::<Vec<_>>()
            .await
            .unwrap();
        Bytes::from(chunks.concat())
    }

    #[tokio::test]
    async fn put_round_trips() {
        let test = new_axon();
        let content = TestData::from_static(b"some bytes to keep");

        let (size, sha256) = test.axon.put(content.bytes.clone()).await.unwrap();
        assert_eq!(size, content.bytes.len() as u64);
        assert_eq!(sha256, content.digest);

        assert!(test.axon.has(sha256).await.unwrap());
        assert_eq!(test.axon.size(sha256).await.unwrap(), Some(size));
        assert_eq!(consolidate(&test.axon, sha256).await, content.bytes);
    }

    #[tokio::test]
    async fn empty_blob_is_legal() {
        let test = new_axon();

        let (size, sha256) = test.axon.put(Bytes::new()).await.unwrap();
        assert_eq!(size, 0);
        assert_eq!(
            sha256.hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );

        assert!(test.axon.has(sha256).await.unwrap());
        assert_eq!(test.axon.size(sha256).await.unwrap(), Some(0));

        // Zero chunks: the stream is empty.
        let chunks = test
            .axon
            .get(sha256)
            .await
            .unwrap()
            .try_collect::<Vec<_>>()
            .await
            .unwrap();
        assert!(chunks.is_empty());
    }

    #[tokio::test]
    async fn save_is_idempotent() {
        let test = new_axon();
        let content = TestData::from_static(b"abc");

        let first = test.axon.put(content.bytes.clone()).await.unwrap();
        assert_eq!(
            first.1.hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(first.0, 3);

        let second = test.axon.put(content.bytes.clone()).await.unwrap();
        assert_eq!(second, first);

        let metrics = test.axon.metrics().await.unwrap();
        assert_eq!(metrics.file_count, 1);
        assert_eq!(metrics.size_bytes, 3);
    }

    #[tokio::test]
    async fn missing_blob_fails_up_front() {
        let test = new_axon();
        let absent = TestData::from_static(b"never stored");

        assert!(!test.axon.has(absent.digest).await.unwrap());
        assert_eq!(test.axon.size(absent.digest).await.unwrap(), None);
        match test.axon.get(absent.digest).await {
            Err(AxonError::NoSuchBlob(sha256)) => assert_eq!(sha256, absent.digest),
            Ok(_) => panic!("expected NoSuchBlob, got Ok"),
            Err(other) => panic!("expected NoSuchBlob, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn del_removes_every_chunk() {
        let test = new_axon();
        let content = TestData::from_static(b"abc");

        let (_, sha256) = test.axon.put(content.bytes.clone()).await.unwrap();

        assert!(test.axon.del(sha256).await.unwrap());
        assert!(!test.axon.del(sha256).await.unwrap());
        assert!(!test.axon.has(sha256).await.unwrap());
        assert!(matches!(
            test.axon.get(sha256).await,
            Err(AxonError::NoSuchBlob(_))
        ));

        // No chunk key with the digest prefix survives.
        assert!(test
            .axon
            .inner
            .blobs
            .scan_prefix(&sha256.hash[..])
            .next()
            .is_none());

        let metrics = test.axon.metrics().await.unwrap();
        assert_eq!(metrics.file_count, 0);
        assert_eq!(metrics.size_bytes, 0);
    }

    #[tokio::test]
    async fn dels_reports_per_digest() {
        let test = new_axon();
        let present = TestData::from_static(b"present");
        let absent = TestData::from_static(b"absent");

        test.axon.put(present.bytes.clone()).await.unwrap();

        let flags = test
            .axon
            .dels(vec![present.digest, absent.digest])
            .await
            .unwrap();
        assert_eq!(flags, vec![true, false]);
    }

    #[tokio::test]
    async fn wants_preserves_order() {
        let test = new_axon();
        let stored = TestData::from_static(b"stored");
        let missing1 = TestData::from_static(b"missing one");
        let missing2 = TestData::from_static(b"missing two");

        test.axon.put(stored.bytes.clone()).await.unwrap();

        let missing = test
            .axon
            .wants(vec![missing1.digest, stored.digest, missing2.digest])
            .await
            .unwrap();
        assert_eq!(missing, vec![missing1.digest, missing2.digest]);
    }

    #[tokio::test]
    async fn hashes_are_dense_and_skip_deleted() {
        let test = new_axon();
        let contents = [
            TestData::from_static(b"blob zero"),
            TestData::from_static(b"blob one"),
            TestData::from_static(b"blob two"),
        ];
        for content in &contents {
            test.axon.put(content.bytes.clone()).await.unwrap();
        }

        let rows = test
            .axon
            .hashes(0)
            .try_collect::<Vec<_>>()
            .await
            .unwrap();
        let offsets = rows.iter().map(|(offs, _)| *offs).collect::<Vec<_>>();
        assert_eq!(offsets, vec![0, 1, 2]);
        assert_eq!(rows[1].1 .0, contents[1].digest);

        // A deleted blob keeps its offset but disappears from the feed.
        test.axon.del(contents[1].digest).await.unwrap();
        let rows = test
            .axon
            .hashes(0)
            .try_collect::<Vec<_>>()
            .await
            .unwrap();
        let offsets = rows.iter().map(|(offs, _)| *offs).collect::<Vec<_>>();
        assert_eq!(offsets, vec![0, 2]);

        let resumed = test
            .axon
            .hashes(2)
            .try_collect::<Vec<_>>()
            .await
            .unwrap();
        assert_eq!(resumed.len(), 1);
        assert_eq!(resumed[0].1 .0, contents[2].digest);
    }

    #[tokio::test]
    async fn history_respects_the_window() {
        let test = new_axon();
        let before = TestData::from_static(b"before");
        let after = TestData::from_static(b"after");

        test.axon.put(before.bytes.clone()).await.unwrap();
        let rows = test
            .axon
            .history(0, None)
            .try_collect::<Vec<_>>()
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        let tick = rows[0].0;

        test.axon.put(after.bytes.clone()).await.unwrap();

        let rows = test
            .axon
            .history(0, None)
            .try_collect::<Vec<_>>()
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].0 <= rows[1].0);

        // Everything is excluded by an empty window ending at the first
        // write's timestamp.
        let rows = test
            .axon
            .history(0, Some(tick))
            .try_collect::<Vec<_>>()
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn concurrent_puts_of_one_blob_store_it_once() {
        let test = new_axon();
        let content = TestData::from_static(b"contended content");

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let axon = test.axon.clone();
            let byts = content.bytes.clone();
            tasks.push(tokio::spawn(async move { axon.put(byts).await }));
        }
        for task in tasks {
            let (size, sha256) = task.await.unwrap().unwrap();
            assert_eq!(size, content.bytes.len() as u64);
            assert_eq!(sha256, content.digest);
        }

        let metrics = test.axon.metrics().await.unwrap();
        assert_eq!(metrics.file_count, 1);
        assert_eq!(metrics.size_bytes, content.bytes.len() as u64);

        let rows = test
            .axon
            .hashes(0)
            .try_collect::<Vec<_>>()
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn count_limit_is_enforced() {
        let test = new_axon_with_opts(AxonOpts {
            max_count: Some(1),
            ..AxonOpts::default()
        });
        let first = TestData::from_static(b"fits under the cap");
        let second = TestData::from_static(b"does not fit");

        test.axon.put(first.bytes.clone()).await.unwrap();

        match test.axon.put(second.bytes.clone()).await {
            Err(AxonError::LimitExceeded(mesg)) => assert!(mesg.contains("file:count")),
            other => panic!("expected LimitExceeded, got {other:?}"),
        }

        let metrics = test.axon.metrics().await.unwrap();
        assert_eq!(metrics.file_count, 1);
        assert_eq!(metrics.size_bytes, first.bytes.len() as u64);

        // Re-saving existing content is still fine at the cap.
        let (size, _) = test.axon.put(first.bytes.clone()).await.unwrap();
        assert_eq!(size, first.bytes.len() as u64);
    }

    #[tokio::test]
    async fn byte_limit_is_enforced() {
        let test = new_axon_with_opts(AxonOpts {
            max_bytes: Some(8),
            ..AxonOpts::default()
        });

        test.axon
            .put(Bytes::from_static(b"eightbyt"))
            .await
            .unwrap();

        match test.axon.put(Bytes::from_static(b"one more")).await {
            Err(AxonError::LimitExceeded(mesg)) => assert!(mesg.contains("size:bytes")),
            other => panic!("expected LimitExceeded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn aborted_save_leaves_blob_invisible() {
        let test = new_axon();

        let mut content = vec![0u8; CHUNK_SIZE + 1024];
        rand::thread_rng().fill_bytes(&mut content);
        let content = TestData::from_bytes(Bytes::from(content));

        // A producer that dies after the first chunk.
        let first_chunk = content.bytes.slice(0..CHUNK_SIZE);
        let genr = futures::stream::iter(vec![
            Ok(first_chunk),
            Err(AxonError::Aborted("upload cancelled".to_owned())),
        ]);

        match test.axon.save(content.digest, genr).await {
            Err(AxonError::Aborted(_)) => (),
            other => panic!("expected Aborted, got {other:?}"),
        }

        // The partial write is invisible; only orphan chunks remain.
        assert!(!test.axon.has(content.digest).await.unwrap());
        let metrics = test.axon.metrics().await.unwrap();
        assert_eq!(metrics.file_count, 0);

        // A subsequent full save of the same content completes normally.
        let (size, sha256) = test.axon.put(content.bytes.clone()).await.unwrap();
        assert_eq!(size, content.bytes.len() as u64);
        assert_eq!(consolidate(&test.axon, sha256).await, content.bytes);
    }

    #[tokio::test]
    async fn large_blob_is_chunked() {
        let test = new_axon();

        let mut content = vec![0u8; CHUNK_SIZE + CHUNK_SIZE / 4];
        rand::thread_rng().fill_bytes(&mut content);
        let content = TestData::from_bytes(Bytes::from(content));

        let (size, sha256) = test.axon.put(content.bytes.clone()).await.unwrap();
        assert_eq!(size, content.bytes.len() as u64);

        let chunks = test
            .axon
            .get(sha256)
            .await
            .unwrap()
            .try_collect::<Vec<_>>()
            .await
            .unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), CHUNK_SIZE);
        assert_eq!(chunks[1].len(), CHUNK_SIZE / 4);
        assert_eq!(Bytes::from(chunks.concat()), content.bytes);
    }

    #[tokio::test]
    async fn puts_stores_a_batch_in_order() {
        let test = new_axon();
        let one = TestData::from_static(b"first of the batch");
        let two = TestData::from_static(b"second of the batch");

        let results = test
            .axon
            .puts(vec![one.bytes.clone(), two.bytes.clone()])
            .await
            .unwrap();
        assert_eq!(
            results,
            vec![
                (one.bytes.len() as u64, one.digest),
                (two.bytes.len() as u64, two.digest),
            ]
        );

        assert_eq!(consolidate(&test.axon, one.digest).await, one.bytes);
        assert_eq!(consolidate(&test.axon, two.digest).await, two.bytes);
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let content = TestData::from_static(b"durable bytes");

        {
            let axon = crate::Axon::open(dir.path(), AxonOpts::default()).unwrap();
            axon.put(content.bytes.clone()).await.unwrap();
            axon.flush().await.unwrap();
        }

        let axon = crate::Axon::open(dir.path(), AxonOpts::default()).unwrap();
        assert!(axon.has(content.digest).await.unwrap());
        assert_eq!(consolidate(&axon, content.digest).await, content.bytes);

        let metrics = axon.metrics().await.unwrap();
        assert_eq!(metrics.file_count, 1);

        // The sequence keeps numbering where it left off.
        let other = TestData::from_static(b"added after reopen");
        axon.put(other.bytes.clone()).await.unwrap();
        let rows = axon.hashes(0).try_collect::<Vec<_>>().await.unwrap();
        let offsets = rows.iter().map(|(offs, _)| *offs).collect::<Vec<_>>();
        assert_eq!(offsets, vec![0, 1]);
    }

    #[tokio::test]
    async fn get_streams_lazily() {
        let test = new_axon();
        let content = TestData::from_static(b"lazy");
        test.axon.put(content.bytes.clone()).await.unwrap();

        let mut stream = test.axon.get(content.digest).await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), content.bytes);
        assert!(stream.next().await.is_none());
    }
}
