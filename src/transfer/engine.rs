//! Slicing, scheduling and retrying of object transfers (component G).
//!
//! Generalizes the transfer manager's upload/download orchestration: parts are sliced up front,
//! then handed to the worker pool, with retries folded back into the same part rather than
//! escaping as an error. A single-part download is submitted with priority, ahead of whatever
//! multipart work is already queued, since interactive reads are latency-sensitive in a way
//! background multipart transfers are not; multipart parts are submitted in plain FIFO order.
//!
//! Downloads write completed parts straight into a caller-supplied [`WriteSeek`] (the write
//! ordering is the handle's job, see [`TransferHandle::write_output`]); uploads source their
//! bytes from a caller-supplied [`PageCache`] rather than an in-memory buffer, so a short read
//! against a stale or partially-written cache entry fails the upload outright rather than
//! silently uploading whatever bytes happened to be resident.

use std::sync::Arc;
use std::time::SystemTime;

use log::{info, warn};

use crate::buffer_pool::BufferPool;
use crate::config::EngineConfig;
use crate::error::{ErrorKind, ObjectFsError, Result};
use crate::object_client::{CompletedPart, ObjectClient, PageCache};
use crate::stream::StreamBuffer;
use crate::transfer::handle::{Direction, TransferHandle, TransferStatus, WriteSeek};
use crate::transfer::part::Part;
use crate::worker_pool::WorkerPool;

/// Maximum number of attempts for a single part before it is considered permanently failed.
const MAX_PART_ATTEMPTS: u32 = 3;

/// Orchestrates uploads and downloads against an [`ObjectClient`], backed by a worker pool and a
/// buffer pool sized from [`EngineConfig`].
pub struct TransferEngine {
    config: EngineConfig,
    worker_pool: Arc<WorkerPool>,
    buffer_pool: Arc<BufferPool>,
    client: Arc<dyn ObjectClient>,
}

impl TransferEngine {
    /// Construct an engine with its own dedicated worker pool and buffer pool.
    pub fn new(config: EngineConfig, client: Arc<dyn ObjectClient>) -> Self {
        let worker_pool = Arc::new(WorkerPool::new(config.worker_count));
        let buffer_pool = Arc::new(BufferPool::with_buffers(
            config.worker_count,
            config.part_size as usize,
        ));
        Self {
            config,
            worker_pool,
            buffer_pool,
            client,
        }
    }

    /// Split `total_size` bytes into parts of roughly `part_size`, averaging the last two parts
    /// together whenever the final remainder would otherwise fall below `min_part_size`.
    fn slice(total_size: u64, part_size: u64, min_part_size: u64) -> Vec<(u64, u64)> {
        if total_size == 0 {
            return vec![(0, 0)];
        }
        let count = total_size.div_ceil(part_size).max(1);
        let mut sizes = vec![part_size; count as usize];
        let remainder = total_size - part_size * (count - 1);
        *sizes.last_mut().expect("count >= 1") = remainder;

        if count > 1 && remainder < min_part_size {
            let last = sizes.pop().expect("count > 1");
            let second_last = sizes.pop().expect("count > 1");
            let combined = last + second_last;
            let half = combined / 2;
            sizes.push(combined - half);
            sizes.push(half);
        }

        let mut offset = 0;
        sizes
            .into_iter()
            .map(|size| {
                let start = offset;
                offset += size;
                (start, size)
            })
            .collect()
    }

    /// Build a handle and slice it into parts. A `part_size` of 0 is a construction error the
    /// handle itself must report: since every public entry point returns a handle rather than an
    /// `Option`/`bool`, `prepare` drives the handle straight to `Failed` instead of slicing.
    fn prepare(&self, key: &str, total_size: u64, direction: Direction) -> Arc<TransferHandle> {
        if self.config.part_size == 0 {
            warn!("prepare({key}) refused: configured part_size is 0");
            let handle = Arc::new(TransferHandle::new(key, total_size, Vec::new(), direction));
            handle
                .update_status(TransferStatus::InProgress)
                .expect("fresh handle always accepts InProgress");
            handle
                .update_status(TransferStatus::Failed)
                .expect("InProgress -> Failed always allowed");
            return handle;
        }
        let parts: Vec<Part> = Self::slice(total_size, self.config.part_size, self.config.min_part_size)
            .into_iter()
            .enumerate()
            .map(|(i, (start, size))| Part::new(i as u64 + 1, start, size))
            .collect();
        Arc::new(TransferHandle::new(key, total_size, parts, direction))
    }

    /// Upload `file_size` bytes of `path`, sourcing part data from `cache` (which must already
    /// hold bytes at least as fresh as `mtime_since`), using multipart if at or above the
    /// configured threshold. Blocks until finished unless `async_mode` is set.
    pub fn upload(
        &self,
        path: &str,
        file_size: u64,
        mtime_since: SystemTime,
        cache: Arc<dyn PageCache>,
        async_mode: bool,
    ) -> Arc<TransferHandle> {
        let handle = self.prepare(path, file_size, Direction::Upload);
        if handle.status() == TransferStatus::Failed {
            return handle;
        }
        handle
            .update_status(TransferStatus::InProgress)
            .expect("fresh handle always accepts InProgress");
        self.dispatch_upload(handle.clone(), cache, mtime_since);
        if !async_mode {
            handle.wait_until_finished();
        }
        handle
    }

    /// Retry a failed or aborted upload. A `Failed` handle is reset in place and its failed parts
    /// are requeued; an `Aborted` handle is abandoned in favor of a fresh upload from scratch.
    pub fn retry_upload(
        &self,
        handle: Arc<TransferHandle>,
        mtime_since: SystemTime,
        cache: Arc<dyn PageCache>,
        async_mode: bool,
    ) -> Arc<TransferHandle> {
        if handle.status() == TransferStatus::Aborted {
            warn!(
                "retry_upload({}) handle aborted, starting a fresh transfer",
                handle.object_key
            );
            return self.upload(&handle.object_key, handle.total_size, mtime_since, cache, async_mode);
        }
        if let Err(err) = handle.reset_for_retry() {
            warn!("retry_upload({}) ignored: {err}", handle.object_key);
            return handle;
        }
        handle
            .update_status(TransferStatus::InProgress)
            .expect("NotStarted -> InProgress always allowed");
        self.dispatch_upload(handle.clone(), cache, mtime_since);
        if !async_mode {
            handle.wait_until_finished();
        }
        handle
    }

    fn dispatch_upload(&self, handle: Arc<TransferHandle>, cache: Arc<dyn PageCache>, mtime_since: SystemTime) {
        if handle.total_size >= self.config.multipart_threshold && handle.is_multipart() {
            self.do_upload_multipart(handle, cache, mtime_since);
        } else {
            self.do_upload_single(handle, cache, mtime_since);
        }
    }

    fn do_upload_single(&self, handle: Arc<TransferHandle>, cache: Arc<dyn PageCache>, mtime_since: SystemTime) {
        let client = self.client.clone();
        let key = handle.object_key.clone();
        self.worker_pool.submit(move || {
            let Some(part) = handle.take_next_part() else {
                return;
            };
            let Some(buf) = read_part_from_cache(&cache, &key, &part, mtime_since, &handle, false) else {
                return;
            };
            match client.put_object(&key, &buf) {
                Ok(etag) => {
                    let mut part = part;
                    part.on_data_transferred(part.size);
                    part.complete(etag);
                    handle.complete_part(part);
                    handle
                        .update_status(TransferStatus::Completed)
                        .expect("InProgress -> Completed always allowed");
                }
                Err(err) => {
                    handle.fail_part(part, err, false);
                    handle
                        .update_status(TransferStatus::Failed)
                        .expect("InProgress -> Failed always allowed");
                }
            }
        });
    }

    fn do_upload_multipart(&self, handle: Arc<TransferHandle>, cache: Arc<dyn PageCache>, mtime_since: SystemTime) {
        let client = self.client.clone();
        let key = handle.object_key.clone();

        self.worker_pool.submit(move || {
            let upload_id = match handle.multipart_id() {
                Some(id) => id,
                None => match client.create_multipart_upload(&key) {
                    Ok(id) => {
                        handle.set_multipart_id(id.clone());
                        id
                    }
                    Err(err) => {
                        warn!("create_multipart_upload failed for {key}: {err}");
                        handle
                            .update_status(TransferStatus::Failed)
                            .expect("InProgress -> Failed always allowed");
                        return;
                    }
                },
            };

            loop {
                let Some(part) = handle.take_next_part() else {
                    break;
                };
                let Some(buf) = read_part_from_cache(&cache, &key, &part, mtime_since, &handle, true) else {
                    if handle.status() == TransferStatus::Cancelled {
                        break;
                    }
                    continue;
                };

                let mut part = part;
                let mut attempt = 0;
                loop {
                    attempt += 1;
                    match client.upload_part(&key, &upload_id, part.part_number, &buf) {
                        Ok(etag) => {
                            part.on_data_transferred(part.size);
                            part.complete(etag);
                            handle.complete_part(part);
                            break;
                        }
                        Err(err) if attempt < MAX_PART_ATTEMPTS && err.retryable() => {
                            warn!(
                                "part {} of {key} failed (attempt {attempt}), retrying: {err}",
                                part.part_number
                            );
                            continue;
                        }
                        Err(err) => {
                            handle.fail_part(part, err, false);
                            break;
                        }
                    }
                }
                if handle.status() == TransferStatus::Cancelled {
                    break;
                }
            }

            if handle.status() == TransferStatus::Cancelled {
                let _ = client.abort_multipart_upload(&key, &upload_id);
                handle
                    .update_status(TransferStatus::Aborted)
                    .expect("Cancelled -> Aborted always allowed");
                return;
            }

            if !handle.all_parts_complete() {
                handle
                    .update_status(TransferStatus::Failed)
                    .expect("InProgress -> Failed always allowed");
                return;
            }

            let completed: Vec<CompletedPart> = handle
                .completed_parts()
                .into_iter()
                .map(|p| CompletedPart {
                    part_number: p.part_number,
                    etag: p.etag.clone().unwrap_or_default(),
                })
                .collect();

            match client.complete_multipart_upload(&key, &upload_id, &completed) {
                Ok(_) => {
                    handle
                        .update_status(TransferStatus::Completed)
                        .expect("InProgress -> Completed always allowed");
                    info!("upload {key} completed across {} parts", completed.len());
                }
                Err(_) => {
                    handle
                        .update_status(TransferStatus::Failed)
                        .expect("InProgress -> Failed always allowed");
                }
            }
        });
    }

    /// Cancel a transfer and, once its worker has finished draining, leave it `Aborted`. For a
    /// multipart upload already in flight this is what causes `abort_multipart_upload` to be
    /// called against the object client; the cancellation itself is cooperative, so this returns
    /// as soon as the request is recorded, not once the transfer has actually stopped.
    pub fn abort_multipart(&self, handle: &TransferHandle) -> Result<()> {
        handle.cancel()
    }

    /// Download `size` bytes of `path` starting at `offset`, writing completed parts into
    /// `out_stream` as they finish. Blocks until finished unless `async_mode` is set.
    pub fn download(
        &self,
        path: &str,
        offset: u64,
        size: u64,
        out_stream: Box<dyn WriteSeek>,
        async_mode: bool,
    ) -> Arc<TransferHandle> {
        let handle = self.prepare(path, size, Direction::Download);
        if handle.status() == TransferStatus::Failed {
            return handle;
        }
        handle.set_output_stream(out_stream);
        handle
            .update_status(TransferStatus::InProgress)
            .expect("fresh handle always accepts InProgress");
        self.dispatch_download(handle.clone(), offset, size);
        if !async_mode {
            handle.wait_until_finished();
        }
        handle
    }

    /// Retry a failed or aborted download against a fresh `out_stream`. A `Failed` handle is
    /// reset in place; an `Aborted` handle is abandoned in favor of a fresh download from scratch.
    pub fn retry_download(
        &self,
        handle: Arc<TransferHandle>,
        out_stream: Box<dyn WriteSeek>,
        offset: u64,
        async_mode: bool,
    ) -> Arc<TransferHandle> {
        if handle.status() == TransferStatus::Aborted {
            warn!(
                "retry_download({}) handle aborted, starting a fresh transfer",
                handle.object_key
            );
            return self.download(&handle.object_key, offset, handle.total_size, out_stream, async_mode);
        }
        if let Err(err) = handle.reset_for_retry() {
            warn!("retry_download({}) ignored: {err}", handle.object_key);
            return handle;
        }
        handle.set_output_stream(out_stream);
        handle
            .update_status(TransferStatus::InProgress)
            .expect("NotStarted -> InProgress always allowed");
        self.dispatch_download(handle.clone(), offset, handle.total_size);
        if !async_mode {
            handle.wait_until_finished();
        }
        handle
    }

    fn dispatch_download(&self, handle: Arc<TransferHandle>, offset: u64, size: u64) {
        if size < self.config.multipart_threshold || !handle.is_multipart() {
            self.do_download_single(handle, offset);
        } else {
            self.do_download_multipart(handle, offset);
        }
    }

    fn do_download_single(&self, handle: Arc<TransferHandle>, offset: u64) {
        let client = self.client.clone();
        let key = handle.object_key.clone();
        self.worker_pool.submit_prioritized(move || {
            let Some(part) = handle.take_next_part() else {
                return;
            };
            let range = Some((offset + part.range_start, offset + part.range_end()));
            match client.get_object(&key, range) {
                Ok(data) => {
                    if let Err(io_err) = handle.write_output(part.range_start, &data) {
                        let err = ObjectFsError::new(
                            ErrorKind::ObjectClient { retryable: false },
                            io_err.to_string(),
                        );
                        handle.fail_part(part, err, false);
                        handle
                            .update_status(TransferStatus::Failed)
                            .expect("InProgress -> Failed always allowed");
                        return;
                    }
                    let mut part = part;
                    part.on_data_transferred(part.size);
                    part.complete("");
                    handle.complete_part(part);
                    handle
                        .update_status(TransferStatus::Completed)
                        .expect("InProgress -> Completed always allowed");
                }
                Err(err) => {
                    handle.fail_part(part, err, false);
                    handle
                        .update_status(TransferStatus::Failed)
                        .expect("InProgress -> Failed always allowed");
                }
            }
        });
    }

    fn do_download_multipart(&self, handle: Arc<TransferHandle>, offset: u64) {
        let client = self.client.clone();
        let key = handle.object_key.clone();
        let buffer_pool = self.buffer_pool.clone();

        self.worker_pool.submit(move || {
            loop {
                let Some(part) = handle.take_next_part() else {
                    break;
                };
                let buf = match buffer_pool.acquire() {
                    Ok(buf) => buf,
                    Err(e) => {
                        let err = ObjectFsError::new(ErrorKind::PoolShutdown, e.to_string());
                        warn!("buffer pool acquire failed for {key} part {}: {err}", part.part_number);
                        handle.fail_part(part, err, false);
                        if handle.status() == TransferStatus::Cancelled {
                            break;
                        }
                        continue;
                    }
                };
                let mut stream_buf = StreamBuffer::new(buf, part.size as usize);
                let range = Some((offset + part.range_start, offset + part.range_end()));
                match client.get_object(&key, range) {
                    Ok(data) => {
                        stream_buf.write_bytes(&data);
                        let mut chunk = vec![0u8; stream_buf.unread_len()];
                        stream_buf.read_bytes(&mut chunk);
                        if let Err(io_err) = handle.write_output(part.range_start, &chunk) {
                            let err = ObjectFsError::new(
                                ErrorKind::ObjectClient { retryable: false },
                                io_err.to_string(),
                            );
                            handle.fail_part(part, err, false);
                        } else {
                            let mut part = part;
                            part.on_data_transferred(part.size);
                            part.complete("");
                            handle.complete_part(part);
                        }
                    }
                    Err(err) => {
                        handle.fail_part(part, err, false);
                    }
                }
                buffer_pool.release(stream_buf.release_buffer());
                if handle.status() == TransferStatus::Cancelled {
                    break;
                }
            }

            if handle.status() == TransferStatus::Cancelled {
                handle
                    .update_status(TransferStatus::Aborted)
                    .expect("Cancelled -> Aborted always allowed");
                return;
            }

            if !handle.all_parts_complete() {
                handle
                    .update_status(TransferStatus::Failed)
                    .expect("InProgress -> Failed always allowed");
                return;
            }

            handle
                .update_status(TransferStatus::Completed)
                .expect("InProgress -> Completed always allowed");
        });
    }
}

/// Read one part's worth of bytes from the page cache. A short read (the cache didn't have the
/// full range resident at the required freshness) hard-fails the part rather than uploading
/// whatever bytes happened to be there. Returns `None` if the part was failed.
fn read_part_from_cache(
    cache: &Arc<dyn PageCache>,
    key: &str,
    part: &Part,
    mtime_since: SystemTime,
    handle: &Arc<TransferHandle>,
    multipart: bool,
) -> Option<Vec<u8>> {
    let mut buf = vec![0u8; part.size as usize];
    let (read, missing) = cache.read(key, part.range_start, part.size, &mut buf, mtime_since);
    if read < part.size || !missing.is_empty() {
        let kind = if multipart {
            ErrorKind::NoSuchMultipartUpload
        } else {
            ErrorKind::NoSuchUpload
        };
        let err = ObjectFsError::new(
            kind,
            format!(
                "short read sourcing {key} part {} from page cache: got {read} of {} bytes",
                part.part_number, part.size
            ),
        );
        handle.fail_part(part.clone(), err, false);
        if !multipart {
            handle
                .update_status(TransferStatus::Failed)
                .expect("InProgress -> Failed always allowed");
        }
        return None;
    }
    Some(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_client::{FakeObjectClient, FakePageCache};
    use parking_lot::Mutex as PMutex;
    use std::io::{Read, Seek, SeekFrom, Write};

    /// A `Write + Seek` sink retaining a handle to its bytes after being moved into a transfer,
    /// since the real output stream is consumed by value.
    #[derive(Clone)]
    struct TestSink {
        data: Arc<PMutex<Vec<u8>>>,
        pos: usize,
    }

    impl TestSink {
        fn new(len: usize) -> Self {
            Self {
                data: Arc::new(PMutex::new(vec![0u8; len])),
                pos: 0,
            }
        }

        fn snapshot(&self) -> Vec<u8> {
            self.data.lock().clone()
        }
    }

    impl Write for TestSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let mut data = self.data.lock();
            if self.pos + buf.len() > data.len() {
                data.resize(self.pos + buf.len(), 0);
            }
            data[self.pos..self.pos + buf.len()].copy_from_slice(buf);
            self.pos += buf.len();
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Seek for TestSink {
        fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
            self.pos = match pos {
                SeekFrom::Start(n) => n as usize,
                SeekFrom::Current(n) => (self.pos as i64 + n) as usize,
                SeekFrom::End(n) => (self.data.lock().len() as i64 + n) as usize,
            };
            Ok(self.pos as u64)
        }
    }

    fn seed_cache(cache: &FakePageCache, key: &str, data: &[u8]) {
        cache.put(key, data.to_vec(), SystemTime::now());
    }

    #[test]
    fn slice_evenly_divides_when_no_remainder() {
        let slices = TransferEngine::slice(20, 10, 2);
        assert_eq!(slices, vec![(0, 10), (10, 10)]);
    }

    #[test]
    fn slice_averages_last_two_when_remainder_too_small() {
        let slices = TransferEngine::slice(22, 10, 5);
        // naive slicing would produce [10, 10, 2]; the 2-byte remainder is below min_part_size
        // so the last two parts are merged and re-averaged instead.
        assert_eq!(slices.len(), 2);
        let last_two_total: u64 = slices.iter().map(|(_, size)| size).sum();
        assert_eq!(last_two_total, 22);
        for (_, size) in &slices {
            assert!(*size >= 5);
        }
    }

    #[test]
    fn zero_part_size_drives_prepare_to_failed() {
        let client = Arc::new(FakeObjectClient::new());
        let engine = TransferEngine::new(EngineConfig::new().part_size(0), client);
        let handle = engine.prepare("a", 10, Direction::Upload);
        assert_eq!(handle.status(), TransferStatus::Failed);
    }

    #[test]
    fn single_part_upload_completes() {
        let client = Arc::new(FakeObjectClient::new());
        let cache = Arc::new(FakePageCache::new());
        seed_cache(&cache, "a", b"hello");
        let engine = TransferEngine::new(EngineConfig::new().worker_count(1), client.clone());
        let handle = engine.upload("a", 5, SystemTime::UNIX_EPOCH, cache, false);
        assert_eq!(handle.status(), TransferStatus::Completed);
        assert_eq!(client.get_object("a", None).unwrap(), b"hello");
    }

    #[test]
    fn multipart_upload_completes() {
        let client = Arc::new(FakeObjectClient::new());
        let cache = Arc::new(FakePageCache::new());
        let data = b"abcdefghij".to_vec();
        seed_cache(&cache, "big", &data);
        let engine = TransferEngine::new(
            EngineConfig::new()
                .worker_count(2)
                .part_size(4)
                .multipart_threshold(4)
                .min_part_size(1),
            client.clone(),
        );
        let handle = engine.upload("big", data.len() as u64, SystemTime::UNIX_EPOCH, cache, false);
        assert_eq!(handle.status(), TransferStatus::Completed);
        assert_eq!(client.get_object("big", None).unwrap(), data);
    }

    #[test]
    fn upload_fails_on_short_read_from_cache() {
        let client = Arc::new(FakeObjectClient::new());
        let cache = Arc::new(FakePageCache::new());
        // Nothing seeded: the cache has no bytes for "a" at all.
        let engine = TransferEngine::new(EngineConfig::new().worker_count(1), client);
        let handle = engine.upload("a", 5, SystemTime::UNIX_EPOCH, cache, false);
        assert_eq!(handle.status(), TransferStatus::Failed);
    }

    #[test]
    fn upload_fails_when_cache_entry_is_stale() {
        let client = Arc::new(FakeObjectClient::new());
        let cache = Arc::new(FakePageCache::new());
        seed_cache(&cache, "a", b"hello");
        let engine = TransferEngine::new(EngineConfig::new().worker_count(1), client);
        let mtime_since = SystemTime::now() + std::time::Duration::from_secs(60);
        let handle = engine.upload("a", 5, mtime_since, cache, false);
        assert_eq!(handle.status(), TransferStatus::Failed);
    }

    #[test]
    fn single_part_download_writes_to_output_stream() {
        let client = Arc::new(FakeObjectClient::new());
        client.seed("a", b"hello".to_vec());
        let engine = TransferEngine::new(EngineConfig::new().worker_count(1), client);
        let sink = TestSink::new(5);
        let handle = engine.download("a", 0, 5, Box::new(sink.clone()), false);
        assert_eq!(handle.status(), TransferStatus::Completed);
        assert_eq!(sink.snapshot(), b"hello");
    }

    #[test]
    fn multipart_download_reassembles_data() {
        let client = Arc::new(FakeObjectClient::new());
        let data = b"abcdefghij".to_vec();
        client.seed("big", data.clone());
        let engine = TransferEngine::new(
            EngineConfig::new()
                .worker_count(2)
                .part_size(4)
                .multipart_threshold(4)
                .min_part_size(1),
            client,
        );
        let sink = TestSink::new(data.len());
        let handle = engine.download("big", 0, data.len() as u64, Box::new(sink.clone()), false);
        assert_eq!(handle.status(), TransferStatus::Completed);
        assert_eq!(sink.snapshot(), data);
    }

    #[test]
    fn download_honors_offset_into_the_object() {
        let client = Arc::new(FakeObjectClient::new());
        client.seed("a", b"0123456789".to_vec());
        let engine = TransferEngine::new(EngineConfig::new().worker_count(1), client);
        let sink = TestSink::new(4);
        let handle = engine.download("a", 3, 4, Box::new(sink.clone()), false);
        assert_eq!(handle.status(), TransferStatus::Completed);
        assert_eq!(sink.snapshot(), b"3456");
    }

    #[test]
    fn retry_upload_reuses_multipart_id_and_recovers_failed_parts() {
        let client = Arc::new(FakeObjectClient::new());
        let cache = Arc::new(FakePageCache::new());
        let data = b"abcdefgh".to_vec();
        seed_cache(&cache, "big", &data);
        let engine = TransferEngine::new(
            EngineConfig::new()
                .worker_count(1)
                .part_size(4)
                .multipart_threshold(4)
                .min_part_size(1),
            client.clone(),
        );
        let handle = engine.prepare("big", data.len() as u64, Direction::Upload);
        handle.update_status(TransferStatus::InProgress).unwrap();
        // Simulate one part already failed, the other already completed.
        let part1 = handle.take_next_part().unwrap();
        handle.fail_part(part1, ObjectFsError::new(ErrorKind::NoSuchMultipartUpload, "boom"), false);
        let part2 = handle.take_next_part().unwrap();
        let mut part2 = part2;
        part2.complete("etag-2");
        handle.complete_part(part2);
        handle.update_status(TransferStatus::Failed).unwrap();

        let retried = engine.retry_upload(handle, SystemTime::UNIX_EPOCH, cache, false);
        assert_eq!(retried.status(), TransferStatus::Completed);
    }

    #[test]
    fn multipart_download_fails_when_buffer_pool_is_shut_down() {
        let client = Arc::new(FakeObjectClient::new());
        let data = b"abcdefghij".to_vec();
        client.seed("big", data.clone());
        let engine = TransferEngine::new(
            EngineConfig::new()
                .worker_count(2)
                .part_size(4)
                .multipart_threshold(4)
                .min_part_size(1),
            client,
        );
        // Draining the pool down to zero buffers forces every acquire() in the download to fail,
        // so the transfer must still reach a terminal status rather than hang.
        let _drained = engine.buffer_pool.shutdown_and_wait(engine.config.worker_count);
        let sink = TestSink::new(data.len());
        let handle = engine.download("big", 0, data.len() as u64, Box::new(sink), false);
        assert_eq!(handle.status(), TransferStatus::Failed);
    }

    #[test]
    fn retry_download_after_abort_starts_fresh() {
        let client = Arc::new(FakeObjectClient::new());
        client.seed("a", b"hello".to_vec());
        let engine = TransferEngine::new(EngineConfig::new().worker_count(1), client);
        let handle = engine.prepare("a", 5, Direction::Download);
        handle.set_output_stream(Box::new(TestSink::new(5)));
        handle.update_status(TransferStatus::InProgress).unwrap();
        handle.cancel().unwrap();
        handle.update_status(TransferStatus::Aborted).unwrap();

        let sink = TestSink::new(5);
        let retried = engine.retry_download(handle, Box::new(sink.clone()), 0, false);
        assert_eq!(retried.status(), TransferStatus::Completed);
        assert_eq!(sink.snapshot(), b"hello");
    }
}
