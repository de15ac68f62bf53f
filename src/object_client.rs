//! Object-store collaborator traits and in-memory test doubles (§6, ambient).
//!
//! The transfer engine never talks to a concrete object store; it talks to whatever implements
//! [`ObjectClient`]. `FakeObjectClient`/`FakePageCache` are the harness a caller uses in tests,
//! the same role `fuser-tests` plays for `fuser` itself: a stand-in collaborator good enough to
//! exercise the real code path end to end without a network.

use std::collections::HashMap;
use std::time::SystemTime;

use parking_lot::Mutex;

use crate::error::{ErrorKind, ObjectFsError, Result};

/// A single identified chunk of an in-progress multipart upload.
#[derive(Debug, Clone)]
pub struct CompletedPart {
    /// 1-based part number.
    pub part_number: u64,
    /// Entity tag the store returned when the part was stored.
    pub etag: String,
}

/// The operations the transfer engine needs from an object store.
///
/// Implementations must be safe to call concurrently from multiple worker threads.
pub trait ObjectClient: Send + Sync {
    /// Fetch a byte range of an object. `range` is `(start, end)`, end-exclusive; `None` fetches
    /// the whole object.
    fn get_object(&self, key: &str, range: Option<(u64, u64)>) -> Result<Vec<u8>>;

    /// Store an entire object in one call, returning its entity tag.
    fn put_object(&self, key: &str, data: &[u8]) -> Result<String>;

    /// Begin a multipart upload, returning an opaque upload id.
    fn create_multipart_upload(&self, key: &str) -> Result<String>;

    /// Upload one part of a multipart upload, returning its entity tag.
    fn upload_part(&self, key: &str, upload_id: &str, part_number: u64, data: &[u8]) -> Result<String>;

    /// Finalize a multipart upload given every part's entity tag, in part-number order.
    fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<String>;

    /// Abort a multipart upload, releasing any storage the store reserved for it.
    fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<()>;
}

/// A read-through cache of object bytes that the upload path sources its data from, rather than
/// a caller-supplied buffer.
pub trait PageCache: Send + Sync {
    /// Read up to `length` bytes of `key` starting at `offset` into `out_buf`, only honoring
    /// cached data at least as fresh as `mtime_since`. Returns the number of bytes actually
    /// supplied from the cache and the sub-ranges (as `(start, end)` offsets relative to
    /// `offset`) that were not satisfied, so the caller can tell a short read from a full one.
    fn read(
        &self,
        key: &str,
        offset: u64,
        length: u64,
        out_buf: &mut [u8],
        mtime_since: SystemTime,
    ) -> (u64, Vec<(u64, u64)>);

    /// Cache bytes for `key` as of `mtime`, replacing whatever was cached before.
    fn put(&self, key: &str, data: Vec<u8>, mtime: SystemTime);

    /// Drop a cached entry, e.g. after the object is overwritten.
    fn invalidate(&self, key: &str);
}

struct MultipartUpload {
    parts: HashMap<u64, Vec<u8>>,
}

/// An in-memory `ObjectClient` double backed by a `HashMap`, for tests.
#[derive(Default)]
pub struct FakeObjectClient {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    uploads: Mutex<HashMap<String, MultipartUpload>>,
    next_upload_id: Mutex<u64>,
}

impl FakeObjectClient {
    /// Construct an empty fake store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with an object, as if it had already been uploaded.
    pub fn seed(&self, key: impl Into<String>, data: Vec<u8>) {
        self.objects.lock().insert(key.into(), data);
    }
}

impl ObjectClient for FakeObjectClient {
    fn get_object(&self, key: &str, range: Option<(u64, u64)>) -> Result<Vec<u8>> {
        let objects = self.objects.lock();
        let data = objects.get(key).ok_or_else(|| {
            ObjectFsError::new(
                ErrorKind::ObjectClient { retryable: false },
                format!("no such object: {key}"),
            )
        })?;
        match range {
            Some((start, end)) => {
                let start = (start as usize).min(data.len());
                let end = (end as usize).min(data.len());
                Ok(data[start..end].to_vec())
            }
            None => Ok(data.clone()),
        }
    }

    fn put_object(&self, key: &str, data: &[u8]) -> Result<String> {
        self.objects.lock().insert(key.to_string(), data.to_vec());
        Ok(format!("etag-{}-{}", key, data.len()))
    }

    fn create_multipart_upload(&self, _key: &str) -> Result<String> {
        let mut next = self.next_upload_id.lock();
        *next += 1;
        let upload_id = format!("upload-{next}");
        self.uploads.lock().insert(
            upload_id.clone(),
            MultipartUpload {
                parts: HashMap::new(),
            },
        );
        Ok(upload_id)
    }

    fn upload_part(&self, _key: &str, upload_id: &str, part_number: u64, data: &[u8]) -> Result<String> {
        let mut uploads = self.uploads.lock();
        let upload = uploads.get_mut(upload_id).ok_or_else(|| {
            ObjectFsError::new(
                ErrorKind::NoSuchMultipartUpload,
                format!("no such upload: {upload_id}"),
            )
        })?;
        upload.parts.insert(part_number, data.to_vec());
        Ok(format!("etag-{upload_id}-{part_number}"))
    }

    fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<String> {
        let mut uploads = self.uploads.lock();
        let upload = uploads.remove(upload_id).ok_or_else(|| {
            ObjectFsError::new(
                ErrorKind::NoSuchMultipartUpload,
                format!("no such upload: {upload_id}"),
            )
        })?;
        let mut assembled = Vec::new();
        for part in parts {
            let data = upload.parts.get(&part.part_number).ok_or_else(|| {
                ObjectFsError::new(
                    ErrorKind::NoSuchMultipartUpload,
                    format!("missing part {} for upload {upload_id}", part.part_number),
                )
            })?;
            assembled.extend_from_slice(data);
        }
        let etag = format!("etag-{key}-{}", assembled.len());
        self.objects.lock().insert(key.to_string(), assembled);
        Ok(etag)
    }

    fn abort_multipart_upload(&self, _key: &str, upload_id: &str) -> Result<()> {
        self.uploads.lock().remove(upload_id);
        Ok(())
    }
}

struct CachedObject {
    data: Vec<u8>,
    mtime: SystemTime,
}

/// An in-memory `PageCache` double, for tests.
#[derive(Default)]
pub struct FakePageCache {
    entries: Mutex<HashMap<String, CachedObject>>,
}

impl FakePageCache {
    /// Construct an empty fake cache.
    pub fn new() -> Self {
        Self::default()
    }
}

impl PageCache for FakePageCache {
    fn read(
        &self,
        key: &str,
        offset: u64,
        length: u64,
        out_buf: &mut [u8],
        mtime_since: SystemTime,
    ) -> (u64, Vec<(u64, u64)>) {
        let entries = self.entries.lock();
        let Some(object) = entries.get(key) else {
            return (0, vec![(0, length)]);
        };
        if object.mtime < mtime_since {
            return (0, vec![(0, length)]);
        }
        let total = object.data.len() as u64;
        let start = offset.min(total) as usize;
        let end = (offset + length).min(total) as usize;
        let available = end.saturating_sub(start);
        let n = available.min(out_buf.len());
        out_buf[..n].copy_from_slice(&object.data[start..start + n]);
        let missing = if (n as u64) < length {
            vec![(n as u64, length)]
        } else {
            Vec::new()
        };
        (n as u64, missing)
    }

    fn put(&self, key: &str, data: Vec<u8>, mtime: SystemTime) {
        self.entries
            .lock()
            .insert(key.to_string(), CachedObject { data, mtime });
    }

    fn invalidate(&self, key: &str) {
        self.entries.lock().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_client_round_trips_single_part() {
        let client = FakeObjectClient::new();
        client.put_object("a", b"hello world").unwrap();
        let data = client.get_object("a", None).unwrap();
        assert_eq!(data, b"hello world");
    }

    #[test]
    fn fake_client_multipart_assembles_in_order() {
        let client = FakeObjectClient::new();
        let upload_id = client.create_multipart_upload("a").unwrap();
        client.upload_part("a", &upload_id, 2, b"world").unwrap();
        client.upload_part("a", &upload_id, 1, b"hello ").unwrap();
        let parts = vec![
            CompletedPart {
                part_number: 1,
                etag: "e1".into(),
            },
            CompletedPart {
                part_number: 2,
                etag: "e2".into(),
            },
        ];
        client.complete_multipart_upload("a", &upload_id, &parts).unwrap();
        assert_eq!(client.get_object("a", None).unwrap(), b"hello world");
    }

    #[test]
    fn fake_page_cache_invalidate_clears_entry() {
        let cache = FakePageCache::new();
        cache.put("a", vec![1, 2, 3], SystemTime::now());
        let mut out = [0u8; 3];
        let (read, missing) = cache.read("a", 0, 3, &mut out, SystemTime::UNIX_EPOCH);
        assert_eq!(read, 3);
        assert!(missing.is_empty());
        cache.invalidate("a");
        let (read, missing) = cache.read("a", 0, 3, &mut out, SystemTime::UNIX_EPOCH);
        assert_eq!(read, 0);
        assert_eq!(missing, vec![(0, 3)]);
    }

    #[test]
    fn fake_page_cache_rejects_stale_entries() {
        let cache = FakePageCache::new();
        let cached_at = SystemTime::now();
        cache.put("a", vec![1, 2, 3], cached_at);
        let mtime_since = cached_at + std::time::Duration::from_secs(60);
        let mut out = [0u8; 3];
        let (read, missing) = cache.read("a", 0, 3, &mut out, mtime_since);
        assert_eq!(read, 0);
        assert_eq!(missing, vec![(0, 3)]);
    }

    #[test]
    fn fake_page_cache_reports_short_read() {
        let cache = FakePageCache::new();
        cache.put("a", vec![1, 2, 3], SystemTime::now());
        let mut out = [0u8; 5];
        let (read, missing) = cache.read("a", 0, 5, &mut out, SystemTime::UNIX_EPOCH);
        assert_eq!(read, 3);
        assert_eq!(missing, vec![(3, 5)]);
    }
}
