//! LRU flyweight registry of cached metadata records (component D).
//!
//! The registry is the single strong owner of every live [`FileMetadata`]; every [`crate::entry::Entry`]
//! elsewhere only holds a weak reference. Eviction walks the recency list from the back (least
//! recently used) but skips any record still referenced from outside the registry — a file with
//! an open handle or an in-flight transfer is unfreeable even if it hasn't been touched recently.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::metadata::FileMetadata;

struct Inner {
    map: HashMap<String, Arc<FileMetadata>>,
    /// Recency order, most recently used at the front.
    order: Vec<String>,
    cap: usize,
}

impl Inner {
    fn touch(&mut self, path: &str) {
        if let Some(pos) = self.order.iter().position(|p| p == path) {
            let path = self.order.remove(pos);
            self.order.insert(0, path);
        }
    }

    fn untrack(&mut self, path: &str) {
        if let Some(pos) = self.order.iter().position(|p| p == path) {
            self.order.remove(pos);
        }
    }

    /// Evict least-recently-used records, skipping any still referenced elsewhere, until at
    /// least `needed` free slots exist or no more evictable records remain. Returns the number
    /// of records actually freed.
    fn make_room(&mut self, needed: usize) -> usize {
        let mut freed = 0;
        let mut idx = self.order.len();
        while freed < needed && idx > 0 {
            idx -= 1;
            let path = self.order[idx].clone();
            let Some(record) = self.map.get(&path) else {
                continue;
            };
            if Arc::strong_count(record) > 1 {
                continue;
            }
            self.map.remove(&path);
            self.order.remove(idx);
            freed += 1;
            debug!("meta registry evicted {path}");
        }
        freed
    }
}

/// A bounded, eviction-capable cache of [`FileMetadata`] keyed by path.
pub struct MetaRegistry {
    inner: Mutex<Inner>,
}

impl MetaRegistry {
    /// Construct an empty registry holding at most `cap` records.
    pub fn new(cap: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                order: Vec::new(),
                cap,
            }),
        }
    }

    /// Insert or replace a record, evicting older unreferenced records if over capacity.
    /// Returns the strong handle the registry now owns, or `None` if the registry is at capacity
    /// and no record could be evicted to make room (every cached record is still referenced).
    pub fn add(&self, metadata: FileMetadata) -> Option<Arc<FileMetadata>> {
        let mut inner = self.inner.lock();
        let path = metadata.path.clone();
        let record = Arc::new(metadata);

        if inner.map.contains_key(&path) {
            inner.untrack(&path);
        } else if inner.map.len() >= inner.cap && inner.make_room(1) == 0 {
            debug!("meta registry add({path}) refused, at capacity with nothing evictable");
            return None;
        }
        inner.map.insert(path.clone(), record.clone());
        inner.order.insert(0, path);
        Some(record)
    }

    /// Insert many records at once. Inserted in reverse so that, after insertion, `records[0]`
    /// ends up most-recently-used — matching a caller that lists them oldest-first. Records that
    /// could not be added (capacity exhausted, nothing evictable) are silently dropped from the
    /// returned list rather than failing the whole batch.
    pub fn add_batch(&self, records: Vec<FileMetadata>) -> Vec<Arc<FileMetadata>> {
        let mut handles: Vec<_> = records.into_iter().rev().filter_map(|m| self.add(m)).collect();
        handles.reverse();
        handles
    }

    /// Fetch a record, promoting it to most-recently-used.
    pub fn get(&self, path: &str) -> Option<Arc<FileMetadata>> {
        let mut inner = self.inner.lock();
        let record = inner.map.get(path).cloned();
        if record.is_some() {
            inner.touch(path);
        }
        record
    }

    /// Check for a record's presence without affecting recency order.
    pub fn has(&self, path: &str) -> bool {
        self.inner.lock().map.contains_key(path)
    }

    /// Remove and return a record, if present.
    pub fn erase(&self, path: &str) -> Option<Arc<FileMetadata>> {
        let mut inner = self.inner.lock();
        inner.untrack(path);
        inner.map.remove(path)
    }

    /// Drop every cached record.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.map.clear();
        inner.order.clear();
    }

    /// Rename a cached record's key in place, preserving its recency position. Returns `false`
    /// if `old_path` was not cached.
    pub fn rename(&self, old_path: &str, new_path: &str) -> bool {
        let mut inner = self.inner.lock();
        let Some(record) = inner.map.remove(old_path) else {
            return false;
        };
        let renamed = FileMetadata {
            path: new_path.to_string(),
            ..(*record).clone()
        };
        if let Some(pos) = inner.order.iter().position(|p| p == old_path) {
            inner.order[pos] = new_path.to_string();
        }
        inner.map.insert(new_path.to_string(), Arc::new(renamed));
        true
    }

    /// Pure capacity query: whether `additional` more records would fit without exceeding
    /// capacity. Never evicts anything — a caller probing capacity before deciding whether to
    /// proceed must not have that probe itself destroy cache entries.
    pub fn has_free_space(&self, additional: usize) -> bool {
        let inner = self.inner.lock();
        inner.map.len() + additional <= inner.cap
    }

    /// Number of records currently cached.
    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    /// Whether the registry currently holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
