//! Weak-handle wrapper over a cached metadata record.

use std::sync::{Arc, Weak};

use crate::metadata::{FileMetadata, FileType};

/// A thin handle holding a weak reference to a metadata record.
///
/// An entry never keeps a metadata record alive on its own. Every attribute read dereferences the
/// weak reference fresh; there is no cached copy of the path or file type. Once the backing record
/// is gone the entry is inoperable and every accessor reports `None`.
#[derive(Clone)]
pub struct Entry {
    metadata: Weak<FileMetadata>,
}

impl Entry {
    /// Construct an entry over a strongly-held metadata record.
    pub fn new(metadata: &Arc<FileMetadata>) -> Self {
        Self {
            metadata: Arc::downgrade(metadata),
        }
    }

    /// Construct an entry with no backing record at all. Always inoperable.
    pub fn placeholder() -> Self {
        Self {
            metadata: Weak::new(),
        }
    }

    /// Whether the backing record still resolves to a live path.
    pub fn is_operable(&self) -> bool {
        self.metadata.upgrade().is_some_and(|m| !m.path.is_empty())
    }

    /// Attempt to upgrade to the live metadata record; `None` if it has been evicted.
    pub fn metadata(&self) -> Option<Arc<FileMetadata>> {
        self.metadata.upgrade()
    }

    /// The path the backing record reports, or `None` if inoperable.
    pub fn path(&self) -> Option<String> {
        self.metadata().map(|m| m.path.clone())
    }

    /// Whether this entry is a directory, or `None` if inoperable.
    pub fn is_directory(&self) -> Option<bool> {
        self.metadata().map(|m| m.is_directory())
    }

    /// The kind of entry this is, or `None` if inoperable.
    pub fn file_type(&self) -> Option<FileType> {
        self.metadata().map(|m| m.file_type)
    }

    /// Whether the backing metadata record is still live.
    pub fn is_live(&self) -> bool {
        self.metadata.strong_count() > 0
    }

    /// Rebind this entry to a freshly re-cached metadata record.
    pub fn rebind(&mut self, metadata: &Arc<FileMetadata>) {
        self.metadata = Arc::downgrade(metadata);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_metadata_upgrades_while_alive() {
        let meta = Arc::new(FileMetadata::new_file("/a", 10, 0o644));
        let entry = Entry::new(&meta);
        assert!(entry.is_live());
        assert_eq!(entry.path().as_deref(), Some("/a"));
        assert_eq!(entry.is_directory(), Some(false));
    }

    #[test]
    fn entry_inoperable_after_eviction() {
        let meta = Arc::new(FileMetadata::new_file("/a", 10, 0o644));
        let entry = Entry::new(&meta);
        drop(meta);
        assert!(!entry.is_live());
        assert!(!entry.is_operable());
        assert!(entry.metadata().is_none());
        assert_eq!(entry.path(), None);
        assert_eq!(entry.is_directory(), None);
    }

    #[test]
    fn placeholder_entry_is_inoperable() {
        let entry = Entry::placeholder();
        assert!(!entry.is_operable());
        assert_eq!(entry.metadata().map(|_| ()), None);
    }

    #[test]
    fn rebind_points_at_a_fresh_record() {
        let first = Arc::new(FileMetadata::new_file("/a", 1, 0o644));
        let mut entry = Entry::new(&first);
        drop(first);
        assert!(!entry.is_operable());

        let second = Arc::new(FileMetadata::new_file("/a", 2, 0o644));
        entry.rebind(&second);
        assert!(entry.is_operable());
        assert_eq!(entry.metadata().unwrap().size, 2);
    }
}
