//! File metadata records (§3).

use std::time::SystemTime;

#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// The kind of filesystem object a [`FileMetadata`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum FileType {
    /// A regular file with object-store-backed content.
    File,
    /// A directory: an internal node of the tree, never itself transferred.
    Directory,
    /// A symbolic link; `link_target` on [`FileMetadata`] carries the target path.
    Symlink,
}

/// Metadata describing a single filesystem entry.
///
/// This is the record the [`crate::meta_registry::MetaRegistry`] caches and evicts; it carries
/// no tree-position information of its own (that lives in [`crate::node::Node`]).
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct FileMetadata {
    /// The full path this record describes, used as the registry's key.
    pub path: String,
    /// File size in bytes. Always 0 for directories.
    pub size: u64,
    /// What kind of object this is.
    pub file_type: FileType,
    #[cfg_attr(feature = "serializable", serde(skip, default = "SystemTime::now"))]
    /// Last-modified time as reported by the object store, or creation time for new entries.
    pub mtime: SystemTime,
    /// Unix permission bits, as presented to the filesystem layer.
    pub mode: u32,
    /// Entity tag / version token from the object store, used to detect stale cache entries.
    pub etag: Option<String>,
    /// Target path for a symlink; `None` for files and directories.
    pub link_target: Option<String>,
}

impl FileMetadata {
    /// Construct metadata for a regular file.
    pub fn new_file(path: impl Into<String>, size: u64, mode: u32) -> Self {
        Self {
            path: path.into(),
            size,
            file_type: FileType::File,
            mtime: SystemTime::now(),
            mode,
            etag: None,
            link_target: None,
        }
    }

    /// Construct metadata for a directory.
    pub fn new_directory(path: impl Into<String>, mode: u32) -> Self {
        Self {
            path: path.into(),
            size: 0,
            file_type: FileType::Directory,
            mtime: SystemTime::now(),
            mode,
            etag: None,
            link_target: None,
        }
    }

    /// Construct metadata for a symlink.
    pub fn new_symlink(path: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            size: 0,
            file_type: FileType::Symlink,
            mtime: SystemTime::now(),
            mode: 0o777,
            etag: None,
            link_target: Some(target.into()),
        }
    }

    /// Whether this record describes a directory.
    pub fn is_directory(&self) -> bool {
        self.file_type == FileType::Directory
    }
}
