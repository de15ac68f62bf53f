//! In-memory data plane for a userspace filesystem backed by an object store.
//!
//! This crate owns the parts of such a filesystem that never touch the kernel: a concurrent
//! directory tree, an LRU metadata cache, pools of reusable buffers and worker threads, a
//! streaming byte buffer, and a parallel transfer engine that slices large objects into parts and
//! drives them through an [`object_client::ObjectClient`] collaborator. Wiring this crate up to an
//! actual kernel-facing bridge (FUSE, NFS, or anything else) is deliberately out of scope.

pub mod buffer_pool;
pub mod config;
pub mod directory_tree;
pub mod entry;
pub mod error;
pub mod meta_registry;
pub mod metadata;
pub mod node;
pub mod object_client;
pub mod stream;
pub mod transfer;
pub mod worker_pool;

pub use buffer_pool::BufferPool;
pub use config::EngineConfig;
pub use directory_tree::DirectoryTree;
pub use entry::Entry;
pub use error::{ErrorKind, ObjectFsError, Result};
pub use meta_registry::MetaRegistry;
pub use metadata::{FileMetadata, FileType};
pub use node::Node;
pub use object_client::{ObjectClient, PageCache};
pub use stream::{IoStream, StreamBuffer};
pub use transfer::{Direction, Part, TransferEngine, TransferHandle, TransferStatus, WriteSeek};
pub use worker_pool::{TaskHandle, WorkerPool, WorkerPoolRegistry};
