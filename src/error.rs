//! Structured error taxonomy for the crate.
//!
//! `fuser` itself reports failures as raw `io::Error`/`Errno` values, since it sits right at the
//! kernel boundary. This crate sits a layer further from the kernel and talks to an object store
//! collaborator instead, so it needs a small typed error enum at the few seams where a `Result`
//! genuinely escapes a component (buffer pool shutdown, configuration validation). Everywhere else
//! errors are folded into a `TransferHandle`'s status and `last_error`, never propagated.

use std::fmt;

/// The structured error kinds that can cross a component boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// A single-part upload has no corresponding in-flight upload to retry against.
    NoSuchUpload,
    /// A multipart upload has no corresponding in-flight multipart id to retry against.
    NoSuchMultipartUpload,
    /// A multipart download has no corresponding in-flight handle to retry against.
    NoSuchMultipartDownload,
    /// The buffer pool has been shut down; no further buffers will ever be handed out.
    PoolShutdown,
    /// A passthrough error reported by the `ObjectClient` collaborator.
    ObjectClient {
        /// Whether the caller may reasonably retry the operation.
        retryable: bool,
    },
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::NoSuchUpload => write!(f, "no such upload"),
            ErrorKind::NoSuchMultipartUpload => write!(f, "no such multipart upload"),
            ErrorKind::NoSuchMultipartDownload => write!(f, "no such multipart download"),
            ErrorKind::PoolShutdown => write!(f, "buffer pool is shut down"),
            ErrorKind::ObjectClient { retryable } => {
                write!(f, "object client error (retryable: {retryable})")
            }
        }
    }
}

/// The crate's structured error type: a kind plus a human-readable message.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ObjectFsError {
    /// The structured kind of failure.
    pub kind: ErrorKind,
    /// A human-readable message, typically forwarded from the object client.
    pub message: String,
}

impl ObjectFsError {
    /// Construct a new error from a kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Whether this error is reasonable to retry.
    pub fn retryable(&self) -> bool {
        matches!(self.kind, ErrorKind::ObjectClient { retryable: true })
    }
}

pub type Result<T> = std::result::Result<T, ObjectFsError>;
