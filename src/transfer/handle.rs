//! Transfer status machine and the handle clients poll/wait on (component F).

use std::collections::HashMap;
use std::io::{self, Seek, SeekFrom, Write};

use log::{debug, warn};
use parking_lot::{Condvar, Mutex};

use crate::error::{ErrorKind, ObjectFsError, Result};
use crate::transfer::part::Part;

/// Whether a transfer moves bytes into the object store or out of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Data flows from a local source (typically the page cache) to the object store.
    Upload,
    /// Data flows from the object store to a caller-supplied output stream.
    Download,
}

/// The output side of a download: anything seekable and writable that a worker thread can park
/// behind a single lock and write parts into as they complete, in any order.
pub trait WriteSeek: Write + Seek + Send {}
impl<T: Write + Seek + Send> WriteSeek for T {}

/// The lifecycle of a transfer.
///
/// `Completed`, `Failed` and `Aborted` are terminal: once reached, the only further allowed
/// transition is `Cancelled -> Aborted`, which lets an in-flight cancellation finish draining
/// before the handle is considered fully settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// No part has started yet.
    NotStarted,
    /// At least one part is in flight.
    InProgress,
    /// Every part completed successfully.
    Completed,
    /// A cancellation was requested; in-flight parts are being drained.
    Cancelled,
    /// Cancellation finished draining; the transfer will not be retried.
    Aborted,
    /// A part failed with a non-retryable error, or retries were exhausted.
    Failed,
}

impl TransferStatus {
    /// Whether this status is terminal, i.e. no further work will happen on the transfer.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferStatus::Completed | TransferStatus::Aborted | TransferStatus::Failed
        )
    }

    fn allows_transition_to(self, next: TransferStatus) -> bool {
        use TransferStatus::*;
        match (self, next) {
            (NotStarted, InProgress) => true,
            (InProgress, Completed | Cancelled | Failed) => true,
            (Cancelled, Aborted) => true,
            _ => false,
        }
    }
}

struct Inner {
    status: TransferStatus,
    queued: HashMap<u64, Part>,
    pending: HashMap<u64, Part>,
    completed: HashMap<u64, Part>,
    failed: HashMap<u64, Part>,
    last_error: Option<ObjectFsError>,
    /// Opaque id of the in-flight multipart upload, kept so a retry reuses it rather than
    /// starting a second multipart upload against the store.
    multipart_id: Option<String>,
}

/// Handle to a single object transfer (upload or download), tracking every part's disposition.
pub struct TransferHandle {
    /// The object key being transferred.
    pub object_key: String,
    /// Total size of the transfer in bytes.
    pub total_size: u64,
    direction: Direction,
    inner: Mutex<Inner>,
    finished: Condvar,
    /// The download's output stream, and the lock that serializes writes to it across workers
    /// completing parts out of order. Held separately from `inner` so writing bytes never
    /// contends with status/part bookkeeping.
    output_stream: Mutex<Option<Box<dyn WriteSeek>>>,
}

impl TransferHandle {
    /// Construct a handle for a transfer sliced into `parts`, all initially queued.
    pub fn new(object_key: impl Into<String>, total_size: u64, parts: Vec<Part>, direction: Direction) -> Self {
        let queued = parts.into_iter().map(|p| (p.part_number, p)).collect();
        Self {
            object_key: object_key.into(),
            total_size,
            direction,
            inner: Mutex::new(Inner {
                status: TransferStatus::NotStarted,
                queued,
                pending: HashMap::new(),
                completed: HashMap::new(),
                failed: HashMap::new(),
                last_error: None,
                multipart_id: None,
            }),
            finished: Condvar::new(),
            output_stream: Mutex::new(None),
        }
    }

    /// Whether this handle is driving an upload or a download.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Current status.
    pub fn status(&self) -> TransferStatus {
        self.inner.lock().status
    }

    /// Whether this transfer is sliced into more than one part.
    pub fn is_multipart(&self) -> bool {
        let inner = self.inner.lock();
        inner.queued.len() + inner.pending.len() + inner.completed.len() + inner.failed.len() > 1
    }

    /// The most recent error recorded against this transfer, if any.
    pub fn last_error(&self) -> Option<ObjectFsError> {
        self.inner.lock().last_error.clone()
    }

    /// Attempt a status transition, rejecting it if not allowed from the current state.
    pub fn update_status(&self, next: TransferStatus) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            if !inner.status.allows_transition_to(next) {
                return Err(ObjectFsError::new(
                    ErrorKind::NoSuchUpload,
                    format!("illegal transfer status transition {:?} -> {next:?}", inner.status),
                ));
            }
            debug!("transfer {} {:?} -> {next:?}", self.object_key, inner.status);
            inner.status = next;
            if next.is_terminal() {
                self.finished.notify_all();
            }
        }
        if next == TransferStatus::Completed {
            self.release_output_stream();
        }
        Ok(())
    }

    /// Attach the output stream a download writes completed parts into.
    pub fn set_output_stream(&self, stream: Box<dyn WriteSeek>) {
        *self.output_stream.lock() = Some(stream);
    }

    /// Seek the output stream to `range_start` and write `data`, serialized against every other
    /// part writer by the same lock [`TransferHandle::release_output_stream`] uses.
    pub fn write_output(&self, range_start: u64, data: &[u8]) -> io::Result<()> {
        let mut guard = self.output_stream.lock();
        let Some(stream) = guard.as_mut() else {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "no output stream attached to this transfer",
            ));
        };
        stream.seek(SeekFrom::Start(range_start))?;
        stream.write_all(data)
    }

    /// Release and drop the output stream, so a caller's writer isn't held open past the
    /// transfer's own lifetime. Called automatically once the handle reaches `Completed`.
    fn release_output_stream(&self) -> Option<Box<dyn WriteSeek>> {
        self.output_stream.lock().take()
    }

    /// The in-flight multipart upload id, if one has been created.
    pub fn multipart_id(&self) -> Option<String> {
        self.inner.lock().multipart_id.clone()
    }

    /// Record the multipart upload id created for this transfer.
    pub fn set_multipart_id(&self, id: String) {
        self.inner.lock().multipart_id = Some(id);
    }

    /// Move the next queued part to pending, for a worker to start on. Returns `None` once the
    /// queue is empty.
    pub fn take_next_part(&self) -> Option<Part> {
        let mut inner = self.inner.lock();
        let part_number = *inner.queued.keys().min()?;
        let part = inner.queued.remove(&part_number)?;
        inner.pending.insert(part_number, part.clone());
        Some(part)
    }

    /// Mark a pending part complete.
    pub fn complete_part(&self, part: Part) {
        let mut inner = self.inner.lock();
        inner.pending.remove(&part.part_number);
        inner.completed.insert(part.part_number, part);
    }

    /// Mark a pending part failed, recording the error and requeuing it for retry, unless
    /// `retryable` is false, in which case its progress is reset and it moves to the failed map
    /// for good (a half-finished progress reading from the doomed attempt must not linger as if
    /// it still counted).
    pub fn fail_part(&self, mut part: Part, error: ObjectFsError, retryable: bool) {
        let mut inner = self.inner.lock();
        inner.pending.remove(&part.part_number);
        inner.last_error = Some(error.clone());
        if retryable {
            warn!(
                "transfer {} part {} failed, retrying: {error}",
                self.object_key, part.part_number
            );
            inner.queued.insert(part.part_number, part);
        } else {
            warn!(
                "transfer {} part {} failed permanently: {error}",
                self.object_key, part.part_number
            );
            part.reset_progress();
            inner.failed.insert(part.part_number, part);
        }
    }

    /// Whether every part has completed.
    pub fn all_parts_complete(&self) -> bool {
        let inner = self.inner.lock();
        inner.queued.is_empty() && inner.pending.is_empty() && inner.failed.is_empty()
    }

    /// Sum of every part's accounted progress.
    pub fn total_progress(&self) -> u64 {
        let inner = self.inner.lock();
        inner
            .queued
            .values()
            .chain(inner.pending.values())
            .chain(inner.completed.values())
            .chain(inner.failed.values())
            .map(Part::progress)
            .sum()
    }

    /// Completed parts in part-number order, for building a `CompleteMultipartUpload` request.
    pub fn completed_parts(&self) -> Vec<Part> {
        let inner = self.inner.lock();
        let mut parts: Vec<_> = inner.completed.values().cloned().collect();
        parts.sort_by_key(|p| p.part_number);
        parts
    }

    /// Request cancellation. Valid from `NotStarted` or `InProgress`.
    pub fn cancel(&self) -> Result<()> {
        self.update_status(TransferStatus::Cancelled)
    }

    /// Reset a `Failed` handle for retry: failed (and any stray pending) parts are reset to
    /// not-yet-attempted and requeued, the last error is cleared, and status returns to
    /// `NotStarted`. Does not apply to `Aborted` handles — a cancelled-and-drained transfer
    /// starts over with a brand new handle instead, never reuses this one.
    pub fn reset_for_retry(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.status != TransferStatus::Failed {
            return Err(ObjectFsError::new(
                ErrorKind::NoSuchUpload,
                format!("cannot retry a transfer in {:?} state", inner.status),
            ));
        }
        let mut to_requeue: Vec<Part> = inner.failed.drain().map(|(_, p)| p).collect();
        to_requeue.extend(inner.pending.drain().map(|(_, p)| p));
        for mut part in to_requeue {
            part.reset_progress();
            inner.queued.insert(part.part_number, part);
        }
        inner.last_error = None;
        inner.status = TransferStatus::NotStarted;
        Ok(())
    }

    /// Block until the transfer reaches a terminal status (or `Aborted`, following a
    /// cancellation), returning the final status.
    pub fn wait_until_finished(&self) -> TransferStatus {
        let mut inner = self.inner.lock();
        loop {
            if inner.status.is_terminal() {
                return inner.status;
            }
            self.finished.wait(&mut inner);
        }
    }
}
