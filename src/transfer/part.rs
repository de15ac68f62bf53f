//! A single slice of a multipart transfer (§3, §4.F).

/// One contiguous byte range of a larger transfer, tracked independently so it can be retried
/// without disturbing its siblings.
#[derive(Debug, Clone)]
pub struct Part {
    /// 1-based part number, matching the numbering object stores expect for multipart uploads.
    pub part_number: u64,
    /// Offset of this part's first byte within the overall transfer.
    pub range_start: u64,
    /// Number of bytes this part covers.
    pub size: u64,
    /// Entity tag returned once this part's data has been durably stored, if any.
    pub etag: Option<String>,
    /// High-water mark of bytes observed transferred for this part across every attempt.
    best_progress: u64,
}

impl Part {
    /// Construct a new, not-yet-attempted part.
    pub fn new(part_number: u64, range_start: u64, size: u64) -> Self {
        Self {
            part_number,
            range_start,
            size,
            etag: None,
            best_progress: 0,
        }
    }

    /// Offset one past this part's last byte.
    pub fn range_end(&self) -> u64 {
        self.range_start + self.size
    }

    /// Bytes of progress credited to this part so far.
    pub fn progress(&self) -> u64 {
        self.best_progress
    }

    /// Whether every byte of this part has been accounted for.
    pub fn is_complete(&self) -> bool {
        self.best_progress >= self.size
    }

    /// Record a cumulative progress reading from the in-flight attempt and return how many *new*
    /// bytes it represents relative to the best progress seen so far.
    ///
    /// A retried attempt restarts its own cumulative counter from zero, so comparing against the
    /// high-water mark (rather than summing deltas blindly) keeps a retry from double-counting
    /// bytes a previous, abandoned attempt already reported.
    pub fn on_data_transferred(&mut self, cumulative: u64) -> u64 {
        let cumulative = cumulative.min(self.size);
        if cumulative > self.best_progress {
            let delta = cumulative - self.best_progress;
            self.best_progress = cumulative;
            delta
        } else {
            0
        }
    }

    /// Mark the part complete with the object store's entity tag.
    pub fn complete(&mut self, etag: impl Into<String>) {
        self.best_progress = self.size;
        self.etag = Some(etag.into());
    }

    /// Reset this part back to not-yet-attempted, discarding any progress or entity tag. Used
    /// when a part moves to the failed map for good, and when a failed transfer is reset for
    /// retry.
    pub fn reset_progress(&mut self) {
        self.best_progress = 0;
        self.etag = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_is_monotonic_across_retries() {
        let mut part = Part::new(1, 0, 100);
        assert_eq!(part.on_data_transferred(40), 40);
        assert_eq!(part.progress(), 40);
        // Retry restarts its own counter from zero; no new bytes credited until it passes 40.
        assert_eq!(part.on_data_transferred(10), 0);
        assert_eq!(part.progress(), 40);
        assert_eq!(part.on_data_transferred(100), 60);
        assert!(part.is_complete());
    }

    #[test]
    fn progress_never_exceeds_size() {
        let mut part = Part::new(1, 0, 50);
        assert_eq!(part.on_data_transferred(500), 50);
        assert_eq!(part.progress(), 50);
    }

    #[test]
    fn reset_progress_clears_progress_and_etag() {
        let mut part = Part::new(1, 0, 50);
        part.complete("etag-1");
        part.reset_progress();
        assert_eq!(part.progress(), 0);
        assert!(part.etag.is_none());
        assert!(!part.is_complete());
    }
}
