//! Builder-style configuration surface for the transfer engine.
//!
//! Configuration *loading* (files, env vars, CLI flags) is out of scope for the core; this is just
//! the in-process surface a bridge process fills in and validates, the same role
//! `session_mt::SessionConfig` plays for `fuser`'s worker-thread count.

use std::io;

/// Default multipart threshold: uploads at or above this size use multipart.
const DEFAULT_MULTIPART_THRESHOLD: u64 = 16 * 1024 * 1024;

/// Default floor for a part's size; the last two parts are averaged to avoid falling below it.
const DEFAULT_MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Default worker thread count.
const DEFAULT_WORKER_COUNT: usize = 8;

/// Default registry cap (number of cached metadata records).
const DEFAULT_REGISTRY_CAP: usize = 1_000_000;

/// Configuration for the transfer engine and its collaborators.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// The buffer capacity `B` used to slice transfers into parts.
    pub part_size: u64,
    /// Total size below which an upload stays single-part.
    pub multipart_threshold: u64,
    /// Floor below which the last two upload parts are averaged together.
    pub min_part_size: u64,
    /// Number of worker threads backing the transfer engine's worker pool.
    pub worker_count: usize,
    /// Maximum number of metadata records the registry will hold.
    pub registry_cap: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            part_size: page_size::get() as u64 * 2048,
            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD,
            min_part_size: DEFAULT_MIN_PART_SIZE,
            worker_count: DEFAULT_WORKER_COUNT,
            registry_cap: DEFAULT_REGISTRY_CAP,
        }
    }
}

impl EngineConfig {
    /// Start from the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the part size.
    pub fn part_size(mut self, part_size: u64) -> Self {
        self.part_size = part_size;
        self
    }

    /// Set the multipart threshold.
    pub fn multipart_threshold(mut self, threshold: u64) -> Self {
        self.multipart_threshold = threshold;
        self
    }

    /// Set the minimum part size.
    pub fn min_part_size(mut self, min_part_size: u64) -> Self {
        self.min_part_size = min_part_size;
        self
    }

    /// Set the worker thread count.
    pub fn worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Set the metadata registry cap.
    pub fn registry_cap(mut self, registry_cap: usize) -> Self {
        self.registry_cap = registry_cap;
        self
    }

    /// Validate the configuration, the way `SessionConfig::validate` rejects a zero thread count.
    pub fn validate(&self) -> io::Result<()> {
        if self.worker_count == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "worker_count must be at least 1",
            ));
        }
        if self.registry_cap == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "registry_cap must be at least 1",
            ));
        }
        if self.part_size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "part_size must be at least 1",
            ));
        }
        Ok(())
    }
}
