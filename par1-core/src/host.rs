//! `HostServices`: the dependency-injection surface that replaces the
//! original engine's module-level application state (a registry handle,
//! a singleton app object, a background-thread progress poller). A pass
//! takes one `HostServices` and is otherwise free of global state.

use crate::cache::CacheHandle;

/// Synchronous progress callback: `(tag, percent) -> continue?`. Returning
/// `false` is a cancellation request, checked at every chunk boundary.
pub type ProgressFn<'a> = dyn FnMut(&str, u8) -> bool + 'a;

pub struct HostServices<'a> {
    /// Caps the per-buffer working chunk size for encode/decode passes.
    pub working_memory_bytes: u64,
    /// Enables double-buffered prefetch in the chunk reader.
    pub overlapped_io: bool,
    pub progress: Box<ProgressFn<'a>>,
    pub classification_cache: Option<CacheHandle>,
    warned_unknown_status_bits: bool,
}

impl<'a> HostServices<'a> {
    pub fn new(working_memory_bytes: u64, overlapped_io: bool, progress: Box<ProgressFn<'a>>) -> Self {
        HostServices {
            working_memory_bytes,
            overlapped_io,
            progress,
            classification_cache: None,
            warned_unknown_status_bits: false,
        }
    }

    pub fn with_cache(mut self, cache: CacheHandle) -> Self {
        self.classification_cache = Some(cache);
        self
    }

    /// Reports progress; returns `true` to continue, `false` if the host
    /// requested cancellation.
    pub fn tick(&mut self, tag: &str, percent: u8) -> bool {
        (self.progress)(tag, percent)
    }

    /// Warn exactly once per loaded set about unknown status-field bits
    /// (Open Question #1: masked to bit 0 on read, warned on first sight).
    pub fn warn_unknown_status_bits_once(&mut self) {
        if !self.warned_unknown_status_bits {
            (self.progress)("warn", 0);
            self.warned_unknown_status_bits = true;
        }
    }

    /// The working chunk size for a pass: a multiple of 64 KiB, bounded by
    /// `working_memory_bytes` and by the largest file size `l` involved.
    pub fn working_chunk_size(&self, l: u64) -> usize {
        const UNIT: u64 = crate::reader::CHUNK_SIZE as u64;
        let budget = self.working_memory_bytes.max(UNIT);
        let capped = budget.min(l.max(UNIT));
        let units = (capped / UNIT).max(1);
        (units * UNIT) as usize
    }
}

/// A host with progress disabled (always continues) and overlapped I/O
/// off, for tests and simple callers.
pub fn silent_host<'a>(working_memory_bytes: u64) -> HostServices<'a> {
    HostServices::new(working_memory_bytes, false, Box::new(|_tag: &str, _pct: u8| true))
}
