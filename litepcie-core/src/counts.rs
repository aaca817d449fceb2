use std::sync::atomic::{AtomicU64, Ordering};

/// The shared `DMA_COUNTS` page: four monotonic 64-bit counters, written only by the interrupt
/// handler (`hw_*`) and read by the user-space consumer. No field here is ever written by more
/// than one side, so plain atomics with release/acquire ordering are sufficient -- no locking.
#[derive(Debug, Default)]
#[repr(C)]
pub struct DmaCounts {
    pub hw_reader_count_total: AtomicU64,
    pub hw_reader_count_prev: AtomicU64,
    pub hw_writer_count_total: AtomicU64,
    pub hw_writer_count_prev: AtomicU64,
}

impl DmaCounts {
    pub const SIZE_BYTES: usize = 32;

    pub fn new() -> Self {
        Self::default()
    }

    /// Resets all four counters to zero. Called when an engine (re)starts.
    pub fn reset_reader(&self) {
        self.hw_reader_count_total.store(0, Ordering::Release);
        self.hw_reader_count_prev.store(0, Ordering::Release);
    }

    pub fn reset_writer(&self) {
        self.hw_writer_count_total.store(0, Ordering::Release);
        self.hw_writer_count_prev.store(0, Ordering::Release);
    }

    /// Called by the interrupt handler once it has reconstructed a new monotonic total for the
    /// reader engine.
    pub fn publish_reader(&self, prev_raw: u32, total: u64) {
        self.hw_reader_count_prev.store(u64::from(prev_raw), Ordering::Relaxed);
        self.hw_reader_count_total.store(total, Ordering::Release);
    }

    pub fn publish_writer(&self, prev_raw: u32, total: u64) {
        self.hw_writer_count_prev.store(u64::from(prev_raw), Ordering::Relaxed);
        self.hw_writer_count_total.store(total, Ordering::Release);
    }

    pub fn reader_total(&self) -> u64 {
        self.hw_reader_count_total.load(Ordering::Acquire)
    }

    pub fn writer_total(&self) -> u64 {
        self.hw_writer_count_total.load(Ordering::Acquire)
    }

    fn reader_prev_raw(&self) -> u32 {
        self.hw_reader_count_prev.load(Ordering::Relaxed) as u32
    }

    fn writer_prev_raw(&self) -> u32 {
        self.hw_writer_count_prev.load(Ordering::Relaxed) as u32
    }

    pub fn reader_prev(&self) -> u32 {
        self.reader_prev_raw()
    }

    pub fn writer_prev(&self) -> u32 {
        self.writer_prev_raw()
    }
}

const _: () = assert!(core::mem::size_of::<DmaCounts>() == DmaCounts::SIZE_BYTES);
