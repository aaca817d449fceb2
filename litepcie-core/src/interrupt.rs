use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::bar::Bar;
use crate::counts::DmaCounts;
use crate::regs::{control, decode_loop_status, engine};
use crate::Result;

/// Per-channel bit positions in `MSI_VECTOR` and CSR base address, as configured at channel
/// `init` time.
#[derive(Debug, Clone, Copy)]
pub struct ChannelInterruptConfig {
    pub base_address: u32,
    pub reader_bit: u32,
    pub writer_bit: u32,
}

/// Extends a wrapping `{index:16, count:16}` loop-status sample to a monotonic 64-bit total.
///
/// `buffer_count` (`N`) must be a power of two dividing `0x10000`; the `prev`/`raw` comparison
/// below is exactly the arithmetic in the driver's design notes, with the one correction noted
/// there: `raw = index * N + count`, not `index * N + index`.
pub fn reconstruct_delta(prev_raw: u32, raw: u32, buffer_count: u32) -> u64 {
    let prev = u64::from(prev_raw);
    let raw = u64::from(raw);
    let modulus = u64::from(buffer_count) * 0x1_0000;
    if raw >= prev {
        raw - prev
    } else {
        (modulus - prev) + raw
    }
}

pub fn raw_from_loop_status(status: u32, buffer_count: u32) -> u32 {
    let (index, count) = decode_loop_status(status);
    u32::from(index) * buffer_count + u32::from(count)
}

/// Demultiplexes `MSI_VECTOR`, reconstructs each asserted channel's monotonic counters, publishes
/// them, and acknowledges via `MSI_CLEAR`. One instance is shared by the single interrupt
/// dispatch context the concurrency model assumes (§5): `handle` is `&self`, not `&mut self`,
/// because all of its mutable state lives in the `DmaCounts` atomics it publishes to.
pub struct InterruptHandler {
    buffer_count: u32,
    interrupt_count: AtomicU64,
    started_at: Instant,
}

impl InterruptHandler {
    pub fn new(buffer_count: u32) -> Self {
        Self {
            buffer_count,
            interrupt_count: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Services one MSI: reads the vector, updates every asserted channel's counters, clears.
    ///
    /// `channels[i]` and `counts[i]` must correspond to the same channel index. A failure reading
    /// or writing a register is logged and the vector is still cleared, matching the policy that
    /// a handler failure must never be returned (§7): a storm from a stuck vector is worse than a
    /// missed count update.
    pub fn handle(
        &self,
        bar: &dyn Bar,
        channels: &[ChannelInterruptConfig],
        counts: &[&DmaCounts],
    ) -> Result<()> {
        debug_assert_eq!(channels.len(), counts.len());

        let vector = bar.read32(control::MSI_VECTOR).unwrap_or_else(|err| {
            tracing::error!(?err, "failed to read MSI_VECTOR; no engines will be serviced this interrupt");
            0
        });

        let mut cleared = 0u32;
        for (channel, counts) in channels.iter().zip(counts.iter()) {
            if vector & (1 << channel.reader_bit) != 0 {
                self.service_engine(bar, channel.base_address + crate::regs::channel::READER, |raw| {
                    let prev = counts.reader_prev();
                    let delta = reconstruct_delta(prev, raw, self.buffer_count);
                    counts.publish_reader(raw, counts.reader_total() + delta);
                })
                .unwrap_or_else(|err| tracing::error!(?err, "reader engine update failed"));
                cleared |= 1 << channel.reader_bit;
            }
            if vector & (1 << channel.writer_bit) != 0 {
                self.service_engine(bar, channel.base_address + crate::regs::channel::WRITER, |raw| {
                    let prev = counts.writer_prev();
                    let delta = reconstruct_delta(prev, raw, self.buffer_count);
                    counts.publish_writer(raw, counts.writer_total() + delta);
                })
                .unwrap_or_else(|err| tracing::error!(?err, "writer engine update failed"));
                cleared |= 1 << channel.writer_bit;
            }
        }

        self.log_rate_if_due();

        if let Err(err) = bar.write32(control::MSI_CLEAR, cleared) {
            tracing::error!(?err, "failed to write MSI_CLEAR");
        }
        Ok(())
    }

    fn service_engine(&self, bar: &dyn Bar, engine_base: u32, apply: impl FnOnce(u32)) -> Result<()> {
        let status = bar.read32(engine_base + engine::TABLE_LOOP_STATUS)?;
        let raw = raw_from_loop_status(status, self.buffer_count);
        apply(raw);
        Ok(())
    }

    fn log_rate_if_due(&self) {
        let count = self.interrupt_count.fetch_add(1, Ordering::Relaxed) + 1;
        if count % 4096 == 0 {
            let elapsed = self.started_at.elapsed().as_secs_f64();
            let rate = if elapsed > 0.0 { count as f64 / elapsed } else { 0.0 };
            tracing::debug!(interrupts = count, elapsed, rate, "interrupt rate sample");
        }
    }
}
