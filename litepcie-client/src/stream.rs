use litepcie_core::dispatcher::{Dispatcher, Request};

use crate::error::Result;
use crate::mmap::MappedRegions;

/// Hysteresis margin below which the writer path holds off handing out more buffers, to avoid
/// racing the interrupt handler mid-update (§4.5).
const WRITER_HYSTERESIS: u64 = 2;

/// User-space ring view over one channel's mapped regions: tracks `sw_reader_count` and
/// `sw_writer_count`, and hands out the next buffer pointer in each direction.
///
/// Exactly one consumer drives this per channel (§5); nothing here is `Sync`, and nothing needs
/// to be -- the hardware counters it reads are the only cross-thread-visible state, and those are
/// plain atomics on the other side of `MappedRegions::counts`.
pub struct StreamHelper<'a> {
    regions: MappedRegions,
    dispatcher: &'a mut Dispatcher<'a>,
    channel: u32,
    buffer_count: u32,

    reader_engaged: bool,
    writer_engaged: bool,

    sw_reader_count: u64,
    sw_writer_count: u64,

    buffers_available_read: u64,
    buffers_available_write: u64,
    usr_read_buf_offset: u64,
    usr_write_buf_offset: u64,

    overrun_count: u64,
}

impl<'a> StreamHelper<'a> {
    pub fn new(dispatcher: &'a mut Dispatcher<'a>, channel: u32, buffer_count: u32) -> Result<Self> {
        let regions = MappedRegions::from_dispatcher(dispatcher, channel)?;
        Ok(Self {
            regions,
            dispatcher,
            channel,
            buffer_count,
            reader_engaged: false,
            writer_engaged: false,
            sw_reader_count: 0,
            sw_writer_count: 0,
            buffers_available_read: 0,
            buffers_available_write: 0,
            usr_read_buf_offset: 0,
            usr_write_buf_offset: 0,
            overrun_count: 0,
        })
    }

    pub fn overrun_count(&self) -> u64 {
        self.overrun_count
    }

    pub fn buffers_available_read(&self) -> u64 {
        self.buffers_available_read
    }

    pub fn buffers_available_write(&self) -> u64 {
        self.buffers_available_write
    }

    /// Called by the consumer in its event loop. Enables the engines on first call, then updates
    /// the available-buffer counts from the hardware/software counter pair (§4.5).
    pub fn process(&mut self) -> Result<()> {
        if !self.reader_engaged {
            self.dispatcher
                .dispatch(Request::ConfigDmaReaderChannel { channel: self.channel, enable: true })?;
            self.reader_engaged = true;
        }
        if !self.writer_engaged {
            self.dispatcher
                .dispatch(Request::ConfigDmaWriterChannel { channel: self.channel, enable: true })?;
            self.writer_engaged = true;
        }

        self.process_writer_path();
        self.process_reader_path();
        Ok(())
    }

    fn process_writer_path(&mut self) {
        // SAFETY: `counts` outlives `self` (see MappedRegions docs); reads use Acquire ordering.
        let counts = unsafe { &*self.regions.counts };
        let hw_total = counts.writer_total();

        let lag = hw_total.saturating_sub(self.sw_writer_count);
        if lag > u64::from(self.buffer_count) {
            // Overrun: the handler outran us by more than a full ring. Skip ahead to the oldest
            // still-valid buffer; some buffers are lost, the ring stays consistent (§4.5).
            self.overrun_count += 1;
            self.sw_writer_count = hw_total - u64::from(self.buffer_count);
        }

        let lag = hw_total.saturating_sub(self.sw_writer_count);
        if lag > WRITER_HYSTERESIS {
            self.buffers_available_read = lag.min(u64::from(self.buffer_count));
            self.usr_read_buf_offset = self.sw_writer_count % u64::from(self.buffer_count);
            self.sw_writer_count += self.buffers_available_read;
        } else {
            self.buffers_available_read = 0;
        }
    }

    fn process_reader_path(&mut self) {
        // SAFETY: see process_writer_path.
        let counts = unsafe { &*self.regions.counts };
        let hw_total = counts.reader_total();

        let ahead = self.sw_reader_count.saturating_sub(hw_total);
        if ahead < u64::from(self.buffer_count) / 2 {
            let room = u64::from(self.buffer_count).saturating_sub(ahead);
            self.buffers_available_write = room.min(u64::from(self.buffer_count));
            self.usr_write_buf_offset = self.sw_reader_count % u64::from(self.buffer_count);
            self.sw_reader_count += self.buffers_available_write;
        } else {
            self.buffers_available_write = 0;
        }
    }

    /// Returns the next writer-side (device->host) buffer to read, or `None` if `process()` has
    /// not made one available.
    pub fn next_read_buffer(&mut self) -> Option<&[u8]> {
        if self.buffers_available_read == 0 {
            return None;
        }
        let (ptr, len) = self.regions.writer_slots[self.usr_read_buf_offset as usize % self.regions.writer_slots.len()];
        self.buffers_available_read -= 1;
        self.usr_read_buf_offset = (self.usr_read_buf_offset + 1) % u64::from(self.buffer_count);
        // SAFETY: `ptr`/`len` describe a live writer buffer for the duration of this borrow.
        Some(unsafe { core::slice::from_raw_parts(ptr, len) })
    }

    /// Returns the next reader-side (host->device) buffer to fill, or `None` if none is available.
    pub fn next_write_buffer(&mut self) -> Option<&mut [u8]> {
        if self.buffers_available_write == 0 {
            return None;
        }
        let (ptr, len) = self.regions.reader_slots[self.usr_write_buf_offset as usize % self.regions.reader_slots.len()];
        self.buffers_available_write -= 1;
        self.usr_write_buf_offset = (self.usr_write_buf_offset + 1) % u64::from(self.buffer_count);
        // SAFETY: see next_read_buffer; reader buffers are exclusively owned by the consumer
        // between `process()` granting them and the device engine being (re)started.
        Some(unsafe { core::slice::from_raw_parts_mut(ptr, len) })
    }
}
