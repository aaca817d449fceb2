use std::thread;
use std::time::Duration;

use crate::bar::Bar;
use crate::buffer::PinnedBuffer;
use crate::counts::DmaCounts;
use crate::descriptor::descriptor_for_slot;
use crate::error::{Error, Result};
use crate::geometry::DmaGeometry;
use crate::regs::{channel, control, engine};

/// How long `stop_*` waits after asserting flush before clearing `enable`, to let in-flight TLPs
/// drain. The design notes allow substituting a bounded poll of a drain-complete status if the
/// board exposes one; this implementation always sleeps, matching the reference behavior.
const DRAIN_SLEEP: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Engine {
    Reader,
    Writer,
}

impl Engine {
    fn sub_base(self) -> u32 {
        match self {
            Engine::Reader => channel::READER,
            Engine::Writer => channel::WRITER,
        }
    }
}

/// One DMA channel: a reader ring, a writer ring, and the shared counter page the interrupt
/// handler publishes to and the user-space stream helper reads from.
///
/// Mutating operations (`setup_*`, `start_*`, `stop_*`) are never concurrent with the interrupt
/// handler servicing this same channel in a correctly sequenced caller, because setup always
/// completes before `enable` is asserted (§5) -- this type does not itself enforce that with a
/// lock, matching the spec's assignment of that invariant to the caller's sequencing.
pub struct DmaChannel<'bar> {
    bar: &'bar dyn Bar,
    base_address: u32,
    geometry: DmaGeometry,
    pub counts: DmaCounts,
    reader_buffers: Vec<PinnedBuffer>,
    writer_buffers: Vec<PinnedBuffer>,
    reader_enabled: bool,
    writer_enabled: bool,
}

impl<'bar> DmaChannel<'bar> {
    /// Allocates nothing: buffers are supplied by the caller, already pinned. Validates the
    /// buffer counts and sizes against `geometry`, zeroes the shared counter page, and enables
    /// the channel's two MSI bits. On any validation failure, nothing is written to the device and
    /// the buffers are returned to the caller (§7: partial init must roll back cleanly, which here
    /// means "never partially committed" rather than "undo a partial commit").
    #[allow(clippy::too_many_arguments)]
    pub fn init(
        bar: &'bar dyn Bar,
        base_address: u32,
        geometry: DmaGeometry,
        reader_bit: u32,
        writer_bit: u32,
        reader_buffers: Vec<PinnedBuffer>,
        writer_buffers: Vec<PinnedBuffer>,
    ) -> Result<Self> {
        let geometry = geometry.validated()?;
        Self::validate_buffers(&reader_buffers, &geometry)?;
        Self::validate_buffers(&writer_buffers, &geometry)?;

        let channel = Self {
            bar,
            base_address,
            geometry,
            counts: DmaCounts::new(),
            reader_buffers,
            writer_buffers,
            reader_enabled: false,
            writer_enabled: false,
        };

        let enable_mask = (1 << reader_bit) | (1 << writer_bit);
        let current = bar.read32(control::MSI_ENABLE)?;
        bar.write32(control::MSI_ENABLE, current | enable_mask)?;

        Ok(channel)
    }

    fn validate_buffers(buffers: &[PinnedBuffer], geometry: &DmaGeometry) -> Result<()> {
        if buffers.len() != geometry.buffer_count as usize {
            return Err(Error::BadArgument("buffer array length does not match geometry.buffer_count"));
        }
        if buffers.iter().any(|b| b.len != geometry.buffer_size as usize) {
            return Err(Error::BadArgument("a buffer's length does not match geometry.buffer_size"));
        }
        Ok(())
    }

    pub fn reader_enabled(&self) -> bool {
        self.reader_enabled
    }

    pub fn writer_enabled(&self) -> bool {
        self.writer_enabled
    }

    pub fn reader_buffer(&self, slot: usize) -> &PinnedBuffer {
        &self.reader_buffers[slot]
    }

    pub fn writer_buffer(&self, slot: usize) -> &PinnedBuffer {
        &self.writer_buffers[slot]
    }

    pub fn reader_buffers(&self) -> &[PinnedBuffer] {
        &self.reader_buffers
    }

    pub fn writer_buffers(&self) -> &[PinnedBuffer] {
        &self.writer_buffers
    }

    pub fn set_loopback(&self, enabled: bool) -> Result<()> {
        self.bar
            .write32(self.base_address + channel::LOOPBACK_ENABLE, u32::from(enabled))
    }

    pub fn setup_reader(&mut self) -> Result<()> {
        let buffers: Vec<u64> = self.reader_buffers.iter().map(|b| b.physical_address).collect();
        self.setup_engine(Engine::Reader, &buffers)
    }

    pub fn setup_writer(&mut self) -> Result<()> {
        let buffers: Vec<u64> = self.writer_buffers.iter().map(|b| b.physical_address).collect();
        self.setup_engine(Engine::Writer, &buffers)
    }

    /// Disables the engine, resets the descriptor table, then writes one descriptor per buffer.
    ///
    /// The write order per descriptor (`VALUE` config word, then `VALUE+4` address low half, then
    /// `WE` address high half) is load-bearing: `WE` is the write-enable strobe that latches the
    /// whole descriptor into the table. Reordering it loses the config word or the low address
    /// half.
    fn setup_engine(&self, which: Engine, physical_addresses: &[u64]) -> Result<()> {
        let base = self.base_address + which.sub_base();
        self.bar.write32(base + engine::ENABLE, 0)?;
        self.bar.write32(base + engine::TABLE_RESET, 1)?;

        for (i, &addr) in physical_addresses.iter().enumerate() {
            let descriptor = descriptor_for_slot(
                i as u32,
                self.geometry.buffers_per_irq,
                self.geometry.buffer_size,
                addr,
            );
            self.bar.write32(base + engine::TABLE_VALUE, descriptor.config_word())?;
            self.bar.write32(base + engine::TABLE_VALUE + 4, descriptor.address_lsb())?;
            self.bar.write32(base + engine::TABLE_WE, descriptor.address_msb())?;
        }

        self.bar.write32(base + engine::TABLE_LOOP_PROG_N, 1)
    }

    pub fn start_reader(&mut self, loop_mode: bool) -> Result<()> {
        if self.reader_enabled {
            return Ok(());
        }
        self.counts.reset_reader();
        self.start_engine(Engine::Reader, loop_mode)?;
        self.reader_enabled = true;
        Ok(())
    }

    pub fn start_writer(&mut self, loop_mode: bool) -> Result<()> {
        if self.writer_enabled {
            return Ok(());
        }
        self.counts.reset_writer();
        self.start_engine(Engine::Writer, loop_mode)?;
        self.writer_enabled = true;
        Ok(())
    }

    fn start_engine(&self, which: Engine, loop_mode: bool) -> Result<()> {
        let base = self.base_address + which.sub_base();
        self.bar.write32(base + engine::TABLE_LOOP_PROG_N, u32::from(loop_mode))?;
        self.bar.write32(base + engine::ENABLE, 1)
    }

    pub fn stop_reader(&mut self) -> Result<()> {
        if !self.reader_enabled {
            return Ok(());
        }
        self.stop_engine(Engine::Reader)?;
        self.reader_enabled = false;
        Ok(())
    }

    pub fn stop_writer(&mut self) -> Result<()> {
        if !self.writer_enabled {
            return Ok(());
        }
        self.stop_engine(Engine::Writer)?;
        self.writer_enabled = false;
        Ok(())
    }

    fn stop_engine(&self, which: Engine) -> Result<()> {
        let base = self.base_address + which.sub_base();
        self.bar.write32(base + engine::TABLE_LOOP_PROG_N, 0)?;
        self.bar.write32(base + engine::TABLE_FLUSH, 1)?;
        thread::sleep(DRAIN_SLEEP);
        self.bar.write32(base + engine::ENABLE, 0)?;
        self.bar.write32(base + engine::TABLE_FLUSH, 1)
    }

    /// Stops both engines (idempotent), waits for drain, and releases the channel's buffers. The
    /// shared counter page is dropped along with `self`.
    pub fn teardown(mut self) -> Result<()> {
        self.stop_reader()?;
        self.stop_writer()?;
        thread::sleep(DRAIN_SLEEP);
        self.reader_buffers.clear();
        self.writer_buffers.clear();
        Ok(())
    }
}
