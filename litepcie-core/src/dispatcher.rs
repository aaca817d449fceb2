use std::collections::HashMap;
use std::sync::Mutex;

use bitfield_struct::bitfield;

use crate::bar::Bar;
use crate::counts::DmaCounts;
use crate::dma::DmaChannel;
use crate::error::{Error, Result};
use crate::flash;
use crate::regs::control;

/// Decodes the 64-bit memory-type query value: `(kind << 16) | channel`. Only the low nibble of
/// `channel` and `kind` are meaningful; everything else is reserved and ignored on read, zero on
/// construction.
#[bitfield(u64)]
pub struct MemorySelector {
    #[bits(4)]
    pub channel: u8,
    #[bits(12)]
    __reserved_low: u16,
    #[bits(4)]
    pub kind: u8,
    #[bits(44)]
    __reserved_high: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryKind {
    DmaReader,
    DmaWriter,
    DmaCounts,
}

impl MemoryKind {
    fn from_bits(bits: u8) -> Result<Self> {
        match bits {
            0x1 => Ok(Self::DmaReader),
            0x2 => Ok(Self::DmaWriter),
            0x4 => Ok(Self::DmaCounts),
            _ => Err(Error::BadArgument("unknown memory-type query kind")),
        }
    }
}

/// A request to the dispatcher's selector table (§4.4).
pub enum Request {
    ConfigDmaReaderChannel { channel: u32, enable: bool },
    ConfigDmaWriterChannel { channel: u32, enable: bool },
    ReadCsr { addr: u64 },
    WriteCsr { addr: u64, value: u64 },
    Icap { addr: u8, data: u32 },
    Flash { tx_len: u32, tx_data: u64 },
    MemoryTypeQuery { selector: u64 },
}

pub enum Response {
    None,
    Csr(u64),
    Flash { tx_len: u32, tx_data: u64, rx_data: u64 },
    MemoryRegion(MemoryRegion),
}

/// A handle to one of the three shared memory regions, as returned by a memory-type query.
/// `litepcie-client` turns this into an actual process mapping; this crate only describes it.
#[derive(Clone)]
pub enum MemoryRegion {
    /// Reader or writer buffer ring: the N buffers in slot order. Read-write.
    BufferRing(std::sync::Arc<Vec<(*mut u8, usize)>>),
    /// The shared counter page. Read-only to the client.
    Counts(*const DmaCounts),
}

// SAFETY: `MemoryRegion` is only ever handed out as a description of memory the channel keeps
// alive for at least as long as the dispatcher itself; it carries no exclusive-access claim.
unsafe impl Send for MemoryRegion {}
unsafe impl Sync for MemoryRegion {}

/// Routes structured calls to CSR transport, DMA channel control, ICAP, and flash SPI, and
/// services memory-type queries with a per-(kind, channel) cache so repeat queries return the
/// same backing descriptor (§4.4).
///
/// The descriptor cache is guarded by a single mutex covering the whole map rather than a lock per
/// entry: queries are issued once per channel at client start-up, so contention is not a concern,
/// matching this workspace's own guidance to prefer the simplest lock that is provably adequate.
pub struct Dispatcher<'bar> {
    bar: &'bar dyn Bar,
    channels: Vec<DmaChannel<'bar>>,
    region_cache: Mutex<HashMap<(MemoryKind, u32), MemoryRegion>>,
}

impl<'bar> Dispatcher<'bar> {
    pub fn new(bar: &'bar dyn Bar, channels: Vec<DmaChannel<'bar>>) -> Self {
        Self {
            bar,
            channels,
            region_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn dispatch(&mut self, request: Request) -> Result<Response> {
        match request {
            Request::ConfigDmaReaderChannel { channel, enable } => {
                self.config_reader(channel, enable).map(|()| Response::None)
            }
            Request::ConfigDmaWriterChannel { channel, enable } => {
                self.config_writer(channel, enable).map(|()| Response::None)
            }
            Request::ReadCsr { addr } => {
                let value = self.read_csr(addr)?;
                Ok(Response::Csr(value))
            }
            Request::WriteCsr { addr, value } => {
                self.write_csr(addr, value)?;
                Ok(Response::None)
            }
            Request::Icap { addr, data } => {
                self.icap(addr, data)?;
                Ok(Response::None)
            }
            Request::Flash { tx_len, tx_data } => {
                let rx_data = flash::transact(self.bar, tx_len, tx_data)?;
                Ok(Response::Flash { tx_len, tx_data, rx_data })
            }
            Request::MemoryTypeQuery { selector } => {
                let region = self.memory_region(selector)?;
                Ok(Response::MemoryRegion(region))
            }
        }
    }

    fn channel_mut(&mut self, index: u32) -> Result<&mut DmaChannel<'bar>> {
        self.channels
            .get_mut(index as usize)
            .ok_or(Error::BadArgument("unknown DMA channel index"))
    }

    fn config_reader(&mut self, index: u32, enable: bool) -> Result<()> {
        let channel = self.channel_mut(index)?;
        if enable == channel.reader_enabled() {
            return Ok(());
        }
        if enable {
            channel.setup_reader()?;
            channel.start_reader(true)
        } else {
            channel.stop_reader()
        }
    }

    fn config_writer(&mut self, index: u32, enable: bool) -> Result<()> {
        let channel = self.channel_mut(index)?;
        if enable == channel.writer_enabled() {
            return Ok(());
        }
        if enable {
            channel.setup_writer()?;
            channel.start_writer(true)
        } else {
            channel.stop_writer()
        }
    }

    fn read_csr(&self, addr: u64) -> Result<u64> {
        let offset: u32 = addr
            .try_into()
            .map_err(|_| Error::BadArgument("CSR address does not fit in 32 bits"))?;
        Ok(u64::from(self.bar.read32(offset)?))
    }

    fn write_csr(&self, addr: u64, value: u64) -> Result<()> {
        let offset: u32 = addr
            .try_into()
            .map_err(|_| Error::BadArgument("CSR address does not fit in 32 bits"))?;
        self.bar.write32(offset, value as u32)
    }

    fn icap(&self, addr: u8, data: u32) -> Result<()> {
        self.bar.write32(control::ICAP_ADDR, u32::from(addr))?;
        self.bar.write32(control::ICAP_DATA, data)?;
        self.bar.write32(control::ICAP_WRITE, 1)
    }

    fn memory_region(&mut self, selector: u64) -> Result<MemoryRegion> {
        let decoded = MemorySelector::from(selector);
        let kind = MemoryKind::from_bits(decoded.kind())?;
        let channel_index = u32::from(decoded.channel());

        if let Some(region) = self.region_cache.lock().unwrap().get(&(kind, channel_index)) {
            return Ok(region.clone());
        }

        let channel = self
            .channels
            .get(channel_index as usize)
            .ok_or(Error::BadArgument("unknown DMA channel index"))?;

        let region = match kind {
            MemoryKind::DmaReader => buffer_ring(channel, true),
            MemoryKind::DmaWriter => buffer_ring(channel, false),
            MemoryKind::DmaCounts => MemoryRegion::Counts(&channel.counts as *const DmaCounts),
        };

        self.region_cache.lock().unwrap().insert((kind, channel_index), region.clone());
        Ok(region)
    }
}

fn buffer_ring(channel: &DmaChannel<'_>, reader: bool) -> MemoryRegion {
    let buffers = if reader { channel.reader_buffers() } else { channel.writer_buffers() };
    let segments = buffers.iter().map(|b| (b.virtual_ptr, b.len)).collect();
    MemoryRegion::BufferRing(std::sync::Arc::new(segments))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bar::fake::FakeBar;
    use crate::buffer::PinnedBuffer;
    use crate::geometry::DmaGeometry;

    fn leaked_buffers(geometry: &DmaGeometry) -> Vec<PinnedBuffer> {
        (0..geometry.buffer_count)
            .map(|i| {
                let mut storage = vec![0u8; geometry.buffer_size as usize].into_boxed_slice();
                let ptr = storage.as_mut_ptr();
                core::mem::forget(storage);
                unsafe { PinnedBuffer::new(ptr, u64::from(i) * 0x1000, geometry.buffer_size as usize) }
            })
            .collect()
    }

    fn dispatcher_with_one_channel(bar: &FakeBar) -> (Dispatcher<'_>, DmaGeometry) {
        let geometry = DmaGeometry::new_unchecked(1, 4, 64, 1);
        let channel =
            DmaChannel::init(bar, 0x1000, geometry, 0, 1, leaked_buffers(&geometry), leaked_buffers(&geometry))
                .unwrap();
        (Dispatcher::new(bar, vec![channel]), geometry)
    }

    #[test]
    fn read_write_csr_round_trips() {
        let bar = FakeBar::new();
        let (mut dispatcher, _geometry) = dispatcher_with_one_channel(&bar);
        dispatcher
            .dispatch(Request::WriteCsr { addr: 0x00, value: 0xDEAD_BEEF })
            .unwrap();
        let response = dispatcher.dispatch(Request::ReadCsr { addr: 0x00 }).unwrap();
        match response {
            Response::Csr(value) => assert_eq!(value, 0xDEAD_BEEF),
            _ => panic!("expected Csr response"),
        }
    }

    #[test]
    fn config_reader_channel_enable_then_disable_is_idempotent() {
        let bar = FakeBar::new();
        let (mut dispatcher, _geometry) = dispatcher_with_one_channel(&bar);
        dispatcher
            .dispatch(Request::ConfigDmaReaderChannel { channel: 0, enable: true })
            .unwrap();
        dispatcher
            .dispatch(Request::ConfigDmaReaderChannel { channel: 0, enable: true })
            .unwrap();
        assert!(dispatcher.channels[0].reader_enabled());
        dispatcher
            .dispatch(Request::ConfigDmaReaderChannel { channel: 0, enable: false })
            .unwrap();
        assert!(!dispatcher.channels[0].reader_enabled());
    }

    #[test]
    fn memory_type_query_is_cached() {
        let bar = FakeBar::new();
        let (mut dispatcher, _geometry) = dispatcher_with_one_channel(&bar);
        let selector = u64::from(MemorySelector::new().with_kind(0x4).with_channel(0));
        let first = dispatcher.dispatch(Request::MemoryTypeQuery { selector }).unwrap();
        let second = dispatcher.dispatch(Request::MemoryTypeQuery { selector }).unwrap();
        match (first, second) {
            (Response::MemoryRegion(MemoryRegion::Counts(a)), Response::MemoryRegion(MemoryRegion::Counts(b))) => {
                assert_eq!(a, b);
            }
            _ => panic!("expected matching Counts regions"),
        }
    }

    #[test]
    fn memory_type_query_rejects_unknown_kind() {
        let bar = FakeBar::new();
        let (mut dispatcher, _geometry) = dispatcher_with_one_channel(&bar);
        let selector = u64::from(MemorySelector::new().with_kind(0x9).with_channel(0));
        let err = dispatcher.dispatch(Request::MemoryTypeQuery { selector }).unwrap_err();
        assert_eq!(err, Error::BadArgument("unknown memory-type query kind"));
    }
}
