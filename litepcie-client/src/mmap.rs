use litepcie_core::counts::DmaCounts;
use litepcie_core::dispatcher::{Dispatcher, MemoryKind, MemoryRegion, Request, Response};
use memmap2::MmapRaw;

use crate::error::{Error, Result};

fn selector(kind: u8, channel: u32) -> u64 {
    debug_assert!(channel < 16, "channel index must fit the selector's low nibble");
    (u64::from(kind) << 16) | u64::from(channel)
}

/// The three shared regions for one channel, resolved into per-slot pointers the stream helper
/// indexes directly. Buffers are not assumed to be contiguous in memory (the driver core's
/// pinned buffers generally aren't); each ring is a list of `(pointer, length)` slots in order.
///
/// A real out-of-process client would receive file descriptors from the dispatcher's memory-type
/// query and map them with [`memmap2`], the way user-space PCIe client libraries in the wider
/// ecosystem map a device's BAR and DMA regions -- see [`MappedRegions::from_fds`]. This crate's
/// own test suite instead runs the dispatcher in-process and reads the pointers it already holds,
/// via [`MappedRegions::from_dispatcher`].
pub struct MappedRegions {
    pub reader_slots: Vec<(*mut u8, usize)>,
    pub writer_slots: Vec<(*mut u8, usize)>,
    pub counts: *const DmaCounts,
    /// Kept alive only by the real-mapping constructor; empty in the in-process path, where the
    /// driver core's own buffers (not a fresh mmap) back the pointers above.
    _mappings: Vec<MmapRaw>,
}

// SAFETY: the pointers above are only ever used to construct accesses scoped to a single
// `StreamHelper`'s worth of ring bookkeeping, mirroring the single-consumer assumption in the
// concurrency model (§5).
unsafe impl Send for MappedRegions {}

impl MappedRegions {
    /// Resolves the three regions for `channel` by issuing memory-type queries against an
    /// in-process dispatcher.
    pub fn from_dispatcher(dispatcher: &mut Dispatcher<'_>, channel: u32) -> Result<Self> {
        let reader_slots = match Self::query(dispatcher, 0x1, channel)? {
            MemoryRegion::BufferRing(segments) => (*segments).clone(),
            _ => return Err(Error::UnexpectedResponse),
        };
        let writer_slots = match Self::query(dispatcher, 0x2, channel)? {
            MemoryRegion::BufferRing(segments) => (*segments).clone(),
            _ => return Err(Error::UnexpectedResponse),
        };
        let counts = match Self::query(dispatcher, 0x4, channel)? {
            MemoryRegion::Counts(ptr) => ptr,
            _ => return Err(Error::UnexpectedResponse),
        };

        Ok(Self {
            reader_slots,
            writer_slots,
            counts,
            _mappings: Vec::new(),
        })
    }

    fn query(dispatcher: &mut Dispatcher<'_>, kind: u8, channel: u32) -> Result<MemoryRegion> {
        match dispatcher.dispatch(Request::MemoryTypeQuery { selector: selector(kind, channel) })? {
            Response::MemoryRegion(region) => Ok(region),
            _ => Err(Error::UnexpectedResponse),
        }
    }

    /// Maps the three regions from raw file descriptors, the way a real out-of-process client
    /// would after a memory-type query handed them back. Each of the reader/writer regions is one
    /// contiguous `buffer_count * buffer_size`-byte mapping on the wire; this slices it into
    /// per-slot segments so the stream helper can treat it the same as the in-process path.
    ///
    /// Not exercised by this crate's own tests (there is no real device to hand out fds), but
    /// kept as the production entry point.
    pub fn from_fds(
        reader_fd: i32,
        writer_fd: i32,
        counts_fd: i32,
        buffer_count: u32,
        buffer_size: u32,
    ) -> Result<Self> {
        use std::os::fd::FromRawFd;
        use std::os::unix::io::OwnedFd;

        // SAFETY: callers pass fds obtained from the dispatcher's memory-type query response,
        // which are valid for the lifetime of the client's connection to the device.
        let reader_owned = unsafe { OwnedFd::from_raw_fd(reader_fd) };
        let writer_owned = unsafe { OwnedFd::from_raw_fd(writer_fd) };
        let counts_owned = unsafe { OwnedFd::from_raw_fd(counts_fd) };

        let reader_map = MmapRaw::map_raw(&reader_owned)?;
        let writer_map = MmapRaw::map_raw(&writer_owned)?;
        let counts_map = MmapRaw::map_raw(&counts_owned)?;

        let reader_slots = slice_into_ring(reader_map.as_mut_ptr(), buffer_count, buffer_size);
        let writer_slots = slice_into_ring(writer_map.as_mut_ptr(), buffer_count, buffer_size);
        let counts = counts_map.as_ptr().cast::<DmaCounts>();

        // The fds are owned by the mmap now; leaking the `OwnedFd` wrappers avoids a double-close
        // since `MmapRaw` itself does not take fd ownership on all platforms.
        std::mem::forget(reader_owned);
        std::mem::forget(writer_owned);
        std::mem::forget(counts_owned);

        Ok(Self {
            reader_slots,
            writer_slots,
            counts,
            _mappings: vec![reader_map, writer_map, counts_map],
        })
    }
}

fn slice_into_ring(base: *mut u8, buffer_count: u32, buffer_size: u32) -> Vec<(*mut u8, usize)> {
    (0..buffer_count)
        .map(|i| {
            // SAFETY: `base` is the start of a `buffer_count * buffer_size`-byte mapping.
            let ptr = unsafe { base.add((i * buffer_size) as usize) };
            (ptr, buffer_size as usize)
        })
        .collect()
}

/// Convenience used by callers that want to log which region a failure came from.
pub trait MemoryKindName {
    fn name(self) -> &'static str;
}

impl MemoryKindName for MemoryKind {
    fn name(self) -> &'static str {
        match self {
            MemoryKind::DmaReader => "reader",
            MemoryKind::DmaWriter => "writer",
            MemoryKind::DmaCounts => "counts",
        }
    }
}
