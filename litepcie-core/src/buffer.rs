/// A single pinned, DMA-addressable buffer, allocated by the host runtime (out of scope here --
/// see the top-level module docs) and handed to [`crate::dma::DmaChannel::init`].
///
/// The channel never allocates or frees host memory itself; it only programs the device with the
/// physical addresses it is given and reads/writes through `virtual_ptr` for loopback tests and
/// the memory-type query's backing mapping.
#[derive(Debug)]
pub struct PinnedBuffer {
    pub virtual_ptr: *mut u8,
    pub physical_address: u64,
    pub len: usize,
}

// SAFETY: callers are required to guarantee the memory behind `virtual_ptr` stays valid and is not
// aliased outside of the access patterns this crate itself performs (single-writer DMA buffers).
unsafe impl Send for PinnedBuffer {}
unsafe impl Sync for PinnedBuffer {}

impl PinnedBuffer {
    /// # Safety
    ///
    /// `virtual_ptr` must point to `len` bytes of pinned, DMA-addressable memory whose physical
    /// address is `physical_address`, valid until the buffer is dropped from the channel.
    pub unsafe fn new(virtual_ptr: *mut u8, physical_address: u64, len: usize) -> Self {
        Self {
            virtual_ptr,
            physical_address,
            len,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: see struct-level invariant.
        unsafe { core::slice::from_raw_parts(self.virtual_ptr, self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: see struct-level invariant; `&mut self` ensures exclusivity at the Rust level.
        unsafe { core::slice::from_raw_parts_mut(self.virtual_ptr, self.len) }
    }
}
