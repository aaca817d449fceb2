use crate::error::{Error, Result};

/// Runtime configuration of the DMA ring layout, replacing the fixed compile-time constants
/// (`DMA_CHANNEL_COUNT`, `DMA_BUFFER_COUNT`, `DMA_BUFFER_SIZE`) of the original implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaGeometry {
    pub channel_count: u32,
    /// `N`: number of buffers in each reader/writer ring. Must be a power of two dividing
    /// `0x10000`, since the handler's wraparound arithmetic assumes it.
    pub buffer_count: u32,
    /// Size in bytes of a single DMA buffer.
    pub buffer_size: u32,
    /// IRQ is suppressed on buffer `i` unless `(i + 1) % buffers_per_irq == 0`.
    pub buffers_per_irq: u32,
}

impl DmaGeometry {
    pub const fn new_unchecked(
        channel_count: u32,
        buffer_count: u32,
        buffer_size: u32,
        buffers_per_irq: u32,
    ) -> Self {
        Self {
            channel_count,
            buffer_count,
            buffer_size,
            buffers_per_irq,
        }
    }

    pub fn validated(self) -> Result<Self> {
        if self.buffer_count == 0 || !self.buffer_count.is_power_of_two() {
            return Err(Error::BadArgument("buffer_count must be a power of two"));
        }
        if 0x10000 % self.buffer_count != 0 {
            return Err(Error::BadArgument("buffer_count must evenly divide 0x10000"));
        }
        if self.buffer_size == 0 {
            return Err(Error::BadArgument("buffer_size must be nonzero"));
        }
        if self.buffers_per_irq == 0 {
            return Err(Error::BadArgument("buffers_per_irq must be nonzero"));
        }
        Ok(self)
    }
}

impl Default for DmaGeometry {
    /// `N = 256` buffers of 16 KiB each, one IRQ per completed buffer.
    fn default() -> Self {
        Self::new_unchecked(1, 256, 16384, 1)
    }
}
