//! DMA scatter-gather descriptor encoding.
//!
//! The descriptor config word (`length:24 | disableIRQ:1 | last:1 | _:6`) is packed by explicit
//! shift-and-mask rather than a native bitfield macro, so the little-endian byte order reaching
//! the device's TLP is never left to a derive macro's layout choice.

/// One scatter-gather descriptor: a config word plus a 64-bit buffer physical address, written to
/// the engine's table as `VALUE <- config`, `VALUE+4 <- addr_lsb`, `WE <- addr_msb`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    pub length: u32,
    pub disable_irq: bool,
    pub last: bool,
    pub physical_address: u64,
}

const LENGTH_MASK: u32 = 0x00FF_FFFF;
const DISABLE_IRQ_BIT: u32 = 1 << 24;
const LAST_BIT: u32 = 1 << 25;

impl Descriptor {
    /// Encodes the config word (the value written to `TABLE_VALUE`).
    pub fn config_word(&self) -> u32 {
        debug_assert!(self.length <= LENGTH_MASK, "descriptor length overflows 24 bits");
        let mut word = self.length & LENGTH_MASK;
        if self.disable_irq {
            word |= DISABLE_IRQ_BIT;
        }
        if self.last {
            word |= LAST_BIT;
        }
        word
    }

    /// Decodes a config word previously produced by [`Descriptor::config_word`]; the physical
    /// address is not recoverable from the config word alone and must be supplied separately.
    pub fn decode_config_word(word: u32, physical_address: u64) -> Self {
        Self {
            length: word & LENGTH_MASK,
            disable_irq: word & DISABLE_IRQ_BIT != 0,
            last: word & LAST_BIT != 0,
            physical_address,
        }
    }

    pub fn address_lsb(&self) -> u32 {
        (self.physical_address & 0xFFFF_FFFF) as u32
    }

    pub fn address_msb(&self) -> u32 {
        (self.physical_address >> 32) as u32
    }
}

/// Builds the descriptor for ring slot `i` of `n` total buffers, per the engine setup rule:
/// IRQ is suppressed (`disable_irq = true`) unless this is the last buffer of an IRQ batch.
pub fn descriptor_for_slot(
    index: u32,
    buffers_per_irq: u32,
    buffer_size: u32,
    physical_address: u64,
) -> Descriptor {
    let fires_irq = (index + 1) % buffers_per_irq == 0;
    Descriptor {
        length: buffer_size,
        disable_irq: !fires_irq,
        last: true,
        physical_address,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_word_round_trips() {
        let d = Descriptor {
            length: 16384,
            disable_irq: true,
            last: true,
            physical_address: 0xDEAD_BEEF_0000,
        };
        let word = d.config_word();
        let decoded = Descriptor::decode_config_word(word, d.physical_address);
        assert_eq!(decoded.length, d.length);
        assert_eq!(decoded.disable_irq, d.disable_irq);
        assert_eq!(decoded.last, d.last);
    }

    #[test]
    fn address_splits_into_lsb_msb() {
        let d = Descriptor {
            length: 0,
            disable_irq: false,
            last: false,
            physical_address: 0x1122_3344_5566_7788,
        };
        assert_eq!(d.address_lsb(), 0x5566_7788);
        assert_eq!(d.address_msb(), 0x1122_3344);
    }

    #[test]
    fn irq_fires_every_buffers_per_irq_th_slot() {
        // buffers_per_irq = 4: slots 3, 7, 11, ... fire; others suppress IRQ.
        for i in 0u32..12 {
            let d = descriptor_for_slot(i, 4, 16384, 0);
            let should_fire = (i + 1) % 4 == 0;
            assert_eq!(!d.disable_irq, should_fire, "slot {i}");
        }
    }

    #[test]
    fn buffers_per_irq_one_fires_every_slot() {
        for i in 0u32..8 {
            let d = descriptor_for_slot(i, 1, 16384, 0);
            assert!(!d.disable_irq);
        }
    }
}
