//! The typed BAR handle design note asks for: a seam between "32-bit load/store against a memory
//! window" and everything built on top of it, so the DMA channel, interrupt handler, and
//! dispatcher never touch a raw pointer directly.

/// Ordered, synchronous 32-bit access to BAR0. An MMIO error is fatal; implementations return
/// [`crate::Error::NoDevice`] rather than retrying.
pub trait Bar: Send + Sync {
    fn read32(&self, offset: u32) -> crate::Result<u32>;
    fn write32(&self, offset: u32, value: u32) -> crate::Result<()>;
}

/// A real BAR0 mapping: a thin wrapper around a base address obtained from the host's PCI
/// resource-mapping call (out of scope here, see the top-level module docs).
///
/// Mirrors the workspace's `Mmio<T>` wrapper: a bare pointer plus volatile access, with the
/// `unsafe` pushed to construction so every other method is safe to call.
pub struct MmioBar {
    base: *mut u8,
    len: usize,
}

// SAFETY: the caller of `new` attests that `base..base+len` is a valid, live MMIO mapping for the
// lifetime of this value, and that concurrent volatile accesses to distinct offsets are sound
// (true of BAR0 register windows, which is what this type is restricted to representing).
unsafe impl Send for MmioBar {}
unsafe impl Sync for MmioBar {}

impl MmioBar {
    /// Wraps an existing MMIO mapping.
    ///
    /// # Safety
    ///
    /// `base` must point to a valid mapping of at least `len` bytes, mapped non-cacheable/strongly
    /// ordered as BAR0 register windows require, and must remain valid for as long as the returned
    /// `MmioBar` is used.
    pub const unsafe fn new(base: *mut u8, len: usize) -> Self {
        Self { base, len }
    }

    fn checked_offset(&self, offset: u32) -> crate::Result<*mut u32> {
        let offset = offset as usize;
        let in_range = matches!(offset.checked_add(4), Some(end) if end <= self.len);
        if !in_range {
            return Err(crate::Error::BadArgument("CSR offset out of range"));
        }
        if offset % 4 != 0 {
            return Err(crate::Error::BadArgument("CSR offset is not 4-byte aligned"));
        }
        // SAFETY: bounds and alignment checked above; `base` is valid per the constructor contract.
        Ok(unsafe { self.base.add(offset).cast::<u32>() })
    }
}

impl Bar for MmioBar {
    fn read32(&self, offset: u32) -> crate::Result<u32> {
        let ptr = self.checked_offset(offset)?;
        // SAFETY: `ptr` was derived from a checked, aligned offset into a live MMIO mapping.
        Ok(unsafe { ptr.read_volatile() })
    }

    fn write32(&self, offset: u32, value: u32) -> crate::Result<()> {
        let ptr = self.checked_offset(offset)?;
        // SAFETY: see `read32`.
        unsafe { ptr.write_volatile(value) };
        Ok(())
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::Bar;

    /// An in-memory register file used in place of real MMIO by the test suite (§8.1).
    ///
    /// Reads of offsets that were never written, and that have no script entry, return 0 --
    /// matching a freshly reset device. A script lets a test make a register behave like
    /// hardware (a flash status that reports `DONE` after a fixed number of polls, a loopback
    /// register that copies bytes) without a real device.
    pub struct FakeBar {
        registers: Mutex<HashMap<u32, u32>>,
        /// Called on every read of `offset`, immediately before the stored value would be
        /// returned; may mutate `registers` via `FakeBar::set`. Used to script polling registers.
        #[allow(clippy::type_complexity)]
        on_read: Mutex<HashMap<u32, Box<dyn FnMut(&FakeBar) -> u32 + Send>>>,
    }

    impl Default for FakeBar {
        fn default() -> Self {
            Self {
                registers: Mutex::new(HashMap::new()),
                on_read: Mutex::new(HashMap::new()),
            }
        }
    }

    impl FakeBar {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set(&self, offset: u32, value: u32) {
            self.registers.lock().unwrap().insert(offset, value);
        }

        pub fn get(&self, offset: u32) -> u32 {
            *self.registers.lock().unwrap().get(&offset).unwrap_or(&0)
        }

        /// Installs a read hook for `offset`. Each read calls `hook` with the fake itself, and
        /// returns the value it computes (the hook is free to call `set`/`get` to model stateful
        /// hardware, e.g. a poll counter).
        pub fn on_read(&self, offset: u32, hook: impl FnMut(&FakeBar) -> u32 + Send + 'static) {
            self.on_read.lock().unwrap().insert(offset, Box::new(hook));
        }
    }

    impl Bar for FakeBar {
        fn read32(&self, offset: u32) -> crate::Result<u32> {
            let hook = self.on_read.lock().unwrap().remove(&offset);
            if let Some(mut hook) = hook {
                let value = hook(self);
                self.on_read.lock().unwrap().insert(offset, hook);
                return Ok(value);
            }
            Ok(self.get(offset))
        }

        fn write32(&self, offset: u32, value: u32) -> crate::Result<()> {
            self.set(offset, value);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeBar;
    use super::*;

    #[test]
    fn fake_bar_round_trips() {
        let bar = FakeBar::new();
        bar.write32(0x10, 0xDEAD_BEEF).unwrap();
        assert_eq!(bar.read32(0x10).unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn fake_bar_unwritten_register_reads_zero() {
        let bar = FakeBar::new();
        assert_eq!(bar.read32(0x1234).unwrap(), 0);
    }

    #[test]
    fn on_read_hook_can_script_a_poll_counter() {
        let bar = FakeBar::new();
        bar.set(0x44, 0); // not done yet
        let mut polls = 0u32;
        bar.on_read(0x44, move |_| {
            polls += 1;
            u32::from(polls >= 3)
        });
        assert_eq!(bar.read32(0x44).unwrap(), 0);
        assert_eq!(bar.read32(0x44).unwrap(), 0);
        assert_eq!(bar.read32(0x44).unwrap(), 1);
    }
}
