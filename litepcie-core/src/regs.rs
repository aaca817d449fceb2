//! Typed register layouts for the CSR blocks the driver core touches.
//!
//! The generated CSR address header is an external collaborator (its exact byte offsets are
//! supplied by the board/bitstream build, not by this crate), so the layouts below model field
//! *shape* -- the bit layout within a register, and the relative offsets within a block -- rather
//! than claiming fixed absolute addresses. A caller constructs a [`Bar`](crate::bar::Bar) at the
//! board's real CSR base and this module's block offsets are added on top of it.

use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::register_bitfields;
use tock_registers::registers::InMemoryRegister;

register_bitfields![u32,
    /// The `{ index:16, count:16 }` loop-status word read back from a reader or writer engine.
    pub LOOP_STATUS [
        INDEX OFFSET(16) NUMBITS(16) [],
        COUNT OFFSET(0) NUMBITS(16) [],
    ],

    /// Flash SPI control register: `START | (tx_len << 8)`.
    pub SPI_CONTROL [
        TX_LEN OFFSET(8) NUMBITS(8) [],
        START OFFSET(0) NUMBITS(1) [],
    ],

    /// Flash SPI status register.
    pub SPI_STATUS [
        DONE OFFSET(0) NUMBITS(1) [],
    ],
];

/// Decodes a raw `LOOP_STATUS` sample into its `(index, count)` halves.
pub fn decode_loop_status(raw: u32) -> (u16, u16) {
    let reg: InMemoryRegister<u32, LOOP_STATUS::Register> = InMemoryRegister::new(raw);
    (reg.read(LOOP_STATUS::INDEX) as u16, reg.read(LOOP_STATUS::COUNT) as u16)
}

/// Composes the flash SPI control word for a transaction of `tx_len` bits.
pub fn encode_spi_control(tx_len: u8) -> u32 {
    let reg: InMemoryRegister<u32, SPI_CONTROL::Register> = InMemoryRegister::new(0);
    reg.write(SPI_CONTROL::START.val(1) + SPI_CONTROL::TX_LEN.val(u32::from(tx_len)));
    reg.get()
}

/// Tests whether a raw `SPI_STATUS` sample reports `DONE`.
pub fn spi_done(raw: u32) -> bool {
    let reg: InMemoryRegister<u32, SPI_STATUS::Register> = InMemoryRegister::new(raw);
    reg.is_set(SPI_STATUS::DONE)
}

/// Byte offsets of the fixed, non-per-channel control registers, relative to `CSR_BASE`.
pub mod control {
    pub const SCRATCH: u32 = 0x00;
    pub const DNA_ID: u32 = 0x04;
    pub const LEDS: u32 = 0x08;

    pub const MSI_ENABLE: u32 = 0x10;
    pub const MSI_CLEAR: u32 = 0x14;
    pub const MSI_VECTOR: u32 = 0x18;

    pub const ICAP_ADDR: u32 = 0x20;
    pub const ICAP_DATA: u32 = 0x24;
    pub const ICAP_WRITE: u32 = 0x28;

    pub const FLASH_SPI_MOSI: u32 = 0x30;
    pub const FLASH_SPI_MISO: u32 = 0x38;
    pub const FLASH_SPI_CONTROL: u32 = 0x40;
    pub const FLASH_SPI_STATUS: u32 = 0x44;
}

/// Byte offsets within one engine's (reader or writer) sub-block. A channel owns two of these,
/// at `channel_base + READER` and `channel_base + WRITER`.
pub mod engine {
    pub const ENABLE: u32 = 0x00;
    pub const TABLE_VALUE: u32 = 0x04;
    pub const TABLE_WE: u32 = 0x08;
    pub const TABLE_RESET: u32 = 0x0C;
    pub const TABLE_FLUSH: u32 = 0x10;
    pub const TABLE_LOOP_PROG_N: u32 = 0x14;
    pub const TABLE_LEVEL: u32 = 0x18;
    pub const TABLE_LOOP_STATUS: u32 = 0x1C;

    pub const STRIDE: u32 = 0x20;
}

/// Per-channel block layout: loopback enable, then the reader engine sub-block, then the writer.
pub mod channel {
    use super::engine;

    pub const LOOPBACK_ENABLE: u32 = 0x00;
    pub const READER: u32 = 0x10;
    pub const WRITER: u32 = READER + engine::STRIDE;

    pub const STRIDE: u32 = WRITER + engine::STRIDE;
}
