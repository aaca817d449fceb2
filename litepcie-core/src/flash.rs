use std::thread;
use std::time::Duration;

use crate::bar::Bar;
use crate::error::{Error, Result};
use crate::regs::{control, encode_spi_control, spi_done};

const MIN_TX_LEN: u32 = 8;
const MAX_TX_LEN: u32 = 40;
const POLL_INTERVAL: Duration = Duration::from_micros(1);
const MAX_POLL_ATTEMPTS: u32 = 100_000;
const START_DELAY: Duration = Duration::from_micros(16);

/// Runs one SPI transaction against the flash controller and returns the composed `rx_data`.
///
/// `tx_len` must be in `8..=40`; a transaction always writes `tx_data` and always reads back
/// whatever the flash shifted out, discarding the low bits the caller doesn't care about is the
/// caller's job, not this function's.
pub fn transact(bar: &dyn Bar, tx_len: u32, tx_data: u64) -> Result<u64> {
    if !(MIN_TX_LEN..=MAX_TX_LEN).contains(&tx_len) {
        return Err(Error::BadArgument("flash tx_len must be in 8..=40"));
    }

    bar.write32(control::FLASH_SPI_MOSI, (tx_data >> 32) as u32)?;
    bar.write32(control::FLASH_SPI_MOSI + 4, tx_data as u32)?;
    bar.write32(control::FLASH_SPI_CONTROL, encode_spi_control(tx_len as u8))?;

    thread::sleep(START_DELAY);

    let mut done = false;
    for _ in 0..MAX_POLL_ATTEMPTS {
        let status = bar.read32(control::FLASH_SPI_STATUS)?;
        if spi_done(status) {
            done = true;
            break;
        }
        thread::sleep(POLL_INTERVAL);
    }
    if !done {
        return Err(Error::Timeout);
    }

    let lsb = bar.read32(control::FLASH_SPI_MISO + 4)?;
    let msb = bar.read32(control::FLASH_SPI_MISO)?;
    Ok((u64::from(msb) << 32) | u64::from(lsb))
}
