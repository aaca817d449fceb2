use thiserror::Error;

/// Status surfaced by the driver core to its caller.
///
/// One variant per error kind named in the driver's error handling design; `DeviceError` carries
/// a verbatim status code rather than a trait object so it stays comparable in tests.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("bad argument: {0}")]
    BadArgument(&'static str),

    #[error("no device")]
    NoDevice,

    #[error("device error (status {0})")]
    DeviceError(i32),

    #[error("operation timed out")]
    Timeout,

    #[error("consumer overrun: dropped {0} buffers")]
    Overrun(u64),
}

pub type Result<T> = core::result::Result<T, Error>;
