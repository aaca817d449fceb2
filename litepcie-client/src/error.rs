use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("driver core returned an error: {0}")]
    Core(#[from] litepcie_core::Error),

    #[error("failed to map shared region: {0}")]
    Map(#[from] std::io::Error),

    #[error("dispatcher returned an unexpected response for this request")]
    UnexpectedResponse,
}

pub type Result<T> = core::result::Result<T, Error>;
