//! User-space access library for a LitePCIe device already brought up by `litepcie-core`.
//!
//! Resolves the dispatcher's memory-type queries into process mappings ([`mmap`]) and layers the
//! reader/writer ring bookkeeping a streaming consumer needs on top ([`stream`]).

pub mod error;
pub mod mmap;
pub mod stream;

pub use error::{Error, Result};
pub use mmap::{MappedRegions, MemoryKindName};
pub use stream::StreamHelper;
