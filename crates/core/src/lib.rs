#![warn(missing_docs)]
//! Byte-level primitives shared by the live capture networking crates.

mod channel;
mod version;
pub mod wire;

pub use channel::ChannelType;
pub use version::Version;
pub use wire::{wire_size, WireError, WireReader, WireWriter};

/// Longest string (in characters) allowed in fixed-size discovery fields.
pub const STRING_MAX_LENGTH: usize = 32;
