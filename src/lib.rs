//! Concurrent exerciser for a ticket booking service.
//!
//! Each worker opens its own connection, logs in, performs one availability
//! query or booking, and closes. Frames are checksummed and XOR-obfuscated
//! (see [`codec`]); neither is a security control.

pub mod codec;
pub mod config;
pub mod error;
pub mod harness;
pub mod protocol;
pub mod session;
#[cfg(test)]
mod testing;
pub mod transport;
