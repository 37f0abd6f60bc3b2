//! # scanwire client
//!
//! Host side of the framed scanner protocol: a blocking request/response
//! transport over any byte-stream channel, plus a cross-process device lock.
//!
//! ## Overview
//!
//! A [`ScanChannel`] is anything that can read and write exact byte counts:
//! a TCP connection to a network scanner, a character device, or a test double.
//! [`ScanClient`] frames commands on top of it and takes care of replies that
//! are consumed in smaller pieces than they arrive in.
//!
//! For detailed wire format information, see the [`scanwire_protocol`] crate.
//!
//! ## Basic Usage
//!
//! ```ignore
//! use scanwire_client::ScanClient;
//! use scanwire_protocol::Command;
//! use std::net::TcpStream;
//!
//! let mut client = ScanClient::new(TcpStream::connect("192.168.1.20:1865")?);
//! assert!(client.lock()?.is_good());
//!
//! // Ask for 4096 bytes, read them one 1024 byte line at a time
//! client.write_command(Command::PASSTHROUGH, &read_block, 4096)?;
//! let mut line = [0u8; 1024];
//! for _ in 0..4 {
//!     client.read_reply(&mut line)?;
//! }
//! client.unlock()?;
//! ```
//!
//! ## Logging
//!
//! This crate uses the `log` crate. Commands are logged at debug level, reply
//! headers at trace level when [`Config::trace_frames`] is set, and protocol
//! anomalies (bad magic, dropped replies) at warn level.
use std::io::{self, Read, Write};

pub mod client;
pub mod error;
pub mod lock;

pub use client::{Builder, Config, ScanClient};
pub use error::TransportError;
pub use lock::DeviceLock;

/// A blocking byte-stream to the device.
///
/// Implemented for every `Read + Write` type, so TCP streams, device files and
/// in-memory doubles can all be used directly.
pub trait ScanChannel {
    /// Reads exactly `buf.len()` bytes.
    ///
    /// # Returns
    ///
    /// The number of bytes read, which is always `buf.len()` on success.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes and flushes all of `buf`.
    ///
    /// # Returns
    ///
    /// The number of bytes written, which is always `buf.len()` on success.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
}

impl<T: Read + Write> ScanChannel for T {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_exact(buf)?;
        Ok(buf.len())
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_all(buf)?;
        self.flush()?;
        Ok(buf.len())
    }
}
