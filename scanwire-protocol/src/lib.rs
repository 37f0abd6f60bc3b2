//! # scanwire protocol
//!
//! Wire format of the length-prefixed command protocol spoken by network-attached
//! image scanners.
//!
//! ## Overview
//!
//! Every request and every reply starts with a 12-byte primary header. Commands
//! whose code has the high byte `0x20` additionally carry an 8-byte secondary
//! header and a payload. All integers are big-endian.
//!
//! ```text
//! Primary header (12 bytes):
//!   0-1   magic "IS"
//!   2-3   command code
//!   4-5   0x000C
//!   6-9   secondary header + payload length (requests), payload length (replies)
//!   10-11 zero
//! Secondary header (8 bytes, 0x20xx commands only):
//!   0-3   payload size
//!   4-7   expected reply size
//! ```
//!
//! - **Passthrough** (`0x2000`): carries a device command block, the reply holds
//!   whatever the device returns for it
//! - **Lock** / **Unlock** (`0x2100` / `0x2101`): claim and release the device,
//!   answered with one [`Status`] byte
//!
//! ## Basic Usage
//!
//! ### Writing a request
//!
//! ```
//! use scanwire_protocol::{Command, Request};
//!
//! let request = Request::new(Command::LOCK, Vec::new(), 1);
//! let mut buffer = Vec::new();
//! request.write_to(&mut buffer).expect("Writing to vector shouldn't fail");
//! assert_eq!(buffer, b"IS\x21\x00\x00\x0c\x00\x00\x00\x00\x00\x00");
//! ```
//!
//! ### Reading a reply
//!
//! ```
//! use scanwire_protocol::{Command, Reply, Status};
//! use std::io::Cursor;
//!
//! let wire = b"IS\x21\x00\x00\x0c\x00\x00\x00\x01\x00\x00\x00";
//! let reply = Reply::from_reader(&mut Cursor::new(wire), 16).expect("Reply should parse");
//! assert_eq!(reply.command, Command::LOCK);
//! assert_eq!(Status::from(reply.payload[0]), Status::Good);
//! ```
//!
//! ## Features
//!
//! - `tokio`: enables [`tokio_codec::DeviceCodec`], a device-side codec for
//!   `tokio_util::codec::Framed`
//!
//! ## Error Handling
//!
//! Parsing errors are reported as [`error::ReadError`]. Encoding only fails on
//! I/O errors, on payloads that do not fit the 32-bit length fields, and when the
//! frame cannot be allocated.

pub mod protocol;
pub use protocol::*;
pub mod codec;
pub mod error;
#[cfg(feature = "tokio")]
pub mod tokio_codec;
