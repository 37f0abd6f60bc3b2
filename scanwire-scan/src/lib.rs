//! # scanwire scan
//!
//! Turns the raw line stream of a line scanner into a correctly aligned RGB image.
//!
//! ## Overview
//!
//! The red, green and blue sensor rows of a line scanner sit next to each other,
//! so each row sees a given position on the document a few lines after the
//! others. The device reports this skew as two sign-magnitude bytes
//! (green-to-red and blue-to-red). The raw lines it sends therefore mix three
//! different scan positions and have to be realigned before they form an image.
//!
//! ## Architecture
//!
//! - **[`realign::Realigner`]**: a ring buffer holding just enough raw lines to
//!   cover the largest channel offset. Memory use depends on the skew, not on
//!   the image height.
//! - **[`resample::Resample`]**: per-line post-processing such as halving the
//!   horizontal resolution of supersampled scans.
//! - **[`commands::CommandSet`]**: the vendor command blocks for starting a scan,
//!   reading the skew and reading image data. [`commands::Scsi2`] is a generic
//!   implementation.
//! - **[`session::ScanSession`]**: composes a
//!   [`ScanClient`](scanwire_client::ScanClient), a command set and a realigner,
//!   and owns the device locks for the duration of a session.
//!
//! ## Basic Usage
//!
//! ```ignore
//! use scanwire_client::ScanClient;
//! use scanwire_scan::{commands::{ScanParameters, Scsi2}, session::Builder};
//! use std::net::TcpStream;
//!
//! let client = ScanClient::new(TcpStream::connect("192.168.1.20:1865")?);
//! let mut session = Builder::new()
//!     .lock_id("net:192.168.1.20:1865")
//!     .open(client, Scsi2::default())?;
//!
//! session.start(ScanParameters::new(2550, 3508))?;
//! let mut line = vec![0u8; 2550 * 3];
//! while session.read_line(&mut line)? {
//!     // line is RGBRGB...
//! }
//! session.close()?;
//! ```
//!
//! ## Error Handling
//!
//! Realignment misuse and transport failures are reported through
//! [`error::ScanError`]. Any transport, realignment or lock failure inside a
//! session aborts it: buffers are reset, the locks are released and the session
//! refuses further work. A device answering with a bad status, a cancelled scan
//! or calling operations in the wrong order are not fatal.
//!
//! ## Logging
//!
//! This crate uses the `log` crate. Session lifecycle is logged at info level,
//! geometry and offsets at debug level and aborts at error level.
pub mod commands;
pub mod error;
pub mod realign;
pub mod resample;
pub mod session;

pub use commands::{CommandSet, ScanParameters};
pub use error::{RealignError, ScanError};
pub use realign::{ChannelOffsets, LineLayout, Realigner};
pub use session::{ScanSession, SessionState};
