//! Byte-stream channels to a scanner. Everything that implements `Read + Write`
//! is a [`ScanChannel`](scanwire_client::ScanChannel), so these only open the
//! stream and set it up.
pub mod device;
pub mod net;
