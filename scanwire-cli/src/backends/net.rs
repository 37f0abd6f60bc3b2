//! # Network Channel
//!
//! For network-attached scanners that speak the framed protocol over TCP.
//!
//! ## Example Usage
//!
//! ```ignore
//! use crate::backends::net::connect;
//! use scanwire_client::ScanClient;
//! use std::time::Duration;
//!
//! let stream = connect("192.168.1.20:1865", Duration::from_secs(30))?;
//! let client = ScanClient::new(stream);
//! ```
use std::{
    io,
    net::{TcpStream, ToSocketAddrs},
    time::Duration,
};

/// Port network scanners listen on when none is given
pub const DEFAULT_PORT: u16 = 1865;

/// Appends [`DEFAULT_PORT`] to `addr` if it names no port.
pub fn with_default_port(addr: &str) -> String {
    let has_port = match addr.rsplit_once(':') {
        // bracketed IPv6 addresses contain colons themselves
        Some((host, port)) => {
            !port.is_empty()
                && port.chars().all(|c| c.is_ascii_digit())
                && (!host.contains(':') || host.ends_with(']'))
        }
        None => false,
    };
    if has_port {
        addr.to_string()
    } else {
        format!("{}:{}", addr, DEFAULT_PORT)
    }
}

/// Connects to `addr`, trying every resolved address in turn.
///
/// `timeout` bounds the connect as well as every later read and write, so a
/// device that stops answering fails the scan instead of hanging it.
pub fn connect(addr: impl ToSocketAddrs, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_error = None;
    for addr in addr.to_socket_addrs()? {
        log::debug!("Connecting to {}", addr);
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => {
                stream.set_read_timeout(Some(timeout))?;
                stream.set_write_timeout(Some(timeout))?;
                stream.set_nodelay(true)?;
                log::info!("Connected to scanner at {}", addr);
                return Ok(stream);
            }
            Err(err) => {
                log::debug!("Connection to {} failed: {}", addr, err);
                last_error = Some(err);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "address resolved to nothing")
    }))
}

#[test]
fn default_port_is_appended() {
    assert_eq!(with_default_port("10.0.0.5"), "10.0.0.5:1865");
    assert_eq!(with_default_port("10.0.0.5:9000"), "10.0.0.5:9000");
    assert_eq!(with_default_port("scanner.local"), "scanner.local:1865");
    assert_eq!(with_default_port("[::1]:9000"), "[::1]:9000");
    assert_eq!(with_default_port("[::1]"), "[::1]:1865");
}
