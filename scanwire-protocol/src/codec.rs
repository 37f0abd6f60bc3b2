/// Read and write implementations for the wire frames
use std::io::{self, Read, Write};

use crate::{
    error::ReadError,
    protocol::{
        Command, HEADER_WORD, PRIMARY_HEADER_LEN, PrimaryHeader, Reply, Request,
        SECONDARY_HEADER_LEN, SecondaryHeader,
    },
};

/// Allocates a zeroed buffer without aborting the process when memory runs out.
pub(crate) fn try_alloc(len: usize) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|_| {
        io::Error::new(
            io::ErrorKind::OutOfMemory,
            format!("cannot allocate {} bytes for a frame", len),
        )
    })?;
    buf.resize(len, 0);
    Ok(buf)
}

impl PrimaryHeader {
    pub fn to_bytes(&self) -> [u8; PRIMARY_HEADER_LEN] {
        let mut buf = [0u8; PRIMARY_HEADER_LEN];
        buf[0..2].copy_from_slice(&self.magic());
        buf[2..4].copy_from_slice(&self.command().code().to_be_bytes());
        buf[4..6].copy_from_slice(&HEADER_WORD.to_be_bytes());
        buf[6..10].copy_from_slice(&self.length().to_be_bytes());
        buf
    }

    /// Decodes a header without validating it.
    /// Whether a bad magic tag is fatal is up to the caller.
    pub fn from_bytes(buf: &[u8; PRIMARY_HEADER_LEN]) -> PrimaryHeader {
        let command = u16::from_be_bytes([buf[2], buf[3]]);
        let length = u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]);
        PrimaryHeader::with_magic([buf[0], buf[1]], Command::new(command), length)
    }

    pub fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        writer.write_all(&self.to_bytes())
    }

    /// Reads exactly one primary header. The magic tag is not checked.
    pub fn from_reader(reader: &mut impl Read) -> io::Result<PrimaryHeader> {
        let mut buf = [0u8; PRIMARY_HEADER_LEN];
        reader.read_exact(&mut buf)?;
        Ok(PrimaryHeader::from_bytes(&buf))
    }

    /// Reads one primary header and rejects it if the magic tag does not match.
    pub fn from_reader_strict(reader: &mut impl Read) -> Result<PrimaryHeader, ReadError> {
        let header = PrimaryHeader::from_reader(reader)?;
        if !header.has_valid_magic() {
            return Err(ReadError::InvalidMagic(header.magic()));
        }
        Ok(header)
    }
}

#[test]
fn primary_header_layout() {
    let header = PrimaryHeader::new(Command::PASSTHROUGH, 0x0102_0304);
    assert_eq!(
        header.to_bytes(),
        [
            b'I', b'S', 0x20, 0x00, 0x00, 0x0C, 0x01, 0x02, 0x03, 0x04, 0x00, 0x00
        ]
    );
}

#[test]
fn lock_header_has_no_length() {
    let header = PrimaryHeader::for_request(Command::LOCK, 0);
    assert_eq!(
        header.to_bytes(),
        [b'I', b'S', 0x21, 0x00, 0x00, 0x0C, 0, 0, 0, 0, 0, 0]
    );
}

#[test]
fn header_with_bad_magic_decodes() {
    let mut bytes = PrimaryHeader::new(Command::UNLOCK, 1).to_bytes();
    bytes[0] = b'X';
    let header = PrimaryHeader::from_bytes(&bytes);
    assert!(!header.has_valid_magic());
    assert_eq!(header.magic(), [b'X', b'S']);
    assert_eq!(header.length(), 1);
    assert_eq!(header.command(), Command::UNLOCK);
}

impl SecondaryHeader {
    pub fn to_bytes(&self) -> [u8; SECONDARY_HEADER_LEN] {
        let mut buf = [0u8; SECONDARY_HEADER_LEN];
        buf[0..4].copy_from_slice(&self.payload_size.to_be_bytes());
        buf[4..8].copy_from_slice(&self.reply_size.to_be_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; SECONDARY_HEADER_LEN]) -> SecondaryHeader {
        SecondaryHeader {
            payload_size: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            reply_size: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }

    pub fn from_reader(reader: &mut impl Read) -> io::Result<SecondaryHeader> {
        let mut buf = [0u8; SECONDARY_HEADER_LEN];
        reader.read_exact(&mut buf)?;
        Ok(SecondaryHeader::from_bytes(&buf))
    }
}

impl Request {
    /// Encodes the complete request into a single buffer.
    ///
    /// Fails with [`io::ErrorKind::OutOfMemory`] if the frame cannot be allocated
    /// and with [`io::ErrorKind::InvalidInput`] if the payload does not fit the
    /// 32-bit length fields or the command cannot carry a payload at all.
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        if !self.command.has_secondary_header() && !self.payload.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "{} command cannot carry a payload of {} bytes",
                    self.command,
                    self.payload.len()
                ),
            ));
        }
        let payload_len = u32::try_from(self.payload.len())
            .ok()
            .filter(|len| len.checked_add(SECONDARY_HEADER_LEN as u32).is_some())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("payload of {} bytes is too large", self.payload.len()),
                )
            })?;

        let mut frame = try_alloc(self.wire_size())?;
        frame[..PRIMARY_HEADER_LEN]
            .copy_from_slice(&PrimaryHeader::for_request(self.command, payload_len).to_bytes());
        if self.command.has_secondary_header() {
            let secondary = SecondaryHeader {
                payload_size: payload_len,
                reply_size: self.reply_size,
            };
            frame[PRIMARY_HEADER_LEN..PRIMARY_HEADER_LEN + SECONDARY_HEADER_LEN]
                .copy_from_slice(&secondary.to_bytes());
            frame[PRIMARY_HEADER_LEN + SECONDARY_HEADER_LEN..].copy_from_slice(&self.payload);
        }
        Ok(frame)
    }

    /// Sends the request with a single write.
    pub fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        writer.write_all(&self.to_bytes()?)
    }

    /// Reads a request as seen by the device.
    ///
    /// Commands without a secondary header carry no payload. The reply size
    /// of lock and unlock is fixed to one status byte.
    pub fn from_reader(reader: &mut impl Read, max_payload: usize) -> Result<Request, ReadError> {
        let header = PrimaryHeader::from_reader_strict(reader)?;
        let command = header.command();
        if !command.has_secondary_header() {
            let reply_size = match command {
                Command::LOCK | Command::UNLOCK => 1,
                _ => 0,
            };
            return Ok(Request::new(command, Vec::new(), reply_size));
        }

        let secondary = SecondaryHeader::from_reader(reader)?;
        let payload_size = secondary.payload_size as usize;
        if header.length() as usize != SECONDARY_HEADER_LEN + payload_size {
            return Err(ReadError::InvalidFormat(format!(
                "Header length {} does not match payload size {}",
                header.length(),
                payload_size
            )));
        }
        if payload_size > max_payload {
            return Err(ReadError::TooManyBytes {
                max: max_payload,
                got: payload_size,
            });
        }
        let mut payload = try_alloc(payload_size)?;
        reader.read_exact(&mut payload)?;
        Ok(Request::new(command, payload, secondary.reply_size))
    }
}

impl Reply {
    pub fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        let length = u32::try_from(self.payload.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "reply too large"))?;
        let mut frame = try_alloc(PRIMARY_HEADER_LEN + self.payload.len())?;
        frame[..PRIMARY_HEADER_LEN]
            .copy_from_slice(&PrimaryHeader::new(self.command, length).to_bytes());
        frame[PRIMARY_HEADER_LEN..].copy_from_slice(&self.payload);
        writer.write_all(&frame)
    }

    pub fn from_reader(reader: &mut impl Read, max_payload: usize) -> Result<Reply, ReadError> {
        let header = PrimaryHeader::from_reader_strict(reader)?;
        let len = header.length() as usize;
        if len > max_payload {
            return Err(ReadError::TooManyBytes {
                max: max_payload,
                got: len,
            });
        }
        let mut payload = try_alloc(len)?;
        reader.read_exact(&mut payload)?;
        Ok(Reply::new(header.command(), payload))
    }
}
