//! Device-side codec for [`tokio_util::codec::Framed`].
//!
//! Decodes [`Request`]s sent by a host and encodes [`Reply`]s. This is what a
//! network-attached scanner, or an emulation of one, speaks.
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    error::ReadError,
    protocol::{
        Command, PRIMARY_HEADER_LEN, PrimaryHeader, Reply, Request, SECONDARY_HEADER_LEN,
        SecondaryHeader,
    },
};

#[derive(Debug, Clone)]
pub struct DeviceCodec {
    max_payload: usize,
}

impl DeviceCodec {
    pub fn new(max_payload: usize) -> DeviceCodec {
        DeviceCodec { max_payload }
    }
}

impl Default for DeviceCodec {
    fn default() -> Self {
        DeviceCodec::new(16 * 1024 * 1024)
    }
}

impl Decoder for DeviceCodec {
    type Item = Request;
    type Error = ReadError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Request>, ReadError> {
        if src.len() < PRIMARY_HEADER_LEN {
            return Ok(None);
        }
        let primary: [u8; PRIMARY_HEADER_LEN] = src[..PRIMARY_HEADER_LEN]
            .try_into()
            .map_err(|_| ReadError::InvalidFormat("short primary header".to_string()))?;
        let header = PrimaryHeader::from_bytes(&primary);
        if !header.has_valid_magic() {
            return Err(ReadError::InvalidMagic(header.magic()));
        }

        let command = header.command();
        if !command.has_secondary_header() {
            src.advance(PRIMARY_HEADER_LEN);
            let reply_size = match command {
                Command::LOCK | Command::UNLOCK => 1,
                _ => 0,
            };
            return Ok(Some(Request::new(command, Vec::new(), reply_size)));
        }

        if src.len() < PRIMARY_HEADER_LEN + SECONDARY_HEADER_LEN {
            return Ok(None);
        }
        let secondary: [u8; SECONDARY_HEADER_LEN] = src
            [PRIMARY_HEADER_LEN..PRIMARY_HEADER_LEN + SECONDARY_HEADER_LEN]
            .try_into()
            .map_err(|_| ReadError::InvalidFormat("short secondary header".to_string()))?;
        let secondary = SecondaryHeader::from_bytes(&secondary);
        let payload_size = secondary.payload_size as usize;
        if header.length() as usize != SECONDARY_HEADER_LEN + payload_size {
            return Err(ReadError::InvalidFormat(format!(
                "Header length {} does not match payload size {}",
                header.length(),
                payload_size
            )));
        }
        if payload_size > self.max_payload {
            return Err(ReadError::TooManyBytes {
                max: self.max_payload,
                got: payload_size,
            });
        }

        let total = PRIMARY_HEADER_LEN + SECONDARY_HEADER_LEN + payload_size;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }
        src.advance(PRIMARY_HEADER_LEN + SECONDARY_HEADER_LEN);
        let payload = src.split_to(payload_size);
        Ok(Some(Request::new(
            command,
            payload.to_vec(),
            secondary.reply_size,
        )))
    }
}

impl Encoder<Reply> for DeviceCodec {
    type Error = ReadError;

    fn encode(&mut self, item: Reply, dst: &mut BytesMut) -> Result<(), ReadError> {
        let length = u32::try_from(item.payload.len()).map_err(|_| ReadError::TooManyBytes {
            max: u32::MAX as usize,
            got: item.payload.len(),
        })?;
        dst.reserve(PRIMARY_HEADER_LEN + item.payload.len());
        dst.put_slice(&PrimaryHeader::new(item.command, length).to_bytes());
        dst.put_slice(&item.payload);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::DeviceCodec;
    use crate::error::ReadError;
    use crate::protocol::{Command, PRIMARY_HEADER_LEN, Reply, Request, Status};
    use bytes::BytesMut;
    use tokio_util::codec::{Decoder, Encoder};

    #[test]
    fn decode_in_pieces() {
        let request = Request::new(Command::PASSTHROUGH, vec![0x1B, 0, 0, 0, 0, 0], 1);
        let wire = request.to_bytes().unwrap();
        let mut codec = DeviceCodec::default();
        let mut buf = BytesMut::new();

        for byte in &wire[..wire.len() - 1] {
            buf.extend_from_slice(&[*byte]);
            assert!(codec.decode(&mut buf).unwrap().is_none());
        }
        buf.extend_from_slice(&wire[wire.len() - 1..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(request));
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_back_to_back() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&Request::new(Command::LOCK, Vec::new(), 1).to_bytes().unwrap());
        buf.extend_from_slice(&Request::new(Command::UNLOCK, Vec::new(), 1).to_bytes().unwrap());

        let mut codec = DeviceCodec::default();
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().command, Command::LOCK);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().command, Command::UNLOCK);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn decode_rejects_bad_magic() {
        let mut buf = BytesMut::from(&b"XS\x21\x00\x00\x0c\0\0\0\0\0\0"[..]);
        match DeviceCodec::default().decode(&mut buf) {
            Err(ReadError::InvalidMagic(magic)) => assert_eq!(&magic, b"XS"),
            other => panic!("expected InvalidMagic, got {:?}", other),
        }
    }

    #[test]
    fn decode_rejects_oversized_payload() {
        let wire = Request::new(Command::PASSTHROUGH, vec![0; 32], 0)
            .to_bytes()
            .unwrap();
        let mut buf = BytesMut::from(&wire[..]);
        match DeviceCodec::new(16).decode(&mut buf) {
            Err(ReadError::TooManyBytes { max, got }) => assert_eq!((max, got), (16, 32)),
            other => panic!("expected TooManyBytes, got {:?}", other),
        }
    }

    #[test]
    fn encode_matches_blocking_writer() {
        let reply = Reply::status(Command::LOCK, Status::Good);
        let mut expected = Vec::new();
        reply.write_to(&mut expected).unwrap();

        let mut buf = BytesMut::new();
        DeviceCodec::default().encode(reply, &mut buf).unwrap();
        assert_eq!(&buf[..], &expected[..]);
        assert_eq!(buf.len(), PRIMARY_HEADER_LEN + 1);
    }
}
