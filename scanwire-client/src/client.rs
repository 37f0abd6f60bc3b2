use std::io;

use scanwire_protocol::{Command, PRIMARY_HEADER_LEN, PrimaryHeader, Request, Status};

use crate::{ScanChannel, error::TransportError};

const DISCARD_CHUNK: usize = 4096;

#[derive(Debug, Clone)]
pub struct Config {
    /// Treat a reply header with the wrong magic tag as an error instead of
    /// logging it and trusting the length field.
    pub strict_magic: bool,
    /// The largest reply that may be announced with [`ScanClient::write_command`].
    pub max_reply_size: u32,
    /// Dump every header at trace level.
    pub trace_frames: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            strict_magic: false,
            max_reply_size: 16 * 1024 * 1024,
            trace_frames: false,
        }
    }
}

/// Builder to create a [ScanClient] instance and modify configuration options
///
/// # Example
///
/// ```ignore
/// use scanwire_client::Builder;
///
/// let client = Builder::new()
///     .strict_magic(true)
///     .max_reply_size(1024 * 1024)
///     .build(channel);
/// ```
#[derive(Default)]
pub struct Builder {
    config: Config,
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    /// Fail on reply headers with a bad magic tag.
    pub fn strict_magic(mut self, strict: bool) -> Self {
        self.config.strict_magic = strict;
        self
    }

    /// Set the largest reply the client agrees to buffer.
    pub fn max_reply_size(mut self, size: u32) -> Self {
        self.config.max_reply_size = size;
        self
    }

    /// Log every frame header at trace level
    pub fn trace_frames(mut self, trace: bool) -> Self {
        self.config.trace_frames = trace;
        self
    }

    /// Build and return the client
    pub fn build<C: ScanChannel>(self, channel: C) -> ScanClient<C> {
        ScanClient::with_config(channel, self.config)
    }
}

/// A reply that has been announced or received, but not yet handed out completely.
#[derive(Debug)]
struct PendingReply {
    data: Vec<u8>,
    cursor: usize,
    filled: bool,
}

impl PendingReply {
    fn allocate(size: usize) -> Result<PendingReply, TransportError> {
        let mut data = Vec::new();
        data.try_reserve_exact(size)
            .map_err(|_| TransportError::OutOfMemory { requested: size })?;
        data.resize(size, 0);
        Ok(PendingReply {
            data,
            cursor: 0,
            filled: false,
        })
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }

    fn remaining(&self) -> usize {
        if self.filled {
            self.data.len() - self.cursor
        } else {
            0
        }
    }

    fn drain_into(&mut self, buf: &mut [u8]) -> usize {
        let n = self.remaining().min(buf.len());
        buf[..n].copy_from_slice(&self.data[self.cursor..self.cursor + n]);
        self.cursor += n;
        n
    }
}

/// Framed request/response transport over a [`ScanChannel`].
///
/// Replies can be read in pieces smaller than the whole reply. The first read
/// pulls the complete reply off the channel and keeps the rest until it has
/// been handed out, so the command never needs to be issued twice.
/// There is at most one outstanding reply at any time.
pub struct ScanClient<C: ScanChannel> {
    channel: C,
    pending: Option<PendingReply>,
    config: Config,
}

impl<C: ScanChannel> ScanClient<C> {
    pub fn new(channel: C) -> ScanClient<C> {
        ScanClient::with_config(channel, Config::default())
    }

    pub fn with_config(channel: C, config: Config) -> ScanClient<C> {
        ScanClient {
            channel,
            pending: None,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn get_ref(&self) -> &C {
        &self.channel
    }

    pub fn get_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    pub fn into_inner(self) -> C {
        self.channel
    }

    /// Number of buffered reply bytes that have not been read yet.
    pub fn pending_len(&self) -> usize {
        self.pending.as_ref().map_or(0, PendingReply::remaining)
    }

    /// Drops any buffered or announced reply. The channel itself stays usable.
    pub fn discard_pending(&mut self) {
        if let Some(pending) = self.pending.take()
            && pending.remaining() > 0
        {
            log::debug!("Discarding {} unread reply bytes", pending.remaining());
        }
    }

    /// Sends `command` with `payload` and announces a reply of `reply_size` bytes.
    ///
    /// A non-zero `reply_size` allocates the reply buffer up front so that the
    /// reply can later be read in pieces.
    ///
    /// # Returns
    ///
    /// The number of bytes written to the channel.
    pub fn write_command(
        &mut self,
        command: Command,
        payload: &[u8],
        reply_size: u32,
    ) -> Result<usize, TransportError> {
        if reply_size > self.config.max_reply_size {
            return Err(TransportError::ReplyTooLarge {
                max: self.config.max_reply_size as usize,
                got: reply_size as usize,
            });
        }
        if let Some(stale) = self.pending.take()
            && stale.remaining() > 0
        {
            log::warn!(
                "Dropping {} unread bytes of the previous reply before sending {}",
                stale.remaining(),
                command
            );
        }
        if reply_size > 0 {
            self.pending = Some(PendingReply::allocate(reply_size as usize)?);
        }

        let request = Request::new(command, payload, reply_size);
        let frame = request.to_bytes().map_err(|err| match err.kind() {
            io::ErrorKind::OutOfMemory => TransportError::OutOfMemory {
                requested: request.wire_size(),
            },
            _ => TransportError::Io(err),
        })?;
        log::debug!(
            "Sending {} command: payload_len={}, reply_size={}",
            command,
            payload.len(),
            reply_size
        );
        if self.config.trace_frames {
            log::trace!("Request header: {:02x?}", &frame[..PRIMARY_HEADER_LEN]);
        }
        let written = self.channel.write(&frame)?;
        Ok(written)
    }

    /// Reads up to `buf.len()` bytes of the current reply.
    ///
    /// Buffered bytes of an earlier, partially read reply are served first.
    /// Otherwise a reply header is read from the channel and
    /// - if it announces exactly `buf.len()` bytes, they are read straight into `buf`
    /// - if it announces more and that size was announced with the command, the
    ///   whole reply is buffered and the first `buf.len()` bytes are returned
    /// - otherwise the payload is discarded and [`TransportError::SizeMismatch`]
    ///   is returned, unless it exceeds [`Config::max_reply_size`]; then it is
    ///   left unread and [`TransportError::LostSync`] is returned
    ///
    /// # Returns
    ///
    /// The number of bytes copied into `buf`.
    pub fn read_reply(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if let Some(pending) = self.pending.as_mut()
            && pending.remaining() > 0
        {
            let n = pending.drain_into(buf);
            log::trace!(
                "Served {} bytes from buffered reply, {} left",
                n,
                pending.remaining()
            );
            if pending.remaining() == 0 {
                self.pending = None;
            }
            return Ok(n);
        }

        let mut raw = [0u8; PRIMARY_HEADER_LEN];
        self.channel.read(&mut raw)?;
        let header = PrimaryHeader::from_bytes(&raw);
        if self.config.trace_frames {
            log::trace!("Reply header: {:02x?}", raw);
        }
        if !header.has_valid_magic() {
            if self.config.strict_magic {
                self.pending = None;
                return Err(TransportError::BadMagic(header.magic()));
            }
            log::warn!(
                "Reply header has invalid magic {:02x?}, continuing with declared length {}",
                header.magic(),
                header.length()
            );
        }

        let size = header.length() as usize;
        let wanted = buf.len();
        if size == wanted {
            self.pending = None;
            self.channel.read(buf)?;
            return Ok(size);
        }

        if let Some(pending) = self
            .pending
            .as_mut()
            .filter(|pending| wanted < size && pending.capacity() == size)
        {
            self.channel.read(&mut pending.data)?;
            pending.filled = true;
            let n = pending.drain_into(buf);
            log::trace!("Buffered reply of {} bytes, handed out {}", size, n);
            return Ok(n);
        }

        self.pending = None;
        let max = self.config.max_reply_size as usize;
        if size > max {
            log::error!(
                "Reply declares {} bytes, more than the maximum of {}, not draining it",
                size,
                max
            );
            return Err(TransportError::LostSync {
                declared: size,
                max,
            });
        }
        log::error!(
            "Reply of {} bytes does not fit a read of {} bytes, discarding it",
            size,
            wanted
        );
        self.skip(size)?;
        Err(TransportError::SizeMismatch {
            declared: size,
            wanted,
        })
    }

    /// Sends a command and reads its complete reply into `reply`.
    pub fn transact(
        &mut self,
        command: Command,
        payload: &[u8],
        reply: &mut [u8],
    ) -> Result<usize, TransportError> {
        let reply_size = u32::try_from(reply.len()).map_err(|_| TransportError::ReplyTooLarge {
            max: self.config.max_reply_size as usize,
            got: reply.len(),
        })?;
        self.write_command(command, payload, reply_size)?;
        if reply.is_empty() {
            return Ok(0);
        }
        self.read_reply(reply)
    }

    /// Claims exclusive access to the device.
    pub fn lock(&mut self) -> Result<Status, TransportError> {
        self.status_command(Command::LOCK)
    }

    /// Releases exclusive access to the device.
    pub fn unlock(&mut self) -> Result<Status, TransportError> {
        self.status_command(Command::UNLOCK)
    }

    fn status_command(&mut self, command: Command) -> Result<Status, TransportError> {
        let mut status = [0u8; 1];
        self.transact(command, &[], &mut status)?;
        let status = Status::from(status[0]);
        log::debug!("Device answered {} with status: {}", command, status);
        Ok(status)
    }

    fn skip(&mut self, mut len: usize) -> Result<(), TransportError> {
        let mut scratch = [0u8; DISCARD_CHUNK];
        while len > 0 {
            let n = len.min(DISCARD_CHUNK);
            self.channel.read(&mut scratch[..n])?;
            len -= n;
        }
        Ok(())
    }
}
