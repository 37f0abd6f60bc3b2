use std::path::PathBuf;

use scanwire_client::{DeviceLock, ScanChannel, ScanClient, TransportError};
use scanwire_protocol::{Command, Status};

use crate::{
    commands::{CommandSet, ScanParameters},
    error::{RealignError, ScanError},
    realign::{ChannelOffsets, Realigner},
    resample::{Passthrough, Resample},
};

#[derive(Debug, Clone)]
pub struct Config {
    /// Stable identifier of the device for the advisory cross-process lock.
    /// No advisory lock is taken when unset.
    pub lock_id: Option<String>,
    /// Directory of the lock file. Defaults to the system temp directory.
    pub lock_dir: Option<PathBuf>,
    /// Send the lock command when the session opens and unlock when it closes.
    pub device_lock: bool,
    /// Raw lines requested from the device per image read command.
    pub lines_per_request: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lock_id: None,
            lock_dir: None,
            device_lock: true,
            lines_per_request: 16,
        }
    }
}

/// Builder to open a [ScanSession] and modify configuration options
///
/// # Example
///
/// ```ignore
/// use scanwire_scan::{session::Builder, resample::AveragePairs, commands::Scsi2};
///
/// let session = Builder::new()
///     .lock_id("net:192.168.1.20:1865")
///     .lines_per_request(32)
///     .resampler(AveragePairs)
///     .open(client, Scsi2::default())?;
/// ```
pub struct Builder {
    config: Config,
    resampler: Box<dyn Resample>,
}

impl Default for Builder {
    fn default() -> Self {
        Builder {
            config: Config::default(),
            resampler: Box::new(Passthrough),
        }
    }
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    /// Take the advisory lock for `id` while the session is open.
    pub fn lock_id(mut self, id: impl Into<String>) -> Self {
        self.config.lock_id = Some(id.into());
        self
    }

    pub fn lock_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.lock_dir = Some(dir.into());
        self
    }

    /// Whether to claim the device with the lock command
    pub fn device_lock(mut self, lock: bool) -> Self {
        self.config.device_lock = lock;
        self
    }

    pub fn lines_per_request(mut self, lines: u32) -> Self {
        self.config.lines_per_request = lines;
        self
    }

    /// Post-process every realigned line with `resampler`
    pub fn resampler(mut self, resampler: impl Resample + 'static) -> Self {
        self.resampler = Box::new(resampler);
        self
    }

    /// Open the session
    pub fn open<C: ScanChannel, S: CommandSet>(
        self,
        client: ScanClient<C>,
        commands: S,
    ) -> Result<ScanSession<C, S>, ScanError> {
        ScanSession::open_with(client, commands, self.config, self.resampler)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SessionState {
    /// Open, no scan running.
    Idle,
    Scanning,
    /// A scan was cancelled. Commands can still be sent.
    Cancelled,
    Closed,
}

/// Book-keeping for the scan in progress.
#[derive(Debug)]
struct Progress {
    params: ScanParameters,
    /// Raw lines needed to produce `params.lines` realigned lines.
    raw_total: usize,
    raw_requested: usize,
    lines_per_request: usize,
    /// Raw lines of the last image reply that have not been read yet.
    reply_lines_left: usize,
    emitted: usize,
    raw_line: Vec<u8>,
}

/// One scanning session on one device.
///
/// Reads raw lines through the [`ScanClient`], feeds them into a [`Realigner`]
/// and hands out realigned lines. A session holds the advisory device lock (if
/// configured) from [`ScanSession::open`] until [`ScanSession::close`] or drop.
///
/// Transport, realignment and lock failures are fatal: the session resets both
/// components, releases its locks and only answers [`ScanError::Closed`] from then on.
pub struct ScanSession<C: ScanChannel, S: CommandSet> {
    client: ScanClient<C>,
    commands: S,
    config: Config,
    resampler: Box<dyn Resample>,
    realigner: Realigner,
    advisory_lock: Option<DeviceLock>,
    device_locked: bool,
    state: SessionState,
    progress: Option<Progress>,
}

impl<C: ScanChannel, S: CommandSet> ScanSession<C, S> {
    pub fn open(
        client: ScanClient<C>,
        commands: S,
        config: Config,
    ) -> Result<ScanSession<C, S>, ScanError> {
        ScanSession::open_with(client, commands, config, Box::new(Passthrough))
    }

    fn open_with(
        client: ScanClient<C>,
        commands: S,
        config: Config,
        resampler: Box<dyn Resample>,
    ) -> Result<ScanSession<C, S>, ScanError> {
        let advisory_lock = match &config.lock_id {
            Some(id) => Some(
                match &config.lock_dir {
                    Some(dir) => DeviceLock::acquire_in(dir, id),
                    None => DeviceLock::acquire(id),
                }
                .map_err(ScanError::Lock)?,
            ),
            None => None,
        };

        let mut session = ScanSession {
            client,
            commands,
            config,
            resampler,
            realigner: Realigner::new(),
            advisory_lock,
            device_locked: false,
            state: SessionState::Idle,
            progress: None,
        };

        if session.config.device_lock {
            let status = session.client.lock().map_err(ScanError::from);
            let status = session.fatal(status)?;
            if !status.is_good() {
                let error = ScanError::Device(status);
                session.abort(&error);
                return Err(error);
            }
            session.device_locked = true;
        }
        log::info!("Scan session open");
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn client(&self) -> &ScanClient<C> {
        &self.client
    }

    /// Channel offsets of the scan in progress
    pub fn offsets(&self) -> Option<ChannelOffsets> {
        self.progress.as_ref().map(|_| self.realigner.offsets())
    }

    /// Size of the lines handed out by [`ScanSession::read_line`] for the scan in progress.
    pub fn output_line_len(&self) -> Option<usize> {
        self.progress
            .as_ref()
            .map(|progress| self.resampler.output_len(progress.params.bytes_per_line()))
    }

    /// Realigned lines handed out so far in the scan in progress.
    pub fn lines_read(&self) -> usize {
        self.progress.as_ref().map_or(0, |progress| progress.emitted)
    }

    /// Starts a scan.
    ///
    /// Sends the start command, reads the channel skew of the device and sizes
    /// the realignment ring for it. The device has to deliver `lines` plus the
    /// largest channel offset raw lines, so that exactly `lines` realigned lines
    /// come out.
    pub fn start(&mut self, params: ScanParameters) -> Result<(), ScanError> {
        match self.state {
            SessionState::Closed => return Err(ScanError::Closed),
            SessionState::Scanning => return Err(ScanError::InProgress),
            SessionState::Idle | SessionState::Cancelled => {}
        }
        if params.pixels_per_line == 0 {
            return Err(RealignError::InvalidGeometry("zero pixels per line".to_string()).into());
        }
        let result = self.begin(params);
        self.fatal(result)
    }

    fn begin(&mut self, params: ScanParameters) -> Result<(), ScanError> {
        log::info!(
            "Starting scan: {} pixels x {} lines",
            params.pixels_per_line,
            params.lines
        );
        let mut status = [0u8; 1];
        self.client.transact(
            Command::PASSTHROUGH,
            &self.commands.start_scan(&params),
            &mut status,
        )?;
        let status = Status::from(status[0]);
        if !status.is_good() {
            log::warn!("Device refused to start the scan: {}", status);
            return Err(ScanError::Device(status));
        }

        let mut skew = [0u8; 2];
        self.client.transact(
            Command::PASSTHROUGH,
            &self.commands.read_line_offsets(),
            &mut skew,
        )?;
        let offsets = ChannelOffsets::from_skew_bytes(skew[0], skew[1]);
        log::debug!("Line skew bytes {:02x?}: {:?}", skew, offsets);

        let bytes_per_line = params.bytes_per_line();
        self.realigner.init(
            bytes_per_line,
            offsets.ring_depth(),
            self.commands.line_layout(),
        )?;
        self.realigner.configure(offsets)?;

        let max_bytes = self
            .client
            .config()
            .max_reply_size
            .min(self.commands.max_transfer()) as usize;
        let lines_per_request = (self.config.lines_per_request.max(1) as usize)
            .min(max_bytes / bytes_per_line)
            .max(1);

        self.progress = Some(Progress {
            params,
            raw_total: params.lines as usize + offsets.max(),
            raw_requested: 0,
            lines_per_request,
            reply_lines_left: 0,
            emitted: 0,
            raw_line: vec![0; bytes_per_line],
        });
        self.state = SessionState::Scanning;
        Ok(())
    }

    /// Reads the next realigned line into `out`.
    ///
    /// `out` must hold at least [`ScanSession::output_line_len`] bytes.
    ///
    /// # Returns
    ///
    /// `false` once all lines of the scan have been read. The session is idle again.
    pub fn read_line(&mut self, out: &mut [u8]) -> Result<bool, ScanError> {
        self.check_scanning()?;
        let needed = self.output_line_len().unwrap_or(0);
        if out.len() < needed {
            return Err(RealignError::OutputTooSmall {
                needed,
                got: out.len(),
            }
            .into());
        }
        let result = self.next_line(out);
        self.fatal(result)
    }

    fn next_line(&mut self, out: &mut [u8]) -> Result<bool, ScanError> {
        let progress = self.progress.as_mut().ok_or(ScanError::NotStarted)?;
        while progress.emitted < progress.params.lines as usize {
            if self.realigner.can_emit_line() {
                self.realigner
                    .emit_line_with(self.resampler.as_ref(), out)?;
                progress.emitted += 1;
                return Ok(true);
            }

            if progress.reply_lines_left == 0 {
                let count = progress
                    .lines_per_request
                    .min(progress.raw_total - progress.raw_requested);
                if count == 0 {
                    // every raw line is in and still nothing to emit
                    return Err(RealignError::LineNotReady.into());
                }
                let len = count * progress.raw_line.len();
                let len = u32::try_from(len).map_err(|_| TransportError::ReplyTooLarge {
                    max: u32::MAX as usize,
                    got: len,
                })?;
                self.client.write_command(
                    Command::PASSTHROUGH,
                    &self.commands.read_image(len),
                    len,
                )?;
                progress.raw_requested += count;
                progress.reply_lines_left = count;
            }

            let wanted = progress.raw_line.len();
            let read = self.client.read_reply(&mut progress.raw_line)?;
            if read != wanted {
                return Err(TransportError::SizeMismatch {
                    declared: read,
                    wanted,
                }
                .into());
            }
            progress.reply_lines_left -= 1;
            let consumed = self.realigner.push_line_bytes(&progress.raw_line);
            debug_assert_eq!(consumed, wanted);
        }

        log::info!("Scan complete after {} lines", progress.emitted);
        self.progress = None;
        self.realigner.reset();
        self.state = SessionState::Idle;
        Ok(false)
    }

    /// Reads all remaining lines of the scan in progress.
    pub fn read_to_end(&mut self) -> Result<Vec<u8>, ScanError> {
        self.check_scanning()?;
        let line_len = self.output_line_len().ok_or(ScanError::NotStarted)?;
        let mut image = Vec::new();
        let mut line = vec![0u8; line_len];
        while self.read_line(&mut line)? {
            image.extend_from_slice(&line);
        }
        Ok(image)
    }

    /// Stops the scan in progress.
    ///
    /// No more image data is requested. Buffered reply bytes and ring contents
    /// are dropped, the channel stays open for further commands such as
    /// [`ScanSession::reset_device`].
    pub fn cancel(&mut self) {
        if self.state != SessionState::Scanning {
            return;
        }
        log::info!("Cancelling scan after {} lines", self.lines_read());
        self.client.discard_pending();
        self.realigner.reset();
        self.progress = None;
        self.state = SessionState::Cancelled;
    }

    /// Sends a raw command block and reads its complete reply into `reply`.
    pub fn send(&mut self, block: &[u8], reply: &mut [u8]) -> Result<usize, ScanError> {
        match self.state {
            SessionState::Closed => return Err(ScanError::Closed),
            SessionState::Scanning => return Err(ScanError::InProgress),
            SessionState::Idle | SessionState::Cancelled => {}
        }
        let result = self
            .client
            .transact(Command::PASSTHROUGH, block, reply)
            .map_err(ScanError::from);
        self.fatal(result)
    }

    /// Sends the device back to its idle position.
    pub fn reset_device(&mut self) -> Result<Status, ScanError> {
        let block = self.commands.reset();
        let mut status = [0u8; 1];
        self.send(&block, &mut status)?;
        let status = Status::from(status[0]);
        log::debug!("Device reset: {}", status);
        if status.is_good() && self.state == SessionState::Cancelled {
            self.state = SessionState::Idle;
        }
        Ok(status)
    }

    /// Ends the session, unlocking the device and releasing the advisory lock.
    pub fn close(mut self) -> Result<(), ScanError> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        log::info!("Closing scan session");
        self.teardown()
    }

    fn check_scanning(&self) -> Result<(), ScanError> {
        match self.state {
            SessionState::Scanning => Ok(()),
            SessionState::Idle => Err(ScanError::NotStarted),
            SessionState::Cancelled => Err(ScanError::Cancelled),
            SessionState::Closed => Err(ScanError::Closed),
        }
    }

    fn fatal<T>(&mut self, result: Result<T, ScanError>) -> Result<T, ScanError> {
        if let Err(error) = &result
            && error.is_fatal()
        {
            self.abort(error);
        }
        result
    }

    fn abort(&mut self, error: &ScanError) {
        log::error!("Aborting scan session: {}", error);
        if let ScanError::Transport(err) = error
            && err.is_channel_failure()
            && self.device_locked
        {
            log::warn!("Channel failed, not sending unlock");
            self.device_locked = false;
        }
        if let Err(err) = self.teardown() {
            log::warn!("Teardown after abort failed: {}", err);
        }
    }

    fn teardown(&mut self) -> Result<(), ScanError> {
        self.client.discard_pending();
        self.realigner.reset();
        self.progress = None;
        self.state = SessionState::Closed;

        let mut result = Ok(());
        if std::mem::take(&mut self.device_locked) {
            match self.client.unlock() {
                Ok(status) if status.is_good() => {}
                Ok(status) => result = Err(ScanError::Device(status)),
                Err(err) => result = Err(err.into()),
            }
        }
        if let Some(lock) = self.advisory_lock.take()
            && let Err(err) = lock.release()
            && result.is_ok()
        {
            result = Err(ScanError::Lock(err));
        }
        result
    }
}

impl<C: ScanChannel, S: CommandSet> Drop for ScanSession<C, S> {
    fn drop(&mut self) {
        if self.state != SessionState::Closed
            && let Err(err) = self.teardown()
        {
            log::warn!("Scan session teardown failed: {}", err);
        }
    }
}

#[cfg(test)]
mod test {
    use super::{Builder, ScanSession, SessionState};
    use crate::{
        commands::{CommandSet, DATA_TYPE_IMAGE, READ_10, SCAN, ScanParameters, Scsi2},
        error::{RealignError, ScanError},
        realign::{ChannelOffsets, LineLayout},
        resample::AveragePairs,
    };
    use scanwire_client::{DeviceLock, ScanClient, TransportError};
    use scanwire_protocol::{Command, Reply, Request, Status};
    use std::io::{self, Cursor, Read, Write};

    struct ScriptedChannel {
        device_output: Cursor<Vec<u8>>,
        host_output: Vec<u8>,
    }

    impl ScriptedChannel {
        fn new(replies: &[Reply]) -> ScriptedChannel {
            let mut wire = Vec::new();
            for reply in replies {
                reply.write_to(&mut wire).unwrap();
            }
            ScriptedChannel {
                device_output: Cursor::new(wire),
                host_output: Vec::new(),
            }
        }

        fn unread(&self) -> usize {
            self.device_output.get_ref().len() - self.device_output.position() as usize
        }

        fn requests(&self) -> Vec<Request> {
            let mut reader = Cursor::new(&self.host_output);
            let mut requests = Vec::new();
            while (reader.position() as usize) < self.host_output.len() {
                requests.push(Request::from_reader(&mut reader, 1024).unwrap());
            }
            requests
        }
    }

    impl Read for ScriptedChannel {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.device_output.read(buf)
        }
    }

    impl Write for ScriptedChannel {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.host_output.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn status(command: Command, status: Status) -> Reply {
        Reply::status(command, status)
    }

    fn data(payload: Vec<u8>) -> Reply {
        Reply::new(Command::PASSTHROUGH, payload)
    }

    /// Planar raw lines of a sensor with the given offsets. Scan position `p`
    /// has value `p * 10 + pixel + 1` in every channel.
    fn skewed_planar(pixels: usize, raw_lines: usize, offsets: ChannelOffsets) -> Vec<Vec<u8>> {
        (0..raw_lines)
            .map(|raw| {
                let mut line = vec![0u8; pixels * 3];
                for (channel, offset) in [offsets.red, offsets.green, offsets.blue]
                    .into_iter()
                    .enumerate()
                {
                    if let Some(position) = raw.checked_sub(offset) {
                        for pixel in 0..pixels {
                            line[channel * pixels + pixel] = (position * 10 + pixel + 1) as u8;
                        }
                    }
                }
                line
            })
            .collect()
    }

    fn aligned(pixels: usize, position: usize) -> Vec<u8> {
        (0..pixels)
            .flat_map(|pixel| [(position * 10 + pixel + 1) as u8; 3])
            .collect()
    }

    #[test]
    fn scan_is_realigned() {
        let offsets = ChannelOffsets::new(0, 1, 2);
        let raw = skewed_planar(2, 5, offsets);
        let channel = ScriptedChannel::new(&[
            status(Command::LOCK, Status::Good),
            status(Command::PASSTHROUGH, Status::Good),
            data(vec![0x01, 0x02]),
            data(raw[0..2].concat()),
            data(raw[2..4].concat()),
            data(raw[4..5].concat()),
            status(Command::UNLOCK, Status::Good),
        ]);
        let mut session = Builder::new()
            .lines_per_request(2)
            .open(ScanClient::new(channel), Scsi2::default())
            .unwrap();

        session.start(ScanParameters::new(2, 3)).unwrap();
        assert_eq!(session.state(), SessionState::Scanning);
        assert_eq!(session.offsets(), Some(offsets));
        assert_eq!(session.output_line_len(), Some(6));

        let mut line = [0u8; 6];
        for position in 0..3 {
            assert!(session.read_line(&mut line).unwrap());
            assert_eq!(line.to_vec(), aligned(2, position));
        }
        assert!(!session.read_line(&mut line).unwrap());
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.client().get_ref().unread(), 1 + 12);

        let requests = session.client().get_ref().requests();
        let commands: Vec<_> = requests.iter().map(|r| r.command).collect();
        assert_eq!(
            commands,
            vec![
                Command::LOCK,
                Command::PASSTHROUGH,
                Command::PASSTHROUGH,
                Command::PASSTHROUGH,
                Command::PASSTHROUGH,
                Command::PASSTHROUGH,
            ]
        );
        assert_eq!(requests[1].payload[0], SCAN);
        assert_eq!(requests[1].reply_size, 1);
        assert_eq!(requests[2].reply_size, 2);
        let image_sizes: Vec<_> = requests[3..].iter().map(|r| r.reply_size).collect();
        assert_eq!(image_sizes, vec![12, 12, 6]);
        assert_eq!(requests[3].payload[0], READ_10);
        assert_eq!(requests[3].payload[2], DATA_TYPE_IMAGE);
        assert_eq!(requests[3].payload[8], 12);

        session.close().unwrap();
    }

    #[test]
    fn read_to_end_with_resampler() {
        let offsets = ChannelOffsets::new(2, 0, 0);
        // green and blue lead red by two lines
        let raw = skewed_planar(4, 3, offsets);
        let channel = ScriptedChannel::new(&[
            status(Command::PASSTHROUGH, Status::Good),
            data(vec![0x82, 0x82]),
            data(raw.concat()),
        ]);
        let mut session = Builder::new()
            .device_lock(false)
            .resampler(AveragePairs)
            .open(ScanClient::new(channel), Scsi2::default())
            .unwrap();
        session.start(ScanParameters::new(4, 1)).unwrap();
        assert_eq!(session.offsets(), Some(offsets));
        assert_eq!(session.output_line_len(), Some(6));

        let image = session.read_to_end().unwrap();
        // pixels 1,2 and 3,4 averaged, rounding up
        assert_eq!(image, vec![2, 2, 2, 4, 4, 4]);
        assert_eq!(session.client().get_ref().unread(), 0);
        session.close().unwrap();
    }

    #[test]
    fn cancel_keeps_channel_usable() {
        let offsets = ChannelOffsets::new(0, 0, 1);
        let raw = skewed_planar(1, 4, offsets);
        let channel = ScriptedChannel::new(&[
            status(Command::LOCK, Status::Good),
            status(Command::PASSTHROUGH, Status::Good),
            data(vec![0x00, 0x01]),
            data(raw[0..4].concat()),
            status(Command::PASSTHROUGH, Status::Good),
            status(Command::UNLOCK, Status::Good),
        ]);
        let mut session = Builder::new()
            .lines_per_request(4)
            .open(ScanClient::new(channel), Scsi2::default())
            .unwrap();
        session.start(ScanParameters::new(1, 3)).unwrap();

        let mut line = [0u8; 3];
        assert!(session.read_line(&mut line).unwrap());
        assert!(session.client().pending_len() > 0);

        session.cancel();
        assert_eq!(session.state(), SessionState::Cancelled);
        assert_eq!(session.client().pending_len(), 0);
        assert!(matches!(
            session.read_line(&mut line),
            Err(ScanError::Cancelled)
        ));

        assert_eq!(session.reset_device().unwrap(), Status::Good);
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.client().get_ref().unread(), 13);
        session.close().unwrap();
    }

    #[test]
    fn refused_start_is_not_fatal() {
        let channel = ScriptedChannel::new(&[
            status(Command::LOCK, Status::Good),
            status(Command::PASSTHROUGH, Status::DeviceBusy),
            status(Command::UNLOCK, Status::Good),
        ]);
        let mut session = ScanSession::open(
            ScanClient::new(channel),
            Scsi2::default(),
            Default::default(),
        )
        .unwrap();
        assert!(matches!(
            session.start(ScanParameters::new(4, 4)),
            Err(ScanError::Device(Status::DeviceBusy))
        ));
        assert_eq!(session.state(), SessionState::Idle);
        session.close().unwrap();
    }

    #[test]
    fn size_mismatch_aborts_and_unlocks() {
        let dir = tempfile::tempdir().unwrap();
        let channel = ScriptedChannel::new(&[
            status(Command::LOCK, Status::Good),
            status(Command::PASSTHROUGH, Status::Good),
            data(vec![0x00, 0x00]),
            // one line short
            data(vec![7; 3]),
            status(Command::UNLOCK, Status::Good),
        ]);
        let mut session = Builder::new()
            .lock_id("scanner")
            .lock_dir(dir.path())
            .open(ScanClient::new(channel), Scsi2::default())
            .unwrap();
        assert!(
            DeviceLock::try_acquire_in(dir.path(), "scanner")
                .unwrap()
                .is_none()
        );

        session.start(ScanParameters::new(2, 1)).unwrap();
        let mut line = [0u8; 6];
        assert!(matches!(
            session.read_line(&mut line),
            Err(ScanError::Transport(TransportError::SizeMismatch {
                declared: 3,
                wanted: 6
            }))
        ));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(matches!(
            session.read_line(&mut line),
            Err(ScanError::Closed)
        ));
        assert!(
            DeviceLock::try_acquire_in(dir.path(), "scanner")
                .unwrap()
                .is_some()
        );
        // the short reply was skipped, so the device lock could be released
        let requests = session.client().get_ref().requests();
        assert_eq!(requests.last().map(|r| r.command), Some(Command::UNLOCK));
        assert_eq!(session.client().get_ref().unread(), 0);
        session.close().unwrap();
    }

    #[test]
    fn oversized_request_aborts_and_unlocks() {
        let channel = ScriptedChannel::new(&[
            status(Command::LOCK, Status::Good),
            status(Command::PASSTHROUGH, Status::Good),
            data(vec![0x00, 0x00]),
            status(Command::UNLOCK, Status::Good),
        ]);
        let client = scanwire_client::Builder::new()
            .max_reply_size(8)
            .build(channel);
        let mut session = Builder::new().open(client, Scsi2::default()).unwrap();

        // 12 bytes per line, more than one reply may hold
        session.start(ScanParameters::new(4, 2)).unwrap();
        let mut line = [0u8; 12];
        assert!(matches!(
            session.read_line(&mut line),
            Err(ScanError::Transport(TransportError::ReplyTooLarge { max: 8, got: 12 }))
        ));
        assert_eq!(session.state(), SessionState::Closed);

        let commands: Vec<_> = session
            .client()
            .get_ref()
            .requests()
            .iter()
            .map(|r| r.command)
            .collect();
        assert_eq!(
            commands,
            vec![
                Command::LOCK,
                Command::PASSTHROUGH,
                Command::PASSTHROUGH,
                Command::UNLOCK
            ]
        );
    }

    #[test]
    fn channel_failure_skips_unlock() {
        let dir = tempfile::tempdir().unwrap();
        // the channel closes before the image data
        let channel = ScriptedChannel::new(&[
            status(Command::LOCK, Status::Good),
            status(Command::PASSTHROUGH, Status::Good),
            data(vec![0x00, 0x00]),
        ]);
        let mut session = Builder::new()
            .lock_id("scanner")
            .lock_dir(dir.path())
            .open(ScanClient::new(channel), Scsi2::default())
            .unwrap();

        session.start(ScanParameters::new(2, 1)).unwrap();
        let mut line = [0u8; 6];
        assert!(matches!(
            session.read_line(&mut line),
            Err(ScanError::Transport(TransportError::Io(_)))
        ));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(
            DeviceLock::try_acquire_in(dir.path(), "scanner")
                .unwrap()
                .is_some()
        );
        let requests = session.client().get_ref().requests();
        assert!(requests.iter().all(|r| r.command != Command::UNLOCK));
        session.close().unwrap();
    }

    #[test]
    fn refused_lock_releases_advisory_lock() {
        let dir = tempfile::tempdir().unwrap();
        let channel = ScriptedChannel::new(&[status(Command::LOCK, Status::DeviceBusy)]);
        let result = Builder::new()
            .lock_id("scanner")
            .lock_dir(dir.path())
            .open(ScanClient::new(channel), Scsi2::default());
        assert!(matches!(result, Err(ScanError::Device(Status::DeviceBusy))));
        assert!(
            DeviceLock::try_acquire_in(dir.path(), "scanner")
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn drop_releases_locks() {
        let dir = tempfile::tempdir().unwrap();
        let channel = ScriptedChannel::new(&[
            status(Command::LOCK, Status::Good),
            status(Command::UNLOCK, Status::Good),
        ]);
        {
            let _session = Builder::new()
                .lock_id("scanner")
                .lock_dir(dir.path())
                .open(ScanClient::new(channel), Scsi2::default())
                .unwrap();
        }
        assert!(
            DeviceLock::try_acquire_in(dir.path(), "scanner")
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn misuse_is_reported() {
        let channel = ScriptedChannel::new(&[
            status(Command::PASSTHROUGH, Status::Good),
            data(vec![0x00, 0x00]),
        ]);
        let mut session = Builder::new()
            .device_lock(false)
            .open(ScanClient::new(channel), Scsi2::new(LineLayout::Interleaved))
            .unwrap();
        let mut line = [0u8; 3];
        assert!(matches!(
            session.read_line(&mut line),
            Err(ScanError::NotStarted)
        ));
        assert!(matches!(
            session.start(ScanParameters::new(0, 1)),
            Err(ScanError::Realign(RealignError::InvalidGeometry(_)))
        ));
        assert_eq!(session.state(), SessionState::Idle);

        session.start(ScanParameters::new(1, 1)).unwrap();
        assert!(matches!(
            session.start(ScanParameters::new(1, 1)),
            Err(ScanError::InProgress)
        ));
        assert!(matches!(
            session.send(&Scsi2::default().reset(), &mut [0]),
            Err(ScanError::InProgress)
        ));
        assert!(matches!(
            session.read_line(&mut [0u8; 2]),
            Err(ScanError::Realign(RealignError::OutputTooSmall { needed: 3, got: 2 }))
        ));
        // a caller error, the scan goes on
        assert_eq!(session.state(), SessionState::Scanning);
    }
}
