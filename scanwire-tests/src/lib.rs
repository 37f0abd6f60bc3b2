//! Emulated network scanner for end-to-end tests.
//!
//! [`MockScanner`] accepts TCP connections and answers the framed protocol through
//! [`DeviceCodec`]. It understands the [`Scsi2`](scanwire_scan::commands::Scsi2)
//! command blocks and produces raw lines with a configurable channel skew, so the
//! host has to realign them to get [`expected_image`] back.
use std::{
    io,
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use futures_util::{SinkExt, StreamExt};
use scanwire_protocol::{
    Command, Reply, Request, Status, error::ReadError, tokio_codec::DeviceCodec,
};
use scanwire_scan::{
    ChannelOffsets, LineLayout,
    commands::{DATA_TYPE_IMAGE, DATA_TYPE_LINE_OFFSETS, OBJECT_POSITION, READ_10, SCAN},
};
use tokio::{
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};
use tokio_util::codec::Framed;

/// Value of `channel` of `pixel` at scan position `position`.
pub fn pixel_value(position: usize, pixel: usize, channel: usize) -> u8 {
    ((position * 7 + pixel * 3 + channel * 85) % 256) as u8
}

/// The `RGBRGB...` image a correct host reconstructs.
pub fn expected_image(pixels: usize, lines: usize) -> Vec<u8> {
    let mut image = Vec::with_capacity(pixels * lines * 3);
    for position in 0..lines {
        for pixel in 0..pixels {
            for channel in 0..3 {
                image.push(pixel_value(position, pixel, channel));
            }
        }
    }
    image
}

/// Raw line `raw` as the sensor delivers it: channel `c` sees scan position `raw - offset_c`.
pub fn raw_line(
    raw: usize,
    pixels: usize,
    offsets: ChannelOffsets,
    layout: LineLayout,
) -> Vec<u8> {
    let mut line = vec![0u8; pixels * 3];
    for (channel, offset) in [offsets.red, offsets.green, offsets.blue]
        .into_iter()
        .enumerate()
    {
        let Some(position) = raw.checked_sub(offset) else {
            continue;
        };
        for pixel in 0..pixels {
            let index = match layout {
                LineLayout::Planar => channel * pixels + pixel,
                LineLayout::Interleaved => pixel * 3 + channel,
            };
            line[index] = pixel_value(position, pixel, channel);
        }
    }
    line
}

#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Green-to-red skew byte, sign-magnitude
    pub green_skew: u8,
    /// Blue-to-red skew byte, sign-magnitude
    pub blue_skew: u8,
    pub layout: LineLayout,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            green_skew: 0x02,
            blue_skew: 0x04,
            layout: LineLayout::Planar,
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    next_connection: u64,
    lock_holder: Option<u64>,
    commands: Vec<Command>,
}

#[derive(Debug)]
struct ScanState {
    pixels: usize,
    next_raw: usize,
}

pub struct MockScanner {
    listener: TcpListener,
    config: MockConfig,
    shared: Arc<Mutex<Shared>>,
}

impl MockScanner {
    pub async fn bind(config: MockConfig) -> io::Result<MockScanner> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        Ok(MockScanner {
            listener,
            config,
            shared: Arc::default(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Every command received so far, over all connections.
    pub fn commands(&self) -> Vec<Command> {
        self.shared.lock().map(|s| s.commands.clone()).unwrap_or_default()
    }

    /// Serves connections until the runtime shuts down.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let (stream, peer) = match self.listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        log::error!("Mock scanner accept failed: {}", err);
                        return;
                    }
                };
                let id = match self.shared.lock() {
                    Ok(mut shared) => {
                        shared.next_connection += 1;
                        shared.next_connection
                    }
                    Err(_) => return,
                };
                log::debug!("Mock scanner connection {} from {}", id, peer);
                let connection = Connection {
                    id,
                    config: self.config.clone(),
                    shared: self.shared.clone(),
                    scan: None,
                };
                tokio::spawn(async move {
                    if let Err(err) = connection.serve(stream).await {
                        log::debug!("Mock scanner connection {} failed: {}", id, err);
                    }
                });
            }
        })
    }
}

struct Connection {
    id: u64,
    config: MockConfig,
    shared: Arc<Mutex<Shared>>,
    scan: Option<ScanState>,
}

impl Connection {
    async fn serve(mut self, stream: TcpStream) -> Result<(), ReadError> {
        let mut framed = Framed::new(stream, DeviceCodec::default());
        let result = self.run(&mut framed).await;
        // a lock dies with its connection
        self.release();
        result
    }

    async fn run(&mut self, framed: &mut Framed<TcpStream, DeviceCodec>) -> Result<(), ReadError> {
        while let Some(request) = framed.next().await {
            let reply = self.handle(request?);
            framed.send(reply).await?;
        }
        Ok(())
    }

    fn release(&self) {
        if let Ok(mut shared) = self.shared.lock()
            && shared.lock_holder == Some(self.id)
        {
            shared.lock_holder = None;
        }
    }

    fn handle(&mut self, request: Request) -> Reply {
        if let Ok(mut shared) = self.shared.lock() {
            shared.commands.push(request.command);
        }
        match request.command {
            Command::LOCK | Command::UNLOCK => self.lock_command(request.command),
            Command::PASSTHROUGH => self.passthrough(&request.payload),
            other => Reply::status(other, Status::Unsupported),
        }
    }

    fn lock_command(&self, command: Command) -> Reply {
        let Ok(mut shared) = self.shared.lock() else {
            return Reply::status(command, Status::IoError);
        };
        let status = match (command, shared.lock_holder) {
            (Command::LOCK, None) => {
                shared.lock_holder = Some(self.id);
                Status::Good
            }
            (Command::LOCK, Some(holder)) if holder == self.id => Status::Good,
            (Command::LOCK, Some(_)) => Status::DeviceBusy,
            (_, Some(holder)) if holder == self.id => {
                shared.lock_holder = None;
                Status::Good
            }
            _ => Status::Invalid,
        };
        Reply::status(command, status)
    }

    fn passthrough(&mut self, block: &[u8]) -> Reply {
        match block {
            [SCAN, _, _, _, _, _, p0, p1, p2, p3, _, _, _, _, ..] => {
                let pixels = u32::from_be_bytes([*p0, *p1, *p2, *p3]) as usize;
                self.scan = Some(ScanState {
                    pixels,
                    next_raw: 0,
                });
                Reply::status(Command::PASSTHROUGH, Status::Good)
            }
            [READ_10, _, data_type, _, _, _, l0, l1, l2, ..] => {
                let len = u32::from_be_bytes([0, *l0, *l1, *l2]) as usize;
                match *data_type {
                    DATA_TYPE_LINE_OFFSETS => Reply::new(
                        Command::PASSTHROUGH,
                        vec![self.config.green_skew, self.config.blue_skew],
                    ),
                    DATA_TYPE_IMAGE => self.image(len),
                    _ => Reply::status(Command::PASSTHROUGH, Status::Invalid),
                }
            }
            [OBJECT_POSITION, ..] => {
                self.scan = None;
                Reply::status(Command::PASSTHROUGH, Status::Good)
            }
            _ => Reply::status(Command::PASSTHROUGH, Status::Unsupported),
        }
    }

    fn image(&mut self, len: usize) -> Reply {
        let Some(scan) = self.scan.as_mut() else {
            return Reply::status(Command::PASSTHROUGH, Status::Invalid);
        };
        let offsets =
            ChannelOffsets::from_skew_bytes(self.config.green_skew, self.config.blue_skew);
        let bytes_per_line = scan.pixels * 3;
        let mut data = Vec::with_capacity(len);
        while data.len() + bytes_per_line <= len {
            data.extend(raw_line(scan.next_raw, scan.pixels, offsets, self.config.layout));
            scan.next_raw += 1;
        }
        Reply::new(Command::PASSTHROUGH, data)
    }
}

#[test]
fn raw_lines_are_skewed() {
    let offsets = ChannelOffsets::new(0, 1, 2);
    let line = raw_line(1, 2, offsets, LineLayout::Interleaved);
    // red sees position 1, green position 0, blue nothing yet
    assert_eq!(
        line,
        vec![
            pixel_value(1, 0, 0),
            pixel_value(0, 0, 1),
            0,
            pixel_value(1, 1, 0),
            pixel_value(0, 1, 1),
            0
        ]
    );
}
