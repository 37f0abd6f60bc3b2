//! # scanwire
//!
//! Command-line scanner front end: opens a channel to a network-attached or
//! local scanner, runs one scan and writes the realigned image as a binary PPM.
//!
//! ## Overview
//!
//! This binary wires the [`scanwire_scan`] session to the two channel kinds in
//! [`backends`]. Devices are never auto-detected; the address or device node has
//! to be given explicitly.
pub mod backends;

use std::error::Error;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use env_logger::Env;
use scanwire_client::{ScanChannel, client};
use scanwire_scan::{
    LineLayout,
    commands::{ScanParameters, Scsi2},
    resample::AveragePairs,
    session::Builder,
};

const MAX_PIXELS_PER_LINE: u32 = 65535;
const MAX_LINES_PER_REQUEST: u32 = 4096;

fn parse_pixels(s: &str) -> Result<u32, String> {
    clap_num::number_range(s, 1, MAX_PIXELS_PER_LINE)
}

fn parse_lines_per_request(s: &str) -> Result<u32, String> {
    clap_num::number_range(s, 1, MAX_LINES_PER_REQUEST)
}

#[derive(Parser, Eq, PartialEq, Clone)]
enum ChannelImpl {
    /// Scanner on the network
    Net {
        /// Host name or address, with an optional port
        addr: String,
        #[arg(
            short,
            long,
            help = "Connect, read and write timeout in milliseconds",
            default_value = "30000"
        )]
        timeout_ms: u64,
    },
    /// Scanner device node such as /dev/usb/scanner0
    Device { path: PathBuf },
}

impl ChannelImpl {
    /// Identifier for the advisory lock when none is given
    fn lock_id(&self) -> String {
        match self {
            ChannelImpl::Net { addr, .. } => {
                format!("net:{}", backends::net::with_default_port(addr))
            }
            ChannelImpl::Device { path } => format!("device:{}", path.display()),
        }
    }
}

#[derive(Parser)]
#[command(about = "Scan an image from a line scanner speaking the framed scanner protocol", long_about=None)]
struct Args {
    #[arg(short, long, value_parser = parse_pixels, help = "Pixels per line")]
    pixels: u32,

    #[arg(short, long, help = "Number of lines to scan")]
    lines: u32,

    #[arg(short, long, default_value = "scan.ppm")]
    output: PathBuf,

    #[arg(long, help = "Advisory lock name, derived from the channel by default")]
    lock_id: Option<String>,

    #[arg(long, help = "Do not claim the device with the lock command")]
    no_device_lock: bool,

    #[arg(long, help = "Fail on reply headers with a bad magic tag")]
    strict_magic: bool,

    #[arg(long, help = "Log every frame header at trace level")]
    trace_frames: bool,

    #[arg(long, help = "Halve the horizontal resolution by averaging pixel pairs")]
    supersample: bool,

    #[arg(long, help = "The device sends RGBRGB... lines instead of color planes")]
    interleaved: bool,

    #[arg(long, value_parser = parse_lines_per_request, default_value = "16")]
    lines_per_request: u32,

    #[clap(subcommand)]
    channel: ChannelImpl,
}

fn write_ppm_header(out: &mut impl Write, width: usize, height: u32) -> std::io::Result<()> {
    write!(out, "P6\n{} {}\n255\n", width, height)
}

fn scan<C: ScanChannel>(channel: C, args: &Args) -> Result<(), Box<dyn Error>> {
    let client = client::Builder::new()
        .strict_magic(args.strict_magic)
        .trace_frames(args.trace_frames)
        .build(channel);

    let lock_id = args
        .lock_id
        .clone()
        .unwrap_or_else(|| args.channel.lock_id());
    log::debug!("Using advisory lock id {}", lock_id);

    let layout = if args.interleaved {
        LineLayout::Interleaved
    } else {
        LineLayout::Planar
    };
    let builder = Builder::new()
        .lock_id(lock_id)
        .device_lock(!args.no_device_lock)
        .lines_per_request(args.lines_per_request);
    let builder = if args.supersample {
        builder.resampler(AveragePairs)
    } else {
        builder
    };
    let mut session = builder.open(client, Scsi2::new(layout))?;

    session.start(ScanParameters::new(args.pixels, args.lines))?;
    let line_len = session.output_line_len().unwrap_or(0);

    let mut out = BufWriter::new(File::create(&args.output)?);
    write_ppm_header(&mut out, line_len / 3, args.lines)?;
    let mut line = vec![0u8; line_len];
    while session.read_line(&mut line)? {
        out.write_all(&line)?;
        if session.lines_read() % 100 == 0 {
            log::debug!("{} of {} lines", session.lines_read(), args.lines);
        }
    }
    out.flush()?;
    session.close()?;

    log::info!("Wrote {}", args.output.display());
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    log::debug!(
        "Parsed arguments: pixels={}, lines={}, output={}",
        args.pixels,
        args.lines,
        args.output.display()
    );

    match &args.channel {
        ChannelImpl::Net { addr, timeout_ms } => {
            let addr = backends::net::with_default_port(addr);
            log::info!("Scanning from {}", addr);
            let stream = backends::net::connect(addr, Duration::from_millis(*timeout_ms))?;
            scan(stream, &args)
        }
        ChannelImpl::Device { path } => {
            log::info!("Scanning from {}", path.display());
            let file = backends::device::open(path)?;
            scan(file, &args)
        }
    }
}

#[test]
fn ppm_header() {
    let mut out = Vec::new();
    write_ppm_header(&mut out, 640, 480).unwrap();
    assert_eq!(out, b"P6\n640 480\n255\n");
}

#[test]
fn lock_ids() {
    let net = ChannelImpl::Net {
        addr: "10.0.0.5".to_string(),
        timeout_ms: 1,
    };
    assert_eq!(net.lock_id(), "net:10.0.0.5:1865");
    let device = ChannelImpl::Device {
        path: PathBuf::from("/dev/usb/scanner0"),
    };
    assert_eq!(device.lock_id(), "device:/dev/usb/scanner0");
}

#[test]
fn arguments_are_checked() {
    use clap::CommandFactory;
    Args::command().debug_assert();

    let args = Args::try_parse_from([
        "scanwire",
        "--pixels",
        "256",
        "--lines",
        "10",
        "--supersample",
        "net",
        "scanner.local",
    ])
    .unwrap();
    assert_eq!(args.pixels, 256);
    assert!(args.supersample);
    assert_eq!(args.lines_per_request, 16);
    assert!(matches!(
        args.channel,
        ChannelImpl::Net {
            timeout_ms: 30000,
            ..
        }
    ));

    assert!(
        Args::try_parse_from([
            "scanwire", "--pixels", "0", "--lines", "1", "device", "/dev/x"
        ])
        .is_err()
    );
}
