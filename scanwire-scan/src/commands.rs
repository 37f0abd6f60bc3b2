//! Vendor command blocks.
//!
//! The session only knows *when* to start a scan, read the skew bytes, read
//! image data or reset the device. *How* each of those looks on the wire is up
//! to a [`CommandSet`]. Every block is sent as the payload of a
//! [`Command::PASSTHROUGH`](scanwire_protocol::Command::PASSTHROUGH) frame.
use crate::realign::LineLayout;

/// `SCAN`
pub const SCAN: u8 = 0x1B;
/// `READ(10)`
pub const READ_10: u8 = 0x28;
/// `OBJECT POSITION`, used to send the carriage home.
pub const OBJECT_POSITION: u8 = 0x31;

/// Data type code of `READ(10)` for image data.
pub const DATA_TYPE_IMAGE: u8 = 0x00;
/// Data type code of `READ(10)` for the two channel skew bytes.
pub const DATA_TYPE_LINE_OFFSETS: u8 = 0x8C;

/// Geometry of one scan as requested by the caller.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ScanParameters {
    pub pixels_per_line: u32,
    /// Number of realigned lines to produce.
    pub lines: u32,
}

impl ScanParameters {
    pub fn new(pixels_per_line: u32, lines: u32) -> ScanParameters {
        ScanParameters {
            pixels_per_line,
            lines,
        }
    }

    /// Raw bytes per line, one byte per channel and pixel.
    pub fn bytes_per_line(&self) -> usize {
        self.pixels_per_line as usize * 3
    }
}

/// Builds the device command blocks for one scanner family.
///
/// Replies are fixed by the session: `start_scan` and `reset` answer with one
/// status byte, `read_line_offsets` with the green-to-red and blue-to-red skew
/// bytes, and `read_image` with exactly `len` bytes of raw line data.
pub trait CommandSet {
    fn start_scan(&self, params: &ScanParameters) -> Vec<u8>;

    fn read_line_offsets(&self) -> Vec<u8>;

    fn read_image(&self, len: u32) -> Vec<u8>;

    fn reset(&self) -> Vec<u8>;

    /// The largest `len` that fits a [`CommandSet::read_image`] block.
    fn max_transfer(&self) -> u32 {
        u32::MAX
    }

    /// How the channels are arranged in one raw line.
    fn line_layout(&self) -> LineLayout {
        LineLayout::Planar
    }
}

/// Command blocks shaped like plain SCSI-2 scanner commands.
#[derive(Copy, Clone, Debug, Default)]
pub struct Scsi2 {
    layout: LineLayout,
}

impl Scsi2 {
    pub fn new(layout: LineLayout) -> Scsi2 {
        Scsi2 { layout }
    }

    fn read_10(data_type: u8, len: u32) -> Vec<u8> {
        let len = len.to_be_bytes();
        // the transfer length is 24 bits wide
        vec![READ_10, 0, data_type, 0, 0, 0, len[1], len[2], len[3], 0]
    }
}

impl CommandSet for Scsi2 {
    fn start_scan(&self, params: &ScanParameters) -> Vec<u8> {
        let mut block = vec![SCAN, 0, 0, 0, 0, 0];
        block.extend_from_slice(&params.pixels_per_line.to_be_bytes());
        block.extend_from_slice(&params.lines.to_be_bytes());
        block
    }

    fn read_line_offsets(&self) -> Vec<u8> {
        Scsi2::read_10(DATA_TYPE_LINE_OFFSETS, 2)
    }

    fn read_image(&self, len: u32) -> Vec<u8> {
        Scsi2::read_10(DATA_TYPE_IMAGE, len)
    }

    fn reset(&self) -> Vec<u8> {
        vec![OBJECT_POSITION, 0, 0, 0, 0, 0, 0, 0, 0, 0]
    }

    fn max_transfer(&self) -> u32 {
        0x00ff_ffff
    }

    fn line_layout(&self) -> LineLayout {
        self.layout
    }
}

#[test]
fn scsi2_blocks() {
    let scsi = Scsi2::default();
    assert_eq!(
        scsi.start_scan(&ScanParameters::new(0x0102, 0x0304)),
        vec![SCAN, 0, 0, 0, 0, 0, 0, 0, 0x01, 0x02, 0, 0, 0x03, 0x04]
    );
    assert_eq!(
        scsi.read_line_offsets(),
        vec![READ_10, 0, DATA_TYPE_LINE_OFFSETS, 0, 0, 0, 0, 0, 2, 0]
    );
    assert_eq!(
        scsi.read_image(0x012345),
        vec![READ_10, 0, DATA_TYPE_IMAGE, 0, 0, 0, 0x01, 0x23, 0x45, 0]
    );
    assert_eq!(scsi.reset()[0], OBJECT_POSITION);
    assert_eq!(scsi.line_layout(), LineLayout::Planar);
    assert_eq!(
        Scsi2::new(LineLayout::Interleaved).line_layout(),
        LineLayout::Interleaved
    );
}

#[test]
fn bytes_per_line() {
    assert_eq!(ScanParameters::new(100, 1).bytes_per_line(), 300);
}
