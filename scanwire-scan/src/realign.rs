//! # Channel realignment
//!
//! Line sensors have separate rows of red, green and blue elements. As the
//! carriage moves, each row sees a given position on the document a few lines
//! after the others, so every raw line the scanner sends mixes three different
//! scan positions. The [`Realigner`] keeps the last few raw lines in a ring and
//! assembles each output line from the three raw lines that actually contain it.
//!
//! ```text
//!  raw line   R      G      B        offsets r=0, g=1, b=2
//!     0      p0     --     --
//!     1      p1     p0     --
//!     2      p2     p1     p0   ──▶  line 0 = R(raw 0) G(raw 1) B(raw 2)
//!     3      p3     p2     p1   ──▶  line 1 = R(raw 1) G(raw 2) B(raw 3)
//! ```
//!
//! Memory use is proportional to the largest offset, not to the image height.
use crate::{
    error::RealignError,
    resample::{Passthrough, Resample},
};

/// Decodes a sign-magnitude byte: bit 7 is the sign, bits 0-6 the magnitude.
pub fn decode_sign_magnitude(byte: u8) -> i32 {
    let magnitude = i32::from(byte & 0x7f);
    if byte & 0x80 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Delay of each color channel in lines, normalized so the smallest is 0.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct ChannelOffsets {
    pub red: usize,
    pub green: usize,
    pub blue: usize,
}

impl ChannelOffsets {
    pub fn new(red: usize, green: usize, blue: usize) -> ChannelOffsets {
        ChannelOffsets { red, green, blue }
    }

    /// Offsets from the skew of green and blue relative to red, in lines.
    pub fn from_skew(green_to_red: i32, blue_to_red: i32) -> ChannelOffsets {
        let min = 0.min(green_to_red).min(blue_to_red);
        ChannelOffsets {
            red: (0 - min) as usize,
            green: (green_to_red - min) as usize,
            blue: (blue_to_red - min) as usize,
        }
    }

    /// Offsets from the two sign-magnitude skew bytes reported by the device.
    pub fn from_skew_bytes(green_to_red: u8, blue_to_red: u8) -> ChannelOffsets {
        ChannelOffsets::from_skew(
            decode_sign_magnitude(green_to_red),
            decode_sign_magnitude(blue_to_red),
        )
    }

    pub fn max(&self) -> usize {
        self.red.max(self.green).max(self.blue)
    }

    pub fn sum(&self) -> usize {
        self.red + self.green + self.blue
    }

    /// The ring depth needed to realign with these offsets.
    pub fn ring_depth(&self) -> usize {
        self.sum() + 1
    }
}

/// How the three channels are arranged within one raw line.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum LineLayout {
    /// All red bytes, then all green bytes, then all blue bytes.
    #[default]
    Planar,
    /// `RGBRGB...`
    Interleaved,
}

impl LineLayout {
    /// Byte index of `channel` (0 = red, 1 = green, 2 = blue) of `pixel` within a line.
    fn index(&self, pixels: usize, pixel: usize, channel: usize) -> usize {
        match self {
            LineLayout::Planar => channel * pixels + pixel,
            LineLayout::Interleaved => pixel * 3 + channel,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RealignState {
    Uninitialized,
    /// Storage allocated, all offsets zero.
    Ready,
    /// Channel offsets set.
    Configured,
}

/// Ring buffer that realigns skewed color channels into interleaved RGB lines.
///
/// Storage holds `ring_depth + 1` raw lines used as the ring plus one staging
/// line in which output lines are assembled.
///
/// Callers alternate [`Realigner::push_line_bytes`] with
/// [`Realigner::can_emit_line`] / [`Realigner::emit_line`]. Pushing data whose
/// total is not a whole number of lines is a caller error and yields a wrong
/// image, not an error.
#[derive(Debug)]
pub struct Realigner {
    ring: Vec<u8>,
    bytes_per_line: usize,
    ring_depth: usize,
    layout: LineLayout,
    offsets: ChannelOffsets,
    state: RealignState,
    line_in: usize,
    pixel_pos: usize,
    line_out: usize,
}

impl Default for Realigner {
    fn default() -> Self {
        Realigner::new()
    }
}

impl Realigner {
    pub fn new() -> Realigner {
        Realigner {
            ring: Vec::new(),
            bytes_per_line: 0,
            ring_depth: 0,
            layout: LineLayout::default(),
            offsets: ChannelOffsets::default(),
            state: RealignState::Uninitialized,
            line_in: 0,
            pixel_pos: 0,
            line_out: 0,
        }
    }

    /// Allocates storage for lines of `bytes_per_line` bytes and `ring_depth` lines
    /// of history. Any previous state is dropped.
    pub fn init(
        &mut self,
        bytes_per_line: usize,
        ring_depth: usize,
        layout: LineLayout,
    ) -> Result<(), RealignError> {
        if bytes_per_line == 0 || bytes_per_line % 3 != 0 {
            return Err(RealignError::InvalidGeometry(format!(
                "{} bytes per line is not a whole number of RGB pixels",
                bytes_per_line
            )));
        }
        if ring_depth == 0 {
            return Err(RealignError::InvalidGeometry(
                "ring depth must be at least 1".to_string(),
            ));
        }
        self.reset();

        let requested = ring_depth
            .checked_add(2)
            .and_then(|lines| lines.checked_mul(bytes_per_line))
            .ok_or(RealignError::OutOfMemory {
                requested: usize::MAX,
            })?;
        let mut ring = Vec::new();
        ring.try_reserve_exact(requested)
            .map_err(|_| RealignError::OutOfMemory { requested })?;
        ring.resize(requested, 0);

        log::debug!(
            "Allocated realignment ring: bytes_per_line={}, ring_depth={}, layout={:?}, storage={}",
            bytes_per_line,
            ring_depth,
            layout,
            requested
        );
        self.ring = ring;
        self.bytes_per_line = bytes_per_line;
        self.ring_depth = ring_depth;
        self.layout = layout;
        self.state = RealignState::Ready;
        Ok(())
    }

    /// Sets the offsets from the green-to-red and blue-to-red skew bytes as
    /// reported by the device.
    pub fn set_channel_offsets(
        &mut self,
        green_to_red: u8,
        blue_to_red: u8,
    ) -> Result<(), RealignError> {
        self.configure(ChannelOffsets::from_skew_bytes(green_to_red, blue_to_red))
    }

    pub fn configure(&mut self, offsets: ChannelOffsets) -> Result<(), RealignError> {
        if self.state == RealignState::Uninitialized {
            return Err(RealignError::NotInitialized);
        }
        if self.line_in != 0 || self.pixel_pos != 0 {
            return Err(RealignError::AlreadyStreaming);
        }
        if offsets.ring_depth() > self.ring_depth {
            return Err(RealignError::OffsetsExceedRing {
                needed: offsets.ring_depth(),
                available: self.ring_depth,
            });
        }
        log::debug!(
            "Channel offsets: red={}, green={}, blue={}",
            offsets.red,
            offsets.green,
            offsets.blue
        );
        self.offsets = offsets;
        self.state = RealignState::Configured;
        Ok(())
    }

    /// Copies raw bytes into the ring.
    ///
    /// At most one line's worth of bytes is taken per call. If the current line
    /// fills up, the rest goes into the next line. Nothing is taken while the
    /// ring is full; emit a line first.
    ///
    /// # Returns
    ///
    /// The number of bytes consumed from `data`.
    pub fn push_line_bytes(&mut self, data: &[u8]) -> usize {
        if self.state == RealignState::Uninitialized {
            return 0;
        }
        let bytes_per_line = self.bytes_per_line;
        let budget = data.len().min(bytes_per_line);
        let mut consumed = 0;

        while consumed < budget {
            if self.pixel_pos == 0 && self.line_in - self.line_out >= self.slots() {
                log::trace!("Ring full at line {}, waiting for emit", self.line_in);
                break;
            }
            let n = (bytes_per_line - self.pixel_pos).min(budget - consumed);
            let start = self.slot_start(self.line_in) + self.pixel_pos;
            self.ring[start..start + n].copy_from_slice(&data[consumed..consumed + n]);
            consumed += n;
            self.pixel_pos += n;
            if self.pixel_pos == bytes_per_line {
                self.pixel_pos = 0;
                self.line_in += 1;
            }
        }
        debug_assert!(self.line_in - self.line_out <= self.slots());
        consumed
    }

    /// Whether all three channels of the oldest pending scan position are buffered.
    pub fn can_emit_line(&self) -> bool {
        self.state != RealignState::Uninitialized
            && self.line_in - self.line_out > self.offsets.max()
    }

    /// Writes the next realigned line to `out` as `RGBRGB...`.
    ///
    /// # Returns
    ///
    /// The number of bytes written, always [`Realigner::bytes_per_line`].
    pub fn emit_line(&mut self, out: &mut [u8]) -> Result<usize, RealignError> {
        self.emit_line_with(&Passthrough, out)
    }

    /// Writes the next realigned line to `out` after passing it through `resampler`.
    pub fn emit_line_with(
        &mut self,
        resampler: &dyn Resample,
        out: &mut [u8],
    ) -> Result<usize, RealignError> {
        if self.state == RealignState::Uninitialized {
            return Err(RealignError::NotInitialized);
        }
        if !self.can_emit_line() {
            return Err(RealignError::LineNotReady);
        }
        let needed = resampler.output_len(self.bytes_per_line);
        if out.len() < needed {
            return Err(RealignError::OutputTooSmall {
                needed,
                got: out.len(),
            });
        }

        let pixels = self.bytes_per_line / 3;
        let sources = [
            self.slot_start(self.line_out + self.offsets.red),
            self.slot_start(self.line_out + self.offsets.green),
            self.slot_start(self.line_out + self.offsets.blue),
        ];
        let layout = self.layout;
        let bytes_per_line = self.bytes_per_line;
        let staging_start = self.slots() * bytes_per_line;
        let (ring, staging) = self.ring.split_at_mut(staging_start);
        for pixel in 0..pixels {
            for (channel, source) in sources.iter().enumerate() {
                staging[pixel * 3 + channel] = ring[source + layout.index(pixels, pixel, channel)];
            }
        }
        resampler.resample(&staging[..bytes_per_line], &mut out[..needed]);

        self.line_out += 1;
        Ok(needed)
    }

    /// Drops all buffered data and the storage itself.
    pub fn reset(&mut self) {
        if self.state != RealignState::Uninitialized {
            log::debug!(
                "Resetting realignment ring after {} lines in, {} lines out",
                self.line_in,
                self.line_out
            );
        }
        self.ring = Vec::new();
        self.offsets = ChannelOffsets::default();
        self.line_in = 0;
        self.pixel_pos = 0;
        self.line_out = 0;
        self.state = RealignState::Uninitialized;
    }

    pub fn state(&self) -> RealignState {
        self.state
    }

    pub fn offsets(&self) -> ChannelOffsets {
        self.offsets
    }

    pub fn bytes_per_line(&self) -> usize {
        self.bytes_per_line
    }

    pub fn ring_depth(&self) -> usize {
        self.ring_depth
    }

    pub fn layout(&self) -> LineLayout {
        self.layout
    }

    /// Bytes of storage currently held
    pub fn storage_len(&self) -> usize {
        self.ring.len()
    }

    /// Complete raw lines received so far.
    pub fn lines_in(&self) -> usize {
        self.line_in
    }

    /// Realigned lines emitted so far.
    pub fn lines_out(&self) -> usize {
        self.line_out
    }

    /// Bytes received of the raw line currently being filled.
    pub fn partial_line_len(&self) -> usize {
        self.pixel_pos
    }

    fn slots(&self) -> usize {
        self.ring_depth + 1
    }

    fn slot_start(&self, line: usize) -> usize {
        (line % self.slots()) * self.bytes_per_line
    }
}

#[test]
fn sign_magnitude() {
    assert_eq!(decode_sign_magnitude(0x00), 0);
    assert_eq!(decode_sign_magnitude(0x05), 5);
    assert_eq!(decode_sign_magnitude(0x85), -5);
    assert_eq!(decode_sign_magnitude(0x7f), 127);
    assert_eq!(decode_sign_magnitude(0xff), -127);
    // negative zero
    assert_eq!(decode_sign_magnitude(0x80), 0);
}

#[test]
fn offsets_are_normalized() {
    assert_eq!(ChannelOffsets::from_skew(4, 8), ChannelOffsets::new(0, 4, 8));
    assert_eq!(ChannelOffsets::from_skew(-4, -8), ChannelOffsets::new(8, 4, 0));
    assert_eq!(ChannelOffsets::from_skew(-3, 5), ChannelOffsets::new(3, 0, 8));
    assert_eq!(
        ChannelOffsets::from_skew_bytes(0x82, 0x02),
        ChannelOffsets::new(2, 0, 4)
    );
    let offsets = ChannelOffsets::new(3, 0, 8);
    assert_eq!(offsets.max(), 8);
    assert_eq!(offsets.sum(), 11);
    assert_eq!(offsets.ring_depth(), 12);
}
