/// Turns one realigned, pixel-interleaved RGB line into the line handed to the caller.
///
/// Some resolutions are captured at a multiple of the requested resolution and
/// have to be scaled down per line. That belongs here, not in the ring buffer.
pub trait Resample: Send {
    /// Size of the output for an input line of `line_len` bytes.
    fn output_len(&self, line_len: usize) -> usize;

    /// `out` is exactly [`Resample::output_len`] bytes long.
    fn resample(&self, line: &[u8], out: &mut [u8]);
}

/// Hands lines out unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl Resample for Passthrough {
    fn output_len(&self, line_len: usize) -> usize {
        line_len
    }

    fn resample(&self, line: &[u8], out: &mut [u8]) {
        out.copy_from_slice(&line[..out.len()]);
    }
}

/// Halves the horizontal resolution by averaging each pair of adjacent pixels.
/// A trailing odd pixel is dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct AveragePairs;

impl Resample for AveragePairs {
    fn output_len(&self, line_len: usize) -> usize {
        line_len / 3 / 2 * 3
    }

    fn resample(&self, line: &[u8], out: &mut [u8]) {
        for (pixel, dst) in out.chunks_exact_mut(3).enumerate() {
            let left = &line[pixel * 6..pixel * 6 + 3];
            let right = &line[pixel * 6 + 3..pixel * 6 + 6];
            for c in 0..3 {
                dst[c] = ((u16::from(left[c]) + u16::from(right[c]) + 1) / 2) as u8;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::{AveragePairs, Passthrough, Resample};

    #[test]
    fn passthrough_copies() {
        let line = [1, 2, 3, 4, 5, 6];
        let mut out = [0u8; 6];
        assert_eq!(Passthrough.output_len(6), 6);
        Passthrough.resample(&line, &mut out);
        assert_eq!(out, line);
    }

    #[test]
    fn average_pairs_rounds_up() {
        let line = [10, 0, 255, 20, 1, 255, 7, 7, 7, 8, 8, 8];
        let mut out = vec![0u8; AveragePairs.output_len(line.len())];
        AveragePairs.resample(&line, &mut out);
        assert_eq!(out, vec![15, 1, 255, 8, 8, 8]);
    }

    #[test]
    fn average_pairs_drops_odd_pixel() {
        assert_eq!(AveragePairs.output_len(9), 3);
        let line = [2, 4, 6, 4, 6, 8, 99, 99, 99];
        let mut out = [0u8; 3];
        AveragePairs.resample(&line, &mut out);
        assert_eq!(out, [3, 5, 7]);
    }
}
