//! Sample conversion and cadence-window assembly for local capture.

/// Convert a normalized sample to 16-bit signed PCM.
///
/// Clamps to [-1, 1] and scales asymmetrically so both -1.0 and 1.0 map to
/// the ends of the i16 range.
pub fn f32_to_i16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32_768.0).round() as i16
    } else {
        (s * 32_767.0).round() as i16
    }
}

pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32_768.0
}

pub fn u16_to_f32(sample: u16) -> f32 {
    (sample as f32 - 32_768.0) / 32_768.0
}

/// Encode normalized samples as little-endian PCM with `bytes_per_sample`
/// bytes each (2 = signed integer, 4 = IEEE float).
pub fn encode_samples(samples: &[f32], bytes_per_sample: u16) -> Vec<u8> {
    if bytes_per_sample == 4 {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    } else {
        samples
            .iter()
            .flat_map(|s| f32_to_i16(*s).to_le_bytes())
            .collect()
    }
}

/// Interleave planar channel buffers frame-major.
///
/// Frames beyond the shortest plane are dropped.
pub fn interleave(planes: &[Vec<f32>]) -> Vec<f32> {
    let frames = planes.iter().map(Vec::len).min().unwrap_or(0);
    let mut out = Vec::with_capacity(frames * planes.len());
    for frame in 0..frames {
        for plane in planes {
            out.push(plane[frame]);
        }
    }
    out
}

/// Accumulates PCM bytes and releases them in fixed-size windows.
#[derive(Debug)]
pub struct ChunkAssembler {
    window: usize,
    pending: Vec<u8>,
}

impl ChunkAssembler {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            pending: Vec::with_capacity(window),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Bytes held back waiting for the next window to fill.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Append `bytes` and return every window that is now complete.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.pending.extend_from_slice(bytes);

        let mut windows = Vec::new();
        while self.pending.len() >= self.window {
            let rest = self.pending.split_off(self.window);
            windows.push(std::mem::replace(&mut self.pending, rest));
        }
        windows
    }

    pub fn reset(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32_to_i16_scaling() {
        assert_eq!(f32_to_i16(0.0), 0);
        assert_eq!(f32_to_i16(1.0), i16::MAX);
        assert_eq!(f32_to_i16(-1.0), i16::MIN);
        assert_eq!(f32_to_i16(0.5), 16_384);
        assert_eq!(f32_to_i16(-0.5), -16_384);
        assert_eq!(f32_to_i16(3.0), i16::MAX);
        assert_eq!(f32_to_i16(-7.5), i16::MIN);
    }

    #[test]
    fn test_integer_inputs_normalize() {
        assert_eq!(i16_to_f32(i16::MIN), -1.0);
        assert_eq!(u16_to_f32(32_768), 0.0);
        assert_eq!(u16_to_f32(0), -1.0);
    }

    #[test]
    fn test_encode_samples_widths() {
        let samples = [0.0f32, -1.0, 1.0];
        let int = encode_samples(&samples, 2);
        assert_eq!(int, vec![0, 0, 0x00, 0x80, 0xff, 0x7f]);

        let float = encode_samples(&samples, 4);
        assert_eq!(float.len(), 12);
        assert_eq!(&float[4..8], &(-1.0f32).to_le_bytes());
    }

    #[test]
    fn test_interleave_frame_major() {
        let planes = vec![vec![1.0, 2.0, 3.0], vec![10.0, 20.0, 30.0]];
        assert_eq!(interleave(&planes), vec![1.0, 10.0, 2.0, 20.0, 3.0, 30.0]);

        let ragged = vec![vec![1.0, 2.0], vec![5.0]];
        assert_eq!(interleave(&ragged), vec![1.0, 5.0]);
        assert!(interleave(&[]).is_empty());
    }

    #[test]
    fn test_assembler_emits_exact_windows() {
        let mut assembler = ChunkAssembler::new(4);

        assert!(assembler.push(&[1, 2, 3]).is_empty());
        assert_eq!(assembler.pending_len(), 3);

        let windows = assembler.push(&[4, 5, 6, 7, 8, 9, 10]);
        assert_eq!(windows, vec![vec![1, 2, 3, 4], vec![5, 6, 7, 8]]);
        assert_eq!(assembler.pending_len(), 2);

        assembler.reset();
        assert_eq!(assembler.pending_len(), 0);
    }

    #[test]
    fn test_assembler_never_uses_zero_window() {
        let mut assembler = ChunkAssembler::new(0);
        assert_eq!(assembler.window(), 1);
        assert_eq!(assembler.push(&[9, 9]).len(), 2);
    }
}
