//! WAV chunk framing.
//!
//! Every audio chunk handed to an application is a complete, self-contained
//! WAV file: a canonical 44-byte RIFF header followed by raw PCM. The local
//! capture path and the daemon both frame through [`frame_chunk`], so chunks
//! from either source are byte-for-byte interchangeable.
//!
//! Layout (all fields little-endian):
//! ```text
//! [0-3]    "RIFF"
//! [4-7]    36 + data_len
//! [8-11]   "WAVE"
//! [12-15]  "fmt "
//! [16-19]  16
//! [20-21]  format tag (1 = integer PCM, 3 = IEEE float)
//! [22-23]  channels
//! [24-27]  sample_rate
//! [28-31]  sample_rate * channels * bytes_per_sample
//! [32-33]  channels * bytes_per_sample
//! [34-35]  bytes_per_sample * 8
//! [36-39]  "data"
//! [40-43]  data_len
//! [44..]   payload
//! ```

use thiserror::Error;

use crate::types::{CaptureConfig, MicConfig, SampleFormat};

/// Size of the RIFF/WAVE header preceding every chunk payload.
pub const HEADER_LEN: usize = 44;

/// Format parameters written into a chunk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavSpec {
    pub sample_rate: u32,
    pub channels: u16,
    pub bytes_per_sample: u16,
    pub format: SampleFormat,
}

impl WavSpec {
    pub fn new(sample_rate: u32, channels: u16, bytes_per_sample: u16, format: SampleFormat) -> Self {
        Self {
            sample_rate,
            channels,
            bytes_per_sample,
            format,
        }
    }

    pub fn block_align(&self) -> u16 {
        self.channels * self.bytes_per_sample
    }

    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * self.block_align() as u32
    }

    pub fn bits_per_sample(&self) -> u16 {
        self.bytes_per_sample * 8
    }
}

impl From<&CaptureConfig> for WavSpec {
    fn from(config: &CaptureConfig) -> Self {
        Self::new(
            config.sample_rate,
            config.channel_count,
            config.bytes_per_sample,
            config.sample_format(),
        )
    }
}

impl From<&MicConfig> for WavSpec {
    /// The daemon always tags its chunks as integer PCM.
    fn from(config: &MicConfig) -> Self {
        Self::new(
            config.sample_rate,
            config.channels,
            config.bytes_per_sample,
            SampleFormat::Int,
        )
    }
}

/// Header fields recovered from a framed chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeader {
    pub spec: WavSpec,
    pub data_len: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WavError {
    #[error("chunk is {0} bytes, shorter than the 44-byte header")]
    TooShort(usize),
    #[error("missing {0:?} marker")]
    BadMagic(&'static str),
    #[error("unsupported fmt chunk size {0}")]
    FmtSize(u32),
    #[error("unsupported format tag {0}")]
    FormatTag(u16),
    #[error("header declares {declared} data bytes but {actual} follow")]
    DataLength { declared: u32, actual: usize },
}

/// Wrap a PCM payload in a 44-byte WAV header.
///
/// Output length is always `HEADER_LEN + pcm.len()`.
pub fn frame_chunk(pcm: &[u8], spec: &WavSpec) -> Vec<u8> {
    let data_len = pcm.len() as u32;
    let mut out = Vec::with_capacity(HEADER_LEN + pcm.len());

    // RIFF chunk descriptor
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    // fmt sub-chunk
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&spec.format.format_tag().to_le_bytes());
    out.extend_from_slice(&spec.channels.to_le_bytes());
    out.extend_from_slice(&spec.sample_rate.to_le_bytes());
    out.extend_from_slice(&spec.byte_rate().to_le_bytes());
    out.extend_from_slice(&spec.block_align().to_le_bytes());
    out.extend_from_slice(&spec.bits_per_sample().to_le_bytes());

    // data sub-chunk
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.extend_from_slice(pcm);

    out
}

/// Parse the header of a framed chunk and check it against the payload length.
pub fn parse_header(chunk: &[u8]) -> Result<WavHeader, WavError> {
    if chunk.len() < HEADER_LEN {
        return Err(WavError::TooShort(chunk.len()));
    }

    let u16_at = |offset: usize| u16::from_le_bytes([chunk[offset], chunk[offset + 1]]);
    let u32_at = |offset: usize| {
        u32::from_le_bytes([
            chunk[offset],
            chunk[offset + 1],
            chunk[offset + 2],
            chunk[offset + 3],
        ])
    };

    if &chunk[0..4] != b"RIFF" {
        return Err(WavError::BadMagic("RIFF"));
    }
    if &chunk[8..12] != b"WAVE" {
        return Err(WavError::BadMagic("WAVE"));
    }
    if &chunk[12..16] != b"fmt " {
        return Err(WavError::BadMagic("fmt "));
    }
    if &chunk[36..40] != b"data" {
        return Err(WavError::BadMagic("data"));
    }

    let fmt_size = u32_at(16);
    if fmt_size != 16 {
        return Err(WavError::FmtSize(fmt_size));
    }

    let tag = u16_at(20);
    let format = SampleFormat::from_format_tag(tag).ok_or(WavError::FormatTag(tag))?;
    let channels = u16_at(22);
    let sample_rate = u32_at(24);
    let bits_per_sample = u16_at(34);
    let data_len = u32_at(40);

    let actual = chunk.len() - HEADER_LEN;
    if data_len as usize != actual {
        return Err(WavError::DataLength {
            declared: data_len,
            actual,
        });
    }

    Ok(WavHeader {
        spec: WavSpec::new(sample_rate, channels, bits_per_sample / 8, format),
        data_len,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn u16_at(bytes: &[u8], offset: usize) -> u16 {
        u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
    }

    fn u32_at(bytes: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    #[test]
    fn test_header_layout_across_formats() {
        for &sample_rate in &[8_000u32, 16_000, 44_100, 48_000] {
            for &channels in &[1u16, 2, 6] {
                for &bytes_per_sample in &[2u16, 4] {
                    for &len in &[0usize, 2, 4_800] {
                        let format = SampleFormat::for_bytes_per_sample(bytes_per_sample);
                        let spec = WavSpec::new(sample_rate, channels, bytes_per_sample, format);
                        let pcm = vec![0x5au8; len];
                        let chunk = frame_chunk(&pcm, &spec);

                        assert_eq!(chunk.len(), HEADER_LEN + len);
                        assert_eq!(&chunk[0..4], b"RIFF");
                        assert_eq!(u32_at(&chunk, 4), 36 + len as u32);
                        assert_eq!(&chunk[8..12], b"WAVE");
                        assert_eq!(&chunk[12..16], b"fmt ");
                        assert_eq!(u32_at(&chunk, 16), 16);
                        assert_eq!(u16_at(&chunk, 20), format.format_tag());
                        assert_eq!(u16_at(&chunk, 22), channels);
                        assert_eq!(u32_at(&chunk, 24), sample_rate);
                        assert_eq!(
                            u32_at(&chunk, 28),
                            sample_rate * channels as u32 * bytes_per_sample as u32
                        );
                        assert_eq!(u16_at(&chunk, 32), channels * bytes_per_sample);
                        assert_eq!(u16_at(&chunk, 34), bytes_per_sample * 8);
                        assert_eq!(&chunk[36..40], b"data");
                        assert_eq!(u32_at(&chunk, 40), len as u32);
                        assert_eq!(&chunk[HEADER_LEN..], &pcm[..]);
                    }
                }
            }
        }
    }

    #[test]
    fn test_format_tags() {
        let int_spec = WavSpec::new(16_000, 1, 2, SampleFormat::Int);
        let float_spec = WavSpec::new(16_000, 1, 4, SampleFormat::Float);
        assert_eq!(u16_at(&frame_chunk(&[], &int_spec), 20), 1);
        assert_eq!(u16_at(&frame_chunk(&[], &float_spec), 20), 3);
    }

    #[test]
    fn test_daemon_spec_is_always_integer() {
        let config = MicConfig {
            bytes_per_sample: 4,
            ..MicConfig::default()
        };
        assert_eq!(WavSpec::from(&config).format, SampleFormat::Int);

        let client = CaptureConfig {
            bytes_per_sample: 4,
            ..CaptureConfig::default()
        };
        assert_eq!(WavSpec::from(&client).format, SampleFormat::Float);
    }

    #[test]
    fn test_parse_header_recovers_config() {
        let config = CaptureConfig {
            device_id: None,
            sample_rate: 22_050,
            channel_count: 2,
            bytes_per_sample: 2,
            seconds_per_chunk: 0.25,
        };
        let pcm: Vec<u8> = (0..config.chunk_payload_len()).map(|i| i as u8).collect();
        let chunk = frame_chunk(&pcm, &WavSpec::from(&config));

        let header = parse_header(&chunk).unwrap();
        assert_eq!(header.spec.sample_rate, config.sample_rate);
        assert_eq!(header.spec.channels, config.channel_count);
        assert_eq!(header.spec.bytes_per_sample, config.bytes_per_sample);
        assert_eq!(header.data_len as usize, pcm.len());
    }

    #[test]
    fn test_parse_header_rejects_garbage() {
        assert_eq!(parse_header(&[0u8; 10]), Err(WavError::TooShort(10)));

        let spec = WavSpec::new(16_000, 1, 2, SampleFormat::Int);
        let mut chunk = frame_chunk(&[0, 0], &spec);
        chunk[0] = b'X';
        assert_eq!(parse_header(&chunk), Err(WavError::BadMagic("RIFF")));

        let mut truncated = frame_chunk(&[0, 0, 0, 0], &spec);
        truncated.pop();
        assert!(matches!(
            parse_header(&truncated),
            Err(WavError::DataLength { declared: 4, actual: 3 })
        ));
    }

    #[test]
    fn test_integer_chunk_reads_back_with_hound() {
        let spec = WavSpec::new(16_000, 2, 2, SampleFormat::Int);
        let samples: [i16; 4] = [0, -1, i16::MAX, i16::MIN];
        let pcm: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let chunk = frame_chunk(&pcm, &spec);

        let mut reader = hound::WavReader::new(Cursor::new(chunk)).unwrap();
        let wav_spec = reader.spec();
        assert_eq!(wav_spec.channels, 2);
        assert_eq!(wav_spec.sample_rate, 16_000);
        assert_eq!(wav_spec.bits_per_sample, 16);
        assert_eq!(wav_spec.sample_format, hound::SampleFormat::Int);

        let decoded: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(decoded, samples);
    }

    #[test]
    fn test_float_chunk_reads_back_with_hound() {
        let spec = WavSpec::new(48_000, 1, 4, SampleFormat::Float);
        let samples: [f32; 3] = [0.0, 0.5, -1.0];
        let pcm: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let chunk = frame_chunk(&pcm, &spec);

        let mut reader = hound::WavReader::new(Cursor::new(chunk)).unwrap();
        assert_eq!(reader.spec().sample_format, hound::SampleFormat::Float);
        let decoded: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
        assert_eq!(decoded, samples);
    }
}
