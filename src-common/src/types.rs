//! Shared types for micrelay audio capture.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Highest sample rate accepted in a capture configuration.
pub const MAX_SAMPLE_RATE: u32 = 384_000;

/// Highest channel count accepted in a capture configuration.
pub const MAX_CHANNELS: u16 = 32;

/// Longest chunk cadence accepted in a capture configuration.
pub const MAX_SECONDS_PER_CHUNK: f64 = 60.0;

/// Sample encoding written into the WAV format tag.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleFormat {
    /// Signed little-endian integer PCM (format tag 1)
    #[default]
    Int,
    /// IEEE float PCM (format tag 3)
    Float,
}

impl SampleFormat {
    /// WAV `fmt ` chunk format tag.
    pub fn format_tag(&self) -> u16 {
        match self {
            SampleFormat::Int => 1,
            SampleFormat::Float => 3,
        }
    }

    pub fn from_format_tag(tag: u16) -> Option<Self> {
        match tag {
            1 => Some(SampleFormat::Int),
            3 => Some(SampleFormat::Float),
            _ => None,
        }
    }

    /// Client-side mapping: 4-byte samples are floats, 2-byte samples are integers.
    pub fn for_bytes_per_sample(bytes_per_sample: u16) -> Self {
        if bytes_per_sample == 4 {
            SampleFormat::Float
        } else {
            SampleFormat::Int
        }
    }
}

/// Reasons a capture configuration is rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("sample rate must be between 1 and {MAX_SAMPLE_RATE} Hz, got {0}")]
    SampleRate(u32),
    #[error("channel count must be between 1 and {MAX_CHANNELS}, got {0}")]
    Channels(u16),
    #[error("bytes per sample must be 2 or 4, got {0}")]
    BytesPerSample(u16),
    #[error("seconds per chunk must be above 0 and at most {MAX_SECONDS_PER_CHUNK}, got {0}")]
    SecondsPerChunk(f64),
    #[error("unknown configuration key: {0}")]
    UnknownKey(String),
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Client-side capture configuration.
///
/// Drives both the WAV header of every chunk and the chunk cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConfig {
    /// Preferred local input device (ignored by the daemon)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub sample_rate: u32,
    pub channel_count: u16,
    pub bytes_per_sample: u16,
    pub seconds_per_chunk: f64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_id: None,
            sample_rate: 16_000,
            channel_count: 1,
            bytes_per_sample: 2,
            seconds_per_chunk: 1.0,
        }
    }
}

impl CaptureConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_format(
            self.sample_rate,
            self.channel_count,
            self.bytes_per_sample,
            self.seconds_per_chunk,
        )
    }

    pub fn sample_format(&self) -> SampleFormat {
        SampleFormat::for_bytes_per_sample(self.bytes_per_sample)
    }

    /// Number of sample frames in one chunk.
    pub fn frames_per_chunk(&self) -> usize {
        (self.sample_rate as f64 * self.seconds_per_chunk) as usize
    }

    /// PCM payload length of one chunk in bytes (all channels).
    pub fn chunk_payload_len(&self) -> usize {
        self.frames_per_chunk() * self.channel_count as usize * self.bytes_per_sample as usize
    }
}

fn validate_format(
    sample_rate: u32,
    channels: u16,
    bytes_per_sample: u16,
    seconds_per_chunk: f64,
) -> Result<(), ConfigError> {
    if sample_rate == 0 || sample_rate > MAX_SAMPLE_RATE {
        return Err(ConfigError::SampleRate(sample_rate));
    }
    if channels == 0 || channels > MAX_CHANNELS {
        return Err(ConfigError::Channels(channels));
    }
    if bytes_per_sample != 2 && bytes_per_sample != 4 {
        return Err(ConfigError::BytesPerSample(bytes_per_sample));
    }
    if !seconds_per_chunk.is_finite()
        || seconds_per_chunk <= 0.0
        || seconds_per_chunk > MAX_SECONDS_PER_CHUNK
    {
        return Err(ConfigError::SecondsPerChunk(seconds_per_chunk));
    }
    Ok(())
}

/// Capture configuration as it travels on the wire (daemon field names).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MicConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub bytes_per_sample: u16,
    pub seconds_per_chunk: f64,
}

impl Default for MicConfig {
    /// Matches the native format of the default daemon capture command.
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 1,
            bytes_per_sample: 2,
            seconds_per_chunk: 1.0,
        }
    }
}

impl MicConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_format(
            self.sample_rate,
            self.channels,
            self.bytes_per_sample,
            self.seconds_per_chunk,
        )
    }

    /// Bytes read from the capture subprocess per chunk.
    ///
    /// `sample_rate * seconds_per_chunk` is truncated to whole frames and the
    /// channel count does not participate. `None` when the window does not
    /// fit in memory at all.
    pub fn read_window_len(&self) -> Option<usize> {
        let frames = self.sample_rate as f64 * self.seconds_per_chunk;
        if !frames.is_finite() || frames < 0.0 || frames >= usize::MAX as f64 {
            return None;
        }
        (frames as usize).checked_mul(self.bytes_per_sample as usize)
    }

    /// Pause between two reads; `None` if `seconds_per_chunk` is not a
    /// representable duration.
    pub fn chunk_interval(&self) -> Option<Duration> {
        Duration::try_from_secs_f64(self.seconds_per_chunk).ok()
    }
}

impl From<&CaptureConfig> for MicConfig {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            channels: config.channel_count,
            bytes_per_sample: config.bytes_per_sample,
            seconds_per_chunk: config.seconds_per_chunk,
        }
    }
}

impl From<&MicConfig> for CaptureConfig {
    fn from(config: &MicConfig) -> Self {
        Self {
            device_id: None,
            sample_rate: config.sample_rate,
            channel_count: config.channels,
            bytes_per_sample: config.bytes_per_sample,
            seconds_per_chunk: config.seconds_per_chunk,
        }
    }
}

/// Daemon microphone status as reported on the wire.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MicStatus {
    #[default]
    Idle,
    Listening,
    Error,
}

impl MicStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MicStatus::Idle => "idle",
            MicStatus::Listening => "listening",
            MicStatus::Error => "error",
        }
    }
}

impl fmt::Display for MicStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authoritative daemon state, broadcast to every connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MicState {
    pub state: MicStatus,
    pub config: MicConfig,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl MicState {
    pub fn idle(config: MicConfig) -> Self {
        Self {
            state: MicStatus::Idle,
            config,
            error: String::new(),
        }
    }
}
