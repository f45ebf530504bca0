//! Session parameters and media configuration

use crate::error::ConfigError;
use ftl_protocol::buffer::{DEFAULT_RING_SIZE, MAX_RING_SIZE};
use ftl_protocol::packet::{DEFAULT_MTU, MAX_PACKET_BUFFER};
use ftl_protocol::packetizer::MIN_MTU;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

/// Audio RTP clock rate
pub const AUDIO_CLOCK_RATE: u32 = 48_000;

/// Audio packets per second assumed for timestamp stepping
pub const AUDIO_PACKETS_PER_SECOND: u32 = 50;

/// Video RTP clock rate
pub const VIDEO_CLOCK_RATE: u32 = 90_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    H264,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    Opus,
    Aac,
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VideoCodec::H264 => write!(f, "h264"),
        }
    }
}

impl fmt::Display for AudioCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioCodec::Opus => write!(f, "opus"),
            AudioCodec::Aac => write!(f, "aac"),
        }
    }
}

impl FromStr for VideoCodec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "h264" | "avc" => Ok(VideoCodec::H264),
            other => Err(format!("unsupported video codec: {other}")),
        }
    }
}

impl FromStr for AudioCodec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "opus" => Ok(AudioCodec::Opus),
            "aac" => Ok(AudioCodec::Aac),
            other => Err(format!("unsupported audio codec: {other}")),
        }
    }
}

/// Parameters negotiated by the ingest handshake
#[derive(Debug, Clone, PartialEq)]
pub struct SessionParams {
    /// Resolved ingest address
    pub ingest_ip: IpAddr,
    /// Media port assigned by the ingest
    pub media_port: u16,
    /// Channel id; doubles as the audio SSRC
    pub channel_id: u32,
    pub video_codec: VideoCodec,
    pub audio_codec: AudioCodec,
    /// Target video bitrate; 0 disables pacing
    pub video_kbps: u32,
    /// Nominal video frame rate
    pub frame_rate: f32,
}

impl SessionParams {
    /// Where media packets are sent
    pub fn destination(&self) -> SocketAddr {
        SocketAddr::new(self.ingest_ip, self.media_port)
    }

    pub fn audio_ssrc(&self) -> u32 {
        self.channel_id
    }

    pub fn video_ssrc(&self) -> u32 {
        self.channel_id.wrapping_add(1)
    }

    /// RTP timestamp increment per audio packet (fixed 20 ms frames)
    pub fn audio_timestamp_step(&self) -> u32 {
        AUDIO_CLOCK_RATE / AUDIO_PACKETS_PER_SECOND
    }

    /// RTP timestamp increment per video frame (truncated)
    pub fn video_timestamp_step(&self) -> u32 {
        (VIDEO_CLOCK_RATE as f32 / self.frame_rate) as u32
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.frame_rate.is_finite() || self.frame_rate <= 0.0 {
            return Err(ConfigError::InvalidFrameRate(self.frame_rate));
        }
        if self.media_port == 0 {
            return Err(ConfigError::ZeroMediaPort);
        }
        Ok(())
    }
}

/// Tunables of the media path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaConfig {
    /// Path MTU used for video packetization
    pub mtu: usize,
    /// Slots per retransmission ring (rounded up to a power of two)
    pub ring_size: usize,
    /// Largest burst the pacer may send, in milliseconds at the target rate
    pub max_burst_ms: u32,
    /// Interval between stats reports on the status queue
    pub stats_interval: Duration,
    /// Feedback receive timeout, bounds shutdown latency
    pub recv_timeout: Duration,
    /// Status queue capacity; the oldest message is dropped when full
    pub status_queue_len: usize,
    /// Socket send buffer size, OS default when unset
    pub send_buffer_size: Option<usize>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        MediaConfig {
            mtu: DEFAULT_MTU,
            ring_size: DEFAULT_RING_SIZE,
            max_burst_ms: 50,
            stats_interval: Duration::from_millis(5000),
            recv_timeout: Duration::from_millis(100),
            status_queue_len: 10,
            send_buffer_size: None,
        }
    }
}

impl MediaConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_MTU..=MAX_PACKET_BUFFER).contains(&self.mtu) {
            return Err(ConfigError::InvalidMtu {
                mtu: self.mtu,
                min: MIN_MTU,
                max: MAX_PACKET_BUFFER,
            });
        }
        if self.ring_size == 0 || self.ring_size > MAX_RING_SIZE {
            return Err(ConfigError::InvalidRingSize {
                size: self.ring_size,
                max: MAX_RING_SIZE,
            });
        }
        if self.recv_timeout.is_zero() {
            return Err(ConfigError::ZeroRecvTimeout);
        }
        if self.stats_interval.is_zero() {
            return Err(ConfigError::ZeroStatsInterval);
        }
        if self.status_queue_len == 0 {
            return Err(ConfigError::ZeroStatusQueue);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn params() -> SessionParams {
        SessionParams {
            ingest_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            media_port: 8082,
            channel_id: 1000,
            video_codec: VideoCodec::H264,
            audio_codec: AudioCodec::Opus,
            video_kbps: 4000,
            frame_rate: 30.0,
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = MediaConfig::default();
        assert_eq!(config.mtu, 1392);
        assert_eq!(config.ring_size, 2048);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_config() {
        let config = MediaConfig {
            mtu: 1501,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidMtu { .. })));

        let config = MediaConfig {
            ring_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRingSize { .. })
        ));

        let config = MediaConfig {
            recv_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroRecvTimeout));
    }

    #[test]
    fn test_ssrcs_and_steps() {
        let params = params();
        assert_eq!(params.audio_ssrc(), 1000);
        assert_eq!(params.video_ssrc(), 1001);
        assert_eq!(params.audio_timestamp_step(), 960);
        assert_eq!(params.video_timestamp_step(), 3000);

        let ntsc = SessionParams {
            frame_rate: 29.97,
            ..params
        };
        assert_eq!(ntsc.video_timestamp_step(), 3003);
    }

    #[test]
    fn test_invalid_frame_rate() {
        let params = SessionParams {
            frame_rate: 0.0,
            ..params()
        };
        assert_eq!(params.validate(), Err(ConfigError::InvalidFrameRate(0.0)));
    }

    #[test]
    fn test_codec_parse() {
        assert_eq!("H264".parse::<VideoCodec>(), Ok(VideoCodec::H264));
        assert_eq!("opus".parse::<AudioCodec>(), Ok(AudioCodec::Opus));
        assert!("vp9".parse::<VideoCodec>().is_err());
    }
}
