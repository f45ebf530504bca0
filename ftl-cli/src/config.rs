//! Configuration file support for the FTL command-line tools

use ftl::{AudioCodec, MediaConfig, SessionError, VideoCodec};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

/// Sender configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderConfig {
    /// Ingest host name or address
    pub ingest: String,
    /// Media port assigned by the ingest
    pub media_port: u16,
    /// Channel id (audio SSRC; video uses id + 1)
    pub channel_id: u32,
    /// H.264 Annex-B input file
    pub video: Option<String>,
    /// Length-prefixed audio input file
    pub audio: Option<String>,
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
    /// Target video bitrate, 0 disables pacing
    #[serde(default = "default_video_kbps")]
    pub video_kbps: u32,
    #[serde(default = "default_frame_rate")]
    pub frame_rate: f32,
    #[serde(default = "default_mtu")]
    pub mtu: usize,
    #[serde(default = "default_ring_size")]
    pub ring_size: usize,
    #[serde(default = "default_max_burst_ms")]
    pub max_burst_ms: u32,
    /// Seconds between status reports
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

fn default_audio_codec() -> String {
    "opus".to_string()
}

fn default_video_kbps() -> u32 {
    4000
}

fn default_frame_rate() -> f32 {
    30.0
}

fn default_mtu() -> usize {
    1392
}

fn default_ring_size() -> usize {
    2048
}

fn default_max_burst_ms() -> u32 {
    50
}

fn default_stats_interval() -> u64 {
    5
}

/// Ingest simulator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Address to receive media on
    pub listen: SocketAddr,
    /// Minimum interval between NACKs for the same loss, in milliseconds
    #[serde(default = "default_nack_interval")]
    pub nack_interval_ms: u64,
    /// Maximum NACKs per lost packet
    #[serde(default = "default_max_nacks")]
    pub max_nacks: u32,
    /// Drop every Nth new packet to exercise retransmission (0 = never)
    #[serde(default)]
    pub drop_every: u32,
    /// Seconds between loss summaries
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

fn default_nack_interval() -> u64 {
    20
}

fn default_max_nacks() -> u32 {
    5
}

/// Combined configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub sender: Option<SenderConfig>,
    pub ingest: Option<IngestConfig>,
}

impl Config {
    /// Read a `[sender]` / `[ingest]` TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigFileError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigFileError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(toml::from_str(&text)?)
    }

    /// Write this configuration as TOML, e.g. to seed a config file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigFileError> {
        let path = path.as_ref();
        fs::write(path, toml::to_string_pretty(self)?).map_err(|source| ConfigFileError::Write {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn example_sender() -> Self {
        Config {
            sender: Some(SenderConfig {
                ingest: "127.0.0.1".to_string(),
                media_port: 8082,
                channel_id: 123_456,
                video: Some("input.h264".to_string()),
                audio: None,
                audio_codec: default_audio_codec(),
                video_kbps: default_video_kbps(),
                frame_rate: default_frame_rate(),
                mtu: default_mtu(),
                ring_size: default_ring_size(),
                max_burst_ms: default_max_burst_ms(),
                stats_interval_secs: default_stats_interval(),
            }),
            ingest: None,
        }
    }

    pub fn example_ingest() -> Self {
        Config {
            sender: None,
            ingest: Some(IngestConfig {
                listen: SocketAddr::from(([0, 0, 0, 0], 8082)),
                nack_interval_ms: default_nack_interval(),
                max_nacks: default_max_nacks(),
                drop_every: 0,
                stats_interval_secs: default_stats_interval(),
            }),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    #[error("Cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Cannot encode config: {0}")]
    Encode(#[from] toml::ser::Error),

    #[error("{0}")]
    Codec(String),
}

impl SenderConfig {
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }

    pub fn audio_codec(&self) -> Result<AudioCodec, ConfigFileError> {
        self.audio_codec.parse().map_err(ConfigFileError::Codec)
    }

    pub fn video_codec(&self) -> VideoCodec {
        VideoCodec::H264
    }

    /// Media path tunables derived from this configuration
    pub fn media_config(&self) -> MediaConfig {
        MediaConfig {
            mtu: self.mtu,
            ring_size: self.ring_size,
            max_burst_ms: self.max_burst_ms,
            stats_interval: self.stats_interval(),
            ..MediaConfig::default()
        }
    }
}

impl IngestConfig {
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }

    pub fn nack_interval(&self) -> Duration {
        Duration::from_millis(self.nack_interval_ms)
    }
}

/// Resolve an ingest host name to its first address
pub fn resolve_ingest(host: &str) -> Result<IpAddr, SessionError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }

    (host, 0)
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .map(|addr| addr.ip())
        .ok_or_else(|| SessionError::Resolve(host.to_string()))
}
