//! FTL CLI Library
//!
//! Shared functionality for the FTL command-line tools.

pub mod annexb;
pub mod audio;
pub mod config;
pub mod stats;

pub use annexb::{access_units, split_nal_units};
pub use audio::read_audio_frames;
pub use config::{resolve_ingest, Config, ConfigFileError, IngestConfig, SenderConfig};
pub use stats::{describe_status, display_compact_stats, display_session_stats, format_bandwidth, format_bytes};
