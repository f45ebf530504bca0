//! FTL media transport runtime
//!
//! Streams encoded audio and H.264 video to an FTL ingest over RTP/UDP.
//! Video is paced through a leaky bucket by a dedicated thread, audio is sent
//! inline, and a listener thread answers generic NACKs by resending packets
//! still held in the per-stream retransmission rings.
//!
//! ```no_run
//! use ftl::{MediaConfig, MediaSession, SessionParams, AudioCodec, VideoCodec};
//! use std::time::Duration;
//!
//! let params = SessionParams {
//!     ingest_ip: "127.0.0.1".parse().unwrap(),
//!     media_port: 8082,
//!     channel_id: 1234,
//!     video_codec: VideoCodec::H264,
//!     audio_codec: AudioCodec::Opus,
//!     video_kbps: 4000,
//!     frame_rate: 30.0,
//! };
//! let session = MediaSession::start(params, MediaConfig::default()).unwrap();
//! session.send_video(&[0x67, 0x42, 0x00, 0x1f], false);
//! while let Some(status) = session.next_status(Duration::from_millis(10)) {
//!     println!("{:?}", status);
//! }
//! session.shutdown();
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod feedback;
pub mod pacer;
pub mod session;
pub mod status;
pub mod stream;
pub mod transport;
pub mod video;

pub use ftl_io as io;
pub use ftl_protocol as protocol;

pub use config::{AudioCodec, MediaConfig, SessionParams, VideoCodec};
pub use error::{ConfigError, SessionError};
pub use session::{MediaSession, SessionStats};
pub use status::{EventKind, EventReason, PacketStats, StatusMessage, VideoStats};
pub use stream::{MediaKind, StreamStatsSnapshot};
