//! Session and configuration errors

use ftl_io::SocketError;
use std::io;
use thiserror::Error;

/// Invalid session parameters or media configuration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid MTU {mtu}: must be between {min} and {max}")]
    InvalidMtu { mtu: usize, min: usize, max: usize },

    #[error("Invalid ring size {size}: must be between 1 and {max}")]
    InvalidRingSize { size: usize, max: usize },

    #[error("Invalid frame rate {0}")]
    InvalidFrameRate(f32),

    #[error("Media port must be non-zero")]
    ZeroMediaPort,

    #[error("Receive timeout must be non-zero")]
    ZeroRecvTimeout,

    #[error("Stats interval must be non-zero")]
    ZeroStatsInterval,

    #[error("Status queue length must be non-zero")]
    ZeroStatusQueue,
}

/// Errors from starting a media session
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Socket error: {0}")]
    Socket(#[from] SocketError),

    #[error("Failed to spawn {thread} thread: {source}")]
    Spawn {
        thread: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Could not resolve ingest address {0}")]
    Resolve(String),
}
