//! Media session
//!
//! Owns both media streams, the UDP socket and the two background threads
//! (pacer and feedback listener) for one connection to an ingest.

use crate::audio::AudioSender;
use crate::config::{MediaConfig, SessionParams};
use crate::error::{ConfigError, SessionError};
use crate::feedback::FeedbackListener;
use crate::pacer::Pacer;
use crate::status::{EventKind, EventReason, StatsReporter, StatusMessage, StatusQueue};
use crate::stream::{MediaKind, MediaStream, StreamStatsSnapshot};
use crate::transport::{Transport, UdpTransport};
use crate::video::VideoSender;
use crossbeam::channel::{self, Sender};
use ftl_io::{Clock, MediaSocket, SystemClock};
use ftl_protocol::packet::{AUDIO_PAYLOAD_TYPE, VIDEO_PAYLOAD_TYPE};
use ftl_protocol::packetizer::{AudioPacketizer, RtpStreamState, VideoPacketizer};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info, warn};

const PACER_THREAD: &str = "ftl-pacer";
const FEEDBACK_THREAD: &str = "ftl-feedback";

/// Cumulative counters of both streams
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub video: StreamStatsSnapshot,
    pub audio: StreamStatsSnapshot,
    /// Video packets queued but not yet paced out
    pub video_pending: usize,
}

pub struct MediaSession {
    params: SessionParams,
    local_addr: SocketAddr,
    video: Mutex<VideoSender>,
    audio: Mutex<AudioSender>,
    video_stream: Arc<MediaStream>,
    audio_stream: Arc<MediaStream>,
    status: Arc<StatusQueue>,
    pacer_running: Arc<AtomicBool>,
    listener_running: Arc<AtomicBool>,
    wake: Sender<()>,
    pacer: Mutex<Option<JoinHandle<()>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl MediaSession {
    /// Start a session using the system clock
    pub fn start(params: SessionParams, config: MediaConfig) -> Result<Self, SessionError> {
        Self::start_with_clock(params, config, Arc::new(SystemClock))
    }

    /// Start a session with an explicit clock
    pub fn start_with_clock(
        params: SessionParams,
        config: MediaConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SessionError> {
        params.validate()?;
        config.validate()?;

        let destination = params.destination();
        let socket = MediaSocket::for_destination(params.ingest_ip)?;
        socket.set_read_timeout(config.recv_timeout)?;
        if let Some(size) = config.send_buffer_size {
            socket.set_send_buffer_size(size)?;
        }
        let local_addr = socket.local_addr()?;
        let socket = Arc::new(socket);
        let transport: Arc<dyn Transport> = Arc::new(UdpTransport::new(socket.clone(), destination));

        let video_stream = Arc::new(MediaStream::new(
            MediaKind::Video,
            params.video_ssrc(),
            VIDEO_PAYLOAD_TYPE,
            config.ring_size,
        ));
        let audio_stream = Arc::new(MediaStream::new(
            MediaKind::Audio,
            params.audio_ssrc(),
            AUDIO_PAYLOAD_TYPE,
            config.ring_size,
        ));

        let video_packetizer = VideoPacketizer::new(
            RtpStreamState::new(
                params.video_ssrc(),
                VIDEO_PAYLOAD_TYPE,
                params.video_timestamp_step(),
            ),
            config.mtu,
        )
        .map_err(|_| ConfigError::InvalidMtu {
            mtu: config.mtu,
            min: ftl_protocol::packetizer::MIN_MTU,
            max: ftl_protocol::packet::MAX_PACKET_BUFFER,
        })?;
        let audio_packetizer = AudioPacketizer::new(RtpStreamState::new(
            params.audio_ssrc(),
            AUDIO_PAYLOAD_TYPE,
            params.audio_timestamp_step(),
        ));

        let status = Arc::new(StatusQueue::new(config.status_queue_len));
        let (wake_tx, wake_rx) = channel::unbounded();
        let pacer_running = Arc::new(AtomicBool::new(true));
        let listener_running = Arc::new(AtomicBool::new(true));

        let pacer = Pacer::new(
            video_stream.clone(),
            transport.clone(),
            clock.clone(),
            params.video_kbps,
            config.max_burst_ms,
            wake_rx,
            pacer_running.clone(),
        );
        let pacer_handle = thread::Builder::new()
            .name(PACER_THREAD.into())
            .spawn(move || pacer.run())
            .map_err(|source| SessionError::Spawn {
                thread: PACER_THREAD,
                source,
            })?;

        let listener = FeedbackListener::new(
            socket,
            transport.clone(),
            clock.clone(),
            vec![audio_stream.clone(), video_stream.clone()],
            listener_running.clone(),
        );
        let listener_handle = match thread::Builder::new()
            .name(FEEDBACK_THREAD.into())
            .spawn(move || listener.run())
        {
            Ok(handle) => handle,
            Err(source) => {
                pacer_running.store(false, Ordering::Release);
                let _ = wake_tx.send(());
                let _ = pacer_handle.join();
                return Err(SessionError::Spawn {
                    thread: FEEDBACK_THREAD,
                    source,
                });
            }
        };

        let now = clock.now();
        let video = VideoSender::new(
            video_packetizer,
            video_stream.clone(),
            wake_tx.clone(),
            clock.clone(),
            status.clone(),
            StatsReporter::new(config.stats_interval, now),
        );
        let audio = AudioSender::new(
            audio_packetizer,
            audio_stream.clone(),
            transport,
            clock,
            status.clone(),
            StatsReporter::new(config.stats_interval, now),
        );

        info!(
            %destination,
            %local_addr,
            channel_id = params.channel_id,
            video_codec = %params.video_codec,
            audio_codec = %params.audio_codec,
            video_kbps = params.video_kbps,
            mtu = config.mtu,
            "Media session started"
        );
        status.push(StatusMessage::Event {
            kind: EventKind::Connected,
            reason: EventReason::None,
        });

        Ok(MediaSession {
            params,
            local_addr,
            video: Mutex::new(video),
            audio: Mutex::new(audio),
            video_stream,
            audio_stream,
            status,
            pacer_running,
            listener_running,
            wake: wake_tx,
            pacer: Mutex::new(Some(pacer_handle)),
            listener: Mutex::new(Some(listener_handle)),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn params(&self) -> &SessionParams {
        &self.params
    }

    /// Local address of the media socket
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::Acquire)
    }

    /// Queue one H.264 NAL unit for paced sending
    ///
    /// Returns the packet bytes queued; 0 while waiting for a keyframe or
    /// after shutdown.
    pub fn send_video(&self, nal: &[u8], end_of_frame: bool) -> usize {
        if !self.is_running() {
            return 0;
        }
        self.video.lock().send(nal, end_of_frame)
    }

    /// Send one audio frame immediately; returns the bytes written
    pub fn send_audio(&self, frame: &[u8]) -> usize {
        if !self.is_running() {
            return 0;
        }
        self.audio.lock().send(frame)
    }

    /// Wait up to `timeout` for the next status message
    pub fn next_status(&self, timeout: Duration) -> Option<StatusMessage> {
        self.status.pop(timeout)
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            video: self.video_stream.stats().snapshot(),
            audio: self.audio_stream.stats().snapshot(),
            video_pending: self.video_stream.ring().pending(),
        }
    }

    /// Stop both threads and wait for them; safe to call more than once
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        self.pacer_running.store(false, Ordering::Release);
        self.listener_running.store(false, Ordering::Release);
        if self.wake.send(()).is_err() {
            warn!("Pacer already gone at shutdown");
        }

        for (name, handle) in [(PACER_THREAD, &self.pacer), (FEEDBACK_THREAD, &self.listener)] {
            if let Some(handle) = handle.lock().take() {
                if handle.join().is_err() {
                    error!(thread = name, "Thread panicked");
                }
            }
        }

        self.status.push(StatusMessage::Event {
            kind: EventKind::Disconnected,
            reason: EventReason::ApiRequest,
        });
        info!(channel_id = self.params.channel_id, "Media session stopped");
    }
}

impl Drop for MediaSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AudioCodec, VideoCodec};
    use std::net::{IpAddr, Ipv4Addr};

    fn params(port: u16) -> SessionParams {
        SessionParams {
            ingest_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            media_port: port,
            channel_id: 77,
            video_codec: VideoCodec::H264,
            audio_codec: AudioCodec::Opus,
            video_kbps: 0,
            frame_rate: 30.0,
        }
    }

    #[test]
    fn test_start_and_shutdown() {
        let ingest = MediaSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let port = ingest.local_addr().unwrap().port();

        let session = MediaSession::start(params(port), MediaConfig::default()).unwrap();
        assert!(session.local_addr().ip().is_loopback());
        assert!(matches!(
            session.next_status(Duration::from_millis(100)),
            Some(StatusMessage::Event {
                kind: EventKind::Connected,
                ..
            })
        ));

        session.shutdown();
        session.shutdown();
        assert!(!session.is_running());
        assert_eq!(session.send_audio(b"late"), 0);
        assert!(matches!(
            session.next_status(Duration::from_millis(100)),
            Some(StatusMessage::Event {
                kind: EventKind::Disconnected,
                reason: EventReason::ApiRequest,
            })
        ));
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = MediaConfig {
            mtu: 8,
            ..Default::default()
        };
        assert!(matches!(
            MediaSession::start(params(9000), config),
            Err(SessionError::Config(ConfigError::InvalidMtu { .. }))
        ));
    }

    #[test]
    fn test_audio_reaches_ingest() {
        let ingest = MediaSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        ingest.set_read_timeout(Duration::from_secs(2)).unwrap();
        let port = ingest.local_addr().unwrap().port();

        let session = MediaSession::start(params(port), MediaConfig::default()).unwrap();
        assert_eq!(session.send_audio(b"opus"), 16);

        let mut buf = [0u8; 64];
        let (n, from) = ingest.recv_from(&mut buf).unwrap();
        assert_eq!(n, 16);
        assert_eq!(from, session.local_addr());
        assert_eq!(session.stats().audio.packets_sent, 1);
    }
}
