//! FTL Sender - stream an H.264 file to an FTL ingest
//!
//! Reads an Annex-B H.264 file (and optionally a length-prefixed audio file)
//! and streams it in real time over the FTL media transport.

use anyhow::Context;
use clap::Parser;
use ftl::{MediaSession, SessionParams, StatusMessage};
use ftl_cli::{
    access_units, describe_status, display_compact_stats, display_session_stats,
    read_audio_frames, resolve_ingest, split_nal_units, Config, SenderConfig,
};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Audio frame duration assumed by the RTP timestamp step
const AUDIO_FRAME_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Parser, Debug)]
#[command(name = "ftl-sender")]
#[command(about = "Stream H.264 and audio to an FTL ingest", long_about = None)]
struct Args {
    /// TOML configuration file ([sender] table)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Ingest host or address
    #[arg(long)]
    ingest: Option<String>,

    /// Media port assigned by the ingest
    #[arg(short = 'p', long)]
    media_port: Option<u16>,

    /// Channel id
    #[arg(long)]
    channel_id: Option<u32>,

    /// H.264 Annex-B input file
    #[arg(short, long)]
    video: Option<String>,

    /// Length-prefixed audio input file
    #[arg(short, long)]
    audio: Option<String>,

    /// Target video bitrate in kbps (0 disables pacing)
    #[arg(long)]
    kbps: Option<u32>,

    /// Video frame rate
    #[arg(long)]
    fps: Option<f32>,

    /// Path MTU
    #[arg(long)]
    mtu: Option<usize>,

    /// Restart the input files when they end
    #[arg(long = "loop")]
    repeat: bool,

    /// Verbose output
    #[arg(short = 'V', long)]
    verbose: bool,
}

fn sender_config(args: &Args) -> anyhow::Result<SenderConfig> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?
            .sender
            .context("configuration file has no [sender] table")?,
        None => SenderConfig {
            ingest: args.ingest.clone().context("--ingest is required")?,
            media_port: args.media_port.context("--media-port is required")?,
            channel_id: args.channel_id.context("--channel-id is required")?,
            ..Config::example_sender()
                .sender
                .context("missing example sender configuration")?
        },
    };

    if let Some(ingest) = &args.ingest {
        config.ingest = ingest.clone();
    }
    if let Some(port) = args.media_port {
        config.media_port = port;
    }
    if let Some(channel_id) = args.channel_id {
        config.channel_id = channel_id;
    }
    if args.video.is_some() || args.config.is_none() {
        config.video = args.video.clone();
    }
    if args.audio.is_some() {
        config.audio = args.audio.clone();
    }
    if let Some(kbps) = args.kbps {
        config.video_kbps = kbps;
    }
    if let Some(fps) = args.fps {
        config.frame_rate = fps;
    }
    if let Some(mtu) = args.mtu {
        config.mtu = mtu;
    }

    if config.video.is_none() && config.audio.is_none() {
        anyhow::bail!("Nothing to send: give --video and/or --audio");
    }
    Ok(config)
}

fn stream_video(session: &MediaSession, path: &str, fps: f32, repeat: bool, running: &AtomicBool) -> anyhow::Result<()> {
    let data = fs::read(path).with_context(|| format!("reading {}", path))?;
    let units = split_nal_units(&data);
    let frames = access_units(&units);
    tracing::info!("Loaded {} NAL units in {} frames from {}", units.len(), frames.len(), path);

    let frame_interval = Duration::from_secs_f32(1.0 / fps);
    let start = Instant::now();
    let mut frame_count = 0u32;

    loop {
        for frame in &frames {
            if !running.load(Ordering::Relaxed) {
                return Ok(());
            }
            for (i, nal) in frame.iter().enumerate() {
                session.send_video(nal, i + 1 == frame.len());
            }

            frame_count += 1;
            let due = start + frame_interval * frame_count;
            let now = Instant::now();
            if due > now {
                thread::sleep(due - now);
            }
        }
        if !repeat {
            return Ok(());
        }
    }
}

fn stream_audio(session: &MediaSession, path: &str, repeat: bool, running: &AtomicBool) -> anyhow::Result<()> {
    let data = fs::read(path).with_context(|| format!("reading {}", path))?;
    let frames = read_audio_frames(&data)?;
    tracing::info!("Loaded {} audio frames from {}", frames.len(), path);

    let start = Instant::now();
    let mut sent = 0u32;
    loop {
        for frame in &frames {
            if !running.load(Ordering::Relaxed) {
                return Ok(());
            }
            session.send_audio(frame);
            sent += 1;
            let due = start + AUDIO_FRAME_INTERVAL * sent;
            let now = Instant::now();
            if due > now {
                thread::sleep(due - now);
            }
        }
        if !repeat {
            return Ok(());
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    tracing::info!("FTL Sender starting...");
    let config = sender_config(&args)?;

    let params = SessionParams {
        ingest_ip: resolve_ingest(&config.ingest)?,
        media_port: config.media_port,
        channel_id: config.channel_id,
        video_codec: config.video_codec(),
        audio_codec: config.audio_codec()?,
        video_kbps: config.video_kbps,
        frame_rate: config.frame_rate,
    };

    let session = Arc::new(MediaSession::start(params, config.media_config())?);
    tracing::info!("Streaming from {} to {}:{}", session.local_addr(), config.ingest, config.media_port);

    let running = Arc::new(AtomicBool::new(true));
    let start = Instant::now();

    // Status reporter
    let status_session = session.clone();
    let status_running = running.clone();
    let status_handle = thread::spawn(move || {
        while status_running.load(Ordering::Relaxed) {
            if let Some(message) = status_session.next_status(Duration::from_millis(250)) {
                match message {
                    StatusMessage::Event { .. } => tracing::info!("{}", describe_status(&message)),
                    _ => tracing::debug!("{}", describe_status(&message)),
                }
                display_compact_stats(&status_session.stats(), start.elapsed());
            }
        }
    });

    let audio_handle = config.audio.clone().map(|path| {
        let session = session.clone();
        let running = running.clone();
        let repeat = args.repeat;
        thread::spawn(move || stream_audio(&session, &path, repeat, &running))
    });

    let video_result = match &config.video {
        Some(path) => stream_video(&session, path, config.frame_rate, args.repeat, &running),
        None => Ok(()),
    };

    if let Some(handle) = audio_handle {
        match handle.join() {
            Ok(result) => result?,
            Err(_) => anyhow::bail!("audio thread panicked"),
        }
    }
    video_result?;

    running.store(false, Ordering::Relaxed);
    let _ = status_handle.join();

    // Let the pacer drain before stopping
    let drain_deadline = Instant::now() + Duration::from_secs(2);
    while session.stats().video_pending > 0 && Instant::now() < drain_deadline {
        thread::sleep(Duration::from_millis(10));
    }
    session.shutdown();
    display_session_stats(&session.stats(), start.elapsed());

    Ok(())
}
