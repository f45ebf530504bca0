//! FTL Ingest Simulator
//!
//! Receives RTP media like an FTL ingest would, tracks losses per SSRC and
//! answers them with RTCP generic NACKs. Optionally drops packets on purpose
//! to exercise the sender's retransmission path.

use clap::Parser;
use ftl_cli::stats::{format_bandwidth, format_bytes, rate_bps};
use ftl_cli::{Config, IngestConfig};
use ftl_io::{MediaSocket, Timer};
use ftl_protocol::feedback::NackReport;
use ftl_protocol::loss::{Arrival, LossTracker};
use ftl_protocol::packet::{RtpPacket, MAX_PACKET_BUFFER};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

/// SSRC the simulator reports as feedback sender
const INGEST_SSRC: u32 = 0x4654_4C00;

/// Losses older than this many packets are forgotten
const LOSS_WINDOW: u16 = 1024;

#[derive(Parser, Debug)]
#[command(name = "ftl-ingest-sim")]
#[command(about = "FTL ingest simulator: receives RTP and sends generic NACKs", long_about = None)]
struct Args {
    /// TOML configuration file ([ingest] table)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Drop every Nth new packet (0 = never)
    #[arg(long)]
    drop_every: Option<u32>,

    /// Statistics interval in seconds
    #[arg(long)]
    stats: Option<u64>,

    /// Verbose output
    #[arg(short = 'V', long)]
    verbose: bool,
}

#[derive(Default)]
struct SsrcStats {
    packets: u64,
    bytes: u64,
    lost: u64,
    recovered: u64,
    duplicates: u64,
    dropped: u64,
    nacks_sent: u64,
    frames: u64,
}

struct Stream {
    tracker: LossTracker,
    stats: SsrcStats,
    interval_bytes: u64,
}

fn ingest_config(args: &Args) -> anyhow::Result<IngestConfig> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?
            .ingest
            .ok_or_else(|| anyhow::anyhow!("configuration file has no [ingest] table"))?,
        None => Config::example_ingest()
            .ingest
            .ok_or_else(|| anyhow::anyhow!("missing example ingest configuration"))?,
    };

    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(drop_every) = args.drop_every {
        config.drop_every = drop_every;
    }
    if let Some(stats) = args.stats {
        config.stats_interval_secs = stats;
    }
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = ingest_config(&args)?;
    tracing::info!("FTL ingest simulator listening on {}", config.listen);

    let socket = MediaSocket::bind(config.listen)?;
    socket.set_read_timeout(config.nack_interval().max(std::time::Duration::from_millis(1)))?;

    let mut streams: HashMap<u32, Stream> = HashMap::new();
    let mut peer: Option<SocketAddr> = None;
    let mut received = 0u64;
    let mut stats_timer = Timer::new(config.stats_interval(), Instant::now());
    let mut buf = [0u8; MAX_PACKET_BUFFER];

    loop {
        match socket.recv_from(&mut buf) {
            Ok((len, from)) => {
                let packet = match RtpPacket::parse(&buf[..len]) {
                    Ok(packet) => packet,
                    Err(e) => {
                        tracing::debug!("Ignoring non-RTP datagram from {}: {}", from, e);
                        continue;
                    }
                };
                if peer != Some(from) {
                    tracing::info!("Receiving media from {}", from);
                    peer = Some(from);
                }

                let header = packet.header;
                let now = Instant::now();
                let stream = streams.entry(header.ssrc).or_insert_with(|| {
                    tracing::info!(ssrc = header.ssrc, pt = header.payload_type, "New stream");
                    Stream {
                        tracker: LossTracker::new(config.max_nacks, config.nack_interval(), LOSS_WINDOW),
                        stats: SsrcStats::default(),
                        interval_bytes: 0,
                    }
                });

                let is_new = stream
                    .tracker
                    .highest()
                    .map_or(true, |highest| header.sequence.gt(highest));
                received += 1;
                if is_new && config.drop_every > 0 && received % config.drop_every as u64 == 0 {
                    stream.stats.dropped += 1;
                    tracing::debug!(ssrc = header.ssrc, seq = %header.sequence, "Dropping packet on purpose");
                    continue;
                }

                match stream.tracker.on_packet(header.sequence, now) {
                    Arrival::Gap { lost } => {
                        stream.stats.lost += lost as u64;
                        tracing::debug!(ssrc = header.ssrc, seq = %header.sequence, lost, "Gap detected");
                    }
                    Arrival::Recovered => stream.stats.recovered += 1,
                    Arrival::Duplicate => stream.stats.duplicates += 1,
                    Arrival::First | Arrival::InOrder => {}
                }

                stream.stats.packets += 1;
                stream.stats.bytes += len as u64;
                stream.interval_bytes += len as u64;
                if header.marker {
                    stream.stats.frames += 1;
                }
            }
            Err(e) if e.is_timeout() => {}
            Err(e) => {
                tracing::warn!("Receive failed: {}", e);
            }
        }

        let now = Instant::now();
        if let Some(peer) = peer {
            for (&ssrc, stream) in streams.iter_mut() {
                let entries = stream.tracker.due_nacks(now);
                if entries.is_empty() {
                    continue;
                }
                let report = NackReport::new(INGEST_SSRC, ssrc, entries);
                let requested = report.lost_sequences().count() as u64;
                match socket.send_to(&report.to_bytes(), peer) {
                    Ok(_) => {
                        stream.stats.nacks_sent += requested;
                        tracing::debug!(ssrc, requested, "Sent NACK");
                    }
                    Err(e) => tracing::error!("Failed to send NACK: {}", e),
                }
            }
        }

        if let Some(period) = stats_timer.try_fire(now) {
            for (ssrc, stream) in streams.iter_mut() {
                let s = &stream.stats;
                tracing::info!(
                    "ssrc {:>10}: {} pkts, {} ({}), frames {}, lost {}, recovered {}, dup {}, dropped {}, nacked {}, outstanding {}",
                    ssrc,
                    s.packets,
                    format_bytes(s.bytes),
                    format_bandwidth(rate_bps(stream.interval_bytes, period)),
                    s.frames,
                    s.lost,
                    s.recovered,
                    s.duplicates,
                    s.dropped,
                    s.nacks_sent,
                    stream.tracker.len()
                );
                stream.interval_bytes = 0;
            }
        }
    }
}
