//! Human-readable status lines and session tables for the CLI tools

use ftl::{PacketStats, SessionStats, StatusMessage, VideoStats};
use std::io::Write;
use std::time::Duration;

/// Scale `value` into the largest unit it reaches
fn scaled(value: u64, step: u64, units: &[&str]) -> String {
    let mut divisor = 1u64;
    let mut unit = 0;
    while unit + 1 < units.len() && value >= divisor * step {
        divisor *= step;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", value, units[0])
    } else {
        format!("{:.2} {}", value as f64 / divisor as f64, units[unit])
    }
}

/// Byte count with binary prefixes, e.g. `2.00 KB`
pub fn format_bytes(bytes: u64) -> String {
    scaled(bytes, 1024, &["B", "KB", "MB", "GB"])
}

/// Bit rate with decimal prefixes, e.g. `4.00 Mbps`
pub fn format_bandwidth(bps: u64) -> String {
    scaled(bps, 1000, &["bps", "Kbps", "Mbps", "Gbps"])
}

/// Elapsed time as `1h 02m 03s`, `2m 03s` or `3s`
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let (h, m, s) = (total / 3600, total / 60 % 60, total % 60);
    match (h, m) {
        (0, 0) => format!("{s}s"),
        (0, _) => format!("{m}m {s:02}s"),
        _ => format!("{h}h {m:02}m {s:02}s"),
    }
}

/// Bits per second over a period
pub fn rate_bps(bytes: u64, period: Duration) -> u64 {
    let secs = period.as_secs_f64();
    if secs > 0.0 {
        (bytes as f64 * 8.0 / secs) as u64
    } else {
        0
    }
}

/// One-line summary of a video stats report
pub fn describe_video(stats: &VideoStats) -> String {
    format!(
        "video: {:.1} fps | {} | max frame {} | dropped {}",
        stats.average_fps,
        format_bandwidth(rate_bps(stats.bytes_sent, stats.period)),
        format_bytes(stats.max_frame_size),
        stats.frames_dropped
    )
}

/// One-line summary of a packet stats report
pub fn describe_packets(stats: &PacketStats) -> String {
    format!(
        "{}: {} pkts ({:.0} pps) | nack {} | resent {} | stale {}",
        stats.stream,
        stats.sent,
        stats.average_pps,
        stats.nack_requests,
        stats.retransmitted,
        stats.stale
    )
}

/// Human-readable form of any status message
pub fn describe_status(message: &StatusMessage) -> String {
    match message {
        StatusMessage::Event { kind, reason } => format!("event: {:?} ({:?})", kind, reason),
        StatusMessage::VideoStats(stats) => describe_video(stats),
        StatusMessage::PacketStats(stats) => describe_packets(stats),
    }
}

/// Display cumulative session totals as a table
pub fn display_session_stats(stats: &SessionStats, elapsed: Duration) {
    println!();
    println!("┌─────────────────────────────────────────────────────────────┐");
    println!("│ FTL session after {:<42}│", format_duration(elapsed));
    println!("├───────┬──────────┬──────────┬─────────┬─────────┬──────────┤");
    println!("│Stream │ Packets  │ Bytes    │ Dropped │ NACKs   │ Resent   │");
    println!("├───────┼──────────┼──────────┼─────────┼─────────┼──────────┤");
    for (name, s) in [("video", &stats.video), ("audio", &stats.audio)] {
        println!(
            "│ {:5} │ {:8} │ {:8} │ {:7} │ {:7} │ {:8} │",
            name,
            s.packets_sent,
            format_bytes(s.bytes_sent),
            s.frames_dropped,
            s.nack_requests,
            s.retransmitted
        );
    }
    println!("└───────┴──────────┴──────────┴─────────┴─────────┴──────────┘");
}

/// Overwrite the current terminal line with running totals
pub fn display_compact_stats(stats: &SessionStats, elapsed: Duration) {
    let total = stats.video.bytes_sent + stats.audio.bytes_sent;
    print!(
        "\r[{:8}] Sent: {} | Rate: {} | Pending: {} | Resent: {}         ",
        format_duration(elapsed),
        format_bytes(total),
        format_bandwidth(rate_bps(total, elapsed)),
        stats.video_pending,
        stats.video.retransmitted + stats.audio.retransmitted
    );
    let _ = std::io::stdout().flush();
}

#[cfg(test)]
mod tests {
    use super::*;
    use ftl::MediaKind;

    #[test]
    fn test_units() {
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(3 << 30), "3.00 GB");
        assert_eq!(format_bandwidth(999), "999 bps");
        assert_eq!(format_bandwidth(4_000_000), "4.00 Mbps");
    }

    #[test]
    fn test_durations() {
        assert_eq!(format_duration(Duration::from_millis(4_900)), "4s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 05s");
        assert_eq!(format_duration(Duration::from_secs(7322)), "2h 02m 02s");
    }

    #[test]
    fn test_rate() {
        assert_eq!(rate_bps(1_250_000, Duration::from_secs(5)), 2_000_000);
        assert_eq!(rate_bps(100, Duration::ZERO), 0);
    }

    #[test]
    fn test_describe_packets() {
        let stats = PacketStats {
            stream: MediaKind::Audio,
            period: Duration::from_secs(5),
            sent: 250,
            nack_requests: 3,
            retransmitted: 2,
            stale: 1,
            average_pps: 50.0,
        };
        assert_eq!(
            describe_packets(&stats),
            "audio: 250 pkts (50 pps) | nack 3 | resent 2 | stale 1"
        );
    }
}
