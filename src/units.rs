//! Human-readable formatting for sampled values

const KB: u64 = 1024;
const MB: u64 = KB * 1024;
const GB: u64 = MB * 1024;
const TB: u64 = GB * 1024;

/// Format bytes into human-readable string
pub fn format_bytes(bytes: u64) -> String {
    if bytes >= TB {
        format!("{:.1}T", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.1}G", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1}M", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.0}K", bytes as f64 / KB as f64)
    } else {
        format!("{}B", bytes)
    }
}

/// Bytes per interval as a per-second rate
pub fn format_rate(bytes: u64, interval_ms: u64) -> String {
    let per_second = if interval_ms == 0 {
        bytes
    } else {
        bytes.saturating_mul(1000) / interval_ms
    };
    format!("{}/s", format_bytes(per_second))
}

/// Link speed in decimal bit units, the way adapters advertise it
pub fn format_link_speed(bits_per_second: u64) -> String {
    match bits_per_second {
        0 => "-".to_string(),
        b if b >= 1_000_000_000 => format!("{:.1} Gbps", b as f64 / 1e9),
        b if b >= 1_000_000 => format!("{:.0} Mbps", b as f64 / 1e6),
        b if b >= 1_000 => format!("{:.0} Kbps", b as f64 / 1e3),
        b => format!("{} bps", b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(2048), "2K");
        assert_eq!(format_bytes(5 * MB + MB / 2), "5.5M");
        assert_eq!(format_bytes(3 * GB), "3.0G");
        assert_eq!(format_bytes(2 * TB), "2.0T");
    }

    #[test]
    fn test_format_rate() {
        assert_eq!(format_rate(4096, 2000), "2K/s");
        assert_eq!(format_rate(100, 0), "100B/s");
    }

    #[test]
    fn test_format_link_speed() {
        assert_eq!(format_link_speed(0), "-");
        assert_eq!(format_link_speed(2_500_000_000), "2.5 Gbps");
        assert_eq!(format_link_speed(100_000_000), "100 Mbps");
    }
}
