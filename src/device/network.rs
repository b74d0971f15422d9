use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use super::{DeviceId, DeviceKind, ParsedList};
use crate::error::SettingsError;
use crate::sampling::{CircularBuffer, DeltaTracker, HighWaterMark};

/// Network adapter identity.
///
/// Only the LUID takes part in equality: it survives reboots, while the
/// interface index does not and is persisted for compatibility only.
#[derive(Clone, Debug)]
pub struct NetAdapterId {
    pub if_index: u32,
    pub luid: u64,
    /// Interface GUID in registry form, `{XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX}`
    pub guid: String,
}

impl NetAdapterId {
    pub fn new(if_index: u32, luid: u64, guid: impl Into<String>) -> Self {
        Self {
            if_index,
            luid,
            guid: guid.into(),
        }
    }
}

impl PartialEq for NetAdapterId {
    fn eq(&self, other: &Self) -> bool {
        self.luid == other.luid
    }
}

impl Eq for NetAdapterId {}

impl Hash for NetAdapterId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.luid.hash(state);
    }
}

impl fmt::Display for NetAdapterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.guid.is_empty() {
            write!(f, "luid:{}", self.luid)
        } else {
            f.write_str(&self.guid)
        }
    }
}

impl DeviceId for NetAdapterId {
    fn write_setting(&self, out: &mut String) {
        // ifIndex,luid,guid,
        out.push_str(&self.if_index.to_string());
        out.push(',');
        out.push_str(&self.luid.to_string());
        out.push(',');
        out.push_str(&self.guid);
        out.push(',');
    }

    fn parse_setting_list(list: &str, setting: &'static str) -> ParsedList<Self> {
        let mut parsed = ParsedList::default();
        let parts: Vec<&str> = list.split(',').map(str::trim).collect();

        for chunk in parts.chunks(3) {
            if chunk.iter().all(|s| s.is_empty()) {
                continue;
            }

            let corrupt = |reason: &str| SettingsError::CorruptPersistedState {
                setting,
                segment: chunk.join(","),
                reason: reason.to_string(),
            };

            let Ok(if_index) = chunk[0].parse::<u32>() else {
                parsed.errors.push(corrupt("interface index is not a number"));
                continue;
            };
            let Some(Ok(luid)) = chunk.get(1).map(|s| s.parse::<u64>()) else {
                parsed.errors.push(corrupt("interface LUID is missing or not a number"));
                continue;
            };
            let guid = chunk.get(2).copied().unwrap_or_default();

            parsed.ids.push(NetAdapterId::new(if_index, luid, guid));
        }

        parsed
    }
}

/// Raw counters returned by one adapter query
#[derive(Debug, Default, Clone)]
pub struct NetworkCounters {
    pub bytes_received: u64,
    pub bytes_sent: u64,
    /// Transmit link speed in bits per second
    pub link_speed: u64,
    pub link_up: bool,
    pub name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NetworkSamples {
    pub receive_raw: HighWaterMark,
    pub send_raw: HighWaterMark,
    pub receive: DeltaTracker,
    pub send: DeltaTracker,
    pub inbound: CircularBuffer<u64>,
    pub outbound: CircularBuffer<u64>,
    pub link_speed: u64,
    pub link_up: bool,
}

impl NetworkSamples {
    /// Bytes received during the last interval
    pub fn receive_rate(&self) -> u64 {
        self.receive.delta()
    }

    /// Bytes sent during the last interval
    pub fn send_rate(&self) -> u64 {
        self.send.delta()
    }

    pub fn total_rate(&self) -> u64 {
        self.receive_rate().saturating_add(self.send_rate())
    }

    /// Fraction of the link capacity used over an interval of `interval`
    pub fn utilization(&self, interval: Duration) -> f32 {
        let capacity_bits = self.link_speed as f64 * interval.as_secs_f64();
        if capacity_bits <= 0.0 {
            return 0.0;
        }
        let used_bits = self.total_rate() as f64 * 8.0;
        (used_bits / capacity_bits).clamp(0.0, 1.0) as f32
    }
}

/// Network adapters
pub struct Network;

impl DeviceKind for Network {
    type Id = NetAdapterId;
    type Counters = NetworkCounters;
    type Samples = NetworkSamples;

    const NAME: &'static str = "network";
    const SETTING: &'static str = "network_list";

    fn new_samples(sample_count: usize) -> NetworkSamples {
        NetworkSamples {
            receive_raw: HighWaterMark::new(),
            send_raw: HighWaterMark::new(),
            receive: DeltaTracker::new(),
            send: DeltaTracker::new(),
            inbound: CircularBuffer::new(sample_count),
            outbound: CircularBuffer::new(sample_count),
            link_speed: 0,
            link_up: false,
        }
    }

    fn update(samples: &mut NetworkSamples, counters: &NetworkCounters) {
        let received = samples.receive_raw.advance(counters.bytes_received);
        let sent = samples.send_raw.advance(counters.bytes_sent);
        samples.receive.update(received);
        samples.send.update(sent);
        samples.link_speed = counters.link_speed;
        samples.link_up = counters.link_up;
    }

    fn push_history(samples: &mut NetworkSamples) {
        samples.inbound.push(samples.receive.delta());
        samples.outbound.push(samples.send.delta());
    }

    fn clear_rates(samples: &mut NetworkSamples) {
        samples.receive.clear_delta();
        samples.send.clear_delta();
        samples.link_speed = 0;
        samples.link_up = false;
    }

    fn reported_name(counters: &NetworkCounters) -> Option<String> {
        counters.name.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_uses_luid_only() {
        let a = NetAdapterId::new(12, 1_689_399_632_052_224, "{A}");
        let b = NetAdapterId::new(7, 1_689_399_632_052_224, "{B}");
        let c = NetAdapterId::new(12, 42, "{A}");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_setting_list_round_trip() {
        let ids = [
            NetAdapterId::new(12, 1_689_399_632_052_224, "{1F2E3D4C-0000-1111-2222-333344445555}"),
            NetAdapterId::new(3, 6_755_399_441_055_744, "{00000000-AAAA-BBBB-CCCC-DDDDEEEEFFFF}"),
        ];
        let mut out = String::new();
        for id in &ids {
            id.write_setting(&mut out);
        }
        out.pop();

        let parsed = NetAdapterId::parse_setting_list(&out, "network_list");
        assert!(parsed.errors.is_empty());
        assert_eq!(parsed.ids.len(), 2);
        assert_eq!(parsed.ids[0].if_index, 12);
        assert_eq!(parsed.ids[1].guid, ids[1].guid);
    }

    #[test]
    fn test_corrupt_segments_are_skipped() {
        let parsed =
            NetAdapterId::parse_setting_list("x,100,{A},4,200,{B},5,nope,{C}", "network_list");
        assert_eq!(parsed.ids.len(), 1);
        assert_eq!(parsed.ids[0].luid, 200);
        assert_eq!(parsed.errors.len(), 2);
    }

    #[test]
    fn test_update_and_rates() {
        let mut samples = Network::new_samples(4);
        let mut counters = NetworkCounters {
            bytes_received: 1_000,
            bytes_sent: 500,
            link_speed: 1_000_000_000,
            link_up: true,
            name: None,
        };
        Network::update(&mut samples, &counters);
        assert_eq!(samples.receive_rate(), 0);

        counters.bytes_received = 3_000;
        counters.bytes_sent = 400; // dip below the high-water mark
        Network::update(&mut samples, &counters);
        assert_eq!(samples.receive_rate(), 2_000);
        assert_eq!(samples.send_rate(), 0);
        assert_eq!(samples.send.value(), 500);

        Network::push_history(&mut samples);
        assert_eq!(samples.inbound.get(0), Some(2_000));
        assert_eq!(samples.outbound.get(0), Some(0));

        Network::clear_rates(&mut samples);
        assert_eq!(samples.total_rate(), 0);
        assert!(!samples.link_up);
        assert_eq!(samples.inbound.count(), 1);
    }

    #[test]
    fn test_utilization() {
        let mut samples = Network::new_samples(1);
        samples.link_speed = 8_000;
        samples.receive.update(0);
        samples.receive.update(500);
        // 500 bytes = 4000 bits over a 1s, 8000 bit/s link
        let used = samples.utilization(Duration::from_secs(1));
        assert!((used - 0.5).abs() < f32::EPSILON);
        assert_eq!(samples.utilization(Duration::ZERO), 0.0);
    }
}
