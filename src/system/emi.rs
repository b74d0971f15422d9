//! Energy Meter Interface metadata layout

use crate::device::RaplChannel;

const EMI_MEASUREMENT_UNIT_PICOWATTHOURS: u32 = 0;

// EMI_METADATA_V2: HardwareOEM[16], HardwareModel[16], HardwareRevision, ChannelCount
const METADATA_CHANNEL_COUNT: usize = 66;
const METADATA_CHANNELS: usize = 68;
// EMI_CHANNEL_V2: MeasurementUnit, ChannelNameSize, ChannelName
const CHANNEL_HEADER: usize = 6;
/// EMI_CHANNEL_MEASUREMENT_DATA: AbsoluteEnergy, AbsoluteTime
pub const MEASUREMENT_SIZE: usize = 16;

/// Which meter channel slot holds which RAPL channel
#[derive(Debug, Clone)]
pub struct ChannelMap {
    pub slots: Vec<Option<RaplChannel>>,
    all_picowatt_hours: bool,
}

impl ChannelMap {
    pub fn is_complete(&self) -> bool {
        self.all_picowatt_hours
            && RaplChannel::ALL
                .iter()
                .all(|c| self.slots.contains(&Some(*c)))
    }
}

/// Parse an EMI_METADATA_V2 blob; `None` when it is truncated
pub fn parse_metadata(buf: &[u8]) -> Option<ChannelMap> {
    let count = buf
        .get(METADATA_CHANNEL_COUNT..METADATA_CHANNEL_COUNT + 2)
        .map(|b| u16::from_ne_bytes([b[0], b[1]]))?;

    let mut slots = Vec::with_capacity(count as usize);
    let mut all_picowatt_hours = true;
    let mut offset = METADATA_CHANNELS;

    for _ in 0..count {
        let header = buf.get(offset..offset + CHANNEL_HEADER)?;
        let unit = u32::from_ne_bytes([header[0], header[1], header[2], header[3]]);
        let name_size = u16::from_ne_bytes([header[4], header[5]]) as usize;
        let name_bytes = buf.get(offset + CHANNEL_HEADER..offset + CHANNEL_HEADER + name_size)?;

        let wide: Vec<u16> = name_bytes
            .chunks_exact(2)
            .map(|c| u16::from_ne_bytes([c[0], c[1]]))
            .take_while(|&c| c != 0)
            .collect();
        let name = String::from_utf16_lossy(&wide);

        all_picowatt_hours &= unit == EMI_MEASUREMENT_UNIT_PICOWATTHOURS;
        slots.push(RaplChannel::from_meter_name(&name));
        offset += CHANNEL_HEADER + name_size;
    }

    Some(ChannelMap {
        slots,
        all_picowatt_hours,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(buf: &mut Vec<u8>, unit: u32, name: &str) {
        let wide: Vec<u16> = name.encode_utf16().chain(std::iter::once(0)).collect();
        buf.extend_from_slice(&unit.to_ne_bytes());
        buf.extend_from_slice(&((wide.len() * 2) as u16).to_ne_bytes());
        for c in wide {
            buf.extend_from_slice(&c.to_ne_bytes());
        }
    }

    fn metadata(channels: &[(u32, &str)]) -> Vec<u8> {
        let mut buf = vec![0u8; METADATA_CHANNEL_COUNT];
        buf.extend_from_slice(&(channels.len() as u16).to_ne_bytes());
        for (unit, name) in channels {
            channel(&mut buf, *unit, name);
        }
        buf
    }

    #[test]
    fn test_parse_complete_metadata() {
        let buf = metadata(&[
            (0, "RAPL_Package0_PKG"),
            (0, "RAPL_Package0_PP0"),
            (0, "RAPL_Package0_PP1"),
            (0, "RAPL_Package0_DRAM"),
        ]);
        let map = parse_metadata(&buf).unwrap();
        assert_eq!(map.slots[3], Some(RaplChannel::Dram));
        assert!(map.is_complete());
    }

    #[test]
    fn test_missing_channel_or_unit_is_incomplete() {
        let buf = metadata(&[(0, "RAPL_Package0_PKG"), (0, "RAPL_Package0_PP0")]);
        assert!(!parse_metadata(&buf).unwrap().is_complete());

        let buf = metadata(&[
            (0, "RAPL_Package0_PKG"),
            (1, "RAPL_Package0_PP0"),
            (0, "RAPL_Package0_PP1"),
            (0, "RAPL_Package0_DRAM"),
        ]);
        assert!(!parse_metadata(&buf).unwrap().is_complete());
    }

    #[test]
    fn test_truncated_metadata() {
        let mut buf = metadata(&[(0, "RAPL_Package0_PKG")]);
        buf.truncate(buf.len() - 4);
        assert!(parse_metadata(&buf).is_none());
    }
}
