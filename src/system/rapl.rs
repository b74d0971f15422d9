//! RAPL energy counters via the Energy Meter Interface (EMI)

use std::collections::HashMap;
use std::io;
use std::sync::Mutex;

use windows::core::GUID;

use super::DeviceCandidate;
use super::emi::{ChannelMap, MEASUREMENT_SIZE, parse_metadata};
use super::native::{DeviceHandle, READ_ACCESS, describe_interfaces, device_interfaces, read_u64};
use crate::device::{DevicePath, Rapl, RaplCounters};
use crate::error::DeviceError;
use crate::poll::CounterSource;
use crate::sync::lock_or_recover;

const IOCTL_EMI_GET_VERSION: u32 = 0x0022_4000;
const IOCTL_EMI_GET_METADATA_SIZE: u32 = 0x0022_4004;
const IOCTL_EMI_GET_METADATA: u32 = 0x0022_4008;
const IOCTL_EMI_GET_MEASUREMENT: u32 = 0x0022_400C;

const EMI_VERSION_V2: u16 = 2;

const GUID_DEVICE_ENERGY_METER: GUID = GUID::from_u128(0x45bd8344_7ed6_49cf_a440_c276c933b053);

#[derive(Default)]
pub struct RaplSource {
    channel_maps: Mutex<HashMap<DevicePath, ChannelMap>>,
}

impl RaplSource {
    fn open(id: &DevicePath) -> Result<DeviceHandle, DeviceError> {
        DeviceHandle::open(id.as_str(), READ_ACCESS)
            .map_err(|e| DeviceError::query(id.to_string(), e))
    }

    fn read_channel_map(handle: &DeviceHandle) -> io::Result<Option<ChannelMap>> {
        let version: u16 = handle.ioctl_struct(IOCTL_EMI_GET_VERSION, None)?;
        if version != EMI_VERSION_V2 {
            return Ok(None);
        }

        let size: u32 = handle.ioctl_struct(IOCTL_EMI_GET_METADATA_SIZE, None)?;
        let mut metadata = vec![0u8; size as usize];
        let len = handle.ioctl(IOCTL_EMI_GET_METADATA, None, &mut metadata)?;
        Ok(parse_metadata(&metadata[..len]))
    }

    fn channel_map(&self, id: &DevicePath, handle: &DeviceHandle) -> Result<ChannelMap, DeviceError> {
        if let Some(map) = lock_or_recover(&self.channel_maps).get(id) {
            return Ok(map.clone());
        }

        let map = Self::read_channel_map(handle)
            .map_err(|e| DeviceError::query(id.to_string(), e))?
            .ok_or_else(|| DeviceError::CapabilityUnsupported {
                device: id.to_string(),
                method: "EMI v2",
            })?;
        lock_or_recover(&self.channel_maps).insert(id.clone(), map.clone());
        Ok(map)
    }
}

impl CounterSource<Rapl> for RaplSource {
    fn probe(&self, id: &DevicePath) -> Result<bool, DeviceError> {
        let handle = Self::open(id)?;
        match self.channel_map(id, &handle) {
            Ok(map) => Ok(map.is_complete()),
            Err(DeviceError::CapabilityUnsupported { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn query_primary(&self, id: &DevicePath) -> Result<RaplCounters, DeviceError> {
        let handle = Self::open(id)?;
        let map = self.channel_map(id, &handle)?;

        let mut data = vec![0u8; map.slots.len() * MEASUREMENT_SIZE];
        let len = handle
            .ioctl(IOCTL_EMI_GET_MEASUREMENT, None, &mut data)
            .map_err(|e| DeviceError::query(id.to_string(), e))?;
        let data = &data[..len];

        let mut counters = RaplCounters::default();
        for (slot, channel) in map.slots.iter().enumerate() {
            let Some(channel) = channel else { continue };
            let offset = slot * MEASUREMENT_SIZE;
            if let (Some(energy), Some(time)) = (read_u64(data, offset), read_u64(data, offset + 8)) {
                counters.set(*channel, energy, time);
            }
        }
        Ok(counters)
    }
}

pub fn enumerate() -> Vec<DeviceCandidate<DevicePath>> {
    describe_interfaces(device_interfaces(&GUID_DEVICE_ENERGY_METER))
        .into_iter()
        .map(|(path, description)| DeviceCandidate {
            id: DevicePath::new(path),
            description,
            present: true,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::native::required_access;

    #[test]
    fn test_handle_access_covers_emi_ioctls() {
        for code in [
            IOCTL_EMI_GET_VERSION,
            IOCTL_EMI_GET_METADATA_SIZE,
            IOCTL_EMI_GET_METADATA,
            IOCTL_EMI_GET_MEASUREMENT,
        ] {
            let needed = required_access(code);
            assert_ne!(needed, 0, "ioctl {code:#x}");
            assert_eq!(READ_ACCESS & needed, needed, "ioctl {code:#x}");
        }
    }
}
