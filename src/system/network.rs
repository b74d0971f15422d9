//! Network adapter counters via NDIS with an IP helper fallback

use std::io;

use windows::Win32::Foundation::WIN32_ERROR;
use windows::Win32::NetworkManagement::IpHelper::{
    FreeMibTable, GetIfEntry2, GetIfTable2, IF_TYPE_SOFTWARE_LOOPBACK, MIB_IF_ROW2, MIB_IF_TABLE2,
};
use windows::Win32::NetworkManagement::Ndis::IfOperStatusUp;

use super::DeviceCandidate;
use super::native::{DeviceHandle, GENERIC_READ_ACCESS, from_wide, guid_string, read_u32, read_u64};
use crate::device::{NetAdapterId, Network, NetworkCounters};
use crate::error::DeviceError;
use crate::poll::CounterSource;

const IOCTL_NDIS_QUERY_GLOBAL_STATS: u32 = 0x0017_0002;

const OID_GEN_SUPPORTED_LIST: u32 = 0x0001_0101;
const OID_GEN_LINK_SPEED: u32 = 0x0001_0107;
const OID_GEN_FRIENDLY_NAME: u32 = 0x0001_0116;
const OID_GEN_LINK_STATE: u32 = 0x0001_0209;
const OID_GEN_STATISTICS: u32 = 0x0002_0106;

/// OIDs the NDIS path reads; an adapter missing any of them is queried
/// through the IP helper instead
const REQUIRED_OIDS: [u32; 4] = [
    OID_GEN_FRIENDLY_NAME,
    OID_GEN_STATISTICS,
    OID_GEN_LINK_STATE,
    OID_GEN_LINK_SPEED,
];

// NDIS_STATISTICS_INFO: 4-byte object header, SupportedStatistics, then u64 counters
const STATISTICS_IN_OCTETS: usize = 8 + 2 * 8;
const STATISTICS_OUT_OCTETS: usize = 8 + 6 * 8;
// NDIS_LINK_STATE: header, MediaConnectState
const LINK_STATE_CONNECT: usize = 4;
const MEDIA_CONNECT_STATE_CONNECTED: u32 = 1;

// HardwareInterface bit of InterfaceAndOperStatusFlags
const IF_FLAG_HARDWARE_INTERFACE: u8 = 0x01;

#[derive(Default)]
pub struct NetworkSource;

impl NetworkSource {
    fn open(id: &NetAdapterId) -> Result<DeviceHandle, DeviceError> {
        if id.guid.is_empty() {
            return Err(DeviceError::unavailable(id.to_string(), "no interface GUID"));
        }
        DeviceHandle::open(&format!(r"\\.\{}", id.guid), GENERIC_READ_ACCESS)
            .map_err(|e| DeviceError::query(id.to_string(), e))
    }

    fn query_oid(handle: &DeviceHandle, oid: u32, output: &mut [u8]) -> io::Result<usize> {
        handle.ioctl(IOCTL_NDIS_QUERY_GLOBAL_STATS, Some(&oid.to_ne_bytes()), output)
    }
}

impl CounterSource<Network> for NetworkSource {
    fn probe(&self, id: &NetAdapterId) -> Result<bool, DeviceError> {
        let handle = Self::open(id)?;
        let mut buffer = vec![0u8; 2048];
        let len = Self::query_oid(&handle, OID_GEN_SUPPORTED_LIST, &mut buffer)
            .map_err(|e| DeviceError::query(id.to_string(), e))?;

        let supported: Vec<u32> = buffer[..len]
            .chunks_exact(4)
            .filter_map(|c| c.try_into().ok().map(u32::from_ne_bytes))
            .collect();
        Ok(REQUIRED_OIDS.iter().all(|oid| supported.contains(oid)))
    }

    fn query_primary(&self, id: &NetAdapterId) -> Result<NetworkCounters, DeviceError> {
        let err = |e: io::Error| DeviceError::query(id.to_string(), e);
        let handle = Self::open(id)?;

        let mut stats = vec![0u8; 256];
        let len = Self::query_oid(&handle, OID_GEN_STATISTICS, &mut stats).map_err(err)?;
        let stats = &stats[..len];
        let (Some(bytes_received), Some(bytes_sent)) = (
            read_u64(stats, STATISTICS_IN_OCTETS),
            read_u64(stats, STATISTICS_OUT_OCTETS),
        ) else {
            return Err(DeviceError::unavailable(id.to_string(), "short statistics buffer"));
        };

        let mut speed = [0u8; 4];
        Self::query_oid(&handle, OID_GEN_LINK_SPEED, &mut speed).map_err(err)?;
        // Reported in units of 100 bit/s
        let link_speed = u32::from_ne_bytes(speed) as u64 * 100;

        let mut state = [0u8; 64];
        let link_up = Self::query_oid(&handle, OID_GEN_LINK_STATE, &mut state)
            .ok()
            .and_then(|len| read_u32(&state[..len], LINK_STATE_CONNECT))
            .is_some_and(|s| s == MEDIA_CONNECT_STATE_CONNECTED);

        let mut name_buf = vec![0u8; 512];
        let name = Self::query_oid(&handle, OID_GEN_FRIENDLY_NAME, &mut name_buf)
            .ok()
            .map(|len| {
                let wide: Vec<u16> = name_buf[..len]
                    .chunks_exact(2)
                    .map(|c| u16::from_ne_bytes([c[0], c[1]]))
                    .collect();
                from_wide(&wide)
            })
            .filter(|n| !n.is_empty());

        Ok(NetworkCounters {
            bytes_received,
            bytes_sent,
            link_speed,
            link_up,
            name,
        })
    }

    fn query_fallback(&self, id: &NetAdapterId) -> Result<NetworkCounters, DeviceError> {
        let mut row = MIB_IF_ROW2::default();
        row.InterfaceLuid.Value = id.luid;
        row.InterfaceIndex = id.if_index;

        let status = unsafe { GetIfEntry2(&mut row) };
        if status != WIN32_ERROR(0) {
            return Err(DeviceError::query(
                id.to_string(),
                io::Error::from_raw_os_error(status.0 as i32),
            ));
        }

        let alias = from_wide(&row.Alias);
        Ok(NetworkCounters {
            bytes_received: row.InOctets,
            bytes_sent: row.OutOctets,
            link_speed: row.TransmitLinkSpeed,
            link_up: row.OperStatus == IfOperStatusUp,
            name: (!alias.is_empty()).then_some(alias),
        })
    }
}

/// Interfaces from the IP helper table. Loopback is always skipped; software
/// interfaces only when `include_hidden` is set.
pub fn enumerate(include_hidden: bool) -> Vec<DeviceCandidate<NetAdapterId>> {
    let mut candidates = Vec::new();

    unsafe {
        let mut table: *mut MIB_IF_TABLE2 = std::ptr::null_mut();
        if GetIfTable2(&mut table) != WIN32_ERROR(0) || table.is_null() {
            return candidates;
        }

        let num_entries = (*table).NumEntries as usize;
        let entries = std::slice::from_raw_parts((*table).Table.as_ptr(), num_entries);

        for entry in entries {
            if entry.Type == IF_TYPE_SOFTWARE_LOOPBACK {
                continue;
            }
            let hardware =
                entry.InterfaceAndOperStatusFlags._bitfield & IF_FLAG_HARDWARE_INTERFACE != 0;
            if !hardware && !include_hidden {
                continue;
            }

            candidates.push(DeviceCandidate {
                id: NetAdapterId::new(
                    entry.InterfaceIndex,
                    entry.InterfaceLuid.Value,
                    guid_string(&entry.InterfaceGuid),
                ),
                description: Some(from_wide(&entry.Description)).filter(|d| !d.is_empty()),
                present: entry.OperStatus == IfOperStatusUp,
            });
        }

        FreeMibTable(table as *const _);
    }

    candidates
}
