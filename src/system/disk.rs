//! Disk performance counters via IOCTL_DISK_PERFORMANCE

use windows::core::GUID;

use super::DeviceCandidate;
use super::native::{DeviceHandle, QUERY_ACCESS, describe_interfaces, device_interfaces};
use crate::device::{DevicePath, Disk, DiskCounters};
use crate::error::DeviceError;
use crate::poll::CounterSource;

const IOCTL_DISK_PERFORMANCE: u32 = 0x0007_0020;

const GUID_DEVINTERFACE_DISK: GUID = GUID::from_u128(0x53f56307_b6bf_11d0_94f2_00a0c91efb8b);

#[repr(C)]
#[derive(Clone, Copy)]
#[allow(non_snake_case)]
struct DISK_PERFORMANCE {
    BytesRead: i64,
    BytesWritten: i64,
    ReadTime: i64,
    WriteTime: i64,
    IdleTime: i64,
    ReadCount: u32,
    WriteCount: u32,
    QueueDepth: u32,
    SplitCount: u32,
    QueryTime: i64,
    StorageDeviceNumber: u32,
    StorageManagerName: [u16; 8],
}

#[derive(Default)]
pub struct DiskSource;

impl CounterSource<Disk> for DiskSource {
    fn query_primary(&self, id: &DevicePath) -> Result<DiskCounters, DeviceError> {
        let handle = DeviceHandle::open(id.as_str(), QUERY_ACCESS)
            .map_err(|e| DeviceError::query(id.to_string(), e))?;
        let perf: DISK_PERFORMANCE = handle
            .ioctl_struct(IOCTL_DISK_PERFORMANCE, None)
            .map_err(|e| DeviceError::query(id.to_string(), e))?;

        Ok(DiskCounters {
            bytes_read: perf.BytesRead as u64,
            bytes_written: perf.BytesWritten as u64,
            read_time: perf.ReadTime as u64,
            write_time: perf.WriteTime as u64,
            idle_time: perf.IdleTime as u64,
            read_count: perf.ReadCount,
            write_count: perf.WriteCount,
            queue_depth: perf.QueueDepth,
            split_count: perf.SplitCount,
            query_time: perf.QueryTime as u64,
        })
    }
}

pub fn enumerate() -> Vec<DeviceCandidate<DevicePath>> {
    describe_interfaces(device_interfaces(&GUID_DEVINTERFACE_DISK))
        .into_iter()
        .map(|(path, description)| DeviceCandidate {
            id: DevicePath::new(path),
            description,
            present: true,
        })
        .collect()
}
