//! GPU statistics via the D3DKMT kernel thunks

use std::ffi::c_void;
use std::io;
use std::time::{SystemTime, UNIX_EPOCH};

use windows::Wdk::Graphics::Direct3D::{
    D3DKMT_ADAPTER_PERFDATA, D3DKMT_CLOSEADAPTER, D3DKMT_OPENADAPTERFROMDEVICENAME,
    D3DKMT_QUERYADAPTERINFO, D3DKMT_QUERYSTATISTICS, D3DKMT_QUERYSTATISTICS_ADAPTER,
    D3DKMT_QUERYSTATISTICS_NODE, D3DKMT_QUERYSTATISTICS_SEGMENT, D3DKMTCloseAdapter,
    D3DKMTOpenAdapterFromDeviceName, D3DKMTQueryAdapterInfo, D3DKMTQueryStatistics,
    KMTQAITYPE_ADAPTERPERFDATA,
};
use windows::Win32::Foundation::{LUID, NTSTATUS};
use windows::core::{GUID, PCWSTR};

use super::DeviceCandidate;
use super::native::{describe_interfaces, device_interfaces, to_wide};
use crate::device::{DevicePath, Gpu, GpuCounters};
use crate::error::DeviceError;
use crate::poll::CounterSource;

const GUID_DISPLAY_DEVICE_ARRIVAL: GUID = GUID::from_u128(0x1ca05180_a699_450a_9a0c_de4fbe3ddd89);

fn nt_error(status: NTSTATUS) -> io::Error {
    io::Error::other(format!("NTSTATUS {:#010x}", status.0 as u32))
}

/// Open adapter, closed on drop
struct Adapter {
    handle: u32,
    luid: LUID,
}

impl Adapter {
    fn open(path: &str) -> io::Result<Self> {
        let wide = to_wide(path);
        let mut open = D3DKMT_OPENADAPTERFROMDEVICENAME {
            pDeviceName: PCWSTR(wide.as_ptr()),
            ..Default::default()
        };
        let status = unsafe { D3DKMTOpenAdapterFromDeviceName(&mut open) };
        if status.is_err() {
            return Err(nt_error(status));
        }
        Ok(Self {
            handle: open.hAdapter,
            luid: open.AdapterLuid,
        })
    }

    fn statistics(&self, query: &mut D3DKMT_QUERYSTATISTICS) -> io::Result<()> {
        query.AdapterLuid = self.luid;
        let status = unsafe { D3DKMTQueryStatistics(query) };
        if status.is_err() {
            return Err(nt_error(status));
        }
        Ok(())
    }

    /// (segment count, node count)
    fn topology(&self) -> io::Result<(u32, u32)> {
        let mut query = D3DKMT_QUERYSTATISTICS {
            Type: D3DKMT_QUERYSTATISTICS_ADAPTER,
            ..Default::default()
        };
        self.statistics(&mut query)?;
        let info = unsafe { query.QueryResult.AdapterInformation };
        Ok((info.NbSegments, info.NodeCount))
    }

    fn node_running_time(&self, node: u32) -> io::Result<u64> {
        let mut query = D3DKMT_QUERYSTATISTICS {
            Type: D3DKMT_QUERYSTATISTICS_NODE,
            ..Default::default()
        };
        query.Anonymous.QueryNode.NodeId = node;
        self.statistics(&mut query)?;
        let running = unsafe { query.QueryResult.NodeInformation.GlobalInformation.RunningTime };
        Ok(running.max(0) as u64)
    }

    fn segments(&self, count: u32, counters: &mut GpuCounters) -> io::Result<()> {
        for segment in 0..count {
            let mut query = D3DKMT_QUERYSTATISTICS {
                Type: D3DKMT_QUERYSTATISTICS_SEGMENT,
                ..Default::default()
            };
            query.Anonymous.QuerySegment.SegmentId = segment;
            self.statistics(&mut query)?;

            let info = unsafe { query.QueryResult.SegmentInformation };
            // Aperture segments live in system memory
            if info.Aperture != 0 {
                counters.shared_limit += info.CommitLimit;
                counters.shared_usage += info.BytesResident;
            } else {
                counters.dedicated_limit += info.CommitLimit;
                counters.dedicated_usage += info.BytesResident;
            }
            counters.commit_limit += info.CommitLimit;
            counters.commit_usage += info.BytesCommitted;
        }
        Ok(())
    }

    /// Driver-reported power, temperature and fan; most drivers report none
    fn perf_data(&self, counters: &mut GpuCounters) {
        let mut perf = D3DKMT_ADAPTER_PERFDATA::default();
        let query = D3DKMT_QUERYADAPTERINFO {
            hAdapter: self.handle,
            Type: KMTQAITYPE_ADAPTERPERFDATA,
            pPrivateDriverData: &mut perf as *mut _ as *mut c_void,
            PrivateDriverDataSize: size_of::<D3DKMT_ADAPTER_PERFDATA>() as u32,
        };
        if unsafe { D3DKMTQueryAdapterInfo(&query) }.is_err() {
            return;
        }
        // Power and temperature come in tenths
        counters.power_usage = Some(perf.Power as f32 / 10.0);
        counters.temperature = Some(perf.Temperature as f32 / 10.0);
        counters.fan_rpm = Some(perf.FanRPM);
    }
}

impl Drop for Adapter {
    fn drop(&mut self) {
        let close = D3DKMT_CLOSEADAPTER {
            hAdapter: self.handle,
        };
        unsafe {
            let _ = D3DKMTCloseAdapter(&close);
        }
    }
}

/// Current time in 100ns ticks
fn clock_ticks() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| (d.as_nanos() / 100) as u64)
        .unwrap_or(0)
}

#[derive(Default)]
pub struct GpuSource;

impl CounterSource<Gpu> for GpuSource {
    fn query_primary(&self, id: &DevicePath) -> Result<GpuCounters, DeviceError> {
        let err = |e: io::Error| DeviceError::query(id.to_string(), e);
        let adapter = Adapter::open(id.as_str()).map_err(err)?;
        let (segment_count, node_count) = adapter.topology().map_err(err)?;

        let mut counters = GpuCounters {
            system_time: clock_ticks(),
            ..Default::default()
        };
        counters.node_running_times = (0..node_count)
            .map(|node| adapter.node_running_time(node))
            .collect::<io::Result<Vec<_>>>()
            .map_err(err)?;
        adapter.segments(segment_count, &mut counters).map_err(err)?;
        adapter.perf_data(&mut counters);

        Ok(counters)
    }
}

pub fn enumerate() -> Vec<DeviceCandidate<DevicePath>> {
    describe_interfaces(device_interfaces(&GUID_DISPLAY_DEVICE_ARRIVAL))
        .into_iter()
        .map(|(path, description)| DeviceCandidate {
            id: DevicePath::new(path),
            description,
            present: true,
        })
        .collect()
}
