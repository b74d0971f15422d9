//! Platform counter sources and device enumeration.
//!
//! The real backends are Windows-only. Elsewhere every source reports the
//! primary method unsupported and every query fails, so devices read as
//! absent and enumeration comes back empty.

#[cfg(windows)]
mod disk;
#[cfg_attr(not(windows), allow(dead_code))]
mod emi;
#[cfg(windows)]
mod gpu;
#[cfg(windows)]
mod native;
#[cfg(windows)]
mod network;
#[cfg(windows)]
mod rapl;

use std::sync::Arc;

use crate::device::{DevicePath, NetAdapterId};
use crate::plugin::Sources;

/// A device the OS currently knows about, offered to the user for selection
#[derive(Debug, Clone)]
pub struct DeviceCandidate<I> {
    pub id: I,
    pub description: Option<String>,
    /// Connected (network) or present in the device tree
    pub present: bool,
}

/// Counter sources for the running platform
#[cfg(windows)]
pub fn platform_sources() -> Sources {
    Sources {
        network: Arc::new(network::NetworkSource),
        disk: Arc::new(disk::DiskSource),
        gpu: Arc::new(gpu::GpuSource),
        rapl: Arc::new(rapl::RaplSource::default()),
    }
}

#[cfg(not(windows))]
pub fn platform_sources() -> Sources {
    Sources {
        network: Arc::new(fallback::UnsupportedPlatform),
        disk: Arc::new(fallback::UnsupportedPlatform),
        gpu: Arc::new(fallback::UnsupportedPlatform),
        rapl: Arc::new(fallback::UnsupportedPlatform),
    }
}

#[cfg(windows)]
pub fn enumerate_network_adapters(include_hidden: bool) -> Vec<DeviceCandidate<NetAdapterId>> {
    network::enumerate(include_hidden)
}

#[cfg(not(windows))]
pub fn enumerate_network_adapters(_include_hidden: bool) -> Vec<DeviceCandidate<NetAdapterId>> {
    Vec::new()
}

#[cfg(windows)]
pub fn enumerate_disks() -> Vec<DeviceCandidate<DevicePath>> {
    disk::enumerate()
}

#[cfg(not(windows))]
pub fn enumerate_disks() -> Vec<DeviceCandidate<DevicePath>> {
    Vec::new()
}

#[cfg(windows)]
pub fn enumerate_gpus() -> Vec<DeviceCandidate<DevicePath>> {
    gpu::enumerate()
}

#[cfg(not(windows))]
pub fn enumerate_gpus() -> Vec<DeviceCandidate<DevicePath>> {
    Vec::new()
}

#[cfg(windows)]
pub fn enumerate_rapl() -> Vec<DeviceCandidate<DevicePath>> {
    rapl::enumerate()
}

#[cfg(not(windows))]
pub fn enumerate_rapl() -> Vec<DeviceCandidate<DevicePath>> {
    Vec::new()
}

#[cfg(not(windows))]
mod fallback {
    use crate::device::DeviceKind;
    use crate::error::DeviceError;
    use crate::poll::CounterSource;

    pub struct UnsupportedPlatform;

    impl<K: DeviceKind> CounterSource<K> for UnsupportedPlatform {
        fn probe(&self, _id: &K::Id) -> Result<bool, DeviceError> {
            Ok(false)
        }

        fn query_primary(&self, id: &K::Id) -> Result<K::Counters, DeviceError> {
            Err(DeviceError::unavailable(
                id.to_string(),
                "hardware counters are only available on Windows",
            ))
        }

        fn query_fallback(&self, id: &K::Id) -> Result<K::Counters, DeviceError> {
            <Self as CounterSource<K>>::query_primary(self, id)
        }
    }
}
