//! Hardware device monitoring: network adapters, disk drives, GPUs and RAPL
//! energy meters sampled on a host-driven tick into fixed-size histories.

pub mod config;
pub mod device;
pub mod error;
pub mod plugin;
pub mod poll;
pub mod registry;
pub mod sampling;
pub mod system;
pub mod units;

mod sync;

pub use config::Settings;
pub use device::{DeviceEntry, DeviceKind, SupportState};
pub use error::{DeviceError, RegistryError, SettingsError};
pub use plugin::{PerKind, PluginContext, Sources};
pub use poll::{CounterSource, Poller, PollerOptions, TickSummary};
pub use registry::{DeviceRegistry, LoadReport};
