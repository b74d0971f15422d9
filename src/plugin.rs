//! Plugin context: the four device registries, their pollers and the
//! settings they were built from.

use std::sync::Arc;

use crate::config::Settings;
use crate::device::{DevicePath, Disk, Gpu, Network, Rapl};
use crate::poll::{CounterSource, Poller, PollerOptions, TickSummary};
use crate::registry::{DeviceRegistry, LoadReport};

/// Counter sources, one per device kind
pub struct Sources {
    pub network: Arc<dyn CounterSource<Network>>,
    pub disk: Arc<dyn CounterSource<Disk>>,
    pub gpu: Arc<dyn CounterSource<Gpu>>,
    pub rapl: Arc<dyn CounterSource<Rapl>>,
}

/// One value per device kind
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PerKind<T> {
    pub gpu: T,
    pub disk: T,
    pub network: T,
    pub rapl: T,
}

pub struct PluginContext {
    settings: Settings,
    network: Arc<DeviceRegistry<Network>>,
    disks: Arc<DeviceRegistry<Disk>>,
    gpus: Arc<DeviceRegistry<Gpu>>,
    rapl: Arc<DeviceRegistry<Rapl>>,
    network_poller: Poller<Network>,
    disk_poller: Poller<Disk>,
    gpu_poller: Poller<Gpu>,
    rapl_poller: Poller<Rapl>,
}

fn network_options(settings: &Settings) -> PollerOptions {
    PollerOptions {
        primary_enabled: settings.enable_ndis,
        query_timeout: settings.query_timeout(),
    }
}

fn default_options(settings: &Settings) -> PollerOptions {
    PollerOptions {
        primary_enabled: true,
        query_timeout: settings.query_timeout(),
    }
}

impl PluginContext {
    /// Build empty registries sized from `settings`. Call [`load`](Self::load)
    /// to restore the persisted selections.
    pub fn new(settings: Settings, sources: Sources) -> Self {
        let settings = settings.sanitized();
        let sample_count = settings.sample_count;

        Self {
            network: Arc::new(DeviceRegistry::new(sample_count)),
            disks: Arc::new(DeviceRegistry::new(sample_count)),
            gpus: Arc::new(DeviceRegistry::new(sample_count)),
            rapl: Arc::new(DeviceRegistry::new(sample_count)),
            network_poller: Poller::new(sources.network, network_options(&settings)),
            disk_poller: Poller::new(sources.disk, default_options(&settings)),
            gpu_poller: Poller::new(sources.gpu, default_options(&settings)),
            rapl_poller: Poller::new(sources.rapl, default_options(&settings)),
            settings,
        }
    }

    /// Restore every registry from its settings list
    pub fn load(&self) -> PerKind<LoadReport> {
        let report = PerKind {
            gpu: self.gpus.load(&self.settings.gpu_list),
            disk: self.disks.load(&self.settings.disk_list),
            network: self.network.load(&self.settings.network_list),
            rapl: self.rapl.load(&self.settings.rapl_list),
        };
        log::info!(
            "Loaded {} network, {} disk, {} GPU and {} RAPL devices",
            report.network.selected,
            report.disk.selected,
            report.gpu.selected,
            report.rapl.selected
        );
        report
    }

    /// Poll every kind once
    pub fn tick(&mut self) -> PerKind<TickSummary> {
        PerKind {
            gpu: self.gpu_poller.tick(&self.gpus),
            disk: self.disk_poller.tick(&self.disks),
            network: self.network_poller.tick(&self.network),
            rapl: self.rapl_poller.tick(&self.rapl),
        }
    }

    /// Write the current selections into `settings`
    pub fn save(&self, settings: &mut Settings) {
        settings.network_list = self.network.save();
        settings.disk_list = self.disks.save();
        settings.gpu_list = self.gpus.save();
        settings.rapl_list = self.rapl.save();
    }

    /// Pick up changed toggles. Registries and their history are untouched;
    /// a new sample count only applies to a fresh context.
    pub fn apply_settings(&mut self, settings: &Settings) {
        if settings.enable_ndis != self.settings.enable_ndis {
            log::info!("NDIS queries {}", if settings.enable_ndis { "enabled" } else { "disabled" });
        }
        self.network_poller.set_options(network_options(settings));
        self.disk_poller.set_options(default_options(settings));
        self.gpu_poller.set_options(default_options(settings));
        self.rapl_poller.set_options(default_options(settings));

        let sample_count = self.settings.sample_count;
        self.settings = settings.clone().sanitized();
        self.settings.sample_count = sample_count;
    }

    /// Drop disk entries that are neither selected nor currently enumerable.
    /// Called when volumes arrive or go away, since disk paths can be reused.
    pub fn prune_disks(&self, present: &[DevicePath]) -> usize {
        let removed = self
            .disks
            .unregister_where(|entry| !entry.is_user_selected() && !present.contains(entry.id()));
        if removed > 0 {
            log::info!("Pruned {} stale disk entries", removed);
        }
        removed
    }

    /// Tear down. Handles still held elsewhere stay valid but are no longer polled.
    pub fn unload(self) {
        self.network.unregister_where(|_| true);
        self.disks.unregister_where(|_| true);
        self.gpus.unregister_where(|_| true);
        self.rapl.unregister_where(|_| true);
        log::info!("Plugin unloaded");
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn network(&self) -> &Arc<DeviceRegistry<Network>> {
        &self.network
    }

    pub fn disks(&self) -> &Arc<DeviceRegistry<Disk>> {
        &self.disks
    }

    pub fn gpus(&self) -> &Arc<DeviceRegistry<Gpu>> {
        &self.gpus
    }

    pub fn rapl(&self) -> &Arc<DeviceRegistry<Rapl>> {
        &self.rapl
    }

    /// Ticks completed so far
    pub fn tick_count(&self) -> u64 {
        self.network_poller.tick_count()
    }
}
