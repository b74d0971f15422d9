use super::{DeviceKind, DevicePath};
use crate::sampling::{CircularBuffer, DeltaTracker};

/// Picowatt-hours per 100ns tick to watts: 3600 s/h * 1e7 ticks/s / 1e12 pW/W
const PWH_PER_TICK_TO_WATTS: f64 = 0.036;

/// Energy-meter channels the RAPL interface exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RaplChannel {
    Package,
    Core,
    Graphics,
    Dram,
}

impl RaplChannel {
    pub const ALL: [RaplChannel; 4] = [
        RaplChannel::Package,
        RaplChannel::Core,
        RaplChannel::Graphics,
        RaplChannel::Dram,
    ];

    /// Channel name as reported by the energy meter
    pub fn meter_name(self) -> &'static str {
        match self {
            RaplChannel::Package => "RAPL_Package0_PKG",
            RaplChannel::Core => "RAPL_Package0_PP0",
            RaplChannel::Graphics => "RAPL_Package0_PP1",
            RaplChannel::Dram => "RAPL_Package0_DRAM",
        }
    }

    pub fn from_meter_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.meter_name() == name)
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// One channel reading: absolute energy (picowatt-hours) at an absolute time (100ns)
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChannelMeasurement {
    pub energy: u64,
    pub time: u64,
}

#[derive(Debug, Default, Clone)]
pub struct RaplCounters {
    pub channels: [Option<ChannelMeasurement>; 4],
}

impl RaplCounters {
    pub fn set(&mut self, channel: RaplChannel, energy: u64, time: u64) {
        self.channels[channel.index()] = Some(ChannelMeasurement { energy, time });
    }

    pub fn get(&self, channel: RaplChannel) -> Option<ChannelMeasurement> {
        self.channels[channel.index()]
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct ChannelTrackers {
    energy: DeltaTracker,
    time: DeltaTracker,
}

impl ChannelTrackers {
    fn watts(&self) -> f32 {
        let time = self.time.delta();
        if time == 0 {
            return 0.0;
        }
        (self.energy.delta() as f64 / time as f64 * PWH_PER_TICK_TO_WATTS) as f32
    }
}

#[derive(Debug, Clone)]
pub struct RaplSamples {
    trackers: [ChannelTrackers; 4],
    pub package_power: f32,
    pub core_power: f32,
    pub graphics_power: f32,
    pub dram_power: f32,
    /// Package power not accounted for by cores or graphics (uncore)
    pub component_power: f32,
    pub total_power: f32,
    pub package_history: CircularBuffer<f32>,
    pub core_history: CircularBuffer<f32>,
    pub dram_history: CircularBuffer<f32>,
    pub total_history: CircularBuffer<f32>,
}

impl RaplSamples {
    pub fn power(&self, channel: RaplChannel) -> f32 {
        match channel {
            RaplChannel::Package => self.package_power,
            RaplChannel::Core => self.core_power,
            RaplChannel::Graphics => self.graphics_power,
            RaplChannel::Dram => self.dram_power,
        }
    }
}

/// RAPL energy meters
pub struct Rapl;

impl DeviceKind for Rapl {
    type Id = DevicePath;
    type Counters = RaplCounters;
    type Samples = RaplSamples;

    const NAME: &'static str = "rapl";
    const SETTING: &'static str = "rapl_list";

    fn new_samples(sample_count: usize) -> RaplSamples {
        RaplSamples {
            trackers: [ChannelTrackers::default(); 4],
            package_power: 0.0,
            core_power: 0.0,
            graphics_power: 0.0,
            dram_power: 0.0,
            component_power: 0.0,
            total_power: 0.0,
            package_history: CircularBuffer::new(sample_count),
            core_history: CircularBuffer::new(sample_count),
            dram_history: CircularBuffer::new(sample_count),
            total_history: CircularBuffer::new(sample_count),
        }
    }

    fn update(samples: &mut RaplSamples, counters: &RaplCounters) {
        for channel in RaplChannel::ALL {
            let trackers = &mut samples.trackers[channel.index()];
            match counters.get(channel) {
                Some(m) => {
                    trackers.energy.update(m.energy);
                    trackers.time.update(m.time);
                }
                None => {
                    trackers.energy.clear_delta();
                    trackers.time.clear_delta();
                }
            }
        }

        samples.package_power = samples.trackers[RaplChannel::Package.index()].watts();
        samples.core_power = samples.trackers[RaplChannel::Core.index()].watts();
        samples.graphics_power = samples.trackers[RaplChannel::Graphics.index()].watts();
        samples.dram_power = samples.trackers[RaplChannel::Dram.index()].watts();

        samples.component_power =
            (samples.package_power - samples.core_power - samples.graphics_power).max(0.0);
        samples.total_power = samples.package_power + samples.dram_power;
    }

    fn push_history(samples: &mut RaplSamples) {
        samples.package_history.push(samples.package_power);
        samples.core_history.push(samples.core_power);
        samples.dram_history.push(samples.dram_power);
        samples.total_history.push(samples.total_power);
    }

    fn clear_rates(samples: &mut RaplSamples) {
        for trackers in &mut samples.trackers {
            trackers.energy.clear_delta();
            trackers.time.clear_delta();
        }
        samples.package_power = 0.0;
        samples.core_power = 0.0;
        samples.graphics_power = 0.0;
        samples.dram_power = 0.0;
        samples.component_power = 0.0;
        samples.total_power = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 10W over one second: 10 / 0.036 pWh per tick * 1e7 ticks
    const ONE_SECOND: u64 = 10_000_000;

    fn reading(time: u64, package: u64, core: u64, graphics: u64, dram: u64) -> RaplCounters {
        let mut counters = RaplCounters::default();
        counters.set(RaplChannel::Package, package, time);
        counters.set(RaplChannel::Core, core, time);
        counters.set(RaplChannel::Graphics, graphics, time);
        counters.set(RaplChannel::Dram, dram, time);
        counters
    }

    fn pwh_for_watts(watts: f64) -> u64 {
        (watts / PWH_PER_TICK_TO_WATTS * ONE_SECOND as f64) as u64
    }

    #[test]
    fn test_channel_names() {
        assert_eq!(
            RaplChannel::from_meter_name("RAPL_Package0_DRAM"),
            Some(RaplChannel::Dram)
        );
        assert_eq!(RaplChannel::from_meter_name("RAPL_Package1_PKG"), None);
    }

    #[test]
    fn test_watts_and_derived_power() {
        let mut samples = Rapl::new_samples(8);
        Rapl::update(&mut samples, &reading(0, 0, 0, 0, 0));
        assert_eq!(samples.package_power, 0.0);

        let counters = reading(
            ONE_SECOND,
            pwh_for_watts(20.0),
            pwh_for_watts(12.0),
            pwh_for_watts(3.0),
            pwh_for_watts(2.0),
        );
        Rapl::update(&mut samples, &counters);

        assert!((samples.package_power - 20.0).abs() < 0.01);
        assert!((samples.core_power - 12.0).abs() < 0.01);
        assert!((samples.component_power - 5.0).abs() < 0.01);
        assert!((samples.total_power - 22.0).abs() < 0.01);
    }

    #[test]
    fn test_component_power_floors_at_zero() {
        let mut samples = Rapl::new_samples(8);
        Rapl::update(&mut samples, &reading(0, 0, 0, 0, 0));
        Rapl::update(
            &mut samples,
            &reading(ONE_SECOND, pwh_for_watts(5.0), pwh_for_watts(6.0), 0, 0),
        );
        assert_eq!(samples.component_power, 0.0);
    }

    #[test]
    fn test_history_and_clear() {
        let mut samples = Rapl::new_samples(8);
        Rapl::update(&mut samples, &reading(0, 0, 0, 0, 0));
        Rapl::update(&mut samples, &reading(ONE_SECOND, pwh_for_watts(10.0), 0, 0, 0));
        Rapl::push_history(&mut samples);
        assert_eq!(samples.total_history.count(), 1);

        Rapl::clear_rates(&mut samples);
        assert_eq!(samples.power(RaplChannel::Package), 0.0);
        assert_eq!(samples.total_power, 0.0);
        assert_eq!(samples.package_history.count(), 1);
    }
}
