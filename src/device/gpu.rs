use super::{DeviceKind, DevicePath};
use crate::sampling::{CircularBuffer, DeltaTracker};

/// Statistics returned by one adapter query.
///
/// Running times and the clock are in 100ns ticks; memory figures in bytes.
#[derive(Debug, Default, Clone)]
pub struct GpuCounters {
    /// Cumulative running time of each engine node
    pub node_running_times: Vec<u64>,
    /// Timestamp of the query
    pub system_time: u64,
    pub dedicated_usage: u64,
    pub dedicated_limit: u64,
    pub shared_usage: u64,
    pub shared_limit: u64,
    pub commit_usage: u64,
    pub commit_limit: u64,
    /// Percent of the board power limit, when the driver reports it
    pub power_usage: Option<f32>,
    /// Degrees Celsius, when the driver reports it
    pub temperature: Option<f32>,
    pub fan_rpm: Option<u32>,
    pub name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GpuNode {
    pub running_time: DeltaTracker,
    pub history: CircularBuffer<f32>,
    /// Fraction of the last interval this engine was busy
    pub utilization: f32,
}

#[derive(Debug, Clone)]
pub struct GpuSamples {
    sample_count: usize,
    pub clock: DeltaTracker,
    pub nodes: Vec<GpuNode>,
    pub utilization: f32,
    pub utilization_history: CircularBuffer<f32>,
    pub dedicated_usage: u64,
    pub dedicated_limit: u64,
    pub shared_usage: u64,
    pub shared_limit: u64,
    pub commit_usage: u64,
    pub commit_limit: u64,
    pub dedicated_history: CircularBuffer<u64>,
    pub shared_history: CircularBuffer<u64>,
    pub commit_history: CircularBuffer<u64>,
    pub power_usage: f32,
    pub temperature: f32,
    pub fan_rpm: u32,
    pub power_history: CircularBuffer<f32>,
    pub temperature_history: CircularBuffer<f32>,
    pub fan_history: CircularBuffer<u32>,
}

impl GpuSamples {
    fn resize_nodes(&mut self, count: usize) {
        if self.nodes.len() == count {
            return;
        }
        log::debug!("GPU node count changed: {} -> {}", self.nodes.len(), count);
        self.nodes.clear();
        self.nodes.extend((0..count).map(|_| GpuNode {
            running_time: DeltaTracker::new(),
            history: CircularBuffer::new(self.sample_count),
            utilization: 0.0,
        }));
    }

    /// Number of engine nodes reported by the last query
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

/// Graphics adapters
pub struct Gpu;

impl DeviceKind for Gpu {
    type Id = DevicePath;
    type Counters = GpuCounters;
    type Samples = GpuSamples;

    const NAME: &'static str = "gpu";
    const SETTING: &'static str = "gpu_list";

    fn new_samples(sample_count: usize) -> GpuSamples {
        GpuSamples {
            sample_count,
            clock: DeltaTracker::new(),
            nodes: Vec::new(),
            utilization: 0.0,
            utilization_history: CircularBuffer::new(sample_count),
            dedicated_usage: 0,
            dedicated_limit: 0,
            shared_usage: 0,
            shared_limit: 0,
            commit_usage: 0,
            commit_limit: 0,
            dedicated_history: CircularBuffer::new(sample_count),
            shared_history: CircularBuffer::new(sample_count),
            commit_history: CircularBuffer::new(sample_count),
            power_usage: 0.0,
            temperature: 0.0,
            fan_rpm: 0,
            power_history: CircularBuffer::new(sample_count),
            temperature_history: CircularBuffer::new(sample_count),
            fan_history: CircularBuffer::new(sample_count),
        }
    }

    fn update(samples: &mut GpuSamples, counters: &GpuCounters) {
        samples.resize_nodes(counters.node_running_times.len());
        samples.clock.update(counters.system_time);
        let elapsed = samples.clock.delta();

        let mut utilization = 0.0f32;
        for (node, &running) in samples.nodes.iter_mut().zip(&counters.node_running_times) {
            node.running_time.update(running);
            node.utilization = if elapsed != 0 {
                (node.running_time.delta() as f64 / elapsed as f64).clamp(0.0, 1.0) as f32
            } else {
                0.0
            };
            utilization = utilization.max(node.utilization);
        }
        samples.utilization = utilization;

        samples.dedicated_usage = counters.dedicated_usage;
        samples.dedicated_limit = counters.dedicated_limit;
        samples.shared_usage = counters.shared_usage;
        samples.shared_limit = counters.shared_limit;
        samples.commit_usage = counters.commit_usage;
        samples.commit_limit = counters.commit_limit;
        samples.power_usage = counters.power_usage.unwrap_or(0.0);
        samples.temperature = counters.temperature.unwrap_or(0.0);
        samples.fan_rpm = counters.fan_rpm.unwrap_or(0);
    }

    fn push_history(samples: &mut GpuSamples) {
        for node in &mut samples.nodes {
            node.history.push(node.utilization);
        }
        samples.utilization_history.push(samples.utilization);
        samples.dedicated_history.push(samples.dedicated_usage);
        samples.shared_history.push(samples.shared_usage);
        samples.commit_history.push(samples.commit_usage);
        samples.power_history.push(samples.power_usage);
        samples.temperature_history.push(samples.temperature);
        samples.fan_history.push(samples.fan_rpm);
    }

    fn clear_rates(samples: &mut GpuSamples) {
        samples.clock.clear_delta();
        for node in &mut samples.nodes {
            node.running_time.clear_delta();
            node.utilization = 0.0;
        }
        samples.utilization = 0.0;
        samples.dedicated_usage = 0;
        samples.shared_usage = 0;
        samples.commit_usage = 0;
        samples.power_usage = 0.0;
        samples.temperature = 0.0;
        samples.fan_rpm = 0;
    }

    fn reported_name(counters: &GpuCounters) -> Option<String> {
        counters.name.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters(clock: u64, nodes: &[u64]) -> GpuCounters {
        GpuCounters {
            node_running_times: nodes.to_vec(),
            system_time: clock,
            dedicated_usage: 512 * 1024 * 1024,
            dedicated_limit: 8 * 1024 * 1024 * 1024,
            ..Default::default()
        }
    }

    #[test]
    fn test_utilization_is_busiest_node() {
        let mut samples = Gpu::new_samples(16);
        Gpu::update(&mut samples, &counters(1_000, &[0, 0, 0]));
        assert_eq!(samples.node_count(), 3);
        assert_eq!(samples.utilization, 0.0);

        Gpu::update(&mut samples, &counters(11_000, &[2_500, 7_500, 0]));
        assert!((samples.nodes[0].utilization - 0.25).abs() < 1e-6);
        assert!((samples.nodes[1].utilization - 0.75).abs() < 1e-6);
        assert!((samples.utilization - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_utilization_clamped() {
        let mut samples = Gpu::new_samples(4);
        Gpu::update(&mut samples, &counters(0, &[0]));
        // Running time advanced further than the clock
        Gpu::update(&mut samples, &counters(100, &[250]));
        assert_eq!(samples.utilization, 1.0);
    }

    #[test]
    fn test_node_set_resizes() {
        let mut samples = Gpu::new_samples(4);
        Gpu::update(&mut samples, &counters(0, &[0, 0]));
        Gpu::push_history(&mut samples);
        Gpu::update(&mut samples, &counters(100, &[10, 10, 10, 10]));
        assert_eq!(samples.node_count(), 4);
        // Fresh nodes have no baseline yet
        assert_eq!(samples.utilization, 0.0);
        assert!(samples.nodes.iter().all(|n| n.history.is_empty()));
    }

    #[test]
    fn test_history_and_clear() {
        let mut samples = Gpu::new_samples(4);
        Gpu::update(&mut samples, &counters(0, &[0]));
        Gpu::update(&mut samples, &counters(100, &[50]));
        Gpu::push_history(&mut samples);
        assert_eq!(samples.utilization_history.get(0), Some(0.5));
        assert_eq!(samples.dedicated_history.get(0), Some(512 * 1024 * 1024));

        Gpu::clear_rates(&mut samples);
        assert_eq!(samples.utilization, 0.0);
        assert_eq!(samples.utilization_history.count(), 1);
        assert_eq!(samples.nodes[0].history.get(0), Some(0.5));
    }
}
