use super::{DeviceKind, DevicePath};
use crate::sampling::{CircularBuffer, DeltaTracker};

/// Raw disk performance counters. Times are in 100ns ticks.
#[derive(Debug, Default, Clone)]
pub struct DiskCounters {
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub read_time: u64,
    pub write_time: u64,
    pub idle_time: u64,
    pub read_count: u32,
    pub write_count: u32,
    pub queue_depth: u32,
    pub split_count: u32,
    pub query_time: u64,
}

#[derive(Debug, Clone)]
pub struct DiskSamples {
    pub bytes_read: DeltaTracker,
    pub bytes_written: DeltaTracker,
    pub read_time: DeltaTracker,
    pub write_time: DeltaTracker,
    pub idle_time: DeltaTracker,
    pub read_count: DeltaTracker,
    pub write_count: DeltaTracker,
    pub query_time: DeltaTracker,
    pub read_history: CircularBuffer<u64>,
    pub write_history: CircularBuffer<u64>,
    /// Average time per I/O during the last interval, in 100ns ticks
    pub response_time: f32,
    /// Percentage of the last interval the disk was busy
    pub active_time: f32,
    pub queue_depth: u32,
    pub split_count: u32,
}

impl DiskSamples {
    pub fn read_rate(&self) -> u64 {
        self.bytes_read.delta()
    }

    pub fn write_rate(&self) -> u64 {
        self.bytes_written.delta()
    }

    /// Reads plus writes completed during the last interval
    pub fn io_count(&self) -> u64 {
        self.read_count.delta() + self.write_count.delta()
    }

    /// Response time in milliseconds
    pub fn response_time_ms(&self) -> f32 {
        self.response_time / 10_000.0
    }
}

/// Disk drives
pub struct Disk;

impl DeviceKind for Disk {
    type Id = DevicePath;
    type Counters = DiskCounters;
    type Samples = DiskSamples;

    const NAME: &'static str = "disk";
    const SETTING: &'static str = "disk_list";

    fn new_samples(sample_count: usize) -> DiskSamples {
        DiskSamples {
            bytes_read: DeltaTracker::new(),
            bytes_written: DeltaTracker::new(),
            read_time: DeltaTracker::new(),
            write_time: DeltaTracker::new(),
            idle_time: DeltaTracker::new(),
            read_count: DeltaTracker::new(),
            write_count: DeltaTracker::new(),
            query_time: DeltaTracker::new(),
            read_history: CircularBuffer::new(sample_count),
            write_history: CircularBuffer::new(sample_count),
            response_time: 0.0,
            active_time: 0.0,
            queue_depth: 0,
            split_count: 0,
        }
    }

    fn update(samples: &mut DiskSamples, counters: &DiskCounters) {
        samples.bytes_read.update(counters.bytes_read);
        samples.bytes_written.update(counters.bytes_written);
        samples.read_time.update(counters.read_time);
        samples.write_time.update(counters.write_time);
        samples.idle_time.update(counters.idle_time);
        samples.read_count.update(counters.read_count as u64);
        samples.write_count.update(counters.write_count as u64);
        samples.query_time.update(counters.query_time);

        let io_count = samples.io_count();
        samples.response_time = if io_count != 0 {
            (samples.read_time.delta() + samples.write_time.delta()) as f32 / io_count as f32
        } else {
            0.0
        };

        let query_time = samples.query_time.delta();
        samples.active_time = if query_time != 0 {
            let busy = query_time.saturating_sub(samples.idle_time.delta());
            (busy as f32 / query_time as f32 * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        };

        samples.queue_depth = counters.queue_depth;
        samples.split_count = counters.split_count;
    }

    fn push_history(samples: &mut DiskSamples) {
        samples.read_history.push(samples.bytes_read.delta());
        samples.write_history.push(samples.bytes_written.delta());
    }

    fn clear_rates(samples: &mut DiskSamples) {
        samples.bytes_read.clear_delta();
        samples.bytes_written.clear_delta();
        samples.read_time.clear_delta();
        samples.write_time.clear_delta();
        samples.idle_time.clear_delta();
        samples.read_count.clear_delta();
        samples.write_count.clear_delta();
        samples.query_time.clear_delta();
        samples.response_time = 0.0;
        samples.active_time = 0.0;
        samples.queue_depth = 0;
        samples.split_count = 0;
    }
}
