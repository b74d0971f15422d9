//! Generic polling cycle.
//!
//! One [`Poller`] per device kind. A tick snapshots the registry, releases
//! the list lock, then queries every entry through its [`CounterSource`]
//! and folds the counters into the entry's samples.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use crate::device::{DeviceKind, SupportState};
use crate::error::DeviceError;
use crate::registry::{DeviceRegistry, EntryRef};

/// Where a device kind gets its raw counters from.
///
/// The primary method is the richer driver interface (NDIS, disk ioctl,
/// D3DKMT, EMI); the fallback is a generic OS interface where one exists.
pub trait CounterSource<K: DeviceKind>: Send + Sync {
    /// Whether the primary method works for this device. Called at most
    /// until it returns `Ok`; an `Err` leaves the decision for the next tick.
    fn probe(&self, _id: &K::Id) -> Result<bool, DeviceError> {
        Ok(true)
    }

    fn query_primary(&self, id: &K::Id) -> Result<K::Counters, DeviceError>;

    fn query_fallback(&self, id: &K::Id) -> Result<K::Counters, DeviceError> {
        Err(DeviceError::unavailable(
            id.to_string(),
            "no fallback query method",
        ))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PollerOptions {
    /// Use (and probe) the primary method; when false only the fallback runs
    pub primary_enabled: bool,
    /// Upper bound on one device's probe and query
    pub query_timeout: Option<Duration>,
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            primary_enabled: true,
            query_timeout: None,
        }
    }
}

/// Counts from one tick
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub polled: usize,
    pub present: usize,
    pub absent: usize,
    /// Entries unregistered between the snapshot and their turn
    pub skipped: usize,
}

pub struct Poller<K: DeviceKind> {
    source: Arc<dyn CounterSource<K>>,
    options: PollerOptions,
    tick_count: u64,
}

type Acquired<K> = (
    SupportState,
    Result<<K as DeviceKind>::Counters, DeviceError>,
);

impl<K: DeviceKind> Poller<K> {
    pub fn new(source: Arc<dyn CounterSource<K>>, options: PollerOptions) -> Self {
        Self {
            source,
            options,
            tick_count: 0,
        }
    }

    pub fn options(&self) -> PollerOptions {
        self.options
    }

    pub fn set_options(&mut self, options: PollerOptions) {
        self.options = options;
    }

    /// Completed ticks
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Poll every registered device once
    pub fn tick(&mut self, registry: &DeviceRegistry<K>) -> TickSummary {
        let mut summary = TickSummary::default();

        for entry in registry.snapshot() {
            self.poll_entry(&entry, &mut summary);
        }

        self.tick_count += 1;
        summary
    }

    fn poll_entry(&self, entry: &EntryRef<K>, summary: &mut TickSummary) {
        if entry.is_removed() {
            summary.skipped += 1;
            return;
        }

        let support = entry.support();
        let (support_now, result) = match self.options.query_timeout {
            Some(timeout) => self.acquire_with_timeout(entry, support, timeout),
            None => acquire::<K>(
                self.source.as_ref(),
                entry.id(),
                support,
                self.options.primary_enabled,
            ),
        };

        if entry.is_removed() {
            summary.skipped += 1;
            return;
        }
        summary.polled += 1;

        let mut reported_name = None;
        {
            entry.resolve_support(support_now);
            let mut state = entry.lock_state();

            match result {
                Ok(counters) => {
                    state.present = true;
                    K::update(&mut state.samples, &counters);
                    reported_name = K::reported_name(&counters);
                    summary.present += 1;
                }
                Err(err) => {
                    if state.present {
                        log::debug!("{} device {} went absent: {}", K::NAME, entry.id(), err);
                    } else {
                        log::debug!("{} device {}: {}", K::NAME, entry.id(), err);
                    }
                    state.present = false;
                    K::clear_rates(&mut state.samples);
                    summary.absent += 1;
                }
            }

            if state.has_first_sample {
                K::push_history(&mut state.samples);
            } else {
                // Baseline tick: deltas are meaningless and nothing is graphed
                K::clear_rates(&mut state.samples);
                state.has_first_sample = true;
            }
        }

        if let Some(name) = reported_name {
            entry.set_name_if_empty(name);
        }
    }

    fn acquire_with_timeout(
        &self,
        entry: &EntryRef<K>,
        support: SupportState,
        timeout: Duration,
    ) -> Acquired<K> {
        let timed_out = || DeviceError::TimedOut {
            device: entry.id().to_string(),
            timeout,
        };

        // At most one worker per entry; a device still stuck in the driver
        // stays absent until its worker returns
        if !entry.try_begin_query() {
            log::debug!("{} device {}: previous query still running", K::NAME, entry.id());
            return (support, Err(timed_out()));
        }

        let (tx, rx) = mpsc::channel();
        let source = Arc::clone(&self.source);
        let worker_entry = Arc::clone(entry);
        let primary_enabled = self.options.primary_enabled;

        thread::spawn(move || {
            let _slot = QuerySlot(Arc::clone(&worker_entry));
            let id = worker_entry.id();
            let support = resolve_support::<K>(source.as_ref(), id, support, primary_enabled);
            // Kept even if the query below outlives the timeout
            worker_entry.resolve_support(support);
            let result = query::<K>(source.as_ref(), id, support, primary_enabled);
            let _ = tx.send((support, result));
        });

        match rx.recv_timeout(timeout) {
            Ok(acquired) => acquired,
            Err(_) => (entry.support(), Err(timed_out())),
        }
    }
}

/// Releases the entry's query slot when the worker ends, panics included
struct QuerySlot<K: DeviceKind>(EntryRef<K>);

impl<K: DeviceKind> Drop for QuerySlot<K> {
    fn drop(&mut self) {
        self.0.finish_query();
    }
}

/// Probe if still undecided, then query through the method the support
/// state allows
fn acquire<K: DeviceKind>(
    source: &dyn CounterSource<K>,
    id: &K::Id,
    support: SupportState,
    primary_enabled: bool,
) -> Acquired<K> {
    let support = resolve_support::<K>(source, id, support, primary_enabled);
    (support, query::<K>(source, id, support, primary_enabled))
}

fn resolve_support<K: DeviceKind>(
    source: &dyn CounterSource<K>,
    id: &K::Id,
    support: SupportState,
    primary_enabled: bool,
) -> SupportState {
    if !primary_enabled || support != SupportState::Unknown {
        return support;
    }
    match source.probe(id) {
        Ok(true) => {
            log::info!("{} device {}: primary query method supported", K::NAME, id);
            SupportState::Supported
        }
        Ok(false) => {
            let err = DeviceError::CapabilityUnsupported {
                device: id.to_string(),
                method: "primary",
            };
            log::info!("{}; using fallback", err);
            SupportState::Unsupported
        }
        Err(err) => {
            log::debug!("{} capability probe failed, will retry: {}", K::NAME, err);
            SupportState::Unknown
        }
    }
}

fn query<K: DeviceKind>(
    source: &dyn CounterSource<K>,
    id: &K::Id,
    support: SupportState,
    primary_enabled: bool,
) -> Result<K::Counters, DeviceError> {
    if primary_enabled && support == SupportState::Supported {
        source.query_primary(id).or_else(|err| {
            log::debug!("{} primary query failed for {}: {}", K::NAME, id, err);
            source.query_fallback(id)
        })
    } else {
        source.query_fallback(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{NetAdapterId, Network, NetworkCounters};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct ScriptedSource {
        probe: Option<bool>,
        probes: AtomicUsize,
        primary: Mutex<VecDeque<Option<u64>>>,
        fallback: Mutex<VecDeque<Option<u64>>>,
        fallback_calls: AtomicUsize,
    }

    fn counters(received: u64) -> NetworkCounters {
        NetworkCounters {
            bytes_received: received,
            bytes_sent: received / 2,
            link_speed: 1_000_000_000,
            link_up: true,
            name: Some("Ethernet".to_string()),
        }
    }

    fn next(queue: &Mutex<VecDeque<Option<u64>>>, id: &NetAdapterId) -> Result<NetworkCounters, DeviceError> {
        match queue.lock().unwrap().pop_front().flatten() {
            Some(v) => Ok(counters(v)),
            None => Err(DeviceError::unavailable(id.to_string(), "scripted failure")),
        }
    }

    impl CounterSource<Network> for ScriptedSource {
        fn probe(&self, id: &NetAdapterId) -> Result<bool, DeviceError> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            self.probe
                .ok_or_else(|| DeviceError::unavailable(id.to_string(), "probe failed"))
        }

        fn query_primary(&self, id: &NetAdapterId) -> Result<NetworkCounters, DeviceError> {
            next(&self.primary, id)
        }

        fn query_fallback(&self, id: &NetAdapterId) -> Result<NetworkCounters, DeviceError> {
            self.fallback_calls.fetch_add(1, Ordering::SeqCst);
            next(&self.fallback, id)
        }
    }

    fn adapter() -> NetAdapterId {
        NetAdapterId::new(1, 1000, "{A}")
    }

    #[test]
    fn test_receive_scenario() {
        let source = Arc::new(ScriptedSource {
            probe: Some(true),
            primary: Mutex::new([Some(0), Some(1000), Some(2500)].into()),
            ..Default::default()
        });
        let registry = DeviceRegistry::<Network>::new(10);
        let entry = registry.select(adapter());
        let mut poller = Poller::new(source, PollerOptions::default());

        for _ in 0..3 {
            poller.tick(&registry);
        }

        assert_eq!(poller.tick_count(), 3);
        entry.with_samples(|s| {
            assert_eq!(s.inbound.count(), 2);
            assert_eq!(s.inbound.get(0), Some(1500));
            assert_eq!(s.inbound.get(1), Some(1000));
        });
        assert_eq!(entry.name().as_deref(), Some("Ethernet"));
        assert!(entry.is_present());
    }

    #[test]
    fn test_probe_runs_once() {
        let source = Arc::new(ScriptedSource {
            probe: Some(false),
            fallback: Mutex::new([Some(10), Some(20), Some(30)].into()),
            ..Default::default()
        });
        let registry = DeviceRegistry::<Network>::new(10);
        let entry = registry.select(adapter());
        let mut poller = Poller::new(source.clone(), PollerOptions::default());

        for _ in 0..3 {
            poller.tick(&registry);
        }

        assert_eq!(source.probes.load(Ordering::SeqCst), 1);
        assert_eq!(source.fallback_calls.load(Ordering::SeqCst), 3);
        assert_eq!(entry.support(), SupportState::Unsupported);
        entry.with_samples(|s| assert_eq!(s.inbound.get(0), Some(10)));
    }

    #[test]
    fn test_probe_error_retries() {
        let source = Arc::new(ScriptedSource {
            probe: None,
            fallback: Mutex::new([Some(1), Some(2)].into()),
            ..Default::default()
        });
        let registry = DeviceRegistry::<Network>::new(10);
        let entry = registry.select(adapter());
        let mut poller = Poller::new(source.clone(), PollerOptions::default());

        poller.tick(&registry);
        poller.tick(&registry);

        assert_eq!(source.probes.load(Ordering::SeqCst), 2);
        assert_eq!(entry.support(), SupportState::Unknown);
        assert!(entry.is_present());
    }

    #[test]
    fn test_primary_failure_falls_back() {
        let source = Arc::new(ScriptedSource {
            probe: Some(true),
            primary: Mutex::new([Some(100), None].into()),
            fallback: Mutex::new([Some(400)].into()),
            ..Default::default()
        });
        let registry = DeviceRegistry::<Network>::new(10);
        let entry = registry.select(adapter());
        let mut poller = Poller::new(source.clone(), PollerOptions::default());

        poller.tick(&registry);
        let summary = poller.tick(&registry);

        assert_eq!(summary.present, 1);
        assert_eq!(source.fallback_calls.load(Ordering::SeqCst), 1);
        entry.with_samples(|s| assert_eq!(s.inbound.get(0), Some(300)));
    }

    #[test]
    fn test_disabled_primary_skips_probe() {
        let source = Arc::new(ScriptedSource {
            probe: Some(true),
            primary: Mutex::new([Some(5)].into()),
            fallback: Mutex::new([Some(7)].into()),
            ..Default::default()
        });
        let registry = DeviceRegistry::<Network>::new(10);
        let entry = registry.select(adapter());
        let options = PollerOptions {
            primary_enabled: false,
            ..Default::default()
        };
        let mut poller = Poller::new(source.clone(), options);

        poller.tick(&registry);

        assert_eq!(source.probes.load(Ordering::SeqCst), 0);
        assert_eq!(entry.support(), SupportState::Unknown);
        entry.with_samples(|s| assert_eq!(s.receive.value(), 7));
    }

    #[test]
    fn test_absent_device_keeps_history() {
        let source = Arc::new(ScriptedSource {
            probe: Some(true),
            primary: Mutex::new([Some(0), Some(800), None, Some(1000)].into()),
            ..Default::default()
        });
        let registry = DeviceRegistry::<Network>::new(10);
        let entry = registry.select(adapter());
        let mut poller = Poller::new(source, PollerOptions::default());

        poller.tick(&registry);
        poller.tick(&registry);
        let summary = poller.tick(&registry);

        assert_eq!(summary.absent, 1);
        assert!(!entry.is_present());
        entry.with_samples(|s| {
            assert_eq!(s.receive_rate(), 0);
            assert!(!s.link_up);
            assert_eq!(s.inbound.count(), 2);
            assert_eq!(s.inbound.get(0), Some(0));
            assert_eq!(s.inbound.get(1), Some(800));
        });

        poller.tick(&registry);
        assert!(entry.is_present());
        entry.with_samples(|s| assert_eq!(s.inbound.get(0), Some(200)));
    }

    struct UnregisteringSource {
        registry: Arc<DeviceRegistry<Network>>,
        victim: NetAdapterId,
    }

    impl CounterSource<Network> for UnregisteringSource {
        fn query_primary(&self, _id: &NetAdapterId) -> Result<NetworkCounters, DeviceError> {
            self.registry.unregister(&self.victim);
            Ok(counters(0))
        }
    }

    #[test]
    fn test_unregistered_mid_tick_is_skipped() {
        let registry = Arc::new(DeviceRegistry::<Network>::new(10));
        registry.select(NetAdapterId::new(1, 1, "{A}"));
        let victim = registry.select(NetAdapterId::new(2, 2, "{B}"));

        let source = Arc::new(UnregisteringSource {
            registry: Arc::clone(&registry),
            victim: victim.id().clone(),
        });
        let mut poller = Poller::new(source, PollerOptions::default());
        let summary = poller.tick(&registry);

        assert_eq!(summary.polled, 1);
        assert_eq!(summary.skipped, 1);
        assert!(victim.is_removed());
        assert!(!victim.is_present());
    }

    struct SlowSource;

    impl CounterSource<Network> for SlowSource {
        fn query_primary(&self, _id: &NetAdapterId) -> Result<NetworkCounters, DeviceError> {
            thread::sleep(Duration::from_millis(500));
            Ok(counters(0))
        }
    }

    #[test]
    fn test_query_timeout() {
        let registry = DeviceRegistry::<Network>::new(10);
        let entry = registry.select(adapter());
        let options = PollerOptions {
            primary_enabled: true,
            query_timeout: Some(Duration::from_millis(20)),
        };
        let mut poller = Poller::new(Arc::new(SlowSource), options);

        let summary = poller.tick(&registry);
        assert_eq!(summary.absent, 1);
        assert!(!entry.is_present());
    }

    /// Probes instantly, then hangs in the primary query
    #[derive(Default)]
    struct HangingSource {
        probes: AtomicUsize,
        queries: AtomicUsize,
    }

    impl CounterSource<Network> for HangingSource {
        fn probe(&self, _id: &NetAdapterId) -> Result<bool, DeviceError> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }

        fn query_primary(&self, _id: &NetAdapterId) -> Result<NetworkCounters, DeviceError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(300));
            Ok(counters(0))
        }
    }

    #[test]
    fn test_timed_out_query_keeps_probe_decision() {
        let registry = DeviceRegistry::<Network>::new(10);
        let entry = registry.select(adapter());
        let source = Arc::new(HangingSource::default());
        let options = PollerOptions {
            primary_enabled: true,
            query_timeout: Some(Duration::from_millis(30)),
        };
        let mut poller = Poller::new(source.clone(), options);

        for _ in 0..10 {
            let summary = poller.tick(&registry);
            assert_eq!(summary.absent, 1);
        }

        assert_eq!(source.probes.load(Ordering::SeqCst), 1);
        assert_eq!(entry.support(), SupportState::Supported);
        // One worker at a time while the device hangs
        assert_eq!(source.queries.load(Ordering::SeqCst), 1);
        assert!(entry.is_query_in_flight());
    }

    #[test]
    fn test_query_slot_frees_after_worker_returns() {
        let registry = DeviceRegistry::<Network>::new(10);
        let entry = registry.select(adapter());
        let source = Arc::new(HangingSource::default());
        let options = PollerOptions {
            primary_enabled: true,
            query_timeout: Some(Duration::from_millis(10)),
        };
        let mut poller = Poller::new(source.clone(), options);

        poller.tick(&registry);
        thread::sleep(Duration::from_millis(800));
        assert!(!entry.is_query_in_flight());

        poller.tick(&registry);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(source.queries.load(Ordering::SeqCst), 2);
        assert_eq!(source.probes.load(Ordering::SeqCst), 1);
    }
}
