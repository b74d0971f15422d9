//! Device kinds and the per-device entry shared between the registry,
//! the poller and readers on other threads.

pub mod disk;
pub mod gpu;
pub mod network;
pub mod rapl;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock};

use crate::error::SettingsError;
use crate::sync::{lock_or_recover, read_or_recover, write_or_recover};

pub use disk::{Disk, DiskCounters, DiskSamples};
pub use gpu::{Gpu, GpuCounters, GpuSamples};
pub use network::{NetAdapterId, Network, NetworkCounters, NetworkSamples};
pub use rapl::{Rapl, RaplChannel, RaplCounters, RaplSamples};

/// Result of parsing a persisted device list
#[derive(Debug)]
pub struct ParsedList<I> {
    pub ids: Vec<I>,
    pub errors: Vec<SettingsError>,
}

impl<I> Default for ParsedList<I> {
    fn default() -> Self {
        Self {
            ids: Vec::new(),
            errors: Vec::new(),
        }
    }
}

/// Comparable identity of a monitored device.
///
/// Equality must be stable across restarts since persisted selections are
/// matched against freshly enumerated devices.
pub trait DeviceId:
    Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static
{
    /// Append this identity in settings-list form, trailing comma included
    fn write_setting(&self, out: &mut String);

    /// Parse a settings list, skipping (and reporting) malformed segments
    fn parse_setting_list(list: &str, setting: &'static str) -> ParsedList<Self>;
}

/// Device interface path (disk, GPU and RAPL identities).
///
/// Windows device paths are case-insensitive, so equality and hashing use
/// a lowercase key while `Display` keeps the original spelling.
#[derive(Clone)]
pub struct DevicePath {
    path: String,
    key: String,
}

impl DevicePath {
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        let key = path.to_lowercase();
        Self { path, key }
    }

    pub fn as_str(&self) -> &str {
        &self.path
    }
}

impl PartialEq for DevicePath {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for DevicePath {}

impl Hash for DevicePath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Debug for DevicePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DevicePath").field(&self.path).finish()
    }
}

impl fmt::Display for DevicePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

impl DeviceId for DevicePath {
    fn write_setting(&self, out: &mut String) {
        out.push_str(&self.path);
        out.push(',');
    }

    fn parse_setting_list(list: &str, _setting: &'static str) -> ParsedList<Self> {
        // Empty segments come from trailing or doubled commas and carry nothing
        ParsedList {
            ids: list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(DevicePath::new)
                .collect(),
            errors: Vec::new(),
        }
    }
}

/// One category of monitored hardware.
///
/// A kind ties together the identity type, the raw counters a query
/// returns and the sample set (trackers, histories, derived values) kept
/// per entry. The registry and the poller are generic over this trait.
pub trait DeviceKind: Send + Sync + 'static {
    type Id: DeviceId;
    type Counters: Send + 'static;
    type Samples: Send + 'static;

    /// Short name used in logs and errors
    const NAME: &'static str;
    /// Settings key of the persisted selection list
    const SETTING: &'static str;

    fn new_samples(sample_count: usize) -> Self::Samples;

    /// Fold raw counters into the trackers and derived values
    fn update(samples: &mut Self::Samples, counters: &Self::Counters);

    /// Append the current deltas to the history buffers
    fn push_history(samples: &mut Self::Samples);

    /// Zero live rates; history is left alone
    fn clear_rates(samples: &mut Self::Samples);

    /// Display name carried by a query result, if the method reports one
    fn reported_name(_counters: &Self::Counters) -> Option<String> {
        None
    }
}

/// Whether the primary query method works for a device.
///
/// The probe is expensive, so it runs at most once per entry: the state
/// leaves `Unknown` exactly once and every later tick branches on it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SupportState {
    #[default]
    Unknown,
    Supported,
    Unsupported,
}

/// Mutable per-tick state of an entry
#[derive(Debug)]
pub struct EntryState<S> {
    pub present: bool,
    pub has_first_sample: bool,
    pub support: SupportState,
    pub samples: S,
}

/// One monitored device.
///
/// Entries are shared through `Arc`: the registry, a poll tick in flight and
/// any UI reader may all hold one. Unregistering marks the entry removed and
/// unlinks it; the memory goes away with the last reference.
pub struct DeviceEntry<K: DeviceKind> {
    id: K::Id,
    name: RwLock<Option<String>>,
    user_selected: AtomicBool,
    removed: AtomicBool,
    query_in_flight: AtomicBool,
    state: Mutex<EntryState<K::Samples>>,
}

impl<K: DeviceKind> DeviceEntry<K> {
    pub fn new(id: K::Id, sample_count: usize) -> Self {
        Self {
            id,
            name: RwLock::new(None),
            user_selected: AtomicBool::new(false),
            removed: AtomicBool::new(false),
            query_in_flight: AtomicBool::new(false),
            state: Mutex::new(EntryState {
                present: false,
                has_first_sample: false,
                support: SupportState::Unknown,
                samples: K::new_samples(sample_count),
            }),
        }
    }

    /// New entry already marked as chosen by the user
    pub fn selected(id: K::Id, sample_count: usize) -> Self {
        let entry = Self::new(id, sample_count);
        entry.user_selected.store(true, Ordering::Release);
        entry
    }

    pub fn id(&self) -> &K::Id {
        &self.id
    }

    pub fn name(&self) -> Option<String> {
        read_or_recover(&self.name).clone()
    }

    /// Name for display, falling back to the identity
    pub fn display_name(&self) -> String {
        self.name().unwrap_or_else(|| self.id.to_string())
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *write_or_recover(&self.name) = Some(name.into());
    }

    /// Fill the name only if nothing resolved it yet
    pub fn set_name_if_empty(&self, name: String) -> bool {
        let mut slot = write_or_recover(&self.name);
        if slot.is_none() && !name.is_empty() {
            *slot = Some(name);
            true
        } else {
            false
        }
    }

    pub fn is_user_selected(&self) -> bool {
        self.user_selected.load(Ordering::Acquire)
    }

    /// Set the selection flag, returning the previous value
    pub fn set_user_selected(&self, selected: bool) -> bool {
        self.user_selected.swap(selected, Ordering::AcqRel)
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_removed(&self) {
        self.removed.store(true, Ordering::Release);
    }

    /// Claim the single background query slot. False while an earlier
    /// query for this entry is still running.
    pub(crate) fn try_begin_query(&self) -> bool {
        self.query_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn finish_query(&self) {
        self.query_in_flight.store(false, Ordering::Release);
    }

    pub fn is_query_in_flight(&self) -> bool {
        self.query_in_flight.load(Ordering::Acquire)
    }

    /// Record a capability decision. Only the first one out of `Unknown` sticks.
    pub(crate) fn resolve_support(&self, support: SupportState) {
        let mut state = self.lock_state();
        if state.support == SupportState::Unknown && support != SupportState::Unknown {
            state.support = support;
        }
    }

    pub fn is_present(&self) -> bool {
        self.lock_state().present
    }

    pub fn support(&self) -> SupportState {
        self.lock_state().support
    }

    /// Lock the sample state. Keep the guard short-lived; the poller takes
    /// this lock once per tick per entry.
    pub fn lock_state(&self) -> MutexGuard<'_, EntryState<K::Samples>> {
        lock_or_recover(&self.state)
    }

    /// Run `f` against the samples under the state lock
    pub fn with_samples<R>(&self, f: impl FnOnce(&K::Samples) -> R) -> R {
        f(&self.lock_state().samples)
    }
}

impl<K: DeviceKind> fmt::Debug for DeviceEntry<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceEntry")
            .field("kind", &K::NAME)
            .field("id", &self.id)
            .field("name", &self.name())
            .field("user_selected", &self.is_user_selected())
            .field("removed", &self.is_removed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_device_path_case_insensitive() {
        let a = DevicePath::new(r"\\?\SCSI#Disk&Ven_NVMe#5&1a2b#{53f56307-b6bf-11d0-94f2-00a0c91efb8b}");
        let b = DevicePath::new(r"\\?\scsi#disk&ven_nvme#5&1A2B#{53F56307-B6BF-11D0-94F2-00A0C91EFB8B}");
        assert_eq!(a, b);

        let set: HashSet<DevicePath> = [a.clone(), b].into_iter().collect();
        assert_eq!(set.len(), 1);
        // Display keeps the original spelling
        assert!(a.to_string().starts_with(r"\\?\SCSI"));
    }

    #[test]
    fn test_device_path_list_parsing() {
        let parsed = DevicePath::parse_setting_list(r"\\?\a,,\\?\b, ", "disk_list");
        assert_eq!(parsed.ids.len(), 2);
        assert!(parsed.errors.is_empty());
        assert_eq!(parsed.ids[1].as_str(), r"\\?\b");
    }

    #[test]
    fn test_query_slot_and_support_decision() {
        let entry: DeviceEntry<Disk> = DeviceEntry::new(DevicePath::new("disk0"), 8);
        assert!(entry.try_begin_query());
        assert!(!entry.try_begin_query());
        assert!(entry.is_query_in_flight());
        entry.finish_query();
        assert!(entry.try_begin_query());

        entry.resolve_support(SupportState::Unknown);
        assert_eq!(entry.support(), SupportState::Unknown);
        entry.resolve_support(SupportState::Supported);
        entry.resolve_support(SupportState::Unsupported);
        assert_eq!(entry.support(), SupportState::Supported);
    }

    #[test]
    fn test_entry_flags() {
        let entry: DeviceEntry<Disk> = DeviceEntry::new(DevicePath::new("disk0"), 8);
        assert!(!entry.is_user_selected());
        assert!(!entry.set_user_selected(true));
        assert!(entry.is_user_selected());
        assert_eq!(entry.support(), SupportState::Unknown);
        assert!(!entry.is_present());
        assert_eq!(entry.display_name(), "disk0");

        assert!(entry.set_name_if_empty("Samsung SSD".to_string()));
        assert!(!entry.set_name_if_empty("Other".to_string()));
        assert_eq!(entry.name().as_deref(), Some("Samsung SSD"));
    }
}
