//! Per-kind device registry.
//!
//! A single `RwLock` guards the entry list. Readers (`find`, `for_each`,
//! `snapshot`) share it; structural changes take it exclusively. Per-entry
//! sample state has its own lock inside [`DeviceEntry`], so polling never
//! holds the list lock across device I/O.

use std::sync::{Arc, RwLock};

use crate::device::{DeviceEntry, DeviceId, DeviceKind};
use crate::error::RegistryError;
use crate::sync::{read_or_recover, write_or_recover};

pub type EntryRef<K> = Arc<DeviceEntry<K>>;

/// Outcome of restoring a persisted selection list
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadReport {
    /// Entries created or re-selected
    pub selected: usize,
    /// Malformed segments that were skipped
    pub skipped: usize,
}

pub struct DeviceRegistry<K: DeviceKind> {
    entries: RwLock<Vec<EntryRef<K>>>,
    sample_count: usize,
}

impl<K: DeviceKind> DeviceRegistry<K> {
    /// Create an empty registry whose entries keep `sample_count` samples
    pub fn new(sample_count: usize) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            sample_count,
        }
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn len(&self) -> usize {
        read_or_recover(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// New unselected entry sized for this registry
    pub fn new_entry(&self, id: K::Id) -> DeviceEntry<K> {
        DeviceEntry::new(id, self.sample_count)
    }

    /// Insert an entry. The duplicate check and the insert happen under the
    /// same exclusive lock.
    pub fn add(&self, entry: DeviceEntry<K>) -> Result<EntryRef<K>, RegistryError> {
        let mut entries = write_or_recover(&self.entries);
        if entries.iter().any(|e| e.id() == entry.id()) {
            return Err(RegistryError::DuplicateIdentity {
                kind: K::NAME,
                identity: entry.id().to_string(),
            });
        }
        let entry = Arc::new(entry);
        entries.push(Arc::clone(&entry));
        log::info!("Registered {} device {}", K::NAME, entry.id());
        Ok(entry)
    }

    pub fn find(&self, id: &K::Id) -> Option<EntryRef<K>> {
        read_or_recover(&self.entries)
            .iter()
            .find(|e| e.id() == id)
            .cloned()
    }

    /// Find or create the entry for `id` and mark it selected
    pub fn select(&self, id: K::Id) -> EntryRef<K> {
        let mut entries = write_or_recover(&self.entries);
        if let Some(entry) = entries.iter().find(|e| *e.id() == id) {
            entry.set_user_selected(true);
            return Arc::clone(entry);
        }
        let entry = Arc::new(DeviceEntry::selected(id, self.sample_count));
        entries.push(Arc::clone(&entry));
        log::info!("Selected {} device {}", K::NAME, entry.id());
        entry
    }

    /// Clear the user-selected flag. The entry stays registered and keeps
    /// being polled. Returns false if there was nothing to clear.
    pub fn deselect(&self, id: &K::Id) -> bool {
        match self.find(id) {
            Some(entry) => {
                let was_selected = entry.set_user_selected(false);
                if was_selected {
                    log::info!("Deselected {} device {}", K::NAME, id);
                }
                was_selected
            }
            None => false,
        }
    }

    /// Unlink the entry and mark it removed. Holders of the returned (or any
    /// other) reference keep it alive; the memory goes with the last one.
    pub fn unregister(&self, id: &K::Id) -> Option<EntryRef<K>> {
        let mut entries = write_or_recover(&self.entries);
        let pos = entries.iter().position(|e| e.id() == id)?;
        let entry = entries.remove(pos);
        entry.mark_removed();
        log::info!("Unregistered {} device {}", K::NAME, id);
        Some(entry)
    }

    /// Unregister every entry matching `pred`, returning how many went
    pub fn unregister_where(&self, mut pred: impl FnMut(&DeviceEntry<K>) -> bool) -> usize {
        let mut entries = write_or_recover(&self.entries);
        let before = entries.len();
        entries.retain(|e| {
            if pred(e.as_ref()) {
                e.mark_removed();
                log::info!("Unregistered {} device {}", K::NAME, e.id());
                false
            } else {
                true
            }
        });
        before - entries.len()
    }

    /// Visit every live entry under the shared lock. The visitor must not
    /// call back into structural operations on this registry.
    pub fn for_each(&self, mut visitor: impl FnMut(&EntryRef<K>)) {
        let entries = read_or_recover(&self.entries);
        for entry in entries.iter().filter(|e| !e.is_removed()) {
            visitor(entry);
        }
    }

    /// Strong references to the live entries; the lock is released on return
    pub fn snapshot(&self) -> Vec<EntryRef<K>> {
        read_or_recover(&self.entries)
            .iter()
            .filter(|e| !e.is_removed())
            .cloned()
            .collect()
    }

    /// Serialize the selected identities in settings-list form
    pub fn save(&self) -> String {
        let mut out = String::new();
        self.for_each(|entry| {
            if entry.is_user_selected() {
                entry.id().write_setting(&mut out);
            }
        });
        if out.ends_with(',') {
            out.pop();
        }
        out
    }

    /// Restore selections from a settings list. Malformed segments are
    /// logged and skipped, never fatal.
    pub fn load(&self, list: &str) -> LoadReport {
        let parsed = K::Id::parse_setting_list(list, K::SETTING);
        for error in &parsed.errors {
            log::warn!("{}", error);
        }

        let mut report = LoadReport {
            selected: 0,
            skipped: parsed.errors.len(),
        };
        for id in parsed.ids {
            self.select(id);
            report.selected += 1;
        }
        report
    }
}

impl<K: DeviceKind> Default for DeviceRegistry<K> {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_SAMPLE_COUNT)
    }
}
