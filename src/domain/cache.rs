//! Cache of constructed domains and coordinate systems.
//!
//! Entries are keyed by a structural identity rather than object address. The
//! map lock is only held to find or create a slot; the slot's `OnceCell`
//! serializes first construction, so two threads asking for the same key build
//! it once and nothing is held while a builder runs slow reads.

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::{Axis, SampleDomain};
use crate::error::Result;

/// Cache key: structural identity of the axes/coordinate system, the time
/// index when the domain is time dependent, and any extra selection key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DomainKey {
    pub identity: u64,
    pub time_index: Option<usize>,
    pub extra: String,
}

impl DomainKey {
    pub fn new(identity: u64, time_index: Option<usize>, extra: impl Into<String>) -> Self {
        Self {
            identity,
            time_index,
            extra: extra.into(),
        }
    }
}

/// Hash the axes and raw coordinate values that define a domain
pub fn structural_identity(param: &str, axes: &[Axis], coords: &[&[f64]]) -> u64 {
    let mut hasher = DefaultHasher::new();
    param.hash(&mut hasher);
    axes.hash(&mut hasher);
    for c in coords {
        c.len().hash(&mut hasher);
        for v in c.iter() {
            v.to_bits().hash(&mut hasher);
        }
    }
    hasher.finish()
}

type Slot = Arc<OnceCell<Arc<SampleDomain>>>;

#[derive(Default)]
struct Entries {
    slots: HashMap<DomainKey, Slot>,
    order: VecDeque<DomainKey>,
}

/// Snapshot of cache counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub evictions: u64,
}

/// Domain cache owned by a data source
pub struct DomainCache {
    entries: RwLock<Entries>,
    max_entries: usize,
    enabled: bool,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl DomainCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            max_entries: max_entries.max(1),
            enabled: true,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// A cache that never stores anything; every lookup builds
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(1)
        }
    }

    /// Return the cached domain for `key`, building it with `build` on first use.
    ///
    /// A failed build leaves no entry behind.
    pub fn get_or_try_build<F>(&self, key: &DomainKey, build: F) -> Result<Arc<SampleDomain>>
    where
        F: FnOnce() -> Result<SampleDomain>,
    {
        if !self.enabled {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return build().map(Arc::new);
        }

        let existing = self.entries.read().slots.get(key).cloned();
        let slot = match existing {
            Some(slot) => slot,
            None => self.insert_slot(key),
        };

        if let Some(domain) = slot.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(domain.clone());
        }

        let mut built = false;
        let result = slot
            .get_or_try_init(|| {
                built = true;
                build().map(Arc::new)
            })
            .cloned();
        if built {
            self.misses.fetch_add(1, Ordering::Relaxed);
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        if result.is_err() {
            self.remove_if_empty(key);
        }
        debug!(
            identity = key.identity,
            time_index = ?key.time_index,
            built,
            "domain cache lookup"
        );
        result
    }

    fn insert_slot(&self, key: &DomainKey) -> Slot {
        let mut entries = self.entries.write();
        if let Some(slot) = entries.slots.get(key) {
            return slot.clone();
        }
        while entries.slots.len() >= self.max_entries {
            match entries.order.pop_front() {
                Some(old) => {
                    entries.slots.remove(&old);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                None => break,
            }
        }
        let slot: Slot = Arc::new(OnceCell::new());
        entries.slots.insert(key.clone(), slot.clone());
        entries.order.push_back(key.clone());
        slot
    }

    fn remove_if_empty(&self, key: &DomainKey) {
        let mut entries = self.entries.write();
        let empty = entries
            .slots
            .get(key)
            .map(|slot| slot.get().is_none())
            .unwrap_or(false);
        if empty {
            entries.slots.remove(key);
            entries.order.retain(|k| k != key);
        }
    }

    /// Drop every entry built from the given structural identity
    pub fn invalidate(&self, identity: u64) -> usize {
        let mut entries = self.entries.write();
        let before = entries.slots.len();
        entries.slots.retain(|k, _| k.identity != identity);
        entries.order.retain(|k| k.identity != identity);
        before - entries.slots.len()
    }

    /// Drop everything, e.g. when source data is reloaded
    pub fn clear(&self) {
        let mut entries = self.entries.write();
        entries.slots.clear();
        entries.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

impl Default for DomainCache {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LinearAxis;
    use crate::error::EkmanError;
    use std::sync::atomic::AtomicUsize;

    fn build_domain() -> Result<SampleDomain> {
        SampleDomain::linear(vec![Axis::longitude()], vec![LinearAxis::new(0.0, 1.0, 4)])
    }

    #[test]
    fn test_hit_after_first_build() {
        let cache = DomainCache::new(8);
        let key = DomainKey::new(1, None, "");
        let a = cache.get_or_try_build(&key, build_domain).unwrap();
        let b = cache.get_or_try_build(&key, build_domain).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_failed_build_is_not_cached() {
        let cache = DomainCache::new(8);
        let key = DomainKey::new(2, Some(0), "");
        let err = cache.get_or_try_build(&key, || {
            Err(EkmanError::DataNotFound {
                message: "gone".to_string(),
            })
        });
        assert!(err.is_err());
        assert!(cache.is_empty());
        assert!(cache.get_or_try_build(&key, build_domain).is_ok());
    }

    #[test]
    fn test_concurrent_first_build_runs_once() {
        let cache = Arc::new(DomainCache::new(8));
        let calls = Arc::new(AtomicUsize::new(0));
        let key = DomainKey::new(3, Some(1), "stride=2");
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let calls = calls.clone();
                let key = key.clone();
                std::thread::spawn(move || {
                    cache
                        .get_or_try_build(&key, || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(20));
                            build_domain()
                        })
                        .unwrap()
                })
            })
            .collect();
        let domains: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(domains.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn test_eviction_and_invalidate() {
        let cache = DomainCache::new(2);
        for i in 0..3 {
            cache
                .get_or_try_build(&DomainKey::new(i, None, ""), build_domain)
                .unwrap();
        }
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.invalidate(2), 1);
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_structural_identity_is_content_based() {
        let axes = vec![Axis::longitude()];
        let a = structural_identity("t", &axes, &[&[0.0, 1.0]]);
        let b = structural_identity("t", &axes, &[&[0.0, 1.0]]);
        let c = structural_identity("t", &axes, &[&[0.0, 2.0]]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
