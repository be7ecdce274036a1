//! Normalization parameters held between the preprocessing and restoration
//! phases of a job.
//!
//! Entries are keyed by a per-job [`JobKey`] rather than by output file name,
//! so concurrent jobs writing files with the same base name never collide.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::core::transforms::NormalizationParams;

/// Identifier of one normalization/restoration pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    label: String,
    id: Uuid,
}

impl JobKey {
    /// A fresh key; `label` is only used for display (e.g. the file name).
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            id: Uuid::new_v4(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.label, self.id.simple())
    }
}

struct Entry {
    params: NormalizationParams,
    stored_at: Instant,
}

/// Thread-safe `JobKey -> NormalizationParams` store.
///
/// `put` overwrites silently. Entries live until [`take`](Self::take)n, or
/// until they outlive the optional time-to-live.
#[derive(Default)]
pub struct ParamRegistry {
    entries: Mutex<HashMap<JobKey, Entry>>,
    ttl: Option<Duration>,
}

impl ParamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose entries expire `ttl` after being stored.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Mutex::default(),
            ttl: Some(ttl),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobKey, Entry>> {
        // Entries are plain values, so a poisoned map is still consistent.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_live(&self, entry: &Entry, now: Instant) -> bool {
        self.ttl
            .map_or(true, |ttl| now.duration_since(entry.stored_at) <= ttl)
    }

    /// Store `params` under `key`, returning any value it replaced.
    pub fn put(&self, key: JobKey, params: NormalizationParams) -> Option<NormalizationParams> {
        let entry = Entry {
            params,
            stored_at: Instant::now(),
        };
        self.lock().insert(key, entry).map(|old| old.params)
    }

    /// Look up `key` without removing it.
    pub fn get(&self, key: &JobKey) -> Option<NormalizationParams> {
        let now = Instant::now();
        self.lock()
            .get(key)
            .filter(|entry| self.is_live(entry, now))
            .map(|entry| entry.params)
    }

    /// Remove and return the entry for `key`.
    pub fn take(&self, key: &JobKey) -> Option<NormalizationParams> {
        let now = Instant::now();
        self.lock()
            .remove(key)
            .filter(|entry| self.is_live(entry, now))
            .map(|entry| entry.params)
    }

    /// Drop expired entries, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        if self.ttl.is_none() {
            return 0;
        }
        let now = Instant::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| self.is_live(entry, now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn params(scale: f64) -> NormalizationParams {
        NormalizationParams {
            center: [1.0, 2.0, 3.0],
            scale,
        }
    }

    #[test]
    fn test_put_get_take() {
        let registry = ParamRegistry::new();
        let key = JobKey::new("chair.ply");

        assert!(registry.put(key.clone(), params(0.5)).is_none());
        assert_eq!(registry.get(&key), Some(params(0.5)));
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.take(&key), Some(params(0.5)));
        assert!(registry.get(&key).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_put_overwrites() {
        let registry = ParamRegistry::new();
        let key = JobKey::new("a.ply");
        registry.put(key.clone(), params(1.0));
        assert_eq!(registry.put(key.clone(), params(2.0)), Some(params(1.0)));
        assert_eq!(registry.get(&key), Some(params(2.0)));
    }

    #[test]
    fn test_same_label_does_not_collide() {
        let registry = ParamRegistry::new();
        let first = JobKey::new("out.ply");
        let second = JobKey::new("out.ply");
        assert_ne!(first, second);

        registry.put(first.clone(), params(1.0));
        registry.put(second.clone(), params(2.0));
        assert_eq!(registry.take(&first), Some(params(1.0)));
        assert_eq!(registry.take(&second), Some(params(2.0)));
    }

    #[test]
    fn test_ttl_expiry() {
        let registry = ParamRegistry::with_ttl(Duration::from_millis(10));
        let key = JobKey::new("old.ply");
        registry.put(key.clone(), params(1.0));

        thread::sleep(Duration::from_millis(30));
        assert!(registry.get(&key).is_none());
        assert_eq!(registry.purge_expired(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_access() {
        let registry = Arc::new(ParamRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for i in 0..50 {
                        let key = JobKey::new(format!("{}-{}", t, i));
                        let p = params((t * 100 + i + 1) as f64);
                        registry.put(key.clone(), p);
                        assert_eq!(registry.take(&key), Some(p));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_display_includes_label() {
        let key = JobKey::new("bunny.ply");
        assert!(key.to_string().starts_with("bunny.ply#"));
    }
}
