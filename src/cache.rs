//! Lazy snapshot cache over external command output.
//!
//! Each manager keeps the parsed state of "all interfaces/networks of one
//! kind" in a [`SnapshotCache`]. The cache is filled lazily on first read,
//! invalidated unconditionally after every mutation, and refreshed at most
//! once per invalidation cycle. A refresh is all-or-nothing: the new map is
//! built completely before it replaces the old one, and a parse failure
//! leaves the cache invalid rather than half-populated.

use std::collections::HashMap;

use crate::error::Result;

/// Cached mapping from name (interface or SSID) to a parsed record.
pub struct SnapshotCache<T> {
    records: Option<HashMap<String, T>>,
}

impl<T> SnapshotCache<T> {
    pub fn new() -> Self {
        Self { records: None }
    }

    /// Drop the stored snapshot. Does not refresh; the next read will.
    ///
    /// Invalidating an already-invalid cache is a no-op, so a sequence of
    /// mutations costs one refresh when state is finally read back.
    pub fn invalidate(&mut self) {
        self.records = None;
    }

    pub fn is_valid(&self) -> bool {
        self.records.is_some()
    }

    /// Return the current snapshot, running `refresh` only if the cache is
    /// invalid. On refresh failure the cache stays invalid.
    pub fn get_or_refresh<F>(&mut self, refresh: F) -> Result<&HashMap<String, T>>
    where
        F: FnOnce() -> Result<HashMap<String, T>>,
    {
        if self.records.is_none() {
            let fresh = refresh()?;
            tracing::debug!("snapshot refreshed: {} records", fresh.len());
            self.records = Some(fresh);
        }

        Ok(self.records.as_ref().expect("populated above"))
    }
}

impl<T> Default for SnapshotCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetshellError;
    use std::cell::Cell;

    #[test]
    fn refresh_runs_once_per_invalidation_cycle() {
        let mut cache: SnapshotCache<u32> = SnapshotCache::new();
        let refreshes = Cell::new(0u32);
        let refresh = || {
            refreshes.set(refreshes.get() + 1);
            let mut map = HashMap::new();
            map.insert("eth0".to_string(), refreshes.get());
            Ok(map)
        };

        cache.invalidate();
        cache.invalidate();
        cache.get_or_refresh(refresh).unwrap();
        cache.get_or_refresh(refresh).unwrap();
        assert_eq!(refreshes.get(), 1);

        cache.invalidate();
        cache.get_or_refresh(refresh).unwrap();
        assert_eq!(refreshes.get(), 2);
    }

    #[test]
    fn failed_refresh_leaves_cache_invalid() {
        let mut cache: SnapshotCache<u32> = SnapshotCache::new();
        let err = cache.get_or_refresh(|| {
            Err(NetshellError::ParseError {
                what: "test output".to_string(),
                reason: "scripted".to_string(),
            })
        });
        assert!(err.is_err());
        assert!(!cache.is_valid());

        // A later read retries the refresh.
        cache
            .get_or_refresh(|| {
                let mut map = HashMap::new();
                map.insert("eth0".to_string(), 1);
                Ok(map)
            })
            .unwrap();
        assert!(cache.is_valid());
    }
}
