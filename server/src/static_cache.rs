//! The static file LRU cache (§4.4), bounded by total bytes, total
//! entries, and a distinct per-file eligibility threshold (Open Question
//! resolution #2 in `DESIGN.md`).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

/// One cached file's content and metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The file's bytes.
    pub bytes: Arc<Vec<u8>>,
    /// The inferred or declared `Content-Type`.
    pub content_type: String,
    /// The file's last-modified time, for conditional requests.
    pub last_modified: SystemTime,
    /// A weak entity tag derived from size and modification time.
    pub etag: String,
    /// The entry's size in bytes (== `bytes.len()`).
    pub size: usize,
    last_access: Instant,
    insertion_seq: u64,
}

/// An LRU cache of `path -> CacheEntry`, evicting least-recently-used
/// entries until both the byte and entry-count bounds are satisfied.
#[derive(Debug)]
pub struct StaticCache {
    entries: HashMap<PathBuf, CacheEntry>,
    total_bytes: usize,
    max_bytes: usize,
    max_entries: usize,
    eligible_max_bytes: usize,
    next_seq: u64,
}

impl StaticCache {
    /// Creates an empty cache bounded by `max_bytes` total and
    /// `max_entries` entries; files larger than `eligible_max_bytes` are
    /// never cached (`insert` is a no-op for them; callers should stream
    /// such files directly).
    pub fn new(max_bytes: usize, max_entries: usize, eligible_max_bytes: usize) -> Self {
        Self {
            entries: HashMap::new(),
            total_bytes: 0,
            max_bytes,
            max_entries,
            eligible_max_bytes,
            next_seq: 0,
        }
    }

    /// Whether a file of `size` bytes is small enough to be cached at all.
    pub fn is_eligible(&self, size: usize) -> bool {
        size <= self.eligible_max_bytes
    }

    /// Looks up `path`, bumping its recency on a hit.
    pub fn get(&mut self, path: &std::path::Path) -> Option<CacheEntry> {
        let entry = self.entries.get_mut(path)?;
        entry.last_access = Instant::now();
        Some(entry.clone())
    }

    /// Inserts or replaces the entry for `path`, evicting
    /// least-recently-used entries (ties broken by insertion order) until
    /// both bounds are satisfied. A no-op if the file is not cache
    /// eligible.
    pub fn insert(
        &mut self,
        path: PathBuf,
        bytes: Vec<u8>,
        content_type: String,
        last_modified: SystemTime,
        etag: String,
    ) {
        let size = bytes.len();
        if !self.is_eligible(size) {
            return;
        }

        if let Some(old) = self.entries.remove(&path) {
            self.total_bytes -= old.size;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            path,
            CacheEntry {
                bytes: Arc::new(bytes),
                content_type,
                last_modified,
                etag,
                size,
                last_access: Instant::now(),
                insertion_seq: seq,
            },
        );
        self.total_bytes += size;

        self.evict_to_bounds();
    }

    fn evict_to_bounds(&mut self) {
        while self.total_bytes > self.max_bytes || self.entries.len() > self.max_entries {
            let Some(victim) = self
                .entries
                .iter()
                .min_by_key(|(_, e)| (e.last_access, e.insertion_seq))
                .map(|(path, _)| path.clone())
            else {
                break;
            };
            if let Some(removed) = self.entries.remove(&victim) {
                self.total_bytes -= removed.size;
            }
        }
    }

    /// Drops every cached entry (`clearCache()`).
    pub fn clear(&mut self) {
        self.entries.clear();
        self.total_bytes = 0;
    }

    /// The number of entries currently cached.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// The total bytes currently cached.
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::path::Path;

    fn insert(cache: &mut StaticCache, name: &str, size: usize) {
        cache.insert(
            PathBuf::from(name),
            vec![0u8; size],
            "text/plain".to_string(),
            SystemTime::now(),
            format!("\"{name}\""),
        );
    }

    #[test]
    fn evicts_least_recently_used_on_overflow() {
        // S4: bound = 3 entries. Access f1, f2, f3, f1, f4. Expect {f1, f3, f4}.
        let mut cache = StaticCache::new(usize::MAX, 3, usize::MAX);
        insert(&mut cache, "f1", 1);
        insert(&mut cache, "f2", 1);
        insert(&mut cache, "f3", 1);
        assert!(cache.get(Path::new("f1")).is_some());
        insert(&mut cache, "f4", 1);

        assert_eq!(cache.entry_count(), 3);
        assert!(cache.get(Path::new("f1")).is_some());
        assert!(cache.get(Path::new("f3")).is_some());
        assert!(cache.get(Path::new("f4")).is_some());
        assert!(!cache.entries.contains_key(Path::new("f2")));
    }

    #[test]
    fn respects_byte_bound() {
        let mut cache = StaticCache::new(10, usize::MAX, usize::MAX);
        insert(&mut cache, "a", 6);
        insert(&mut cache, "b", 6);
        assert!(cache.total_bytes() <= 10);
        assert_eq!(cache.entry_count(), 1);
    }

    #[test]
    fn files_above_eligibility_threshold_are_never_cached() {
        let mut cache = StaticCache::new(usize::MAX, usize::MAX, 100);
        insert(&mut cache, "big", 200);
        assert_eq!(cache.entry_count(), 0);
    }

    #[test]
    fn clear_drops_everything() {
        let mut cache = StaticCache::new(usize::MAX, usize::MAX, usize::MAX);
        insert(&mut cache, "a", 1);
        cache.clear();
        assert_eq!(cache.entry_count(), 0);
        assert_eq!(cache.total_bytes(), 0);
    }
}
