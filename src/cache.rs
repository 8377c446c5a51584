//! Process-wide searcher cache and search statistics.
//!
//! At most one vector- or memory-mode searcher is cached at a time,
//! keyed by `(path, mode)`. Replacing the cached searcher drops the
//! previous one, which releases its buffers once in-flight lookups
//! finish. File-mode opens bypass the cache entirely; the caller owns
//! and closes them.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::Serialize;

use crate::xdb::searcher::{SearchMode, Searcher};
use crate::Result;

struct CacheEntry {
    path: PathBuf,
    mode: SearchMode,
    searcher: Arc<Searcher>,
}

/// Single-slot searcher cache keyed by `(path, mode)`.
pub struct SearcherCache {
    slot: RwLock<Option<CacheEntry>>,
}

/// Description of the currently cached searcher.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub path: String,
    pub mode: &'static str,
    pub memory_mode: bool,
    pub buffer_size: u64,
    pub vector_loaded: bool,
    pub vector_size: usize,
}

impl SearcherCache {
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(None),
        }
    }

    /// Return a searcher for `(path, mode)`, opening one if needed.
    ///
    /// File mode always opens a fresh uncached searcher. For vector and
    /// memory modes the cached searcher is reused on a key match; a miss
    /// opens a new searcher and evicts whatever was cached.
    pub fn get_or_open(&self, path: &Path, mode: SearchMode) -> Result<Arc<Searcher>> {
        if mode == SearchMode::File {
            return Ok(Arc::new(Searcher::open_file(path)?));
        }

        {
            let slot = self.slot.read();
            if let Some(entry) = slot.as_ref() {
                if entry.path == path && entry.mode == mode {
                    return Ok(entry.searcher.clone());
                }
            }
        }

        let mut slot = self.slot.write();
        // double-checked: another caller may have filled the slot
        if let Some(entry) = slot.as_ref() {
            if entry.path == path && entry.mode == mode {
                return Ok(entry.searcher.clone());
            }
        }

        let searcher = Arc::new(Searcher::open(path, mode)?);
        if let Some(old) = slot.take() {
            log::info!(
                "replacing cached {} searcher for {}",
                old.mode.as_str(),
                old.path.display()
            );
        }
        *slot = Some(CacheEntry {
            path: path.to_path_buf(),
            mode,
            searcher: searcher.clone(),
        });

        log::info!(
            "cached {} searcher for {}",
            mode.as_str(),
            path.display()
        );
        Ok(searcher)
    }

    /// Load (or reuse) a cached searcher and report its status.
    pub fn load(&self, path: &Path, mode: SearchMode) -> Result<CacheStatus> {
        let searcher = self.get_or_open(path, mode)?;
        Ok(CacheStatus {
            path: path.display().to_string(),
            mode: mode.as_str(),
            memory_mode: searcher.is_memory_mode(),
            buffer_size: searcher.content_buffer_size(),
            vector_loaded: searcher.is_vector_index_loaded(),
            vector_size: searcher.vector_index_size(),
        })
    }

    /// Drop the cached searcher, if any. Returns whether one was cached.
    pub fn unload(&self) -> bool {
        let evicted = self.slot.write().take();
        if let Some(entry) = &evicted {
            log::info!("unloaded cached searcher for {}", entry.path.display());
        }
        evicted.is_some()
    }

    /// Status of the cached searcher, or `None` when the slot is empty.
    pub fn status(&self) -> Option<CacheStatus> {
        let slot = self.slot.read();
        slot.as_ref().map(|entry| CacheStatus {
            path: entry.path.display().to_string(),
            mode: entry.mode.as_str(),
            memory_mode: entry.searcher.is_memory_mode(),
            buffer_size: entry.searcher.content_buffer_size(),
            vector_loaded: entry.searcher.is_vector_index_loaded(),
            vector_size: entry.searcher.vector_index_size(),
        })
    }
}

impl Default for SearcherCache {
    fn default() -> Self {
        Self::new()
    }
}

static CACHE: Lazy<SearcherCache> = Lazy::new(SearcherCache::new);

/// Process-wide searcher cache.
pub fn searcher_cache() -> &'static SearcherCache {
    &CACHE
}

#[derive(Debug, Default)]
struct SearchStats {
    searches: AtomicU64,
    errors: AtomicU64,
    io_operations: AtomicU64,
}

static STATS: SearchStats = SearchStats {
    searches: AtomicU64::new(0),
    errors: AtomicU64::new(0),
    io_operations: AtomicU64::new(0),
};

/// Look up `ip_text` against `path` in the given mode, going through the
/// process-wide cache, and maintain the process search statistics.
pub fn search_with_mode(path: &Path, mode: SearchMode, ip_text: &str) -> Result<(String, usize)> {
    let searcher = searcher_cache().get_or_open(path, mode)?;

    STATS.searches.fetch_add(1, Ordering::Relaxed);
    match searcher.search_ip(ip_text) {
        Ok((region, io_count)) => {
            STATS
                .io_operations
                .fetch_add(io_count as u64, Ordering::Relaxed);
            Ok((region, io_count))
        }
        Err(e) => {
            STATS.errors.fetch_add(1, Ordering::Relaxed);
            Err(e)
        }
    }
}

/// Process search statistics: `(searches, errors, io_operations)`.
pub fn search_stats() -> (u64, u64, u64) {
    (
        STATS.searches.load(Ordering::Relaxed),
        STATS.errors.load(Ordering::Relaxed),
        STATS.io_operations.load(Ordering::Relaxed),
    )
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::xdb::maker::Maker;

    fn build_xdb(dir: &TempDir) -> PathBuf {
        let src = dir.path().join("ranges.txt");
        fs::write(&src, "1.0.0.0|1.0.0.255|CN\n").unwrap();
        let dst = dir.path().join("cache.xdb");
        let mut maker = Maker::new(&src, &dst).unwrap();
        maker.init().unwrap();
        maker.start().unwrap();
        maker.finish().unwrap();
        dst
    }

    #[test]
    fn test_file_mode_bypasses_the_cache() {
        let dir = TempDir::new().unwrap();
        let xdb = build_xdb(&dir);
        let cache = SearcherCache::new();

        let a = cache.get_or_open(&xdb, SearchMode::File).unwrap();
        let b = cache.get_or_open(&xdb, SearchMode::File).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(cache.status().is_none());
    }

    #[test]
    fn test_vector_mode_is_cached_by_key() {
        let dir = TempDir::new().unwrap();
        let xdb = build_xdb(&dir);
        let cache = SearcherCache::new();

        let a = cache.get_or_open(&xdb, SearchMode::Vector).unwrap();
        let b = cache.get_or_open(&xdb, SearchMode::Vector).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let status = cache.status().unwrap();
        assert_eq!(status.mode, "vector");
        assert!(status.vector_loaded);
        assert!(!status.memory_mode);
    }

    #[test]
    fn test_mode_change_replaces_the_cached_searcher() {
        let dir = TempDir::new().unwrap();
        let xdb = build_xdb(&dir);
        let cache = SearcherCache::new();

        let vector = cache.get_or_open(&xdb, SearchMode::Vector).unwrap();
        let memory = cache.get_or_open(&xdb, SearchMode::Memory).unwrap();
        assert!(!Arc::ptr_eq(&vector, &memory));
        assert_eq!(cache.status().unwrap().mode, "memory");

        // the evicted searcher still serves in-flight lookups
        assert_eq!(vector.search(0x0100_0000).unwrap().0, "CN");
    }

    #[test]
    fn test_unload_empties_the_slot() {
        let dir = TempDir::new().unwrap();
        let xdb = build_xdb(&dir);
        let cache = SearcherCache::new();

        cache.get_or_open(&xdb, SearchMode::Memory).unwrap();
        assert!(cache.unload());
        assert!(cache.status().is_none());
        assert!(!cache.unload());
    }

    #[test]
    fn test_load_reports_status() {
        let dir = TempDir::new().unwrap();
        let xdb = build_xdb(&dir);
        let cache = SearcherCache::new();

        let status = cache.load(&xdb, SearchMode::Memory).unwrap();
        assert!(status.memory_mode);
        assert_eq!(status.buffer_size, fs::metadata(&xdb).unwrap().len());
        assert_eq!(status.vector_size, crate::xdb::format::VECTOR_LEN);
    }

    #[test]
    fn test_search_with_mode_counts_stats() {
        let dir = TempDir::new().unwrap();
        let xdb = build_xdb(&dir);

        let (searches_before, _, _) = search_stats();
        let (region, _) = search_with_mode(&xdb, SearchMode::Memory, "1.0.0.100").unwrap();
        assert_eq!(region, "CN");

        let (searches_after, _, _) = search_stats();
        assert!(searches_after > searches_before);

        assert!(search_with_mode(&xdb, SearchMode::Memory, "not-an-ip").is_err());
    }
}
