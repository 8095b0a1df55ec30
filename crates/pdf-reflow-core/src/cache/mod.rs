mod file;
mod key;

pub use key::{CacheKey, normalize_text};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{AppConfig, Lang};
use crate::error::{Error, Result};

/// A stored translation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub source_text: String,
    pub translated_text: String,
    pub created_at: DateTime<Utc>,
}

/// Cache statistics for the current process
#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Persistent, content-addressed translation cache for one language pair.
///
/// Lookups take a shared read lock. `put` takes the write lock briefly.
/// `bulk_flush` is serialized by its own mutex so only one writer touches the
/// file at a time.
pub struct TranslationCache {
    path: PathBuf,
    source_lang: Lang,
    target_lang: Lang,
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    dirty: AtomicBool,
    flush_lock: Mutex<()>,
    ignore_cache: bool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TranslationCache {
    /// Open the cache file at `path`.
    ///
    /// A missing file gives an empty cache. An unreadable, corrupt or
    /// mismatched file is logged and also gives an empty cache; it will be
    /// replaced on the next flush.
    pub fn open(
        path: impl Into<PathBuf>,
        source_lang: Lang,
        target_lang: Lang,
        ignore_cache: bool,
    ) -> Self {
        let path = path.into();
        let entries = match file::read(&path, &source_lang, &target_lang) {
            Ok(entries) => {
                debug!("Loaded {} cached translations from {}", entries.len(), path.display());
                entries
            }
            Err(e) => {
                warn!("Ignoring translation cache: {e}");
                HashMap::new()
            }
        };

        if ignore_cache {
            info!("Cache lookups disabled, all fragments will be re-translated");
        }

        Self {
            path,
            source_lang,
            target_lang,
            entries: RwLock::new(entries),
            dirty: AtomicBool::new(false),
            flush_lock: Mutex::new(()),
            ignore_cache,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Open the cache configured in `config`, falling back to the default location
    pub fn from_config(config: &AppConfig) -> Self {
        let path = config.cache.path.clone().unwrap_or_else(|| {
            crate::util::translation_cache_path(&config.source_lang, &config.target_lang)
        });
        Self::open(
            path,
            config.source_lang.clone(),
            config.target_lang.clone(),
            config.cache.ignore_cache,
        )
    }

    /// Translated text for `key`. Always `None` when lookups are disabled.
    pub fn lookup(&self, key: &CacheKey) -> Option<String> {
        if self.ignore_cache {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = entries.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            Some(entry.translated_text.clone())
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Store a translation.
    ///
    /// Re-storing the same translation changes nothing. A different
    /// translation for an existing key replaces it.
    pub fn put(&self, key: CacheKey, source_text: &str, translated_text: &str) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = entries.get(&key) {
            if existing.translated_text == translated_text {
                return;
            }
            warn!(
                "Replacing cached translation for key {} ({:?} -> {:?})",
                key, existing.translated_text, translated_text
            );
        }

        entries.insert(
            key,
            CacheEntry {
                source_text: normalize_text(source_text),
                translated_text: translated_text.to_string(),
                created_at: Utc::now(),
            },
        );
        self.dirty.store(true, Ordering::Release);
    }

    /// Persist all entries if anything changed since the last successful flush.
    pub fn bulk_flush(&self) -> Result<()> {
        let _guard = self.flush_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let snapshot = {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            // puts need the write lock, so none can slip between this and the snapshot
            if !self.dirty.swap(false, Ordering::AcqRel) {
                return Ok(());
            }
            entries.clone()
        };

        if let Err(e) = file::write_atomic(&self.path, &self.source_lang, &self.target_lang, &snapshot) {
            self.dirty.store(true, Ordering::Release);
            return Err(e);
        }

        debug!("Flushed {} translations to {}", snapshot.len(), self.path.display());
        Ok(())
    }

    /// Whether unflushed changes exist
    #[cfg(test)]
    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Stored entry for `key`, regardless of lookup mode
    #[cfg(test)]
    fn entry(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every entry and delete the cache file
    pub fn clear(&self) -> Result<usize> {
        let _guard = self.flush_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let count = entries.len();
        entries.clear();
        self.dirty.store(false, Ordering::Release);

        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::CacheWrite(format!("{}: {e}", self.path.display()))),
        }
        Ok(count)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

impl std::fmt::Debug for TranslationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslationCache")
            .field("path", &self.path)
            .field("entries", &self.len())
            .field("ignore_cache", &self.ignore_cache)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn open(path: &Path) -> TranslationCache {
        TranslationCache::open(path, Lang::new("en"), Lang::new("ru"), false)
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(&dir.path().join("none.json"));
        assert!(cache.is_empty());
        assert!(!cache.is_dirty());
    }

    #[test]
    fn test_put_lookup_flush_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let cache = open(&path);
        let key = CacheKey::from_text("Hello world");
        assert_eq!(cache.lookup(&key), None);

        cache.put(key.clone(), "Hello world", "Привет мир");
        assert_eq!(cache.lookup(&key).as_deref(), Some("Привет мир"));
        assert!(cache.is_dirty());

        cache.bulk_flush().unwrap();
        assert!(!cache.is_dirty());

        let reopened = open(&path);
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.lookup(&key).as_deref(), Some("Привет мир"));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_identical_put_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(&dir.path().join("cache.json"));
        let key = CacheKey::from_text("Figure 1");

        cache.put(key.clone(), "Figure 1", "Рисунок 1");
        let first = cache.entry(&key).unwrap();
        cache.bulk_flush().unwrap();

        cache.put(key.clone(), "Figure 1", "Рисунок 1");
        assert!(!cache.is_dirty());
        assert_eq!(cache.entry(&key).unwrap().created_at, first.created_at);
    }

    #[test]
    fn test_conflicting_put_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(&dir.path().join("cache.json"));
        let key = CacheKey::from_text("Table");

        cache.put(key.clone(), "Table", "Стол");
        cache.put(key.clone(), "Table", "Таблица");
        assert_eq!(cache.lookup(&key).as_deref(), Some("Таблица"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_flush_without_changes_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let cache = open(&path);
        cache.bulk_flush().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_corrupt_file_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, b"{\"version\": 1, \"entries\": [truncated").unwrap();

        let cache = open(&path);
        assert!(cache.is_empty());

        cache.put(CacheKey::from_text("Results"), "Results", "Результаты");
        cache.bulk_flush().unwrap();
        assert_eq!(open(&path).len(), 1);
    }

    #[test]
    fn test_other_language_pair_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let cache = open(&path);
        cache.put(CacheKey::from_text("Results"), "Results", "Результаты");
        cache.bulk_flush().unwrap();

        let german = TranslationCache::open(&path, Lang::new("en"), Lang::new("de"), false);
        assert!(german.is_empty());
    }

    #[test]
    fn test_ignore_cache_bypasses_lookup_but_stores() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let key = CacheKey::from_text("Results");

        let cache = open(&path);
        cache.put(key.clone(), "Results", "Результаты");
        cache.bulk_flush().unwrap();

        let bypass = TranslationCache::open(&path, Lang::new("en"), Lang::new("ru"), true);
        assert!(bypass.contains(&key));
        assert_eq!(bypass.lookup(&key), None);

        bypass.put(key.clone(), "Results", "Итоги");
        bypass.bulk_flush().unwrap();
        assert_eq!(open(&path).lookup(&key).as_deref(), Some("Итоги"));
    }

    #[test]
    fn test_failed_flush_keeps_dirty_and_old_file() {
        let dir = tempfile::tempdir().unwrap();
        // a directory where the file should be makes the rename fail
        let path = dir.path().join("cache.json");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("keep"), b"x").unwrap();

        let cache = open(&path);
        cache.put(CacheKey::from_text("Results"), "Results", "Результаты");
        assert!(cache.bulk_flush().is_err());
        assert!(cache.is_dirty());
        assert!(path.join("keep").exists());
    }

    #[test]
    fn test_flush_output_is_sorted_and_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let cache = open(&path);
        for text in ["gamma ray", "alpha beta", "delta wave", "beta test"] {
            cache.put(CacheKey::from_text(text), text, &text.to_uppercase());
        }
        cache.bulk_flush().unwrap();
        let first = std::fs::read(&path).unwrap();

        // reload and force a rewrite of identical content
        let reopened = open(&path);
        for text in ["gamma ray", "alpha beta", "delta wave", "beta test"] {
            let entry = reopened.entry(&CacheKey::from_text(text)).unwrap();
            assert_eq!(entry.translated_text, text.to_uppercase());
        }
        reopened.dirty.store(true, Ordering::Release);
        reopened.bulk_flush().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), first);
    }

    #[test]
    fn test_concurrent_puts_and_lookups() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(open(&dir.path().join("cache.json")));

        std::thread::scope(|s| {
            for t in 0..4 {
                let cache = Arc::clone(&cache);
                s.spawn(move || {
                    for i in 0..50 {
                        let text = format!("sentence number {i} from worker {t}");
                        let key = CacheKey::from_text(&text);
                        cache.put(key.clone(), &text, &text.to_uppercase());
                        assert!(cache.lookup(&key).is_some());
                    }
                });
            }
        });

        assert_eq!(cache.len(), 200);
        cache.bulk_flush().unwrap();
    }

    #[test]
    fn test_clear_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let cache = open(&path);
        cache.put(CacheKey::from_text("Results"), "Results", "Результаты");
        cache.bulk_flush().unwrap();

        assert_eq!(cache.clear().unwrap(), 1);
        assert!(cache.is_empty());
        assert!(!path.exists());
    }
}
