//! Memoization of detection runs keyed on filesystem state.
//!
//! The key folds in the modification time of every file that a heavy
//! (weight >= 0.5) signal looks at, so editing one of those files
//! produces a new key and the stale entry simply ages out. Entries also
//! expire after a fixed TTL regardless of file state.

use futures_util::future::join_all;
use log::*;
use lru::LruCache;
use std::{
    collections::BTreeSet,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    time::{Duration, Instant, UNIX_EPOCH},
};
use tokio::sync::Mutex;

use crate::{
    catalog::TargetDefinition,
    detection::{signals::Sampling, types::DetectionResult},
    fs::FileSystem,
};

/// Maximum number of cached runs.
pub const DEFAULT_CACHE_CAPACITY: usize = 100;

/// Lifetime of a cached run.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Signals at or above this weight contribute their files to the key.
pub const CACHE_KEY_MIN_WEIGHT: f64 = 0.5;

const ABSENT: &str = "absent";

#[derive(Debug, Clone)]
struct CacheEntry {
    data: Vec<DetectionResult>,
    timestamp: Instant,
}

/// LRU store of scored, ranked detection results.
#[derive(Debug)]
pub struct DetectionCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    ttl: Duration,
}

impl Default for DetectionCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectionCache {
    /// Cache with the default capacity (100) and TTL (5 minutes).
    pub fn new() -> Self {
        Self::with_settings(DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL)
    }

    pub fn with_settings(capacity: usize, ttl: Duration) -> Self {
        let capacity =
            NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Live entry for `key`, promoted to most recently used. Expired
    /// entries are dropped and reported as a miss.
    pub async fn get(&self, key: &str) -> Option<Vec<DetectionResult>> {
        let mut entries = self.entries.lock().await;

        let expired = match entries.get(key) {
            Some(entry) if entry.timestamp.elapsed() < self.ttl => {
                return Some(entry.data.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            debug!("cache entry {key} expired");
            entries.pop(key);
        }

        None
    }

    /// Store `data` under `key`, evicting the least recently used entry
    /// when full.
    pub async fn insert(&self, key: String, data: Vec<DetectionResult>) {
        let mut entries = self.entries.lock().await;
        let entry = CacheEntry {
            data,
            timestamp: Instant::now(),
        };

        if let Some((evicted, _)) = entries.push(key.clone(), entry)
            && evicted != key
        {
            debug!("evicted cache entry {evicted}");
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }
}

/// Derive the cache key for a run over `targets` rooted at `root`.
///
/// Glob-selected files are expanded with the same bounds the evaluators
/// use, so adding or editing one changes the key. Missing files
/// contribute an "absent" marker instead of failing.
pub async fn cache_key(
    fs: &dyn FileSystem,
    root: &Path,
    targets: &[&TargetDefinition],
    sampling: Sampling,
) -> String {
    let watched = join_all(
        targets
            .iter()
            .flat_map(|t| t.signals.iter())
            .filter(|s| s.weight >= CACHE_KEY_MIN_WEIGHT)
            .map(|s| s.probe.watched_files(fs, root, sampling)),
    )
    .await;

    let files: BTreeSet<PathBuf> = watched.into_iter().flatten().collect();

    let stamps = join_all(files.iter().map(|file| async move {
        let stamp = fs
            .metadata(file)
            .await
            .and_then(|stat| stat.modified)
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map(|elapsed| elapsed.as_nanos().to_string())
            .unwrap_or_else(|| ABSENT.to_string());
        let relative = file.strip_prefix(root).unwrap_or(file);
        format!("{}={stamp}", relative.display())
    }))
    .await;

    let keys: Vec<&str> = targets.iter().map(|t| t.key.as_str()).collect();

    let material = format!(
        "{}\n{}\n{}\n{}",
        root.display(),
        keys.join(","),
        files.len(),
        stamps.join("|")
    );

    format!("{:x}", md5::compute(material.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{catalog::Catalog, fs::LocalFileSystem};
    use std::{
        collections::BTreeMap,
        fs::{self, File},
        time::SystemTime,
    };
    use tempfile::TempDir;

    fn result(target: &str) -> DetectionResult {
        DetectionResult {
            target: target.into(),
            name: target.into(),
            confidence: 0.5,
            normalized_confidence: Some(1.0),
            signals: BTreeMap::new(),
            signal_count: 0,
            high_confidence: false,
            boost_multiplier: 1.0,
            manual_override: false,
        }
    }

    const SAMPLING: Sampling = Sampling {
        sample_size: 20,
        max_depth: 5,
    };

    const CATALOG: &str = r#"{"targets": {
      "docker": { "detectionSignals": {
        "configFiles": { "weight": 0.6, "files": ["Dockerfile"] },
        "directories": { "weight": 0.2, "paths": ["docker"] }
      }}
    }}"#;

    #[tokio::test]
    async fn evicts_least_recently_used() {
        let cache = DetectionCache::with_settings(2, DEFAULT_CACHE_TTL);
        cache.insert("a".into(), vec![result("a")]).await;
        cache.insert("b".into(), vec![result("b")]).await;

        // Touch "a" so "b" becomes the eviction candidate.
        assert!(cache.get("a").await.is_some());
        cache.insert("c".into(), vec![result("c")]).await;

        assert_eq!(cache.len().await, 2);
        assert!(cache.get("a").await.is_some());
        assert!(cache.get("b").await.is_none());
        assert!(cache.get("c").await.is_some());
    }

    #[tokio::test]
    async fn expired_entries_are_misses() {
        let cache = DetectionCache::with_settings(10, Duration::ZERO);
        cache.insert("a".into(), vec![result("a")]).await;

        assert!(cache.get("a").await.is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn clear_drops_everything() {
        let cache = DetectionCache::new();
        cache.insert("a".into(), vec![]).await;
        cache.clear().await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn key_is_stable_for_unchanged_tree() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("Dockerfile"), "FROM scratch").unwrap();

        let catalog = Catalog::from_json(CATALOG).unwrap();
        let targets: Vec<_> = catalog.targets().iter().collect();
        let fs = LocalFileSystem::new();

        let first = cache_key(&fs, temp.path(), &targets, SAMPLING).await;
        let second = cache_key(&fs, temp.path(), &targets, SAMPLING).await;
        assert_eq!(first, second);
        assert_eq!(first.len(), 32);
    }

    #[tokio::test]
    async fn key_changes_when_heavy_signal_file_changes() {
        let temp = TempDir::new().unwrap();
        let dockerfile = temp.path().join("Dockerfile");

        let catalog = Catalog::from_json(CATALOG).unwrap();
        let targets: Vec<_> = catalog.targets().iter().collect();
        let fs = LocalFileSystem::new();

        let absent = cache_key(&fs, temp.path(), &targets, SAMPLING).await;

        fs::write(&dockerfile, "FROM scratch").unwrap();
        let created = cache_key(&fs, temp.path(), &targets, SAMPLING).await;
        assert_ne!(absent, created);

        File::options()
            .write(true)
            .open(&dockerfile)
            .unwrap()
            .set_modified(SystemTime::now() + Duration::from_secs(60))
            .unwrap();
        let touched = cache_key(&fs, temp.path(), &targets, SAMPLING).await;
        assert_ne!(created, touched);
    }

    #[tokio::test]
    async fn light_signal_files_do_not_affect_key() {
        let temp = TempDir::new().unwrap();

        let catalog = Catalog::from_json(CATALOG).unwrap();
        let targets: Vec<_> = catalog.targets().iter().collect();
        let fs = LocalFileSystem::new();

        let before = cache_key(&fs, temp.path(), &targets, SAMPLING).await;
        fs::create_dir(temp.path().join("docker")).unwrap();
        let after = cache_key(&fs, temp.path(), &targets, SAMPLING).await;

        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn key_tracks_glob_selected_files() {
        let temp = TempDir::new().unwrap();
        let json = r#"{"targets": {
          "terraform": { "detectionSignals": {
            "configFiles": { "weight": 1.0, "files": ["**/*.tf"] }
          }}
        }}"#;
        let catalog = Catalog::from_json(json).unwrap();
        let targets: Vec<_> = catalog.targets().iter().collect();
        let fs = LocalFileSystem::new();

        let empty = cache_key(&fs, temp.path(), &targets, SAMPLING).await;

        let main_tf = temp.path().join("infra/main.tf");
        fs::create_dir_all(temp.path().join("infra")).unwrap();
        fs::write(&main_tf, "terraform {}").unwrap();
        let added = cache_key(&fs, temp.path(), &targets, SAMPLING).await;
        assert_ne!(empty, added);

        File::options()
            .write(true)
            .open(&main_tf)
            .unwrap()
            .set_modified(SystemTime::now() + Duration::from_secs(60))
            .unwrap();
        let edited = cache_key(&fs, temp.path(), &targets, SAMPLING).await;
        assert_ne!(added, edited);
    }
}
