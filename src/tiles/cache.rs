use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::core::config::CacheConfig;
use crate::core::geo::TileKey;
use crate::Result;

/// Storage strategy for fetched tile bytes.
///
/// Implementations must be safe to share between concurrent fetches.
pub trait TileCache: Send + Sync {
    /// Get the encoded tile, if present
    fn get(&self, key: &TileKey) -> Option<Vec<u8>>;

    /// Store the encoded tile
    fn put(&self, key: TileKey, data: Vec<u8>) -> Result<()>;

    /// Called once after the last render of a run
    fn finish(&self) -> Result<()> {
        Ok(())
    }

    /// Short human-readable description for logs
    fn describe(&self) -> String;
}

/// Which cache a run uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    /// In memory only, gone when the process exits
    Ephemeral,
    /// On disk, kept between runs
    Persistent,
    /// On disk during the run, deleted afterwards
    Purge,
}

impl std::str::FromStr for CacheMode {
    type Err = crate::MapError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "ephemeral" | "temp" => Ok(Self::Ephemeral),
            "persistent" | "keep" => Ok(Self::Persistent),
            "purge" | "delete" => Ok(Self::Purge),
            other => Err(crate::MapError::InvalidParameter(format!(
                "unknown cache mode '{other}'"
            ))),
        }
    }
}

/// Builds the cache selected by `config`
pub fn cache_for(config: &CacheConfig) -> Result<Arc<dyn TileCache>> {
    let cache: Arc<dyn TileCache> = match config.mode {
        CacheMode::Ephemeral => Arc::new(MemoryTileCache::new(config.memory_capacity)),
        CacheMode::Persistent => Arc::new(DiskTileCache::new(&config.root)?),
        CacheMode::Purge => Arc::new(PurgingDiskCache::new(&config.root)?),
    };
    log::info!("tile cache: {}", cache.describe());
    Ok(cache)
}

/// In-memory tile cache using LRU eviction
#[derive(Debug)]
pub struct MemoryTileCache {
    cache: Mutex<LruCache<TileKey, Arc<Vec<u8>>>>,
}

impl MemoryTileCache {
    /// Create a new tile cache with the given capacity
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1024).unwrap());
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Get the current number of cached tiles
    pub fn len(&self) -> usize {
        self.cache.lock().map(|cache| cache.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &TileKey) -> bool {
        self.cache
            .lock()
            .map(|cache| cache.contains(key))
            .unwrap_or(false)
    }
}

impl Default for MemoryTileCache {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl TileCache for MemoryTileCache {
    fn get(&self, key: &TileKey) -> Option<Vec<u8>> {
        let mut cache = self.cache.lock().ok()?;
        cache.get(key).map(|data| data.as_ref().clone())
    }

    fn put(&self, key: TileKey, data: Vec<u8>) -> Result<()> {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(key, Arc::new(data));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        let cap = self.cache.lock().map(|c| c.cap().get()).unwrap_or(0);
        format!("ephemeral (memory, {cap} tiles)")
    }
}

/// Persistent cache laid out as `<root>/<provider>/<z>_<x>_<y>.<ext>`
#[derive(Debug, Clone)]
pub struct DiskTileCache {
    root: PathBuf,
}

impl DiskTileCache {
    pub fn new(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &TileKey) -> PathBuf {
        self.root
            .join(&key.provider)
            .join(format!("{}_{}_{}.{}", key.z, key.x, key.y, key.ext))
    }
}

impl TileCache for DiskTileCache {
    fn get(&self, key: &TileKey) -> Option<Vec<u8>> {
        fs::read(self.path_for(key)).ok()
    }

    fn put(&self, key: TileKey, data: Vec<u8>) -> Result<()> {
        let path = self.path_for(&key);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        // Write-then-rename so a concurrent reader never sees half a tile
        let tmp = path.with_extension("part");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("persistent (root '{}')", self.root.display())
    }
}

/// Disk cache whose root is deleted when the run finishes
#[derive(Debug)]
pub struct PurgingDiskCache {
    inner: DiskTileCache,
}

impl PurgingDiskCache {
    pub fn new(root: &Path) -> Result<Self> {
        Ok(Self {
            inner: DiskTileCache::new(root)?,
        })
    }

    fn purge(&self) -> Result<()> {
        match fs::remove_dir_all(self.inner.root()) {
            Ok(()) => {
                log::info!("deleted cache folder {}", self.inner.root().display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl TileCache for PurgingDiskCache {
    fn get(&self, key: &TileKey) -> Option<Vec<u8>> {
        self.inner.get(key)
    }

    fn put(&self, key: TileKey, data: Vec<u8>) -> Result<()> {
        self.inner.put(key, data)
    }

    fn finish(&self) -> Result<()> {
        self.purge()
    }

    fn describe(&self) -> String {
        format!("purge (root '{}', deleted after run)", self.inner.root().display())
    }
}

impl Drop for PurgingDiskCache {
    fn drop(&mut self) {
        if let Err(e) = self.purge() {
            log::warn!("could not delete cache folder: {}", e);
        }
    }
}
