//! URL → content id cache.
//!
//! Finding a container's content id costs at least one remote range read,
//! so results are memoized per URL for the life of the process.  URLs are
//! normalized by dropping the query string (`?country=...`), which varies
//! between listings of the same file.
//!
//! The cache never evicts and never writes itself out; [`UrlIdentityCache::flush`]
//! hands a sorted snapshot to a [`CacheStore`] when the caller decides to.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::content_id::ContentId;

/// Default on-disk cache location, relative to the working directory.
pub const DEFAULT_CACHE_FILE: &str = "PkgCache.json";

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("cache file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Strip everything from the first `?`.
pub fn normalize_url(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

// ── Persistence ──────────────────────────────────────────────────────────────

/// Durable storage for cache contents.
pub trait CacheStore {
    /// Stored mapping, or an empty one if nothing was stored yet.  Values are
    /// returned unvalidated.
    fn load(&self) -> Result<BTreeMap<String, String>, CacheError>;
    fn save(&mut self, entries: &BTreeMap<String, ContentId>) -> Result<(), CacheError>;
}

/// Pretty-printed JSON object with sorted keys, one entry per line.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self { path: path.as_ref().to_owned() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CacheStore for JsonFileStore {
    fn load(&self) -> Result<BTreeMap<String, String>, CacheError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        tracing::debug!(path = %self.path.display(), "reading PKG cache");
        let text = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&text)?)
    }

    fn save(&mut self, entries: &BTreeMap<String, ContentId>) -> Result<(), CacheError> {
        tracing::debug!(path = %self.path.display(), entries = entries.len(), "saving PKG cache");
        let mut text = serde_json::to_string_pretty(entries)?;
        text.push('\n');
        fs::write(&self.path, text)?;
        Ok(())
    }
}

// ── Cache ────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone)]
pub struct UrlIdentityCache {
    entries: HashMap<String, ContentId>,
    dirty:   bool,
}

impl UrlIdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore from `store`.  An unreadable store yields an empty cache and a
    /// warning; entries whose value is not a valid content id are dropped.
    pub fn load<S: CacheStore + ?Sized>(store: &S) -> Self {
        let raw = match store.load() {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "could not restore PKG cache, starting empty");
                return Self::new();
            }
        };
        let mut entries = HashMap::with_capacity(raw.len());
        for (url, value) in raw {
            match ContentId::try_from(value) {
                Ok(id) => {
                    entries.insert(normalize_url(&url).to_owned(), id);
                }
                Err(e) => tracing::warn!(%url, error = %e, "dropping invalid cache entry"),
            }
        }
        Self { entries, dirty: false }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True once an entry was added since the cache was created or flushed.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn get(&self, url: &str) -> Option<&ContentId> {
        self.entries.get(normalize_url(url))
    }

    /// Cached id for `url`, or the result of `compute` on a miss.
    ///
    /// `compute` receives the normalized URL and runs at most once per
    /// distinct normalized URL for the life of the cache.  Its error is
    /// returned as-is and nothing is stored.
    pub fn get_or_compute<E, F>(&mut self, url: &str, compute: F) -> Result<ContentId, E>
    where
        F: FnOnce(&str) -> Result<ContentId, E>,
    {
        let key = normalize_url(url);
        if let Some(id) = self.entries.get(key) {
            return Ok(id.clone());
        }
        let id = compute(key)?;
        self.entries.insert(key.to_owned(), id.clone());
        self.dirty = true;
        Ok(id)
    }

    /// Sorted copy of the current contents.
    pub fn snapshot(&self) -> BTreeMap<String, ContentId> {
        self.entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    pub fn flush<S: CacheStore + ?Sized>(&mut self, store: &mut S) -> Result<(), CacheError> {
        store.save(&self.snapshot())?;
        self.dirty = false;
        Ok(())
    }
}
