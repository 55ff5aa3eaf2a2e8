//! # Cache store
//!
//! Persistent nested key-value store addressed by hierarchical paths such as
//! `incident / station / record-key / field`.
//!
//! ## Layout
//!
//! ```text
//!   <root>/
//!     LOCK                      single-writer guard
//!     EQ100/                    container (directory)
//!       S1/
//!         3fa4…/
//!           record.json         value
//!           spectra/
//!             91c2….json
//! ```
//!
//! Segments are escaped so that any string is a valid segment and no escaped
//! name contains a `.`; a value is stored as `<segment>.json`, so values and
//! containers never collide. Each write lands in a temporary file that is
//! renamed into place, so a reader sees either the old or the new value.

use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use lru::LruCache;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

const LOCK_FILE: &str = "LOCK";
const VALUE_SUFFIX: &str = ".json";
const TEMP_SUFFIX: &str = ".json.tmp";

// ---------------------------------------------------------------------------
// Segment escaping
// ---------------------------------------------------------------------------

/// Escape a path segment: ASCII alphanumerics, `-` and `_` are kept, every
/// other byte becomes `%XX`.
fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn decode_segment(encoded: &str) -> String {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(b) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn display_path(path: &[&str]) -> String {
    path.join("/")
}

// ---------------------------------------------------------------------------
// In-memory read cache
// ---------------------------------------------------------------------------

/// Bounded LRU of decoded JSON values keyed by escaped path. Purely a read
/// accelerator: the directory tree stays authoritative. `None` when the
/// configured capacity is zero.
#[derive(Debug)]
struct MemoryCache {
    lru: Option<LruCache<String, serde_json::Value>>,
}

impl MemoryCache {
    fn new(capacity: usize) -> Self {
        MemoryCache {
            lru: NonZeroUsize::new(capacity).map(LruCache::new),
        }
    }

    fn get(&mut self, key: &str) -> Option<serde_json::Value> {
        self.lru.as_mut()?.get(key).cloned()
    }

    fn insert(&mut self, key: String, value: serde_json::Value) {
        if let Some(lru) = self.lru.as_mut() {
            lru.put(key, value);
        }
    }

    /// Drop `key` and everything stored beneath it.
    fn remove_prefix(&mut self, key: &str) {
        let Some(lru) = self.lru.as_mut() else {
            return;
        };
        let nested = format!("{key}/");
        let doomed: Vec<String> = lru
            .iter()
            .map(|(k, _)| k)
            .filter(|k| k.as_str() == key || k.starts_with(&nested))
            .cloned()
            .collect();
        for k in doomed {
            lru.pop(&k);
        }
    }
}

// ---------------------------------------------------------------------------
// CacheStore
// ---------------------------------------------------------------------------

/// Directory-backed hierarchical store. One writer per directory; all
/// operations on an instance are serialized by a single mutex.
#[derive(Debug)]
pub struct CacheStore {
    root: PathBuf,
    lock_path: PathBuf,
    memory: Mutex<MemoryCache>,
}

impl CacheStore {
    /// Open (creating if needed) the store rooted at `root`.
    ///
    /// Fails with [`Error::StoreLocked`] when another live handle owns the
    /// directory. A lock left behind by a crashed process must be removed by
    /// hand.
    pub fn open(root: impl AsRef<Path>, memory_cache_entries: usize) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .map_err(|e| Error::io(format!("creating store {}", root.display()), e))?;

        let lock_path = root.join(LOCK_FILE);
        match OpenOptions::new().write(true).create_new(true).open(&lock_path) {
            Ok(mut file) => {
                // The pid is informational only.
                let _ = writeln!(file, "{}", std::process::id());
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                warn!("store {} is already locked ({})", root.display(), lock_path.display());
                return Err(Error::StoreLocked { path: root });
            }
            Err(e) => return Err(Error::io(format!("locking store {}", root.display()), e)),
        }

        debug!("opened store {}", root.display());
        Ok(CacheStore {
            root,
            lock_path,
            memory: Mutex::new(MemoryCache::new(memory_cache_entries)),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Split a value path into its parent containers and final segment.
    fn check<'p, 'a>(path: &'p [&'a str]) -> Result<(&'a str, &'p [&'a str])> {
        if let Some(pos) = path.iter().position(|s| s.is_empty()) {
            return Err(Error::InvalidMetadata {
                subject: format!("store path '{}'", display_path(path)),
                reason: format!("segment {pos} is empty"),
            });
        }
        match path.split_last() {
            Some((last, parents)) => Ok((*last, parents)),
            None => Err(Error::InvalidMetadata {
                subject: "store path".to_string(),
                reason: "path must have at least one segment".to_string(),
            }),
        }
    }

    /// Directory for a container path (may be empty = root).
    fn container_dir(&self, path: &[&str]) -> PathBuf {
        let mut dir = self.root.clone();
        for segment in path {
            dir.push(encode_segment(segment));
        }
        dir
    }

    fn value_file(&self, path: &[&str]) -> Result<PathBuf> {
        let (last, parents) = Self::check(path)?;
        Ok(self
            .container_dir(parents)
            .join(format!("{}{VALUE_SUFFIX}", encode_segment(last))))
    }

    fn memory_key(path: &[&str]) -> String {
        path.iter().map(|s| encode_segment(s)).collect::<Vec<_>>().join("/")
    }

    /// Read and decode the value at `path`; [`Error::NotFound`] if absent.
    pub fn get<T: DeserializeOwned>(&self, path: &[&str]) -> Result<T> {
        let file = self.value_file(path)?;
        let mut memory = self.memory.lock();
        let key = Self::memory_key(path);

        let value = match memory.get(&key) {
            Some(value) => value,
            None => {
                let bytes = match fs::read(&file) {
                    Ok(bytes) => bytes,
                    Err(e) if e.kind() == ErrorKind::NotFound => {
                        return Err(Error::NotFound {
                            path: display_path(path),
                        })
                    }
                    Err(e) => return Err(Error::io(format!("reading {}", display_path(path)), e)),
                };
                let value: serde_json::Value = serde_json::from_slice(&bytes)
                    .map_err(|e| Error::serialization(format!("decoding {}", display_path(path)), e))?;
                memory.insert(key, value.clone());
                value
            }
        };
        serde_json::from_value(value)
            .map_err(|e| Error::serialization(format!("decoding {}", display_path(path)), e))
    }

    /// Store `value` at `path`, replacing any previous value. Visible to every
    /// later `get` as soon as this returns.
    pub fn set<T: Serialize + ?Sized>(&self, path: &[&str], value: &T) -> Result<()> {
        let file = self.value_file(path)?;
        let json = serde_json::to_value(value)
            .map_err(|e| Error::serialization(format!("encoding {}", display_path(path)), e))?;
        let bytes = serde_json::to_vec(&json)
            .map_err(|e| Error::serialization(format!("encoding {}", display_path(path)), e))?;

        let mut memory = self.memory.lock();
        let dir = file.parent().map(Path::to_path_buf).unwrap_or_else(|| self.root.clone());
        fs::create_dir_all(&dir)
            .map_err(|e| Error::io(format!("creating container for {}", display_path(path)), e))?;

        let tmp = file.with_extension(&TEMP_SUFFIX[1..]);
        fs::write(&tmp, &bytes)
            .map_err(|e| Error::io(format!("writing {}", display_path(path)), e))?;
        fs::rename(&tmp, &file).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            Error::io(format!("committing {}", display_path(path)), e)
        })?;

        memory.insert(Self::memory_key(path), json);
        debug!("stored {} ({} bytes)", display_path(path), bytes.len());
        Ok(())
    }

    /// Whether a value is stored exactly at `path`.
    pub fn has(&self, path: &[&str]) -> bool {
        let Ok(file) = self.value_file(path) else {
            return false;
        };
        let _guard = self.memory.lock();
        file.is_file()
    }

    /// Remove the value at `path` and everything stored beneath it. Deleting
    /// something that does not exist is not an error.
    pub fn delete(&self, path: &[&str]) -> Result<()> {
        let file = self.value_file(path)?;
        let mut memory = self.memory.lock();

        match fs::remove_file(&file) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io(format!("deleting {}", display_path(path)), e)),
        }
        let dir = self.container_dir(path);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io(format!("deleting {}", display_path(path)), e)),
        }

        memory.remove_prefix(&Self::memory_key(path));
        debug!("deleted {}", display_path(path));
        Ok(())
    }

    /// Names directly beneath `prefix` (values and containers), sorted.
    /// An empty prefix lists the top level.
    pub fn children(&self, prefix: &[&str]) -> Result<Vec<String>> {
        if !prefix.is_empty() {
            Self::check(prefix)?;
        }
        let _guard = self.memory.lock();
        let dir = self.container_dir(prefix);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io(format!("listing {}", display_path(prefix)), e)),
        };

        let mut names = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(format!("listing {}", display_path(prefix)), e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if prefix.is_empty() && name == LOCK_FILE {
                continue;
            }
            if name.ends_with(TEMP_SUFFIX) {
                continue;
            }
            let file_type = entry
                .file_type()
                .map_err(|e| Error::io(format!("listing {}", display_path(prefix)), e))?;
            if file_type.is_dir() {
                names.insert(decode_segment(name));
            } else if let Some(stem) = name.strip_suffix(VALUE_SUFFIX) {
                names.insert(decode_segment(stem));
            }
        }
        Ok(names.into_iter().collect())
    }
}

impl Drop for CacheStore {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.lock_path) {
            warn!("could not release store lock {}: {e}", self.lock_path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escaping_round_trips_and_avoids_dots() {
        for raw in ["EQ100", "a/b", "..", "x.json", "día 1", "%41"] {
            let enc = encode_segment(raw);
            assert!(!enc.contains('.') && !enc.contains('/'), "{enc}");
            assert_eq!(decode_segment(&enc), raw);
        }
    }

    #[test]
    fn memory_cache_evicts_least_recent() {
        let mut cache = MemoryCache::new(2);
        cache.insert("a".into(), serde_json::json!(1));
        cache.insert("b".into(), serde_json::json!(2));
        assert!(cache.get("a").is_some());
        cache.insert("c".into(), serde_json::json!(3));
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn memory_cache_prefix_removal() {
        let mut cache = MemoryCache::new(10);
        cache.insert("a/b".into(), serde_json::json!(1));
        cache.insert("a/bc".into(), serde_json::json!(2));
        cache.insert("a/b/c".into(), serde_json::json!(3));
        cache.remove_prefix("a/b");
        assert!(cache.get("a/b").is_none());
        assert!(cache.get("a/b/c").is_none());
        assert!(cache.get("a/bc").is_some());
    }

    #[test]
    fn zero_capacity_disables_memory_cache() {
        let mut cache = MemoryCache::new(0);
        cache.insert("a".into(), serde_json::json!(1));
        assert!(cache.get("a").is_none());
    }
}
