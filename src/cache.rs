//! File cache with LRU eviction, per-entry TTL, and size/entry caps.
//!
//! URI paths are resolved against a canonical root before any filesystem
//! access; a resolved path that escapes the root (via `..` components or
//! symlinks) is rejected. Lookups memoize both successful reads and
//! `NotFound` results, so repeated requests for a missing file do not hit
//! the filesystem either. I/O errors are surfaced but never cached.
//!
//! The cache is not thread-safe. All tasks share one cooperative executor,
//! so accesses are serialised; a multi-threaded server would have to wrap it
//! in a mutex or shard it.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant, SystemTime};

use bytes::Bytes;
use hashlink::LruCache;

use crate::http::mime;

pub const MAX_CACHE_ENTRIES: usize = 1024;
pub const MAX_CACHE_SIZE: usize = 1024 * 1024 * 1024;
pub const MAX_CACHED_FILE_SIZE: usize = 128 * 1024 * 1024;
pub const MAX_ENTRY_LIFETIME: Duration = Duration::from_secs(5 * 60);

/// A file read into memory, ready to be served.
#[derive(Debug)]
pub struct File {
    pub contents: Bytes,
    pub last_write: SystemTime,
    pub mime_type: &'static str,
    pub path: PathBuf,
}

impl File {
    /// Placeholder carried by negative cache entries.
    fn empty(path: PathBuf) -> Self {
        Self {
            contents: Bytes::new(),
            last_write: SystemTime::UNIX_EPOCH,
            mime_type: mime::DEFAULT_MIME_TYPE,
            path,
        }
    }
}

/// Why a lookup failed. Maps to 400, 404 and 500 respectively.
#[derive(Debug)]
pub enum FileError {
    /// The URI path is malformed or escapes the served root
    InvalidUri,
    /// Nothing exists at the resolved path
    NotFound,
    /// The filesystem reported an error; never cached
    Io(io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryStatus {
    Ok,
    InvalidUri,
    NotFound,
}

struct Entry {
    status: EntryStatus,
    file: Rc<File>,
    last_accessed: Instant,
}

impl Entry {
    fn result(&self) -> Result<Rc<File>, FileError> {
        match self.status {
            EntryStatus::Ok => Ok(Rc::clone(&self.file)),
            EntryStatus::InvalidUri => Err(FileError::InvalidUri),
            EntryStatus::NotFound => Err(FileError::NotFound),
        }
    }
}

/// Cache caps; the defaults match production use, tests shrink them.
#[derive(Debug, Clone, Copy)]
pub struct CacheLimits {
    pub max_entries: usize,
    pub max_size: usize,
    pub max_file_size: usize,
    pub entry_lifetime: Duration,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            max_entries: MAX_CACHE_ENTRIES,
            max_size: MAX_CACHE_SIZE,
            max_file_size: MAX_CACHED_FILE_SIZE,
            entry_lifetime: MAX_ENTRY_LIFETIME,
        }
    }
}

/// LRU map from canonical filesystem path to cached lookup result.
pub struct FileCache {
    root: PathBuf,
    entries: LruCache<PathBuf, Entry>,
    cache_size: usize,
    limits: CacheLimits,
}

impl FileCache {
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        Self::with_limits(root, CacheLimits::default())
    }

    pub fn with_limits(root: impl AsRef<Path>, limits: CacheLimits) -> io::Result<Self> {
        let root = root.as_ref();
        let absolute = if root.is_absolute() {
            root.to_path_buf()
        } else {
            std::env::current_dir()?.join(root)
        };
        // A root that does not exist yet cannot be canonicalised; keep its
        // lexically normalised form so the server still starts.
        let root = fs::canonicalize(&absolute).unwrap_or_else(|_| normalize_lexically(&absolute));

        Ok(Self {
            root,
            entries: LruCache::new_unbounded(),
            cache_size: 0,
            limits,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total bytes held by cached files.
    pub fn cached_bytes(&self) -> usize {
        self.cache_size
    }

    /// Whether a canonical path currently has a cache entry.
    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    /// Maps a URI path onto the filesystem and verifies it stays under the
    /// root. The containment check runs on the canonicalised result; doing
    /// it on the raw path would let `..` and symlinks slip through.
    pub fn resolve(&self, uri_path: &str) -> Result<PathBuf, FileError> {
        if !uri_path.starts_with('/') {
            return Err(FileError::InvalidUri);
        }

        let joined = self.root.join(&uri_path[1..]);
        let resolved = weakly_canonicalize(&joined).map_err(FileError::Io)?;

        if !resolved.starts_with(&self.root) {
            return Err(FileError::InvalidUri);
        }
        Ok(resolved)
    }

    /// Resolves the URI and returns the cached result for it, reading the
    /// file on a miss or after the entry's lifetime ran out.
    pub fn get_or_read(&mut self, uri_path: &str) -> Result<Rc<File>, FileError> {
        let path = self.resolve(uri_path)?;

        let mut expired = false;
        if let Some(entry) = self.entries.get_mut(&path) {
            if entry.last_accessed.elapsed() > self.limits.entry_lifetime {
                expired = true;
            } else {
                // get_mut already moved the entry to the recent end.
                entry.last_accessed = Instant::now();
                return entry.result();
            }
        }
        if expired {
            if let Some(entry) = self.entries.remove(&path) {
                self.cache_size -= entry.file.contents.len();
            }
        }

        let entry = match read_file_contents(&path) {
            Ok(file) => {
                if file.contents.len() > self.limits.max_file_size {
                    // Serve it, but do not let one file flush the cache.
                    return Ok(Rc::new(file));
                }
                Entry {
                    status: EntryStatus::Ok,
                    file: Rc::new(file),
                    last_accessed: Instant::now(),
                }
            }
            Err(FileError::Io(e)) => return Err(FileError::Io(e)),
            Err(FileError::NotFound) => Entry {
                status: EntryStatus::NotFound,
                file: Rc::new(File::empty(path.clone())),
                last_accessed: Instant::now(),
            },
            Err(FileError::InvalidUri) => Entry {
                status: EntryStatus::InvalidUri,
                file: Rc::new(File::empty(path.clone())),
                last_accessed: Instant::now(),
            },
        };

        self.cache_size += entry.file.contents.len();
        let result = entry.result();
        self.entries.insert(path, entry);
        self.trim();

        result
    }

    /// Evicts least-recently-used entries until both caps hold.
    fn trim(&mut self) {
        while self.cache_size > self.limits.max_size || self.entries.len() > self.limits.max_entries
        {
            let Some((_, entry)) = self.entries.remove_lru() else {
                break;
            };
            self.cache_size -= entry.file.contents.len();
        }
    }
}

/// Reads a file for serving: modification time, contents, MIME type.
pub fn read_file_contents(path: &Path) -> Result<File, FileError> {
    let metadata = match fs::metadata(path) {
        Ok(m) => m,
        // A file component in the middle of the path means there is nothing
        // at the full path either.
        Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::NotADirectory) => {
            return Err(FileError::NotFound)
        }
        Err(e) => return Err(FileError::Io(e)),
    };

    let last_write = metadata.modified().map_err(FileError::Io)?;
    let contents = fs::read(path).map_err(FileError::Io)?;

    Ok(File {
        contents: Bytes::from(contents),
        last_write,
        mime_type: mime::mime_type(path),
        path: path.to_path_buf(),
    })
}

/// Canonicalises as many leading components as exist on disk, then appends
/// the remainder lexically normalised. Missing files thus still resolve to a
/// predictable absolute path.
fn weakly_canonicalize(path: &Path) -> io::Result<PathBuf> {
    let components: Vec<Component> = path.components().collect();

    for split in (0..=components.len()).rev() {
        let prefix: PathBuf = components[..split].iter().collect();
        if prefix.as_os_str().is_empty() {
            break;
        }

        match fs::canonicalize(&prefix) {
            Ok(resolved) => {
                let mut full = resolved;
                for component in &components[split..] {
                    full.push(component);
                }
                return Ok(normalize_lexically(&full));
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::NotADirectory) =>
            {
                continue;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(normalize_lexically(path))
}

/// Removes `.` components and resolves `..` against the preceding component,
/// without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}
