use std::fs;
use std::fs::OpenOptions;
use std::io::Write;
use std::num::NonZeroUsize;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use lru::LruCache;
use parking_lot::Mutex;
use crate::core::error::{Error, ErrorKind, Result};

/// Cached file contents keyed by on-disk length so that appends to a file
/// invalidate stale copies on the next pin.
struct CachedFile {
    len: u64,
    bytes: Arc<Vec<u8>>,
}

/// Opaque page cache over column and posting files.
///
/// The catalog never owns bytes; readers request pinned byte regions here
/// and writers append through `append`. Eviction is LRU over whole files.
pub struct BufferManager {
    cache: Mutex<LruCache<PathBuf, CachedFile>>,
}

/// A pinned byte region. Holds a reference to the cached file bytes, so the
/// region stays valid while the pin is alive even if the cache evicts.
pub struct Pin {
    bytes: Arc<Vec<u8>>,
    offset: usize,
    len: usize,
}

impl Deref for Pin {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes[self.offset..self.offset + self.len]
    }
}

impl BufferManager {
    pub fn new(capacity_files: usize) -> Self {
        let cap = NonZeroUsize::new(capacity_files.max(1)).unwrap();
        BufferManager {
            cache: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Pin `len` bytes of `path` starting at `offset`.
    pub fn pin(&self, path: &Path, offset: u64, len: usize) -> Result<Pin> {
        let bytes = self.load(path)?;
        let offset = offset as usize;
        if offset + len > bytes.len() {
            return Err(Error::new(
                ErrorKind::Io,
                format!(
                    "pin out of range: {} [{}, {}) of {}",
                    path.display(),
                    offset,
                    offset + len,
                    bytes.len()
                ),
            ));
        }
        Ok(Pin { bytes, offset, len })
    }

    /// Write bytes at a fixed offset. Replay re-issues writes at the same
    /// offsets it computed originally, so overwrites are byte-identical and
    /// stray tail bytes from a pre-crash write get clobbered or ignored.
    pub fn write_at(&self, path: &Path, offset: u64, data: &[u8]) -> Result<()> {
        use std::io::{Seek, SeekFrom};

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).write(true).open(path)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        file.sync_data()?;

        self.cache.lock().pop(&path.to_path_buf());
        Ok(())
    }

    fn load(&self, path: &Path) -> Result<Arc<Vec<u8>>> {
        let len = fs::metadata(path)?.len();
        {
            let mut cache = self.cache.lock();
            if let Some(cached) = cache.get(&path.to_path_buf()) {
                if cached.len == len {
                    return Ok(cached.bytes.clone());
                }
            }
        }

        let bytes = Arc::new(fs::read(path)?);
        let mut cache = self.cache.lock();
        cache.put(
            path.to_path_buf(),
            CachedFile { len, bytes: bytes.clone() },
        );
        Ok(bytes)
    }
}

/// Session-scoped memory accountant for posting materialization.
///
/// Lifetimes are scoped to one query: iterators charge decoded posting
/// bytes on construction and the whole pool drops with the session.
pub struct SessionPool {
    pub used: AtomicUsize,
    pub limit: usize,
}

impl SessionPool {
    pub fn new(limit: usize) -> Self {
        SessionPool {
            used: AtomicUsize::new(0),
            limit,
        }
    }

    pub fn charge(&self, size: usize) -> Result<()> {
        let new_used = self.used.fetch_add(size, Ordering::SeqCst) + size;
        if new_used > self.limit {
            self.used.fetch_sub(size, Ordering::SeqCst);
            return Err(Error::new(
                ErrorKind::OutOfMemory,
                format!("session memory limit exceeded: {} > {}", new_used, self.limit),
            ));
        }
        Ok(())
    }

    pub fn release(&self, size: usize) {
        self.used.fetch_sub(size, Ordering::SeqCst);
    }

    pub fn current_usage(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn pins_reflect_fixed_offset_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blk").join("col0");
        let buffer = BufferManager::new(4);

        buffer.write_at(&path, 0, b"hello").unwrap();
        buffer.write_at(&path, 5, b"world").unwrap();
        let pin = buffer.pin(&path, 5, 5).unwrap();
        assert_eq!(&*pin, b"world");

        // overwrite at the same offset is visible on the next pin
        buffer.write_at(&path, 5, b"earth").unwrap();
        let pin = buffer.pin(&path, 0, 10).unwrap();
        assert_eq!(&*pin, b"helloearth");

        assert!(buffer.pin(&path, 8, 10).is_err());
    }

    #[test]
    fn session_pool_enforces_limit() {
        let pool = SessionPool::new(100);
        pool.charge(60).unwrap();
        assert!(pool.charge(50).is_err());
        pool.release(60);
        pool.charge(50).unwrap();
        assert_eq!(pool.current_usage(), 50);
    }
}
