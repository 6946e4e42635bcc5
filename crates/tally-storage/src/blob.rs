//! Content-addressed blob store for artifact bytes.
//!
//! Files live at `<base>/<hh>/<hh>/<hash>` where the prefix directories are
//! taken from the SHA-256 hex digest. Writes are deduplicated on hash and
//! placed atomically: bytes go to a temp file in the target directory, then
//! rename into place, so concurrent writers of the same content are safe.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use tally_config::ArtifactStorageConfig;

use crate::error::{DatabaseCode, Result, StoreError};

/// Hash/copy chunk size.
const CHUNK_SIZE: usize = 64 * 1024;

/// Outcome of a blob write.
#[derive(Debug, Clone)]
pub struct StoredBlob {
    /// Lowercase hex SHA-256 of the content.
    pub hash: String,
    /// Content length in bytes.
    pub size: u64,
    /// Path relative to the storage root.
    pub relative_path: String,
    /// `true` when an identical blob already existed and no bytes were
    /// written.
    pub deduplicated: bool,
}

/// Aggregate numbers for the blob directory.
#[derive(Debug, Clone, Default)]
pub struct BlobStoreStats {
    pub file_count: u64,
    pub total_bytes: u64,
}

/// The content-addressed store rooted at one directory.
#[derive(Debug, Clone)]
pub struct BlobStore {
    base: PathBuf,
    max_size_bytes: u64,
    prefix_depth: usize,
    prefix_width: usize,
}

impl BlobStore {
    /// Opens (creating if missing) a store rooted at `base`.
    pub fn open(base: impl Into<PathBuf>, config: &ArtifactStorageConfig) -> Result<Self> {
        let base = base.into();
        std::fs::create_dir_all(&base).map_err(|e| {
            StoreError::db(
                DatabaseCode::StorageNotAvailable,
                format!("failed to create {}: {e}", base.display()),
            )
        })?;
        Ok(Self {
            base,
            max_size_bytes: config.max_artifact_size_mb * 1024 * 1024,
            prefix_depth: config.hash_prefix_depth as usize,
            prefix_width: config.hash_prefix_width as usize,
        })
    }

    /// The storage root.
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Computes the SHA-256 hex digest of `data` in chunks.
    pub fn hash_bytes(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        for chunk in data.chunks(CHUNK_SIZE) {
            hasher.update(chunk);
        }
        hex_digest(hasher)
    }

    /// Relative path for a hash: `<hh>/<hh>/<hash>`.
    pub fn relative_path(&self, hash: &str) -> String {
        let mut parts = Vec::with_capacity(self.prefix_depth + 1);
        for level in 0..self.prefix_depth {
            let start = level * self.prefix_width;
            let end = (start + self.prefix_width).min(hash.len());
            parts.push(&hash[start..end]);
        }
        parts.push(hash);
        parts.join("/")
    }

    /// Absolute path for a hash.
    pub fn path_for(&self, hash: &str) -> PathBuf {
        self.base.join(self.relative_path(hash))
    }

    /// Writes `data`, deduplicating on content hash.
    pub fn write(&self, data: &[u8]) -> Result<StoredBlob> {
        if data.len() as u64 > self.max_size_bytes {
            return Err(StoreError::db(
                DatabaseCode::ArtifactStorageFailed,
                format!(
                    "artifact of {} bytes exceeds the {} byte limit",
                    data.len(),
                    self.max_size_bytes
                ),
            ));
        }

        let hash = Self::hash_bytes(data);
        let target = self.path_for(&hash);

        if target.exists() {
            debug!(%hash, "blob already stored, skipping write");
            return Ok(StoredBlob {
                hash: hash.clone(),
                size: data.len() as u64,
                relative_path: self.relative_path(&hash),
                deduplicated: true,
            });
        }

        let dir = target.parent().expect("blob path has a parent");
        std::fs::create_dir_all(dir).map_err(|e| {
            StoreError::db(
                DatabaseCode::ArtifactStorageFailed,
                format!("failed to create {}: {e}", dir.display()),
            )
        })?;

        // Write to a temp file in the same directory, then atomically move
        // into place. A concurrent writer of the same hash either wins the
        // rename or we overwrite with identical bytes; both are fine.
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| {
            StoreError::db(DatabaseCode::ArtifactStorageFailed, format!("temp file: {e}"))
        })?;
        tmp.write_all(data).map_err(|e| {
            StoreError::db(DatabaseCode::ArtifactStorageFailed, format!("write: {e}"))
        })?;
        tmp.flush().map_err(|e| {
            StoreError::db(DatabaseCode::ArtifactStorageFailed, format!("flush: {e}"))
        })?;
        tmp.persist(&target).map_err(|e| {
            StoreError::db(DatabaseCode::ArtifactStorageFailed, format!("persist: {e}"))
        })?;

        debug!(%hash, size = data.len(), "stored blob");
        Ok(StoredBlob {
            hash: hash.clone(),
            size: data.len() as u64,
            relative_path: self.relative_path(&hash),
            deduplicated: false,
        })
    }

    /// Streams from `reader` into the store, hashing as it copies.
    pub fn write_stream(&self, mut reader: impl Read) -> Result<StoredBlob> {
        let dir = &self.base;
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| {
            StoreError::db(DatabaseCode::ArtifactStorageFailed, format!("temp file: {e}"))
        })?;

        let mut hasher = Sha256::new();
        let mut total: u64 = 0;
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = reader.read(&mut buf).map_err(|e| {
                StoreError::db(DatabaseCode::ArtifactStorageFailed, format!("read: {e}"))
            })?;
            if n == 0 {
                break;
            }
            total += n as u64;
            if total > self.max_size_bytes {
                return Err(StoreError::db(
                    DatabaseCode::ArtifactStorageFailed,
                    format!("artifact exceeds the {} byte limit", self.max_size_bytes),
                ));
            }
            hasher.update(&buf[..n]);
            tmp.write_all(&buf[..n]).map_err(|e| {
                StoreError::db(DatabaseCode::ArtifactStorageFailed, format!("write: {e}"))
            })?;
        }

        let hash = hex_digest(hasher);
        let target = self.path_for(&hash);

        if target.exists() {
            debug!(%hash, "blob already stored, dropping stream copy");
            return Ok(StoredBlob {
                hash: hash.clone(),
                size: total,
                relative_path: self.relative_path(&hash),
                deduplicated: true,
            });
        }

        let parent = target.parent().expect("blob path has a parent");
        std::fs::create_dir_all(parent).map_err(|e| {
            StoreError::db(
                DatabaseCode::ArtifactStorageFailed,
                format!("failed to create {}: {e}", parent.display()),
            )
        })?;
        tmp.persist(&target).map_err(|e| {
            StoreError::db(DatabaseCode::ArtifactStorageFailed, format!("persist: {e}"))
        })?;

        Ok(StoredBlob {
            hash: hash.clone(),
            size: total,
            relative_path: self.relative_path(&hash),
            deduplicated: false,
        })
    }

    /// Whether a blob exists for `hash`.
    pub fn exists(&self, hash: &str) -> bool {
        self.path_for(hash).exists()
    }

    /// Reads a blob fully into memory.
    pub fn read(&self, hash: &str) -> Result<Vec<u8>> {
        let path = self.path_for(hash);
        std::fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::db(
                    DatabaseCode::ArtifactMissing,
                    format!("blob {hash} missing at {}", path.display()),
                )
            } else {
                StoreError::db(DatabaseCode::ArtifactStorageFailed, e)
            }
        })
    }

    /// Opens a blob for lazy chunked reading.
    pub fn open_stream(&self, hash: &str) -> Result<BlobReader> {
        let path = self.path_for(hash);
        let file = File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::db(
                    DatabaseCode::ArtifactMissing,
                    format!("blob {hash} missing at {}", path.display()),
                )
            } else {
                StoreError::db(DatabaseCode::ArtifactStorageFailed, e)
            }
        })?;
        Ok(BlobReader { file })
    }

    /// Removes the physical file for `hash`. Missing files are not an error.
    pub fn remove(&self, hash: &str) -> Result<()> {
        let path = self.path_for(hash);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(%hash, "removed blob");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::db(DatabaseCode::ArtifactStorageFailed, e)),
        }
    }

    /// Walks the store and counts files/bytes.
    pub fn stats(&self) -> Result<BlobStoreStats> {
        let mut stats = BlobStoreStats::default();
        walk_dir(&self.base, &mut stats)?;
        Ok(stats)
    }
}

fn walk_dir(dir: &Path, stats: &mut BlobStoreStats) -> Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(StoreError::db(DatabaseCode::StatsFailed, e)),
    };
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::db(DatabaseCode::StatsFailed, e))?;
        let meta = match entry.metadata() {
            Ok(meta) => meta,
            Err(e) => {
                warn!(path = ?entry.path(), "skipping unreadable entry: {e}");
                continue;
            }
        };
        if meta.is_dir() {
            walk_dir(&entry.path(), stats)?;
        } else {
            stats.file_count += 1;
            stats.total_bytes += meta.len();
        }
    }
    Ok(())
}

fn hex_digest(hasher: Sha256) -> String {
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// A lazy, finite byte stream over one blob.
pub struct BlobReader {
    file: File,
}

impl Read for BlobReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf)
    }
}
