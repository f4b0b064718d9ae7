//! Content hashing for duplicate detection.
//!
//! Files are hashed with BLAKE3 in fixed-size chunks so memory stays flat no
//! matter how large a video is. Results are cached in a bounded in-memory
//! cache keyed by the file's identity signature, so an unchanged file is never
//! read twice within one run.

use mini_moka::sync::Cache;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Read buffer size, also the length of a prefix hash.
pub const CHUNK_SIZE: usize = 64 * 1024;

const DEFAULT_CAPACITY: u64 = 10_000;

/// How much of a file a hash covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashDepth {
    /// The first [`CHUNK_SIZE`] bytes.
    Prefix,
    /// The whole file.
    Full,
}

/// Identity of a file version: any change to it invalidates cached hashes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct HashKey {
    path: PathBuf,
    size: u64,
    modified: Option<SystemTime>,
    inode: u64,
    depth: HashDepth,
}

#[cfg(unix)]
fn inode_of(metadata: &fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    metadata.ino()
}

#[cfg(not(unix))]
fn inode_of(_metadata: &fs::Metadata) -> u64 {
    0
}

/// Bounded cache of file content hashes.
#[derive(Clone)]
pub struct HashCache {
    cache: Cache<HashKey, blake3::Hash>,
}

impl HashCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Cache holding at most `capacity` hashes; older entries are evicted.
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            cache: Cache::builder().max_capacity(capacity).build(),
        }
    }

    /// Hash of `path` at the given depth, served from cache when the file's
    /// signature is unchanged.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the file cannot be read.
    pub fn hash(&self, path: &Path, depth: HashDepth) -> io::Result<blake3::Hash> {
        let metadata = fs::metadata(path)?;
        let key = HashKey {
            path: path.to_path_buf(),
            size: metadata.len(),
            modified: metadata.modified().ok(),
            inode: inode_of(&metadata),
            depth,
        };

        if let Some(hash) = self.cache.get(&key) {
            return Ok(hash);
        }

        let hash = hash_file(path, depth)?;
        self.cache.insert(key, hash);
        Ok(hash)
    }
}

impl Default for HashCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Streams a file (or its first chunk) through BLAKE3.
pub fn hash_file(path: &Path, depth: HashDepth) -> io::Result<blake3::Hash> {
    let mut hasher = blake3::Hasher::new();
    let mut file = File::open(path)?;
    let mut buffer = vec![0u8; CHUNK_SIZE];

    match depth {
        HashDepth::Prefix => {
            let mut filled = 0;
            while filled < CHUNK_SIZE {
                let n = file.read(&mut buffer[filled..])?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            hasher.update(&buffer[..filled]);
        }
        HashDepth::Full => loop {
            let n = file.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        },
    }

    Ok(hasher.finalize())
}
