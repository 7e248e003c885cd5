//! # Content-Addressed Blob Storage
//!
//! Caches image layers and config blobs by digest so a re-pulled image, or
//! a later action using a shared base layer, never downloads twice.
//!
//! ```text
//! <engine-root>/<namespace>/blobs/
//! └── sha256/
//!     ├── ab/
//!     │   └── abcd1234...  (blob content)
//!     └── cd/
//!         └── cdef5678...  (blob content)
//! ```
//!
//! ## Integrity
//!
//! [`BlobStore::put_blob`] hashes the content and refuses it if the hash
//! does not match the digest the registry advertised. Writes go to a unique
//! temp file and are renamed into place, so a crash never leaves a partial
//! blob under a valid digest.
//!
//! Digests are sanitized before they become paths: the algorithm must be a
//! known one and the hash is reduced to hex characters.

use crate::constants::BLOB_STORE_DIR;
use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Content-addressed blob store for image layers and configs.
#[derive(Debug, Clone)]
pub struct BlobStore {
    base_dir: PathBuf,
}

impl BlobStore {
    /// Opens (creating if needed) the blob store under an engine state root.
    pub fn open(state_root: &Path) -> Result<Self> {
        Self::with_path(state_root.join(BLOB_STORE_DIR))
    }

    /// Opens a blob store at exactly `base_dir`.
    pub fn with_path(base_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&base_dir).map_err(|e| Error::StorageInitFailed {
            path: base_dir.clone(),
            reason: e.to_string(),
        })?;

        info!("Blob store at {}", base_dir.display());
        Ok(Self { base_dir })
    }

    /// Returns the base directory.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Checks if a blob is cached.
    pub fn has_blob(&self, digest: &str) -> bool {
        self.blob_path(digest).is_file()
    }

    /// Reads a cached blob.
    pub fn get_blob(&self, digest: &str) -> Result<Vec<u8>> {
        fs::read(self.blob_path(digest)).map_err(|_| Error::BlobNotFound {
            digest: digest.to_string(),
        })
    }

    /// Returns where a blob lives (or would live).
    ///
    /// Malformed digests map to a path that never exists.
    pub fn blob_path(&self, digest: &str) -> PathBuf {
        let (algo, hash) = digest.split_once(':').unwrap_or(("sha256", digest));

        let safe_algo = match algo {
            "sha256" | "sha384" | "sha512" => algo,
            _ => {
                warn!("Unknown digest algorithm '{}', using sha256", algo);
                "sha256"
            }
        };

        let safe_hash: String = hash.chars().filter(|c| c.is_ascii_hexdigit()).collect();
        if safe_hash.len() < 2 {
            return self.base_dir.join("invalid").join("empty");
        }

        self.base_dir
            .join(safe_algo)
            .join(&safe_hash[..2])
            .join(&safe_hash)
    }

    /// Stores a blob after verifying its sha256 digest.
    ///
    /// Storing a blob that is already cached is a no-op.
    pub fn put_blob(&self, digest: &str, data: &[u8]) -> Result<()> {
        let (algo, expected) = digest.split_once(':').unwrap_or(("sha256", digest));
        if algo != "sha256" {
            return Err(Error::StorageWriteFailed(format!(
                "unsupported digest algorithm '{}'",
                algo
            )));
        }

        let computed = hex::encode(Sha256::digest(data));
        if computed != expected {
            return Err(Error::StorageWriteFailed(format!(
                "digest mismatch for {}: content hashes to sha256:{}",
                digest, computed
            )));
        }

        let path = self.blob_path(digest);
        if path.is_file() {
            debug!("Blob {} already cached", digest);
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::StorageWriteFailed(e.to_string()))?;
        }

        let temp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::now_v7()));
        fs::write(&temp_path, data).map_err(|e| Error::StorageWriteFailed(e.to_string()))?;
        fs::rename(&temp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            Error::StorageWriteFailed(e.to_string())
        })?;

        debug!("Cached blob {} ({} bytes)", digest, data.len());
        Ok(())
    }

    /// Removes a cached blob. Removing an absent blob succeeds.
    pub fn remove_blob(&self, digest: &str) -> Result<()> {
        match fs::remove_file(self.blob_path(digest)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::StorageWriteFailed(e.to_string())),
        }
    }
}

/// Returns the `sha256:<hex>` digest of `data`.
pub fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_blob_path_is_sharded() {
        let temp = TempDir::new().unwrap();
        let store = BlobStore::with_path(temp.path().to_path_buf()).unwrap();

        let path = store.blob_path("sha256:abcd1234");
        assert!(path.ends_with("sha256/ab/abcd1234"));
    }

    #[test]
    fn test_malformed_digest_never_escapes() {
        let temp = TempDir::new().unwrap();
        let store = BlobStore::with_path(temp.path().to_path_buf()).unwrap();

        let path = store.blob_path("../../etc:passwd");
        assert!(path.starts_with(temp.path()));
        assert!(!store.has_blob("../../etc:passwd"));
    }
}
