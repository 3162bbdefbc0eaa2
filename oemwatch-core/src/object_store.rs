//! Blob interface backing `DiscoveryCache` persistence and design-capture
//! screenshots (`spec.md` §6). Keys: `discoveries/{tenant}.json`,
//! `oem/{tenant}/design_captures/{page_type}/{iso_timestamp}/screenshot_desktop.png`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("key not found: {0}")]
    NotFound(String),
    #[error("io error for key {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ObjectStoreError>;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Vec<u8>>;
}

/// Filesystem-backed implementation for tests and single-node
/// deployments: keys map directly onto a path under `root`.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let path = self.resolve(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| ObjectStoreError::Io { key: key.to_string(), source })?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|source| ObjectStoreError::Io { key: key.to_string(), source })
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.resolve(key);
        if !Path::new(&path).exists() {
            return Err(ObjectStoreError::NotFound(key.to_string()));
        }
        tokio::fs::read(&path)
            .await
            .map_err(|source| ObjectStoreError::Io { key: key.to_string(), source })
    }
}

pub fn discovery_cache_key(tenant_id: &str) -> String {
    format!("discoveries/{tenant_id}.json")
}

pub fn design_capture_key(tenant_id: &str, page_type: &str, iso_timestamp: &str) -> String {
    format!("oem/{tenant_id}/design_captures/{page_type}/{iso_timestamp}/screenshot_desktop.png")
}

/// Placeholder perceptual hash: a 64-bit average-hash over downsampled byte
/// blocks. Not a real blockhash/DCT hash; swap the body out for one without
/// touching callers, since `hash_needs_recapture`'s threshold is defined on
/// Hamming distance over hash length regardless of the algorithm behind it.
pub fn perceptual_hash(screenshot_bytes: &[u8]) -> u64 {
    if screenshot_bytes.is_empty() {
        return 0;
    }
    let block_count = 64;
    let block_size = (screenshot_bytes.len() / block_count).max(1);
    let averages: Vec<u32> = screenshot_bytes
        .chunks(block_size)
        .take(block_count)
        .map(|chunk| chunk.iter().map(|b| *b as u32).sum::<u32>() / chunk.len() as u32)
        .collect();
    let overall_average = averages.iter().sum::<u32>() / averages.len().max(1) as u32;

    let mut hash = 0u64;
    for (i, avg) in averages.iter().enumerate().take(64) {
        if *avg >= overall_average {
            hash |= 1 << i;
        }
    }
    hash
}

fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

/// Whether a design capture has drifted enough to warrant re-capture:
/// Hamming distance over hash length exceeds 0.3 (`spec.md` §9).
pub fn hash_needs_recapture(previous: u64, current: u64) -> bool {
    let distance = hamming_distance(previous, current) as f64;
    distance / 64.0 > 0.3
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        let key = discovery_cache_key("bmw");
        store.put(&key, b"hello".to_vec()).await.unwrap();
        let bytes = store.get(&key).await.unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[tokio::test]
    async fn missing_key_errors() {
        let dir = tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        let err = store.get("discoveries/missing.json").await.unwrap_err();
        assert!(matches!(err, ObjectStoreError::NotFound(_)));
    }

    #[test]
    fn identical_screenshots_hash_to_the_same_value() {
        let bytes = vec![10u8; 4096];
        assert_eq!(perceptual_hash(&bytes), perceptual_hash(&bytes));
    }

    #[test]
    fn unchanged_hash_never_needs_recapture() {
        let bytes = vec![200u8; 4096];
        let hash = perceptual_hash(&bytes);
        assert!(!hash_needs_recapture(hash, hash));
    }

    #[test]
    fn distant_hashes_trigger_recapture() {
        assert!(hash_needs_recapture(0x0000_0000_0000_0000, 0xFFFF_FFFF_FFFF_FFFF));
        assert!(!hash_needs_recapture(0x0000_0000_0000_0000, 0x0000_0000_0000_0001));
    }
}
