//! Opaque, optional classification cache: a binary blob keyed by
//! `set_hash` holding the last-seen classification of every file in a
//! set, replaced LRU with a configurable cap (default 50). This is an
//! external, opt-in hook (`load_cached`/`store_cached`); the core never
//! requires it to function correctly.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ParError, Result};
use crate::header::FileStatus;

pub const DEFAULT_CAP: usize = 50;

#[derive(Debug, Clone)]
pub struct CachedClassification {
    pub last_accessed: u32,
    pub hash: Vec<u8>,
    pub data_status: Vec<u8>,
    pub parity_status: Vec<u8>,
}

pub fn status_to_byte(status: FileStatus) -> u8 {
    match status {
        FileStatus::Unknown => 0,
        FileStatus::Valid => 1,
        FileStatus::Corrupt => 2,
        FileStatus::Missing => 3,
        FileStatus::Misnamed => 4,
        FileStatus::Error => 5,
    }
}

pub fn byte_to_status(b: u8) -> FileStatus {
    match b {
        1 => FileStatus::Valid,
        2 => FileStatus::Corrupt,
        3 => FileStatus::Missing,
        4 => FileStatus::Misnamed,
        5 => FileStatus::Error,
        _ => FileStatus::Unknown,
    }
}

/// A loaded cache file: `set_hash` (hex-encoded) -> classification entry.
pub struct CacheHandle {
    path: PathBuf,
    cap: usize,
    entries: HashMap<String, CachedClassification>,
}

impl CacheHandle {
    pub fn open(path: impl AsRef<Path>, cap: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let bytes = fs::read(&path)?;
            parse_cache_blob(&bytes)?
        } else {
            HashMap::new()
        };
        Ok(CacheHandle { path, cap, entries })
    }

    pub fn load(&self, set_hash_hex: &str) -> Option<&CachedClassification> {
        self.entries.get(set_hash_hex)
    }

    pub fn store(&mut self, set_hash_hex: &str, entry: CachedClassification, now: u32) {
        let mut entry = entry;
        entry.last_accessed = now;
        self.entries.insert(set_hash_hex.to_string(), entry);
        if self.entries.len() > self.cap {
            self.evict_lru();
        }
    }

    fn evict_lru(&mut self) {
        if let Some(oldest_key) = self
            .entries
            .iter()
            .min_by_key(|(_, v)| v.last_accessed)
            .map(|(k, _)| k.clone())
        {
            self.entries.remove(&oldest_key);
        }
    }

    pub fn flush(&self) -> Result<()> {
        let blob = serialize_cache_blob(&self.entries);
        fs::write(&self.path, blob)?;
        Ok(())
    }
}

fn serialize_cache_blob(entries: &HashMap<String, CachedClassification>) -> Vec<u8> {
    let mut body = Vec::new();
    for entry in entries.values() {
        body.extend_from_slice(&entry.last_accessed.to_le_bytes());
        body.extend_from_slice(&(entry.hash.len() as u32).to_le_bytes());
        body.extend_from_slice(&(entry.data_status.len() as u32).to_le_bytes());
        body.extend_from_slice(&(entry.parity_status.len() as u32).to_le_bytes());
        body.extend_from_slice(&entry.hash);
        body.extend_from_slice(&entry.data_status);
        body.extend_from_slice(&entry.parity_status);
    }
    let crc = crc32fast::hash(&body);
    let mut out = body;
    out.extend_from_slice(&crc.to_le_bytes());
    out
}

fn parse_cache_blob(bytes: &[u8]) -> Result<HashMap<String, CachedClassification>> {
    if bytes.len() < 4 {
        return Err(ParError::format("cache blob too short"));
    }
    let (body, crc_bytes) = bytes.split_at(bytes.len() - 4);
    let stored_crc = u32::from_le_bytes(crc_bytes.try_into().unwrap());
    if crc32fast::hash(body) != stored_crc {
        return Err(ParError::format("cache blob checksum mismatch"));
    }

    let mut entries = HashMap::new();
    let mut cursor = 0usize;
    while cursor < body.len() {
        if body.len() - cursor < 16 {
            return Err(ParError::format("truncated cache entry header"));
        }
        let last_accessed = u32::from_le_bytes(body[cursor..cursor + 4].try_into().unwrap());
        let hash_count = u32::from_le_bytes(body[cursor + 4..cursor + 8].try_into().unwrap()) as usize;
        let data_count = u32::from_le_bytes(body[cursor + 8..cursor + 12].try_into().unwrap()) as usize;
        let parity_count = u32::from_le_bytes(body[cursor + 12..cursor + 16].try_into().unwrap()) as usize;
        cursor += 16;

        let need = hash_count + data_count + parity_count;
        if body.len() - cursor < need {
            return Err(ParError::format("truncated cache entry body"));
        }
        let hash = body[cursor..cursor + hash_count].to_vec();
        cursor += hash_count;
        let data_status = body[cursor..cursor + data_count].to_vec();
        cursor += data_count;
        let parity_status = body[cursor..cursor + parity_count].to_vec();
        cursor += parity_count;

        let key = hash.iter().map(|b| format!("{:02x}", b)).collect::<String>();
        entries.insert(
            key,
            CachedClassification {
                last_accessed,
                hash,
                data_status,
                parity_status,
            },
        );
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.bin");
        let mut cache = CacheHandle::open(&path, DEFAULT_CAP).unwrap();
        let hash = vec![0xABu8; 16];
        let key = hash.iter().map(|b| format!("{:02x}", b)).collect::<String>();
        cache.store(
            &key,
            CachedClassification {
                last_accessed: 0,
                hash: hash.clone(),
                data_status: vec![1, 1, 2],
                parity_status: vec![1],
            },
            42,
        );
        cache.flush().unwrap();

        let reopened = CacheHandle::open(&path, DEFAULT_CAP).unwrap();
        let loaded = reopened.load(&key).unwrap();
        assert_eq!(loaded.last_accessed, 42);
        assert_eq!(loaded.data_status, vec![1, 1, 2]);
    }

    #[test]
    fn lru_eviction_respects_cap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.bin");
        let mut cache = CacheHandle::open(&path, 2).unwrap();
        for i in 0..3u32 {
            cache.store(
                &format!("key{}", i),
                CachedClassification {
                    last_accessed: 0,
                    hash: vec![i as u8; 4],
                    data_status: vec![],
                    parity_status: vec![],
                },
                i,
            );
        }
        assert_eq!(cache.entries.len(), 2);
        assert!(cache.load("key0").is_none());
        assert!(cache.load("key2").is_some());
    }

    #[test]
    fn corrupted_blob_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.bin");
        std::fs::write(&path, b"not a valid cache blob at all").unwrap();
        assert!(CacheHandle::open(&path, DEFAULT_CAP).is_err());
    }
}
