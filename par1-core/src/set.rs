//! The Set Manager: owns a loaded PAR set (data files and parity
//! volumes), discovers sibling parity files in the directory, classifies
//! every file's status, and coordinates a set-wide verify pass plus the
//! exhaustive search for a non-singular recovery-matrix combination.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::cache::{byte_to_status, status_to_byte, CacheHandle, CachedClassification};
use crate::error::{ParError, Result, UnrecoverableDiagnostic};
use crate::fingerprint::{digest, Fingerprint, Md5};
use crate::gf::GaloisField;
use crate::header::{FileEntry, FileHeader, FileStatus, HEADER_SIZE};
use crate::host::HostServices;
use crate::matrix::{build_recovery_matrix, RecoveryMatrix};

const PREFIX_LEN: u64 = 16 * 1024;

#[derive(Debug, Clone)]
pub struct DataFileRecord {
    pub name: String,
    pub name_utf16: Vec<u16>,
    pub size: u64,
    pub full_hash: Fingerprint,
    pub prefix_hash: Fingerprint,
    pub recoverable: bool,
    pub status: FileStatus,
}

impl DataFileRecord {
    pub fn path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.name)
    }
}

/// The small capability set the verify pass is polymorphic over, instead
/// of duck-typed virtual dispatch on the record types (spec.md §9's
/// REDESIGN FLAG). `DataFileRecord` and `ParityVolumeRecord` each
/// implement this; everything else in the set manager uses the concrete
/// types directly.
pub trait VerifiedFile {
    fn path(&self, dir: &Path) -> PathBuf;
    fn expected_hash(&self) -> Fingerprint;
    /// Byte offset the digest is taken from (0 for a whole data file, 0x20
    /// for a parity volume's body hash).
    fn hash_offset(&self) -> u64 {
        0
    }
    fn status_mut(&mut self) -> &mut FileStatus;
}

impl VerifiedFile for DataFileRecord {
    fn path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.name)
    }
    fn expected_hash(&self) -> Fingerprint {
        self.full_hash
    }
    fn status_mut(&mut self) -> &mut FileStatus {
        &mut self.status
    }
}

impl VerifiedFile for ParityVolumeRecord {
    fn path(&self, _dir: &Path) -> PathBuf {
        self.path.clone()
    }
    fn expected_hash(&self) -> Fingerprint {
        self.body_hash
    }
    fn hash_offset(&self) -> u64 {
        0x20
    }
    fn status_mut(&mut self) -> &mut FileStatus {
        &mut self.status
    }
}

/// Existence/size/hash check shared by both record kinds: Missing if the
/// file is absent, Corrupt if it is too short for `hash_offset`, else a
/// digest comparison against `expected_hash`. Volume-0-style exemptions
/// and data-file-only Misnamed detection are layered on by the caller.
pub fn verify_one<T: VerifiedFile>(item: &mut T, dir: &Path) -> Result<()> {
    let path = item.path(dir);
    if !path.exists() {
        *item.status_mut() = FileStatus::Missing;
        return Ok(());
    }
    let bytes = fs::read(&path)?;
    let offset = item.hash_offset() as usize;
    if bytes.len() < offset {
        *item.status_mut() = FileStatus::Corrupt;
        return Ok(());
    }
    let actual = digest(&bytes[offset..]);
    *item.status_mut() = if actual.0 == *item.expected_hash().as_bytes() {
        FileStatus::Valid
    } else {
        FileStatus::Corrupt
    };
    Ok(())
}

#[derive(Debug, Clone)]
pub struct ParityVolumeRecord {
    pub volume_number: u64,
    pub body_hash: Fingerprint,
    pub set_hash: Fingerprint,
    pub data_offset: u64,
    pub data_size: u64,
    pub status: FileStatus,
    pub path: PathBuf,
}

pub struct Set {
    pub dir: PathBuf,
    pub base_name: String,
    pub data_files: Vec<DataFileRecord>,
    pub parity_volumes: Vec<ParityVolumeRecord>,
    pub set_hash: Fingerprint,
}

impl Set {
    /// Load a set starting from a single PAR file path (any volume).
    /// Unknown file-list status bits are masked silently; use
    /// [`Set::load_with_host`] to have them reported through
    /// `HostServices::warn_unknown_status_bits_once`.
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_inner(path, &mut || {})
    }

    /// Same as [`Set::load`], but surfaces a one-time warning through
    /// `host` if any file-list entry carries unknown status bits beyond
    /// bit 0 (spec.md §9 Open Question #1).
    pub fn load_with_host(path: &Path, host: &mut HostServices) -> Result<Self> {
        let mut saw_unknown_bits = false;
        let set = Self::load_inner(path, &mut || saw_unknown_bits = true)?;
        if saw_unknown_bits {
            host.warn_unknown_status_bits_once();
        }
        Ok(set)
    }

    fn load_inner(path: &Path, warn_unknown_bits: &mut dyn FnMut()) -> Result<Self> {
        let dir = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        let base_name = stem_without_volume_suffix(path);

        let bytes = fs::read(path)?;
        let header = FileHeader::from_bytes(&bytes)?;

        let mut cursor = HEADER_SIZE as usize;
        let mut data_files = Vec::with_capacity(header.file_count as usize);
        for _ in 0..header.file_count {
            let (entry, consumed) = FileEntry::from_bytes(&bytes[cursor..], warn_unknown_bits)?;
            cursor += consumed;
            data_files.push(DataFileRecord {
                name: entry.name,
                name_utf16: entry.name_utf16,
                size: entry.size,
                full_hash: entry.full_hash,
                prefix_hash: entry.prefix_hash,
                recoverable: entry.recoverable,
                status: FileStatus::Unknown,
            });
        }

        let own_volume = ParityVolumeRecord {
            volume_number: header.volume_number,
            body_hash: header.body_hash,
            set_hash: header.set_hash,
            data_offset: header.data_offset,
            data_size: header.data_size,
            status: FileStatus::Unknown,
            path: path.to_path_buf(),
        };

        let mut set = Set {
            dir,
            base_name,
            data_files,
            parity_volumes: vec![own_volume],
            set_hash: header.set_hash,
        };
        set.discover_siblings(path)?;
        set.parity_volumes.sort_by_key(|v| v.volume_number);
        Ok(set)
    }

    fn discover_siblings(&mut self, loaded_path: &Path) -> Result<()> {
        let mut seen_volumes: HashMap<u64, ()> = HashMap::new();
        seen_volumes.insert(self.parity_volumes[0].volume_number, ());

        for entry in walkdir::WalkDir::new(&self.dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let candidate = entry.path();
            if candidate == loaded_path || !candidate.is_file() {
                continue;
            }
            if !has_par_sibling_extension(candidate) {
                continue;
            }
            let Ok(head) = fs::read(candidate).map(|mut b| {
                b.truncate(0x30.min(b.len()));
                b
            }) else {
                continue;
            };
            let Ok(probed) = FileHeader::probe_set_hash(&head) else {
                continue;
            };
            if probed.0 != self.set_hash.0 {
                continue;
            }
            let Ok(full_bytes) = fs::read(candidate) else {
                continue;
            };
            let Ok(header) = FileHeader::from_bytes(&full_bytes) else {
                continue;
            };
            if seen_volumes.contains_key(&header.volume_number) {
                continue;
            }
            seen_volumes.insert(header.volume_number, ());
            self.parity_volumes.push(ParityVolumeRecord {
                volume_number: header.volume_number,
                body_hash: header.body_hash,
                set_hash: header.set_hash,
                data_offset: header.data_offset,
                data_size: header.data_size,
                status: FileStatus::Unknown,
                path: candidate.to_path_buf(),
            });
        }
        Ok(())
    }

    /// Cheap-then-full classification pass over every data file.
    pub fn classify_data_files(&mut self, host: &mut HostServices) -> Result<()> {
        let total = self.data_files.len();
        let full_hashes: HashMap<[u8; 16], usize> = self
            .data_files
            .iter()
            .enumerate()
            .map(|(i, r)| (*r.full_hash.as_bytes(), i))
            .collect();

        for idx in 0..total {
            if !host.tick("verify", ((idx * 100) / total.max(1)) as u8) {
                return Err(ParError::Cancelled);
            }
            let record = &self.data_files[idx];
            let path = record.path(&self.dir);
            if !path.exists() {
                self.data_files[idx].status = FileStatus::Missing;
                continue;
            }
            let meta = fs::metadata(&path)?;
            let actual_size = meta.len();
            if actual_size != record.size {
                self.data_files[idx].status = FileStatus::Corrupt;
                continue;
            }

            let actual_full = hash_file(&path)?;
            if actual_full.0 == *record.full_hash.as_bytes() {
                self.data_files[idx].status = FileStatus::Valid;
            } else if let Some(&other_idx) = full_hashes.get(&actual_full.0) {
                if other_idx != idx {
                    self.data_files[idx].status = FileStatus::Misnamed;
                } else {
                    self.data_files[idx].status = FileStatus::Corrupt;
                }
            } else {
                self.data_files[idx].status = FileStatus::Corrupt;
            }
        }

        // Duplicate full_hash detection across distinct records: flagged,
        // not rejected (ClassificationMismatch is a warning-class error the
        // caller may choose to surface, per spec.md §3/§7).
        let mut counts: HashMap<[u8; 16], usize> = HashMap::new();
        for r in &self.data_files {
            *counts.entry(*r.full_hash.as_bytes()).or_insert(0) += 1;
        }
        if counts.values().any(|&c| c > 1) {
            host.tick("warn-duplicate-fingerprint", 0);
        }

        Ok(())
    }

    /// Re-hash each parity volume's body and compare to its stored
    /// `body_hash`. Volume 0 carries no body and is trivially Valid.
    pub fn validate_parity_volumes(&mut self) -> Result<()> {
        for v in self.parity_volumes.iter_mut() {
            if v.volume_number == 0 {
                v.status = FileStatus::Valid;
                continue;
            }
            verify_one(v, &self.dir)?;
        }
        Ok(())
    }

    pub fn recoverable_count(&self) -> usize {
        self.data_files.iter().filter(|r| r.recoverable).count()
    }

    pub fn valid_parity_volume_numbers(&self) -> Vec<u32> {
        self.parity_volumes
            .iter()
            .filter(|v| v.volume_number >= 1 && v.status == FileStatus::Valid)
            .map(|v| v.volume_number as u32)
            .collect()
    }

    /// `valid[i]` true iff the i-th recoverable data file (in serialisation
    /// order among recoverable files) is Valid.
    pub fn recoverable_validity_mask(&self) -> Vec<bool> {
        self.data_files
            .iter()
            .filter(|r| r.recoverable)
            .map(|r| r.status == FileStatus::Valid)
            .collect()
    }

    pub fn recovery_feasible(&self) -> bool {
        let valid_parity = self.valid_parity_volume_numbers().len();
        let k = self.recoverable_validity_mask().iter().filter(|&&v| !v).count();
        valid_parity >= k
    }

    /// Exhaustively search `C(V, K)` choices of parity volumes (in
    /// lexicographic order) for one that yields a non-singular recovery
    /// matrix (spec.md §4.E/§4.G).
    pub fn find_recovery_matrix(&self, gf: &GaloisField) -> Result<RecoveryMatrix> {
        let valid = self.recoverable_validity_mask();
        let k = valid.iter().filter(|&&v| !v).count();
        if k == 0 {
            return Ok(RecoveryMatrix {
                rows: Vec::new(),
                missing_columns: Vec::new(),
            });
        }
        let pool = self.valid_parity_volume_numbers();
        if pool.len() < k {
            return Err(ParError::unrecoverable(UnrecoverableDiagnostic {
                missing: k,
                valid_parity: pool.len(),
                needed_parity: k,
            }));
        }

        let mut combo: Vec<usize> = (0..k).collect();
        loop {
            let parity_ids: Vec<u32> = combo.iter().map(|&i| pool[i]).collect();
            match build_recovery_matrix(gf, &valid, &parity_ids) {
                Ok(r) => return Ok(r),
                Err(ParError::Singular) => {}
                Err(e) => return Err(e),
            }
            if !advance_combination(&mut combo, pool.len()) {
                return Err(ParError::unrecoverable(UnrecoverableDiagnostic {
                    missing: k,
                    valid_parity: pool.len(),
                    needed_parity: k + 1,
                }));
            }
        }
    }

    pub fn load_cached(&self, cache: &CacheHandle) -> Option<(Vec<FileStatus>, Vec<FileStatus>)> {
        let key = self.set_hash.to_hex();
        let entry = cache.load(&key)?;
        let data_status = entry.data_status.iter().map(|&b| byte_to_status(b)).collect();
        let parity_status = entry.parity_status.iter().map(|&b| byte_to_status(b)).collect();
        Some((data_status, parity_status))
    }

    pub fn store_cached(&self, cache: &mut CacheHandle, now: u32) {
        let key = self.set_hash.to_hex();
        let entry = CachedClassification {
            last_accessed: now,
            hash: self.set_hash.as_bytes().to_vec(),
            data_status: self.data_files.iter().map(|r| status_to_byte(r.status)).collect(),
            parity_status: self.parity_volumes.iter().map(|v| status_to_byte(v.status)).collect(),
        };
        cache.store(&key, entry, now);
    }
}

/// Classic next-combination step over `0..pool_len` choose `combo.len()`,
/// in lexicographic order. Returns `false` when the search is exhausted.
fn advance_combination(combo: &mut [usize], pool_len: usize) -> bool {
    let k = combo.len();
    let mut i = k;
    loop {
        if i == 0 {
            return false;
        }
        i -= 1;
        if combo[i] < pool_len - (k - i) {
            combo[i] += 1;
            for j in i + 1..k {
                combo[j] = combo[j - 1] + 1;
            }
            return true;
        }
    }
}

fn has_par_sibling_extension(path: &Path) -> bool {
    let ext = match path.extension().and_then(|e| e.to_str()) {
        Some(e) => e.to_ascii_lowercase(),
        None => return false,
    };
    if ext.len() != 3 {
        return false;
    }
    let bytes = ext.as_bytes();
    let first_ok = bytes[0] == b'p' || bytes[0] == b'q';
    let tail_ok = (&ext[1..] == "ar") || (bytes[1].is_ascii_digit() && bytes[2].is_ascii_digit());
    first_ok && tail_ok
}

fn stem_without_volume_suffix(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_string()
}

fn hash_file(path: &Path) -> Result<Fingerprint> {
    let bytes = fs::read(path)?;
    let mut md5 = Md5::new();
    md5.absorb(&bytes)?;
    md5.finish()
}

/// Digest of the first 16 KiB of a file, or the whole file if shorter.
pub fn prefix_hash_of(path: &Path) -> Result<Fingerprint> {
    let bytes = fs::read(path)?;
    let take = (bytes.len() as u64).min(PREFIX_LEN) as usize;
    Ok(digest(&bytes[..take]))
}
