//! Streaming decoder/repair: given a `Set` with some recoverable data
//! files missing or corrupt, reconstructs them from surviving data files
//! plus valid parity volumes, per spec.md §4.I.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{ParError, Result};
use crate::fingerprint::Md5;
use crate::gf::GaloisField;
use crate::header::FileStatus;
use crate::host::HostServices;
use crate::reader::{ChunkReader, CHUNK_SIZE};
use crate::set::Set;

/// Repair every recoverable data file in `set` that is not `Valid`,
/// writing reconstructed bytes back into `set.dir`. Requires
/// `set.recovery_feasible()`; computes a recovery matrix via
/// `set.find_recovery_matrix`, exhaustively searching parity-volume
/// combinations for a non-singular selection.
///
/// Reconstructs every missing recoverable file's bytes in memory for the
/// duration of one working-chunk window, but (per the single-file repair
/// restriction recorded in SPEC_FULL.md) only ever writes the files
/// `only` names to disk when `only` is `Some`; `None` repairs everything
/// recoverable that is not `Valid`.
pub fn repair(set: &mut Set, host: &mut HostServices, only: Option<&str>) -> Result<()> {
    let gf = GaloisField::new();
    if !set.recovery_feasible() {
        return Err(ParError::input("recovery infeasible: not enough valid parity volumes"));
    }
    let recovery = set.find_recovery_matrix(&gf)?;
    if recovery.missing_columns.is_empty() {
        return Ok(());
    }

    let recoverable_records: Vec<usize> = set
        .data_files
        .iter()
        .enumerate()
        .filter(|(_, r)| r.recoverable)
        .map(|(i, _)| i)
        .collect();

    let missing_record_indices: Vec<usize> = recovery.missing_columns.iter().map(|&col| recoverable_records[col]).collect();

    let targets: Vec<usize> = match only {
        Some(name) => {
            let idx = missing_record_indices
                .iter()
                .copied()
                .find(|&ri| set.data_files[ri].name == name)
                .ok_or_else(|| ParError::input(format!("'{}' is not a missing/corrupt recoverable file in this set", name)))?;
            vec![idx]
        }
        None => missing_record_indices.clone(),
    };

    let l = recoverable_records.iter().map(|&ri| set.data_files[ri].size).max().unwrap_or(0);
    let chunk_size = host.working_chunk_size(l).max(CHUNK_SIZE);

    let n_recoverable = recoverable_records.len();
    let surviving_columns: Vec<usize> = (0..n_recoverable).filter(|c| !recovery.missing_columns.contains(c)).collect();

    // One reader per surviving recoverable data file, one per parity
    // volume used by the recovery matrix.
    struct SurvivingData {
        reader: ChunkReader,
        size: u64,
    }
    let mut data_readers: Vec<SurvivingData> = Vec::with_capacity(surviving_columns.len());
    for &col in &surviving_columns {
        let ri = recoverable_records[col];
        let record = &set.data_files[ri];
        let path = record.path(&set.dir);
        data_readers.push(SurvivingData {
            reader: ChunkReader::open(&path, 0, None, host.overlapped_io)?,
            size: record.size,
        });
    }

    let parity_ids = used_parity_ids(set, &recovery)?;
    let mut parity_readers: Vec<ChunkReader> = Vec::with_capacity(parity_ids.len());
    for &pid in &parity_ids {
        let vol = set
            .parity_volumes
            .iter()
            .find(|v| v.volume_number == pid as u64)
            .ok_or_else(|| ParError::input(format!("parity volume {} vanished mid-repair", pid)))?;
        parity_readers.push(ChunkReader::open(&vol.path, vol.data_offset, Some(vol.data_size), host.overlapped_io)?);
    }

    let missing_sizes: Vec<u64> = recovery.missing_columns.iter().map(|&col| set.data_files[recoverable_records[col]].size).collect();

    let mut missing_buffers: Vec<Vec<u8>> = vec![vec![0u8; chunk_size]; recovery.missing_columns.len()];
    let mut missing_md5: Vec<Md5> = (0..recovery.missing_columns.len()).map(|_| Md5::new()).collect();

    let mut reconstructed_writers: Vec<Option<std::fs::File>> = recovery
        .missing_columns
        .iter()
        .map(|&col| {
            let ri = recoverable_records[col];
            if targets.contains(&ri) {
                let path = set.data_files[ri].path(&set.dir);
                Some(std::fs::File::create(path).ok()).flatten()
            } else {
                None
            }
        })
        .collect();

    let mut offset: u64 = 0;
    while l > 0 && offset < l {
        let step = chunk_size.min((l - offset) as usize);
        for buf in missing_buffers.iter_mut() {
            buf[..step].fill(0);
        }

        for (i, sd) in data_readers.iter_mut().enumerate() {
            let col = surviving_columns[i];
            if offset >= sd.size {
                continue;
            }
            let mut consumed = 0usize;
            while consumed < step {
                if offset + consumed as u64 >= sd.size {
                    break;
                }
                sd.reader.start_read()?;
                let (chunk, count) = sd.reader.finish_read()?;
                if count == 0 {
                    break;
                }
                let take = count.min(step - consumed);
                for (row, coeffs) in recovery.rows.iter().enumerate() {
                    let scalar = coeffs[col];
                    if scalar == 0 {
                        continue;
                    }
                    let lut = gf.make_lut(scalar);
                    GaloisField::xor_scaled_into(&lut, &chunk[..take], &mut missing_buffers[row][consumed..consumed + take]);
                }
                consumed += take;
            }
        }

        for (pidx, reader) in parity_readers.iter_mut().enumerate() {
            // Parity coefficients live at the missing-column position they
            // complete, not past the N recoverable columns (matrix.rs packs
            // the K identity-derived coefficients into `rows[y][missing_columns[k]]`,
            // one per parity volume in the same order `parity_ids` was built).
            let col = recovery.missing_columns[pidx];
            let mut consumed = 0usize;
            while consumed < step {
                reader.start_read()?;
                let (chunk, count) = reader.finish_read()?;
                if count == 0 {
                    break;
                }
                let take = count.min(step - consumed);
                for (row, coeffs) in recovery.rows.iter().enumerate() {
                    let scalar = coeffs[col];
                    if scalar == 0 {
                        continue;
                    }
                    let lut = gf.make_lut(scalar);
                    GaloisField::xor_scaled_into(&lut, &chunk[..take], &mut missing_buffers[row][consumed..consumed + take]);
                }
                consumed += take;
            }
        }

        for (row, buf) in missing_buffers.iter().enumerate() {
            // Bound both the digest and the write to this row's own file
            // size: `l` is the largest *recoverable* file, and a missing
            // file shorter than that must not have its tail's zero-padding
            // (produced for the linear algebra) written or hashed (spec.md
            // §4.I step 4).
            let size = missing_sizes[row];
            if offset >= size {
                continue;
            }
            let row_take = ((size - offset).min(step as u64)) as usize;
            missing_md5[row].absorb(&buf[..row_take])?;
            if let Some(w) = reconstructed_writers[row].as_mut() {
                w.write_all(&buf[..row_take])?;
            }
        }

        offset += step as u64;
        if !host.tick("repair", ((offset * 100 / l) as u8).min(100)) {
            return Err(ParError::Cancelled);
        }
    }

    for (row, &col) in recovery.missing_columns.iter().enumerate() {
        let ri = recoverable_records[col];
        let digest = missing_md5[row].finish()?;
        let expected = set.data_files[ri].full_hash;
        if digest.0 != expected.0 {
            return Err(ParError::input(format!(
                "reconstructed '{}' does not match its recorded fingerprint",
                set.data_files[ri].name
            )));
        }
        if targets.contains(&ri) {
            set.data_files[ri].status = FileStatus::Valid;
        } else {
            // Reconstructed in memory to satisfy the recovery matrix but
            // not a requested target: status reverts to Unknown, matching
            // "nothing on disk changed for this file".
            set.data_files[ri].status = FileStatus::Unknown;
        }
    }

    Ok(())
}

/// Which parity volume numbers the recovery matrix's right-hand columns
/// (beyond the N recoverable data columns) correspond to, in the same
/// order `build_recovery_matrix` packed them.
fn used_parity_ids(set: &Set, recovery: &crate::matrix::RecoveryMatrix) -> Result<Vec<u32>> {
    let k = recovery.missing_columns.len();
    if k == 0 {
        return Ok(Vec::new());
    }
    // `find_recovery_matrix` already committed to one specific combination
    // internally; we recompute the same exhaustive search here deterministically
    // so the parity volumes we read from match the coefficients in `recovery`.
    let valid = set.recoverable_validity_mask();
    let pool = set.valid_parity_volume_numbers();
    let gf = GaloisField::new();
    let mut combo: Vec<usize> = (0..k).collect();
    loop {
        let parity_ids: Vec<u32> = combo.iter().map(|&i| pool[i]).collect();
        if let Ok(candidate) = crate::matrix::build_recovery_matrix(&gf, &valid, &parity_ids) {
            if candidate.rows == recovery.rows {
                return Ok(parity_ids);
            }
        }
        if !advance(&mut combo, pool.len()) {
            return Err(ParError::input("could not re-derive the parity combination used for recovery"));
        }
    }
}

fn advance(combo: &mut [usize], pool_len: usize) -> bool {
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

pub fn reader_for_volume(path: &Path, data_offset: u64, data_size: u64) -> Result<ChunkReader> {
    ChunkReader::open(path, data_offset, Some(data_size), false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::{encode, EncodeInput};
    use crate::host::silent_host;
    use std::io::Write as _;

    fn write_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::File::create(&path).unwrap().write_all(content).unwrap();
        path
    }

    #[test]
    fn repairs_single_deleted_file_with_one_parity_volume() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_file(dir.path(), "a.bin", b"alpha file contents, reasonably long to span a chunk boundary-ish");
        let b = write_file(dir.path(), "b.bin", b"beta file, shorter");
        let inputs = vec![
            EncodeInput { path: a.clone(), name: "a.bin".into(), recoverable: true },
            EncodeInput { path: b, name: "b.bin".into(), recoverable: true },
        ];
        let mut host = silent_host(1 << 20);
        encode(&inputs, 1, dir.path(), "set", &mut host).unwrap();

        std::fs::remove_file(&a).unwrap();

        let mut set = Set::load(&dir.path().join("set.par")).unwrap();
        set.classify_data_files(&mut host).unwrap();
        set.validate_parity_volumes().unwrap();
        assert!(set.recovery_feasible());

        repair(&mut set, &mut host, None).unwrap();
        let restored = std::fs::read(&a).unwrap();
        assert_eq!(restored, b"alpha file contents, reasonably long to span a chunk boundary-ish");
    }
}
