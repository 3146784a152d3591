//! Streaming encoder: folds all recoverable data files through the GF
//! kernel to produce `M` parity volumes, then stamps final headers
//! (placeholder -> metadata -> body hash), per spec.md §4.H.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{ParError, Result};
use crate::fingerprint::{digest, Fingerprint, Md5};
use crate::gf::GaloisField;
use crate::header::{FileEntry, FileHeader, HEADER_SIZE, VERSION_1_0};
use crate::host::HostServices;
use crate::matrix::vandermonde;
use crate::reader::{ChunkReader, CHUNK_SIZE};
use crate::set::Set;
use crate::writer::ChunkWriter;

const PREFIX_LEN: u64 = 16 * 1024;

pub struct EncodeInput {
    pub path: PathBuf,
    pub name: String,
    pub recoverable: bool,
}

/// Encode `inputs` into `parity_count` parity volumes plus one index
/// volume, written as `{base_name}.par`, `{base_name}.p01`, ...
/// `{base_name}.p{NN}` into `output_dir`. Returns the resulting `Set`,
/// read back from the freshly written index volume.
pub fn encode(
    inputs: &[EncodeInput],
    parity_count: usize,
    output_dir: &Path,
    base_name: &str,
    host: &mut HostServices,
) -> Result<Set> {
    let recoverable_indices: Vec<usize> = inputs
        .iter()
        .enumerate()
        .filter(|(_, f)| f.recoverable)
        .map(|(i, _)| i)
        .collect();
    let n = recoverable_indices.len();
    let m = parity_count;

    if m > n || n + m > 255 {
        return Err(ParError::input(format!(
            "invalid volume counts: N={} recoverable files, M={} parity volumes (need M <= N and N+M <= 255)",
            n, m
        )));
    }
    for &idx in &recoverable_indices {
        let size = std::fs::metadata(&inputs[idx].path)?.len();
        if size == 0 {
            return Err(ParError::input(format!(
                "recoverable file '{}' is zero-size",
                inputs[idx].name
            )));
        }
    }

    let gf = GaloisField::new();
    let v = vandermonde(&gf, n, m);
    // Precompute the per-(recoverable file, parity volume) LUT once; the
    // scalar driving it is fixed for the whole pass.
    let luts: Vec<Vec<[u8; 256]>> = (0..n).map(|r| (0..m).map(|j| gf.make_lut(v[j][r])).collect()).collect();

    let mut l: u64 = 0;
    for &idx in &recoverable_indices {
        l = l.max(std::fs::metadata(&inputs[idx].path)?.len());
    }

    let chunk_size = host.working_chunk_size(l).max(CHUNK_SIZE);

    struct FileState {
        reader: ChunkReader,
        full_md5: Md5,
        prefix_md5: Md5,
        prefix_done: bool,
        bytes_read: u64,
        size: u64,
    }

    let mut states: Vec<FileState> = Vec::with_capacity(inputs.len());
    for input in inputs {
        let size = std::fs::metadata(&input.path)?.len();
        states.push(FileState {
            reader: ChunkReader::open(&input.path, 0, None, host.overlapped_io)?,
            full_md5: Md5::new(),
            prefix_md5: Md5::new(),
            prefix_done: size == 0,
            bytes_read: 0,
            size,
        });
    }

    let mut parity_buffers: Vec<Vec<u8>> = vec![vec![0u8; chunk_size]; m];
    let mut parity_paths: Vec<PathBuf> = Vec::with_capacity(m + 1);
    let index_path = output_dir.join(format!("{}.par", base_name));
    parity_paths.push(index_path.clone());
    for j in 1..=m {
        parity_paths.push(output_dir.join(format!("{}.p{:02}", base_name, j)));
    }

    // Entry byte-size only depends on the file name, not on file contents,
    // so the file-list size (and therefore the data offset) is known
    // before a single hash has been computed. Reserve that much space with
    // a zeroed placeholder header so the parity body lands after it
    // instead of being overwritten by the real header once it's known.
    let placeholder_file_list_size: u64 = inputs.iter().map(|f| FileEntry::new(&f.name, 0, f.recoverable, Fingerprint([0u8; 16]), Fingerprint([0u8; 16])).entry_size()).sum();
    let placeholder = vec![0u8; (HEADER_SIZE + placeholder_file_list_size) as usize];

    let mut parity_writers: Vec<ChunkWriter> = Vec::with_capacity(m);
    for path in parity_paths.iter().skip(1) {
        let mut w = ChunkWriter::open(path)?;
        w.write(&placeholder)?;
        parity_writers.push(w);
    }
    // Volume 0 (index-only) carries no parity body but still needs its
    // header-and-file-list space reserved on disk before the patch below.
    let mut index_writer = ChunkWriter::open(&index_path)?;
    index_writer.write(&placeholder)?;
    index_writer.close()?;

    let mut offset: u64 = 0;
    while l > 0 && offset < l {
        let step = chunk_size.min((l - offset) as usize);
        for buf in parity_buffers.iter_mut() {
            buf[..step].fill(0);
        }

        for (file_idx, state) in states.iter_mut().enumerate() {
            if offset >= state.size {
                continue;
            }
            let mut consumed = 0usize;
            while consumed < step {
                if offset + consumed as u64 >= state.size {
                    break;
                }
                state.reader.start_read()?;
                let (chunk, count) = state.reader.finish_read()?;
                if count == 0 {
                    break;
                }
                let take = count.min(step - consumed);
                state.full_md5.absorb(&chunk[..take])?;
                if !state.prefix_done {
                    let remaining_prefix = PREFIX_LEN.saturating_sub(state.bytes_read);
                    let prefix_take = (remaining_prefix as usize).min(take);
                    if prefix_take > 0 {
                        state.prefix_md5.absorb(&chunk[..prefix_take])?;
                    }
                    if state.bytes_read + take as u64 >= PREFIX_LEN {
                        state.prefix_done = true;
                    }
                }
                if let Some(r) = recoverable_indices.iter().position(|&i| i == file_idx) {
                    for j in 0..m {
                        let lut = &luts[r][j];
                        GaloisField::xor_scaled_into(lut, &chunk[..take], &mut parity_buffers[j][consumed..consumed + take]);
                    }
                }
                state.bytes_read += take as u64;
                consumed += take;
            }
        }

        for (j, writer) in parity_writers.iter_mut().enumerate() {
            writer.write(&parity_buffers[j][..step])?;
        }

        offset += step as u64;
        if !host.tick("encode", ((offset * 100 / l) as u8).min(100)) {
            return Err(ParError::Cancelled);
        }
    }
    for writer in parity_writers.iter_mut() {
        writer.close()?;
    }

    // Finalise per-file digests, including non-recoverable files (whose
    // bytes were never folded into parity but whose hashes are still
    // recorded in the file list).
    let mut file_entries = Vec::with_capacity(inputs.len());
    let mut recoverable_full_hashes: Vec<Fingerprint> = Vec::with_capacity(n);
    for (idx, input) in inputs.iter().enumerate() {
        let state = &mut states[idx];
        // The main loop above streams (and hashes) every file, recoverable
        // or not, for whichever of its bytes fall within [0, l). A
        // non-recoverable file longer than l has a tail beyond that window
        // that was never absorbed; catch it up here without re-reading
        // (and re-hashing) the bytes the main loop already covered.
        let already_streamed = state.size.min(l);
        if state.size > already_streamed {
            let mut f = File::open(&input.path)?;
            f.seek(SeekFrom::Start(already_streamed))?;
            let mut tail = Vec::new();
            f.read_to_end(&mut tail)?;
            state.full_md5.absorb(&tail)?;
            if !state.prefix_done {
                let remaining_prefix = PREFIX_LEN.saturating_sub(state.bytes_read);
                if remaining_prefix > 0 {
                    let take = (remaining_prefix as usize).min(tail.len());
                    state.prefix_md5.absorb(&tail[..take])?;
                }
            }
        }
        let full_hash = state.full_md5.finish()?;
        let prefix_hash = if state.size <= PREFIX_LEN { full_hash } else { state.prefix_md5.finish()? };
        if input.recoverable {
            recoverable_full_hashes.push(full_hash);
        }
        file_entries.push(FileEntry::new(&input.name, state.size, input.recoverable, full_hash, prefix_hash));
    }

    let set_hash = {
        let mut md5 = Md5::new();
        for fh in &recoverable_full_hashes {
            md5.absorb(fh.as_bytes())?;
        }
        md5.finish()?
    };

    let generator = FileHeader::generator_tag(env!("CARGO_PKG_VERSION"));
    let file_list_size: u64 = file_entries.iter().map(|e| e.entry_size()).sum();

    for (vol_idx, path) in parity_paths.iter().enumerate() {
        let volume_number = vol_idx as u64;
        let data_size = if volume_number == 0 { 0 } else { l };
        let header = FileHeader {
            version: VERSION_1_0,
            generator,
            body_hash: Fingerprint([0u8; 16]),
            set_hash,
            volume_number,
            file_count: file_entries.len() as u64,
            file_list_offset: HEADER_SIZE,
            file_list_size,
            data_offset: HEADER_SIZE + file_list_size,
            data_size,
        };
        patch_header_and_file_list(path, &header, &file_entries)?;
        let body_hash = rehash_body(path)?;
        patch_body_hash(path, body_hash)?;
    }

    Set::load(&index_path)
}

fn patch_header_and_file_list(path: &Path, header: &FileHeader, entries: &[FileEntry]) -> Result<()> {
    let mut f = OpenOptions::new().read(true).write(true).open(path)?;
    f.seek(SeekFrom::Start(0))?;
    f.write_all(&header.to_bytes())?;
    for e in entries {
        f.write_all(&e.to_bytes())?;
    }
    f.flush()?;
    Ok(())
}

fn rehash_body(path: &Path) -> Result<Fingerprint> {
    let mut f = File::open(path)?;
    f.seek(SeekFrom::Start(0x20))?;
    let mut buf = Vec::new();
    f.read_to_end(&mut buf)?;
    Ok(digest(&buf))
}

fn patch_body_hash(path: &Path, body_hash: Fingerprint) -> Result<()> {
    let mut f = OpenOptions::new().write(true).open(path)?;
    f.seek(SeekFrom::Start(0x10))?;
    f.write_all(body_hash.as_bytes())?;
    f.flush()?;
    Ok(())
}

/// Build `EncodeInput`s for every regular file directly inside `dir`, in
/// directory-listing order, all marked recoverable. Callers wanting a mix
/// of recoverable/non-recoverable files construct `EncodeInput`s directly.
pub fn inputs_from_dir(dir: &Path) -> Result<Vec<EncodeInput>> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?.filter_map(|e| e.ok()).map(|e| e.path()).filter(|p| p.is_file()).collect();
    entries.sort();
    Ok(entries
        .into_iter()
        .filter_map(|path| {
            let name = path.file_name()?.to_string_lossy().to_string();
            Some(EncodeInput { path, name, recoverable: true })
        })
        .collect())
}
