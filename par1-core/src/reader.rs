//! Fixed 64 KiB chunked reader with optional double-buffered prefetch and
//! zero-padded tail reads, per spec's chunk reader design: after EOF,
//! `finish_read` keeps returning zero-filled chunks with `count = 0` so
//! callers processing fixed-size windows don't need a separate branch.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::Result;

pub const CHUNK_SIZE: usize = 64 * 1024;

pub struct ChunkReader {
    file: File,
    remaining: u64,
    overlapped: bool,
    buffers: [Vec<u8>; 2],
    next_buf: usize,
    pending_count: usize,
    primed: bool,
    eof: bool,
}

impl ChunkReader {
    pub fn open(path: &Path, start_offset: u64, max_length: Option<u64>, overlapped: bool) -> Result<Self> {
        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(start_offset))?;
        let file_len = file.metadata()?.len();
        let remaining = match max_length {
            Some(m) => m.min(file_len.saturating_sub(start_offset)),
            None => file_len.saturating_sub(start_offset),
        };
        Ok(ChunkReader {
            file,
            remaining,
            overlapped,
            buffers: [vec![0u8; CHUNK_SIZE], vec![0u8; CHUNK_SIZE]],
            next_buf: 0,
            pending_count: 0,
            primed: false,
            eof: false,
        })
    }

    /// Schedule the next chunk read. No-op when overlapped I/O is disabled
    /// (the single-buffer path reads synchronously inside `finish_read`).
    pub fn start_read(&mut self) -> Result<()> {
        if !self.overlapped || self.primed {
            return Ok(());
        }
        self.fill_buffer(self.next_buf)?;
        self.primed = true;
        Ok(())
    }

    /// Return the most recently completed chunk: `(buffer, count)`. A
    /// `count` of 0 after EOF signals callers may still index the buffer
    /// (it is zero-filled) without special-casing the tail.
    pub fn finish_read(&mut self) -> Result<(&[u8], usize)> {
        if !self.overlapped {
            self.fill_buffer(self.next_buf)?;
        } else if !self.primed {
            self.fill_buffer(self.next_buf)?;
        }
        self.primed = false;
        let buf = self.next_buf;
        self.next_buf = 1 - self.next_buf;
        Ok((&self.buffers[buf], self.pending_count))
    }

    fn fill_buffer(&mut self, idx: usize) -> Result<()> {
        if self.eof || self.remaining == 0 {
            self.buffers[idx].iter_mut().for_each(|b| *b = 0);
            self.pending_count = 0;
            self.eof = true;
            return Ok(());
        }
        let want = CHUNK_SIZE.min(self.remaining as usize);
        let buf = &mut self.buffers[idx];
        buf[..want].fill(0);
        self.file.read_exact(&mut buf[..want])?;
        if want < CHUNK_SIZE {
            buf[want..].fill(0);
        }
        self.remaining -= want as u64;
        self.pending_count = want;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn zero_fills_past_eof() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        std::fs::File::create(&path).unwrap().write_all(&[7u8; 10]).unwrap();

        let mut r = ChunkReader::open(&path, 0, None, false).unwrap();
        let (buf, count) = r.finish_read().unwrap();
        assert_eq!(count, 10);
        assert_eq!(&buf[..10], &[7u8; 10]);
        assert!(buf[10..].iter().all(|&b| b == 0));

        let (_buf, count2) = r.finish_read().unwrap();
        assert_eq!(count2, 0);
    }

    #[test]
    fn overlapped_matches_sequential() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        let data: Vec<u8> = (0..(CHUNK_SIZE * 2 + 123)).map(|i| (i % 251) as u8).collect();
        std::fs::File::create(&path).unwrap().write_all(&data).unwrap();

        let mut seq = ChunkReader::open(&path, 0, None, false).unwrap();
        let mut over = ChunkReader::open(&path, 0, None, true).unwrap();
        over.start_read().unwrap();
        loop {
            let (sbuf, scount) = seq.finish_read().unwrap();
            let sbuf = sbuf.to_vec();
            over.start_read().unwrap();
            let (obuf, ocount) = over.finish_read().unwrap();
            assert_eq!(scount, ocount);
            assert_eq!(sbuf, obuf.to_vec());
            if scount == 0 {
                break;
            }
        }
    }
}
