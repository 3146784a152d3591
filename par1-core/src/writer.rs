//! Sequential buffered writer: `open` truncates and creates, `write`
//! appends, `close` flushes. Errors are reported, not retried.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::Result;

pub struct ChunkWriter {
    inner: Option<BufWriter<File>>,
}

impl ChunkWriter {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        Ok(ChunkWriter {
            inner: Some(BufWriter::new(file)),
        })
    }

    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let w = self.inner.as_mut().expect("write after close");
        w.write_all(bytes)?;
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        if let Some(mut w) = self.inner.take() {
            w.flush()?;
        }
        Ok(())
    }
}

impl Drop for ChunkWriter {
    fn drop(&mut self) {
        if let Some(w) = self.inner.as_mut() {
            let _ = w.flush();
        }
    }
}
