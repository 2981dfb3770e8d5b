use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use super::{SourceHandle, SourceResult};
use crate::error::IoError;

/// A source backed by a local file, opened read-only or read-write.
///
/// Access goes through ordinary seek+read/write rather than a memory map:
/// a TIFF reader and a writer can share the same open handle to interleave
/// reads of already-written strips with appends of new ones, which a
/// read-only mmap cannot support. [`memmap2`] remains a dependency for
/// callers that want to map a read-only file directly (e.g. to hand a
/// zero-copy byte slice to a compression codec).
#[derive(Debug)]
pub struct FileSource {
    file: File,
    read_only: bool,
}

impl FileSource {
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> SourceResult<Self> {
        let file = File::open(path).map_err(IoError::from)?;
        Ok(FileSource {
            file,
            read_only: true,
        })
    }

    pub fn open_read_write<P: AsRef<Path>>(path: P) -> SourceResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(IoError::from)?;
        Ok(FileSource {
            file,
            read_only: false,
        })
    }

    /// Map the file read-only, for callers that want a zero-copy byte slice.
    pub fn mmap(&self) -> SourceResult<memmap2::Mmap> {
        // Safety: the caller is responsible for not concurrently truncating
        // the file out from under the mapping; the engine never does so
        // while a mapping handed out through this method is alive.
        unsafe { memmap2::Mmap::map(&self.file).map_err(|e| IoError::from(e).into()) }
    }
}

impl SourceHandle for FileSource {
    fn len(&mut self) -> SourceResult<u64> {
        Ok(self.file.metadata().map_err(IoError::from)?.len())
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> SourceResult<usize> {
        self.file.seek(SeekFrom::Start(offset)).map_err(IoError::from)?;
        let mut total = 0;
        while total < buf.len() {
            match self.file.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) => return Err(IoError::from(e).into()),
            }
        }
        Ok(total)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> SourceResult<()> {
        if self.read_only {
            return Err(IoError::ReadOnly.into());
        }
        self.file.seek(SeekFrom::Start(offset)).map_err(IoError::from)?;
        self.file.write_all(buf).map_err(IoError::from)?;
        Ok(())
    }

    fn set_len(&mut self, len: u64) -> SourceResult<()> {
        if self.read_only {
            return Err(IoError::ReadOnly.into());
        }
        self.file.set_len(len).map_err(IoError::from)?;
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}
