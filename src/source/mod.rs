//! Random-access byte sources.
//!
//! A [`SourceHandle`] is the lowest layer of the engine: a place bytes can be
//! read from and, where supported, written to, addressed by absolute offset
//! rather than by a moving cursor. [`crate::stream::BufferedStream`] is built
//! on top of this trait to add endian-aware typed reads, buffering and a
//! seek-like cursor.

mod compressed;
mod file;
mod memory;
#[cfg(feature = "http")]
mod url;

pub use compressed::CompressedSource;
pub use file::FileSource;
pub use memory::MemorySource;
#[cfg(feature = "http")]
pub use url::UrlSource;

use crate::error::{IoError, TiffError};

pub type SourceResult<T> = Result<T, TiffError>;

/// A random-access byte source.
///
/// Implementations are free to be backed by memory, a local file, or a
/// remote resource; callers never need to know which. All methods take
/// `&mut self` even where the underlying resource is logically read-only,
/// since most implementations keep a position-independent but still mutable
/// handle (an open file descriptor, an HTTP client) that does real I/O on
/// every call.
pub trait SourceHandle: Send {
    /// Current length of the source in bytes.
    fn len(&mut self) -> SourceResult<u64>;

    /// Read up to `buf.len()` bytes starting at `offset`. Returns the number
    /// of bytes actually read, which is less than `buf.len()` only at EOF.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> SourceResult<usize>;

    /// Read exactly `buf.len()` bytes, returning
    /// [`crate::error::IoError::UnexpectedEnd`] if the source runs out first.
    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> SourceResult<()> {
        let mut read = 0;
        while read < buf.len() {
            let n = self.read_at(offset + read as u64, &mut buf[read..])?;
            if n == 0 {
                return Err(IoError::UnexpectedEnd.into());
            }
            read += n;
        }
        Ok(())
    }

    /// Write `buf` at `offset`, growing the source if `offset + buf.len()`
    /// exceeds the current length. Returns
    /// [`crate::error::IoError::ReadOnly`] for sources that do not support
    /// writes (URL and compressed-archive sources).
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> SourceResult<()>;

    /// Truncate or zero-extend the source to exactly `len` bytes.
    fn set_len(&mut self, len: u64) -> SourceResult<()>;

    /// Whether [`Self::write_at`] will ever succeed on this source.
    fn is_read_only(&self) -> bool;
}

/// A concrete, enum-dispatched source handle.
///
/// An enum is used instead of `Box<dyn SourceHandle>` for the same reason
/// the slide registry in the wider corpus uses one for its format-specific
/// readers: it keeps the common path allocation-free and lets each variant
/// carry the type its backend actually needs.
pub enum Source {
    Memory(MemorySource),
    File(FileSource),
    #[cfg(feature = "http")]
    Url(UrlSource),
    Compressed(Box<CompressedSource>),
}

impl SourceHandle for Source {
    fn len(&mut self) -> SourceResult<u64> {
        match self {
            Source::Memory(s) => s.len(),
            Source::File(s) => s.len(),
            #[cfg(feature = "http")]
            Source::Url(s) => s.len(),
            Source::Compressed(s) => s.len(),
        }
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> SourceResult<usize> {
        match self {
            Source::Memory(s) => s.read_at(offset, buf),
            Source::File(s) => s.read_at(offset, buf),
            #[cfg(feature = "http")]
            Source::Url(s) => s.read_at(offset, buf),
            Source::Compressed(s) => s.read_at(offset, buf),
        }
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> SourceResult<()> {
        match self {
            Source::Memory(s) => s.write_at(offset, buf),
            Source::File(s) => s.write_at(offset, buf),
            #[cfg(feature = "http")]
            Source::Url(s) => s.write_at(offset, buf),
            Source::Compressed(s) => s.write_at(offset, buf),
        }
    }

    fn set_len(&mut self, len: u64) -> SourceResult<()> {
        match self {
            Source::Memory(s) => s.set_len(len),
            Source::File(s) => s.set_len(len),
            #[cfg(feature = "http")]
            Source::Url(s) => s.set_len(len),
            Source::Compressed(s) => s.set_len(len),
        }
    }

    fn is_read_only(&self) -> bool {
        match self {
            Source::Memory(s) => s.is_read_only(),
            Source::File(s) => s.is_read_only(),
            #[cfg(feature = "http")]
            Source::Url(s) => s.is_read_only(),
            Source::Compressed(s) => s.is_read_only(),
        }
    }
}
