use std::io::Read;

use super::{MemorySource, SourceHandle, SourceResult};
use crate::error::IoError;

/// The archive kinds a [`CompressedSource`] can transparently unwrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    #[cfg(feature = "gzip")]
    Gzip,
    #[cfg(feature = "bzip2")]
    Bzip2,
    #[cfg(feature = "zip")]
    Zip,
}

/// A read-only source that transparently decompresses a gzip, bzip2, or zip
/// archive into memory the first time it's opened.
///
/// None of these formats support random-access decompression, so rather than
/// re-decoding on every read this eagerly materializes the decompressed
/// bytes once at construction and serves subsequent reads out of a
/// [`MemorySource`]. For zip archives, the first entry is used unless a
/// member name is given explicitly.
#[derive(Debug)]
pub struct CompressedSource {
    inner: MemorySource,
}

impl CompressedSource {
    pub fn open_gzip<R: Read>(mut reader: R) -> SourceResult<Self> {
        #[cfg(feature = "gzip")]
        {
            let mut decoder = flate2::read::GzDecoder::new(&mut reader);
            let mut data = Vec::new();
            decoder.read_to_end(&mut data).map_err(IoError::from)?;
            Ok(CompressedSource {
                inner: MemorySource::from_vec(data),
            })
        }
        #[cfg(not(feature = "gzip"))]
        {
            let _ = reader;
            Err(IoError::Other(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "gzip support not compiled in",
            ))
            .into())
        }
    }

    pub fn open_bzip2<R: Read>(mut reader: R) -> SourceResult<Self> {
        #[cfg(feature = "bzip2")]
        {
            let mut decoder = bzip2::read::BzDecoder::new(&mut reader);
            let mut data = Vec::new();
            decoder.read_to_end(&mut data).map_err(IoError::from)?;
            Ok(CompressedSource {
                inner: MemorySource::from_vec(data),
            })
        }
        #[cfg(not(feature = "bzip2"))]
        {
            let _ = reader;
            Err(IoError::Other(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "bzip2 support not compiled in",
            ))
            .into())
        }
    }

    /// Open a zip archive, decompressing `member` (or the first entry, if
    /// `member` is `None`) into memory.
    #[cfg(feature = "zip")]
    pub fn open_zip<R: Read + std::io::Seek>(
        reader: R,
        member: Option<&str>,
    ) -> SourceResult<Self> {
        let mut archive = zip::ZipArchive::new(reader).map_err(zip_to_io)?;
        let mut entry = match member {
            Some(name) => archive.by_name(name).map_err(zip_to_io)?,
            None => archive.by_index(0).map_err(zip_to_io)?,
        };
        let mut data = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut data).map_err(IoError::from)?;
        Ok(CompressedSource {
            inner: MemorySource::from_vec(data),
        })
    }

    #[cfg(not(feature = "zip"))]
    pub fn open_zip<R: Read>(_reader: R, _member: Option<&str>) -> SourceResult<Self> {
        Err(IoError::Other(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "zip support not compiled in",
        ))
        .into())
    }
}

#[cfg(feature = "zip")]
fn zip_to_io(e: zip::result::ZipError) -> IoError {
    IoError::Other(std::io::Error::new(std::io::ErrorKind::Other, e))
}

impl SourceHandle for CompressedSource {
    fn len(&mut self) -> SourceResult<u64> {
        self.inner.len()
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> SourceResult<usize> {
        self.inner.read_at(offset, buf)
    }

    fn write_at(&mut self, _offset: u64, _buf: &[u8]) -> SourceResult<()> {
        Err(IoError::ReadOnly.into())
    }

    fn set_len(&mut self, _len: u64) -> SourceResult<()> {
        Err(IoError::ReadOnly.into())
    }

    fn is_read_only(&self) -> bool {
        true
    }
}

#[cfg(test)]
#[cfg(feature = "gzip")]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn round_trips_gzip() {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
        encoder.write_all(b"hello tiff").unwrap();
        let compressed = encoder.finish().unwrap();

        let mut source = CompressedSource::open_gzip(std::io::Cursor::new(compressed)).unwrap();
        let len = source.len().unwrap();
        let mut buf = vec![0u8; len as usize];
        source.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf, b"hello tiff");
    }
}
