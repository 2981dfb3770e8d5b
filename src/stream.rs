//! A buffered, endian-aware, seekable view over a [`crate::source::Source`].
//!
//! Where `Source` only knows how to read and write absolute byte ranges,
//! `BufferedStream` adds the things the directory model and parser actually
//! want: a movable cursor, typed primitive reads/writes that respect a
//! mutable byte order, and the string conventions TIFF and its proprietary
//! extensions use (NUL-terminated fixed buffers, u16-length-prefixed pascal
//! strings, newline-delimited lines).

use crate::error::{IoError, TiffResult};
use crate::source::{Source, SourceHandle};
use crate::util::ByteOrder;

/// Default size of the read-ahead buffer kept around the cursor.
const BUFFER_SIZE: usize = 8 * 1024;

/// A buffered, random-access, endian-aware stream over a source handle.
pub struct BufferedStream {
    source: Source,
    byte_order: ByteOrder,
    pos: u64,
    /// Bytes currently held in the read-ahead buffer, and the absolute
    /// offset of `buf[0]`.
    buf: Vec<u8>,
    buf_start: u64,
}

impl BufferedStream {
    pub fn new(source: Source, byte_order: ByteOrder) -> Self {
        BufferedStream {
            source,
            byte_order,
            pos: 0,
            buf: Vec::new(),
            buf_start: 0,
        }
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// Changes the byte order future typed reads/writes are interpreted in.
    /// TIFF readers set this once from the header magic; the writer sets it
    /// once from its construction-time config.
    pub fn set_byte_order(&mut self, order: ByteOrder) {
        self.byte_order = order;
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn seek(&mut self, offset: u64) {
        self.pos = offset;
    }

    pub fn len(&mut self) -> TiffResult<u64> {
        self.source.len()
    }

    pub fn set_len(&mut self, len: u64) -> TiffResult<()> {
        self.invalidate_buffer();
        self.source.set_len(len)
    }

    fn invalidate_buffer(&mut self) {
        self.buf.clear();
        self.buf_start = 0;
    }

    /// Fills the read-ahead buffer so it covers `self.pos`, growing it up to
    /// `BUFFER_SIZE` bytes starting there. A no-op if the buffer already
    /// covers the current position.
    fn ensure_buffered(&mut self, needed: usize) -> TiffResult<()> {
        let covers = self.pos >= self.buf_start
            && self.pos + needed as u64 <= self.buf_start + self.buf.len() as u64;
        if covers {
            return Ok(());
        }
        let want = needed.max(BUFFER_SIZE);
        let mut tmp = vec![0u8; want];
        let n = self.source.read_at(self.pos, &mut tmp)?;
        tmp.truncate(n);
        self.buf = tmp;
        self.buf_start = self.pos;
        Ok(())
    }

    /// Read exactly `buf.len()` bytes from the current position, advancing
    /// the cursor. This straddles the read-ahead buffer's boundary
    /// correctly: if the requested range only partially overlaps the
    /// buffer, the buffer is refilled rather than served short.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> TiffResult<()> {
        if buf.len() <= BUFFER_SIZE {
            self.ensure_buffered(buf.len())?;
            let rel = (self.pos - self.buf_start) as usize;
            if rel + buf.len() <= self.buf.len() {
                buf.copy_from_slice(&self.buf[rel..rel + buf.len()]);
                self.pos += buf.len() as u64;
                return Ok(());
            }
        }
        // Falls outside what buffering can serve in one shot (either larger
        // than the buffer, or ran past EOF while buffered) - go straight to
        // the source and invalidate the stale buffer.
        self.invalidate_buffer();
        self.source.read_exact_at(self.pos, buf)?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    /// Like [`Self::read_exact`] but does not require the full buffer to be
    /// available; returns the number of bytes actually read.
    pub fn read(&mut self, buf: &mut [u8]) -> TiffResult<usize> {
        self.invalidate_buffer();
        let n = self.source.read_at(self.pos, buf)?;
        self.pos += n as u64;
        Ok(n)
    }

    pub fn write_all(&mut self, buf: &[u8]) -> TiffResult<()> {
        self.invalidate_buffer();
        self.source.write_at(self.pos, buf)?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    pub fn is_read_only(&self) -> bool {
        self.source.is_read_only()
    }

    /// Unwraps the underlying source, e.g. to hand a freshly written
    /// in-memory buffer back to a reader without a round trip through disk.
    pub fn into_source(self) -> Source {
        self.source
    }

    // -- typed primitive reads --------------------------------------------

    pub fn read_u8(&mut self) -> TiffResult<u8> {
        let mut b = [0u8; 1];
        self.read_exact(&mut b)?;
        Ok(b[0])
    }

    pub fn read_i8(&mut self) -> TiffResult<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u16(&mut self) -> TiffResult<u16> {
        let mut b = [0u8; 2];
        self.read_exact(&mut b)?;
        Ok(self.byte_order.read_u16(b))
    }

    pub fn read_i16(&mut self) -> TiffResult<i16> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_u32(&mut self) -> TiffResult<u32> {
        let mut b = [0u8; 4];
        self.read_exact(&mut b)?;
        Ok(self.byte_order.read_u32(b))
    }

    pub fn read_i32(&mut self) -> TiffResult<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_u64(&mut self) -> TiffResult<u64> {
        let mut b = [0u8; 8];
        self.read_exact(&mut b)?;
        Ok(self.byte_order.read_u64(b))
    }

    pub fn read_i64(&mut self) -> TiffResult<i64> {
        Ok(self.read_u64()? as i64)
    }

    pub fn read_f32(&mut self) -> TiffResult<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub fn read_f64(&mut self) -> TiffResult<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    /// Reads an unsigned integer stored in exactly `width` bytes (1..=8),
    /// for proprietary tag encodings that don't use a native width.
    pub fn read_uint(&mut self, width: usize) -> TiffResult<u64> {
        let mut b = vec![0u8; width];
        self.read_exact(&mut b)?;
        Ok(self.byte_order.read_uint(&b))
    }

    // -- typed primitive writes --------------------------------------------

    pub fn write_u8(&mut self, v: u8) -> TiffResult<()> {
        self.write_all(&[v])
    }

    pub fn write_u16(&mut self, v: u16) -> TiffResult<()> {
        let b = match self.byte_order {
            ByteOrder::LittleEndian => v.to_le_bytes(),
            ByteOrder::BigEndian => v.to_be_bytes(),
        };
        self.write_all(&b)
    }

    pub fn write_u32(&mut self, v: u32) -> TiffResult<()> {
        let b = match self.byte_order {
            ByteOrder::LittleEndian => v.to_le_bytes(),
            ByteOrder::BigEndian => v.to_be_bytes(),
        };
        self.write_all(&b)
    }

    pub fn write_u64(&mut self, v: u64) -> TiffResult<()> {
        let b = match self.byte_order {
            ByteOrder::LittleEndian => v.to_le_bytes(),
            ByteOrder::BigEndian => v.to_be_bytes(),
        };
        self.write_all(&b)
    }

    pub fn write_f32(&mut self, v: f32) -> TiffResult<()> {
        self.write_u32(v.to_bits())
    }

    pub fn write_f64(&mut self, v: f64) -> TiffResult<()> {
        self.write_u64(v.to_bits())
    }

    // -- string conventions --------------------------------------------

    /// Reads a fixed-size buffer and interprets it as a NUL-terminated ASCII
    /// string (the convention the TIFF spec uses for `ASCII`-typed tags):
    /// bytes after the first NUL, if any, are discarded.
    pub fn read_fixed_ascii(&mut self, size: usize) -> TiffResult<String> {
        let mut buf = vec![0u8; size];
        self.read_exact(&mut buf)?;
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        buf.truncate(end);
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Reads a Pascal-style string: a `u16` byte length followed by that
    /// many bytes of (not necessarily NUL-terminated) ASCII.
    pub fn read_pascal_string(&mut self) -> TiffResult<String> {
        let len = self.read_u16()? as usize;
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    pub fn write_pascal_string(&mut self, s: &str) -> TiffResult<()> {
        let bytes = s.as_bytes();
        let len = u16::try_from(bytes.len()).map_err(|_| IoError::UnexpectedEnd)?;
        self.write_u16(len)?;
        self.write_all(bytes)
    }

    /// Reads one line, delimited by `\n` (a trailing `\r` is stripped), not
    /// including the delimiter. Used by the generic INI-like comment
    /// fallback parser. Returns `None` at EOF with no bytes read.
    pub fn read_line(&mut self) -> TiffResult<Option<String>> {
        let mut line = Vec::new();
        let mut any = false;
        loop {
            let mut b = [0u8; 1];
            let n = self.read(&mut b)?;
            if n == 0 {
                break;
            }
            any = true;
            if b[0] == b'\n' {
                break;
            }
            line.push(b[0]);
        }
        if !any {
            return Ok(None);
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    fn stream_with(data: &[u8], order: ByteOrder) -> BufferedStream {
        BufferedStream::new(Source::Memory(MemorySource::from_vec(data.to_vec())), order)
    }

    #[test]
    fn reads_u16_little_and_big_endian() {
        let mut s = stream_with(&[0x01, 0x02], ByteOrder::LittleEndian);
        assert_eq!(s.read_u16().unwrap(), 0x0201);

        let mut s = stream_with(&[0x01, 0x02], ByteOrder::BigEndian);
        assert_eq!(s.read_u16().unwrap(), 0x0102);
    }

    #[test]
    fn read_straddles_buffer_boundary() {
        let mut data = vec![0u8; BUFFER_SIZE + 16];
        for (i, b) in data.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        let mut s = stream_with(&data, ByteOrder::LittleEndian);
        s.seek(BUFFER_SIZE as u64 - 4);
        let mut buf = [0u8; 8];
        s.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, &data[BUFFER_SIZE - 4..BUFFER_SIZE + 4]);
    }

    #[test]
    fn write_then_read_back() {
        let mut s = BufferedStream::new(Source::Memory(MemorySource::new()), ByteOrder::LittleEndian);
        s.write_u32(0xdead_beef).unwrap();
        s.seek(0);
        assert_eq!(s.read_u32().unwrap(), 0xdead_beef);
    }

    #[test]
    fn fixed_ascii_stops_at_nul() {
        let mut s = stream_with(b"ImageJ\x001.46r\x00\x00", ByteOrder::LittleEndian);
        assert_eq!(s.read_fixed_ascii(13).unwrap(), "ImageJ");
    }

    #[test]
    fn pascal_string_round_trip() {
        let mut s = BufferedStream::new(Source::Memory(MemorySource::new()), ByteOrder::BigEndian);
        s.write_pascal_string("hello").unwrap();
        s.seek(0);
        assert_eq!(s.read_pascal_string().unwrap(), "hello");
    }

    #[test]
    fn read_line_splits_on_newline_and_strips_cr() {
        let mut s = stream_with(b"first\r\nsecond\nthird", ByteOrder::LittleEndian);
        assert_eq!(s.read_line().unwrap().as_deref(), Some("first"));
        assert_eq!(s.read_line().unwrap().as_deref(), Some("second"));
        assert_eq!(s.read_line().unwrap().as_deref(), Some("third"));
        assert_eq!(s.read_line().unwrap(), None);
    }

    #[test]
    fn set_len_truncate_and_zero_fill() {
        let mut s = stream_with(&[1, 2, 3, 4, 5], ByteOrder::LittleEndian);
        s.set_len(2).unwrap();
        assert_eq!(s.len().unwrap(), 2);
        s.set_len(4).unwrap();
        s.seek(2);
        let mut buf = [0xffu8; 2];
        s.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [0, 0]);
    }
}
