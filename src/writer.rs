//! The TIFF/BigTIFF writer: header, per-plane IFD population, strip
//! assignment and BigTIFF auto-promotion.
//!
//! Each entry's raw bytes are built up front; anything too large to fit
//! inline is written to an external location first, with the entry's
//! value field patched to point at that offset, then the entry count and
//! the entries themselves are written. Byte order is driven by
//! [`WriterConfig`] rather than the host's native endianness, and entries
//! are built directly against [`crate::ifd::BufferedEntry`]/[`crate::tags::Tag`].

use std::sync::Mutex;

use crate::encoder::compression::{CompressionAlgorithm, Compressor, Packbits, Uncompressed};
#[cfg(feature = "deflate")]
use crate::encoder::compression::Deflate;
#[cfg(feature = "lzw")]
use crate::encoder::compression::Lzw;
#[cfg(feature = "zstd")]
use crate::encoder::compression::Zstd;
use crate::error::{ArgsError, TiffError, TiffFormatError, TiffResult};
use crate::ifd::{BufferedEntry, Directory};
use crate::metadata::{AxisType, ImageMetadata, Plane};
use crate::predictor::predict_horizontal;
use crate::source::Source;
use crate::stream::BufferedStream;
use crate::tags::{CompressionMethod, PhotometricInterpretation, SampleFormat, Tag, Type};
use crate::util::ByteOrder;

/// The canonical classic-TIFF offset ceiling: once any offset a plane
/// would need to record exceeds this, the file must either already be
/// BigTIFF or get promoted to it.
const CLASSIC_OFFSET_LIMIT: u64 = i32::MAX as u64;

/// Construction-time choices for a [`TiffWriter`].
#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub little_endian: bool,
    pub compression: CompressionMethod,
    /// Apply horizontal differencing (`Predictor == 2`) before compressing.
    pub predictor: bool,
    /// `None`: auto-promote to BigTIFF when a classic offset would overflow.
    /// `Some(true)`: always write BigTIFF. `Some(false)`: never promote;
    /// overflowing returns [`TiffFormatError::WouldOverflow32`].
    pub force_big_tiff: Option<bool>,
}

impl Default for WriterConfig {
    fn default() -> Self {
        WriterConfig {
            little_endian: true,
            compression: CompressionMethod::None,
            predictor: false,
            force_big_tiff: None,
        }
    }
}

/// Everything needed to reproduce one already-written plane's IFD, kept
/// around so a later BigTIFF promotion can rebuild the file from scratch
/// without re-running the caller's encode step. `compressed` is the exact
/// byte sequence already
/// written for this plane's pixel data - compression doesn't change between
/// classic and BigTIFF, only how offsets into it are encoded.
struct SavedPlane {
    width: u32,
    height: u32,
    bits_per_sample: u16,
    samples_per_pixel: u16,
    sample_format: SampleFormat,
    photometric: PhotometricInterpretation,
    color_table: Option<Vec<(u16, u16, u16)>>,
    description: Option<String>,
    compressed: Vec<u8>,
}

struct WriterInner {
    stream: BufferedStream,
    config: WriterConfig,
    big_tiff: bool,
    first_ifd_ptr_pos: u64,
    prev_next_ifd_ptr_pos: Option<u64>,
    saved: Vec<SavedPlane>,
}

/// A TIFF/BigTIFF writer over one [`Source`]. One instance owns one
/// output stream; concurrent `save_plane` calls from multiple threads
/// serialize on an internal mutex, matching the parser-side per-instance
/// lock.
pub struct TiffWriter {
    inner: Mutex<WriterInner>,
}

impl TiffWriter {
    pub fn create(source: Source, config: WriterConfig) -> TiffResult<Self> {
        let byte_order = if config.little_endian { ByteOrder::LittleEndian } else { ByteOrder::BigEndian };
        let mut stream = BufferedStream::new(source, byte_order);
        let big_tiff = config.force_big_tiff.unwrap_or(false);
        let first_ifd_ptr_pos = write_header(&mut stream, big_tiff)?;
        Ok(TiffWriter {
            inner: Mutex::new(WriterInner {
                stream,
                config,
                big_tiff,
                first_ifd_ptr_pos,
                prev_next_ifd_ptr_pos: None,
                saved: Vec::new(),
            }),
        })
    }

    pub fn is_big_tiff(&self) -> bool {
        self.inner.lock().unwrap().big_tiff
    }

    /// Unwraps the underlying source the writer has been streaming bytes
    /// into. Useful for tests and for in-memory round trips that never
    /// touch disk; a writer backed by a real file simply drops this.
    pub fn into_source(self) -> Source {
        self.inner.into_inner().unwrap().stream.into_source()
    }

    /// Appends one plane. `description`, if given, is written as the
    /// `ImageDescription` tag verbatim (callers wanting ImageJ/MetaMorph
    /// dialect text build that string themselves - this layer only writes
    /// bytes, it does not compose comment conventions).
    pub fn save_plane(&self, meta: &ImageMetadata, plane: &Plane, description: Option<&str>) -> TiffResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.save_plane(meta, plane, description)
    }
}

impl WriterInner {
    fn save_plane(&mut self, meta: &ImageMetadata, plane: &Plane, description: Option<&str>) -> TiffResult<()> {
        plane.validate(meta)?;

        let width = u32::try_from(meta.width()).map_err(|_| ArgsError::IntegerOverflow)?;
        let height = u32::try_from(meta.height()).map_err(|_| ArgsError::IntegerOverflow)?;
        let samples_per_pixel = u16::try_from(
            meta.axis_length(&AxisType::Channel).unwrap_or(1),
        )
        .map_err(|_| ArgsError::IntegerOverflow)?;
        let bits_per_sample = u16::try_from(meta.bits_per_pixel).map_err(|_| ArgsError::IntegerOverflow)?;
        let sample_format = sample_format_of(meta.pixel_type);
        let photometric = if meta.indexed {
            PhotometricInterpretation::RGBPalette
        } else if samples_per_pixel >= 3 {
            PhotometricInterpretation::RGB
        } else {
            PhotometricInterpretation::BlackIsZero
        };

        let mut raw = plane.bytes.clone();
        if self.config.predictor {
            let row_bytes = width as usize * samples_per_pixel as usize * (bits_per_sample as usize / 8).max(1);
            for row in raw.chunks_mut(row_bytes) {
                predict_horizontal(row, bits_per_sample, samples_per_pixel as usize);
            }
        }

        let mut compressed = Vec::new();
        let mut compressor = compressor_for(self.config.compression);
        compressor
            .write_to(&mut compressed, &raw)
            .map_err(TiffError::from)?;

        self.ensure_capacity_for(compressed.len() as u64)?;

        self.write_plane_record(
            width,
            height,
            bits_per_sample,
            samples_per_pixel,
            sample_format,
            photometric,
            meta.color_table.clone(),
            description.map(str::to_string),
            &compressed,
        )?;

        self.saved.push(SavedPlane {
            width,
            height,
            bits_per_sample,
            samples_per_pixel,
            sample_format,
            photometric,
            color_table: meta.color_table.clone(),
            description: description.map(str::to_string),
            compressed,
        });

        Ok(())
    }

    /// Checks whether appending `additional_bytes` of pixel data (plus a
    /// conservative estimate for its IFD) would push any offset past the
    /// classic 32-bit ceiling, and promotes to BigTIFF first if so.
    fn ensure_capacity_for(&mut self, additional_bytes: u64) -> TiffResult<()> {
        if self.big_tiff {
            return Ok(());
        }
        let current_end = self.stream.len()?;
        // Conservative: pixel bytes plus a generously sized IFD trailer.
        let prospective = current_end.saturating_add(additional_bytes).saturating_add(4096);
        if prospective <= CLASSIC_OFFSET_LIMIT {
            return Ok(());
        }
        match self.config.force_big_tiff {
            Some(false) => Err(TiffFormatError::WouldOverflow32.into()),
            _ => self.rebuild_as_big_tiff(),
        }
    }

    /// Rewrites the entire file in BigTIFF form from the planes saved so
    /// far. Promotion is a bounded, one-time rebuild rather than a
    /// streaming rewrite, since widening the IFD entry layout from 12 to
    /// 20 bytes would otherwise require shifting
    /// every byte written after the first promoted IFD).
    fn rebuild_as_big_tiff(&mut self) -> TiffResult<()> {
        self.stream.set_len(0)?;
        self.stream.seek(0);
        self.big_tiff = true;
        self.first_ifd_ptr_pos = write_header(&mut self.stream, true)?;
        self.prev_next_ifd_ptr_pos = None;

        let saved = std::mem::take(&mut self.saved);
        for sp in &saved {
            self.write_plane_record(
                sp.width,
                sp.height,
                sp.bits_per_sample,
                sp.samples_per_pixel,
                sp.sample_format,
                sp.photometric,
                sp.color_table.clone(),
                sp.description.clone(),
                &sp.compressed,
            )?;
        }
        self.saved = saved;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn write_plane_record(
        &mut self,
        width: u32,
        height: u32,
        bits_per_sample: u16,
        samples_per_pixel: u16,
        sample_format: SampleFormat,
        photometric: PhotometricInterpretation,
        color_table: Option<Vec<(u16, u16, u16)>>,
        description: Option<String>,
        compressed: &[u8],
    ) -> TiffResult<()> {
        let order = self.stream.byte_order();
        let pixel_pos = self.stream.len()?;
        self.stream.seek(pixel_pos);
        self.stream.write_all(compressed)?;

        let mut dir: Directory<BufferedEntry> = Directory::new();
        dir.insert(Tag::ImageWidth, long_entry(&[width], order));
        dir.insert(Tag::ImageLength, long_entry(&[height], order));
        dir.insert(
            Tag::BitsPerSample,
            short_entry(&vec![bits_per_sample; samples_per_pixel.max(1) as usize], order),
        );
        dir.insert(
            Tag::Compression,
            short_entry(&[self.config.compression.to_u16()], order),
        );
        dir.insert(Tag::PhotometricInterpretation, short_entry(&[photometric.to_u16()], order));
        dir.insert(Tag::SamplesPerPixel, short_entry(&[samples_per_pixel], order));
        dir.insert(Tag::RowsPerStrip, long_entry(&[height], order));
        dir.insert(Tag::SampleFormat, short_entry(&[sample_format.to_u16()], order));
        if self.config.predictor {
            dir.insert(Tag::Predictor, short_entry(&[crate::tags::Predictor::Horizontal.to_u16()], order));
        }
        if let Some(desc) = &description {
            dir.insert(Tag::ImageDescription, ascii_entry(desc));
        }
        if let Some(table) = &color_table {
            dir.insert(Tag::ColorMap, color_map_entry(table, order));
        }

        let compressed_len = compressed.len() as u64;
        if self.big_tiff {
            dir.insert(Tag::StripOffsets, long8_entry(&[pixel_pos], order));
            dir.insert(Tag::StripByteCounts, long8_entry(&[compressed_len], order));
        } else {
            let offset = u32::try_from(pixel_pos).map_err(|_| ArgsError::IntegerOverflow)?;
            let len = u32::try_from(compressed_len).map_err(|_| ArgsError::IntegerOverflow)?;
            dir.insert(Tag::StripOffsets, long_entry(&[offset], order));
            dir.insert(Tag::StripByteCounts, long_entry(&[len], order));
        }

        let (ifd_pos, next_ptr_pos) = write_directory(&mut self.stream, &mut dir, self.big_tiff)?;

        match self.prev_next_ifd_ptr_pos {
            Some(prev) => patch_pointer(&mut self.stream, prev, ifd_pos, self.big_tiff)?,
            None => patch_pointer(&mut self.stream, self.first_ifd_ptr_pos, ifd_pos, self.big_tiff)?,
        }
        self.prev_next_ifd_ptr_pos = Some(next_ptr_pos);

        Ok(())
    }
}

fn sample_format_of(pixel_type: crate::metadata::PixelType) -> SampleFormat {
    use crate::metadata::PixelType::*;
    match pixel_type {
        Int8 | Int16 | Int32 => SampleFormat::Int,
        Uint8 | Uint16 | Uint32 => SampleFormat::Uint,
        Float32 | Float64 => SampleFormat::IEEEFP,
    }
}

fn compressor_for(method: CompressionMethod) -> Compressor {
    match method {
        #[cfg(feature = "lzw")]
        CompressionMethod::LZW => Compressor::Lzw(Lzw),
        #[cfg(feature = "deflate")]
        CompressionMethod::Deflate | CompressionMethod::OldDeflate => Compressor::Deflate(Deflate::default()),
        CompressionMethod::PackBits => Compressor::Packbits(Packbits),
        #[cfg(feature = "zstd")]
        CompressionMethod::ZSTD => Compressor::Zstd(Zstd::default()),
        _ => Compressor::Uncompressed(Uncompressed),
    }
}

fn write_header(stream: &mut BufferedStream, big_tiff: bool) -> TiffResult<u64> {
    stream.seek(0);
    let magic: [u8; 2] = match stream.byte_order() {
        ByteOrder::LittleEndian => *b"II",
        ByteOrder::BigEndian => *b"MM",
    };
    stream.write_all(&magic)?;
    if big_tiff {
        stream.write_u16(43)?;
        stream.write_u16(8)?;
        stream.write_u16(0)?;
        let ptr_pos = stream.position();
        stream.write_u64(0)?;
        Ok(ptr_pos)
    } else {
        stream.write_u16(42)?;
        let ptr_pos = stream.position();
        stream.write_u32(0)?;
        Ok(ptr_pos)
    }
}

fn patch_pointer(stream: &mut BufferedStream, pos: u64, value: u64, big_tiff: bool) -> TiffResult<()> {
    let saved = stream.position();
    stream.seek(pos);
    if big_tiff {
        stream.write_u64(value)?;
    } else {
        let narrow = u32::try_from(value).map_err(|_| ArgsError::IntegerOverflow)?;
        stream.write_u32(narrow)?;
    }
    stream.seek(saved);
    Ok(())
}

/// Writes one directory: external (too-large-to-inline) entry values first,
/// then the entry count and the entries themselves, then a zeroed next-IFD
/// pointer. Returns `(ifd_pos, next_ifd_pointer_pos)`.
fn write_directory(
    stream: &mut BufferedStream,
    dir: &mut Directory<BufferedEntry>,
    big_tiff: bool,
) -> TiffResult<(u64, u64)> {
    let inline_width = if big_tiff { 8 } else { 4 };

    for entry in dir.values_mut() {
        if entry.data.len() > inline_width {
            let offset = stream.len()?;
            stream.seek(offset);
            stream.write_all(&entry.data)?;
            entry.data = encode_uint(offset, inline_width, stream.byte_order());
        } else {
            entry.data.resize(inline_width, 0);
        }
    }

    let ifd_pos = stream.len()?;
    stream.seek(ifd_pos);

    let count = dir.len() as u64;
    if big_tiff {
        stream.write_u64(count)?;
    } else {
        let narrow = u16::try_from(count).map_err(|_| ArgsError::IntegerOverflow)?;
        stream.write_u16(narrow)?;
    }

    for (tag, entry) in dir.iter() {
        stream.write_u16(tag.to_u16())?;
        stream.write_u16(entry.type_.to_u16())?;
        if big_tiff {
            stream.write_u64(entry.count)?;
        } else {
            let narrow = u32::try_from(entry.count).map_err(|_| ArgsError::IntegerOverflow)?;
            stream.write_u32(narrow)?;
        }
        stream.write_all(&entry.data)?;
    }

    let next_ptr_pos = stream.position();
    if big_tiff {
        stream.write_u64(0)?;
    } else {
        stream.write_u32(0)?;
    }

    Ok((ifd_pos, next_ptr_pos))
}

fn encode_uint(value: u64, width: usize, order: ByteOrder) -> Vec<u8> {
    let full = match order {
        ByteOrder::LittleEndian => value.to_le_bytes(),
        ByteOrder::BigEndian => value.to_be_bytes(),
    };
    match order {
        ByteOrder::LittleEndian => full[..width].to_vec(),
        ByteOrder::BigEndian => full[8 - width..].to_vec(),
    }
}

fn short_entry(values: &[u16], order: ByteOrder) -> BufferedEntry {
    let mut data = Vec::with_capacity(values.len() * 2);
    for v in values {
        data.extend_from_slice(&match order {
            ByteOrder::LittleEndian => v.to_le_bytes(),
            ByteOrder::BigEndian => v.to_be_bytes(),
        });
    }
    BufferedEntry { type_: Type::SHORT, count: values.len() as u64, data }
}

fn long_entry(values: &[u32], order: ByteOrder) -> BufferedEntry {
    let mut data = Vec::with_capacity(values.len() * 4);
    for v in values {
        data.extend_from_slice(&match order {
            ByteOrder::LittleEndian => v.to_le_bytes(),
            ByteOrder::BigEndian => v.to_be_bytes(),
        });
    }
    BufferedEntry { type_: Type::LONG, count: values.len() as u64, data }
}

fn long8_entry(values: &[u64], order: ByteOrder) -> BufferedEntry {
    let mut data = Vec::with_capacity(values.len() * 8);
    for v in values {
        data.extend_from_slice(&match order {
            ByteOrder::LittleEndian => v.to_le_bytes(),
            ByteOrder::BigEndian => v.to_be_bytes(),
        });
    }
    BufferedEntry { type_: Type::LONG8, count: values.len() as u64, data }
}

fn ascii_entry(s: &str) -> BufferedEntry {
    let mut data = s.as_bytes().to_vec();
    data.push(0);
    BufferedEntry { type_: Type::ASCII, count: data.len() as u64, data }
}

/// TIFF's `ColorMap` layout: all red entries, then all green, then all blue,
/// each a 16-bit value.
fn color_map_entry(table: &[(u16, u16, u16)], order: ByteOrder) -> BufferedEntry {
    let mut values = Vec::with_capacity(table.len() * 3);
    values.extend(table.iter().map(|(r, _, _)| *r));
    values.extend(table.iter().map(|(_, g, _)| *g));
    values.extend(table.iter().map(|(_, _, b)| *b));
    short_entry(&values, order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{Axis, AxisType, PixelType};
    use crate::source::MemorySource;

    fn gray_meta(width: u64, height: u64) -> ImageMetadata {
        ImageMetadata {
            pixel_type: PixelType::Uint8,
            little_endian: true,
            indexed: false,
            planar_count: 2,
            axes: vec![Axis::new(AxisType::X, width, true), Axis::new(AxisType::Y, height, true)],
            bits_per_pixel: 8,
            color_table: None,
            unit: None,
        }
    }

    #[test]
    fn writes_classic_header_and_single_ifd() {
        let writer = TiffWriter::create(Source::Memory(MemorySource::new()), WriterConfig::default()).unwrap();
        let meta = gray_meta(4, 4);
        let plane = Plane { bytes: vec![7u8; 16], offsets: vec![0, 0], lengths: vec![4, 4] };
        writer.save_plane(&meta, &plane, Some("hello")).unwrap();
        assert!(!writer.is_big_tiff());

        let mut inner = writer.inner.lock().unwrap();
        inner.stream.seek(0);
        let mut magic = [0u8; 2];
        inner.stream.read_exact(&mut magic).unwrap();
        assert_eq!(&magic, b"II");
        assert_eq!(inner.stream.read_u16().unwrap(), 42);
    }

    #[test]
    fn two_planes_chain_via_next_ifd_pointer() {
        let writer = TiffWriter::create(Source::Memory(MemorySource::new()), WriterConfig::default()).unwrap();
        let meta = gray_meta(2, 2);
        let plane = Plane { bytes: vec![1u8; 4], offsets: vec![0, 0], lengths: vec![2, 2] };
        writer.save_plane(&meta, &plane, None).unwrap();
        writer.save_plane(&meta, &plane, None).unwrap();

        let mut inner = writer.inner.lock().unwrap();
        inner.stream.seek(4);
        let first_ifd = inner.stream.read_u32().unwrap() as u64;
        assert!(first_ifd > 0);
        inner.stream.seek(first_ifd);
        let entry_count = inner.stream.read_u16().unwrap();
        inner.stream.seek(first_ifd + 2 + entry_count as u64 * 12);
        let second_ifd = inner.stream.read_u32().unwrap() as u64;
        assert!(second_ifd > first_ifd);
    }

    #[test]
    fn force_big_tiff_writes_widened_header() {
        let config = WriterConfig { force_big_tiff: Some(true), ..WriterConfig::default() };
        let writer = TiffWriter::create(Source::Memory(MemorySource::new()), config).unwrap();
        assert!(writer.is_big_tiff());
        let mut inner = writer.inner.lock().unwrap();
        inner.stream.seek(2);
        assert_eq!(inner.stream.read_u16().unwrap(), 43);
        assert_eq!(inner.stream.read_u16().unwrap(), 8);
    }

    /// Exercises the offset-overflow check directly with a large
    /// hypothetical `additional_bytes` rather than actually writing
    /// gigabytes of pixel data - `ensure_capacity_for` only needs the
    /// *prospective* total, not real bytes on disk, to decide whether to
    /// promote.
    #[test]
    fn writer_auto_promotes_to_big_tiff_when_an_offset_would_overflow() {
        let writer = TiffWriter::create(Source::Memory(MemorySource::new()), WriterConfig::default()).unwrap();
        let meta = gray_meta(2, 2);
        let plane = Plane { bytes: vec![1u8; 4], offsets: vec![0, 0], lengths: vec![2, 2] };
        writer.save_plane(&meta, &plane, None).unwrap();
        assert!(!writer.is_big_tiff());

        {
            let mut inner = writer.inner.lock().unwrap();
            inner.ensure_capacity_for(u32::MAX as u64).unwrap();
        }
        assert!(writer.is_big_tiff());

        let mut inner = writer.inner.lock().unwrap();
        inner.stream.seek(2);
        assert_eq!(inner.stream.read_u16().unwrap(), 43);
    }

    #[test]
    fn writer_reports_would_overflow_when_promotion_is_disabled() {
        let config = WriterConfig { force_big_tiff: Some(false), ..WriterConfig::default() };
        let writer = TiffWriter::create(Source::Memory(MemorySource::new()), config).unwrap();
        writer.save_plane(&gray_meta(2, 2), &Plane { bytes: vec![1u8; 4], offsets: vec![0, 0], lengths: vec![2, 2] }, None).unwrap();

        let mut inner = writer.inner.lock().unwrap();
        let err = inner.ensure_capacity_for(u32::MAX as u64).unwrap_err();
        assert!(matches!(err, TiffError::Format(TiffFormatError::WouldOverflow32)));
    }
}
