//! TIFF directory-chain parsing, tag decoding, and strip/tile plane
//! reassembly. This is the component the rest of the engine is
//! built to feed: a [`crate::stream::BufferedStream`] goes in, an
//! [`IfdChain`] and per-image [`ImageMetadata`] come out, and
//! [`TiffParser::open_plane`] turns a plane's directory entries into
//! decompressed, predictor-corrected pixel bytes.

use std::collections::HashSet;

use crate::codec;
use crate::comments::{self, Comment};
use crate::error::{TiffError, TiffFormatError, TiffResult};
use crate::ifd::{Directory, IfdChain, ProcessedEntry, Value};
use crate::metadata::{Axis, AxisType, ImageMetadata, PixelType, Plane};
use crate::predictor::unpredict_horizontal;
use crate::stream::BufferedStream;
use crate::tags::{CompressionMethod, PhotometricInterpretation, PlanarConfiguration, Predictor, SampleFormat, Tag, Type};
use crate::util::ByteOrder;

/// Hard cap on the number of IFDs walked in one chain, guarding against a
/// maliciously (or accidentally) unterminated chain that doesn't otherwise
/// revisit an offset.
const MAX_IFD_COUNT: usize = 1_000_000;

/// A parsed TIFF/BigTIFF file: the directory chain plus the derived
/// per-image metadata the rest of the engine consumes.
pub struct TiffParser {
    stream: BufferedStream,
    big_tiff: bool,
    chain: IfdChain,
    images: Vec<ImageMetadata>,
    /// First non-planar-axis-synthesis chain length a plane index maps
    /// into; for the single supported image this is always `0..chain.len()`.
    image_planes: Vec<std::ops::Range<usize>>,
}

impl TiffParser {
    /// Reads the header and full IFD chain from `stream`, then derives
    /// image metadata from the comment block on IFD #0.
    pub fn open(mut stream: BufferedStream) -> TiffResult<Self> {
        let (order, big_tiff, first_offset) = read_header(&mut stream)?;
        stream.set_byte_order(order);
        let mut chain = read_ifd_chain(&mut stream, first_offset, big_tiff)?;
        for ifd in &chain {
            ifd.check_required_tags()?;
        }
        synthesize_truncated_imagej_stack(&mut chain)?;

        let metadata = build_metadata(&chain, order)?;
        let image_planes = vec![0..chain.len()];
        Ok(TiffParser { stream, big_tiff, chain, images: vec![metadata], image_planes })
    }

    pub fn is_big_tiff(&self) -> bool {
        self.big_tiff
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn metadata(&self, image_index: usize) -> TiffResult<&ImageMetadata> {
        self.images
            .get(image_index)
            .ok_or_else(|| crate::error::ArgsError::IndexOutOfRange.into())
    }

    pub fn plane_count(&self, image_index: usize) -> TiffResult<u64> {
        Ok(self.metadata(image_index)?.plane_count())
    }

    pub fn ifd_chain(&self) -> &IfdChain {
        &self.chain
    }

    fn ifd_for_plane(&self, image_index: usize, plane_index: u64) -> TiffResult<&Directory<ProcessedEntry>> {
        let range = self
            .image_planes
            .get(image_index)
            .ok_or(crate::error::ArgsError::IndexOutOfRange)?;
        let idx = range.start + usize::try_from(plane_index).map_err(|_| crate::error::ArgsError::IndexOutOfRange)?;
        if idx >= range.end {
            return Err(crate::error::ArgsError::IndexOutOfRange.into());
        }
        Ok(&self.chain[idx])
    }

    /// Decodes the requested planar sub-region of one plane: `offsets`/
    /// `lengths` are `[x, y]` or `[x, y, channel]`, matching the planar
    /// prefix of the image's axis list.
    pub fn open_plane(
        &mut self,
        image_index: usize,
        plane_index: u64,
        offsets: &[u64],
        lengths: &[u64],
    ) -> TiffResult<Plane> {
        let meta = self.metadata(image_index)?.clone();
        let ifd = self.ifd_for_plane(image_index, plane_index)?.clone();
        decode_plane_region(&mut self.stream, &ifd, &meta, offsets, lengths)
    }
}

/// Lets a [`TiffParser`] sit directly under a [`crate::plane_separator::PlaneSeparator`].
impl crate::plane_separator::PlaneSource for TiffParser {
    fn metadata(&self, image_index: usize) -> TiffResult<ImageMetadata> {
        Ok(TiffParser::metadata(self, image_index)?.clone())
    }

    fn plane_count(&self, image_index: usize) -> TiffResult<u64> {
        TiffParser::plane_count(self, image_index)
    }

    fn open_plane(
        &mut self,
        image_index: usize,
        plane_index: u64,
        offsets: &[u64],
        lengths: &[u64],
    ) -> TiffResult<Plane> {
        TiffParser::open_plane(self, image_index, plane_index, offsets, lengths)
    }
}

/// Reads the 8 (classic) or 16 (BigTIFF) byte file header.
fn read_header(stream: &mut BufferedStream) -> TiffResult<(ByteOrder, bool, u64)> {
    let mut magic = [0u8; 2];
    stream.seek(0);
    stream.read_exact(&mut magic)?;
    let order = match &magic {
        b"II" => ByteOrder::LittleEndian,
        b"MM" => ByteOrder::BigEndian,
        _ => return Err(TiffFormatError::NotATiff.into()),
    };
    stream.set_byte_order(order);
    let version = stream.read_u16()?;
    match version {
        42 => {
            let offset = stream.read_u32()?;
            Ok((order, false, offset as u64))
        }
        43 => {
            let offset_size = stream.read_u16()?;
            let reserved = stream.read_u16()?;
            if offset_size != 8 || reserved != 0 {
                return Err(TiffFormatError::NotATiff.into());
            }
            let offset = stream.read_u64()?;
            Ok((order, true, offset))
        }
        _ => Err(TiffFormatError::NotATiff.into()),
    }
}

/// Walks the IFD chain from `first_offset`, decoding every entry, with
/// cycle detection and a hard IFD-count cap.
fn read_ifd_chain(stream: &mut BufferedStream, first_offset: u64, big_tiff: bool) -> TiffResult<IfdChain> {
    let mut chain = Vec::new();
    let mut seen = HashSet::new();
    let mut offset = first_offset;
    while offset != 0 {
        if !seen.insert(offset) {
            return Err(TiffFormatError::CyclicIfd.into());
        }
        if chain.len() >= MAX_IFD_COUNT {
            return Err(TiffFormatError::CyclicIfd.into());
        }
        let (ifd, next) = read_ifd(stream, offset, big_tiff)?;
        chain.push(ifd);
        offset = next;
    }
    Ok(chain)
}

fn read_ifd(
    stream: &mut BufferedStream,
    offset: u64,
    big_tiff: bool,
) -> TiffResult<(Directory<ProcessedEntry>, u64)> {
    stream.seek(offset);
    let entry_count = if big_tiff { stream.read_u64()? } else { stream.read_u16()? as u64 };

    let mut dir = Directory::new();
    for _ in 0..entry_count {
        let tag_id = stream.read_u16()?;
        let type_raw = stream.read_u16()?;
        let type_ = Type::from_u16_exhaustive(type_raw);
        let count = if big_tiff { stream.read_u64()? } else { stream.read_u32()? as u64 };

        let field_size = if big_tiff { 8 } else { 4 };
        let mut field = vec![0u8; field_size];
        stream.read_exact(&mut field)?;

        let byte_len = (type_.size() as u64)
            .checked_mul(count)
            .ok_or(crate::error::ArgsError::IntegerOverflow)?;

        let data = if byte_len <= field_size as u64 {
            field[..byte_len as usize].to_vec()
        } else {
            let data_offset = stream.byte_order().read_uint(&field);
            let saved = stream.position();
            stream.seek(data_offset);
            let mut buf = vec![0u8; byte_len as usize];
            stream.read_exact(&mut buf)?;
            stream.seek(saved);
            buf
        };

        let tag = Tag::from_u16_exhaustive(tag_id);
        let entry = decode_entry_values(type_, count, &data, stream.byte_order());
        dir.insert(tag, entry);
    }

    let next = if big_tiff { stream.read_u64()? } else { stream.read_u32()? as u64 };
    Ok((dir, next))
}

/// Decodes a raw tag-value byte buffer into typed [`Value`]s, honoring the
/// stream's current byte order (unlike native-endian decoding, this is
/// correct for big-endian files read on a little-endian host or vice
/// versa).
fn decode_entry_values(type_: Type, count: u64, data: &[u8], order: ByteOrder) -> ProcessedEntry {
    let size = type_.size().max(1);
    let mut values = Vec::with_capacity(count as usize);
    match type_ {
        Type::ASCII => {
            let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
            return ProcessedEntry::new(Value::Ascii(String::from_utf8_lossy(&data[..end]).into_owned()));
        }
        Type::BYTE => {
            for &b in data.iter().take(count as usize) {
                values.push(Value::Byte(b));
            }
        }
        Type::SBYTE => {
            for &b in data.iter().take(count as usize) {
                values.push(Value::SignedByte(b as i8));
            }
        }
        Type::UNDEFINED => {
            for &b in data.iter().take(count as usize) {
                values.push(Value::Undefined(b));
            }
        }
        Type::SHORT => {
            for chunk in data.chunks_exact(size).take(count as usize) {
                values.push(Value::Short(order.read_uint(chunk) as u16));
            }
        }
        Type::SSHORT => {
            for chunk in data.chunks_exact(size).take(count as usize) {
                values.push(Value::SignedShort(order.read_uint(chunk) as u16 as i16));
            }
        }
        Type::LONG | Type::IFD => {
            for chunk in data.chunks_exact(size).take(count as usize) {
                values.push(Value::Unsigned(order.read_uint(chunk) as u32));
            }
        }
        Type::SLONG => {
            for chunk in data.chunks_exact(size).take(count as usize) {
                values.push(Value::Signed(order.read_uint(chunk) as u32 as i32));
            }
        }
        Type::LONG8 | Type::IFD8 => {
            for chunk in data.chunks_exact(size).take(count as usize) {
                values.push(Value::UnsignedBig(order.read_uint(chunk)));
            }
        }
        Type::SLONG8 => {
            for chunk in data.chunks_exact(size).take(count as usize) {
                values.push(Value::SignedBig(order.read_uint(chunk) as i64));
            }
        }
        Type::FLOAT => {
            for chunk in data.chunks_exact(4).take(count as usize) {
                values.push(Value::Float(f32::from_bits(order.read_uint(chunk) as u32)));
            }
        }
        Type::DOUBLE => {
            for chunk in data.chunks_exact(8).take(count as usize) {
                values.push(Value::Double(f64::from_bits(order.read_uint(chunk))));
            }
        }
        Type::RATIONAL => {
            for chunk in data.chunks_exact(8).take(count as usize) {
                let n = order.read_uint(&chunk[..4]) as u32;
                let d = order.read_uint(&chunk[4..]) as u32;
                values.push(Value::Rational(n, d));
            }
        }
        Type::SRATIONAL => {
            for chunk in data.chunks_exact(8).take(count as usize) {
                let n = order.read_uint(&chunk[..4]) as u32 as i32;
                let d = order.read_uint(&chunk[4..]) as u32 as i32;
                values.push(Value::SRational(n, d));
            }
        }
        Type::Unknown(_) => {
            for &b in data.iter().take(count as usize) {
                values.push(Value::Undefined(b));
            }
        }
    }
    ProcessedEntry::new_vec(values)
}

/// Best-effort ImageJ truncated-stack recovery: when the file declares
/// more planes than IFDs actually exist, synthesize the missing IFDs by
/// copying IFD #0 and rewriting `StripOffsets` to point past the data the
/// first IFD's strip byte counts say is already there. Applies only when
/// uncompressed.
fn synthesize_truncated_imagej_stack(chain: &mut IfdChain) -> TiffResult<()> {
    if chain.len() != 1 {
        return Ok(());
    }
    let Some(description) = chain[0].get_string_opt(Tag::ImageDescription) else { return Ok(()) };
    let Some(body) = description.strip_prefix("ImageJ=") else { return Ok(()) };
    let comment = comments::ImageJComment::parse(body);
    let (c, z, t) = comment.derive_axis_lengths(1);
    let declared = c as u64 * z as u64 * t as u64;
    if declared <= 1 {
        return Ok(());
    }
    let compression = chain[0]
        .get_u16_opt_compression()
        .unwrap_or(CompressionMethod::None);
    if compression != CompressionMethod::None {
        log::warn!("ImageJ truncated-stack recovery skipped: compression is not None");
        return Ok(());
    }
    if !chain[0].contains_key(Tag::StripOffsets) {
        // Tiled truncated stacks aren't recovered; there is no plain
        // byte-count arithmetic equivalent to the strip case.
        return Ok(());
    }

    let strip_offsets = chain[0].get_u32_array(Tag::StripOffsets)?;
    let strip_byte_counts = chain[0].get_u32_array(Tag::StripByteCounts)?;
    let per_ifd_bytes: u64 = strip_byte_counts.iter().map(|&b| b as u64).sum();
    if per_ifd_bytes == 0 {
        return Ok(());
    }

    log::info!(
        "synthesizing {} additional IFDs for a truncated ImageJ stack (declared {} planes, found 1)",
        declared - 1,
        declared
    );

    let first = chain[0].clone();
    for i in 1..declared {
        let mut ifd = first.clone();
        let new_offsets: Vec<u32> = strip_offsets
            .iter()
            .map(|&o| (o as u64 + i * per_ifd_bytes) as u32)
            .collect();
        ifd.insert(Tag::StripOffsets, ProcessedEntry::new_vec(new_offsets.into_iter().map(Value::Unsigned).collect()));
        chain.push(ifd);
    }
    Ok(())
}

impl Directory<ProcessedEntry> {
    fn get_u16_opt_compression(&self) -> Option<CompressionMethod> {
        self.get_u16(Tag::Compression).ok().and_then(CompressionMethod::from_u16)
    }
}

/// Builds the single supported image's metadata from the (possibly
/// synthesized) chain, using IFD #0 as the authoritative source for
/// per-pixel layout and the comment block for non-planar axis derivation.
fn build_metadata(chain: &IfdChain, order: ByteOrder) -> TiffResult<ImageMetadata> {
    let ifd0 = &chain[0];
    let width = ifd0.get_u32(Tag::ImageWidth)? as u64;
    let height = ifd0.get_u32(Tag::ImageLength)? as u64;
    let bits_per_sample = ifd0.get_bits_per_sample()?;
    let bpp = bits_per_sample.first().copied().unwrap_or(8);
    let samples_per_pixel = ifd0.samples_per_pixel()?;
    let sample_format = ifd0
        .get_u16(Tag::SampleFormat)
        .ok()
        .and_then(SampleFormat::from_u16)
        .unwrap_or(SampleFormat::Uint);
    let pixel_type = pixel_type_of(bpp, sample_format)?;
    let photometric = ifd0
        .get_u16(Tag::PhotometricInterpretation)
        .ok()
        .and_then(PhotometricInterpretation::from_u16);
    let indexed = photometric == Some(PhotometricInterpretation::RGBPalette);
    let planar_config = ifd0.planar_configuration()?;

    let description = ifd0.get_string_opt(Tag::ImageDescription);
    let software = ifd0.get_string_opt(Tag::Software);
    let comment = comments::interpret(description.as_deref(), software.as_deref());

    let (channels, z, t) = match &comment {
        Some(Comment::ImageJ(ij)) => ij.derive_axis_lengths(chain.len() as u32),
        _ => (1, chain.len() as u32, 1),
    };

    let mut axes = vec![
        Axis::new(AxisType::X, width, true),
        Axis::new(AxisType::Y, height, true),
    ];
    let planar_channel = samples_per_pixel > 1 && planar_config == PlanarConfiguration::Chunky;
    if planar_channel {
        axes.push(Axis::new(AxisType::Channel, samples_per_pixel as u64, true));
    }
    let planar_count = axes.len();

    if !planar_channel && channels > 1 {
        axes.push(Axis::new(AxisType::Channel, channels as u64, false));
    }
    if z > 1 || (channels <= 1 || planar_channel) {
        // A Z axis is always present so `plane_count` tracks the chain
        // length even for plain (non-ImageJ) multi-page TIFFs.
        axes.push(Axis::new(AxisType::Z, z.max(1) as u64, false));
    }
    if t > 1 {
        axes.push(Axis::new(AxisType::Time, t as u64, false));
    }

    if let Some(Comment::ImageJ(ij)) = &comment {
        if let Some(spacing) = ij.spacing {
            if let Some(zaxis) = axes.iter_mut().find(|a| a.kind == AxisType::Z) {
                zaxis.calibration = Some(spacing);
            }
        }
    }

    let unit = match &comment {
        Some(Comment::ImageJ(ij)) => ij.unit.clone(),
        _ => None,
    };

    let color_table = if indexed { read_color_table(ifd0) } else { None };

    let mut meta = ImageMetadata {
        pixel_type,
        little_endian: order == ByteOrder::LittleEndian,
        indexed,
        planar_count,
        axes,
        bits_per_pixel: bpp as u32,
        color_table,
        unit,
    };

    calibrate_xy(&mut meta, ifd0)?;
    Ok(meta)
}

/// `ColorMap` (tag 320) packs all red entries, then all green, then all
/// blue, each `2^BitsPerSample` entries wide.
fn read_color_table(ifd0: &Directory<ProcessedEntry>) -> Option<Vec<(u16, u16, u16)>> {
    let raw = ifd0.get_u16_array(Tag::ColorMap).ok()?;
    if raw.len() % 3 != 0 {
        return None;
    }
    let third = raw.len() / 3;
    Some((0..third).map(|i| (raw[i], raw[third + i], raw[2 * third + i])).collect())
}

fn calibrate_xy(meta: &mut ImageMetadata, ifd0: &Directory<ProcessedEntry>) -> TiffResult<()> {
    if let Ok(res) = ifd0.get_rational_array(Tag::XResolution) {
        if let Some(&(n, d)) = res.first() {
            if n != 0 {
                if let Some(axis) = meta.axes.iter_mut().find(|a| a.kind == AxisType::X) {
                    axis.calibration = Some(d as f64 / n as f64);
                }
            }
        }
    }
    if let Ok(res) = ifd0.get_rational_array(Tag::YResolution) {
        if let Some(&(n, d)) = res.first() {
            if n != 0 {
                if let Some(axis) = meta.axes.iter_mut().find(|a| a.kind == AxisType::Y) {
                    axis.calibration = Some(d as f64 / n as f64);
                }
            }
        }
    }
    Ok(())
}

fn pixel_type_of(bits_per_sample: u16, format: SampleFormat) -> TiffResult<PixelType> {
    Ok(match (bits_per_sample, format) {
        (8, SampleFormat::Int) => PixelType::Int8,
        (8, _) => PixelType::Uint8,
        (16, SampleFormat::Int) => PixelType::Int16,
        (16, _) => PixelType::Uint16,
        (32, SampleFormat::Int) => PixelType::Int32,
        (32, SampleFormat::IEEEFP) => PixelType::Float32,
        (32, _) => PixelType::Uint32,
        (64, SampleFormat::IEEEFP) => PixelType::Float64,
        _ => return Err(TiffFormatError::BadStripLayout.into()),
    })
}

/// Strip/tile layout for one IFD.
enum ChunkLayout {
    /// `offsets`/`byte_counts` are ordered channel-major when
    /// `planar_config == Planar`: the first `strips_per_channel` entries
    /// cover channel 0 top-to-bottom, the next `strips_per_channel` cover
    /// channel 1, and so on (TIFF 6.0 `PlanarConfiguration`).
    Strip { rows_per_strip: u64, strips_per_channel: u64, offsets: Vec<u64>, byte_counts: Vec<u64> },
    Tile { tile_width: u64, tile_length: u64, offsets: Vec<u64>, byte_counts: Vec<u64> },
}

fn chunk_layout(
    ifd: &Directory<ProcessedEntry>,
    width: u64,
    height: u64,
    samples_per_pixel: u64,
    planar_config: PlanarConfiguration,
) -> TiffResult<ChunkLayout> {
    if ifd.contains_key(Tag::TileOffsets) {
        let tile_width = ifd.get_u32(Tag::TileWidth)? as u64;
        let tile_length = ifd.get_u32(Tag::TileLength)? as u64;
        let offsets = ifd.get_u64_array(Tag::TileOffsets)?;
        let byte_counts = ifd.get_u64_array(Tag::TileByteCounts)?;
        if offsets.len() != byte_counts.len() {
            return Err(TiffFormatError::BadTileLayout.into());
        }
        let tiles_across = width.div_ceil(tile_width);
        let tiles_down = height.div_ceil(tile_length);
        let channel_multiplier = if planar_config == PlanarConfiguration::Planar { samples_per_pixel } else { 1 };
        if offsets.len() as u64 != tiles_across * tiles_down * channel_multiplier {
            return Err(TiffFormatError::BadTileLayout.into());
        }
        Ok(ChunkLayout::Tile { tile_width, tile_length, offsets, byte_counts })
    } else if ifd.contains_key(Tag::StripOffsets) {
        let rows_per_strip = ifd.get_u32_opt(Tag::RowsPerStrip)?.unwrap_or(height as u32).max(1) as u64;
        let offsets = ifd.get_u64_array(Tag::StripOffsets)?;
        let byte_counts = ifd.get_u64_array(Tag::StripByteCounts)?;
        if offsets.len() != byte_counts.len() {
            return Err(TiffFormatError::BadStripLayout.into());
        }
        let strips_per_channel = height.div_ceil(rows_per_strip);
        let channel_multiplier = if planar_config == PlanarConfiguration::Planar { samples_per_pixel } else { 1 };
        if offsets.len() as u64 != strips_per_channel * channel_multiplier {
            return Err(TiffFormatError::BadStripLayout.into());
        }
        Ok(ChunkLayout::Strip { rows_per_strip, strips_per_channel, offsets, byte_counts })
    } else {
        Err(TiffFormatError::BadStripLayout.into())
    }
}

/// Decodes the requested planar sub-region of one IFD's plane.
///
/// Strip-laid-out planes decode only the strips overlapping the requested
/// Y range, so the plane separator's memory-bounded strip-wise reassembly
/// only ever pays for the rows it asked for. Tiled planes decode
/// the full plane and slice the requested sub-rectangle out of it -
/// partial-tile fetching adds geometry this engine's scope does not
/// otherwise need, since nothing upstream requests tile-aligned regions.
fn decode_plane_region(
    stream: &mut BufferedStream,
    ifd: &Directory<ProcessedEntry>,
    meta: &ImageMetadata,
    offsets: &[u64],
    lengths: &[u64],
) -> TiffResult<Plane> {
    let width = meta.width();
    let height = meta.height();
    let samples_per_pixel = ifd.samples_per_pixel()? as u64;
    let bits_per_sample = meta.bits_per_pixel as u16;
    let bytes_per_sample = (bits_per_sample as u64).div_ceil(8);
    let compression = ifd
        .get_u16(Tag::Compression)
        .ok()
        .and_then(CompressionMethod::from_u16)
        .unwrap_or(CompressionMethod::None);
    let predictor = ifd
        .get_u16(Tag::Predictor)
        .ok()
        .and_then(Predictor::from_u16)
        .unwrap_or(Predictor::None);
    let planar_config = ifd.planar_configuration()?;

    let x0 = offsets.first().copied().unwrap_or(0);
    let y0 = offsets.get(1).copied().unwrap_or(0);
    let c0 = offsets.get(2).copied().unwrap_or(0);
    let rx = lengths.first().copied().unwrap_or(width);
    let ry = lengths.get(1).copied().unwrap_or(height);
    let rc = lengths.get(2).copied().unwrap_or(samples_per_pixel);

    let row_bytes_full = width * samples_per_pixel * bytes_per_sample;
    let out_row_bytes = rx * rc * bytes_per_sample;
    let mut out = vec![0u8; crate::util::safe_multiply_u32(&[ry as u32, out_row_bytes as u32])? as usize];

    let layout = chunk_layout(ifd, width, height, samples_per_pixel, planar_config)?;
    match layout {
        ChunkLayout::Strip { rows_per_strip, strips_per_channel, offsets: strip_offsets, byte_counts }
            if planar_config == PlanarConfiguration::Planar =>
        {
            let channel_row_bytes = width * bytes_per_sample;
            for ch in c0..c0 + rc {
                let base = ch * strips_per_channel;
                let first_strip = y0 / rows_per_strip;
                let last_row = y0 + ry;
                let last_strip = (last_row.saturating_sub(1)) / rows_per_strip;
                for local_idx in first_strip..=last_strip.min(strips_per_channel - 1) {
                    let strip_idx = (base + local_idx) as usize;
                    let strip_start_row = local_idx * rows_per_strip;
                    let strip_rows = rows_per_strip.min(height - strip_start_row);
                    let raw_len = channel_row_bytes * strip_rows;
                    let raw = read_fragment(stream, strip_offsets[strip_idx], byte_counts[strip_idx], raw_len)?;
                    let mut decompressed = codec::decompress(compression, &raw, raw_len as usize)?;
                    if predictor == Predictor::Horizontal {
                        for row in decompressed.chunks_mut(channel_row_bytes as usize) {
                            unpredict_horizontal(row, bits_per_sample, 1);
                        }
                    }
                    copy_channel_rows_into(
                        &decompressed,
                        strip_start_row,
                        strip_rows,
                        width,
                        bytes_per_sample,
                        x0,
                        y0,
                        rx,
                        ry,
                        rc,
                        ch - c0,
                        &mut out,
                    )?;
                }
            }
        }
        ChunkLayout::Strip { rows_per_strip, offsets: strip_offsets, byte_counts, .. } => {
            let first_strip = y0 / rows_per_strip;
            let last_row = y0 + ry; // exclusive
            let last_strip = (last_row.saturating_sub(1)) / rows_per_strip;
            for strip_idx in first_strip..=last_strip.min(strip_offsets.len() as u64 - 1) {
                let strip_start_row = strip_idx * rows_per_strip;
                let strip_rows = rows_per_strip.min(height - strip_start_row);
                let raw_len = row_bytes_full * strip_rows;
                let raw = read_fragment(stream, strip_offsets[strip_idx as usize], byte_counts[strip_idx as usize], raw_len)?;
                let mut decompressed = codec::decompress(compression, &raw, raw_len as usize)?;
                if predictor == Predictor::Horizontal {
                    for row in decompressed.chunks_mut(row_bytes_full as usize) {
                        unpredict_horizontal(row, bits_per_sample, samples_per_pixel as usize);
                    }
                }
                copy_rows_into(
                    &decompressed,
                    strip_start_row,
                    strip_rows,
                    width,
                    samples_per_pixel,
                    bytes_per_sample,
                    x0,
                    y0,
                    c0,
                    rx,
                    ry,
                    rc,
                    &mut out,
                )?;
            }
        }
        ChunkLayout::Tile { .. } if planar_config == PlanarConfiguration::Planar => {
            // Separate-plane tiled layouts are vanishingly rare in practice
            // (no file in the corpus this engine was built against uses
            // the combination); rejecting outright is safer than silently
            // reassembling tiles against the wrong channel band.
            return Err(TiffFormatError::BadTileLayout.into());
        }
        ChunkLayout::Tile { tile_width, tile_length, offsets: tile_offsets, byte_counts } => {
            let tiles_across = width.div_ceil(tile_width);
            let tiles_down = height.div_ceil(tile_length);
            let mut full = vec![0u8; crate::util::safe_multiply_u32(&[height as u32, row_bytes_full as u32])? as usize];
            for ty in 0..tiles_down {
                for tx in 0..tiles_across {
                    let tile_idx = (ty * tiles_across + tx) as usize;
                    let tile_row_bytes = tile_width * samples_per_pixel * bytes_per_sample;
                    let raw_len = tile_row_bytes * tile_length;
                    let raw = read_fragment(stream, tile_offsets[tile_idx], byte_counts[tile_idx], raw_len)?;
                    let mut decompressed = codec::decompress(compression, &raw, raw_len as usize)?;
                    if predictor == Predictor::Horizontal {
                        for row in decompressed.chunks_mut(tile_row_bytes as usize) {
                            unpredict_horizontal(row, bits_per_sample, samples_per_pixel as usize);
                        }
                    }
                    let dest_row_start = ty * tile_length;
                    let dest_col_start = tx * tile_width;
                    let rows_here = tile_length.min(height - dest_row_start);
                    let cols_here = tile_width.min(width - dest_col_start);
                    for row in 0..rows_here {
                        let src = (row * tile_row_bytes) as usize;
                        let src_bytes = (cols_here * samples_per_pixel * bytes_per_sample) as usize;
                        let dst_row = dest_row_start + row;
                        let dst = (dst_row * row_bytes_full + dest_col_start * samples_per_pixel * bytes_per_sample) as usize;
                        full[dst..dst + src_bytes].copy_from_slice(&decompressed[src..src + src_bytes]);
                    }
                }
            }
            copy_rows_into(
                &full,
                0,
                height,
                width,
                samples_per_pixel,
                bytes_per_sample,
                x0,
                y0,
                c0,
                rx,
                ry,
                rc,
                &mut out,
            )?;
        }
    }

    Ok(Plane { bytes: out, offsets: offsets.to_vec(), lengths: lengths.to_vec() })
}

fn read_fragment(stream: &mut BufferedStream, offset: u64, byte_count: u64, expected_len: u64) -> TiffResult<Vec<u8>> {
    if byte_count > expected_len * 4 + 4096 {
        // Sanity bound: a byte count wildly exceeding what the geometry
        // implies is almost certainly a corrupt or hostile file.
        return Err(TiffFormatError::TruncatedPlane(0).into());
    }
    let mut buf = vec![0u8; byte_count as usize];
    stream.seek(offset);
    stream
        .read_exact(&mut buf)
        .map_err(|_| TiffError::Format(TiffFormatError::TruncatedPlane(0)))?;
    Ok(buf)
}

/// Copies rows of a single-channel (`PlanarConfiguration::Planar`) strip
/// fragment into `out`'s `out_channel`-th channel slot.
#[allow(clippy::too_many_arguments)]
fn copy_channel_rows_into(
    fragment: &[u8],
    chunk_start_row: u64,
    chunk_rows: u64,
    width: u64,
    bytes_per_sample: u64,
    x0: u64,
    y0: u64,
    rx: u64,
    ry: u64,
    rc: u64,
    out_channel: u64,
    out: &mut [u8],
) -> TiffResult<()> {
    let out_row_bytes = rx * rc * bytes_per_sample;
    for row_in_chunk in 0..chunk_rows {
        let src_row = chunk_start_row + row_in_chunk;
        if src_row < y0 || src_row >= y0 + ry {
            continue;
        }
        let dst_row = src_row - y0;
        let row_start = (row_in_chunk * width * bytes_per_sample) as usize;
        for col_in_out in 0..rx {
            let src_col = x0 + col_in_out;
            let src = row_start + (src_col * bytes_per_sample) as usize;
            let dst =
                (dst_row * out_row_bytes + (col_in_out * rc + out_channel) * bytes_per_sample) as usize;
            out[dst..dst + bytes_per_sample as usize].copy_from_slice(&fragment[src..src + bytes_per_sample as usize]);
        }
    }
    Ok(())
}

/// Copies the rows `[chunk_start_row, chunk_start_row + chunk_rows)` of a
/// decoded, chunky full-width fragment into `out`, keeping only the
/// requested `(x0..x0+rx, y0..y0+ry, c0..c0+rc)` sub-region.
#[allow(clippy::too_many_arguments)]
fn copy_rows_into(
    fragment: &[u8],
    chunk_start_row: u64,
    chunk_rows: u64,
    width: u64,
    samples_per_pixel: u64,
    bytes_per_sample: u64,
    x0: u64,
    y0: u64,
    c0: u64,
    rx: u64,
    ry: u64,
    rc: u64,
    out: &mut [u8],
) -> TiffResult<()> {
    let out_row_bytes = rx * rc * bytes_per_sample;
    for row_in_chunk in 0..chunk_rows {
        let src_row = chunk_start_row + row_in_chunk;
        if src_row < y0 || src_row >= y0 + ry {
            continue;
        }
        let dst_row = src_row - y0;
        let row_start = (row_in_chunk * width * samples_per_pixel * bytes_per_sample) as usize;
        for col_in_out in 0..rx {
            let src_col = x0 + col_in_out;
            for ch in 0..rc {
                let src_ch = c0 + ch;
                let src = row_start + ((src_col * samples_per_pixel + src_ch) * bytes_per_sample) as usize;
                let dst = (dst_row * out_row_bytes + (col_in_out * rc + ch) * bytes_per_sample) as usize;
                out[dst..dst + bytes_per_sample as usize]
                    .copy_from_slice(&fragment[src..src + bytes_per_sample as usize]);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Axis;
    use crate::source::{MemorySource, Source};
    use crate::writer::{TiffWriter, WriterConfig};

    #[test]
    fn rejects_bad_magic() {
        let source = Source::Memory(MemorySource::from_vec(vec![0u8; 16]));
        let stream = BufferedStream::new(source, ByteOrder::LittleEndian);
        let err = TiffParser::open(stream).unwrap_err();
        assert!(matches!(err, TiffError::Format(TiffFormatError::NotATiff)));
    }

    #[test]
    fn cyclic_ifd_chain_is_rejected() {
        let mut stream = BufferedStream::new(Source::Memory(MemorySource::new()), ByteOrder::LittleEndian);
        stream.write_all(b"II").unwrap();
        stream.write_u16(42).unwrap();
        stream.write_u32(8).unwrap();
        stream.seek(8);
        stream.write_u16(0).unwrap();
        stream.write_u32(8).unwrap();
        let source = stream.into_source();

        let stream = BufferedStream::new(source, ByteOrder::LittleEndian);
        let err = TiffParser::open(stream).unwrap_err();
        assert!(matches!(err, TiffError::Format(TiffFormatError::CyclicIfd)));
    }

    #[test]
    fn round_trips_a_single_gray_plane_through_writer_and_parser() {
        let meta = ImageMetadata {
            pixel_type: PixelType::Uint8,
            little_endian: true,
            indexed: false,
            planar_count: 2,
            axes: vec![Axis::new(AxisType::X, 8, true), Axis::new(AxisType::Y, 8, true)],
            bits_per_pixel: 8,
            color_table: None,
            unit: None,
        };
        let bytes: Vec<u8> = (0..64).map(|i| i as u8).collect();
        let plane = Plane { bytes: bytes.clone(), offsets: vec![0, 0], lengths: vec![8, 8] };

        let writer = TiffWriter::create(Source::Memory(MemorySource::new()), WriterConfig::default()).unwrap();
        writer.save_plane(&meta, &plane, None).unwrap();
        let source = writer.into_source();

        let stream = BufferedStream::new(source, ByteOrder::LittleEndian);
        let mut parser = TiffParser::open(stream).unwrap();
        assert!(!parser.is_big_tiff());

        let parsed_meta = parser.metadata(0).unwrap().clone();
        assert_eq!(parsed_meta.width(), 8);
        assert_eq!(parsed_meta.height(), 8);
        assert_eq!(parsed_meta.pixel_type, PixelType::Uint8);

        let out_plane = parser.open_plane(0, 0, &[0, 0], &[8, 8]).unwrap();
        assert_eq!(out_plane.bytes, bytes);
    }

    #[test]
    fn imagej_truncated_stack_is_synthesized_into_three_planes() {
        let mut ifd: Directory<ProcessedEntry> = Directory::new();
        ifd.insert(Tag::ImageWidth, ProcessedEntry::new(Value::Unsigned(32)));
        ifd.insert(Tag::ImageLength, ProcessedEntry::new(Value::Unsigned(32)));
        ifd.insert(Tag::BitsPerSample, ProcessedEntry::new(Value::Short(8)));
        ifd.insert(Tag::Compression, ProcessedEntry::new(Value::Short(CompressionMethod::None.to_u16())));
        ifd.insert(Tag::PhotometricInterpretation, ProcessedEntry::new(Value::Short(1)));
        ifd.insert(Tag::StripOffsets, ProcessedEntry::new(Value::Unsigned(1000)));
        ifd.insert(Tag::StripByteCounts, ProcessedEntry::new(Value::Unsigned(32 * 32)));
        ifd.insert(
            Tag::ImageDescription,
            ProcessedEntry::new(Value::Ascii("ImageJ=1.47\nimages=3\nchannels=3\nslices=1\nframes=1".to_string())),
        );

        let mut chain: IfdChain = vec![ifd];
        synthesize_truncated_imagej_stack(&mut chain).unwrap();

        assert_eq!(chain.len(), 3);
        let per_ifd_bytes = 32u64 * 32;
        assert_eq!(chain[1].get_u32_array(Tag::StripOffsets).unwrap(), vec![1000 + per_ifd_bytes as u32]);
        assert_eq!(chain[2].get_u32_array(Tag::StripOffsets).unwrap(), vec![1000 + 2 * per_ifd_bytes as u32]);
    }

    #[test]
    fn untruncated_single_ifd_stack_is_left_alone() {
        let mut ifd: Directory<ProcessedEntry> = Directory::new();
        ifd.insert(Tag::ImageWidth, ProcessedEntry::new(Value::Unsigned(4)));
        ifd.insert(Tag::ImageLength, ProcessedEntry::new(Value::Unsigned(4)));
        ifd.insert(Tag::BitsPerSample, ProcessedEntry::new(Value::Short(8)));
        ifd.insert(Tag::Compression, ProcessedEntry::new(Value::Short(CompressionMethod::None.to_u16())));
        ifd.insert(Tag::PhotometricInterpretation, ProcessedEntry::new(Value::Short(1)));
        ifd.insert(Tag::StripOffsets, ProcessedEntry::new(Value::Unsigned(100)));
        ifd.insert(Tag::StripByteCounts, ProcessedEntry::new(Value::Unsigned(16)));
        ifd.insert(
            Tag::ImageDescription,
            ProcessedEntry::new(Value::Ascii("ImageJ=1.47\nimages=1".to_string())),
        );

        let mut chain: IfdChain = vec![ifd];
        synthesize_truncated_imagej_stack(&mut chain).unwrap();
        assert_eq!(chain.len(), 1);
    }
}
