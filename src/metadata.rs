//! Per-image metadata ([`ImageMetadata`]) and the plane buffers a reader
//! hands back to callers.
//!
//! This is deliberately a thin, dumb model: the parser and the plane
//! separator are the only things that construct or interpret it. Pixel
//! value interpretation (color management, min/max, type conversion) is
//! explicitly out of scope and lives in downstream filters this crate
//! does not implement.

use crate::error::{ArgsError, TiffError, TiffResult};

/// One of the eight pixel encodings the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelType {
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float32,
    Float64,
}

impl PixelType {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelType::Int8 | PixelType::Uint8 => 1,
            PixelType::Int16 | PixelType::Uint16 => 2,
            PixelType::Int32 | PixelType::Uint32 | PixelType::Float32 => 4,
            PixelType::Float64 => 8,
        }
    }
}

/// The kind of axis an [`Axis`] represents. `Unknown` preserves any axis
/// letter the ImageJ/generic comment parsers encounter that isn't one of
/// the well-known kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AxisType {
    X,
    Y,
    Z,
    Channel,
    Time,
    Unknown(String),
}

/// One axis of an [`ImageMetadata`]'s axis list.
///
/// `planar` mirrors the invariant that the first `planar_count` axes in
/// an `ImageMetadata`'s axis list are the planar ones (always `X`, `Y`,
/// optionally `Channel` when interleaved); everything after indexes
/// *between* planes.
#[derive(Debug, Clone)]
pub struct Axis {
    pub kind: AxisType,
    pub length: u64,
    pub planar: bool,
    /// Physical size of one step along this axis, in the unit named by
    /// [`ImageMetadata::unit`]. `None` when no calibration tag was present.
    pub calibration: Option<f64>,
}

impl Axis {
    pub fn new(kind: AxisType, length: u64, planar: bool) -> Self {
        Axis { kind, length, planar, calibration: None }
    }
}

/// Per-image metadata. One `ImageMetadata` is shared by every plane of
/// a single image; a reader may expose several images (e.g. an ImageJ
/// hyperstack split by position is still one image to this layer -
/// splitting by position is a downstream concern).
#[derive(Debug, Clone)]
pub struct ImageMetadata {
    pub pixel_type: PixelType,
    pub little_endian: bool,
    pub indexed: bool,
    /// Number of axes at the front of `axes` that are planar (interleaved
    /// within a single plane buffer).
    pub planar_count: usize,
    pub axes: Vec<Axis>,
    pub bits_per_pixel: u32,
    /// Present only for `indexed` images: one `(r, g, b)` triple per table entry.
    pub color_table: Option<Vec<(u16, u16, u16)>>,
    pub unit: Option<String>,
}

impl ImageMetadata {
    /// Axis list restricted to the planar prefix.
    pub fn planar_axes(&self) -> &[Axis] {
        &self.axes[..self.planar_count]
    }

    /// Axis list restricted to the non-planar tail.
    pub fn nonplanar_axes(&self) -> &[Axis] {
        &self.axes[self.planar_count..]
    }

    /// Total number of planes: the product of the non-planar axis lengths.
    pub fn plane_count(&self) -> u64 {
        self.nonplanar_axes().iter().map(|a| a.length).product::<u64>().max(1)
    }

    pub fn axis_length(&self, kind: &AxisType) -> Option<u64> {
        self.axes.iter().find(|a| &a.kind == kind).map(|a| a.length)
    }

    /// X dimension in pixels, or 0 if no X axis is present (never expected
    /// for a well-formed TIFF image, but callers doing arithmetic should
    /// not panic on a malformed one).
    pub fn width(&self) -> u64 {
        self.axis_length(&AxisType::X).unwrap_or(0)
    }

    pub fn height(&self) -> u64 {
        self.axis_length(&AxisType::Y).unwrap_or(0)
    }

    /// Converts a linear, non-planar plane index into the coordinate vector
    /// over [`Self::nonplanar_axes`], least-significant axis first (the
    /// first non-planar axis varies fastest).
    pub fn unrasterize(&self, mut plane_index: u64) -> TiffResult<Vec<u64>> {
        let lengths: Vec<u64> = self.nonplanar_axes().iter().map(|a| a.length.max(1)).collect();
        let mut coords = vec![0u64; lengths.len()];
        for (i, len) in lengths.iter().enumerate() {
            coords[i] = plane_index % len;
            plane_index /= len;
        }
        if plane_index != 0 {
            return Err(ArgsError::IndexOutOfRange.into());
        }
        Ok(coords)
    }

    /// Inverse of [`Self::unrasterize`].
    pub fn rasterize(&self, coords: &[u64]) -> u64 {
        let lengths: Vec<u64> = self.nonplanar_axes().iter().map(|a| a.length.max(1)).collect();
        let mut index = 0u64;
        let mut stride = 1u64;
        for (i, len) in lengths.iter().enumerate() {
            index += coords.get(i).copied().unwrap_or(0) * stride;
            stride *= len;
        }
        index
    }
}

/// A contiguous byte buffer for one plane, plus the planar sub-region it
/// covers.
#[derive(Debug, Clone)]
pub struct Plane {
    pub bytes: Vec<u8>,
    /// Start offset of the covered region along each planar axis.
    pub offsets: Vec<u64>,
    /// Length of the covered region along each planar axis.
    pub lengths: Vec<u64>,
}

impl Plane {
    /// Validates that `bytes.len() == bytes_per_pixel * product(lengths)`.
    pub fn validate(&self, meta: &ImageMetadata) -> TiffResult<()> {
        let expected = crate::util::safe_multiply_u32(
            &self.lengths.iter().map(|&l| l as u32).collect::<Vec<_>>(),
        )?
        .checked_mul(meta.pixel_type.bytes_per_pixel() as u64)
        .ok_or(TiffError::Args(ArgsError::IntegerOverflow))?;
        if expected != self.bytes.len() as u64 {
            return Err(ArgsError::IndexOutOfRange.into());
        }
        Ok(())
    }
}
