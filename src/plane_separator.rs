//! The plane-axis separation and caching filter (§4.7). The core's most
//! intricate control logic: wraps a parent reader and projects a virtual
//! reader whose planar axes are a subset of the parent's, synthesizing
//! virtual planes from sub-regions of parent planes and caching the most
//! recently fetched parent plane behind a single lock.

use std::sync::Mutex;

use crate::error::{ArgsError, ResourceError, TiffError, TiffResult};
use crate::metadata::{Axis, AxisType, ImageMetadata, Plane};

/// Anything a [`PlaneSeparator`] can wrap: a parser, or another separator.
/// [`crate::parser::TiffParser`] implements this directly.
pub trait PlaneSource {
    fn metadata(&self, image_index: usize) -> TiffResult<ImageMetadata>;
    fn plane_count(&self, image_index: usize) -> TiffResult<u64>;
    fn open_plane(
        &mut self,
        image_index: usize,
        plane_index: u64,
        offsets: &[u64],
        lengths: &[u64],
    ) -> TiffResult<Plane>;
}

/// Rough per-process ceiling used by the §4.7 step-3 strip-count decision.
/// A real deployment would source this from the host's actual available
/// memory; a fixed budget keeps the decision deterministic and free of
/// platform-specific introspection, which is all the filter's algorithm
/// cares about.
const AVAILABLE_MEMORY_BUDGET: u64 = 256 * 1024 * 1024;

/// The single-slot cache key: exact match required on all four components
/// (§3 `PlaneCache` invariant - no sub-region reuse).
#[derive(Debug, Clone, PartialEq, Eq)]
struct CacheKey {
    image_index: usize,
    parent_plane_index: u64,
    offsets: Vec<u64>,
    lengths: Vec<u64>,
}

struct CacheEntry {
    key: CacheKey,
    plane: Plane,
}

struct Inner<P> {
    parent: P,
    cache: Option<CacheEntry>,
}

/// A filter that virtually splits `separate` out of its parent's planar
/// axis prefix into the non-planar tail (§4.7 "Setup").
pub struct PlaneSeparator<P> {
    separate: Vec<AxisType>,
    inner: Mutex<Inner<P>>,
}

impl<P: PlaneSource> PlaneSeparator<P> {
    pub fn new(parent: P, separate: Vec<AxisType>) -> Self {
        PlaneSeparator {
            separate,
            inner: Mutex::new(Inner { parent, cache: None }),
        }
    }

    /// Number of axes split out; used to slice the derived non-planar
    /// coordinate vector (§4.7 "Setup").
    fn offset(&self) -> usize {
        self.separate.len()
    }

    pub fn metadata(&self, image_index: usize) -> TiffResult<ImageMetadata> {
        let inner = self.inner.lock().unwrap();
        let parent_meta = inner.parent.metadata(image_index)?;
        derive_metadata(&parent_meta, &self.separate)
    }

    pub fn plane_count(&self, image_index: usize) -> TiffResult<u64> {
        Ok(self.metadata(image_index)?.plane_count())
    }

    /// The pure function `virtualPlaneIndex -> parentPlaneIndex` (§4.7
    /// invariants).
    pub fn get_original_index(&self, image_index: usize, virtual_plane_index: u64) -> TiffResult<u64> {
        let inner = self.inner.lock().unwrap();
        let parent_meta = inner.parent.metadata(image_index)?;
        let derived = derive_metadata(&parent_meta, &self.separate)?;
        let coords = derived.unrasterize(virtual_plane_index)?;
        let parent_coords = &coords[self.offset()..];
        Ok(parent_meta.rasterize(parent_coords))
    }

    /// Replaces the parent and invalidates the cache (§4.7 invariants:
    /// "Cache is invalidated on any `setSource`").
    pub fn set_source(&self, parent: P) {
        let mut inner = self.inner.lock().unwrap();
        inner.parent = parent;
        inner.cache = None;
    }

    pub fn open_plane(
        &self,
        image_index: usize,
        virtual_plane_index: u64,
        offsets: &[u64],
        lengths: &[u64],
    ) -> TiffResult<Plane> {
        let mut inner = self.inner.lock().unwrap();
        let parent_meta = inner.parent.metadata(image_index)?;

        // Indexed color bypasses separation entirely and delegates straight
        // to the parent (§4.7 "Indexed color").
        if parent_meta.indexed {
            return inner.parent.open_plane(image_index, virtual_plane_index, offsets, lengths);
        }

        let derived = derive_metadata(&parent_meta, &self.separate)?;
        let offset = self.offset();
        let coords = derived.unrasterize(virtual_plane_index)?;
        let separated_position = coords[..offset].to_vec();
        let parent_coords = &coords[offset..];
        let parent_plane_index = parent_meta.rasterize(parent_coords);

        let separated_lengths: Vec<u64> = self
            .separate
            .iter()
            .map(|kind| {
                parent_meta
                    .axis_length(kind)
                    .ok_or(ArgsError::InvalidAxisSpec)
            })
            .collect::<Result<_, _>>()?;

        // Step 1: translate the virtual offsets/lengths into the parent's
        // planar coordinate space (`updateLastPlaneInfo`).
        let (parent_offsets, parent_lengths) =
            translate_to_parent_planar(&parent_meta, &self.separate, offsets, lengths)?;

        // Step 2: single-slot cache check. Exact match on all four
        // components required (§3, §4.7 step 2).
        let key = CacheKey {
            image_index,
            parent_plane_index,
            offsets: parent_offsets.clone(),
            lengths: parent_lengths.clone(),
        };
        if let Some(entry) = &inner.cache {
            if entry.key == key {
                return extract_separated_region(
                    &entry.plane,
                    &parent_meta,
                    &self.separate,
                    &separated_position,
                    &separated_lengths,
                    offsets,
                    lengths,
                );
            }
        }

        // Step 3: decide strip count. Splitting only ever divides along Y,
        // so a single row that already exceeds the budget/representable
        // limit on its own cannot be reduced by adding more strips - that
        // case is a genuine `OutOfMemoryPlane`, not merely "use more strips".
        let bpp = parent_meta.pixel_type.bytes_per_pixel() as u64;
        let height = parent_lengths.get(1).copied().unwrap_or(1).max(1);
        let row_elems: u64 = parent_lengths
            .iter()
            .enumerate()
            .filter(|(axis, _)| *axis != 1)
            .try_fold(1u64, |acc, (_, &len)| {
                acc.checked_mul(len).ok_or(TiffError::Args(ArgsError::IntegerOverflow))
            })?;
        let row_bytes = row_elems
            .checked_mul(bpp)
            .ok_or(TiffError::Args(ArgsError::IntegerOverflow))?;
        if row_bytes > AVAILABLE_MEMORY_BUDGET || row_bytes > (i32::MAX as u64) {
            return Err(TiffError::Resource(ResourceError::OutOfMemoryPlane {
                image_index: image_index as u64,
                plane_index: parent_plane_index,
            }));
        }
        let plane_size = row_bytes
            .checked_mul(height)
            .ok_or(TiffError::Args(ArgsError::IntegerOverflow))?;
        let strips = if plane_size > AVAILABLE_MEMORY_BUDGET || plane_size > (i32::MAX as u64) {
            (height as f64).sqrt().floor().max(1.0) as u64
        } else {
            1
        };

        // Step 4: fetch `strips` Y-strips from the parent and reassemble.
        let y0 = parent_offsets.get(1).copied().unwrap_or(0);
        let base_strip_height = height / strips;
        let mut full_parent_bytes = Vec::new();

        for strip_idx in 0..strips {
            let strip_start = strip_idx * base_strip_height;
            let strip_height = if strip_idx + 1 == strips {
                height - strip_start
            } else {
                base_strip_height
            };
            let mut strip_offsets = parent_offsets.clone();
            let mut strip_lengths = parent_lengths.clone();
            if strip_offsets.len() > 1 {
                strip_offsets[1] = y0 + strip_start;
                strip_lengths[1] = strip_height;
            }
            let strip_plane = inner.parent.open_plane(
                image_index,
                parent_plane_index,
                &strip_offsets,
                &strip_lengths,
            )?;
            full_parent_bytes.extend_from_slice(&strip_plane.bytes);
        }

        let full_parent_plane = Plane {
            bytes: full_parent_bytes,
            offsets: parent_offsets.clone(),
            lengths: parent_lengths.clone(),
        };

        let result = extract_separated_region(
            &full_parent_plane,
            &parent_meta,
            &self.separate,
            &separated_position,
            &separated_lengths,
            offsets,
            lengths,
        );

        // Step 5: cache the (uncombined) parent plane for the next call.
        inner.cache = Some(CacheEntry { key, plane: full_parent_plane });

        result
    }

    /// Same projection applied to the parent's thumbnail plane; always a
    /// single fetch of the full plane (§4.7 "Thumbnail planes"). The parent
    /// is expected to expose its thumbnail as plane index `u64::MAX` by
    /// convention of this engine's [`PlaneSource`] implementations.
    pub fn open_thumbnail(&self, image_index: usize) -> TiffResult<Plane> {
        let mut inner = self.inner.lock().unwrap();
        let parent_meta = inner.parent.metadata(image_index)?;
        let full_offsets = vec![0u64; parent_meta.planar_axes().len()];
        let full_lengths: Vec<u64> = parent_meta.planar_axes().iter().map(|a| a.length).collect();
        inner
            .parent
            .open_plane(image_index, u64::MAX, &full_offsets, &full_lengths)
    }
}

/// Moves `separate`'s axis types from the planar prefix to the front of the
/// non-planar tail, recomputing plane count (§4.7 "Setup").
fn derive_metadata(parent: &ImageMetadata, separate: &[AxisType]) -> TiffResult<ImageMetadata> {
    for kind in separate {
        if !parent.planar_axes().iter().any(|a| &a.kind == kind) {
            return Err(ArgsError::InvalidAxisSpec.into());
        }
    }

    let mut planar: Vec<Axis> = Vec::new();
    let mut newly_nonplanar: Vec<Axis> = Vec::new();
    for axis in parent.planar_axes() {
        if separate.contains(&axis.kind) {
            let mut a = axis.clone();
            a.planar = false;
            newly_nonplanar.push(a);
        } else {
            planar.push(axis.clone());
        }
    }
    let planar_count = planar.len();

    let mut axes = planar;
    // Preserve `separate`'s own order for the split axes, not the planar
    // prefix's order, so `separated_position`'s components line up with the
    // caller-specified axis list.
    for kind in separate {
        if let Some(pos) = newly_nonplanar.iter().position(|a| &a.kind == kind) {
            axes.push(newly_nonplanar.remove(pos));
        }
    }
    axes.extend(parent.nonplanar_axes().iter().cloned());

    Ok(ImageMetadata {
        pixel_type: parent.pixel_type,
        little_endian: parent.little_endian,
        indexed: parent.indexed,
        planar_count,
        axes,
        bits_per_pixel: parent.bits_per_pixel,
        color_table: parent.color_table.clone(),
        unit: parent.unit.clone(),
    })
}

/// `updateLastPlaneInfo` (§4.7 step 1): axes that remain planar copy the
/// virtual request through directly; axes being split off are requested as
/// a full `[0, axisLength)` span from the parent, since the caller's
/// sub-region only constrains the axes it still sees as planar.
fn translate_to_parent_planar(
    parent: &ImageMetadata,
    separate: &[AxisType],
    offsets: &[u64],
    lengths: &[u64],
) -> TiffResult<(Vec<u64>, Vec<u64>)> {
    let derived_planar_count = parent.planar_axes().iter().filter(|a| !separate.contains(&a.kind)).count();
    if offsets.len() != derived_planar_count || lengths.len() != derived_planar_count {
        return Err(ArgsError::InvalidAxisSpec.into());
    }

    let mut parent_offsets = Vec::with_capacity(parent.planar_axes().len());
    let mut parent_lengths = Vec::with_capacity(parent.planar_axes().len());
    let mut next_remaining = 0usize;
    for axis in parent.planar_axes() {
        if separate.contains(&axis.kind) {
            parent_offsets.push(0);
            parent_lengths.push(axis.length);
        } else {
            parent_offsets.push(offsets[next_remaining]);
            parent_lengths.push(lengths[next_remaining]);
            next_remaining += 1;
        }
    }
    Ok((parent_offsets, parent_lengths))
}

/// `splitChannels` (§4.7 step 4/2): extracts the requested separated
/// sub-region out of a fully-fetched parent plane (whose planar layout
/// matches `parent`'s full planar axis list) into the caller's requested
/// virtual sub-region.
#[allow(clippy::too_many_arguments)]
fn extract_separated_region(
    parent_plane: &Plane,
    parent: &ImageMetadata,
    separate: &[AxisType],
    separated_position: &[u64],
    _separated_lengths: &[u64],
    virtual_offsets: &[u64],
    virtual_lengths: &[u64],
) -> TiffResult<Plane> {
    let bpp = parent.pixel_type.bytes_per_pixel() as u64;
    let planar_axes = parent.planar_axes();

    // Per-planar-axis parent-plane strides, in elements (not bytes), row-major
    // with the last axis fastest-varying (matches the parser/encoder layout:
    // X fastest within a row, Y next, Channel slowest for planar-config
    // chunky storage the separator only ever sees - see ImageMetadata axis
    // ordering, always [X, Y, (Channel)]).
    let mut strides = vec![1u64; planar_axes.len()];
    for i in (0..planar_axes.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * parent_plane.lengths[i + 1];
    }

    let mut fixed = vec![None; planar_axes.len()];
    for (kind, &pos) in separate.iter().zip(separated_position.iter()) {
        let idx = planar_axes
            .iter()
            .position(|a| &a.kind == kind)
            .ok_or(ArgsError::InvalidAxisSpec)?;
        fixed[idx] = Some(pos);
    }

    let remaining_axes: Vec<usize> = (0..planar_axes.len()).filter(|&i| fixed[i].is_none()).collect();
    if remaining_axes.len() != virtual_offsets.len() || remaining_axes.len() != virtual_lengths.len() {
        return Err(ArgsError::InvalidAxisSpec.into());
    }

    let out_lengths = virtual_lengths.to_vec();
    let out_elems = crate::util::safe_multiply_u32(&out_lengths.iter().map(|&l| l as u32).collect::<Vec<_>>())?;
    let mut out = vec![0u8; (out_elems * bpp) as usize];

    let mut coord = vec![0u64; planar_axes.len()];
    for (i, &pos) in fixed.iter().enumerate() {
        if let Some(p) = pos {
            coord[i] = p - parent_plane.offsets[i];
        }
    }

    let mut out_pos = vec![0u64; remaining_axes.len()];
    loop {
        for (k, &axis_idx) in remaining_axes.iter().enumerate() {
            coord[axis_idx] = virtual_offsets[k] + out_pos[k] - parent_plane.offsets[axis_idx];
        }
        let parent_elem: u64 = coord.iter().zip(strides.iter()).map(|(&c, &s)| c * s).sum();
        let src = (parent_elem * bpp) as usize;

        let mut out_stride = 1u64;
        let mut out_elem = 0u64;
        for k in (0..remaining_axes.len()).rev() {
            out_elem += out_pos[k] * out_stride;
            out_stride *= out_lengths[k];
        }
        let dst = (out_elem * bpp) as usize;
        out[dst..dst + bpp as usize].copy_from_slice(&parent_plane.bytes[src..src + bpp as usize]);

        // Advance out_pos (odometer, last axis fastest).
        let mut k = remaining_axes.len();
        loop {
            if k == 0 {
                return Ok(Plane { bytes: out, offsets: virtual_offsets.to_vec(), lengths: virtual_lengths.to_vec() });
            }
            k -= 1;
            out_pos[k] += 1;
            if out_pos[k] < out_lengths[k] {
                break;
            }
            out_pos[k] = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::PixelType;

    /// A trivial in-memory parent: one RGB-interleaved image, single plane.
    struct FakeRgbParent {
        width: u64,
        height: u64,
        bytes: Vec<u8>,
    }

    impl PlaneSource for FakeRgbParent {
        fn metadata(&self, _image_index: usize) -> TiffResult<ImageMetadata> {
            Ok(ImageMetadata {
                pixel_type: PixelType::Uint8,
                little_endian: true,
                indexed: false,
                planar_count: 3,
                axes: vec![
                    Axis::new(AxisType::X, self.width, true),
                    Axis::new(AxisType::Y, self.height, true),
                    Axis::new(AxisType::Channel, 3, true),
                ],
                bits_per_pixel: 8,
                color_table: None,
                unit: None,
            })
        }

        fn plane_count(&self, _image_index: usize) -> TiffResult<u64> {
            Ok(1)
        }

        fn open_plane(
            &mut self,
            _image_index: usize,
            _plane_index: u64,
            offsets: &[u64],
            lengths: &[u64],
        ) -> TiffResult<Plane> {
            let (x0, y0, c0) = (offsets[0], offsets[1], offsets[2]);
            let (rx, ry, rc) = (lengths[0], lengths[1], lengths[2]);
            let mut out = vec![0u8; (rx * ry * rc) as usize];
            for y in 0..ry {
                for x in 0..rx {
                    for c in 0..rc {
                        let src = (((y0 + y) * self.width + (x0 + x)) * 3 + (c0 + c)) as usize;
                        let dst = ((y * rx + x) * rc + c) as usize;
                        out[dst] = self.bytes[src];
                    }
                }
            }
            Ok(Plane { bytes: out, offsets: offsets.to_vec(), lengths: lengths.to_vec() })
        }
    }

    fn make_parent(width: u64, height: u64) -> FakeRgbParent {
        let mut bytes = vec![0u8; (width * height * 3) as usize];
        for y in 0..height {
            for x in 0..width {
                let base = ((y * width + x) * 3) as usize;
                bytes[base] = (x % 256) as u8;
                bytes[base + 1] = (y % 256) as u8;
                bytes[base + 2] = 255;
            }
        }
        FakeRgbParent { width, height, bytes }
    }

    #[test]
    fn no_separation_is_identity() {
        let parent = make_parent(4, 4);
        let sep = PlaneSeparator::new(parent, vec![]);
        let offsets = [0, 0, 0];
        let lengths = [4, 4, 3];
        let plane = sep.open_plane(0, 0, &offsets, &lengths).unwrap();
        let direct = {
            let mut p = make_parent(4, 4);
            p.open_plane(0, 0, &offsets, &lengths).unwrap()
        };
        assert_eq!(plane.bytes, direct.bytes);
    }

    #[test]
    fn separating_channel_extracts_middle_byte_of_each_triplet() {
        let parent = make_parent(4, 4);
        let sep = PlaneSeparator::new(parent, vec![AxisType::Channel]);
        let meta = sep.metadata(0).unwrap();
        assert_eq!(meta.plane_count(), 3);
        assert_eq!(sep.get_original_index(0, 1).unwrap(), 0);

        // virtual plane 1 == channel index 1 (the G channel, set to y % 256)
        let plane = sep.open_plane(0, 1, &[0, 0], &[4, 4]).unwrap();
        for y in 0..4u64 {
            for x in 0..4u64 {
                assert_eq!(plane.bytes[(y * 4 + x) as usize], y as u8);
            }
        }
    }

    #[test]
    fn single_row_past_budget_reports_out_of_memory_instead_of_allocating() {
        /// A parent whose metadata claims an implausibly wide image; its
        /// `open_plane` panics if ever called, proving the filter rejects
        /// the request up front rather than attempting the allocation.
        struct HugeRowParent;
        impl PlaneSource for HugeRowParent {
            fn metadata(&self, _image_index: usize) -> TiffResult<ImageMetadata> {
                Ok(ImageMetadata {
                    pixel_type: PixelType::Uint8,
                    little_endian: true,
                    indexed: false,
                    planar_count: 3,
                    axes: vec![
                        Axis::new(AxisType::X, 100_000_000, true),
                        Axis::new(AxisType::Y, 4, true),
                        Axis::new(AxisType::Channel, 3, true),
                    ],
                    bits_per_pixel: 8,
                    color_table: None,
                    unit: None,
                })
            }
            fn plane_count(&self, _image_index: usize) -> TiffResult<u64> {
                Ok(1)
            }
            fn open_plane(
                &mut self,
                _image_index: usize,
                _plane_index: u64,
                _offsets: &[u64],
                _lengths: &[u64],
            ) -> TiffResult<Plane> {
                panic!("a single over-budget row must not be fetched from the parent");
            }
        }

        let sep = PlaneSeparator::new(HugeRowParent, vec![]);
        let err = sep.open_plane(0, 0, &[0, 0, 0], &[100_000_000, 4, 3]).unwrap_err();
        match err {
            TiffError::Resource(ResourceError::OutOfMemoryPlane { image_index, plane_index }) => {
                assert_eq!(image_index, 0);
                assert_eq!(plane_index, 0);
            }
            other => panic!("expected OutOfMemoryPlane, got {other:?}"),
        }
    }

    #[test]
    fn cache_hit_reuses_parent_plane_on_identical_request() {
        struct CountingParent {
            inner: FakeRgbParent,
            reads: std::cell::Cell<u32>,
        }
        impl PlaneSource for CountingParent {
            fn metadata(&self, i: usize) -> TiffResult<ImageMetadata> {
                self.inner.metadata(i)
            }
            fn plane_count(&self, i: usize) -> TiffResult<u64> {
                self.inner.plane_count(i)
            }
            fn open_plane(
                &mut self,
                image_index: usize,
                plane_index: u64,
                offsets: &[u64],
                lengths: &[u64],
            ) -> TiffResult<Plane> {
                self.reads.set(self.reads.get() + 1);
                self.inner.open_plane(image_index, plane_index, offsets, lengths)
            }
        }
        unsafe impl Send for CountingParent {}

        let parent = CountingParent { inner: make_parent(4, 4), reads: std::cell::Cell::new(0) };
        let sep = PlaneSeparator::new(parent, vec![AxisType::Channel]);

        let _ = sep.open_plane(0, 0, &[0, 0], &[4, 4]).unwrap();
        let _ = sep.open_plane(0, 1, &[0, 0], &[4, 4]).unwrap();
        let reads_after_two = sep.inner.lock().unwrap().parent.reads.get();
        assert_eq!(reads_after_two, 1, "second open should hit the cache, not re-read the parent");

        let _ = sep.open_plane(0, 2, &[1, 0], &[3, 4]).unwrap();
        let reads_after_three = sep.inner.lock().unwrap().parent.reads.get();
        assert_eq!(reads_after_three, 2, "changing the offsets must invalidate the cache");
    }
}
