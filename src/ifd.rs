//! The value representation stored in a single IFD entry, and the ordered
//! map of entries that makes up one directory.
//!
//! Grounded on the classic/BigTIFF-capable `Value`/`BufferedEntry`/
//! `ProcessedEntry`/`ImageFileDirectory` model: a tag's raw bytes
//! (`BufferedEntry`) are lazily promoted to typed values (`ProcessedEntry`)
//! only when read, so a directory with thousands of tags can be parsed
//! without eagerly decoding each one.

use crate::error::{TiffError, TiffFormatError, TiffResult};
use crate::tags::{Tag, Type};
use itertools::Itertools;
use std::{collections::BTreeMap, mem::size_of};

use self::Value::{
    Ascii, Byte, Double, Float, Ifd, IfdBig, List, Rational, RationalBig, SRational, SRationalBig,
    Short, Signed, SignedBig, SignedByte, SignedShort, Unsigned, UnsignedBig,
};

#[allow(unused_qualifications)]
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Value {
    Byte(u8),
    Short(u16),
    SignedByte(i8),
    SignedShort(i16),
    Signed(i32),
    SignedBig(i64),
    Unsigned(u32),
    UnsignedBig(u64),
    Float(f32),
    Double(f64),
    List(Vec<Value>),
    Rational(u32, u32),
    RationalBig(u64, u64),
    SRational(i32, i32),
    SRationalBig(i64, i64),
    Ascii(String),
    Ifd(u32),
    IfdBig(u64),
    Undefined(u8),
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self {
            Value::Byte(e) => write!(f, "{e}"),
            Value::Short(e) => write!(f, "{e}"),
            Value::SignedByte(e) => write!(f, "{e}"),
            Value::SignedShort(e) => write!(f, "{e}"),
            Value::Signed(e) => write!(f, "{e}"),
            Value::SignedBig(e) => write!(f, "{e}"),
            Value::Unsigned(e) => write!(f, "{e}"),
            Value::UnsignedBig(e) => write!(f, "{e}"),
            Value::Float(e) => write!(f, "{e}"),
            Value::Double(e) => write!(f, "{e}"),
            Value::Rational(e1, e2) => write!(f, "{e1}/{e2}"),
            Value::RationalBig(e1, e2) => write!(f, "{e1}/{e2}"),
            Value::SRational(e1, e2) => write!(f, "{e1}/{e2}"),
            Value::SRationalBig(e1, e2) => write!(f, "{e1}/{e2}"),
            Value::Ascii(e) => write!(f, "{e}"),
            Value::Ifd(e) => write!(f, "IFD offset: {e}"),
            Value::IfdBig(e) => write!(f, "IFD offset: {e}"),
            Value::Undefined(e) => write!(f, "{e}"),
            Value::List(_) => write!(f, "<list>"),
        }
    }
}

impl Value {
    /// The [`Type`] this value would be encoded as. Used to report a
    /// `BadTagType` error together with the tag id the caller knows but a
    /// bare `Value` does not.
    pub fn type_of(&self) -> Type {
        match self {
            Value::Byte(_) => Type::BYTE,
            Value::Short(_) => Type::SHORT,
            Value::SignedByte(_) => Type::SBYTE,
            Value::SignedShort(_) => Type::SSHORT,
            Value::Signed(_) => Type::SLONG,
            Value::SignedBig(_) => Type::SLONG8,
            Value::Unsigned(_) => Type::LONG,
            Value::UnsignedBig(_) => Type::LONG8,
            Value::Float(_) => Type::FLOAT,
            Value::Double(_) => Type::DOUBLE,
            Value::List(_) => Type::UNDEFINED,
            Value::Rational(..) => Type::RATIONAL,
            Value::RationalBig(..) => Type::RATIONAL,
            Value::SRational(..) => Type::SRATIONAL,
            Value::SRationalBig(..) => Type::SRATIONAL,
            Value::Ascii(_) => Type::ASCII,
            Value::Ifd(_) => Type::IFD,
            Value::IfdBig(_) => Type::IFD8,
            Value::Undefined(_) => Type::UNDEFINED,
        }
    }

    /// Coerce into a `u8`, or return `self`'s own type for the caller to
    /// report as a `BadTagType` alongside the tag id it knows.
    pub fn into_u8(self) -> Result<u8, Type> {
        match self {
            Byte(val) => Ok(val),
            val => Err(val.type_of()),
        }
    }

    pub fn into_i8(self) -> Result<i8, Type> {
        match self {
            SignedByte(val) => Ok(val),
            val => Err(val.type_of()),
        }
    }

    pub fn into_u16(self) -> Result<u16, Type> {
        match self {
            Short(val) => Ok(val),
            Byte(val) => Ok(val.into()),
            Unsigned(val) => u16::try_from(val).map_err(|_| Type::LONG),
            UnsignedBig(val) => u16::try_from(val).map_err(|_| Type::LONG8),
            val => Err(val.type_of()),
        }
    }

    pub fn into_i16(self) -> Result<i16, Type> {
        match self {
            SignedByte(val) => Ok(val.into()),
            SignedShort(val) => Ok(val),
            Signed(val) => i16::try_from(val).map_err(|_| Type::SLONG),
            SignedBig(val) => i16::try_from(val).map_err(|_| Type::SLONG8),
            val => Err(val.type_of()),
        }
    }

    pub fn into_u32(self) -> Result<u32, Type> {
        match self {
            Byte(val) => Ok(val.into()),
            Short(val) => Ok(val.into()),
            Unsigned(val) => Ok(val),
            UnsignedBig(val) => u32::try_from(val).map_err(|_| Type::LONG8),
            Ifd(val) => Ok(val),
            IfdBig(val) => u32::try_from(val).map_err(|_| Type::IFD8),
            val => Err(val.type_of()),
        }
    }

    pub fn into_i32(self) -> Result<i32, Type> {
        match self {
            SignedByte(val) => Ok(val.into()),
            SignedShort(val) => Ok(val.into()),
            Signed(val) => Ok(val),
            SignedBig(val) => i32::try_from(val).map_err(|_| Type::SLONG8),
            val => Err(val.type_of()),
        }
    }

    pub fn into_u64(self) -> Result<u64, Type> {
        match self {
            Byte(val) => Ok(val.into()),
            Short(val) => Ok(val.into()),
            Unsigned(val) => Ok(val.into()),
            UnsignedBig(val) => Ok(val),
            Ifd(val) => Ok(val.into()),
            IfdBig(val) => Ok(val),
            val => Err(val.type_of()),
        }
    }

    pub fn into_i64(self) -> Result<i64, Type> {
        match self {
            SignedByte(val) => Ok(val.into()),
            SignedShort(val) => Ok(val.into()),
            Signed(val) => Ok(val.into()),
            SignedBig(val) => Ok(val),
            val => Err(val.type_of()),
        }
    }

    pub fn into_f32(self) -> Result<f32, Type> {
        match self {
            Float(val) => Ok(val),
            Rational(num, den) => Ok(num as f32 / den as f32),
            SRational(num, den) => Ok(num as f32 / den as f32),
            val => Err(val.type_of()),
        }
    }

    pub fn into_f64(self) -> Result<f64, Type> {
        match self {
            Float(val) => Ok(val as f64),
            Double(val) => Ok(val),
            Rational(num, den) => Ok(num as f64 / den as f64),
            SRational(num, den) => Ok(num as f64 / den as f64),
            val => Err(val.type_of()),
        }
    }

    pub fn into_string(self) -> Result<String, Type> {
        match self {
            Ascii(val) => Ok(val),
            val => Err(val.type_of()),
        }
    }

    pub fn into_u32_vec(self) -> Result<Vec<u32>, Type> {
        match self {
            List(vec) => vec.into_iter().map(Value::into_u32).collect(),
            Rational(n, d) => Ok(vec![n, d]),
            val @ (Byte(_) | Short(_) | Unsigned(_) | UnsignedBig(_) | Ifd(_) | IfdBig(_)) => {
                Ok(vec![val.into_u32()?])
            }
            val => Err(val.type_of()),
        }
    }

    pub fn into_u16_vec(self) -> Result<Vec<u16>, Type> {
        match self {
            List(vec) => vec.into_iter().map(Value::into_u16).collect(),
            val @ (Byte(_) | Short(_)) => Ok(vec![val.into_u16()?]),
            val => Err(val.type_of()),
        }
    }

    pub fn into_i32_vec(self) -> Result<Vec<i32>, Type> {
        match self {
            List(vec) => {
                let mut out = Vec::with_capacity(vec.len());
                for v in vec {
                    match v {
                        SRational(n, d) => {
                            out.push(n);
                            out.push(d);
                        }
                        other => out.push(other.into_i32()?),
                    }
                }
                Ok(out)
            }
            SRational(n, d) => Ok(vec![n, d]),
            val => Ok(vec![val.into_i32()?]),
        }
    }

    pub fn into_f32_vec(self) -> Result<Vec<f32>, Type> {
        match self {
            List(vec) => vec.into_iter().map(Value::into_f32).collect(),
            val => Ok(vec![val.into_f32()?]),
        }
    }

    pub fn into_f64_vec(self) -> Result<Vec<f64>, Type> {
        match self {
            List(vec) => vec.into_iter().map(Value::into_f64).collect(),
            val => Ok(vec![val.into_f64()?]),
        }
    }

    pub fn into_u64_vec(self) -> Result<Vec<u64>, Type> {
        match self {
            List(vec) => vec.into_iter().map(Value::into_u64).collect(),
            Rational(n, d) => Ok(vec![n.into(), d.into()]),
            RationalBig(n, d) => Ok(vec![n, d]),
            val => Ok(vec![val.into_u64()?]),
        }
    }

    pub fn into_i64_vec(self) -> Result<Vec<i64>, Type> {
        match self {
            List(vec) => {
                let mut out = Vec::with_capacity(vec.len());
                for v in vec {
                    match v {
                        SRational(n, d) => {
                            out.push(n.into());
                            out.push(d.into());
                        }
                        SRationalBig(n, d) => {
                            out.push(n);
                            out.push(d);
                        }
                        other => out.push(other.into_i64()?),
                    }
                }
                Ok(out)
            }
            SRational(n, d) => Ok(vec![n.into(), d.into()]),
            SRationalBig(n, d) => Ok(vec![n, d]),
            val => Ok(vec![val.into_i64()?]),
        }
    }
}

/// An entry whose raw bytes have been read from the stream but not yet
/// decoded into typed [`Value`]s.
#[derive(Clone, Debug)]
pub struct BufferedEntry {
    pub type_: Type,
    pub count: u64,
    pub data: Vec<u8>,
}

impl From<ProcessedEntry> for BufferedEntry {
    fn from(pe: ProcessedEntry) -> Self {
        Self {
            type_: pe.kind(),
            count: pe.count() as u64,
            data: pe.data(),
        }
    }
}

/// An entry decoded into a list of typed [`Value`]s. Its type is determined
/// by the contents of the list; its count is the length of the list (or of
/// the string, for `Ascii`).
#[derive(Clone, Debug)]
pub struct ProcessedEntry(Vec<Value>);

impl std::fmt::Display for ProcessedEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "{}", self.0.iter().map(|v| format!("{v}")).join(", "))
    }
}

macro_rules! cast {
    ($be:expr, $type:ty, $value:expr) => {{
        $be.data
            .chunks_exact(size_of::<$type>())
            .map(|i| <$type>::from_ne_bytes(i.try_into().expect("chunk size matches")))
            .map($value)
            .collect()
    }};

    ($be:expr, $type:ty, $second:ty, $value:expr) => {{
        $be.data
            .chunks_exact(size_of::<$type>())
            .map(|i| <$type>::from_ne_bytes(i.try_into().expect("chunk size matches")))
            .tuples::<($type, $type)>()
            .map(|(n, d)| $value(n, d))
            .collect()
    }};
}

impl From<BufferedEntry> for ProcessedEntry {
    fn from(be: BufferedEntry) -> Self {
        let contents: Vec<Value> = match be.type_ {
            Type::BYTE => be.data.into_iter().map(Value::Byte).collect(),
            Type::SBYTE => be
                .data
                .into_iter()
                .map(|b| Value::SignedByte(i8::from_ne_bytes([b; 1])))
                .collect(),
            Type::SHORT => cast!(be, u16, Value::Short),
            Type::LONG => cast!(be, u32, Value::Unsigned),
            Type::LONG8 => cast!(be, u64, Value::UnsignedBig),
            Type::SSHORT => cast!(be, i16, Value::SignedShort),
            Type::SLONG => cast!(be, i32, Value::Signed),
            Type::SLONG8 => cast!(be, i64, Value::SignedBig),
            Type::FLOAT => cast!(be, f32, Value::Float),
            Type::DOUBLE => cast!(be, f64, Value::Double),
            Type::RATIONAL => cast!(be, u32, u32, Value::Rational),
            Type::SRATIONAL => cast!(be, i32, i32, Value::SRational),
            Type::IFD => cast!(be, u32, Value::Ifd),
            Type::IFD8 => cast!(be, u64, Value::IfdBig),
            Type::UNDEFINED => be.data.into_iter().map(Value::Undefined).collect(),
            Type::ASCII => {
                vec![Value::Ascii(String::from_utf8_lossy(&be.data).into_owned())]
            }
        };

        ProcessedEntry(contents)
    }
}

impl From<Value> for ProcessedEntry {
    fn from(v: Value) -> Self {
        ProcessedEntry(vec![v])
    }
}

impl ProcessedEntry {
    pub fn new(content: Value) -> Self {
        Self(vec![content])
    }

    pub fn new_vec(content: Vec<Value>) -> Self {
        Self(content)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.0.iter()
    }

    pub fn first(&self) -> Option<Value> {
        self.0.first().cloned()
    }

    pub fn kind(&self) -> Type {
        self.0.first().map(Value::type_of).unwrap_or(Type::UNDEFINED)
    }

    pub fn count(&self) -> usize {
        match self.0.first() {
            Some(Value::Ascii(s)) => s.len(),
            _ => self.0.len(),
        }
    }

    fn data(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.count() * self.kind().size());

        for v in &self.0 {
            match v {
                Value::Byte(e) => data.push(*e),
                Value::Short(e) => data.extend_from_slice(&e.to_ne_bytes()),
                Value::SignedByte(e) => data.push(*e as u8),
                Value::SignedShort(e) => data.extend_from_slice(&e.to_ne_bytes()),
                Value::Signed(e) => data.extend_from_slice(&e.to_ne_bytes()),
                Value::SignedBig(e) => data.extend_from_slice(&e.to_ne_bytes()),
                Value::Unsigned(e) => data.extend_from_slice(&e.to_ne_bytes()),
                Value::UnsignedBig(e) => data.extend_from_slice(&e.to_ne_bytes()),
                Value::Float(e) => data.extend_from_slice(&e.to_ne_bytes()),
                Value::Double(e) => data.extend_from_slice(&e.to_ne_bytes()),
                Value::List(_) => {}
                Value::Rational(n, d) => {
                    data.extend_from_slice(&n.to_ne_bytes());
                    data.extend_from_slice(&d.to_ne_bytes());
                }
                Value::SRational(n, d) => {
                    data.extend_from_slice(&n.to_ne_bytes());
                    data.extend_from_slice(&d.to_ne_bytes());
                }
                Value::RationalBig(n, d) => {
                    data.extend_from_slice(&n.to_ne_bytes());
                    data.extend_from_slice(&d.to_ne_bytes());
                }
                Value::SRationalBig(n, d) => {
                    data.extend_from_slice(&n.to_ne_bytes());
                    data.extend_from_slice(&d.to_ne_bytes());
                }
                Value::Ascii(e) => data.extend_from_slice(e.as_bytes()),
                Value::Ifd(e) => data.extend_from_slice(&e.to_ne_bytes()),
                Value::IfdBig(e) => data.extend_from_slice(&e.to_ne_bytes()),
                Value::Undefined(e) => data.push(*e),
            }
        }

        data
    }
}

/// An ordered collection of tag/entry pairs, generic over the tag-id type
/// and the entry representation (buffered bytes or decoded values).
#[derive(Debug, Clone)]
pub struct ImageFileDirectory<T: Ord + Into<u16>, E>(BTreeMap<T, E>);

/// A directory keyed by the well-known [`Tag`] enum, generic only over the
/// entry representation.
pub type Directory<E> = ImageFileDirectory<Tag, E>;

impl<T, E> Default for ImageFileDirectory<T, E>
where
    T: Ord + Into<u16>,
{
    fn default() -> Self {
        ImageFileDirectory(BTreeMap::new())
    }
}

impl<T, E> ImageFileDirectory<T, E>
where
    T: Ord + Into<u16> + Copy,
{
    pub fn new() -> Self {
        ImageFileDirectory(BTreeMap::new())
    }

    pub fn insert<I>(&mut self, tag: T, entry: I) -> Option<E>
    where
        I: Into<E>,
    {
        self.0.insert(tag, entry.into())
    }

    pub fn contains_key(&self, tag: T) -> bool {
        self.0.contains_key(&tag)
    }

    pub fn get(&self, tag: T) -> Option<&E> {
        self.0.get(&tag)
    }

    pub fn get_mut(&mut self, tag: T) -> Option<&mut E> {
        self.0.get_mut(&tag)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::collections::btree_map::Iter<'_, T, E> {
        self.0.iter()
    }

    pub fn values_mut(&mut self) -> std::collections::btree_map::ValuesMut<'_, T, E> {
        self.0.values_mut()
    }
}

impl<T, E> std::iter::IntoIterator for ImageFileDirectory<T, E>
where
    T: Ord + Into<u16>,
{
    type Item = (T, E);
    type IntoIter = std::collections::btree_map::IntoIter<T, E>;

    fn into_iter(self) -> std::collections::btree_map::IntoIter<T, E> {
        self.0.into_iter()
    }
}

impl<T, E, K> FromIterator<(T, K)> for ImageFileDirectory<T, E>
where
    T: Ord + Into<u16>,
    K: Into<E>,
{
    fn from_iter<I: IntoIterator<Item = (T, K)>>(iter: I) -> Self {
        ImageFileDirectory(iter.into_iter().map(|(t, k)| (t, k.into())).collect())
    }
}

/// An ordered sequence of IFDs; position `i` in the chain is the i-th plane
/// (§3 `IFDChain`).
pub type IfdChain = Vec<Directory<ProcessedEntry>>;

/// Typed accessors on a decoded directory. Every getter coerces narrower
/// integer types up (an entry stored as `SHORT` is readable through
/// `get_u32`) and fails with [`TiffFormatError::MissingTag`] /
/// [`TiffFormatError::BadTagType`] rather than panicking, since every caller
/// is ultimately driven by untrusted file contents.
impl Directory<ProcessedEntry> {
    fn entry(&self, tag: Tag) -> TiffResult<&ProcessedEntry> {
        self.get(tag)
            .ok_or_else(|| TiffError::Format(TiffFormatError::MissingTag(tag.to_u16())))
    }

    fn bad_type(tag: Tag, have: Type, want: Type) -> TiffError {
        TiffFormatError::BadTagType { tag: tag.to_u16(), have, want }.into()
    }

    pub fn get_u32(&self, tag: Tag) -> TiffResult<u32> {
        let entry = self.entry(tag)?;
        let have = entry.kind();
        entry
            .first()
            .ok_or_else(|| Self::bad_type(tag, have, Type::LONG))?
            .into_u32()
            .map_err(|have| Self::bad_type(tag, have, Type::LONG))
    }

    pub fn get_u32_opt(&self, tag: Tag) -> TiffResult<Option<u32>> {
        match self.get(tag) {
            Some(_) => self.get_u32(tag).map(Some),
            None => Ok(None),
        }
    }

    pub fn get_u16(&self, tag: Tag) -> TiffResult<u16> {
        let entry = self.entry(tag)?;
        let have = entry.kind();
        entry
            .first()
            .ok_or_else(|| Self::bad_type(tag, have, Type::SHORT))?
            .into_u16()
            .map_err(|have| Self::bad_type(tag, have, Type::SHORT))
    }

    pub fn get_u64(&self, tag: Tag) -> TiffResult<u64> {
        let entry = self.entry(tag)?;
        let have = entry.kind();
        entry
            .first()
            .ok_or_else(|| Self::bad_type(tag, have, Type::LONG8))?
            .into_u64()
            .map_err(|have| Self::bad_type(tag, have, Type::LONG8))
    }

    pub fn get_string(&self, tag: Tag) -> TiffResult<String> {
        let entry = self.entry(tag)?;
        let have = entry.kind();
        entry
            .first()
            .ok_or_else(|| Self::bad_type(tag, have, Type::ASCII))?
            .into_string()
            .map_err(|have| Self::bad_type(tag, have, Type::ASCII))
    }

    pub fn get_string_opt(&self, tag: Tag) -> Option<String> {
        self.get(tag).and_then(|e| e.first()).and_then(|v| v.into_string().ok())
    }

    pub fn get_u32_array(&self, tag: Tag) -> TiffResult<Vec<u32>> {
        let entry = self.entry(tag)?;
        let have = entry.kind();
        entry
            .iter()
            .cloned()
            .map(Value::into_u32)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| Self::bad_type(tag, have, Type::LONG))
    }

    pub fn get_u64_array(&self, tag: Tag) -> TiffResult<Vec<u64>> {
        let entry = self.entry(tag)?;
        let have = entry.kind();
        entry
            .iter()
            .cloned()
            .map(Value::into_u64)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| Self::bad_type(tag, have, Type::LONG8))
    }

    pub fn get_u16_array(&self, tag: Tag) -> TiffResult<Vec<u16>> {
        let entry = self.entry(tag)?;
        let have = entry.kind();
        entry
            .iter()
            .cloned()
            .map(Value::into_u16)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| Self::bad_type(tag, have, Type::SHORT))
    }

    pub fn get_rational_array(&self, tag: Tag) -> TiffResult<Vec<(u32, u32)>> {
        let entry = self.entry(tag)?;
        let mut out = Vec::new();
        for v in entry.iter() {
            match v {
                Value::Rational(n, d) => out.push((*n, *d)),
                _ => return Err(Self::bad_type(tag, entry.kind(), Type::RATIONAL)),
            }
        }
        Ok(out)
    }

    /// `BitsPerSample`, one entry per sample; TIFF permits a single shared
    /// value to stand in for all samples.
    pub fn get_bits_per_sample(&self) -> TiffResult<Vec<u16>> {
        let samples = self.samples_per_pixel()? as usize;
        let raw = self.get_u16_array(Tag::BitsPerSample)?;
        if raw.len() == 1 && samples > 1 {
            Ok(vec![raw[0]; samples])
        } else {
            Ok(raw)
        }
    }

    /// Defaults to `1` (§3 `IFD` invariant).
    pub fn samples_per_pixel(&self) -> TiffResult<u16> {
        match self.get(Tag::SamplesPerPixel) {
            Some(_) => self.get_u16(Tag::SamplesPerPixel),
            None => Ok(1),
        }
    }

    /// Defaults to `Chunky` (§3 `IFD` invariant).
    pub fn planar_configuration(&self) -> TiffResult<crate::tags::PlanarConfiguration> {
        use crate::tags::PlanarConfiguration;
        match self.get(Tag::PlanarConfiguration) {
            Some(_) => {
                let raw = self.get_u16(Tag::PlanarConfiguration)?;
                PlanarConfiguration::from_u16(raw)
                    .ok_or_else(|| Self::bad_type(Tag::PlanarConfiguration, Type::SHORT, Type::SHORT))
            }
            None => Ok(PlanarConfiguration::Chunky),
        }
    }

    /// Checks that every tag §3 requires be present after parsing is done.
    pub fn check_required_tags(&self) -> TiffResult<()> {
        for tag in [
            Tag::ImageWidth,
            Tag::ImageLength,
            Tag::BitsPerSample,
            Tag::Compression,
            Tag::PhotometricInterpretation,
        ] {
            self.entry(tag)?;
        }
        let has_strips = self.contains_key(Tag::StripOffsets);
        let has_tiles = self.contains_key(Tag::TileOffsets);
        if !has_strips && !has_tiles {
            return Err(TiffFormatError::BadStripLayout.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory_with(entries: Vec<(Tag, ProcessedEntry)>) -> Directory<ProcessedEntry> {
        let mut dir = Directory::new();
        for (tag, entry) in entries {
            dir.insert(tag, entry);
        }
        dir
    }

    #[test]
    fn get_u32_coerces_a_short_entry_up() {
        let dir = directory_with(vec![(Tag::ImageWidth, ProcessedEntry::new(Value::Short(640)))]);
        assert_eq!(dir.get_u32(Tag::ImageWidth).unwrap(), 640);
    }

    #[test]
    fn get_u32_on_a_missing_tag_errors() {
        let dir: Directory<ProcessedEntry> = Directory::new();
        let err = dir.get_u32(Tag::ImageWidth).unwrap_err();
        assert!(matches!(err, TiffError::Format(TiffFormatError::MissingTag(_))));
    }

    #[test]
    fn get_u32_on_an_incompatible_type_errors() {
        let dir = directory_with(vec![(Tag::ImageWidth, ProcessedEntry::new(Value::Ascii("nope".to_string())))]);
        let err = dir.get_u32(Tag::ImageWidth).unwrap_err();
        assert!(matches!(err, TiffError::Format(TiffFormatError::BadTagType { .. })));
    }

    #[test]
    fn get_u32_array_collects_every_entry() {
        let dir = directory_with(vec![(
            Tag::StripOffsets,
            ProcessedEntry::new_vec(vec![Value::Unsigned(10), Value::Unsigned(20), Value::Unsigned(30)]),
        )]);
        assert_eq!(dir.get_u32_array(Tag::StripOffsets).unwrap(), vec![10, 20, 30]);
    }

    #[test]
    fn bits_per_sample_broadcasts_a_single_shared_value() {
        let dir = directory_with(vec![
            (Tag::SamplesPerPixel, ProcessedEntry::new(Value::Short(3))),
            (Tag::BitsPerSample, ProcessedEntry::new(Value::Short(8))),
        ]);
        assert_eq!(dir.get_bits_per_sample().unwrap(), vec![8, 8, 8]);
    }

    #[test]
    fn samples_per_pixel_defaults_to_one() {
        let dir: Directory<ProcessedEntry> = Directory::new();
        assert_eq!(dir.samples_per_pixel().unwrap(), 1);
    }

    #[test]
    fn check_required_tags_rejects_a_directory_with_no_layout_tag() {
        let dir = directory_with(vec![
            (Tag::ImageWidth, ProcessedEntry::new(Value::Unsigned(4))),
            (Tag::ImageLength, ProcessedEntry::new(Value::Unsigned(4))),
            (Tag::BitsPerSample, ProcessedEntry::new(Value::Short(8))),
            (Tag::Compression, ProcessedEntry::new(Value::Short(1))),
            (Tag::PhotometricInterpretation, ProcessedEntry::new(Value::Short(1))),
        ]);
        let err = dir.check_required_tags().unwrap_err();
        assert!(matches!(err, TiffError::Format(TiffFormatError::BadStripLayout)));
    }

    #[test]
    fn check_required_tags_accepts_a_well_formed_stripped_directory() {
        let dir = directory_with(vec![
            (Tag::ImageWidth, ProcessedEntry::new(Value::Unsigned(4))),
            (Tag::ImageLength, ProcessedEntry::new(Value::Unsigned(4))),
            (Tag::BitsPerSample, ProcessedEntry::new(Value::Short(8))),
            (Tag::Compression, ProcessedEntry::new(Value::Short(1))),
            (Tag::PhotometricInterpretation, ProcessedEntry::new(Value::Short(1))),
            (Tag::StripOffsets, ProcessedEntry::new(Value::Unsigned(100))),
            (Tag::StripByteCounts, ProcessedEntry::new(Value::Unsigned(16))),
        ]);
        assert!(dir.check_required_tags().is_ok());
    }
}
