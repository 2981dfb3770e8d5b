use std::fmt;
use std::io;

use crate::tags::Type;

/// Top-level error kind for the crate.
#[derive(Debug)]
#[non_exhaustive]
pub enum TiffError {
    /// The input is not formatted the way the engine expects.
    Format(TiffFormatError),
    /// A source/stream level I/O failure.
    Io(IoError),
    /// The caller passed an invalid argument.
    Args(ArgsError),
    /// A requested operation could not be carried out within resource limits.
    Resource(ResourceError),
}

/// The image, or the byte range being read, is not formatted properly.
///
/// The list of variants may grow. Matching against this exhaustively is not
/// covered by stability guarantees.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TiffFormatError {
    /// Neither a classic-TIFF nor a BigTIFF header was found.
    NotATiff,
    /// The IFD chain revisits an offset already seen in this chain.
    CyclicIfd,
    /// A tag required by the directory model was absent after parsing.
    MissingTag(u16),
    /// A tag was present but its stored type cannot coerce to the requested one.
    BadTagType { tag: u16, have: Type, want: Type },
    /// The `Compression` tag named a codec this engine has no registration for.
    UnsupportedCompression(u16),
    /// Strip offsets/byte-counts are missing, mismatched in length, or both
    /// strip and tile tags are present together.
    BadStripLayout,
    /// Tile offsets/byte-counts are missing or mismatched in length.
    BadTileLayout,
    /// A strip or tile's byte count claims more bytes than the file contains.
    TruncatedPlane(usize),
    /// BigTIFF promotion was required but explicitly disabled.
    WouldOverflow32,
}

impl fmt::Display for TiffFormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use TiffFormatError::*;
        match self {
            NotATiff => write!(f, "not a TIFF or BigTIFF file"),
            CyclicIfd => write!(f, "IFD chain contains a cycle"),
            MissingTag(id) => write!(f, "required tag {id} not found"),
            BadTagType { tag, have, want } => {
                write!(f, "tag {tag} has type {have:?}, expected {want:?}")
            }
            UnsupportedCompression(code) => write!(f, "unsupported compression code {code}"),
            BadStripLayout => write!(f, "inconsistent or missing strip layout tags"),
            BadTileLayout => write!(f, "inconsistent or missing tile layout tags"),
            TruncatedPlane(i) => write!(f, "plane {i} byte counts exceed file length"),
            WouldOverflow32 => write!(
                f,
                "output would exceed 32-bit offsets but BigTIFF was explicitly disabled"
            ),
        }
    }
}

/// A source or stream level I/O failure.
#[derive(Debug)]
#[non_exhaustive]
pub enum IoError {
    /// A read or read-fully could not be satisfied because the source ran out of bytes.
    UnexpectedEnd,
    /// A write was attempted on a read-only source.
    ReadOnly,
    /// The source was closed while a read/write was in flight.
    Cancelled,
    /// Any lower-level failure, propagated unchanged.
    Other(io::Error),
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoError::UnexpectedEnd => write!(f, "unexpected end of stream"),
            IoError::ReadOnly => write!(f, "source is read-only"),
            IoError::Cancelled => write!(f, "source was closed during an in-flight operation"),
            IoError::Other(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IoError::Other(e) => Some(e),
            _ => None,
        }
    }
}

/// The caller passed an argument that is invalid for the requested operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ArgsError {
    /// An image or plane index was outside the valid range.
    IndexOutOfRange,
    /// A computed offset or length exceeded the representable range.
    IntegerOverflow,
    /// An axis specification (e.g. given to the plane separator) did not match the metadata it was applied to.
    InvalidAxisSpec,
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::IndexOutOfRange => write!(f, "index out of range"),
            ArgsError::IntegerOverflow => write!(f, "integer overflow computing an offset"),
            ArgsError::InvalidAxisSpec => write!(f, "invalid axis specification"),
        }
    }
}

/// A requested operation could not be satisfied within resource limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ResourceError {
    /// A plane could not be safely strip-decoded with the available memory.
    OutOfMemoryPlane { image_index: u64, plane_index: u64 },
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceError::OutOfMemoryPlane {
                image_index,
                plane_index,
            } => write!(
                f,
                "plane {plane_index} of image {image_index} exceeds available memory"
            ),
        }
    }
}

impl fmt::Display for TiffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TiffError::Format(e) => write!(f, "format error: {e}"),
            TiffError::Io(e) => write!(f, "io error: {e}"),
            TiffError::Args(e) => write!(f, "invalid argument: {e}"),
            TiffError::Resource(e) => write!(f, "resource limit: {e}"),
        }
    }
}

impl std::error::Error for TiffError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TiffError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for IoError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            IoError::UnexpectedEnd
        } else {
            IoError::Other(e)
        }
    }
}

impl From<io::Error> for TiffError {
    fn from(e: io::Error) -> Self {
        TiffError::Io(e.into())
    }
}

impl From<IoError> for TiffError {
    fn from(e: IoError) -> Self {
        TiffError::Io(e)
    }
}

impl From<TiffFormatError> for TiffError {
    fn from(e: TiffFormatError) -> Self {
        TiffError::Format(e)
    }
}

impl From<ArgsError> for TiffError {
    fn from(e: ArgsError) -> Self {
        TiffError::Args(e)
    }
}

impl From<ResourceError> for TiffError {
    fn from(e: ResourceError) -> Self {
        TiffError::Resource(e)
    }
}

impl From<std::num::TryFromIntError> for TiffError {
    fn from(_: std::num::TryFromIntError) -> Self {
        TiffError::Args(ArgsError::IntegerOverflow)
    }
}

/// Result of any decoding/encoding/IO operation in this crate.
pub type TiffResult<T> = Result<T, TiffError>;
