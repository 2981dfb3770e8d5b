//! A scientific-image I/O engine: random-access byte streams, TIFF/BigTIFF
//! parsing and writing, and a plane-axis separation and caching filter.
//!
//! TIFF (Tagged Image File Format) is a versatile container for
//! multi-dimensional scientific imagery; this crate reads and writes it
//! (including the BigTIFF and ImageJ/MetaMorph dialects) behind a uniform
//! [`Reader`]/[`writer::TiffWriter`] surface that backs sources as varied as
//! in-memory buffers, local files, HTTP URLs and gzip/bzip2/zip archives.
//!
//! # Related Links
//! * <https://web.archive.org/web/20210108073850/https://www.adobe.io/open/standards/TIFF.html> - The TIFF specification
//! * <https://www.awaresystems.be/imaging/tiff/bigtiff.html> - BigTIFF

pub mod codec;
pub mod comments;
pub mod config;
pub mod error;
pub mod ifd;
pub mod location;
pub mod metadata;
pub mod parser;
pub mod plane_separator;
pub mod predictor;
pub mod reader;
pub mod source;
pub mod stream;
pub mod tags;
pub mod util;
pub mod writer;

pub mod encoder {
    //! The registered compression-codec interface consumed by [`crate::writer`]
    //! (§1 "appear only as a registered codec interface", §4.6).
    pub mod compression;
}

pub use config::Config;
pub use error::{ArgsError, IoError, ResourceError, TiffError, TiffFormatError, TiffResult};
pub use location::{Location, LocationRegistry};
pub use metadata::{Axis, AxisType, ImageMetadata, PixelType, Plane};
pub use reader::Reader;
pub use writer::{TiffWriter, WriterConfig};
