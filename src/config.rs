//! The typed configuration surface (§6, §9 "Config objects").
//!
//! The source project's `SCIFIOConfig` is a free-form string-keyed bag;
//! here it is a plain struct with exactly the fields §6 enumerates. There is
//! no way to name an unknown option, which satisfies §9's "reject unknown
//! keys at construction" in the strongest way Rust can: the question simply
//! doesn't parse.

use crate::metadata::AxisType;

/// How thoroughly a [`crate::reader::Reader`] parses metadata on open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParserLevel {
    /// Only the tags needed to determine plane geometry and dispatch.
    Minimum,
    /// Everything [`ParserLevel::Minimum`] reads, minus thumbnail/overlay IFDs.
    NoOverlays,
    /// The full IFD chain and comment interpretation (§4.5).
    #[default]
    All,
}

/// One entry in the filter pipeline a [`Config`] asks the reader to build,
/// in apply order (§9 "filter-priority ordering ... becomes an explicit
/// build-order on the pipeline builder").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterSpec {
    /// Virtually split the named axes out of the planar prefix (§4.7).
    PlaneSeparator(Vec<AxisType>),
}

/// Per-open-call options controlling which image and sub-region a reader
/// is positioned at.
#[derive(Debug, Clone, Default)]
pub struct ImageOpenerConfig {
    pub image_index: usize,
    /// Planar-axis sub-region, or `None` for the full plane.
    pub sub_region: Option<(Vec<u64>, Vec<u64>)>,
}

/// The typed configuration record passed to [`crate::reader::Reader::open`]
/// (§6).
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub group_files: bool,
    pub parser_level: ParserLevel,
    pub filters: Vec<FilterSpec>,
    pub image_opener: ImageOpenerConfig,
}

impl Config {
    pub fn new() -> Self {
        Config::default()
    }

    pub fn with_plane_separator(mut self, axes: Vec<AxisType>) -> Self {
        self.filters.push(FilterSpec::PlaneSeparator(axes));
        self
    }
}
