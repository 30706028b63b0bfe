//! Field discovery and multi-source time-series alignment for workout recordings.
//!
//! The pipeline runs in two phases. [`profile::discover_fields`] scans every source
//! once to build a frozen [`FieldProfile`]. [`series::build_source_table`] then turns
//! each source into a table with that exact column set. Tables are outer-joined on a
//! shared axis by [`merge::merge_tables`], and [`axes::assign_axes`] lays selected
//! metrics out on chart axes. [`Session`] holds the built tables so axis and metric
//! changes never re-read the sources.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub mod axes;
pub mod decode;
pub mod figure;
pub mod merge;
pub mod profile;
pub mod series;
pub mod source;
pub mod units;

pub use axes::{assign_axes, AxisPlan, AxisSpec, Side, Trace, MAX_CONCURRENT_AXES};
pub use merge::{merge_tables, Axis, CombinedFrame, FrameColumn};
pub use profile::{discover_fields, render_report, FieldInfo, FieldProfile, FieldRole};
pub use series::{build_source_table, ColumnData, ColumnKey, SourceTable};
pub use source::{FieldValue, MemorySource, Record, RecordKind, RecordSource, Scalar};
pub use units::{DistanceUnit, PaceUnit};

#[derive(Error, Debug)]
pub enum AlignError {
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse FIT file {path}: {message}")]
    FitParse { path: String, message: String },
    #[error("failed to parse GPX file {path}: {message}")]
    GpxParse { path: String, message: String },
    #[error("unknown axis '{0}' (expected one of: distance, timestamp, rel_time)")]
    UnknownAxis(String),
    #[error(
        "refusing to align {sources} recordings on wall-clock timestamps; \
         independently recorded sources rarely overlap in time (use the force option to override)"
    )]
    CalendarJoinWithoutOverride { sources: usize },
}

/// Recoverable condition reported alongside a result.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub enum Warning {
    UnexpectedSpeedUnit {
        source: String,
        field: String,
        units: String,
        rows: usize,
    },
    MissingTimestamp {
        source: String,
        records: usize,
    },
    DuplicateAxisValues {
        source: String,
        axis: Axis,
        rows: usize,
    },
    AxisCapExceeded {
        selected: Vec<String>,
        kept: Vec<String>,
    },
    UnknownMetric {
        metric: String,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::UnexpectedSpeedUnit {
                source,
                field,
                units,
                rows,
            } => write!(
                f,
                "{}: '{}' reported in '{}' instead of '{}'; pace left empty for {} rows",
                source,
                field,
                units,
                series::SPEED_UNITS,
                rows
            ),
            Warning::MissingTimestamp { source, records } => {
                write!(f, "{}: skipped {} samples without a timestamp", source, records)
            }
            Warning::DuplicateAxisValues { source, axis, rows } => write!(
                f,
                "{}: {} rows repeat an earlier {} value and were collapsed",
                source, rows, axis
            ),
            Warning::AxisCapExceeded { selected, kept } => write!(
                f,
                "at most {} metrics can be charted at once; selected [{}], keeping [{}]",
                MAX_CONCURRENT_AXES,
                selected.join(", "),
                kept.join(", ")
            ),
            Warning::UnknownMetric { metric } => {
                write!(f, "metric '{}' is not present in any source", metric)
            }
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Params {
    /// Decimal places kept by rounded conversions and percentages.
    pub precision: u32,
    pub pace_unit: PaceUnit,
    pub distance_unit: DistanceUnit,
    pub axis_offset_px: u32,
    pub force_calendar_join: bool,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            precision: 2,
            pace_unit: PaceUnit::PerKm,
            distance_unit: DistanceUnit::Meters,
            axis_offset_px: 60,
            force_calendar_join: false,
        }
    }
}

/// Profile and per-source tables built once for a fixed list of sources.
#[derive(Clone, Debug)]
pub struct Session {
    params: Params,
    profile: FieldProfile,
    tables: Vec<SourceTable>,
}

impl Session {
    pub fn build<S: RecordSource>(sources: &[S], params: Params) -> Result<Self, AlignError> {
        let profile = discover_fields(sources, params.precision)?;
        let tables = sources
            .iter()
            .map(|s| build_source_table(s, &profile, &params))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(
            sources = tables.len(),
            fields = profile.len(),
            records = profile.total_records(),
            "session built"
        );
        Ok(Self {
            params,
            profile,
            tables,
        })
    }

    /// Open FIT/GPX files, see [`decode::open_paths`].
    pub fn open_paths(paths: &[PathBuf], params: Params) -> Result<Self, AlignError> {
        let sources = decode::open_paths(paths)?;
        Self::build(&sources, params)
    }

    pub fn profile(&self) -> &FieldProfile {
        &self.profile
    }

    pub fn tables(&self) -> &[SourceTable] {
        &self.tables
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Warning> {
        self.tables.iter().flat_map(|t| t.warnings.iter())
    }

    pub fn combine(&self, axis: Axis) -> Result<CombinedFrame, AlignError> {
        merge_tables(axis, &self.tables, self.params.force_calendar_join)
    }

    pub fn plan(&self, frame: &CombinedFrame, metrics: &[String]) -> AxisPlan {
        assign_axes(frame, metrics, self.params.axis_offset_px)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_from_partial_json() {
        let params: Params =
            serde_json::from_str(r#"{ "precision": 1, "pace_unit": "per_mile" }"#).unwrap();
        assert_eq!(params.precision, 1);
        assert_eq!(params.pace_unit, PaceUnit::PerMile);
        assert_eq!(params.axis_offset_px, 60);
        assert!(!params.force_calendar_join);
    }

    #[test]
    fn calendar_error_message_mentions_override() {
        let msg = AlignError::CalendarJoinWithoutOverride { sources: 2 }.to_string();
        assert!(msg.contains("2 recordings"));
        assert!(msg.contains("force"));
    }
}
