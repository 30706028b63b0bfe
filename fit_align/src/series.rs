//! Per-source series building against the frozen field profile.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::profile::{FieldInfo, FieldProfile, FieldRole};
use crate::source::{RecordSource, Scalar};
use crate::units::{meters_to_miles, speed_to_pace, DistanceUnit};
use crate::{AlignError, Params, Warning};

pub const REL_TIME_COLUMN: &str = "rel_time";
pub const PACE_COLUMN: &str = "pace";
pub const SPEED_UNITS: &str = "m/s";

/// Column name namespaced by the source it came from, rendered as `source.metric`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnKey {
    pub source: String,
    pub metric: String,
}

impl ColumnKey {
    pub fn new(source: &str, metric: &str) -> Self {
        Self {
            source: source.to_string(),
            metric: metric.to_string(),
        }
    }
}

impl fmt::Display for ColumnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.source, self.metric)
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub enum ColumnData {
    Numeric(Vec<Option<f64>>),
    Time(Vec<Option<DateTime<Utc>>>),
    Text(Vec<Option<String>>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Numeric(v) => v.len(),
            ColumnData::Time(v) => v.len(),
            ColumnData::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// New column whose row `i` is this column's row `rows[i]`, or null.
    pub(crate) fn reindex(&self, rows: &[Option<usize>]) -> ColumnData {
        fn pick<T: Clone>(values: &[Option<T>], rows: &[Option<usize>]) -> Vec<Option<T>> {
            rows.iter()
                .map(|r| r.and_then(|i| values[i].clone()))
                .collect()
        }
        match self {
            ColumnData::Numeric(v) => ColumnData::Numeric(pick(v, rows)),
            ColumnData::Time(v) => ColumnData::Time(pick(v, rows)),
            ColumnData::Text(v) => ColumnData::Text(pick(v, rows)),
        }
    }

    fn from_scalars(role: FieldRole, values: Vec<Option<Scalar>>) -> ColumnData {
        let any_text = values.iter().any(|v| matches!(v, Some(Scalar::Text(_))));
        let any_time = values.iter().any(|v| matches!(v, Some(Scalar::Time(_))));
        if any_text {
            ColumnData::Text(
                values
                    .into_iter()
                    .map(|v| {
                        v.map(|s| match s {
                            Scalar::Text(t) => t,
                            Scalar::Number(n) => n.to_string(),
                            Scalar::Time(t) => t.to_rfc3339(),
                        })
                    })
                    .collect(),
            )
        } else if role == FieldRole::Timestamp || any_time {
            ColumnData::Time(
                values
                    .into_iter()
                    .map(|v| match v {
                        Some(Scalar::Time(t)) => Some(t),
                        _ => None,
                    })
                    .collect(),
            )
        } else {
            ColumnData::Numeric(values.into_iter().map(|v| v.and_then(|s| s.as_f64())).collect())
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct Column {
    pub key: ColumnKey,
    pub role: FieldRole,
    pub units: String,
    pub data: ColumnData,
}

/// One qualifying record, aligned to the profile's field order.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct SeriesRow {
    pub rel_time: i64,
    pub values: Vec<Option<Scalar>>,
    pub distance: Option<f64>,
    pub pace: Option<f64>,
}

/// Unprefixed join-key copies of the axis-candidate columns.
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct AxisCandidates {
    pub distance: Vec<Option<f64>>,
    pub timestamp: Vec<Option<DateTime<Utc>>>,
    pub rel_time: Vec<i64>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct SourceTable {
    pub source: String,
    pub columns: Vec<Column>,
    pub axes: AxisCandidates,
    pub warnings: Vec<Warning>,
}

impl SourceTable {
    pub fn len(&self) -> usize {
        self.axes.rel_time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn column(&self, metric: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.key.metric == metric)
    }

    pub fn metrics(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.key.metric.as_str())
    }
}

/// Best field of `role` present in a record, enhanced variants first.
fn pick_role<'a>(
    profile: &'a FieldProfile,
    role: FieldRole,
    present: impl Fn(&str) -> bool,
) -> Option<&'a FieldInfo> {
    profile
        .iter()
        .filter(|f| f.role == role && present(&f.name))
        .max_by_key(|f| FieldRole::priority(&f.name))
}

fn time_from_raw(raw: f64) -> Option<DateTime<Utc>> {
    let secs = raw.floor();
    let nanos = ((raw - secs) * 1e9).round().min(999_999_999.0) as u32;
    Utc.timestamp_opt(secs as i64, nanos).single()
}

/// Read one source and produce its rows, in source order.
pub fn build_rows<S: RecordSource + ?Sized>(
    source: &S,
    profile: &FieldProfile,
    params: &Params,
    warnings: &mut Vec<Warning>,
) -> Result<Vec<SeriesRow>, AlignError> {
    let mut rows = Vec::new();
    let mut start: Option<f64> = None;
    let mut missing_ts = 0usize;
    let mut bad_units: BTreeMap<(String, String), usize> = BTreeMap::new();

    for record in source.open()? {
        let record = record?;
        if !record.is_data_sample() {
            continue;
        }
        let fields = record.index();
        let raw_ts = pick_role(profile, FieldRole::Timestamp, |n| fields.contains_key(n))
            .and_then(|f| fields[f.name.as_str()].raw);
        let Some(raw_ts) = raw_ts else {
            missing_ts += 1;
            continue;
        };
        let base = *start.get_or_insert(raw_ts);

        let values: Vec<Option<Scalar>> = profile
            .iter()
            .map(|info| {
                let field = fields.get(info.name.as_str())?;
                match info.role {
                    FieldRole::Timestamp => field.raw.and_then(time_from_raw).map(Scalar::Time),
                    FieldRole::Distance
                        if params.distance_unit == DistanceUnit::Miles && field.units == "m" =>
                    {
                        field
                            .numeric()
                            .map(|m| Scalar::Number(meters_to_miles(m, params.precision)))
                    }
                    _ => field.value.clone().or_else(|| field.raw.map(Scalar::Number)),
                }
            })
            .collect();

        let distance = pick_role(profile, FieldRole::Distance, |n| fields.contains_key(n))
            .and_then(|info| {
                let idx = profile.iter().position(|f| f.name == info.name)?;
                values[idx].as_ref().and_then(Scalar::as_f64)
            });

        let pace = match pick_role(profile, FieldRole::Speed, |n| fields.contains_key(n)) {
            Some(info) => {
                let field = fields[info.name.as_str()];
                if field.units == SPEED_UNITS {
                    speed_to_pace(field.numeric(), params.pace_unit, params.precision)
                } else {
                    *bad_units
                        .entry((info.name.clone(), field.units.clone()))
                        .or_insert(0) += 1;
                    None
                }
            }
            None => None,
        };

        rows.push(SeriesRow {
            rel_time: (raw_ts - base).round() as i64,
            values,
            distance,
            pace,
        });
    }

    if missing_ts > 0 {
        warnings.push(Warning::MissingTimestamp {
            source: source.id().to_string(),
            records: missing_ts,
        });
    }
    for ((field, units), count) in bad_units {
        warnings.push(Warning::UnexpectedSpeedUnit {
            source: source.id().to_string(),
            field,
            units,
            rows: count,
        });
    }
    Ok(rows)
}

/// Build the column table for one source. Every source gets the profile's full column set.
pub fn build_source_table<S: RecordSource + ?Sized>(
    source: &S,
    profile: &FieldProfile,
    params: &Params,
) -> Result<SourceTable, AlignError> {
    let mut warnings = Vec::new();
    let rows = build_rows(source, profile, params, &mut warnings)?;
    let id = source.id();
    debug!(source = id, rows = rows.len(), "built source rows");

    let mut columns = Vec::with_capacity(profile.len() + 2);
    let rel_time: Vec<i64> = rows.iter().map(|r| r.rel_time).collect();
    columns.push(Column {
        key: ColumnKey::new(id, REL_TIME_COLUMN),
        role: FieldRole::RelativeTime,
        units: "s".to_string(),
        data: ColumnData::Numeric(rel_time.iter().map(|&t| Some(t as f64)).collect()),
    });

    let mut timestamp = vec![None; rows.len()];
    for (i, info) in profile.iter().enumerate() {
        let values: Vec<Option<Scalar>> = rows.iter().map(|r| r.values[i].clone()).collect();
        let data = ColumnData::from_scalars(info.role, values);
        if info.role == FieldRole::Timestamp && info.name == "timestamp" {
            if let ColumnData::Time(ts) = &data {
                timestamp = ts.clone();
            }
        }
        let units = if info.role == FieldRole::Distance
            && params.distance_unit == DistanceUnit::Miles
            && info.units == "m"
        {
            DistanceUnit::Miles.label().to_string()
        } else {
            info.units.clone()
        };
        columns.push(Column {
            key: ColumnKey::new(id, &info.name),
            role: info.role,
            units,
            data,
        });
    }

    let pace_metric = if profile.get(PACE_COLUMN).is_some() {
        "pace_derived"
    } else {
        PACE_COLUMN
    };
    columns.push(Column {
        key: ColumnKey::new(id, pace_metric),
        role: FieldRole::Pace,
        units: params.pace_unit.label().to_string(),
        data: ColumnData::Numeric(rows.iter().map(|r| r.pace).collect()),
    });

    Ok(SourceTable {
        source: id.to_string(),
        columns,
        axes: AxisCandidates {
            distance: rows.iter().map(|r| r.distance).collect(),
            timestamp,
            rel_time,
        },
        warnings,
    })
}
