//! Outer join of per-source tables on a shared axis.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::profile::FieldRole;
use crate::series::{Column, ColumnData, ColumnKey, SourceTable};
use crate::{AlignError, Warning};

/// Axis-candidate column used as the join key.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    Distance,
    Timestamp,
    RelTime,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::Distance, Axis::Timestamp, Axis::RelTime];

    pub fn name(self) -> &'static str {
        match self {
            Axis::Distance => "distance",
            Axis::Timestamp => "timestamp",
            Axis::RelTime => "rel_time",
        }
    }

    fn key(self, table: &SourceTable, row: usize) -> Option<f64> {
        let value = match self {
            Axis::Distance => table.axes.distance[row],
            Axis::Timestamp => table.axes.timestamp[row].map(|t| {
                t.timestamp() as f64 + t.timestamp_subsec_millis() as f64 / 1000.0
            }),
            Axis::RelTime => Some(table.axes.rel_time[row] as f64),
        };
        value.filter(|v| v.is_finite())
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Axis {
    type Err = AlignError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Axis::ALL
            .into_iter()
            .find(|a| a.name() == s.trim())
            .ok_or_else(|| AlignError::UnknownAxis(s.to_string()))
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct FrameColumn {
    pub key: ColumnKey,
    pub role: FieldRole,
    pub units: String,
    pub values: Vec<Option<f64>>,
}

/// Numeric frame holding one row per distinct axis value, in ascending axis order.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct CombinedFrame {
    pub axis: Axis,
    pub axis_values: Vec<f64>,
    pub columns: Vec<FrameColumn>,
    pub warnings: Vec<Warning>,
}

impl CombinedFrame {
    pub fn len(&self) -> usize {
        self.axis_values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.axis_values.is_empty()
    }

    pub fn column(&self, source: &str, metric: &str) -> Option<&FrameColumn> {
        self.columns
            .iter()
            .find(|c| c.key.source == source && c.key.metric == metric)
    }

    /// Distinct metric names in column order.
    pub fn metrics(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.columns
            .iter()
            .map(|c| c.key.metric.as_str())
            .filter(|m| seen.insert(*m))
            .collect()
    }
}

#[derive(Default)]
struct Joined {
    keys: Vec<OrderedFloat<f64>>,
    columns: Vec<Column>,
}

impl Joined {
    fn positions(&self) -> BTreeMap<OrderedFloat<f64>, usize> {
        self.keys.iter().enumerate().map(|(i, k)| (*k, i)).collect()
    }
}

/// Key a table on `axis`: rows sorted by key, first row kept per key, null keys dropped.
fn keyed(table: &SourceTable, axis: Axis, warnings: &mut Vec<Warning>) -> Joined {
    let mut first: BTreeMap<OrderedFloat<f64>, usize> = BTreeMap::new();
    let mut duplicates = 0usize;
    for row in 0..table.len() {
        if let Some(key) = axis.key(table, row) {
            if first.contains_key(&OrderedFloat(key)) {
                duplicates += 1;
            } else {
                first.insert(OrderedFloat(key), row);
            }
        }
    }
    if duplicates > 0 {
        warnings.push(Warning::DuplicateAxisValues {
            source: table.source.clone(),
            axis,
            rows: duplicates,
        });
    }
    let rows: Vec<Option<usize>> = first.values().map(|&r| Some(r)).collect();
    Joined {
        keys: first.into_keys().collect(),
        columns: table
            .columns
            .iter()
            .map(|c| Column {
                data: c.data.reindex(&rows),
                ..c.clone()
            })
            .collect(),
    }
}

fn outer_join(left: Joined, right: Joined) -> Joined {
    let keys: Vec<OrderedFloat<f64>> = left
        .keys
        .iter()
        .chain(right.keys.iter())
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let left_pos = left.positions();
    let right_pos = right.positions();
    let left_rows: Vec<Option<usize>> = keys.iter().map(|k| left_pos.get(k).copied()).collect();
    let right_rows: Vec<Option<usize>> = keys.iter().map(|k| right_pos.get(k).copied()).collect();

    let mut columns = Vec::with_capacity(left.columns.len() + right.columns.len());
    for (side, rows) in [(left.columns, &left_rows), (right.columns, &right_rows)] {
        for column in side {
            let data = column.data.reindex(rows);
            columns.push(Column { data, ..column });
        }
    }
    Joined { keys, columns }
}

/// Outer-join every table on `axis` and keep the numeric columns.
///
/// Joining independently recorded sources on wall-clock time is refused unless
/// `force_calendar_join` is set.
pub fn merge_tables(
    axis: Axis,
    tables: &[SourceTable],
    force_calendar_join: bool,
) -> Result<CombinedFrame, AlignError> {
    if axis == Axis::Timestamp && tables.len() > 1 && !force_calendar_join {
        return Err(AlignError::CalendarJoinWithoutOverride {
            sources: tables.len(),
        });
    }

    let mut warnings = Vec::new();
    let joined = tables
        .iter()
        .map(|t| keyed(t, axis, &mut warnings))
        .reduce(outer_join)
        .unwrap_or_default();

    let total = joined.columns.len();
    let columns: Vec<FrameColumn> = joined
        .columns
        .into_iter()
        .filter_map(|c| match c.data {
            ColumnData::Numeric(values) => Some(FrameColumn {
                key: c.key,
                role: c.role,
                units: c.units,
                values,
            }),
            _ => None,
        })
        .collect();
    debug!(
        axis = %axis,
        rows = joined.keys.len(),
        kept = columns.len(),
        dropped = total - columns.len(),
        "merged source tables"
    );

    Ok(CombinedFrame {
        axis,
        axis_values: joined.keys.into_iter().map(|k| k.into_inner()).collect(),
        columns,
        warnings,
    })
}
