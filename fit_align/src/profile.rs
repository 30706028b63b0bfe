//! Field discovery across every record source.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::source::RecordSource;
use crate::units::round_to;
use crate::AlignError;

/// Semantic role of a field. Pipeline branching goes through this instead of field names.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FieldRole {
    Timestamp,
    /// Seconds since the first qualifying record of a source.
    RelativeTime,
    Distance,
    Speed,
    Measurement,
    /// Derived time-per-distance column.
    Pace,
}

impl FieldRole {
    pub fn from_name(name: &str) -> Self {
        match name {
            "timestamp" => FieldRole::Timestamp,
            "distance" | "enhanced_distance" => FieldRole::Distance,
            "speed" | "enhanced_speed" => FieldRole::Speed,
            _ => FieldRole::Measurement,
        }
    }

    /// Rate-like metrics are charted on an inverted scale.
    pub fn is_rate_like(self) -> bool {
        matches!(self, FieldRole::Pace)
    }

    /// Preference among fields sharing a role; enhanced variants win.
    pub(crate) fn priority(name: &str) -> u8 {
        if name.starts_with("enhanced_") {
            2
        } else {
            1
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FieldInfo {
    pub name: String,
    pub units: String,
    pub custom: bool,
    pub number: Option<u32>,
    pub role: FieldRole,
    pub count: usize,
    pub percentage: f64,
}

/// Frozen schema shared by every per-source build. Iteration order is first-seen order.
#[derive(Clone, Debug, Default, Serialize)]
pub struct FieldProfile {
    fields: Vec<FieldInfo>,
    #[serde(skip)]
    index: HashMap<String, usize>,
    total_records: usize,
}

impl FieldProfile {
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldInfo> {
        self.fields.iter()
    }

    pub fn get(&self, name: &str) -> Option<&FieldInfo> {
        self.index.get(name).map(|&i| &self.fields[i])
    }

    /// Qualifying records seen across all sources.
    pub fn total_records(&self) -> usize {
        self.total_records
    }

    fn observe(&mut self, name: &str, info: impl FnOnce() -> FieldInfo) {
        match self.index.get(name) {
            Some(&i) => self.fields[i].count += 1,
            None => {
                self.index.insert(name.to_string(), self.fields.len());
                self.fields.push(info());
            }
        }
    }
}

/// Scan every qualifying record of every source and build the field profile.
pub fn discover_fields<S: RecordSource>(
    sources: &[S],
    precision: u32,
) -> Result<FieldProfile, AlignError> {
    let mut profile = FieldProfile::default();
    for source in sources {
        let mut seen = 0usize;
        for record in source.open()? {
            let record = record?;
            if !record.is_data_sample() {
                continue;
            }
            seen += 1;
            let mut in_record: HashSet<&str> = HashSet::new();
            for (name, field) in &record.fields {
                if !in_record.insert(name.as_str()) {
                    continue;
                }
                profile.observe(name, || {
                    let role = FieldRole::from_name(name);
                    FieldInfo {
                        name: name.clone(),
                        units: if role == FieldRole::Timestamp {
                            "s".to_string()
                        } else {
                            field.units.clone()
                        },
                        custom: field.custom.unwrap_or(true),
                        number: field.number,
                        role,
                        count: 1,
                        percentage: 0.0,
                    }
                });
            }
        }
        debug!(source = source.id(), records = seen, "field discovery pass");
        profile.total_records += seen;
    }

    let total = profile.total_records;
    for field in &mut profile.fields {
        field.percentage = coverage(field.count, total, precision);
    }
    Ok(profile)
}

/// Rounded share of `total` records, `100` only when the field is in all of them.
fn coverage(count: usize, total: usize, precision: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let pct = round_to(count as f64 / total as f64 * 100.0, precision);
    if count < total {
        let ceiling = round_to(100.0 - 10f64.powi(-(precision as i32)), precision);
        pct.min(ceiling)
    } else {
        pct
    }
}

/// Float as Python prints it: integral values keep a trailing `.0`.
fn py_float(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{:.1}", v)
    } else {
        v.to_string()
    }
}

/// Text listing of the profile, one line per field.
pub fn render_report(profile: &FieldProfile, verbose: bool) -> Vec<String> {
    profile
        .iter()
        .enumerate()
        .map(|(i, f)| {
            if verbose {
                let id = f
                    .number
                    .map_or_else(|| "None".to_string(), |n| format!("{:#x}", n));
                format!(
                    "Field #{} (ID: {}). '{}' ({}) - appears in {}% of the data [is_custom? {}]",
                    i,
                    id,
                    f.name,
                    f.units,
                    py_float(f.percentage),
                    if f.custom { "True" } else { "False" }
                )
            } else {
                format!(
                    "Field #{}. '{}' ({}) - appears in {}% of the data",
                    i,
                    f.name,
                    f.units,
                    py_float(f.percentage)
                )
            }
        })
        .collect()
}
