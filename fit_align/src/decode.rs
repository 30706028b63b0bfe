//! FIT and GPX file record sources.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fitparser::profile::MesgNum;
use fitparser::{FitDataField, FitDataRecord, Value as FitValue};

use crate::source::{FieldValue, Record, RecordKind, RecordSource, Records, Scalar};
use crate::AlignError;

/// Open `path` as a record source, choosing the decoder from its extension.
pub fn open_path(path: &Path) -> Result<Box<dyn RecordSource>, AlignError> {
    open_path_with_id(path, path.display().to_string())
}

/// Open every path. A path given more than once gets a `#n` suffix on later copies.
pub fn open_paths(paths: &[PathBuf]) -> Result<Vec<Box<dyn RecordSource>>, AlignError> {
    let ids = unique_ids(paths.iter().map(|p| p.display().to_string()));
    paths
        .iter()
        .zip(ids)
        .map(|(path, id)| open_path_with_id(path, id))
        .collect()
}

fn unique_ids(ids: impl Iterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for id in ids {
        let mut candidate = id.clone();
        let mut n = 1;
        while out.contains(&candidate) {
            n += 1;
            candidate = format!("{}#{}", id, n);
        }
        out.push(candidate);
    }
    out
}

pub fn open_path_with_id(path: &Path, id: String) -> Result<Box<dyn RecordSource>, AlignError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "fit" => Ok(Box::new(FitFileSource::new(path).with_id(id))),
        "gpx" => Ok(Box::new(GpxFileSource::new(path).with_id(id))),
        _ => Err(AlignError::UnsupportedFormat(path.display().to_string())),
    }
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, AlignError> {
    fs::read(path).map_err(|source| AlignError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// FIT recording. Data samples are `record` messages.
#[derive(Clone, Debug)]
pub struct FitFileSource {
    id: String,
    path: PathBuf,
}

impl FitFileSource {
    pub fn new(path: &Path) -> Self {
        Self {
            id: path.display().to_string(),
            path: path.to_path_buf(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

impl RecordSource for FitFileSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn open(&self) -> Result<Records<'_>, AlignError> {
        let bytes = read_bytes(&self.path)?;
        let messages = fitparser::de::from_bytes(&bytes).map_err(|e| AlignError::FitParse {
            path: self.id.clone(),
            message: e.to_string(),
        })?;
        let developer = developer_field_names(&messages);
        Ok(Box::new(messages.into_iter().map(move |message| {
            Ok::<_, AlignError>(convert_message(message, &developer))
        })))
    }
}

/// Names declared by `field_description` messages, i.e. developer fields.
fn developer_field_names(messages: &[FitDataRecord]) -> HashSet<String> {
    messages
        .iter()
        .filter(|m| m.kind() == MesgNum::FieldDescription)
        .flat_map(|m| m.fields().iter())
        .filter(|f| f.name() == "field_name")
        .filter_map(|f| match f.value() {
            FitValue::String(s) => Some(s.clone()),
            _ => None,
        })
        .collect()
}

fn convert_message(message: FitDataRecord, developer: &HashSet<String>) -> Record {
    if message.kind() != MesgNum::Record {
        return Record {
            kind: RecordKind::Other(format!("{:?}", message.kind())),
            fields: Vec::new(),
        };
    }
    Record {
        kind: RecordKind::DataSample,
        fields: message
            .fields()
            .iter()
            .map(|f| (f.name().to_string(), convert_field(f, developer)))
            .collect(),
    }
}

fn convert_field(field: &FitDataField, developer: &HashSet<String>) -> FieldValue {
    let name = field.name();
    let custom = if developer.contains(name) {
        Some(true)
    } else if name.starts_with("unknown_field") {
        None
    } else {
        Some(false)
    };
    let (value, raw) = match field.value() {
        FitValue::Timestamp(ts) => {
            let utc = ts.with_timezone(&Utc);
            let secs = utc.timestamp() as f64 + utc.timestamp_subsec_millis() as f64 / 1000.0;
            (Some(Scalar::Time(utc)), Some(secs))
        }
        FitValue::String(s) => (Some(Scalar::Text(s.clone())), None),
        other => {
            let num = fit_value_to_f64(other);
            (num.map(Scalar::Number), num)
        }
    };
    FieldValue {
        value,
        raw,
        units: field.units().to_string(),
        custom,
        number: Some(field.number() as u32),
    }
}

fn fit_value_to_f64(value: &FitValue) -> Option<f64> {
    match value {
        FitValue::Float32(v) => Some(*v as f64),
        FitValue::Float64(v) => Some(*v),
        FitValue::SInt8(v) => Some(*v as f64),
        FitValue::SInt16(v) => Some(*v as f64),
        FitValue::SInt32(v) => Some(*v as f64),
        FitValue::SInt64(v) => Some(*v as f64),
        FitValue::UInt8(v) => Some(*v as f64),
        FitValue::UInt8z(v) => Some(*v as f64),
        FitValue::UInt16(v) => Some(*v as f64),
        FitValue::UInt16z(v) => Some(*v as f64),
        FitValue::UInt32(v) => Some(*v as f64),
        FitValue::UInt32z(v) => Some(*v as f64),
        FitValue::UInt64(v) => Some(*v as f64),
        FitValue::UInt64z(v) => Some(*v as f64),
        FitValue::Byte(v) => Some(*v as f64),
        FitValue::Array(values) => values.iter().find_map(fit_value_to_f64),
        _ => None,
    }
}

/// GPX track. Every timed track point is a data sample.
#[derive(Clone, Debug)]
pub struct GpxFileSource {
    id: String,
    path: PathBuf,
}

impl GpxFileSource {
    pub fn new(path: &Path) -> Self {
        Self {
            id: path.display().to_string(),
            path: path.to_path_buf(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

impl RecordSource for GpxFileSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn open(&self) -> Result<Records<'_>, AlignError> {
        let bytes = read_bytes(&self.path)?;
        let records = gpx_records(&bytes).map_err(|message| AlignError::GpxParse {
            path: self.id.clone(),
            message,
        })?;
        Ok(Box::new(records.into_iter().map(Ok::<_, AlignError>)))
    }
}

pub(crate) fn gpx_records(input: &[u8]) -> Result<Vec<Record>, String> {
    use std::io::Cursor;

    let mut cursor = Cursor::new(input);
    let gpx = gpx::read(&mut cursor).map_err(|e| e.to_string())?;
    let mut out = Vec::new();
    let mut cumulative_dist = 0.0;
    let mut last: Option<(f64, f64, DateTime<Utc>)> = None;

    for track in gpx.tracks {
        for segment in track.segments {
            for point in segment.points {
                let Some(time) = point.time.clone() else {
                    continue;
                };
                let iso = time.format().map_err(|e| e.to_string())?;
                let utc = DateTime::parse_from_rfc3339(&iso)
                    .map_err(|e| e.to_string())?
                    .with_timezone(&Utc);
                let geo = point.point();
                let (lat, lon) = (geo.y(), geo.x());

                let mut record = Record::sample()
                    .with("timestamp", FieldValue::timestamp(utc))
                    .with("position_lat", FieldValue::number(lat, "deg"))
                    .with("position_long", FieldValue::number(lon, "deg"));
                if let Some(ele) = point.elevation {
                    record = record.with("altitude", FieldValue::number(ele, "m"));
                }
                let mut speed = None;
                if let Some((last_lat, last_lon, last_t)) = last {
                    let step = haversine_distance(last_lat, last_lon, lat, lon);
                    cumulative_dist += step;
                    let dt = (utc - last_t).num_milliseconds() as f64 / 1000.0;
                    if dt > 0.0 {
                        speed = Some(step / dt);
                    }
                }
                record = record.with("distance", FieldValue::number(cumulative_dist, "m"));
                if let Some(v) = speed {
                    record = record.with("speed", FieldValue::number(v, "m/s"));
                }
                last = Some((lat, lon, utc));
                out.push(record);
            }
        }
    }
    Ok(out)
}

fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let r = 6_371_000.0_f64;
    let to_rad = |deg: f64| deg.to_radians();
    let dlat = to_rad(lat2 - lat1);
    let dlon = to_rad(lon2 - lon1);
    let a = (dlat / 2.0).sin().powi(2)
        + to_rad(lat1).cos() * to_rad(lat2).cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    r * c
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRACK: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="fit_align" xmlns="http://www.topografix.com/GPX/1/1">
  <trk>
    <trkseg>
      <trkpt lat="0.0" lon="0.0"><ele>10.0</ele><time>2024-05-01T08:00:00Z</time></trkpt>
      <trkpt lat="0.0" lon="0.001"><ele>11.0</ele><time>2024-05-01T08:00:40Z</time></trkpt>
      <trkpt lat="0.0" lon="0.002"></trkpt>
    </trkseg>
  </trk>
</gpx>"#;

    #[test]
    fn test_haversine_distance() {
        let dist = haversine_distance(0.0, 0.0, 0.0, 1.0);
        assert!((dist - 111_195.0).abs() < 200.0);
    }

    #[test]
    fn gpx_points_become_samples() {
        let records = gpx_records(TRACK.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(Record::is_data_sample));
        assert!(records[0].get("speed").is_none());
        assert_eq!(records[0].get("distance").unwrap().numeric(), Some(0.0));

        let dist = records[1].get("distance").unwrap().numeric().unwrap();
        assert!((dist - 111.2).abs() < 0.5, "{}", dist);
        let speed = records[1].get("speed").unwrap();
        assert_eq!(speed.units, "m/s");
        assert!((speed.numeric().unwrap() - dist / 40.0).abs() < 1e-9);
        assert_eq!(
            records[1].get("timestamp").unwrap().raw.unwrap()
                - records[0].get("timestamp").unwrap().raw.unwrap(),
            40.0
        );
    }

    #[test]
    fn repeated_ids_get_suffixes() {
        let ids = unique_ids(
            ["a.fit", "b.fit", "a.fit", "a.fit"]
                .iter()
                .map(|s| s.to_string()),
        );
        assert_eq!(ids, ["a.fit", "b.fit", "a.fit#2", "a.fit#3"]);
    }

    #[test]
    fn unknown_extension_rejected() {
        let err = open_path(Path::new("ride.tcx")).err().unwrap();
        assert!(matches!(err, AlignError::UnsupportedFormat(_)));
        assert!(open_path(Path::new("ride.FIT")).is_ok());
    }
}
