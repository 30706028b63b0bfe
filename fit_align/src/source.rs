//! Decoded record model and the [`RecordSource`] abstraction.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::AlignError;

/// Message kind of a decoded record. Only [`RecordKind::DataSample`] records qualify.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum RecordKind {
    DataSample,
    Other(String),
}

/// Human-scaled value of a field.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum Scalar {
    Number(f64),
    Time(DateTime<Utc>),
    Text(String),
}

impl Scalar {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Number(v) => Some(*v),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FieldValue {
    pub value: Option<Scalar>,
    /// Unscaled numeric value as stored by the device. Timestamps carry unix seconds here.
    pub raw: Option<f64>,
    pub units: String,
    /// `None` when the decoder cannot tell whether the field is native or developer-defined.
    pub custom: Option<bool>,
    pub number: Option<u32>,
}

impl FieldValue {
    pub fn number(value: f64, units: &str) -> Self {
        Self {
            value: Some(Scalar::Number(value)),
            raw: Some(value),
            units: units.to_string(),
            custom: Some(false),
            number: None,
        }
    }

    pub fn timestamp(ts: DateTime<Utc>) -> Self {
        Self {
            value: Some(Scalar::Time(ts)),
            raw: Some(ts.timestamp() as f64 + ts.timestamp_subsec_millis() as f64 / 1000.0),
            units: "s".to_string(),
            custom: Some(false),
            number: None,
        }
    }

    pub fn text(value: &str) -> Self {
        Self {
            value: Some(Scalar::Text(value.to_string())),
            raw: None,
            units: String::new(),
            custom: Some(false),
            number: None,
        }
    }

    pub fn with_number(mut self, number: u32) -> Self {
        self.number = Some(number);
        self
    }

    pub fn with_custom(mut self, custom: Option<bool>) -> Self {
        self.custom = custom;
        self
    }

    /// Human-scaled numeric value, falling back to the raw value.
    pub fn numeric(&self) -> Option<f64> {
        match &self.value {
            Some(Scalar::Number(v)) => Some(*v),
            Some(_) => None,
            None => self.raw,
        }
    }
}

/// One sampled instant. Field order follows the decoder's order.
///
/// A name may repeat when the decoder expands a component into a field the message
/// already carries; lookups always resolve to the first occurrence.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub kind: RecordKind,
    pub fields: Vec<(String, FieldValue)>,
}

impl Record {
    pub fn sample() -> Self {
        Self {
            kind: RecordKind::DataSample,
            fields: Vec::new(),
        }
    }

    pub fn with(mut self, name: &str, value: FieldValue) -> Self {
        self.fields.push((name.to_string(), value));
        self
    }

    pub fn is_data_sample(&self) -> bool {
        self.kind == RecordKind::DataSample
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Field lookup table for records with many fields. Agrees with [`Record::get`].
    pub fn index(&self) -> BTreeMap<&str, &FieldValue> {
        let mut map = BTreeMap::new();
        for (n, v) in &self.fields {
            map.entry(n.as_str()).or_insert(v);
        }
        map
    }
}

pub type Records<'a> = Box<dyn Iterator<Item = Result<Record, AlignError>> + 'a>;

/// A finite, restartable sequence of records read from one recording.
///
/// Every call to [`RecordSource::open`] starts a fresh pass. Whatever the pass holds is
/// released when the returned iterator is dropped.
pub trait RecordSource {
    /// Identifier used to namespace this source's columns.
    fn id(&self) -> &str;

    fn open(&self) -> Result<Records<'_>, AlignError>;
}

/// Source backed by records already held in memory.
#[derive(Clone, Debug, Default)]
pub struct MemorySource {
    id: String,
    records: Vec<Record>,
}

impl MemorySource {
    pub fn new(id: impl Into<String>, records: Vec<Record>) -> Self {
        Self {
            id: id.into(),
            records,
        }
    }
}

impl RecordSource for MemorySource {
    fn id(&self) -> &str {
        &self.id
    }

    fn open(&self) -> Result<Records<'_>, AlignError> {
        Ok(Box::new(self.records.iter().cloned().map(Ok::<_, AlignError>)))
    }
}

impl<S: RecordSource + ?Sized> RecordSource for Box<S> {
    fn id(&self) -> &str {
        (**self).id()
    }

    fn open(&self) -> Result<Records<'_>, AlignError> {
        (**self).open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_name_resolves_to_first() {
        let record = Record::sample()
            .with("enhanced_speed", FieldValue::number(3.0, "m/s"))
            .with("enhanced_speed", FieldValue::number(3.5, "m/s"));
        assert_eq!(record.get("enhanced_speed").unwrap().numeric(), Some(3.0));
        let index = record.index();
        assert_eq!(index.len(), 1);
        assert_eq!(index["enhanced_speed"].numeric(), Some(3.0));
    }
}
