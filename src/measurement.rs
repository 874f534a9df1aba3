use std::time::{Duration, SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;
use tracing::warn;

/// A field value in its line-protocol native form.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    Boolean(bool),
    Text(String),
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Boolean(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<Duration> for FieldValue {
    fn from(value: Duration) -> Self {
        FieldValue::Float(value.as_secs_f64())
    }
}

/// One tagged, timestamped data point destined for the backend.
///
/// Tags index the measurement, fields carry the recorded values. A
/// measurement is immutable once handed to the collector; the timestamp is
/// captured at construction in nanoseconds since the Unix epoch, which is
/// the precision the write endpoint expects.
#[derive(Debug, Clone)]
pub struct Measurement {
    name: String,
    tags: IndexMap<String, String>,
    fields: Vec<(String, FieldValue)>,
    timestamp: i64,
}

impl Measurement {
    pub fn new<N>(name: N) -> Self
    where
        N: Into<String>,
    {
        Measurement {
            name: name.into(),
            tags: IndexMap::new(),
            fields: Vec::new(),
            timestamp: unix_nanos(),
        }
    }

    #[must_use]
    pub fn with_tag<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Adds a field. Non-finite float values are refused here so a bad
    /// value can never surface later as an encoding defect; the field is
    /// logged and skipped.
    #[must_use]
    pub fn with_field<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<FieldValue>,
    {
        let key = key.into();
        let value = value.into();
        if let FieldValue::Float(f) = value {
            if !f.is_finite() {
                warn!(field = %key, "skipping non-finite float field");
                return self;
            }
        }
        self.fields.push((key, value));
        self
    }

    /// Overrides the construction-time timestamp, in nanoseconds since the
    /// Unix epoch.
    #[must_use]
    pub fn with_timestamp(mut self, nanos: i64) -> Self {
        self.timestamp = nanos;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> &IndexMap<String, String> {
        &self.tags
    }

    pub fn fields(&self) -> &[(String, FieldValue)] {
        &self.fields
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// A measurement needs a name and at least one field to mean anything.
    pub(crate) fn is_well_formed(&self) -> bool {
        !self.name.is_empty() && !self.fields.is_empty()
    }

    /// Folds the collector's default tags underneath this measurement's own
    /// tags; tags set on the measurement win on key collision.
    pub(crate) fn merge_default_tags(&mut self, defaults: &IndexMap<String, String>) {
        if defaults.is_empty() {
            return;
        }
        let mut merged = defaults.clone();
        for (key, value) in self.tags.drain(..) {
            merged.insert(key, value);
        }
        self.tags = merged;
    }
}

fn unix_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}
