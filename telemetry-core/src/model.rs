//! Telemetry records as submitted by agents, stored by the record store and
//! fanned out to live viewers.

use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, TelemetryError};

/// Store-assigned identifier, strictly increasing in insertion order.
pub type RecordId = i64;

/// Upper bound for `value` and `arch`.
pub const MAX_FIELD_BYTES: usize = 256;
/// Most metadata pairs one record may carry.
pub const MAX_METADATA_ENTRIES: usize = 64;
/// Upper bound for a metadata key.
pub const MAX_METADATA_KEY_BYTES: usize = 64;
/// Upper bound for a stringified metadata value.
pub const MAX_METADATA_VALUE_BYTES: usize = 1024;

/// Names owned by the record itself; metadata may not shadow them.
pub const RESERVED_KEYS: [&str; 4] = ["id", "value", "arch", "captured_at"];

/// A persisted telemetry record. Never mutated after the store assigns its id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// Assigned by the store.
    pub id: RecordId,
    /// The reported measurement, e.g. `temp=42`.
    pub value: String,
    /// Architecture of the reporting agent.
    pub arch: String,
    /// When the agent took the reading, or when the server received it.
    pub captured_at: DateTime<Utc>,
    /// Extra scalar attributes, stringified.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// A validated record that has not been written yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTelemetryRecord {
    /// Trimmed measurement.
    pub value: String,
    /// Trimmed architecture.
    pub arch: String,
    /// Capture time, defaulted to the receive time.
    pub captured_at: DateTime<Utc>,
    /// Validated, stringified metadata.
    pub metadata: BTreeMap<String, String>,
}

impl NewTelemetryRecord {
    /// Attach the id the store assigned.
    pub fn into_record(self, id: RecordId) -> TelemetryRecord {
        TelemetryRecord {
            id,
            value: self.value,
            arch: self.arch,
            captured_at: self.captured_at,
            metadata: self.metadata,
        }
    }
}

/// Raw agent payload.
///
/// Unknown top-level scalar fields are folded into the metadata map so that
/// agents can report flat JSON objects.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelemetrySubmission {
    /// Required, 1..=256 bytes after trimming.
    #[serde(default)]
    pub value: Option<String>,
    /// Required, 1..=256 bytes after trimming.
    #[serde(default)]
    pub arch: Option<String>,
    /// Defaults to the receive time.
    #[serde(default)]
    pub captured_at: Option<DateTime<Utc>>,
    /// Explicit `metadata` object.
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    /// Any other top-level field.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl TelemetrySubmission {
    /// Parse an arbitrary JSON body, reporting shape errors as validation
    /// failures rather than transport errors.
    pub fn from_json(body: Value) -> Result<Self> {
        if !body.is_object() {
            return Err(TelemetryError::ValidationFailed(
                "submission must be a JSON object".into(),
            ));
        }
        serde_json::from_value(body)
            .map_err(|err| TelemetryError::ValidationFailed(err.to_string()))
    }

    /// Validate against the current time.
    pub fn validate(self) -> Result<NewTelemetryRecord> {
        self.validate_at(Utc::now())
    }

    /// Check required fields and bounds, and flatten metadata to strings.
    /// A missing `captured_at` becomes `received_at`.
    pub fn validate_at(self, received_at: DateTime<Utc>) -> Result<NewTelemetryRecord> {
        let value = required_field("value", self.value)?;
        let arch = required_field("arch", self.arch)?;

        let mut metadata = BTreeMap::new();
        for (key, raw) in self.metadata.into_iter().chain(self.extra) {
            validate_metadata_key(&key)?;
            let text = scalar_to_string(&key, raw)?;
            if text.len() > MAX_METADATA_VALUE_BYTES {
                return Err(TelemetryError::ValidationFailed(format!(
                    "metadata `{key}` exceeds {MAX_METADATA_VALUE_BYTES} bytes"
                )));
            }
            if metadata.insert(key.clone(), text).is_some() {
                return Err(TelemetryError::ValidationFailed(format!(
                    "metadata `{key}` supplied more than once"
                )));
            }
        }

        if metadata.len() > MAX_METADATA_ENTRIES {
            return Err(TelemetryError::ValidationFailed(format!(
                "at most {MAX_METADATA_ENTRIES} metadata entries are allowed"
            )));
        }

        Ok(NewTelemetryRecord {
            value,
            arch,
            captured_at: self.captured_at.unwrap_or(received_at),
            metadata,
        })
    }
}

fn required_field(name: &str, raw: Option<String>) -> Result<String> {
    let raw = raw.ok_or_else(|| {
        TelemetryError::ValidationFailed(format!("`{name}` is required"))
    })?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(TelemetryError::ValidationFailed(format!(
            "`{name}` must not be empty"
        )));
    }
    if trimmed.len() > MAX_FIELD_BYTES {
        return Err(TelemetryError::ValidationFailed(format!(
            "`{name}` exceeds {MAX_FIELD_BYTES} bytes"
        )));
    }
    Ok(trimmed.to_string())
}

/// Metadata keys: 1..=64 bytes of `[A-Za-z0-9_.-]`.
pub fn is_valid_metadata_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= MAX_METADATA_KEY_BYTES
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
}

fn validate_metadata_key(key: &str) -> Result<()> {
    if RESERVED_KEYS.contains(&key) {
        return Err(TelemetryError::ValidationFailed(format!(
            "metadata key `{key}` is reserved"
        )));
    }
    if !is_valid_metadata_key(key) {
        return Err(TelemetryError::ValidationFailed(format!(
            "metadata key `{key}` is not a valid identifier"
        )));
    }
    Ok(())
}

fn scalar_to_string(key: &str, raw: Value) -> Result<String> {
    match raw {
        Value::String(text) => Ok(text),
        Value::Number(number) => Ok(number.to_string()),
        Value::Bool(flag) => Ok(flag.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => {
            Err(TelemetryError::ValidationFailed(format!(
                "metadata `{key}` must be a string, number or boolean"
            )))
        }
    }
}

/// A record as seen by live viewers. The sequence number is assigned by the
/// hub for diagnostic ordering and is never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct BroadcastEvent {
    /// Hub-wide, strictly increasing.
    pub sequence: u64,
    /// When the hub fanned the record out.
    pub published_at: DateTime<Utc>,
    /// Shared with every other viewer of the same event.
    pub record: Arc<TelemetryRecord>,
}
