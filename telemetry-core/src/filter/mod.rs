//! Exact-match filtering over telemetry records.
//!
//! Callers hand in raw `(attribute, value)` pairs, typically straight from a
//! query string. Every attribute name is resolved against an
//! [`AttributeWhitelist`] before anything else happens, so only known
//! attributes ever reach a predicate. Values are compared verbatim in memory
//! and bound as parameters when the predicate is pushed down to PostgreSQL;
//! no query text is ever assembled from caller-supplied strings.

/// PostgreSQL pushdown of [`FilterCriteria`].
#[cfg(feature = "database")]
pub mod sql;

use std::collections::{BTreeMap, BTreeSet};

use futures::stream::BoxStream;

use crate::{
    error::{Result, TelemetryError},
    model::{RESERVED_KEYS, TelemetryRecord, is_valid_metadata_key},
    store::RecordStore,
};

/// A filterable record attribute.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Attribute {
    /// The record's `value` column.
    Value,
    /// The record's `arch` column.
    Arch,
    /// A whitelisted metadata key.
    Metadata(String),
}

impl Attribute {
    /// The name callers use for this attribute.
    pub fn name(&self) -> &str {
        match self {
            Attribute::Value => "value",
            Attribute::Arch => "arch",
            Attribute::Metadata(key) => key,
        }
    }

    fn read<'r>(&self, record: &'r TelemetryRecord) -> Option<&'r str> {
        match self {
            Attribute::Value => Some(record.value.as_str()),
            Attribute::Arch => Some(record.arch.as_str()),
            Attribute::Metadata(key) => record.metadata.get(key).map(String::as_str),
        }
    }
}

/// The set of attribute names a caller may filter on: `value`, `arch`, and
/// any metadata keys explicitly enabled by configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeWhitelist {
    metadata_keys: BTreeSet<String>,
}

impl AttributeWhitelist {
    /// Only the built-in `value` and `arch` attributes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Also allow the given metadata keys. Reserved or malformed keys are
    /// rejected with [`TelemetryError::UnrecognizedAttribute`].
    pub fn with_metadata_keys<I, S>(keys: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut metadata_keys = BTreeSet::new();
        for key in keys {
            let key = key.into();
            if RESERVED_KEYS.contains(&key.as_str()) || !is_valid_metadata_key(&key) {
                return Err(TelemetryError::UnrecognizedAttribute(key));
            }
            metadata_keys.insert(key);
        }
        Ok(Self { metadata_keys })
    }

    /// Map a caller-supplied name onto a known attribute.
    pub fn resolve(&self, name: &str) -> Result<Attribute> {
        match name {
            "value" => Ok(Attribute::Value),
            "arch" => Ok(Attribute::Arch),
            other if self.metadata_keys.contains(other) => {
                Ok(Attribute::Metadata(other.to_string()))
            }
            other => Err(TelemetryError::UnrecognizedAttribute(other.to_string())),
        }
    }

    /// Every accepted name, built-ins first.
    pub fn names(&self) -> Vec<String> {
        ["value", "arch"]
            .into_iter()
            .map(str::to_string)
            .chain(self.metadata_keys.iter().cloned())
            .collect()
    }
}

/// Exact-match constraints keyed by attribute. Empty criteria match every
/// record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterCriteria {
    constraints: BTreeMap<Attribute, String>,
}

impl FilterCriteria {
    /// Criteria that accept every record.
    pub fn match_all() -> Self {
        Self::default()
    }

    /// No constraints, so every record matches.
    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Number of constrained attributes.
    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    /// The required value for `attribute`, if constrained.
    pub fn get(&self, attribute: &Attribute) -> Option<&str> {
        self.constraints.get(attribute).map(String::as_str)
    }

    /// Constraints in attribute order.
    pub fn iter(&self) -> impl Iterator<Item = (&Attribute, &str)> {
        self.constraints
            .iter()
            .map(|(attribute, value)| (attribute, value.as_str()))
    }

    /// True iff every constrained attribute equals the record's value
    /// exactly. A record lacking a constrained metadata key never matches.
    pub fn matches(&self, record: &TelemetryRecord) -> bool {
        self.constraints
            .iter()
            .all(|(attribute, expected)| attribute.read(record) == Some(expected.as_str()))
    }
}

/// Build criteria from raw name/value pairs.
///
/// Unknown names fail with [`TelemetryError::UnrecognizedAttribute`] whatever
/// their content. Empty values mean "no constraint". Repeating a pair is
/// harmless, but two different values for one attribute fail with
/// [`TelemetryError::ConflictingCriterion`].
pub fn build_criteria<I, K, V>(whitelist: &AttributeWhitelist, pairs: I) -> Result<FilterCriteria>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<String>,
{
    let mut constraints = BTreeMap::new();
    for (name, value) in pairs {
        let attribute = whitelist.resolve(name.as_ref())?;
        let value = value.into();
        if value.is_empty() {
            continue;
        }
        match constraints.get(&attribute) {
            Some(existing) if existing != &value => {
                return Err(TelemetryError::ConflictingCriterion(
                    attribute.name().to_string(),
                ));
            }
            Some(_) => {}
            None => {
                constraints.insert(attribute, value);
            }
        }
    }
    Ok(FilterCriteria { constraints })
}

/// Lazily read the matching records from `store`, in insertion order.
pub fn apply<'a>(
    store: &'a dyn RecordStore,
    criteria: FilterCriteria,
) -> BoxStream<'a, Result<TelemetryRecord>> {
    store.scan(criteria)
}

/// Apply criteria to records that are already in memory.
pub fn apply_in_memory<'a, I>(
    records: I,
    criteria: &'a FilterCriteria,
) -> impl Iterator<Item = I::Item> + 'a
where
    I: IntoIterator + 'a,
    I::IntoIter: 'a,
    I::Item: AsRef<TelemetryRecord>,
{
    records
        .into_iter()
        .filter(move |record| criteria.matches(record.as_ref()))
}

impl AsRef<TelemetryRecord> for TelemetryRecord {
    fn as_ref(&self) -> &TelemetryRecord {
        self
    }
}
