use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field every placement record must carry; records are grouped by it.
pub const LOCATION_FIELD: &str = "location";

// ---------------------------------------------------------------------------
// Core domain types
// ---------------------------------------------------------------------------

/// One advertising slot. Only `location` is interpreted; every other field is
/// opaque payload kept verbatim and in its original key order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct PlacementRecord {
    location: String,
    fields: Map<String, Value>,
}

impl PlacementRecord {
    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }
}

impl TryFrom<Map<String, Value>> for PlacementRecord {
    type Error = ValidationError;

    fn try_from(fields: Map<String, Value>) -> Result<Self, Self::Error> {
        match validated_location(&fields) {
            Some(location) => Ok(Self { location, fields }),
            None => Err(ValidationError::InvalidRecord),
        }
    }
}

impl From<PlacementRecord> for Map<String, Value> {
    fn from(record: PlacementRecord) -> Self {
        record.fields
    }
}

impl From<PlacementRecord> for Value {
    fn from(record: PlacementRecord) -> Self {
        Value::Object(record.fields)
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("malformed input: expected a JSON array of placement records")]
    MalformedInput,
    #[error("malformed element at index {index}: expected a JSON object")]
    MalformedElement { index: usize },
    #[error(
        "invalid element at index {index}: \"location\" must be present and a non-empty string"
    )]
    MissingOrInvalidLocation { index: usize },
    /// A single record outside of an upload payload, so there is no index.
    #[error("invalid placement record: \"location\" must be present and a non-empty string")]
    InvalidRecord,
}

impl ValidationError {
    /// Position of the offending element, if the failure is per-element.
    pub fn index(&self) -> Option<usize> {
        match self {
            Self::MalformedInput | Self::InvalidRecord => None,
            Self::MalformedElement { index } | Self::MissingOrInvalidLocation { index } => {
                Some(*index)
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedInput => "malformed_input",
            Self::MalformedElement { .. } => "malformed_element",
            Self::MissingOrInvalidLocation { .. } => "missing_or_invalid_location",
            Self::InvalidRecord => "invalid_record",
        }
    }
}

/// Checks a decoded upload payload and converts it into placement records.
///
/// The whole payload is checked before anything is returned, so callers can
/// treat a failure as "nothing happened". The error names the first offending
/// element.
pub fn validate_placements(payload: Value) -> Result<Vec<PlacementRecord>, ValidationError> {
    let Value::Array(items) = payload else {
        return Err(ValidationError::MalformedInput);
    };

    let mut records = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let Value::Object(fields) = item else {
            return Err(ValidationError::MalformedElement { index });
        };
        records.push(validate_placement_fields(fields, index)?);
    }
    Ok(records)
}

fn validate_placement_fields(
    fields: Map<String, Value>,
    index: usize,
) -> Result<PlacementRecord, ValidationError> {
    match validated_location(&fields) {
        Some(location) => Ok(PlacementRecord { location, fields }),
        None => Err(ValidationError::MissingOrInvalidLocation { index }),
    }
}

fn validated_location(fields: &Map<String, Value>) -> Option<String> {
    match fields.get(LOCATION_FIELD) {
        Some(Value::String(location)) if !location.is_empty() => Some(location.clone()),
        _ => None,
    }
}
