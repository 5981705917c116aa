//! Parse, validate, and transform raw source records
//!
//! The required schema mirrors the source wire shape: `gender`,
//! `name.first`, `name.last`, `location.country`, `dob.age`, `login.uuid` —
//! all present and of the correct primitive type. Anything else is a
//! per-record `ValidationError` and goes to the dead-letter sink.

use super::types::{Gender, UserRecord};
use serde_json::Value;

#[derive(Debug, PartialEq, Eq)]
pub enum ValidationError {
    MissingField(&'static str),
    WrongType(&'static str),
    EmptyField(&'static str),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::MissingField(path) => write!(f, "missing field: {}", path),
            ValidationError::WrongType(path) => write!(f, "wrong type for field: {}", path),
            ValidationError::EmptyField(path) => write!(f, "empty field: {}", path),
        }
    }
}

impl std::error::Error for ValidationError {}

fn require_str<'a>(record: &'a Value, path: &'static str) -> Result<&'a str, ValidationError> {
    let mut cursor = record;
    for key in path.split('.') {
        cursor = cursor
            .get(key)
            .ok_or(ValidationError::MissingField(path))?;
    }
    cursor.as_str().ok_or(ValidationError::WrongType(path))
}

fn require_age(record: &Value) -> Result<u32, ValidationError> {
    let age = record
        .get("dob")
        .and_then(|dob| dob.get("age"))
        .ok_or(ValidationError::MissingField("dob.age"))?;

    // u64 extraction rejects floats, strings, and negative values in one go
    let age = age.as_u64().ok_or(ValidationError::WrongType("dob.age"))?;

    u32::try_from(age).map_err(|_| ValidationError::WrongType("dob.age"))
}

/// Validate one raw source record and transform it into a `UserRecord`.
///
/// `ingestion_time` is supplied by the caller so the worker can keep it
/// monotonic non-decreasing within its partition.
pub fn validate_and_transform(
    record: &Value,
    ingestion_time: i64,
) -> Result<UserRecord, ValidationError> {
    let gender = require_str(record, "gender")?;
    let first_name = require_str(record, "name.first")?;
    let last_name = require_str(record, "name.last")?;
    let country = require_str(record, "location.country")?;
    let age = require_age(record)?;
    let user_id = require_str(record, "login.uuid")?;

    // The raw store invariant: user_id and country are never empty
    if user_id.is_empty() {
        return Err(ValidationError::EmptyField("login.uuid"));
    }
    if country.is_empty() {
        return Err(ValidationError::EmptyField("location.country"));
    }

    Ok(UserRecord {
        user_id: user_id.to_string(),
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
        full_name: format!("{} {}", first_name, last_name),
        gender: Gender::from_source(gender),
        age,
        country: country.to_string(),
        ingestion_time,
    })
}
