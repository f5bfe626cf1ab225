//! Request field checks. Callers run them in a fixed order (presence, identifier format,
//! numeric range, text) so the first failing stage decides the reported error.

use derive_more::{Display, Error};
use uuid::Uuid;

pub(crate) const MAX_NAME_LEN: usize = 100;

const UUID_LEN: usize = 36;
const UUID_HYPHENS: [usize; 4] = [8, 13, 18, 23];

#[derive(Debug, Clone, PartialEq, Display, Error)]
pub(crate) enum ValidationError {
    #[display("{field} is required")]
    MissingField { field: &'static str },
    #[display("{field} is not a valid identifier")]
    InvalidIdentifier { field: &'static str },
    #[display("{field} must be between {min} and {max}")]
    OutOfRange { field: &'static str, min: f64, max: f64 },
    #[display("{field} must be a multiple of {step}")]
    Granularity { field: &'static str, step: f64 },
    #[display("{field} {reason}")]
    InvalidText { field: &'static str, reason: &'static str },
}

pub(crate) fn require<T>(value: Option<T>, field: &'static str) -> Result<T, ValidationError> {
    value.ok_or(ValidationError::MissingField { field })
}

/// Accept only the canonical 36-char lowercase hyphenated form.
pub(crate) fn parse_identifier(raw: &str, field: &'static str) -> Result<Uuid, ValidationError> {
    let invalid = ValidationError::InvalidIdentifier { field };
    if raw.len() != UUID_LEN {
        return Err(invalid);
    }
    let well_formed = raw.char_indices().all(|(i, c)| match UUID_HYPHENS.contains(&i) {
        true => c == '-',
        false => matches!(c, '0'..='9' | 'a'..='f'),
    });
    if !well_formed {
        return Err(invalid);
    }
    Uuid::parse_str(raw).map_err(|_| invalid)
}

pub(crate) fn check_range(value: f64, min: f64, max: f64, field: &'static str) -> Result<f64, ValidationError> {
    match value.is_finite() && value >= min && value <= max {
        true => Ok(value),
        false => Err(ValidationError::OutOfRange { field, min, max }),
    }
}

pub(crate) fn check_granularity(value: f64, step: f64, field: &'static str) -> Result<f64, ValidationError> {
    let steps = value / step;
    match (steps - steps.round()).abs() < 1e-9 {
        true => Ok(steps.round() * step),
        false => Err(ValidationError::Granularity { field, step }),
    }
}

/// Strip control and markup characters, trim, and enforce a non-empty bounded length.
pub(crate) fn sanitize_text(raw: &str, max_len: usize, field: &'static str) -> Result<String, ValidationError> {
    let cleaned = raw
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, '<' | '>'))
        .collect::<String>();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return Err(ValidationError::InvalidText { field, reason: "must not be empty" });
    }
    if cleaned.chars().count() > max_len {
        return Err(ValidationError::InvalidText { field, reason: "is too long" });
    }
    Ok(cleaned.to_string())
}
