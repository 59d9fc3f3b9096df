//! Caller-side checks run before any frame is built.

use super::{ProtocolError, Result};

/// Check a numeric parameter against an inclusive range.
pub fn validate_number(field: &str, value: u16, min: u8, max: u8) -> Result<u8> {
    if value < min as u16 || value > max as u16 {
        return Err(ProtocolError::Validation {
            field: field.to_string(),
            value: value.to_string(),
            min,
            max,
        });
    }
    Ok(value as u8)
}

/// Parse a text input field as an address in an inclusive range.
pub fn validate_field(field: &str, text: &str, min: u8, max: u8) -> Result<u8> {
    let invalid = || ProtocolError::Validation {
        field: field.to_string(),
        value: text.to_string(),
        min,
        max,
    };
    let value: u16 = text.trim().parse().map_err(|_| invalid())?;
    validate_number(field, value, min, max).map_err(|_| invalid())
}
