//! Validation helpers for DTOs.

use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use validator::ValidationError;

/// Validates that a deadline is an RFC 3339 timestamp such as `2025-06-01T18:00:00Z`.
pub fn validate_rfc3339(value: &str) -> Result<(), ValidationError> {
    if OffsetDateTime::parse(value, &Rfc3339).is_err() {
        let mut err = ValidationError::new("rfc3339");
        err.message = Some(format!("`{value}` is not an RFC 3339 timestamp").into());
        return Err(err);
    }
    Ok(())
}

/// Rejects strings made only of whitespace.
pub fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("must not be blank".into());
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc3339_accepts_offsets_and_utc() {
        assert!(validate_rfc3339("2025-06-01T18:00:00Z").is_ok());
        assert!(validate_rfc3339("2025-06-01T18:00:00+02:00").is_ok());
    }

    #[test]
    fn rfc3339_rejects_other_formats() {
        assert!(validate_rfc3339("2025-06-01").is_err());
        assert!(validate_rfc3339("tomorrow").is_err());
        assert!(validate_rfc3339("").is_err());
    }

    #[test]
    fn blank_strings_are_rejected() {
        assert!(validate_not_blank("   ").is_err());
        assert!(validate_not_blank("Openers").is_ok());
    }
}
