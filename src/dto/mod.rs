use std::time::SystemTime;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::error::Rejection;

pub mod battle;
pub mod common;
pub mod health;
pub mod round;
pub mod scheduler;
pub mod submission;
pub mod validation;
pub mod vote;

fn format_system_time(time: SystemTime) -> String {
    OffsetDateTime::from(time)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "invalid-timestamp".into())
}

/// Parse an RFC 3339 timestamp supplied by a client.
pub fn parse_timestamp(field: &str, value: &str) -> Result<SystemTime, Rejection> {
    OffsetDateTime::parse(value, &Rfc3339)
        .map(SystemTime::from)
        .map_err(|err| Rejection::InvalidInput(format!("`{field}` is not an RFC 3339 timestamp: {err}")))
}
