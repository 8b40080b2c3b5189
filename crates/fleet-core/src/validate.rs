//! Admission validators shared by every admin-facing surface.
//!
//! These mirror the fixed schema an HTTP admin layer would validate
//! against: ids are `[A-Za-z0-9_-]{1..100}`, model names are
//! `[A-Za-z0-9_:./-]{1..200}`. Kept here so a caller building the HTTP
//! layer does not re-derive the character classes.

use crate::ids::InvalidId;

pub fn server_id(raw: &str) -> Result<(), InvalidId> {
    bounded_charset(raw, 1, 100, |c| {
        c.is_ascii_alphanumeric() || c == '_' || c == '-'
    })
}

pub fn model_name(raw: &str) -> Result<(), InvalidId> {
    bounded_charset(raw, 1, 200, |c| {
        c.is_ascii_alphanumeric() || matches!(c, '_' | ':' | '.' | '/' | '-')
    })
}

/// Queue `maxSize` must fall in `[1, 10000]`.
pub fn queue_max_size(value: usize) -> Result<(), InvalidId> {
    if (1..=10_000).contains(&value) {
        Ok(())
    } else {
        Err(InvalidId {
            value: value.to_string(),
            reason: "queue maxSize must be in [1, 10000]",
        })
    }
}

/// Circuit breaker `baseFailureThreshold` must be at least 1.
pub fn base_failure_threshold(value: u32) -> Result<(), InvalidId> {
    if value >= 1 {
        Ok(())
    } else {
        Err(InvalidId {
            value: value.to_string(),
            reason: "baseFailureThreshold must be >= 1",
        })
    }
}

fn bounded_charset(
    raw: &str,
    min_len: usize,
    max_len: usize,
    allowed: impl Fn(char) -> bool,
) -> Result<(), InvalidId> {
    if raw.len() < min_len || raw.len() > max_len {
        return Err(InvalidId {
            value: raw.to_string(),
            reason: "length out of bounds",
        });
    }
    if !raw.chars().all(allowed) {
        return Err(InvalidId {
            value: raw.to_string(),
            reason: "contains a disallowed character",
        });
    }
    Ok(())
}
