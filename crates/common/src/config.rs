//! Environment variable parsing shared by service and client configuration.
//!
//! Configuration structs load from a `HashMap<String, String>` so tests can
//! supply variables without touching the process environment.

use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use thiserror::Error;

/// A variable was present but could not be accepted.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{key} {reason}, got '{value}'")]
pub struct InvalidVar {
    pub key: String,
    pub value: String,
    pub reason: String,
}

/// Read `key`, falling back to `default` when absent.
#[must_use]
pub fn string_or(vars: &HashMap<String, String>, key: &str, default: &str) -> String {
    vars.get(key)
        .cloned()
        .unwrap_or_else(|| default.to_string())
}

/// Parse `key` as `T`, falling back to `default` when absent.
///
/// # Errors
///
/// Returns `InvalidVar` when the value does not parse.
pub fn parse_or<T>(vars: &HashMap<String, String>, key: &str, default: T) -> Result<T, InvalidVar>
where
    T: FromStr,
    T::Err: Display,
{
    match vars.get(key) {
        None => Ok(default),
        Some(value) => value.trim().parse::<T>().map_err(|e| InvalidVar {
            key: key.to_string(),
            value: value.clone(),
            reason: format!("must be a valid number ({e})"),
        }),
    }
}

/// Parse `key` as an integer greater than zero, falling back to `default` when absent.
///
/// # Errors
///
/// Returns `InvalidVar` when the value does not parse or is zero.
pub fn positive_or<T>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, InvalidVar>
where
    T: FromStr + Default + PartialOrd + Display + Copy,
    T::Err: Display,
{
    let value = parse_or(vars, key, default)?;
    if value <= T::default() {
        return Err(InvalidVar {
            key: key.to_string(),
            value: value.to_string(),
            reason: "must be greater than 0".to_string(),
        });
    }
    Ok(value)
}
