//! Rule-driven row validation and sanitization.
//!
//! `validate` coerces and checks every field named by a task's ruleset and
//! returns the cleaned row, or the list of failures. All type decisions are
//! driven by the schema; the runtime type of the incoming value only matters
//! for coercion. Sanitization is idempotent: running a cleaned row through
//! again yields the same row.

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use sluice_db::rules::{FieldRule, FieldType, Ruleset};

use crate::gateway::{DataRow, SqlValue};

/// Options recognized by [`validate`]. Rule-level switches (`truncate`,
/// `clamp`, `round`, `trim`, case) are OR-ed with these run-level ones.
#[derive(Debug, Clone, Default)]
pub struct ValidateOptions {
    /// Return on the first failure instead of collecting all of them.
    pub throw_on_first_error: bool,
    /// Retain fields the schema does not mention (sanitized) instead of
    /// dropping them.
    pub allow_extra_fields: bool,
    /// Coerce between string/number/bool/date where unambiguous.
    pub auto_convert: bool,
    pub truncate: bool,
    pub clamp: bool,
    pub round: bool,
    pub trim: bool,
}

/// One failed field check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub reason: String,
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

/// Normalize a scalar before any rule runs.
///
/// Empty and whitespace-only strings become NULL. Values already clean pass
/// through unchanged, which makes the function idempotent.
pub fn sanitize(value: &SqlValue) -> SqlValue {
    match value {
        SqlValue::Text(s) if s.trim().is_empty() => SqlValue::Null,
        other => other.clone(),
    }
}

/// Validate and sanitize a row against a ruleset.
///
/// Returns the cleaned row on success. Field order of the input row is
/// preserved; schema fields missing from the row are added as NULL only
/// when a rule produced a value for them.
pub fn validate(
    row: &DataRow,
    ruleset: &Ruleset,
    options: &ValidateOptions,
) -> Result<DataRow, Vec<FieldError>> {
    let mut errors = Vec::new();
    let mut out = DataRow::new();

    // Walk the input row first so column order survives.
    for (column, value) in row.iter() {
        match ruleset.fields.get(column) {
            Some(rule) => match apply_rule(column, value, rule, options) {
                Ok(clean) => out.set(column.to_string(), clean),
                Err(err) => {
                    errors.push(err);
                    if options.throw_on_first_error {
                        return Err(errors);
                    }
                }
            },
            None => {
                if options.allow_extra_fields {
                    out.set(column.to_string(), sanitize(value));
                }
                // Unschema'd fields are dropped otherwise.
            }
        }
    }

    // Schema fields absent from the row: only `required` can fail here.
    for (field, rule) in &ruleset.fields {
        if row.contains(field) {
            continue;
        }
        if rule.required {
            errors.push(FieldError {
                field: field.clone(),
                reason: "required field is missing".to_owned(),
            });
            if options.throw_on_first_error {
                return Err(errors);
            }
        }
    }

    if errors.is_empty() { Ok(out) } else { Err(errors) }
}

fn apply_rule(
    field: &str,
    value: &SqlValue,
    rule: &FieldRule,
    options: &ValidateOptions,
) -> Result<SqlValue, FieldError> {
    let fail = |reason: String| FieldError {
        field: field.to_owned(),
        reason,
    };

    let mut value = sanitize(value);

    if value.is_null() {
        if rule.required {
            return Err(fail("required field is null".to_owned()));
        }
        return Ok(SqlValue::Null);
    }

    if let Some(field_type) = rule.field_type {
        value = coerce(value, field_type, options.auto_convert).map_err(fail)?;
    }

    match value {
        SqlValue::Text(s) => check_string(s, rule, options).map_err(fail),
        SqlValue::Int(_) | SqlValue::Decimal(_) => check_number(value, rule, options).map_err(fail),
        other => Ok(other),
    }
}

/// Coerce a non-null scalar to the expected semantic type.
fn coerce(value: SqlValue, expected: FieldType, auto_convert: bool) -> Result<SqlValue, String> {
    let matches_already = matches!(
        (&value, expected),
        (SqlValue::Text(_), FieldType::String)
            | (SqlValue::Int(_), FieldType::Number)
            | (SqlValue::Decimal(_), FieldType::Number)
            | (SqlValue::Bool(_), FieldType::Boolean)
            | (SqlValue::Timestamp(_), FieldType::Date)
    );
    if matches_already {
        return Ok(value);
    }
    if !auto_convert {
        return Err(format!(
            "expected {expected:?} value, got {value:?}"
        ));
    }

    match expected {
        FieldType::String => Ok(SqlValue::Text(value.to_string())),
        FieldType::Number => match &value {
            SqlValue::Bool(b) => Ok(SqlValue::Int(i64::from(*b))),
            SqlValue::Text(s) => {
                let s = s.trim();
                if let Ok(i) = s.parse::<i64>() {
                    Ok(SqlValue::Int(i))
                } else if let Ok(d) = s.parse::<Decimal>() {
                    Ok(SqlValue::Decimal(d))
                } else {
                    Err(format!("cannot convert {s:?} to a number"))
                }
            }
            _ => Err(format!("cannot convert {value:?} to a number")),
        },
        FieldType::Boolean => match &value {
            SqlValue::Int(0) => Ok(SqlValue::Bool(false)),
            SqlValue::Int(1) => Ok(SqlValue::Bool(true)),
            SqlValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(SqlValue::Bool(true)),
                "false" | "0" | "no" => Ok(SqlValue::Bool(false)),
                other => Err(format!("cannot convert {other:?} to a boolean")),
            },
            _ => Err(format!("cannot convert {value:?} to a boolean")),
        },
        FieldType::Date => match &value {
            SqlValue::Text(s) => parse_timestamp(s.trim())
                .map(SqlValue::Timestamp)
                .ok_or_else(|| format!("cannot convert {s:?} to a date")),
            _ => Err(format!("cannot convert {value:?} to a date")),
        },
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    }
    None
}

fn check_string(
    mut s: String,
    rule: &FieldRule,
    options: &ValidateOptions,
) -> Result<SqlValue, String> {
    if rule.trim || options.trim {
        s = s.trim().to_owned();
    }
    if rule.uppercase {
        s = s.to_uppercase();
    } else if rule.lowercase {
        s = s.to_lowercase();
    }

    // Post-processing may have emptied the value.
    if s.is_empty() {
        return if rule.required {
            Err("required field is empty after sanitization".to_owned())
        } else {
            Ok(SqlValue::Null)
        };
    }

    let len = s.chars().count();
    if let Some(min) = rule.min_length {
        if len < min {
            return Err(format!("length {len} is below minimum {min}"));
        }
    }
    if let Some(max) = rule.max_length {
        if len > max {
            if rule.truncate || options.truncate {
                s = s.chars().take(max).collect();
            } else {
                return Err(format!("length {len} exceeds maximum {max}"));
            }
        }
    }

    if let Some(pattern) = &rule.pattern {
        let re = Regex::new(pattern).map_err(|e| format!("invalid pattern: {e}"))?;
        if !re.is_match(&s) {
            return Err(format!("value does not match pattern {pattern:?}"));
        }
    }

    Ok(SqlValue::Text(s))
}

fn check_number(
    value: SqlValue,
    rule: &FieldRule,
    options: &ValidateOptions,
) -> Result<SqlValue, String> {
    let mut n = value
        .as_decimal()
        .ok_or_else(|| format!("expected a numeric value, got {value:?}"))?;

    if let Some(min) = rule.min_value {
        if n < min {
            if rule.clamp || options.clamp {
                n = min;
            } else {
                return Err(format!("value {n} is below minimum {min}"));
            }
        }
    }
    if let Some(max) = rule.max_value {
        if n > max {
            if rule.clamp || options.clamp {
                n = max;
            } else {
                return Err(format!("value {n} exceeds maximum {max}"));
            }
        }
    }

    if let Some(precision) = rule.precision {
        n = n.round_dp(precision);
    }

    if rule.integer {
        if n.fract().is_zero() {
            // Already integral.
        } else if rule.round || options.round {
            n = n.round();
        } else {
            return Err(format!("value {n} is not an integer"));
        }
    }

    // Keep integral values in the integer arm of the union.
    if n.fract().is_zero() {
        if let Some(i) = n.trunc().to_i64() {
            return Ok(SqlValue::Int(i));
        }
    }
    Ok(SqlValue::Decimal(n))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
