//! Serde payload types stored in the JSONB columns of `tasks`: the
//! projection-query parameter list, the validation ruleset, the post-update
//! key mapping, and the promotion configuration.

use std::collections::BTreeMap;
use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Query parameters
// ---------------------------------------------------------------------------

/// Comparison operator of a projection-query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamOp {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<>")]
    Ne,
    #[serde(rename = "LIKE")]
    Like,
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "BETWEEN")]
    Between,
}

impl fmt::Display for ParamOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Eq => "=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Ne => "<>",
            Self::Like => "LIKE",
            Self::In => "IN",
            Self::Between => "BETWEEN",
        };
        f.write_str(s)
    }
}

/// One parameter of a task's projection query.
///
/// `IN` carries its operand list in `value` (a JSON array); `BETWEEN`
/// carries its bounds in `value` and `value2`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryParam {
    pub field: String,
    pub op: ParamOp,
    pub value: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value2: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Validation ruleset
// ---------------------------------------------------------------------------

/// Semantic type expected for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    Date,
    Boolean,
}

/// Per-field validation and sanitization rule.
///
/// All knobs default to off so task payloads only spell out what they use.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldRule {
    #[serde(rename = "type")]
    pub field_type: Option<FieldType>,
    pub required: bool,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    /// Regex the (string) value must match.
    pub pattern: Option<String>,
    /// Cut oversized strings to `max_length` instead of failing.
    pub truncate: bool,
    pub trim: bool,
    pub uppercase: bool,
    pub lowercase: bool,
    pub min_value: Option<Decimal>,
    pub max_value: Option<Decimal>,
    /// Require an integral value.
    pub integer: bool,
    /// Bound out-of-range numbers to `[min_value, max_value]` instead of
    /// failing.
    pub clamp: bool,
    /// Round to an integer instead of failing the `integer` rule.
    pub round: bool,
    /// Decimal places retained for numeric values.
    pub precision: Option<u32>,
}

/// Validation ruleset of one task: field rules plus the identity fields
/// used for deduplication.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Ruleset {
    pub fields: BTreeMap<String, FieldRule>,
    /// Fields whose combined values form the row identity.
    pub required_fields: Vec<String>,
    /// The single primary identity field, when one exists.
    pub existence_key: Option<String>,
}

impl Ruleset {
    /// The merge-key set: union of `required_fields` and `existence_key`.
    ///
    /// Order is deterministic (existence key first, then required fields in
    /// declaration order) so merge-key strings compare stably.
    pub fn merge_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        if let Some(key) = &self.existence_key {
            keys.push(key.clone());
        }
        for field in &self.required_fields {
            if !keys.contains(field) {
                keys.push(field.clone());
            }
        }
        keys
    }

    /// A task is executable only when it has at least one merge key.
    pub fn is_executable(&self) -> bool {
        self.existence_key.is_some() || !self.required_fields.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Post-update mapping
// ---------------------------------------------------------------------------

/// Maps the destination identity field back to the source identity field
/// for the post-transfer source-side update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostUpdateMapping {
    pub dest_field: String,
    pub source_field: String,
    /// Prefix removed from collected key values before they are sent back
    /// to the source. No stripping by default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strip_prefix: Option<String>,
}

// ---------------------------------------------------------------------------
// Promotion configuration
// ---------------------------------------------------------------------------

/// Field names and the indicator value driving the promotion linker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionConfig {
    /// Field whose value marks a row as a bonus/gift line.
    pub indicator_field: String,
    /// Field referencing the article that triggered the gift.
    pub reference_field: String,
    pub article_field: String,
    pub line_field: String,
    pub quantity_field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discount_field: Option<String>,
    /// Value of `indicator_field` that marks a bonus row (e.g. "B").
    pub bonus_indicator_value: String,
    pub bonus_line_ref_field: String,
    pub ordered_quantity_field: String,
    pub invoice_quantity_field: String,
    pub bonus_quantity_field: String,
}

impl PromotionConfig {
    /// The detection fields that must be present in the projection's rows.
    pub fn detection_fields(&self) -> [&str; 5] {
        [
            self.indicator_field.as_str(),
            self.reference_field.as_str(),
            self.article_field.as_str(),
            self.line_field.as_str(),
            self.quantity_field.as_str(),
        ]
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
