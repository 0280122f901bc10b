//! SQL assembly for the fetch and post-update phases: the operator-aware
//! WHERE builder and the chunked post-update expansion.
//!
//! Both builders emit numbered placeholders and a parallel parameter list;
//! values never reach the SQL text.

use sluice_db::rules::{ParamOp, PostUpdateMapping, QueryParam};

use crate::error::TransferError;
use crate::gateway::{SqlValue, quote_ident};

/// Token in a post-update query replaced by the expanded key list.
const KEYS_TOKEN: &str = ":keys";

/// Append a WHERE clause built from task parameters to the projection query.
///
/// `IN` expands its JSON-array operand to one placeholder per element;
/// `BETWEEN` takes two placeholders. Returns the final SQL and the bound
/// values in placeholder order.
pub fn build_fetch_query(
    base: &str,
    params: &[QueryParam],
) -> Result<(String, Vec<SqlValue>), TransferError> {
    if params.is_empty() {
        return Ok((base.to_owned(), Vec::new()));
    }

    let mut clauses = Vec::with_capacity(params.len());
    let mut values = Vec::new();

    for param in params {
        let field = quote_ident(&param.field)?;
        match param.op {
            ParamOp::In => {
                let list = param.value.as_array().ok_or_else(|| {
                    TransferError::Other(anyhow::anyhow!(
                        "IN parameter for {} must carry an array value",
                        param.field
                    ))
                })?;
                if list.is_empty() {
                    return Err(TransferError::Other(anyhow::anyhow!(
                        "IN parameter for {} has no values",
                        param.field
                    )));
                }
                let mut placeholders = Vec::with_capacity(list.len());
                for item in list {
                    values.push(SqlValue::from_json(item));
                    placeholders.push(format!("${}", values.len()));
                }
                clauses.push(format!("{field} IN ({})", placeholders.join(", ")));
            }
            ParamOp::Between => {
                let upper = param.value2.as_ref().ok_or_else(|| {
                    TransferError::Other(anyhow::anyhow!(
                        "BETWEEN parameter for {} needs a second value",
                        param.field
                    ))
                })?;
                values.push(SqlValue::from_json(&param.value));
                let low = values.len();
                values.push(SqlValue::from_json(upper));
                let high = values.len();
                clauses.push(format!("{field} BETWEEN ${low} AND ${high}"));
            }
            op => {
                values.push(SqlValue::from_json(&param.value));
                clauses.push(format!("{field} {op} ${}", values.len()));
            }
        }
    }

    let connector = if base.to_uppercase().contains(" WHERE ") {
        " AND "
    } else {
        " WHERE "
    };
    let sql = format!("{base}{connector}{}", clauses.join(" AND "));
    Ok((sql, values))
}

/// Strip the configured prefix from one collected key value.
pub fn strip_key_prefix(key: &str, mapping: &PostUpdateMapping) -> String {
    match &mapping.strip_prefix {
        Some(prefix) => key.strip_prefix(prefix.as_str()).unwrap_or(key).to_owned(),
        None => key.to_owned(),
    }
}

/// Expand one chunk of the post-update statement.
///
/// When the query carries a `:keys` token it is replaced with the
/// placeholder list; otherwise a `WHERE <source_field> IN (...)` clause is
/// appended. Returns the SQL and the key values in placeholder order.
pub fn build_post_update(
    base: &str,
    mapping: &PostUpdateMapping,
    keys: &[String],
) -> Result<(String, Vec<SqlValue>), TransferError> {
    if keys.is_empty() {
        return Err(TransferError::Other(anyhow::anyhow!(
            "post-update chunk has no keys"
        )));
    }

    let placeholders = (1..=keys.len())
        .map(|i| format!("${i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let values = keys
        .iter()
        .map(|k| SqlValue::Text(strip_key_prefix(k, mapping)))
        .collect();

    let sql = if base.contains(KEYS_TOKEN) {
        base.replace(KEYS_TOKEN, &placeholders)
    } else {
        let field = quote_ident(&mapping.source_field)?;
        format!("{base} WHERE {field} IN ({placeholders})")
    };

    Ok((sql, values))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn param(field: &str, op: ParamOp, value: serde_json::Value) -> QueryParam {
        QueryParam {
            field: field.to_owned(),
            op,
            value,
            value2: None,
        }
    }

    #[test]
    fn no_params_leaves_query_untouched() {
        let (sql, values) = build_fetch_query("SELECT * FROM invoices", &[]).unwrap();
        assert_eq!(sql, "SELECT * FROM invoices");
        assert!(values.is_empty());
    }

    #[test]
    fn simple_operators_bind_one_placeholder() {
        let params = vec![
            param("branch", ParamOp::Eq, json!("N")),
            param("amount", ParamOp::Ge, json!(100)),
        ];
        let (sql, values) = build_fetch_query("SELECT * FROM invoices", &params).unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM invoices WHERE \"branch\" = $1 AND \"amount\" >= $2"
        );
        assert_eq!(values.len(), 2);
        assert_eq!(values[0], SqlValue::Text("N".into()));
        assert_eq!(values[1], SqlValue::Int(100));
    }

    #[test]
    fn existing_where_clause_gets_and() {
        let params = vec![param("branch", ParamOp::Ne, json!("X"))];
        let (sql, _) =
            build_fetch_query("SELECT * FROM invoices WHERE active = TRUE", &params).unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM invoices WHERE active = TRUE AND \"branch\" <> $1"
        );
    }

    #[test]
    fn in_expands_to_placeholder_list() {
        let params = vec![param("branch", ParamOp::In, json!(["N", "S", "E"]))];
        let (sql, values) = build_fetch_query("SELECT * FROM invoices", &params).unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM invoices WHERE \"branch\" IN ($1, $2, $3)"
        );
        assert_eq!(values.len(), 3);
    }

    #[test]
    fn in_requires_non_empty_array() {
        let params = vec![param("branch", ParamOp::In, json!([]))];
        assert!(build_fetch_query("SELECT 1", &params).is_err());

        let params = vec![param("branch", ParamOp::In, json!("N"))];
        assert!(build_fetch_query("SELECT 1", &params).is_err());
    }

    #[test]
    fn between_takes_two_placeholders() {
        let mut p = param("issued_at", ParamOp::Between, json!("2026-01-01T00:00:00Z"));
        p.value2 = Some(json!("2026-02-01T00:00:00Z"));
        let (sql, values) = build_fetch_query("SELECT * FROM invoices", &[p]).unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM invoices WHERE \"issued_at\" BETWEEN $1 AND $2"
        );
        assert_eq!(values.len(), 2);
        assert!(matches!(values[0], SqlValue::Timestamp(_)));
    }

    #[test]
    fn between_without_second_value_fails() {
        let p = param("issued_at", ParamOp::Between, json!(1));
        assert!(build_fetch_query("SELECT 1", &[p]).is_err());
    }

    #[test]
    fn like_keeps_its_token() {
        let params = vec![param("name", ParamOp::Like, json!("ACME%"))];
        let (sql, _) = build_fetch_query("SELECT * FROM customers", &params).unwrap();
        assert_eq!(sql, "SELECT * FROM customers WHERE \"name\" LIKE $1");
    }

    #[test]
    fn injection_in_field_name_is_rejected() {
        let params = vec![param("branch; DROP TABLE x", ParamOp::Eq, json!("N"))];
        assert!(build_fetch_query("SELECT 1", &params).is_err());
    }

    fn mapping(strip: Option<&str>) -> PostUpdateMapping {
        PostUpdateMapping {
            dest_field: "invoice_id".to_owned(),
            source_field: "id".to_owned(),
            strip_prefix: strip.map(str::to_owned),
        }
    }

    #[test]
    fn post_update_replaces_keys_token() {
        let keys = vec!["1".to_owned(), "2".to_owned()];
        let (sql, values) = build_post_update(
            "UPDATE invoices SET transferred = TRUE WHERE id IN (:keys)",
            &mapping(None),
            &keys,
        )
        .unwrap();
        assert_eq!(
            sql,
            "UPDATE invoices SET transferred = TRUE WHERE id IN ($1, $2)"
        );
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn post_update_appends_where_without_token() {
        let keys = vec!["1".to_owned()];
        let (sql, _) =
            build_post_update("UPDATE invoices SET transferred = TRUE", &mapping(None), &keys)
                .unwrap();
        assert_eq!(
            sql,
            "UPDATE invoices SET transferred = TRUE WHERE \"id\" IN ($1)"
        );
    }

    #[test]
    fn prefix_stripping_is_per_task() {
        let keys = vec!["CN12345".to_owned(), "99".to_owned()];
        let (_, values) = build_post_update(
            "UPDATE x SET y = 1 WHERE id IN (:keys)",
            &mapping(Some("CN")),
            &keys,
        )
        .unwrap();
        assert_eq!(values[0], SqlValue::Text("12345".into()));
        assert_eq!(values[1], SqlValue::Text("99".into()));

        // Default is no stripping.
        assert_eq!(strip_key_prefix("CN12345", &mapping(None)), "CN12345");
    }

    #[test]
    fn empty_key_chunk_is_an_error() {
        assert!(build_post_update("UPDATE x SET y = 1", &mapping(None), &[]).is_err());
    }
}
