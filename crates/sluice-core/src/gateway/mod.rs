//! SQL Gateway: the only module that touches the database driver.
//!
//! Exposes typed parameter binding, query execution, batched insert,
//! column-metadata introspection, and safe string truncation. Values are
//! always bound, never interpolated into SQL text. Driver errors are
//! classified into the transfer taxonomy here ([`crate::error::classify_sqlx`])
//! so callers never see `sqlx::Error`.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Column, PgConnection, Postgres, Row as SqlxRow, TypeInfo};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{TransferError, classify_sqlx};

/// Wall-clock cap for a single projection query.
const QUERY_TIMEOUT: Duration = Duration::from_secs(60);
/// Wall-clock cap for a single insert.
const INSERT_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Scalar values
// ---------------------------------------------------------------------------

/// The closed scalar union carried by rows and parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Decimal(Decimal),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Convert a JSON scalar (task parameter values, rule payloads) into a
    /// typed value. Strings that parse as RFC 3339 timestamps become
    /// timestamps so date comparisons bind with the right type.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else if let Some(f) = n.as_f64() {
                    Decimal::from_f64_retain(f).map(Self::Decimal).unwrap_or(Self::Null)
                } else {
                    Self::Null
                }
            }
            serde_json::Value::String(s) => {
                if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                    Self::Timestamp(ts.with_timezone(&Utc))
                } else {
                    Self::Text(s.clone())
                }
            }
            // Structured values are retained as JSON text.
            other => Self::Text(other.to_string()),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view of the value, if it has one.
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Self::Int(i) => Some(Decimal::from(*i)),
            Self::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    /// JSON rendering used for outcome summaries and duplicate reports.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Decimal(d) => serde_json::Value::String(d.normalize().to_string()),
            Self::Text(s) => serde_json::Value::String(s.clone()),
            Self::Timestamp(ts) => serde_json::Value::String(ts.to_rfc3339()),
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Decimal(d) => write!(f, "{}", d.normalize()),
            Self::Text(s) => f.write_str(s),
            Self::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
        }
    }
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// An ordered mapping of column name to scalar value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataRow {
    columns: Vec<String>,
    values: HashMap<String, SqlValue>,
}

impl DataRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a column value, appending the column when it is new. Existing
    /// columns keep their position.
    pub fn set(&mut self, column: impl Into<String>, value: SqlValue) {
        let column = column.into();
        if !self.values.contains_key(&column) {
            self.columns.push(column.clone());
        }
        self.values.insert(column, value);
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.values.get(column)
    }

    /// Value lookup that treats a missing column as SQL NULL.
    pub fn get_or_null(&self, column: &str) -> SqlValue {
        self.values.get(column).cloned().unwrap_or(SqlValue::Null)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.columns
            .iter()
            .map(|c| (c.as_str(), &self.values[c]))
    }

    /// The merge-key string of this row: the values of `fields` joined with
    /// `|`. Missing columns contribute an empty segment.
    pub fn key_string(&self, fields: &[String]) -> String {
        fields
            .iter()
            .map(|f| self.get_or_null(f).to_string())
            .collect::<Vec<_>>()
            .join("|")
    }

    /// JSON object rendering in column order.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::with_capacity(self.columns.len());
        for (column, value) in self.iter() {
            map.insert(column.to_owned(), value.to_json());
        }
        serde_json::Value::Object(map)
    }

    /// A projection of this row limited to `key_fields` plus up to `extra`
    /// additional columns, used for bounded duplicate reporting.
    pub fn project(&self, key_fields: &[String], extra: usize) -> DataRow {
        let mut out = DataRow::new();
        for field in key_fields {
            out.set(field.clone(), self.get_or_null(field));
        }
        let mut taken = 0;
        for (column, value) in self.iter() {
            if taken >= extra {
                break;
            }
            if key_fields.iter().any(|f| f == column) {
                continue;
            }
            out.set(column.to_string(), value.clone());
            taken += 1;
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Column metadata
// ---------------------------------------------------------------------------

/// Destination column metadata from INFORMATION_SCHEMA.
#[derive(Debug, Clone)]
pub struct ColumnType {
    pub data_type: String,
    pub max_length: Option<i32>,
}

impl ColumnType {
    fn is_textual(&self) -> bool {
        matches!(
            self.data_type.as_str(),
            "character varying" | "character" | "text" | "name"
        )
    }

    fn is_integral(&self) -> bool {
        matches!(self.data_type.as_str(), "smallint" | "integer" | "bigint")
    }

    fn is_numeric(&self) -> bool {
        matches!(
            self.data_type.as_str(),
            "numeric" | "real" | "double precision" | "money"
        )
    }

    fn is_temporal(&self) -> bool {
        self.data_type.starts_with("timestamp") || self.data_type == "date"
    }

    fn is_boolean(&self) -> bool {
        self.data_type == "boolean"
    }
}

/// Memoized `columnMaxLength` lookups, keyed by (table, column).
#[derive(Debug, Default)]
pub struct ColumnLengthCache {
    inner: Mutex<HashMap<(String, String), Option<i32>>>,
}

impl ColumnLengthCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum character length of a destination column, or `None` for
    /// unbounded/non-text columns. Cached per (table, column).
    pub async fn max_length(
        &self,
        conn: &mut PgConnection,
        table: &str,
        column: &str,
    ) -> Result<Option<i32>, TransferError> {
        let key = (table.to_owned(), column.to_owned());
        {
            let cache = self.inner.lock().await;
            if let Some(cached) = cache.get(&key) {
                return Ok(*cached);
            }
        }

        let length: Option<(Option<i32>,)> = sqlx::query_as(
            "SELECT character_maximum_length \
             FROM information_schema.columns \
             WHERE table_name = $1 AND column_name = $2",
        )
        .bind(table)
        .bind(column)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| classify_sqlx(e, ""))?;

        let length = length.and_then(|(l,)| l);
        self.inner.lock().await.insert(key, length);
        Ok(length)
    }
}

// ---------------------------------------------------------------------------
// Identifier safety
// ---------------------------------------------------------------------------

/// Quote an identifier (optionally schema-qualified) after validating it.
///
/// Table and column names come from task definitions, not from row data,
/// but they still cannot be parameterised, so validate-then-quote is the
/// rule everywhere an identifier is spliced into SQL.
pub fn quote_ident(name: &str) -> Result<String, TransferError> {
    if name.is_empty() {
        return Err(TransferError::Other(anyhow::anyhow!(
            "empty SQL identifier"
        )));
    }
    let mut parts = Vec::new();
    for part in name.split('.') {
        if part.is_empty()
            || !part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(TransferError::Other(anyhow::anyhow!(
                "identifier {name:?} contains invalid characters"
            )));
        }
        parts.push(format!("\"{part}\""));
    }
    Ok(parts.join("."))
}

// ---------------------------------------------------------------------------
// Binding and decoding
// ---------------------------------------------------------------------------

/// Bind a scalar onto a query by its own type. Used for projection-query
/// parameters, where the destination type is unknown.
fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &'q SqlValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        SqlValue::Null => query.bind(Option::<String>::None),
        SqlValue::Bool(b) => query.bind(*b),
        SqlValue::Int(i) => query.bind(*i),
        SqlValue::Decimal(d) => query.bind(*d),
        SqlValue::Text(s) => query.bind(s.as_str()),
        SqlValue::Timestamp(ts) => query.bind(*ts),
    }
}

/// Bind a scalar onto an insert with the destination column type known,
/// so NULLs and coercible values carry the type the column expects.
fn bind_for_column<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &'q SqlValue,
    column: &ColumnType,
) -> Query<'q, Postgres, PgArguments> {
    if value.is_null() {
        return if column.is_integral() {
            query.bind(Option::<i64>::None)
        } else if column.is_numeric() {
            query.bind(Option::<Decimal>::None)
        } else if column.is_boolean() {
            query.bind(Option::<bool>::None)
        } else if column.is_temporal() {
            query.bind(Option::<DateTime<Utc>>::None)
        } else {
            query.bind(Option::<String>::None)
        };
    }
    match value {
        SqlValue::Int(i) if column.is_numeric() => query.bind(Decimal::from(*i)),
        _ => bind_value(query, value),
    }
}

/// Decode a driver row into the scalar union, column by column.
fn decode_row(row: &PgRow) -> DataRow {
    let mut out = DataRow::new();
    for (idx, col) in row.columns().iter().enumerate() {
        let value = decode_value(row, idx, col.type_info().name());
        out.set(col.name().to_string(), value);
    }
    out
}

fn decode_value(row: &PgRow, idx: usize, type_name: &str) -> SqlValue {
    fn opt<T>(v: Result<Option<T>, sqlx::Error>) -> Option<T> {
        v.ok().flatten()
    }

    match type_name {
        "BOOL" => opt(row.try_get::<Option<bool>, _>(idx))
            .map(SqlValue::Bool)
            .unwrap_or(SqlValue::Null),
        "INT2" => opt(row.try_get::<Option<i16>, _>(idx))
            .map(|v| SqlValue::Int(v as i64))
            .unwrap_or(SqlValue::Null),
        "INT4" => opt(row.try_get::<Option<i32>, _>(idx))
            .map(|v| SqlValue::Int(v as i64))
            .unwrap_or(SqlValue::Null),
        "INT8" => opt(row.try_get::<Option<i64>, _>(idx))
            .map(SqlValue::Int)
            .unwrap_or(SqlValue::Null),
        "FLOAT4" => opt(row.try_get::<Option<f32>, _>(idx))
            .and_then(|v| Decimal::from_f32_retain(v))
            .map(SqlValue::Decimal)
            .unwrap_or(SqlValue::Null),
        "FLOAT8" => opt(row.try_get::<Option<f64>, _>(idx))
            .and_then(Decimal::from_f64_retain)
            .map(SqlValue::Decimal)
            .unwrap_or(SqlValue::Null),
        "NUMERIC" => opt(row.try_get::<Option<Decimal>, _>(idx))
            .map(SqlValue::Decimal)
            .unwrap_or(SqlValue::Null),
        "TIMESTAMP" => opt(row.try_get::<Option<NaiveDateTime>, _>(idx))
            .map(|v| SqlValue::Timestamp(v.and_utc()))
            .unwrap_or(SqlValue::Null),
        "TIMESTAMPTZ" => opt(row.try_get::<Option<DateTime<Utc>>, _>(idx))
            .map(SqlValue::Timestamp)
            .unwrap_or(SqlValue::Null),
        "DATE" => opt(row.try_get::<Option<NaiveDate>, _>(idx))
            .and_then(|v| v.and_hms_opt(0, 0, 0))
            .map(|v| SqlValue::Timestamp(v.and_utc()))
            .unwrap_or(SqlValue::Null),
        "UUID" => opt(row.try_get::<Option<uuid::Uuid>, _>(idx))
            .map(|v| SqlValue::Text(v.to_string()))
            .unwrap_or(SqlValue::Null),
        _ => opt(row.try_get::<Option<String>, _>(idx))
            .map(SqlValue::Text)
            .unwrap_or(SqlValue::Null),
    }
}

// ---------------------------------------------------------------------------
// Query execution
// ---------------------------------------------------------------------------

/// Execute a SELECT with bound parameters and decode every row.
pub async fn query(
    conn: &mut PgConnection,
    sql: &str,
    params: &[SqlValue],
) -> Result<Vec<DataRow>, TransferError> {
    let mut q = sqlx::query(sql);
    for value in params {
        q = bind_value(q, value);
    }

    let rows = tokio::time::timeout(QUERY_TIMEOUT, q.fetch_all(&mut *conn))
        .await
        .map_err(|_| TransferError::Timeout(format!("query exceeded {QUERY_TIMEOUT:?}")))?
        .map_err(|e| classify_sqlx(e, ""))?;

    Ok(rows.iter().map(decode_row).collect())
}

/// Execute a non-SELECT statement with bound parameters. Returns the
/// affected-row count.
pub async fn execute(
    conn: &mut PgConnection,
    sql: &str,
    params: &[SqlValue],
) -> Result<u64, TransferError> {
    let mut q = sqlx::query(sql);
    for value in params {
        q = bind_value(q, value);
    }

    let result = tokio::time::timeout(QUERY_TIMEOUT, q.execute(&mut *conn))
        .await
        .map_err(|_| TransferError::Timeout(format!("statement exceeded {QUERY_TIMEOUT:?}")))?
        .map_err(|e| classify_sqlx(e, ""))?;

    Ok(result.rows_affected())
}

/// Insert one row into `table`, binding each value with its destination
/// column type. Strings longer than the destination column are truncated
/// (never rejected) with a warning.
///
/// Columns absent from the destination are skipped. A unique-constraint
/// violation surfaces as [`TransferError::Duplicate`] labelled with
/// `merge_key`; connection losses and timeouts keep their own variants.
pub async fn insert_row(
    conn: &mut PgConnection,
    table: &str,
    row: &DataRow,
    column_types: &HashMap<String, ColumnType>,
    merge_key: &str,
) -> Result<u64, TransferError> {
    let mut columns = Vec::new();
    let mut values = Vec::new();
    for (column, value) in row.iter() {
        let Some(col_type) = column_types.get(column) else {
            debug!(column, table, "skipping column absent from destination");
            continue;
        };
        let value = match (value, col_type.max_length) {
            (SqlValue::Text(s), Some(max)) if col_type.is_textual() && s.chars().count() > max as usize => {
                warn!(
                    column,
                    table,
                    max_length = max,
                    actual = s.chars().count(),
                    "truncating oversized string for destination column"
                );
                SqlValue::Text(s.chars().take(max as usize).collect())
            }
            _ => value.clone(),
        };
        columns.push(column.to_owned());
        values.push((value, col_type.clone()));
    }

    if columns.is_empty() {
        return Err(TransferError::Other(anyhow::anyhow!(
            "row has no columns present in destination table {table}"
        )));
    }

    let quoted_table = quote_ident(table)?;
    let quoted_columns = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Result<Vec<_>, _>>()?
        .join(", ");
    let placeholders = (1..=values.len())
        .map(|i| format!("${i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!("INSERT INTO {quoted_table} ({quoted_columns}) VALUES ({placeholders})");

    let mut q = sqlx::query(&sql);
    for (value, col_type) in &values {
        q = bind_for_column(q, value, col_type);
    }

    let result = tokio::time::timeout(INSERT_TIMEOUT, q.execute(&mut *conn))
        .await
        .map_err(|_| TransferError::Timeout(format!("insert exceeded {INSERT_TIMEOUT:?}")))?
        .map_err(|e| classify_sqlx(e, merge_key))?;

    Ok(result.rows_affected())
}

/// Delete every row of `table`. Tolerates a missing table by treating it
/// as an empty destination (returns 0).
pub async fn clear_table(conn: &mut PgConnection, table: &str) -> Result<u64, TransferError> {
    let quoted = quote_ident(table)?;
    let sql = format!("DELETE FROM {quoted}");
    match execute(conn, &sql, &[]).await {
        Ok(n) => Ok(n),
        Err(TransferError::Other(err)) if is_undefined_table(&err) => {
            debug!(table, "destination table missing, treating as empty");
            Ok(0)
        }
        Err(e) => Err(e),
    }
}

/// Count the rows of `table`. The read is a plain MVCC snapshot and never
/// blocks writers.
pub async fn count_rows(conn: &mut PgConnection, table: &str) -> Result<i64, TransferError> {
    let quoted = quote_ident(table)?;
    let sql = format!("SELECT COUNT(*) FROM {quoted}");
    let row: (i64,) = sqlx::query_as(&sql)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| classify_sqlx(e, ""))?;
    Ok(row.0)
}

/// Fetch the column types of `table` from INFORMATION_SCHEMA.
pub async fn column_types(
    conn: &mut PgConnection,
    table: &str,
) -> Result<HashMap<String, ColumnType>, TransferError> {
    let rows: Vec<(String, String, Option<i32>)> = sqlx::query_as(
        "SELECT column_name::text, data_type::text, character_maximum_length \
         FROM information_schema.columns \
         WHERE table_name = $1",
    )
    .bind(table)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| classify_sqlx(e, ""))?;

    Ok(rows
        .into_iter()
        .map(|(name, data_type, max_length)| {
            (
                name,
                ColumnType {
                    data_type,
                    max_length,
                },
            )
        })
        .collect())
}

/// Project the distinct merge-key tuples already present in the destination
/// and return them as key strings.
pub async fn distinct_keys(
    conn: &mut PgConnection,
    table: &str,
    key_fields: &[String],
) -> Result<HashSet<String>, TransferError> {
    let quoted_table = quote_ident(table)?;
    let quoted_fields = key_fields
        .iter()
        .map(|f| quote_ident(f))
        .collect::<Result<Vec<_>, _>>()?
        .join(", ");
    let sql = format!("SELECT DISTINCT {quoted_fields} FROM {quoted_table}");

    let rows = query(conn, &sql, &[]).await?;
    Ok(rows
        .iter()
        .map(|row| row.key_string(key_fields))
        .collect())
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

// Transactions are driven with explicit statements rather than the driver's
// guard type: a lost connection must be replaceable mid-run, and a guard
// borrowing the dead session would pin it.

pub async fn begin(conn: &mut PgConnection) -> Result<(), TransferError> {
    execute(conn, "BEGIN", &[]).await.map(|_| ())
}

pub async fn commit(conn: &mut PgConnection) -> Result<(), TransferError> {
    execute(conn, "COMMIT", &[]).await.map(|_| ())
}

pub async fn rollback(conn: &mut PgConnection) -> Result<(), TransferError> {
    execute(conn, "ROLLBACK", &[]).await.map(|_| ())
}

fn is_undefined_table(err: &anyhow::Error) -> bool {
    // SQLSTATE 42P01.
    err.downcast_ref::<sqlx::Error>()
        .and_then(|e| match e {
            sqlx::Error::Database(db) => db.code().map(|c| c.as_ref() == "42P01"),
            _ => None,
        })
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_row_preserves_insertion_order() {
        let mut row = DataRow::new();
        row.set("z", SqlValue::Int(1));
        row.set("a", SqlValue::Int(2));
        row.set("m", SqlValue::Int(3));
        let cols: Vec<&str> = row.columns().iter().map(String::as_str).collect();
        assert_eq!(cols, vec!["z", "a", "m"]);

        // Overwriting keeps the original position.
        row.set("a", SqlValue::Int(9));
        let cols: Vec<&str> = row.columns().iter().map(String::as_str).collect();
        assert_eq!(cols, vec!["z", "a", "m"]);
        assert_eq!(row.get("a"), Some(&SqlValue::Int(9)));
    }

    #[test]
    fn key_string_joins_values_in_field_order() {
        let mut row = DataRow::new();
        row.set("id", SqlValue::Int(7));
        row.set("branch", SqlValue::Text("N".into()));
        let key = row.key_string(&["id".to_string(), "branch".to_string()]);
        assert_eq!(key, "7|N");
    }

    #[test]
    fn key_string_treats_missing_and_null_alike() {
        let mut row = DataRow::new();
        row.set("id", SqlValue::Null);
        let fields = vec!["id".to_string(), "branch".to_string()];
        assert_eq!(row.key_string(&fields), "|");
    }

    #[test]
    fn projection_caps_extra_fields() {
        let mut row = DataRow::new();
        row.set("id", SqlValue::Int(1));
        for i in 0..10 {
            row.set(format!("c{i}"), SqlValue::Int(i));
        }
        let projected = row.project(&["id".to_string()], 5);
        assert_eq!(projected.len(), 6);
        assert!(projected.contains("id"));
    }

    #[test]
    fn from_json_maps_scalars() {
        assert_eq!(SqlValue::from_json(&serde_json::json!(null)), SqlValue::Null);
        assert_eq!(
            SqlValue::from_json(&serde_json::json!(true)),
            SqlValue::Bool(true)
        );
        assert_eq!(SqlValue::from_json(&serde_json::json!(42)), SqlValue::Int(42));
        assert_eq!(
            SqlValue::from_json(&serde_json::json!("hello")),
            SqlValue::Text("hello".into())
        );
    }

    #[test]
    fn from_json_detects_timestamps() {
        let value = SqlValue::from_json(&serde_json::json!("2026-03-01T10:00:00Z"));
        assert!(matches!(value, SqlValue::Timestamp(_)));
    }

    #[test]
    fn quote_ident_accepts_plain_and_qualified() {
        assert_eq!(quote_ident("invoices").unwrap(), "\"invoices\"");
        assert_eq!(
            quote_ident("public.invoices").unwrap(),
            "\"public\".\"invoices\""
        );
    }

    #[test]
    fn quote_ident_rejects_injection() {
        assert!(quote_ident("inv; DROP TABLE x").is_err());
        assert!(quote_ident("inv\"oices").is_err());
        assert!(quote_ident("").is_err());
    }

    #[test]
    fn display_formats_for_merge_keys() {
        assert_eq!(SqlValue::Null.to_string(), "");
        assert_eq!(SqlValue::Int(5).to_string(), "5");
        assert_eq!(
            SqlValue::Decimal(Decimal::new(1050, 2)).to_string(),
            "10.5"
        );
    }
}
