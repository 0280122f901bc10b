//! Run outcome reporting: the caller-facing summary of one transfer and
//! the bounded duplicate report feeding it.

use serde::Serialize;

use crate::gateway::DataRow;

/// Caller-facing result of one completed (or failed) run.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub success: bool,
    /// Rows returned by the projection query.
    pub rows: u64,
    pub inserted: u64,
    pub duplicates: u64,
    /// Bounded sample of skipped rows (merge-key projection).
    pub duplicated_records: Vec<serde_json::Value>,
    pub has_more_duplicates: bool,
    pub total_duplicates: u64,
    pub initial_count: i64,
    pub final_count: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl RunOutcome {
    /// A success-no-op outcome for an empty source result.
    pub fn empty(initial_count: i64, final_count: i64) -> Self {
        Self {
            success: true,
            rows: 0,
            inserted: 0,
            duplicates: 0,
            duplicated_records: Vec::new(),
            has_more_duplicates: false,
            total_duplicates: 0,
            initial_count,
            final_count,
            message: "source returned no rows".to_owned(),
            error_detail: None,
        }
    }

    /// JSON summary persisted in the task's `last_outcome` field.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Bounded sample of skipped rows, discarded after the run's outcome has
/// been reported.
#[derive(Debug)]
pub struct DuplicateReport {
    cap: usize,
    extra_fields: usize,
    entries: Vec<serde_json::Value>,
    total: u64,
}

impl DuplicateReport {
    pub fn new(cap: usize, extra_fields: usize) -> Self {
        Self {
            cap,
            extra_fields,
            entries: Vec::new(),
            total: 0,
        }
    }

    /// Record a skipped row: its merge-key fields plus a few extra columns,
    /// optionally annotated with the error kind that triggered the skip.
    pub fn record(&mut self, row: &DataRow, key_fields: &[String], error_kind: Option<&str>) {
        self.total += 1;
        if self.entries.len() >= self.cap {
            return;
        }
        let mut entry = row.project(key_fields, self.extra_fields).to_json();
        if let (Some(kind), serde_json::Value::Object(map)) = (error_kind, &mut entry) {
            map.insert(
                "error_kind".to_owned(),
                serde_json::Value::String(kind.to_owned()),
            );
        }
        self.entries.push(entry);
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn has_more(&self) -> bool {
        self.total as usize > self.entries.len()
    }

    pub fn into_entries(self) -> Vec<serde_json::Value> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use crate::gateway::SqlValue;

    use super::*;

    fn row(id: i64) -> DataRow {
        let mut row = DataRow::new();
        row.set("id", SqlValue::Int(id));
        row.set("note", SqlValue::Text("x".into()));
        row
    }

    #[test]
    fn report_caps_entries_but_counts_all() {
        let keys = vec!["id".to_string()];
        let mut report = DuplicateReport::new(3, 5);
        for i in 0..10 {
            report.record(&row(i), &keys, None);
        }
        assert_eq!(report.total(), 10);
        assert!(report.has_more());
        assert_eq!(report.into_entries().len(), 3);
    }

    #[test]
    fn report_annotates_error_kind() {
        let keys = vec!["id".to_string()];
        let mut report = DuplicateReport::new(10, 5);
        report.record(&row(1), &keys, Some("unique-constraint"));
        let entries = report.into_entries();
        assert_eq!(entries[0]["error_kind"], "unique-constraint");
        assert_eq!(entries[0]["id"], 1);
    }

    #[test]
    fn no_more_flag_when_under_cap() {
        let keys = vec!["id".to_string()];
        let mut report = DuplicateReport::new(100, 5);
        report.record(&row(1), &keys, None);
        assert!(!report.has_more());
    }
}
