//! Promotion linker: classifies detail rows as regular/trigger vs.
//! bonus/gift and rewrites gift rows to reference the line number of the
//! nearest trigger for the same article.
//!
//! The resolution order for a gift's trigger is: nearest candidate earlier
//! in the document, else nearest candidate later, else any candidate for
//! the article, else line 1 with the row tagged as an orphan.

use std::collections::HashMap;

use rust_decimal::prelude::ToPrimitive;
use tracing::warn;

use sluice_db::rules::PromotionConfig;

use crate::gateway::{DataRow, SqlValue};

/// Classification of one detail row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowTag {
    /// A gift line, rewritten to reference its trigger.
    Bonus,
    /// A regular sales line that can carry gifts.
    Trigger,
    /// Neither; rewritten like a trigger.
    Normal,
}

/// Result of a linking pass over one document.
#[derive(Debug)]
pub struct LinkResult {
    /// Rows in line-number order, rewritten.
    pub rows: Vec<DataRow>,
    /// Tag of each output row, parallel to `rows`.
    pub tags: Vec<RowTag>,
    /// Gift rows whose referenced article had no candidate at all.
    pub orphans: usize,
}

/// Run the linker over the detail rows of one document.
///
/// The output always has the same row count as the input and preserves the
/// multiset of article codes; only quantity and reference fields are
/// rewritten. A config whose detection fields are missing from the rows
/// disables the pass: rows come back untouched, tagged `Normal`.
pub fn link(rows: Vec<DataRow>, config: &PromotionConfig) -> LinkResult {
    if rows.is_empty() {
        return LinkResult {
            rows,
            tags: Vec::new(),
            orphans: 0,
        };
    }

    if let Some(missing) = missing_detection_field(&rows[0], config) {
        warn!(
            field = missing,
            "promotion config detection field missing from result rows, passing rows through"
        );
        let tags = vec![RowTag::Normal; rows.len()];
        return LinkResult {
            rows,
            tags,
            orphans: 0,
        };
    }

    // Stable sort by line number; rows without one keep their relative
    // order at the end.
    let mut rows = rows;
    rows.sort_by_key(|row| line_number(row, config).unwrap_or(i64::MAX));

    let tags: Vec<RowTag> = rows.iter().map(|row| classify(row, config)).collect();

    // Multi-map article -> (line number, index), non-bonus rows only.
    let mut candidates: HashMap<String, Vec<(i64, usize)>> = HashMap::new();
    for (idx, row) in rows.iter().enumerate() {
        if tags[idx] == RowTag::Bonus {
            continue;
        }
        let article = row.get_or_null(&config.article_field).to_string();
        if article.is_empty() {
            continue;
        }
        let line = line_number(row, config).unwrap_or(0);
        candidates.entry(article).or_default().push((line, idx));
    }

    let mut orphans = 0;
    for idx in 0..rows.len() {
        match tags[idx] {
            RowTag::Bonus => {
                let reference = rows[idx].get_or_null(&config.reference_field).to_string();
                let line_ref = match choose_trigger(candidates.get(reference.as_str()), idx) {
                    Some(line) => line,
                    None => {
                        orphans += 1;
                        1
                    }
                };
                let quantity = rows[idx].get_or_null(&config.quantity_field);
                let row = &mut rows[idx];
                row.set(config.bonus_line_ref_field.clone(), SqlValue::Int(line_ref));
                row.set(config.bonus_quantity_field.clone(), quantity);
                row.set(config.ordered_quantity_field.clone(), SqlValue::Null);
                row.set(config.invoice_quantity_field.clone(), SqlValue::Null);
            }
            RowTag::Trigger | RowTag::Normal => {
                let quantity = rows[idx].get_or_null(&config.quantity_field);
                let row = &mut rows[idx];
                row.set(config.ordered_quantity_field.clone(), quantity.clone());
                row.set(config.invoice_quantity_field.clone(), quantity);
                row.set(config.bonus_line_ref_field.clone(), SqlValue::Null);
                row.set(config.bonus_quantity_field.clone(), SqlValue::Null);
            }
        }
    }

    LinkResult {
        rows,
        tags,
        orphans,
    }
}

/// Pick the trigger line for a bonus row at `bonus_idx`.
///
/// Nearest earlier candidate wins; then nearest later; then any.
fn choose_trigger(candidates: Option<&Vec<(i64, usize)>>, bonus_idx: usize) -> Option<i64> {
    let candidates = candidates?;
    if candidates.is_empty() {
        return None;
    }

    let earlier = candidates
        .iter()
        .filter(|(_, idx)| *idx < bonus_idx)
        .max_by_key(|(_, idx)| *idx);
    if let Some((line, _)) = earlier {
        return Some(*line);
    }

    let later = candidates
        .iter()
        .filter(|(_, idx)| *idx > bonus_idx)
        .min_by_key(|(_, idx)| *idx);
    if let Some((line, _)) = later {
        return Some(*line);
    }

    candidates.first().map(|(line, _)| *line)
}

fn classify(row: &DataRow, config: &PromotionConfig) -> RowTag {
    let indicator = row.get_or_null(&config.indicator_field);
    let reference = row.get_or_null(&config.reference_field);

    if indicator.to_string() == config.bonus_indicator_value || !reference.is_null() {
        return RowTag::Bonus;
    }

    let article = row.get_or_null(&config.article_field);
    let indicator_blank = matches!(indicator.to_string().as_str(), "" | "0");
    let quantity = row
        .get_or_null(&config.quantity_field)
        .as_decimal()
        .unwrap_or_default();

    if !article.to_string().is_empty() && indicator_blank && quantity > rust_decimal::Decimal::ZERO
    {
        RowTag::Trigger
    } else {
        RowTag::Normal
    }
}

fn line_number(row: &DataRow, config: &PromotionConfig) -> Option<i64> {
    match row.get_or_null(&config.line_field) {
        SqlValue::Int(i) => Some(i),
        SqlValue::Decimal(d) => d.to_i64(),
        SqlValue::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn missing_detection_field<'a>(
    row: &DataRow,
    config: &'a PromotionConfig,
) -> Option<&'a str> {
    config
        .detection_fields()
        .into_iter()
        .find(|field| !row.contains(field))
}
