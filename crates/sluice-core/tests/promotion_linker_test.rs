//! Scenario tests for the promotion linker.

use rust_decimal::Decimal;

use sluice_core::gateway::{DataRow, SqlValue};
use sluice_core::promotion::{RowTag, link};
use sluice_db::rules::PromotionConfig;

fn config() -> PromotionConfig {
    PromotionConfig {
        indicator_field: "bonus".to_owned(),
        reference_field: "ref_article".to_owned(),
        article_field: "article".to_owned(),
        line_field: "line".to_owned(),
        quantity_field: "qty".to_owned(),
        discount_field: None,
        bonus_indicator_value: "B".to_owned(),
        bonus_line_ref_field: "bonus_line_ref".to_owned(),
        ordered_quantity_field: "ordered_qty".to_owned(),
        invoice_quantity_field: "invoice_qty".to_owned(),
        bonus_quantity_field: "bonus_qty".to_owned(),
    }
}

fn detail(line: i64, article: &str, qty: i64, bonus: &str, reference: Option<&str>) -> DataRow {
    let mut row = DataRow::new();
    row.set("line", SqlValue::Int(line));
    row.set("article", SqlValue::Text(article.to_owned()));
    row.set("qty", SqlValue::Int(qty));
    row.set(
        "bonus",
        if bonus.is_empty() {
            SqlValue::Int(0)
        } else {
            SqlValue::Text(bonus.to_owned())
        },
    );
    row.set(
        "ref_article",
        match reference {
            Some(r) => SqlValue::Text(r.to_owned()),
            None => SqlValue::Null,
        },
    );
    row
}

fn articles(rows: &[DataRow]) -> Vec<String> {
    let mut articles: Vec<String> = rows
        .iter()
        .map(|r| r.get_or_null("article").to_string())
        .collect();
    articles.sort();
    articles
}

#[test]
fn gift_links_to_earlier_trigger() {
    // Two regular lines, then a gift of article X referencing article A.
    let rows = vec![
        detail(1, "A", 10, "", None),
        detail(2, "B", 5, "", None),
        detail(3, "X", 1, "B", Some("A")),
    ];
    let input_articles = articles(&rows);

    let result = link(rows, &config());

    assert_eq!(result.rows.len(), 3);
    assert_eq!(result.orphans, 0);
    assert_eq!(
        result.tags,
        vec![RowTag::Trigger, RowTag::Trigger, RowTag::Bonus]
    );
    assert_eq!(articles(&result.rows), input_articles);

    let gift = &result.rows[2];
    assert_eq!(gift.get("bonus_line_ref"), Some(&SqlValue::Int(1)));
    assert_eq!(gift.get("bonus_qty"), Some(&SqlValue::Int(1)));
    assert_eq!(gift.get("ordered_qty"), Some(&SqlValue::Null));
    assert_eq!(gift.get("invoice_qty"), Some(&SqlValue::Null));

    for trigger in &result.rows[..2] {
        let qty = trigger.get_or_null("qty");
        assert_eq!(trigger.get("ordered_qty"), Some(&qty));
        assert_eq!(trigger.get("invoice_qty"), Some(&qty));
        assert_eq!(trigger.get("bonus_line_ref"), Some(&SqlValue::Null));
        assert_eq!(trigger.get("bonus_qty"), Some(&SqlValue::Null));
    }
}

#[test]
fn gift_before_trigger_links_to_nearest_later() {
    let rows = vec![
        detail(1, "X", 1, "B", Some("A")),
        detail(2, "A", 10, "", None),
        detail(3, "A", 4, "", None),
    ];
    let result = link(rows, &config());

    assert_eq!(result.orphans, 0);
    // Nearest later candidate is line 2, not line 3.
    assert_eq!(result.rows[0].get("bonus_line_ref"), Some(&SqlValue::Int(2)));
}

#[test]
fn nearest_earlier_wins_over_later() {
    let rows = vec![
        detail(1, "A", 10, "", None),
        detail(2, "A", 7, "", None),
        detail(3, "X", 1, "B", Some("A")),
        detail(4, "A", 2, "", None),
    ];
    let result = link(rows, &config());

    // Two earlier candidates exist; the nearest one (line 2) wins.
    assert_eq!(result.rows[2].get("bonus_line_ref"), Some(&SqlValue::Int(2)));
}

#[test]
fn orphan_gift_falls_back_to_line_one() {
    let rows = vec![
        detail(1, "A", 10, "", None),
        detail(2, "X", 1, "B", Some("ZZZ")),
    ];
    let result = link(rows, &config());

    assert_eq!(result.orphans, 1);
    assert_eq!(result.rows[1].get("bonus_line_ref"), Some(&SqlValue::Int(1)));
}

#[test]
fn non_null_reference_marks_bonus_even_without_indicator() {
    let rows = vec![
        detail(1, "A", 10, "", None),
        detail(2, "X", 2, "", Some("A")),
    ];
    let result = link(rows, &config());

    assert_eq!(result.tags[1], RowTag::Bonus);
    assert_eq!(result.rows[1].get("bonus_qty"), Some(&SqlValue::Int(2)));
}

#[test]
fn zero_quantity_rows_are_normal_but_rewritten_like_triggers() {
    let rows = vec![detail(1, "A", 0, "", None)];
    let result = link(rows, &config());

    assert_eq!(result.tags, vec![RowTag::Normal]);
    assert_eq!(result.rows[0].get("ordered_qty"), Some(&SqlValue::Int(0)));
    assert_eq!(result.rows[0].get("invoice_qty"), Some(&SqlValue::Int(0)));
}

#[test]
fn rows_are_sorted_by_line_number() {
    let rows = vec![
        detail(3, "X", 1, "B", Some("A")),
        detail(1, "A", 10, "", None),
        detail(2, "B", 5, "", None),
    ];
    let result = link(rows, &config());

    let lines: Vec<i64> = result
        .rows
        .iter()
        .map(|r| r.get_or_null("line").as_int().unwrap())
        .collect();
    assert_eq!(lines, vec![1, 2, 3]);
    // After the sort the gift still finds its earlier trigger.
    assert_eq!(result.rows[2].get("bonus_line_ref"), Some(&SqlValue::Int(1)));
}

#[test]
fn decimal_quantities_survive_rewrites() {
    let mut row = detail(1, "A", 0, "", None);
    row.set("qty", SqlValue::Decimal(Decimal::new(25, 1)));
    let result = link(vec![row], &config());

    assert_eq!(result.tags, vec![RowTag::Trigger]);
    assert_eq!(
        result.rows[0].get("ordered_qty"),
        Some(&SqlValue::Decimal(Decimal::new(25, 1)))
    );
}

#[test]
fn malformed_config_passes_rows_through() {
    let mut config = config();
    config.line_field = "no_such_field".to_owned();

    let rows = vec![
        detail(1, "A", 10, "", None),
        detail(2, "X", 1, "B", Some("A")),
    ];
    let result = link(rows.clone(), &config);

    assert_eq!(result.rows, rows, "rows must come back untouched");
    assert!(result.tags.iter().all(|t| *t == RowTag::Normal));
    assert_eq!(result.orphans, 0);
}

#[test]
fn empty_document_is_a_no_op() {
    let result = link(Vec::new(), &config());
    assert!(result.rows.is_empty());
    assert!(result.tags.is_empty());
}
