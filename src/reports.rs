use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::Serialize;

use crate::categorizer::{Classification, TierHits};
use crate::fmt::{count, count_pct, money};
use crate::models::{InputBatch, Method, ReviewTier};
use crate::settings::{Aggregation, Columns};

pub const UNCLASSIFIED: &str = "Unclassified";
pub const CATEGORY_SOURCE: &str = "Category Source";
pub const CATEGORY_CODE: &str = "Category Code";
pub const LEVEL_HEADERS: [&str; 5] = [
    "CategoryLevel1",
    "CategoryLevel2",
    "CategoryLevel3",
    "CategoryLevel4",
    "CategoryLevel5",
];

// ---------------------------------------------------------------------------
// Result table
// ---------------------------------------------------------------------------

/// Flat per-record output: input columns, codes, levels, and classification.
/// `amounts` and `confidences` keep the numeric values behind the text cells.
#[derive(Debug, Clone, Default)]
pub struct ResultTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub amounts: Vec<f64>,
    pub confidences: Vec<f64>,
    pub review_tiers: Vec<ReviewTier>,
    supplier_col: usize,
}

impl ResultTable {
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Row indices in the given review tier, in input order.
    pub fn in_tier(&self, tier: ReviewTier) -> Vec<usize> {
        self.review_tiers
            .iter()
            .enumerate()
            .filter_map(|(i, t)| (*t == tier).then_some(i))
            .collect()
    }
}

struct Column<'a> {
    header: String,
    value: Box<dyn Fn(usize) -> String + 'a>,
}

fn push_column<'a>(columns: &mut Vec<Column<'a>>, header: &str, value: impl Fn(usize) -> String + 'a) {
    if columns.iter().any(|c| c.header == header) {
        return;
    }
    columns.push(Column {
        header: header.to_string(),
        value: Box::new(value),
    });
}

pub fn build_result_table(
    batch: &InputBatch,
    codes: &[String],
    classification: &Classification,
    columns: &Columns,
) -> ResultTable {
    let records = &batch.records;
    let results = &classification.results;
    let mut cols: Vec<Column> = Vec::new();

    push_column(&mut cols, &columns.supplier, |i| records[i].supplier.clone());
    for (p, name) in batch.passthrough_columns.iter().enumerate() {
        push_column(&mut cols, name, move |i| {
            records[i].passthrough.get(p).cloned().unwrap_or_default()
        });
    }
    if let Some(name) = &columns.description {
        push_column(&mut cols, name, |i| records[i].description.clone());
    }
    push_column(&mut cols, CATEGORY_SOURCE, |i| records[i].category_source.clone());
    push_column(&mut cols, CATEGORY_CODE, |i| codes[i].clone());
    if let Some(name) = &columns.cost_center {
        push_column(&mut cols, name, |i| records[i].cost_center.clone());
    }
    if let Some(name) = &columns.line_of_service {
        push_column(&mut cols, name, |i| records[i].service_context.clone());
    }
    push_column(&mut cols, &columns.amount, |i| format!("{:.2}", records[i].amount));
    for (level, header) in LEVEL_HEADERS.iter().enumerate() {
        push_column(&mut cols, header, move |i| {
            results[i].levels.as_array()[level].to_string()
        });
    }
    push_column(&mut cols, "TaxonomyKey", |i| {
        results[i]
            .taxonomy_key
            .clone()
            .unwrap_or_else(|| UNCLASSIFIED.to_string())
    });
    push_column(&mut cols, "ClassificationMethod", |i| {
        results[i].method.key().to_string()
    });
    push_column(&mut cols, "Confidence", |i| format!("{:.3}", results[i].confidence));
    push_column(&mut cols, "ReviewTier", |i| {
        results[i].review_tier.label().to_string()
    });

    let rows: Vec<Vec<String>> = (0..records.len())
        .map(|i| cols.iter().map(|c| (c.value)(i)).collect())
        .collect();
    let headers: Vec<String> = cols.into_iter().map(|c| c.header).collect();

    ResultTable {
        supplier_col: headers.iter().position(|h| h == &columns.supplier).unwrap_or(0),
        headers,
        rows,
        amounts: records.iter().map(|r| r.amount).collect(),
        confidences: results.iter().map(|r| round3(r.confidence)).collect(),
        review_tiers: results.iter().map(|r| r.review_tier).collect(),
    }
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct MethodCount {
    pub method: Method,
    pub label: &'static str,
    pub count: usize,
    pub pct: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TierCount {
    pub tier: &'static str,
    pub count: usize,
    pub pct: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CodeCount {
    pub code: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub client: String,
    pub total_transactions: usize,
    pub unique_suppliers: usize,
    pub unique_category_codes: usize,
    /// Only methods that classified at least one record, in tier order.
    pub methods: Vec<MethodCount>,
    pub review_tiers: Vec<TierCount>,
    pub tier_hits: TierHits,
    pub total_amount: f64,
    pub average_amount: f64,
    pub unmapped_codes: Vec<CodeCount>,
}

pub fn summarize(
    client: &str,
    batch: &InputBatch,
    codes: &[String],
    classification: &Classification,
) -> RunSummary {
    let results = &classification.results;
    let total = results.len();

    let mut method_counts: BTreeMap<Method, usize> = BTreeMap::new();
    let mut tier_counts: BTreeMap<ReviewTier, usize> = BTreeMap::new();
    for r in results {
        *method_counts.entry(r.method).or_default() += 1;
        *tier_counts.entry(r.review_tier).or_default() += 1;
    }

    let methods = Method::ALL
        .iter()
        .filter_map(|m| {
            let n = method_counts.get(m).copied().unwrap_or(0);
            (n > 0).then(|| MethodCount {
                method: *m,
                label: m.label(),
                count: n,
                pct: crate::fmt::pct(n, total),
            })
        })
        .collect();
    let review_tiers = ReviewTier::ALL
        .iter()
        .map(|t| {
            let n = tier_counts.get(t).copied().unwrap_or(0);
            TierCount {
                tier: t.label(),
                count: n,
                pct: crate::fmt::pct(n, total),
            }
        })
        .collect();

    let total_amount: f64 = batch.records.iter().map(|r| r.amount).sum();
    RunSummary {
        client: client.to_string(),
        total_transactions: total,
        unique_suppliers: batch
            .records
            .iter()
            .map(|r| r.supplier.as_str())
            .collect::<HashSet<_>>()
            .len(),
        unique_category_codes: codes.iter().collect::<HashSet<_>>().len(),
        methods,
        review_tiers,
        tier_hits: classification.hits,
        total_amount,
        average_amount: if total == 0 { 0.0 } else { total_amount / total as f64 },
        unmapped_codes: classification
            .unmapped_codes
            .iter()
            .map(|(code, count)| CodeCount {
                code: code.clone(),
                count: *count,
            })
            .collect(),
    }
}

/// Metric/Value rows for the summary sheet.
pub fn summary_rows(summary: &RunSummary, columns: &Columns) -> Vec<(String, String)> {
    let total = summary.total_transactions;
    let mut rows = vec![
        ("Total Transactions".to_string(), count(total)),
        (format!("Unique {}s", columns.supplier), count(summary.unique_suppliers)),
        ("Unique Category Codes".to_string(), count(summary.unique_category_codes)),
        ("--- Classification Methods ---".to_string(), String::new()),
    ];
    for m in &summary.methods {
        rows.push((m.label.to_string(), count_pct(m.count, total)));
    }
    rows.push(("--- Review Tiers ---".to_string(), String::new()));
    for t in &summary.review_tiers {
        rows.push((t.tier.to_string(), count_pct(t.count, total)));
    }
    rows.push(("--- Financial ---".to_string(), String::new()));
    rows.push((format!("Total {}", columns.amount), money(summary.total_amount)));
    rows.push((format!("Average {}", columns.amount), money(summary.average_amount)));
    rows
}

// ---------------------------------------------------------------------------
// Spend breakdowns
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpendGroup {
    pub keys: Vec<String>,
    pub count: usize,
    pub total: f64,
    pub unique_suppliers: usize,
    pub avg_confidence: f64,
}

#[derive(Default)]
struct Acc<'a> {
    count: usize,
    total: f64,
    confidence: f64,
    suppliers: BTreeSet<&'a str>,
}

/// Group rows by the given columns; sorted by total spend descending.
/// Ties keep key order.
pub fn spend_by(table: &ResultTable, group_cols: &[usize]) -> Vec<SpendGroup> {
    let mut groups: BTreeMap<Vec<&str>, Acc> = BTreeMap::new();
    for (i, row) in table.rows.iter().enumerate() {
        let key: Vec<&str> = group_cols.iter().map(|&c| row[c].as_str()).collect();
        let acc = groups.entry(key).or_default();
        acc.count += 1;
        acc.total += table.amounts[i];
        acc.confidence += table.confidences[i];
        acc.suppliers.insert(row[table.supplier_col].as_str());
    }
    let mut out: Vec<SpendGroup> = groups
        .into_iter()
        .map(|(keys, acc)| SpendGroup {
            keys: keys.into_iter().map(str::to_string).collect(),
            count: acc.count,
            total: acc.total,
            unique_suppliers: acc.suppliers.len(),
            avg_confidence: round3(acc.confidence / acc.count as f64),
        })
        .collect();
    out.sort_by(|a, b| b.total.total_cmp(&a.total));
    out
}

pub fn spend_by_level(table: &ResultTable, depth: usize) -> Vec<SpendGroup> {
    let cols: Vec<usize> = LEVEL_HEADERS[..depth]
        .iter()
        .filter_map(|h| table.column(h))
        .collect();
    spend_by(table, &cols)
}

/// `None` when the aggregation names a column the output does not have.
pub fn aggregate(table: &ResultTable, aggregation: &Aggregation) -> Option<Vec<SpendGroup>> {
    let col = table.column(&aggregation.column)?;
    let mut groups = spend_by(table, &[col]);
    if let Some(n) = aggregation.top_n {
        groups.truncate(n);
    }
    Some(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::categorizer::TierHits;
    use crate::models::{ClassificationResult, TaxonomyLevels, TransactionRecord};

    fn columns() -> Columns {
        Columns {
            category_source: "Spend Category".to_string(),
            supplier: "Supplier".to_string(),
            amount: "Amount".to_string(),
            description: Some("Memo".to_string()),
            line_of_service: None,
            cost_center: Some("Cost Center".to_string()),
            passthrough: vec!["Invoice".to_string()],
        }
    }

    fn record(supplier: &str, code: &str, amount: f64, cc: &str) -> TransactionRecord {
        TransactionRecord {
            category_source: format!("{code} Desc"),
            supplier: supplier.to_string(),
            description: "memo".to_string(),
            cost_center: cc.to_string(),
            amount,
            passthrough: vec![format!("INV-{supplier}")],
            ..Default::default()
        }
    }

    fn result(key: Option<&str>, l1: &str, method: Method, confidence: f64, tier: ReviewTier) -> ClassificationResult {
        ClassificationResult {
            taxonomy_key: key.map(str::to_string),
            method,
            confidence,
            review_tier: tier,
            levels: TaxonomyLevels {
                level1: l1.to_string(),
                level2: format!("{l1} Sub"),
                ..Default::default()
            },
        }
    }

    fn fixture() -> (InputBatch, Vec<String>, Classification) {
        let batch = InputBatch {
            passthrough_columns: vec!["Invoice".to_string()],
            records: vec![
                record("Acme", "SC1", 100.0, "CC1"),
                record("Acme", "SC1", 50.0, "CC2"),
                record("Globex", "SC2", 300.0, "CC1"),
                record("Initech", "SC9", 25.5, "CC1"),
            ],
            coerced_amounts: false,
        };
        let codes = vec!["SC1".to_string(), "SC1".to_string(), "SC2".to_string(), "SC9".to_string()];
        let classification = Classification {
            results: vec![
                result(Some("Fac>Clean"), "Facilities", Method::CategoryMapping, 0.95, ReviewTier::AutoAccept),
                result(Some("Fac>Clean"), "Facilities", Method::CategoryMapping, 0.85, ReviewTier::QuickReview),
                result(Some("Med>Lab"), "Medical", Method::SupplierRefinement, 0.9, ReviewTier::QuickReview),
                result(None, "", Method::Unmapped, 0.0, ReviewTier::ManualReview),
            ],
            hits: TierHits {
                counts: [2, 1, 0, 0, 0, 0, 0],
                unmapped: 1,
            },
            unmapped_codes: vec![("SC9".to_string(), 1)],
        };
        (batch, codes, classification)
    }

    #[test]
    fn test_result_table_columns_in_order() {
        let (batch, codes, classification) = fixture();
        let table = build_result_table(&batch, &codes, &classification, &columns());
        assert_eq!(
            table.headers,
            vec![
                "Supplier",
                "Invoice",
                "Memo",
                "Category Source",
                "Category Code",
                "Cost Center",
                "Amount",
                "CategoryLevel1",
                "CategoryLevel2",
                "CategoryLevel3",
                "CategoryLevel4",
                "CategoryLevel5",
                "TaxonomyKey",
                "ClassificationMethod",
                "Confidence",
                "ReviewTier",
            ]
        );
        let unmapped = &table.rows[3];
        assert_eq!(unmapped[table.column("TaxonomyKey").unwrap()], "Unclassified");
        assert_eq!(unmapped[table.column("ClassificationMethod").unwrap()], "unmapped");
        assert_eq!(unmapped[table.column("Confidence").unwrap()], "0.000");
        assert_eq!(unmapped[table.column("ReviewTier").unwrap()], "Manual Review");
        assert_eq!(table.rows[0][table.column("Category Code").unwrap()], "SC1");
        assert_eq!(table.rows[0][1], "INV-Acme");
        assert_eq!(table.in_tier(ReviewTier::QuickReview), vec![1, 2]);
    }

    #[test]
    fn test_summary_counts() {
        let (batch, codes, classification) = fixture();
        let summary = summarize("Client", &batch, &codes, &classification);
        assert_eq!(summary.total_transactions, 4);
        assert_eq!(summary.unique_suppliers, 3);
        assert_eq!(summary.unique_category_codes, 3);
        let methods: Vec<Method> = summary.methods.iter().map(|m| m.method).collect();
        assert_eq!(
            methods,
            vec![Method::CategoryMapping, Method::SupplierRefinement, Method::Unmapped]
        );
        assert_eq!(summary.review_tiers[1].count, 2);
        assert!((summary.total_amount - 475.5).abs() < 1e-9);

        let rows = summary_rows(&summary, &columns());
        assert_eq!(rows[0], ("Total Transactions".to_string(), "4".to_string()));
        assert_eq!(rows[1].0, "Unique Suppliers");
        assert!(rows.contains(&("Category Mapping (direct)".to_string(), "2 (50.0%)".to_string())));
        assert!(rows.contains(&("Total Amount".to_string(), "$475.50".to_string())));
    }

    #[test]
    fn test_spend_by_level_sorted_by_total() {
        let (batch, codes, classification) = fixture();
        let table = build_result_table(&batch, &codes, &classification, &columns());
        let l1 = spend_by_level(&table, 1);
        assert_eq!(l1[0].keys, vec!["Medical"]);
        assert_eq!(l1[1].keys, vec!["Facilities"]);
        assert_eq!(l1[1].count, 2);
        assert_eq!(l1[1].unique_suppliers, 1);
        assert!((l1[1].avg_confidence - 0.9).abs() < 1e-9);
        assert_eq!(l1[2].keys, vec![""]);

        let l2 = spend_by_level(&table, 2);
        assert_eq!(l2[0].keys, vec!["Medical", "Medical Sub"]);
    }

    #[test]
    fn test_aggregate_any_output_column() {
        let (batch, codes, classification) = fixture();
        let table = build_result_table(&batch, &codes, &classification, &columns());
        let by_cc = aggregate(
            &table,
            &Aggregation {
                name: "By CC".to_string(),
                column: "Cost Center".to_string(),
                top_n: Some(1),
            },
        )
        .unwrap();
        assert_eq!(by_cc.len(), 1);
        assert_eq!(by_cc[0].keys, vec!["CC1"]);
        assert_eq!(by_cc[0].count, 3);

        let missing = Aggregation {
            name: "Nope".to_string(),
            column: "Region".to_string(),
            top_n: None,
        };
        assert!(aggregate(&table, &missing).is_none());
    }
}
