use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::models::ReviewTier;
use crate::reports::{self, ResultTable, RunSummary, SpendGroup, LEVEL_HEADERS};
use crate::settings::Settings;

/// `<output_dir>/<prefix>_<YYYYMMDD_HHMMSS>`
pub fn run_dir(output_dir: &Path, prefix: &str) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    output_dir.join(format!("{prefix}_{stamp}"))
}

fn write_rows<I, R>(path: &Path, headers: &[String], rows: I) -> Result<()>
where
    I: IntoIterator<Item = R>,
    R: IntoIterator,
    R::Item: AsRef<[u8]>,
{
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(headers)?;
    for row in rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_tier(dir: &Path, name: &str, table: &ResultTable, tier: ReviewTier) -> Result<Option<PathBuf>> {
    let rows = table.in_tier(tier);
    if rows.is_empty() {
        return Ok(None);
    }
    let path = dir.join(name);
    write_rows(&path, &table.headers, rows.iter().map(|&i| &table.rows[i]))?;
    Ok(Some(path))
}

/// Columns written after the group keys. Spend and count are always present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupDetail {
    Totals,
    Suppliers,
    Full,
}

fn write_groups(path: &Path, key_headers: &[&str], groups: &[SpendGroup], detail: GroupDetail) -> Result<()> {
    let suppliers = detail != GroupDetail::Totals;
    let confidence = detail == GroupDetail::Full;
    let mut headers: Vec<String> = key_headers.iter().map(|h| h.to_string()).collect();
    headers.push("TransactionCount".to_string());
    headers.push("TotalSpend".to_string());
    if suppliers {
        headers.push("UniqueSuppliers".to_string());
    }
    if confidence {
        headers.push("AvgConfidence".to_string());
    }
    let rows = groups.iter().map(|g| {
        let mut row = g.keys.clone();
        row.push(g.count.to_string());
        row.push(format!("{:.2}", g.total));
        if suppliers {
            row.push(g.unique_suppliers.to_string());
        }
        if confidence {
            row.push(format!("{:.3}", g.avg_confidence));
        }
        row
    });
    write_rows(path, &headers, rows)
}

/// Write every output file for one run into a fresh timestamped directory.
/// Returns the directory and the files written, in write order.
pub fn write_run(
    settings: &Settings,
    table: &ResultTable,
    summary: &RunSummary,
) -> Result<(PathBuf, Vec<PathBuf>)> {
    let dir = run_dir(&settings.paths.output_dir, &settings.paths.output_prefix);
    std::fs::create_dir_all(&dir)?;
    let mut written = Vec::new();

    let all = dir.join("all_results.csv");
    write_rows(&all, &table.headers, &table.rows)?;
    written.push(all);

    written.extend(write_tier(&dir, "manual_review.csv", table, ReviewTier::ManualReview)?);
    written.extend(write_tier(&dir, "quick_review.csv", table, ReviewTier::QuickReview)?);

    let summary_csv = dir.join("summary.csv");
    let metric_rows = reports::summary_rows(summary, &settings.columns);
    write_rows(
        &summary_csv,
        &["Metric".to_string(), "Value".to_string()],
        metric_rows.iter().map(|(m, v)| [m, v]),
    )?;
    written.push(summary_csv);

    let summary_json = dir.join("summary.json");
    std::fs::write(&summary_json, serde_json::to_string_pretty(summary)?)?;
    written.push(summary_json);

    let l1 = dir.join("spend_by_category_l1.csv");
    write_groups(&l1, &LEVEL_HEADERS[..1], &reports::spend_by_level(table, 1), GroupDetail::Full)?;
    written.push(l1);

    let l2 = dir.join("spend_by_category_l2.csv");
    write_groups(&l2, &LEVEL_HEADERS[..2], &reports::spend_by_level(table, 2), GroupDetail::Suppliers)?;
    written.push(l2);

    let mut used = HashSet::new();
    for aggregation in &settings.aggregations {
        let Some(groups) = reports::aggregate(table, aggregation) else {
            tracing::warn!(
                "Aggregation column '{}' not found, skipping '{}'",
                aggregation.column,
                aggregation.name
            );
            continue;
        };
        let path = dir.join(aggregation_file(&aggregation.name, &mut used));
        write_groups(&path, &[aggregation.column.as_str()], &groups, GroupDetail::Totals)?;
        written.push(path);
    }

    if !summary.unmapped_codes.is_empty() {
        let path = dir.join("unmapped_categories.csv");
        write_rows(
            &path,
            &["Category Code".to_string(), "Count".to_string()],
            summary
                .unmapped_codes
                .iter()
                .map(|c| [c.code.clone(), c.count.to_string()]),
        )?;
        written.push(path);
    }

    Ok((dir, written))
}

/// Aggregation names are free text; keep them filesystem-safe.
fn file_stem(name: &str) -> String {
    let stem: String = name
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c.to_ascii_lowercase() } else { '_' })
        .collect();
    if stem.is_empty() {
        "aggregation".to_string()
    } else {
        stem
    }
}

/// `agg_<stem>.csv`, with a numeric suffix when two names share a stem.
/// The prefix keeps aggregation files apart from the fixed outputs.
fn aggregation_file(name: &str, used: &mut HashSet<String>) -> String {
    let stem = file_stem(name);
    let mut file = format!("agg_{stem}.csv");
    let mut n = 2;
    while !used.insert(file.clone()) {
        file = format!("agg_{stem}_{n}.csv");
        n += 1;
    }
    file
}
