use std::collections::HashMap;
use std::path::Path;

use crate::error::{Result, SpendError};
use crate::models::{InputBatch, TransactionRecord};
use crate::settings::{Settings, SheetName};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Parse a money cell. Returns the value and whether the raw text needed
/// cleanup (currency symbol, separators, parentheses, or garbage).
pub fn parse_amount(raw: &str) -> (f64, bool) {
    let trimmed = raw.trim();
    if let Ok(v) = trimmed.parse::<f64>() {
        return (v, false);
    }
    let s: String = trimmed
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | '"') && !c.is_whitespace())
        .collect();
    if let Some(inner) = s.strip_prefix('(').and_then(|v| v.strip_suffix(')')) {
        return (-inner.parse::<f64>().unwrap_or(0.0), true);
    }
    (s.parse().unwrap_or(0.0), true)
}

fn is_spreadsheet(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| ["xlsx", "xlsm", "xls"].contains(&e.to_ascii_lowercase().as_str()))
}

// ---------------------------------------------------------------------------
// Tabular readers
// ---------------------------------------------------------------------------

/// Header row plus string cells, regardless of source format.
#[derive(Debug, Clone, Default)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn column_index(&self) -> HashMap<&str, usize> {
        let mut index = HashMap::new();
        for (i, h) in self.headers.iter().enumerate() {
            index.entry(h.as_str()).or_insert(i);
        }
        index
    }
}

pub fn read_table(path: &Path, sheet: Option<&SheetName>) -> Result<Table> {
    if is_spreadsheet(path) {
        read_xlsx_table(path, sheet)
    } else {
        read_csv_table(path)
    }
}

fn read_csv_table(path: &Path) -> Result<Table> {
    let file = std::fs::File::open(path)?;
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(std::io::BufReader::new(file));
    let headers: Vec<String> = rdr
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
        .collect();
    let mut rows: Vec<Vec<String>> = Vec::new();
    for result in rdr.records() {
        let record = result?;
        if record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(Table { headers, rows })
}

#[cfg(feature = "xlsx")]
fn cell_to_string(cell: &calamine::Data) -> String {
    use calamine::Data;
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

#[cfg(feature = "xlsx")]
fn read_xlsx_table(path: &Path, sheet: Option<&SheetName>) -> Result<Table> {
    use calamine::Reader;

    let mut workbook = calamine::open_workbook_auto(path)
        .map_err(|e| SpendError::Spreadsheet(format!("Failed to open {}: {e}", path.display())))?;
    let names = workbook.sheet_names().to_vec();
    let name = match sheet {
        Some(SheetName::Name(n)) => n.clone(),
        Some(SheetName::Index(i)) => names.get(*i).cloned().ok_or_else(|| {
            SpendError::Config(format!("Sheet index {i} out of range in {}", path.display()))
        })?,
        None => names.first().cloned().ok_or_else(|| {
            SpendError::Spreadsheet(format!("No sheets in {}", path.display()))
        })?,
    };
    let range = workbook
        .worksheet_range(&name)
        .map_err(|e| SpendError::Spreadsheet(format!("Failed to read sheet '{name}': {e}")))?;

    let mut iter = range.rows();
    let headers: Vec<String> = iter
        .next()
        .map(|row| row.iter().map(|c| cell_to_string(c).trim().to_string()).collect())
        .unwrap_or_default();
    let rows: Vec<Vec<String>> = iter
        .map(|row| row.iter().map(cell_to_string).collect::<Vec<_>>())
        .filter(|row| row.iter().any(|c| !c.trim().is_empty()))
        .collect();
    Ok(Table { headers, rows })
}

#[cfg(not(feature = "xlsx"))]
fn read_xlsx_table(path: &Path, _sheet: Option<&SheetName>) -> Result<Table> {
    Err(SpendError::Spreadsheet(format!(
        "{}: spreadsheet support not enabled (build with feature 'xlsx')",
        path.display()
    )))
}

// ---------------------------------------------------------------------------
// Record reader
// ---------------------------------------------------------------------------

pub fn records_from_table(table: &Table, settings: &Settings, source: &Path) -> Result<InputBatch> {
    if table.rows.is_empty() {
        return Err(SpendError::Config(format!(
            "Input file has 0 data rows: {}",
            source.display()
        )));
    }

    let cols = &settings.columns;
    let mut expected: Vec<(&str, &str)> = vec![
        ("category_source", cols.category_source.as_str()),
        ("supplier", cols.supplier.as_str()),
        ("amount", cols.amount.as_str()),
    ];
    for (key, col) in [
        ("description", &cols.description),
        ("line_of_service", &cols.line_of_service),
        ("cost_center", &cols.cost_center),
    ] {
        if let Some(c) = col {
            expected.push((key, c.as_str()));
        }
    }

    let index = table.column_index();
    let missing: Vec<String> = expected
        .iter()
        .filter(|(_, col)| !index.contains_key(col))
        .map(|(key, col)| format!("'{col}' (from columns.{key})"))
        .collect();
    if !missing.is_empty() {
        return Err(SpendError::Config(format!(
            "Columns not found in input: {}",
            missing.join(", ")
        )));
    }

    let mut passthrough_columns: Vec<String> = Vec::new();
    for col in &cols.passthrough {
        if col == &cols.supplier || passthrough_columns.contains(col) {
            continue;
        }
        if index.contains_key(col.as_str()) {
            passthrough_columns.push(col.clone());
        } else {
            tracing::debug!("Passthrough column '{col}' not in input, skipping");
        }
    }
    let passthrough_idx: Vec<usize> = passthrough_columns
        .iter()
        .map(|c| index[c.as_str()])
        .collect();

    let idx = |name: &str| index[name];
    let optional_idx = |col: &Option<String>| col.as_deref().map(|c| index[c]);
    let category_idx = idx(cols.category_source.as_str());
    let supplier_idx = idx(cols.supplier.as_str());
    let amount_idx = idx(cols.amount.as_str());
    let description_idx = optional_idx(&cols.description);
    let context_idx = optional_idx(&cols.line_of_service);
    let cost_center_idx = optional_idx(&cols.cost_center);

    let cell = |row: &[String], i: usize| row.get(i).cloned().unwrap_or_default();
    let optional_cell = |row: &[String], i: Option<usize>| i.map(|i| cell(row, i)).unwrap_or_default();

    let mut coerced_amounts = false;
    let records = table
        .rows
        .iter()
        .map(|row| {
            let (amount, coerced) = parse_amount(&cell(row, amount_idx));
            coerced_amounts |= coerced;
            TransactionRecord {
                category_source: cell(row, category_idx),
                supplier: cell(row, supplier_idx),
                description: optional_cell(row, description_idx),
                service_context: optional_cell(row, context_idx),
                cost_center: optional_cell(row, cost_center_idx),
                amount,
                passthrough: passthrough_idx.iter().map(|&i| cell(row, i)).collect(),
            }
        })
        .collect();

    Ok(InputBatch {
        passthrough_columns,
        records,
        coerced_amounts,
    })
}

pub fn load_records(settings: &Settings) -> Result<InputBatch> {
    let path = &settings.paths.input;
    let table = read_table(path, settings.sheet.as_ref())?;
    records_from_table(&table, settings, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reviewer::Thresholds;
    use crate::settings::{Columns, ResolvedPaths};
    use std::path::PathBuf;

    fn settings(description: Option<&str>, passthrough: &[&str]) -> Settings {
        Settings {
            client_name: "Test".to_string(),
            paths: ResolvedPaths {
                input: PathBuf::from("input.csv"),
                category_mapping: PathBuf::new(),
                taxonomy: PathBuf::new(),
                keyword_rules: PathBuf::new(),
                refinement_rules: PathBuf::new(),
                output_dir: PathBuf::new(),
                output_prefix: "test".to_string(),
            },
            columns: Columns {
                category_source: "Spend Category".to_string(),
                supplier: "Supplier".to_string(),
                amount: "Amount".to_string(),
                description: description.map(str::to_string),
                line_of_service: None,
                cost_center: None,
                passthrough: passthrough.iter().map(|s| s.to_string()).collect(),
            },
            thresholds: Thresholds::new(0.9, 0.7).unwrap(),
            code_pattern: None,
            sheet: None,
            aggregations: Vec::new(),
        }
    }

    fn write_csv(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("input.csv");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("1234.56"), (1234.56, false));
        assert_eq!(parse_amount("  -42.50  "), (-42.5, false));
        assert_eq!(parse_amount("1,234.56"), (1234.56, true));
        assert_eq!(parse_amount("$ 1,000"), (1000.0, true));
        assert_eq!(parse_amount("not_a_number"), (0.0, true));
    }

    #[test]
    fn test_parse_amount_parenthesized_negatives() {
        assert_eq!(parse_amount("(500.00)").0, -500.0);
        assert_eq!(parse_amount("($1,234.56)").0, -1234.56);
    }

    #[test]
    fn test_read_csv_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(
            dir.path(),
            "Spend Category,Supplier,Amount,Invoice,Memo\n\
             SC01,ACME CORP,\"$1,200.00\",INV-1,gloves\n\
             SC02,Globex,50,INV-2,\n",
        );
        let table = read_table(&path, None).unwrap();
        let batch = records_from_table(&table, &settings(Some("Memo"), &["Invoice"]), &path).unwrap();
        assert_eq!(batch.records.len(), 2);
        assert!(batch.coerced_amounts);
        assert_eq!(batch.passthrough_columns, vec!["Invoice"]);
        let first = &batch.records[0];
        assert_eq!(first.category_source, "SC01");
        assert_eq!(first.supplier, "ACME CORP");
        assert_eq!(first.amount, 1200.0);
        assert_eq!(first.description, "gloves");
        assert_eq!(first.passthrough, vec!["INV-1"]);
        assert_eq!(batch.records[1].description, "");
        assert_eq!(batch.records[1].service_context, "");
    }

    #[test]
    fn test_missing_columns_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path(), "Spend Category,Vendor,Amount\nSC01,ACME,1\n");
        let table = read_table(&path, None).unwrap();
        let err = records_from_table(&table, &settings(Some("Memo"), &[]), &path).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("'Supplier' (from columns.supplier)"));
        assert!(msg.contains("'Memo' (from columns.description)"));
    }

    #[test]
    fn test_empty_input_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path(), "Spend Category,Supplier,Amount\n");
        let table = read_table(&path, None).unwrap();
        let err = records_from_table(&table, &settings(None, &[]), &path).unwrap_err();
        assert!(err.to_string().contains("0 data rows"));
    }

    #[test]
    fn test_unknown_passthrough_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path(), "Spend Category,Supplier,Amount\nSC01,ACME,1\n");
        let table = read_table(&path, None).unwrap();
        let batch =
            records_from_table(&table, &settings(None, &["Supplier", "PO Number"]), &path).unwrap();
        assert!(batch.passthrough_columns.is_empty());
        assert!(!batch.coerced_amounts);
    }
}
