use std::collections::HashMap;
use std::path::Path;

use crate::error::{Result, SpendError};
use crate::importer::{read_table, Table};
use crate::models::TaxonomyLevels;

const KEY_COLUMN: &str = "Key";
const LEVEL_COLUMNS: [&str; 5] = [
    "CategoryLevel1",
    "CategoryLevel2",
    "CategoryLevel3",
    "CategoryLevel4",
    "CategoryLevel5",
];

/// Read-only lookup from taxonomy key to its five hierarchy levels.
#[derive(Debug, Clone, Default)]
pub struct TaxonomyIndex {
    entries: HashMap<String, TaxonomyLevels>,
    empty: TaxonomyLevels,
}

impl TaxonomyIndex {
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, TaxonomyLevels)>,
    {
        Self {
            entries: entries.into_iter().collect(),
            empty: TaxonomyLevels::default(),
        }
    }

    pub fn from_table(table: &Table) -> Result<Self> {
        let index = table.column_index();
        let key_idx = *index.get(KEY_COLUMN).ok_or_else(|| {
            SpendError::Config(format!("Taxonomy file has no '{KEY_COLUMN}' column"))
        })?;
        let level_idx: Vec<Option<usize>> = LEVEL_COLUMNS
            .iter()
            .map(|c| index.get(c).copied())
            .collect();

        let cell = |row: &[String], i: Option<usize>| {
            i.and_then(|i| row.get(i))
                .map(|v| v.trim().to_string())
                .unwrap_or_default()
        };

        let mut entries = HashMap::new();
        for row in &table.rows {
            let key = cell(row, Some(key_idx));
            if key.is_empty() {
                continue;
            }
            let levels = TaxonomyLevels {
                level1: cell(row, level_idx[0]),
                level2: cell(row, level_idx[1]),
                level3: cell(row, level_idx[2]),
                level4: cell(row, level_idx[3]),
                level5: cell(row, level_idx[4]),
            };
            entries.insert(key, levels);
        }
        Ok(Self {
            entries,
            empty: TaxonomyLevels::default(),
        })
    }

    /// Load from an XLSX (first sheet) or CSV reference file.
    pub fn load(path: &Path) -> Result<Self> {
        let table = read_table(path, None)?;
        Self::from_table(&table)
    }

    /// Unknown or absent keys resolve to all-empty levels.
    pub fn resolve(&self, key: Option<&str>) -> &TaxonomyLevels {
        key.and_then(|k| self.entries.get(k)).unwrap_or(&self.empty)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
