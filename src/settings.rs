use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::categorizer::Fields;
use crate::error::{Result, SpendError};
use crate::reviewer::Thresholds;

/// Legacy config keys, renamed in place when the canonical key is absent.
const ALIASES: &[(&str, &str, &str)] = &[
    ("paths", "sc_mapping", "category_mapping"),
    ("columns", "spend_category", "category_source"),
    ("columns", "line_memo", "description"),
    ("classification", "sc_code_pattern", "category_code_pattern"),
];

const REQUIRED_SECTIONS: &[&str] = &["client", "paths", "columns", "classification"];
const REQUIRED_PATHS: &[&str] = &[
    "input",
    "category_mapping",
    "taxonomy",
    "keyword_rules",
    "refinement_rules",
    "output_dir",
    "output_prefix",
];
const REQUIRED_COLUMNS: &[&str] = &["category_source", "supplier", "amount"];
const REQUIRED_CLASSIFICATION: &[&str] = &["confidence_high", "confidence_medium"];

#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    client: ClientSection,
    paths: PathsSection,
    columns: Columns,
    classification: ClassificationSection,
    #[serde(default)]
    input_format: InputFormat,
    #[serde(default)]
    aggregations: Vec<Aggregation>,
}

#[derive(Debug, Clone, Deserialize)]
struct ClientSection {
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct PathsSection {
    input: String,
    category_mapping: String,
    taxonomy: String,
    keyword_rules: String,
    refinement_rules: String,
    output_dir: String,
    output_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ClassificationSection {
    confidence_high: f64,
    confidence_medium: f64,
    #[serde(default)]
    category_code_pattern: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct InputFormat {
    #[serde(default)]
    sheet_name: Option<SheetName>,
}

/// Input column names. Optional columns are `None` when not configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Columns {
    pub category_source: String,
    pub supplier: String,
    pub amount: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub line_of_service: Option<String>,
    #[serde(default)]
    pub cost_center: Option<String>,
    #[serde(default)]
    pub passthrough: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SheetName {
    Index(usize),
    Name(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Aggregation {
    pub name: String,
    pub column: String,
    #[serde(default)]
    pub top_n: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub input: PathBuf,
    pub category_mapping: PathBuf,
    pub taxonomy: PathBuf,
    pub keyword_rules: PathBuf,
    pub refinement_rules: PathBuf,
    pub output_dir: PathBuf,
    pub output_prefix: String,
}

#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub input: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
}

/// Run configuration, built once at startup and passed by reference.
#[derive(Debug, Clone)]
pub struct Settings {
    pub client_name: String,
    pub paths: ResolvedPaths,
    pub columns: Columns,
    pub thresholds: Thresholds,
    pub code_pattern: Option<Regex>,
    pub sheet: Option<SheetName>,
    pub aggregations: Vec<Aggregation>,
}

impl Settings {
    pub fn fields(&self) -> Fields {
        Fields {
            description: self.columns.description.is_some(),
            service_context: self.columns.line_of_service.is_some(),
            cost_center: self.columns.cost_center.is_some(),
        }
    }
}

/// Rename legacy keys. Returns one deprecation message per rename.
fn apply_aliases(raw: &mut Mapping) -> Vec<String> {
    let mut warnings = Vec::new();
    for (section, old_key, new_key) in ALIASES {
        let Some(Value::Mapping(section_map)) = raw.get_mut(*section) else {
            continue;
        };
        if section_map.contains_key(*old_key) && !section_map.contains_key(*new_key) {
            if let Some(value) = section_map.remove(*old_key) {
                section_map.insert(Value::from(*new_key), value);
                warnings.push(format!(
                    "'{section}.{old_key}' renamed to '{section}.{new_key}'. Update your config."
                ));
            }
        }
    }
    warnings
}

fn has_value(section: &Mapping, key: &str) -> bool {
    section.get(key).is_some_and(|v| !v.is_null())
}

fn check_required(raw: &Mapping) -> Result<()> {
    for section in REQUIRED_SECTIONS {
        if !raw.contains_key(*section) {
            return Err(SpendError::Config(format!(
                "Missing required config section: '{section}'"
            )));
        }
    }
    let checks: [(&str, &[&str], &str); 3] = [
        ("paths", REQUIRED_PATHS, "Missing required path"),
        ("columns", REQUIRED_COLUMNS, "Missing required column mapping"),
        (
            "classification",
            REQUIRED_CLASSIFICATION,
            "Missing required classification param",
        ),
    ];
    for (section, keys, message) in checks {
        let empty = Mapping::new();
        let map = raw.get(section).and_then(Value::as_mapping).unwrap_or(&empty);
        for key in keys {
            if !has_value(map, key) {
                return Err(SpendError::Config(format!("{message}: '{section}.{key}'")));
            }
        }
    }
    Ok(())
}

pub fn shellexpand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest.trim_start_matches(['/', '\\']));
        }
    }
    PathBuf::from(path)
}

fn absolute(path: PathBuf) -> PathBuf {
    std::fs::canonicalize(&path).unwrap_or(path)
}

fn compile_code_pattern(pattern: &str) -> Result<Regex> {
    let re = Regex::new(pattern).map_err(|e| {
        SpendError::Config(format!(
            "Invalid classification.category_code_pattern '{pattern}': {e}"
        ))
    })?;
    if re.captures_len() < 2 {
        return Err(SpendError::Config(format!(
            "classification.category_code_pattern '{pattern}' must contain a capture group"
        )));
    }
    Ok(re)
}

/// Parse config YAML text. `base_dir` anchors relative paths.
pub fn parse_settings(content: &str, base_dir: &Path, overrides: &Overrides) -> Result<Settings> {
    let mut raw: Mapping = match serde_yaml::from_str::<Value>(content)? {
        Value::Mapping(m) => m,
        Value::Null => Mapping::new(),
        _ => {
            return Err(SpendError::Config(
                "Config file must be a YAML mapping".to_string(),
            ))
        }
    };

    for warning in apply_aliases(&mut raw) {
        tracing::warn!("DEPRECATION: {warning}");
    }
    check_required(&raw)?;

    let file: ConfigFile = serde_yaml::from_value(Value::Mapping(raw))?;
    let thresholds = Thresholds::new(
        file.classification.confidence_high,
        file.classification.confidence_medium,
    )?;
    let code_pattern = file
        .classification
        .category_code_pattern
        .as_deref()
        .map(compile_code_pattern)
        .transpose()?;

    let resolve = |p: &str| absolute(base_dir.join(shellexpand_path(p)));
    let paths = ResolvedPaths {
        input: overrides
            .input
            .clone()
            .map(absolute)
            .unwrap_or_else(|| resolve(&file.paths.input)),
        category_mapping: resolve(&file.paths.category_mapping),
        taxonomy: resolve(&file.paths.taxonomy),
        keyword_rules: resolve(&file.paths.keyword_rules),
        refinement_rules: resolve(&file.paths.refinement_rules),
        output_dir: overrides
            .output_dir
            .clone()
            .unwrap_or_else(|| base_dir.join(shellexpand_path(&file.paths.output_dir))),
        output_prefix: file.paths.output_prefix,
    };

    let inputs = [
        ("input", &paths.input),
        ("category_mapping", &paths.category_mapping),
        ("taxonomy", &paths.taxonomy),
        ("keyword_rules", &paths.keyword_rules),
        ("refinement_rules", &paths.refinement_rules),
    ];
    for (key, path) in inputs {
        if !path.exists() {
            return Err(SpendError::Config(format!(
                "File not found: {} (from paths.{key})",
                path.display()
            )));
        }
    }

    Ok(Settings {
        client_name: file.client.name,
        paths,
        columns: file.columns,
        thresholds,
        code_pattern,
        sheet: file.input_format.sheet_name,
        aggregations: file.aggregations,
    })
}

pub fn load_settings(config_path: &Path, overrides: &Overrides) -> Result<Settings> {
    let config_path = absolute(config_path.to_path_buf());
    if !config_path.exists() {
        return Err(SpendError::Config(format!(
            "Config file not found: {}",
            config_path.display()
        )));
    }
    let content = std::fs::read_to_string(&config_path)?;
    let base_dir = config_path.parent().unwrap_or(Path::new("."));
    parse_settings(&content, base_dir, overrides)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch_inputs(dir: &Path) {
        for name in [
            "input.csv",
            "mapping.yaml",
            "taxonomy.csv",
            "keywords.yaml",
            "refinement.yaml",
        ] {
            std::fs::write(dir.join(name), "").unwrap();
        }
    }

    const CONFIG: &str = "\
client:
  name: Test Hospital
paths:
  input: input.csv
  category_mapping: mapping.yaml
  taxonomy: taxonomy.csv
  keyword_rules: keywords.yaml
  refinement_rules: refinement.yaml
  output_dir: out
  output_prefix: test
columns:
  category_source: Spend Category
  supplier: Supplier
  amount: Amount
classification:
  confidence_high: 0.9
  confidence_medium: 0.7
";

    #[test]
    fn test_parse_minimal_config() {
        let dir = tempfile::tempdir().unwrap();
        touch_inputs(dir.path());
        let s = parse_settings(CONFIG, dir.path(), &Overrides::default()).unwrap();
        assert_eq!(s.client_name, "Test Hospital");
        assert_eq!(s.columns.supplier, "Supplier");
        assert!(s.columns.description.is_none());
        assert!(s.code_pattern.is_none());
        assert!(s.paths.input.ends_with("input.csv"));
        assert!(s.paths.output_dir.ends_with("out"));
        assert_eq!(s.paths.output_prefix, "test");
        let fields = s.fields();
        assert!(!fields.description && !fields.service_context && !fields.cost_center);
    }

    #[test]
    fn test_legacy_keys_are_renamed() {
        let dir = tempfile::tempdir().unwrap();
        touch_inputs(dir.path());
        let legacy = CONFIG
            .replace("category_mapping:", "sc_mapping:")
            .replace("category_source:", "spend_category:")
            .replace(
                "  amount: Amount\n",
                "  amount: Amount\n  line_memo: Memo\n",
            )
            .replace(
                "  confidence_medium: 0.7\n",
                "  confidence_medium: 0.7\n  sc_code_pattern: '^(\\w+)'\n",
            );
        let s = parse_settings(&legacy, dir.path(), &Overrides::default()).unwrap();
        assert_eq!(s.columns.category_source, "Spend Category");
        assert_eq!(s.columns.description.as_deref(), Some("Memo"));
        assert!(s.paths.category_mapping.ends_with("mapping.yaml"));
        assert!(s.code_pattern.is_some());
    }

    #[test]
    fn test_canonical_key_wins_over_legacy() {
        let mut raw: Mapping = serde_yaml::from_str(
            "columns:\n  spend_category: Old\n  category_source: New\n",
        )
        .unwrap();
        let warnings = apply_aliases(&mut raw);
        assert!(warnings.is_empty());
        let cols = raw.get("columns").and_then(Value::as_mapping).unwrap();
        assert_eq!(cols.get("category_source").and_then(Value::as_str), Some("New"));
    }

    #[test]
    fn test_missing_section_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = parse_settings("client:\n  name: x\n", dir.path(), &Overrides::default())
            .unwrap_err();
        assert!(err.to_string().contains("Missing required config section: 'paths'"));
    }

    #[test]
    fn test_missing_column_is_error() {
        let dir = tempfile::tempdir().unwrap();
        touch_inputs(dir.path());
        let config = CONFIG.replace("  supplier: Supplier\n", "");
        let err = parse_settings(&config, dir.path(), &Overrides::default()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Missing required column mapping: 'columns.supplier'"
        );
    }

    #[test]
    fn test_thresholds_must_be_ordered() {
        let dir = tempfile::tempdir().unwrap();
        touch_inputs(dir.path());
        let config = CONFIG.replace("confidence_medium: 0.7", "confidence_medium: 0.95");
        assert!(parse_settings(&config, dir.path(), &Overrides::default()).is_err());
    }

    #[test]
    fn test_missing_input_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = parse_settings(CONFIG, dir.path(), &Overrides::default()).unwrap_err();
        assert!(err.to_string().contains("from paths.input"));
    }

    #[test]
    fn test_overrides_replace_paths() {
        let dir = tempfile::tempdir().unwrap();
        touch_inputs(dir.path());
        let other = dir.path().join("other.csv");
        std::fs::write(&other, "").unwrap();
        let overrides = Overrides {
            input: Some(other.clone()),
            output_dir: Some(PathBuf::from("/tmp/elsewhere")),
        };
        let s = parse_settings(CONFIG, dir.path(), &overrides).unwrap();
        assert!(s.paths.input.ends_with("other.csv"));
        assert_eq!(s.paths.output_dir, PathBuf::from("/tmp/elsewhere"));
    }

    #[test]
    fn test_code_pattern_requires_capture_group() {
        let dir = tempfile::tempdir().unwrap();
        touch_inputs(dir.path());
        let config = format!("{CONFIG}  category_code_pattern: '^SC\\d+'\n");
        let err = parse_settings(&config, dir.path(), &Overrides::default()).unwrap_err();
        assert!(err.to_string().contains("capture group"));
    }

    #[test]
    fn test_sheet_name_accepts_index_or_name() {
        let dir = tempfile::tempdir().unwrap();
        touch_inputs(dir.path());
        let by_name = format!("{CONFIG}input_format:\n  sheet_name: Data\n");
        let s = parse_settings(&by_name, dir.path(), &Overrides::default()).unwrap();
        assert_eq!(s.sheet, Some(SheetName::Name("Data".to_string())));
        let by_index = format!("{CONFIG}input_format:\n  sheet_name: 2\n");
        let s = parse_settings(&by_index, dir.path(), &Overrides::default()).unwrap();
        assert_eq!(s.sheet, Some(SheetName::Index(2)));
    }
}
