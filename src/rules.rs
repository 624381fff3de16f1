use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use regex::{Regex, RegexBuilder};
use serde_yaml::{Mapping, Value};

use crate::error::{Result, SpendError};
use crate::settings::ResolvedPaths;
use crate::taxonomy::TaxonomyIndex;

const DEFAULT_MAPPING_CONFIDENCE: f64 = 0.85;
const DEFAULT_KEYWORD_CONFIDENCE: f64 = 0.95;

/// Legacy scoping key, rewritten to `category_codes` before validation.
const LEGACY_SCOPE_KEY: &str = "sc_codes";
const SCOPE_KEY: &str = "category_codes";

// ---------------------------------------------------------------------------
// Compiled rule model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryMapping {
    pub display_name: String,
    pub taxonomy_key: String,
    pub confidence: f64,
    pub ambiguous: bool,
}

/// Supplier, context, and cost-center rules share one shape; only the text
/// field they match against differs.
#[derive(Debug, Clone)]
pub struct ScopedRule {
    /// `None` means the rule applies to every category code.
    pub scope: Option<BTreeSet<String>>,
    pub pattern: Regex,
    pub taxonomy_key: String,
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub struct OverrideRule {
    pub pattern: Regex,
    pub override_from_l1: BTreeSet<String>,
    pub taxonomy_key: String,
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub struct KeywordRule {
    pub pattern: Regex,
    pub taxonomy_key: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    pub mappings: HashMap<String, CategoryMapping>,
    pub supplier_rules: Vec<ScopedRule>,
    pub keyword_rules: Vec<KeywordRule>,
    pub context_rules: Vec<ScopedRule>,
    pub cost_center_rules: Vec<ScopedRule>,
    pub override_rules: Vec<OverrideRule>,
}

/// A taxonomy key referenced somewhere in the rule set.
#[derive(Debug, Clone, PartialEq)]
pub struct TaxonomyRef<'a> {
    pub source: String,
    pub key: &'a str,
}

impl RuleSet {
    pub fn ambiguous_count(&self) -> usize {
        self.mappings.values().filter(|m| m.ambiguous).count()
    }

    pub fn taxonomy_refs(&self) -> Vec<TaxonomyRef<'_>> {
        let mut refs = Vec::new();
        let mut codes: Vec<&String> = self.mappings.keys().collect();
        codes.sort();
        for code in codes {
            let mapping = &self.mappings[code];
            let source = if mapping.display_name.is_empty() {
                format!("category mapping '{code}'")
            } else {
                format!("category mapping '{code}' ({})", mapping.display_name)
            };
            refs.push(TaxonomyRef {
                source,
                key: &mapping.taxonomy_key,
            });
        }
        let scoped = [
            ("supplier_rules", &self.supplier_rules),
            ("context_rules", &self.context_rules),
            ("cost_center_rules", &self.cost_center_rules),
        ];
        for (section, rules) in scoped {
            for (i, rule) in rules.iter().enumerate() {
                refs.push(TaxonomyRef {
                    source: format!("{section}[{i}]"),
                    key: &rule.taxonomy_key,
                });
            }
        }
        for (i, rule) in self.keyword_rules.iter().enumerate() {
            refs.push(TaxonomyRef {
                source: format!("keyword_rules[{i}]"),
                key: &rule.taxonomy_key,
            });
        }
        for (i, rule) in self.override_rules.iter().enumerate() {
            refs.push(TaxonomyRef {
                source: format!("supplier_override_rules[{i}]"),
                key: &rule.taxonomy_key,
            });
        }
        refs
    }

    /// References whose key is absent from the taxonomy. Not fatal: such
    /// keys are still assigned but resolve to empty levels.
    pub fn unknown_taxonomy_refs(&self, taxonomy: &TaxonomyIndex) -> Vec<TaxonomyRef<'_>> {
        self.taxonomy_refs()
            .into_iter()
            .filter(|r| !taxonomy.contains(r.key))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Raw rule access
// ---------------------------------------------------------------------------

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

struct RawRule<'a> {
    section: &'a str,
    index: usize,
    map: Mapping,
}

impl<'a> RawRule<'a> {
    fn new(section: &'a str, index: usize, value: &Value) -> Result<Self> {
        let Value::Mapping(map) = value else {
            return Err(SpendError::InvalidRuleValue {
                section: section.to_string(),
                index,
                key: "<rule>".to_string(),
                reason: "rule must be a mapping".to_string(),
            });
        };
        let mut map = map.clone();
        if map.contains_key(LEGACY_SCOPE_KEY) && !map.contains_key(SCOPE_KEY) {
            if let Some(codes) = map.remove(LEGACY_SCOPE_KEY) {
                map.insert(Value::from(SCOPE_KEY), codes);
            }
        }
        Ok(Self { section, index, map })
    }

    fn invalid(&self, key: &str, reason: impl Into<String>) -> SpendError {
        SpendError::InvalidRuleValue {
            section: self.section.to_string(),
            index: self.index,
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    fn get(&self, key: &str) -> Option<&Value> {
        self.map.get(key).filter(|v| !v.is_null())
    }

    fn require_keys(&self, keys: &[&str]) -> Result<()> {
        for key in keys {
            if self.get(key).is_none() {
                return Err(SpendError::MissingRuleKey {
                    section: self.section.to_string(),
                    index: self.index,
                    key: key.to_string(),
                });
            }
        }
        Ok(())
    }

    fn string(&self, key: &str) -> Result<String> {
        let value = self.get(key).ok_or_else(|| self.invalid(key, "missing"))?;
        scalar_to_string(value).ok_or_else(|| self.invalid(key, "expected a string"))
    }

    fn f64_or(&self, key: &str, default: f64) -> Result<f64> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v.as_f64().ok_or_else(|| self.invalid(key, "expected a number")),
        }
    }

    fn string_set(&self, key: &str) -> Result<Option<BTreeSet<String>>> {
        let Some(value) = self.get(key) else {
            return Ok(None);
        };
        let items: Vec<&Value> = match value {
            Value::Sequence(seq) => seq.iter().collect(),
            other => vec![other],
        };
        items
            .into_iter()
            .map(|v| scalar_to_string(v).ok_or_else(|| self.invalid(key, "expected a list of strings")))
            .collect::<Result<BTreeSet<_>>>()
            .map(Some)
    }

    /// Patterns compile exactly as written; whitespace is significant.
    fn pattern(&self, key: &str) -> Result<Regex> {
        let pattern = match self.get(key) {
            Some(Value::String(s)) => s.clone(),
            _ => self.string(key)?,
        };
        RegexBuilder::new(&pattern)
            .case_insensitive(true)
            .build()
            .map_err(|source| SpendError::InvalidPattern {
                section: self.section.to_string(),
                index: self.index,
                pattern,
                source,
            })
    }
}

/// Rules of a section. `Ok(None)` when the section is absent.
fn section<'a>(doc: &'a Value, name: &str) -> Result<Option<&'a [Value]>> {
    match doc.get(name) {
        None => Ok(None),
        Some(Value::Null) => Ok(Some(&[])),
        Some(Value::Sequence(seq)) => Ok(Some(seq.as_slice())),
        Some(_) => Err(SpendError::Config(format!("Section '{name}' must be a list"))),
    }
}

fn required_section<'a>(doc: &'a Value, name: &str) -> Result<&'a [Value]> {
    section(doc, name)?
        .ok_or_else(|| SpendError::Config(format!("Missing required rule section: '{name}'")))
}

// ---------------------------------------------------------------------------
// Section parsers
// ---------------------------------------------------------------------------

fn parse_mappings(doc: &Value) -> Result<HashMap<String, CategoryMapping>> {
    let entries = match doc.get("mappings") {
        None | Some(Value::Null) => return Ok(HashMap::new()),
        Some(Value::Mapping(m)) => m,
        Some(_) => {
            return Err(SpendError::Config(
                "Category mapping 'mappings' must be a mapping of code to entry".to_string(),
            ))
        }
    };

    let mut mappings = HashMap::new();
    for (index, (code, info)) in entries.iter().enumerate() {
        let code = scalar_to_string(code).ok_or_else(|| {
            SpendError::Config(format!("mappings[{index}] has a non-scalar code"))
        })?;
        let rule = RawRule::new("mappings", index, info)?;
        rule.require_keys(&["taxonomy_key"])?;
        let ambiguous = match rule.get("ambiguous") {
            None => false,
            Some(v) => v.as_bool().ok_or_else(|| rule.invalid("ambiguous", "expected a boolean"))?,
        };
        let display_name = match rule.get("name") {
            None => String::new(),
            Some(_) => rule.string("name")?,
        };
        mappings.insert(
            code,
            CategoryMapping {
                display_name,
                taxonomy_key: rule.string("taxonomy_key")?,
                confidence: rule.f64_or("confidence", DEFAULT_MAPPING_CONFIDENCE)?,
                ambiguous,
            },
        );
    }
    Ok(mappings)
}

fn parse_keyword_rules(doc: &Value) -> Result<Vec<KeywordRule>> {
    let items = section(doc, "rules")?.unwrap_or(&[]);
    items
        .iter()
        .enumerate()
        .map(|(i, value)| {
            let rule = RawRule::new("keyword_rules", i, value)?;
            rule.require_keys(&["pattern", "category"])?;
            Ok(KeywordRule {
                pattern: rule.pattern("pattern")?,
                taxonomy_key: rule.string("category")?,
                confidence: rule.f64_or("confidence", DEFAULT_KEYWORD_CONFIDENCE)?,
            })
        })
        .collect()
}

fn parse_scoped_rules(items: &[Value], section: &str, pattern_key: &str) -> Result<Vec<ScopedRule>> {
    items
        .iter()
        .enumerate()
        .map(|(i, value)| {
            let rule = RawRule::new(section, i, value)?;
            rule.require_keys(&[pattern_key, "taxonomy_key", "confidence"])?;
            Ok(ScopedRule {
                scope: rule.string_set(SCOPE_KEY)?,
                pattern: rule.pattern(pattern_key)?,
                taxonomy_key: rule.string("taxonomy_key")?,
                confidence: rule.f64_or("confidence", 0.0)?,
            })
        })
        .collect()
}

fn parse_override_rules(items: &[Value]) -> Result<Vec<OverrideRule>> {
    items
        .iter()
        .enumerate()
        .map(|(i, value)| {
            let rule = RawRule::new("supplier_override_rules", i, value)?;
            rule.require_keys(&["supplier_pattern", "override_from_l1", "taxonomy_key", "confidence"])?;
            Ok(OverrideRule {
                pattern: rule.pattern("supplier_pattern")?,
                override_from_l1: rule.string_set("override_from_l1")?.unwrap_or_default(),
                taxonomy_key: rule.string("taxonomy_key")?,
                confidence: rule.f64_or("confidence", 0.0)?,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

fn parse_document(content: &str) -> Result<Value> {
    if content.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_yaml::from_str(content)?)
}

/// Raw, unvalidated rule documents as parsed YAML.
#[derive(Debug, Clone)]
pub struct RuleDocuments {
    pub mapping: Value,
    pub keywords: Value,
    pub refinement: Value,
}

impl RuleDocuments {
    pub fn from_yaml(mapping: &str, keywords: &str, refinement: &str) -> Result<Self> {
        Ok(Self {
            mapping: parse_document(mapping)?,
            keywords: parse_document(keywords)?,
            refinement: parse_document(refinement)?,
        })
    }

    pub fn read(paths: &ResolvedPaths) -> Result<Self> {
        let read = |p: &Path| std::fs::read_to_string(p);
        Self::from_yaml(
            &read(paths.category_mapping.as_path())?,
            &read(paths.keyword_rules.as_path())?,
            &read(paths.refinement_rules.as_path())?,
        )
    }
}

/// Validate and compile every rule. Fails on the first bad rule; nothing
/// is returned on failure.
pub fn load(docs: &RuleDocuments) -> Result<RuleSet> {
    let mappings = parse_mappings(&docs.mapping)?;
    let keyword_rules = parse_keyword_rules(&docs.keywords)?;

    let refinement = &docs.refinement;
    let supplier_rules = parse_scoped_rules(
        required_section(refinement, "supplier_rules")?,
        "supplier_rules",
        "supplier_pattern",
    )?;
    let context_rules = parse_scoped_rules(
        section(refinement, "context_rules")?.unwrap_or(&[]),
        "context_rules",
        "line_of_service_pattern",
    )?;
    let cost_center_rules = parse_scoped_rules(
        section(refinement, "cost_center_rules")?.unwrap_or(&[]),
        "cost_center_rules",
        "cost_center_pattern",
    )?;
    let override_rules = parse_override_rules(required_section(refinement, "supplier_override_rules")?)?;

    Ok(RuleSet {
        mappings,
        supplier_rules,
        keyword_rules,
        context_rules,
        cost_center_rules,
        override_rules,
    })
}

pub fn load_rule_files(paths: &ResolvedPaths) -> Result<RuleSet> {
    load(&RuleDocuments::read(paths)?)
}
