use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::rules::{RuleSet, ScopedRule};
use crate::taxonomy::TaxonomyIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditReport {
    pub findings: Vec<Finding>,
}

impl AuditReport {
    fn error(&mut self, message: String) {
        self.findings.push(Finding {
            severity: Severity::Error,
            message,
        });
    }

    fn warning(&mut self, message: String) {
        self.findings.push(Finding {
            severity: Severity::Warning,
            message,
        });
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.findings.iter().filter(|f| f.severity == severity).count()
    }

    pub fn has_errors(&self) -> bool {
        self.count(Severity::Error) > 0
    }
}

/// Lint a loaded rule set against the taxonomy and its own category mapping.
/// Nothing is classified.
pub fn audit(rules: &RuleSet, taxonomy: &TaxonomyIndex) -> AuditReport {
    let mut report = AuditReport::default();

    for r in rules.unknown_taxonomy_refs(taxonomy) {
        report.error(format!("{} unknown taxonomy key: '{}'", r.source, r.key));
    }

    let scoped = [
        ("supplier_rules", &rules.supplier_rules),
        ("context_rules", &rules.context_rules),
        ("cost_center_rules", &rules.cost_center_rules),
    ];
    for (section, list) in scoped {
        for (i, rule) in list.iter().enumerate() {
            for code in rule.scope.iter().flatten() {
                if !rules.mappings.contains_key(code) {
                    report.error(format!("{section}[{i}] unknown category code: '{code}'"));
                }
            }
            check_confidence(&mut report, section, i, rule.confidence);
        }
    }
    for (i, rule) in rules.keyword_rules.iter().enumerate() {
        check_confidence(&mut report, "keyword_rules", i, rule.confidence);
    }
    for (i, rule) in rules.override_rules.iter().enumerate() {
        check_confidence(&mut report, "supplier_override_rules", i, rule.confidence);
    }

    duplicate_patterns(&mut report, &rules.supplier_rules);
    overlapping_patterns(&mut report, &rules.supplier_rules);

    report
}

fn check_confidence(report: &mut AuditReport, section: &str, index: usize, confidence: f64) {
    if !(confidence > 0.0 && confidence <= 1.0) {
        report.error(format!("{section}[{index}] confidence {confidence} out of range"));
    }
}

const ANY_CODE: &str = "*";

fn scope_codes(rule: &ScopedRule) -> BTreeSet<&str> {
    match &rule.scope {
        Some(codes) => codes.iter().map(String::as_str).collect(),
        None => BTreeSet::from([ANY_CODE]),
    }
}

fn shared_codes<'a>(a: &BTreeSet<&'a str>, b: &BTreeSet<&'a str>) -> BTreeSet<&'a str> {
    if a.contains(ANY_CODE) {
        return b.clone();
    }
    if b.contains(ANY_CODE) {
        return a.clone();
    }
    a.intersection(b).copied().collect()
}

/// Same (code, pattern) pair on two supplier rules: the later one never fires.
fn duplicate_patterns(report: &mut AuditReport, rules: &[ScopedRule]) {
    let mut seen: HashMap<(&str, String), usize> = HashMap::new();
    for (i, rule) in rules.iter().enumerate() {
        let pattern = rule.pattern.as_str().to_lowercase();
        for code in scope_codes(rule) {
            match seen.get(&(code, pattern.clone())) {
                Some(first) => report.warning(format!(
                    "supplier_rules[{first}] and [{i}] duplicate: code={code}, pattern='{}'",
                    rule.pattern.as_str()
                )),
                None => {
                    seen.insert((code, pattern.clone()), i);
                }
            }
        }
    }
}

/// An alternative of an earlier rule's pattern that a later rule also
/// matches, with a different taxonomy key and at least one shared code.
fn overlapping_patterns(report: &mut AuditReport, rules: &[ScopedRule]) {
    for (i, first) in rules.iter().enumerate() {
        let first_codes = scope_codes(first);
        for (j, later) in rules.iter().enumerate().skip(i + 1) {
            if first.taxonomy_key == later.taxonomy_key {
                continue;
            }
            let shared = shared_codes(&first_codes, &scope_codes(later));
            if shared.is_empty() {
                continue;
            }
            for alt in first.pattern.as_str().split('|') {
                if later.pattern.is_match(alt) {
                    let shared: Vec<&str> = shared.iter().copied().collect();
                    report.warning(format!(
                        "supplier_rules[{i}] alternative '{alt}' also matched by [{j}] \
                         (shared codes: {}): [{i}] -> {}, [{j}] -> {}",
                        shared.join(", "),
                        first.taxonomy_key,
                        later.taxonomy_key
                    ));
                }
            }
        }
    }
}
