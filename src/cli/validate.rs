use std::path::Path;

use colored::Colorize;

use crate::audit::{audit, Severity};
use crate::error::{Result, SpendError};
use crate::rules::load_rule_files;
use crate::settings::{load_settings, Overrides};
use crate::taxonomy::TaxonomyIndex;

pub fn run(config: &Path) -> Result<()> {
    let settings = load_settings(config, &Overrides::default())?;
    let taxonomy = TaxonomyIndex::load(&settings.paths.taxonomy)?;
    let rules = load_rule_files(&settings.paths)?;

    let report = audit(&rules, &taxonomy);
    for finding in &report.findings {
        match finding.severity {
            Severity::Error => println!("{} {}", "error:".red().bold(), finding.message),
            Severity::Warning => println!("{} {}", "warning:".yellow().bold(), finding.message),
        }
    }

    let errors = report.count(Severity::Error);
    let warnings = report.count(Severity::Warning);
    println!(
        "{}: {} mappings, {} supplier, {} keyword, {} context, {} cost center, {} override rules",
        settings.client_name,
        rules.mappings.len(),
        rules.supplier_rules.len(),
        rules.keyword_rules.len(),
        rules.context_rules.len(),
        rules.cost_center_rules.len(),
        rules.override_rules.len()
    );
    if report.has_errors() {
        return Err(SpendError::Config(format!(
            "rule validation failed: {errors} error(s), {warnings} warning(s)"
        )));
    }
    println!("{} ({warnings} warning(s))", "Rules OK".green().bold());
    Ok(())
}
