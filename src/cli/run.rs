use std::path::{Path, PathBuf};
use std::time::Instant;

use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::categorizer::{Classifier, Tier};
use crate::error::Result;
use crate::export;
use crate::extractor::extract_codes;
use crate::fmt::{count, money};
use crate::importer::load_records;
use crate::reports::{self, RunSummary};
use crate::rules::load_rule_files;
use crate::settings::{load_settings, Overrides};
use crate::taxonomy::TaxonomyIndex;

const UNMAPPED_PREVIEW: usize = 10;

pub fn run(
    config: &Path,
    input: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    shards: usize,
    json: bool,
) -> Result<()> {
    let started = Instant::now();
    let settings = load_settings(config, &Overrides { input, output_dir })?;
    tracing::info!("Client: {}", settings.client_name);

    let taxonomy = TaxonomyIndex::load(&settings.paths.taxonomy)?;
    tracing::info!("Taxonomy: {} keys", taxonomy.len());

    let rules = load_rule_files(&settings.paths)?;
    tracing::info!(
        "Rules: {} mappings ({} ambiguous), {} supplier, {} keyword, {} context, {} cost center, {} override",
        rules.mappings.len(),
        rules.ambiguous_count(),
        rules.supplier_rules.len(),
        rules.keyword_rules.len(),
        rules.context_rules.len(),
        rules.cost_center_rules.len(),
        rules.override_rules.len()
    );
    for r in rules.unknown_taxonomy_refs(&taxonomy) {
        tracing::warn!("{} taxonomy_key '{}' not in taxonomy", r.source, r.key);
    }

    let batch = load_records(&settings)?;
    tracing::info!("Loaded {} rows from {}", batch.records.len(), settings.paths.input.display());
    if batch.coerced_amounts {
        tracing::warn!("Some {} values were not numeric and were coerced", settings.columns.amount);
    }

    let codes = extract_codes(&batch.records, settings.code_pattern.as_ref());
    let classify_started = Instant::now();
    let classifier = Classifier::new(&rules, &taxonomy, settings.fields(), settings.thresholds);
    let classification = classifier.classify_sharded(&batch.records, &codes, shards);
    let classify_secs = classify_started.elapsed().as_secs_f64();
    for tier in Tier::ALL {
        tracing::info!(
            "Tier {} ({}): {} rows",
            tier.number(),
            tier.label(),
            classification.hits.get(tier)
        );
    }
    tracing::info!("Unmapped: {} rows", classification.hits.unmapped);

    let table = reports::build_result_table(&batch, &codes, &classification, &settings.columns);
    let summary = reports::summarize(&settings.client_name, &batch, &codes, &classification);
    let (dir, files) = export::write_run(&settings, &table, &summary)?;
    for file in &files {
        tracing::debug!("Wrote {}", file.display());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
        println!(
            "\nTiming: classification {:.1}s, total {:.1}s",
            classify_secs,
            started.elapsed().as_secs_f64()
        );
        println!("Output saved to: {}", dir.display().to_string().bold());
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("{}", "CLASSIFICATION COMPLETE".green().bold());
    println!("Total transactions: {}", count(summary.total_transactions));

    let mut methods = Table::new();
    methods.set_header(vec!["Method", "Rows", "%"]);
    for m in &summary.methods {
        methods.add_row(vec![
            Cell::new(m.method.key()),
            Cell::new(count(m.count)),
            Cell::new(format!("{:.1}%", m.pct)),
        ]);
    }
    println!("\nClassification Methods\n{methods}");

    let mut tiers = Table::new();
    tiers.set_header(vec!["Review Tier", "Rows", "%"]);
    for t in &summary.review_tiers {
        let label = match t.tier {
            "Auto-Accept" => t.tier.green(),
            "Quick Review" => t.tier.yellow(),
            _ => t.tier.red(),
        };
        tiers.add_row(vec![
            Cell::new(label),
            Cell::new(count(t.count)),
            Cell::new(format!("{:.1}%", t.pct)),
        ]);
    }
    println!("\nReview Tiers\n{tiers}");

    println!(
        "\nTotal spend: {}  Average: {}",
        money(summary.total_amount),
        money(summary.average_amount)
    );

    if !summary.unmapped_codes.is_empty() {
        let rows: usize = summary.unmapped_codes.iter().map(|c| c.count).sum();
        println!(
            "\n{} {} unique codes, {} total rows",
            "Unmapped Categories:".yellow().bold(),
            summary.unmapped_codes.len(),
            count(rows)
        );
        let mut unmapped = Table::new();
        unmapped.set_header(vec!["Category Code", "Rows"]);
        for c in summary.unmapped_codes.iter().take(UNMAPPED_PREVIEW) {
            unmapped.add_row(vec![Cell::new(&c.code), Cell::new(count(c.count))]);
        }
        println!("{unmapped}");
    }
}
