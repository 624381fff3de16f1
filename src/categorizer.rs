use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap};

use rayon::prelude::*;
use regex::Regex;
use serde::Serialize;

use crate::models::{ClassificationResult, Method, TaxonomyLevels, TransactionRecord};
use crate::reviewer::{assign, Thresholds};
use crate::rules::{KeywordRule, ScopedRule, RuleSet};
use crate::taxonomy::TaxonomyIndex;

/// Which optional input columns are configured. Derived once per run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Fields {
    pub description: bool,
    pub service_context: bool,
    pub cost_center: bool,
}

// ---------------------------------------------------------------------------
// Tiers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    CategoryMapping,
    SupplierRefinement,
    KeywordRules,
    ContextRefinement,
    CostCenterRefinement,
    AmbiguousFallback,
    SupplierOverride,
}

impl Tier {
    pub const ALL: [Tier; 7] = [
        Tier::CategoryMapping,
        Tier::SupplierRefinement,
        Tier::KeywordRules,
        Tier::ContextRefinement,
        Tier::CostCenterRefinement,
        Tier::AmbiguousFallback,
        Tier::SupplierOverride,
    ];

    pub fn number(&self) -> usize {
        match self {
            Self::CategoryMapping => 1,
            Self::SupplierRefinement => 2,
            Self::KeywordRules => 3,
            Self::ContextRefinement => 4,
            Self::CostCenterRefinement => 5,
            Self::AmbiguousFallback => 6,
            Self::SupplierOverride => 7,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::CategoryMapping => "category mapping",
            Self::SupplierRefinement => "supplier refinement",
            Self::KeywordRules => "keyword rules",
            Self::ContextRefinement => "context refinement",
            Self::CostCenterRefinement => "cost center refinement",
            Self::AmbiguousFallback => "ambiguous fallback",
            Self::SupplierOverride => "supplier override",
        }
    }

    pub fn method(&self) -> Method {
        match self {
            Self::CategoryMapping => Method::CategoryMapping,
            Self::SupplierRefinement => Method::SupplierRefinement,
            Self::KeywordRules => Method::KeywordRule,
            Self::ContextRefinement => Method::ContextRefinement,
            Self::CostCenterRefinement => Method::CostCenterRefinement,
            Self::AmbiguousFallback => Method::CategoryMappingAmbiguous,
            Self::SupplierOverride => Method::SupplierOverride,
        }
    }
}

/// Rows claimed per tier, plus rows left unmapped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierHits {
    pub counts: [usize; 7],
    pub unmapped: usize,
}

impl TierHits {
    pub fn get(&self, tier: Tier) -> usize {
        self.counts[tier.number() - 1]
    }

    fn record(&mut self, tier: Tier, count: usize) {
        self.counts[tier.number() - 1] += count;
    }

    fn merge(&mut self, other: &TierHits) {
        for (a, b) in self.counts.iter_mut().zip(other.counts) {
            *a += b;
        }
        self.unmapped += other.unmapped;
    }
}

// ---------------------------------------------------------------------------
// Claim set
// ---------------------------------------------------------------------------

/// One tier's assignment for one record.
#[derive(Debug, Clone, PartialEq)]
pub struct Claim {
    pub index: usize,
    pub taxonomy_key: String,
    pub method: Method,
    pub confidence: f64,
}

/// Records still unclassified. Tiers never mutate the set they are given;
/// the next tier's set is `open.without(&claims)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenSet {
    open: Vec<bool>,
    remaining: usize,
}

impl OpenSet {
    pub fn full(len: usize) -> Self {
        Self {
            open: vec![true; len],
            remaining: len,
        }
    }

    pub fn contains(&self, index: usize) -> bool {
        self.open.get(index).copied().unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.remaining
    }

    pub fn is_empty(&self) -> bool {
        self.remaining == 0
    }

    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.open
            .iter()
            .enumerate()
            .filter_map(|(i, &open)| open.then_some(i))
    }

    pub fn without(&self, claims: &[Claim]) -> OpenSet {
        let mut next = self.clone();
        for claim in claims {
            next.close(claim.index);
        }
        next
    }

    fn close(&mut self, index: usize) {
        if let Some(slot) = self.open.get_mut(index) {
            if *slot {
                *slot = false;
                self.remaining -= 1;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Batch view
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum TextField {
    Supplier,
    Keyword,
    ServiceContext,
    CostCenter,
}

/// Read-only view of a record batch with per-batch indexes.
struct Batch<'a> {
    records: &'a [TransactionRecord],
    codes: &'a [String],
    code_rows: HashMap<&'a str, Vec<usize>>,
    keyword_text: Vec<Cow<'a, str>>,
}

impl<'a> Batch<'a> {
    fn new(records: &'a [TransactionRecord], codes: &'a [String], fields: Fields) -> Self {
        let mut code_rows: HashMap<&str, Vec<usize>> = HashMap::new();
        for (i, code) in codes.iter().enumerate() {
            code_rows.entry(code.as_str()).or_default().push(i);
        }
        let keyword_text = records
            .iter()
            .map(|r| {
                if fields.description {
                    Cow::Owned(format!("{} {}", r.supplier, r.description))
                } else {
                    Cow::Borrowed(r.supplier.as_str())
                }
            })
            .collect();
        Self {
            records,
            codes,
            code_rows,
            keyword_text,
        }
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn text(&self, field: TextField, index: usize) -> &str {
        let r = &self.records[index];
        match field {
            TextField::Supplier => r.supplier.as_str(),
            TextField::Keyword => &*self.keyword_text[index],
            TextField::ServiceContext => r.service_context.as_str(),
            TextField::CostCenter => r.cost_center.as_str(),
        }
    }

    /// Open rows whose code is in `scope`, in row order; every open row when
    /// unscoped. Scope membership is an exact string match.
    fn candidates(&self, scope: Option<&BTreeSet<String>>, open: &OpenSet) -> Vec<usize> {
        match scope {
            None => open.indices().collect(),
            Some(codes) => {
                let mut rows: Vec<usize> = codes
                    .iter()
                    .filter_map(|c| self.code_rows.get(c.as_str()))
                    .flatten()
                    .copied()
                    .filter(|&i| open.contains(i))
                    .collect();
                rows.sort_unstable();
                rows
            }
        }
    }
}

/// A first-match-wins rule evaluated by the claiming tiers 2-5.
trait TierRule {
    fn scope(&self) -> Option<&BTreeSet<String>>;
    fn pattern(&self) -> &Regex;
    fn taxonomy_key(&self) -> &str;
    fn confidence(&self) -> f64;
}

impl TierRule for ScopedRule {
    fn scope(&self) -> Option<&BTreeSet<String>> {
        self.scope.as_ref()
    }
    fn pattern(&self) -> &Regex {
        &self.pattern
    }
    fn taxonomy_key(&self) -> &str {
        &self.taxonomy_key
    }
    fn confidence(&self) -> f64 {
        self.confidence
    }
}

impl TierRule for KeywordRule {
    fn scope(&self) -> Option<&BTreeSet<String>> {
        None
    }
    fn pattern(&self) -> &Regex {
        &self.pattern
    }
    fn taxonomy_key(&self) -> &str {
        &self.taxonomy_key
    }
    fn confidence(&self) -> f64 {
        self.confidence
    }
}

/// Rules run in file order; each rule only sees rows earlier rules left open.
fn claim_in_order<R: TierRule>(
    rules: &[R],
    batch: &Batch,
    open: &OpenSet,
    field: TextField,
    method: Method,
) -> Vec<Claim> {
    let mut open = open.clone();
    let mut claims = Vec::new();
    for rule in rules {
        if open.is_empty() {
            break;
        }
        for index in batch.candidates(rule.scope(), &open) {
            if rule.pattern().is_match(batch.text(field, index)) {
                open.close(index);
                claims.push(Claim {
                    index,
                    taxonomy_key: rule.taxonomy_key().to_string(),
                    method,
                    confidence: rule.confidence(),
                });
            }
        }
    }
    claims
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub results: Vec<ClassificationResult>,
    pub hits: TierHits,
    /// Unmapped category codes, by count descending then code.
    pub unmapped_codes: Vec<(String, usize)>,
}

pub struct Classifier<'a> {
    rules: &'a RuleSet,
    taxonomy: &'a TaxonomyIndex,
    fields: Fields,
    thresholds: Thresholds,
}

impl<'a> Classifier<'a> {
    pub fn new(
        rules: &'a RuleSet,
        taxonomy: &'a TaxonomyIndex,
        fields: Fields,
        thresholds: Thresholds,
    ) -> Self {
        Self {
            rules,
            taxonomy,
            fields,
            thresholds,
        }
    }

    fn mapping_tier(&self, batch: &Batch, open: &OpenSet, ambiguous: bool, method: Method) -> Vec<Claim> {
        open.indices()
            .filter_map(|index| {
                let mapping = self.rules.mappings.get(batch.codes[index].as_str())?;
                (mapping.ambiguous == ambiguous).then(|| Claim {
                    index,
                    taxonomy_key: mapping.taxonomy_key.clone(),
                    method,
                    confidence: mapping.confidence,
                })
            })
            .collect()
    }

    fn run_tier(&self, tier: Tier, batch: &Batch, open: &OpenSet) -> Vec<Claim> {
        let method = tier.method();
        match tier {
            Tier::CategoryMapping => self.mapping_tier(batch, open, false, method),
            Tier::SupplierRefinement => {
                claim_in_order(&self.rules.supplier_rules, batch, open, TextField::Supplier, method)
            }
            Tier::KeywordRules => {
                claim_in_order(&self.rules.keyword_rules, batch, open, TextField::Keyword, method)
            }
            Tier::ContextRefinement if self.fields.service_context => claim_in_order(
                &self.rules.context_rules,
                batch,
                open,
                TextField::ServiceContext,
                method,
            ),
            Tier::CostCenterRefinement if self.fields.cost_center => claim_in_order(
                &self.rules.cost_center_rules,
                batch,
                open,
                TextField::CostCenter,
                method,
            ),
            Tier::ContextRefinement | Tier::CostCenterRefinement => {
                tracing::debug!("Tier {} ({}): skipped, column not configured", tier.number(), tier.label());
                Vec::new()
            }
            Tier::AmbiguousFallback => self.mapping_tier(batch, open, true, method),
            Tier::SupplierOverride => Vec::new(),
        }
    }

    /// Tier 7. Runs over every record; a record is eligible for a rule when
    /// its current level 1 is in the rule's `override_from_l1`. The first
    /// matching override rule wins.
    fn override_tier(&self, batch: &Batch, levels: &[&TaxonomyLevels]) -> Vec<Claim> {
        let mut eligible = vec![true; batch.len()];
        let mut claims = Vec::new();
        for rule in &self.rules.override_rules {
            let before = claims.len();
            for index in 0..batch.len() {
                if !eligible[index] || !rule.override_from_l1.contains(levels[index].level1.as_str()) {
                    continue;
                }
                if rule.pattern.is_match(batch.text(TextField::Supplier, index)) {
                    eligible[index] = false;
                    claims.push(Claim {
                        index,
                        taxonomy_key: rule.taxonomy_key.clone(),
                        method: Method::SupplierOverride,
                        confidence: rule.confidence,
                    });
                }
            }
            if claims.len() > before && !self.taxonomy.contains(&rule.taxonomy_key) {
                tracing::warn!(
                    "Override taxonomy_key '{}' not in taxonomy lookup",
                    rule.taxonomy_key
                );
            }
        }
        claims
    }

    /// Run the full waterfall over one batch. `codes` are the extracted
    /// category codes, aligned with `records`.
    pub fn classify(&self, records: &[TransactionRecord], codes: &[String]) -> Classification {
        debug_assert_eq!(records.len(), codes.len());
        let batch = Batch::new(records, codes, self.fields);
        let mut outcome: Vec<Option<Claim>> = vec![None; batch.len()];
        let mut hits = TierHits::default();

        let mut open = OpenSet::full(batch.len());
        for tier in &Tier::ALL[..6] {
            let claims = self.run_tier(*tier, &batch, &open);
            hits.record(*tier, claims.len());
            open = open.without(&claims);
            for claim in claims {
                let index = claim.index;
                outcome[index] = Some(claim);
            }
        }

        let mut levels: Vec<&TaxonomyLevels> = outcome
            .iter()
            .map(|c| self.taxonomy.resolve(c.as_ref().map(|c| c.taxonomy_key.as_str())))
            .collect();
        let overrides = self.override_tier(&batch, &levels);
        hits.record(Tier::SupplierOverride, overrides.len());
        for claim in overrides {
            let index = claim.index;
            levels[index] = self.taxonomy.resolve(Some(&claim.taxonomy_key));
            outcome[index] = Some(claim);
        }

        let results: Vec<ClassificationResult> = outcome
            .into_iter()
            .zip(levels)
            .map(|(claim, levels)| self.finalize(claim, levels))
            .collect();
        hits.unmapped = results.iter().filter(|r| r.method == Method::Unmapped).count();
        let unmapped_codes = unmapped_frequency(codes, &results);

        Classification {
            results,
            hits,
            unmapped_codes,
        }
    }

    /// Classify contiguous shards in parallel. Output is identical to
    /// `classify` over the whole batch.
    pub fn classify_sharded(
        &self,
        records: &[TransactionRecord],
        codes: &[String],
        shards: usize,
    ) -> Classification {
        if shards <= 1 || records.len() < 2 {
            return self.classify(records, codes);
        }
        let chunk = records.len().div_ceil(shards);
        let parts: Vec<Classification> = records
            .par_chunks(chunk)
            .zip(codes.par_chunks(chunk))
            .map(|(r, c)| self.classify(r, c))
            .collect();

        let mut results = Vec::with_capacity(records.len());
        let mut hits = TierHits::default();
        for part in parts {
            hits.merge(&part.hits);
            results.extend(part.results);
        }
        let unmapped_codes = unmapped_frequency(codes, &results);
        Classification {
            results,
            hits,
            unmapped_codes,
        }
    }

    fn finalize(&self, claim: Option<Claim>, levels: &TaxonomyLevels) -> ClassificationResult {
        let (taxonomy_key, method, confidence) = match claim {
            Some(c) => (Some(c.taxonomy_key), c.method, c.confidence),
            None => (None, Method::Unmapped, 0.0),
        };
        ClassificationResult {
            review_tier: assign(method, confidence, &self.thresholds),
            taxonomy_key,
            method,
            confidence,
            levels: levels.clone(),
        }
    }
}

fn unmapped_frequency(codes: &[String], results: &[ClassificationResult]) -> Vec<(String, usize)> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for (code, result) in codes.iter().zip(results) {
        if result.method == Method::Unmapped {
            *counts.entry(code.as_str()).or_default() += 1;
        }
    }
    let mut table: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(code, count)| (code.to_string(), count))
        .collect();
    table.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    table
}
