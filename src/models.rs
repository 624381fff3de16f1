use serde::Serialize;

/// One input row after configured columns have been extracted.
/// Optional fields are empty when their column is not configured.
#[derive(Debug, Clone, Default)]
pub struct TransactionRecord {
    pub category_source: String,
    pub supplier: String,
    pub description: String,
    pub service_context: String,
    pub cost_center: String,
    pub amount: f64,
    pub passthrough: Vec<String>,
}

/// Records read from one input file, with the passthrough column names
/// aligned to each record's `passthrough` values.
#[derive(Debug, Clone, Default)]
pub struct InputBatch {
    pub passthrough_columns: Vec<String>,
    pub records: Vec<TransactionRecord>,
    pub coerced_amounts: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    CategoryMapping,
    SupplierRefinement,
    KeywordRule,
    ContextRefinement,
    CostCenterRefinement,
    CategoryMappingAmbiguous,
    SupplierOverride,
    Unmapped,
}

impl Method {
    pub const ALL: [Method; 8] = [
        Method::CategoryMapping,
        Method::SupplierRefinement,
        Method::KeywordRule,
        Method::ContextRefinement,
        Method::CostCenterRefinement,
        Method::CategoryMappingAmbiguous,
        Method::SupplierOverride,
        Method::Unmapped,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Self::CategoryMapping => "category_mapping",
            Self::SupplierRefinement => "supplier_refinement",
            Self::KeywordRule => "rule",
            Self::ContextRefinement => "context_refinement",
            Self::CostCenterRefinement => "cost_center_refinement",
            Self::CategoryMappingAmbiguous => "category_mapping_ambiguous",
            Self::SupplierOverride => "supplier_override",
            Self::Unmapped => "unmapped",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::CategoryMapping => "Category Mapping (direct)",
            Self::SupplierRefinement => "Supplier Refinement",
            Self::KeywordRule => "Keyword Rules",
            Self::ContextRefinement => "Context Refinement (LoS)",
            Self::CostCenterRefinement => "Cost Center Refinement",
            Self::CategoryMappingAmbiguous => "Category Mapping (ambiguous fallback)",
            Self::SupplierOverride => "Supplier Override (post-classification)",
            Self::Unmapped => "Unmapped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ReviewTier {
    AutoAccept,
    QuickReview,
    ManualReview,
}

impl ReviewTier {
    pub const ALL: [ReviewTier; 3] = [
        ReviewTier::AutoAccept,
        ReviewTier::QuickReview,
        ReviewTier::ManualReview,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::AutoAccept => "Auto-Accept",
            Self::QuickReview => "Quick Review",
            Self::ManualReview => "Manual Review",
        }
    }
}

/// Level 1..5 decomposition of a taxonomy key. All empty when the key is
/// absent or unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaxonomyLevels {
    pub level1: String,
    pub level2: String,
    pub level3: String,
    pub level4: String,
    pub level5: String,
}

impl TaxonomyLevels {
    pub fn as_array(&self) -> [&str; 5] {
        [
            &self.level1,
            &self.level2,
            &self.level3,
            &self.level4,
            &self.level5,
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub taxonomy_key: Option<String>,
    pub method: Method,
    pub confidence: f64,
    pub review_tier: ReviewTier,
    pub levels: TaxonomyLevels,
}
