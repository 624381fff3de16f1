use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(String),

    #[error("{0}")]
    Config(String),

    #[error("{section}[{index}] missing required key '{key}'")]
    MissingRuleKey {
        section: String,
        index: usize,
        key: String,
    },

    #[error("{section}[{index}] invalid regex '{pattern}': {source}")]
    InvalidPattern {
        section: String,
        index: usize,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("{section}[{index}] invalid value for '{key}': {reason}")]
    InvalidRuleValue {
        section: String,
        index: usize,
        key: String,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, SpendError>;
