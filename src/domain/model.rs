use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::utils::error::{PipelineError, Result};

/// Category assigned to a cleaned row when the source has none.
pub const DEFAULT_CATEGORY: &str = "General";

/// A raw CSV row: column/value pairs in source order. Immutable once read.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    row_number: usize,
    fields: Vec<(String, String)>,
}

impl RawRow {
    pub fn new(row_number: usize, fields: Vec<(String, String)>) -> Self {
        Self { row_number, fields }
    }

    pub fn row_number(&self) -> usize {
        self.row_number
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.iter().all(|(_, v)| v.trim().is_empty())
    }

    /// JSON object view of the row, preserving column order, for prompts
    /// and reports.
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        for (k, v) in &self.fields {
            map.insert(k.clone(), Value::String(v.clone()));
        }
        Value::Object(map)
    }
}

/// Supported blockchain networks. Ethereum is the fallback everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Chain {
    #[default]
    Ethereum,
    Polygon,
    Optimism,
    Arbitrum,
    Base,
}

impl Chain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Ethereum => "ETHEREUM",
            Chain::Polygon => "POLYGON",
            Chain::Optimism => "OPTIMISM",
            Chain::Arbitrum => "ARBITRUM",
            Chain::Base => "BASE",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "ETHEREUM" | "ETH" => Some(Chain::Ethereum),
            "POLYGON" | "MATIC" => Some(Chain::Polygon),
            "OPTIMISM" => Some(Chain::Optimism),
            "ARBITRUM" => Some(Chain::Arbitrum),
            "BASE" => Some(Chain::Base),
            _ => None,
        }
    }
}

/// True for a 66-character `0x`-prefixed hex string.
pub fn is_tx_hash(value: &str) -> bool {
    value.len() == 66
        && value.starts_with("0x")
        && value[2..].chars().all(|c| c.is_ascii_hexdigit())
}

/// A validated, typed row ready for classification and request building.
/// Construction fails unless `tx_hash` is hash-shaped; `chain` and
/// `expense_category` always carry a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanedRow {
    pub row_number: usize,
    pub tx_hash: String,
    pub chain: Chain,
    pub expense_category: String,
    pub amount_in_eth: Option<f64>,
    pub amount_in_usd: Option<f64>,
}

impl CleanedRow {
    pub fn new(row_number: usize, tx_hash: String, chain: Chain) -> Result<Self> {
        if !is_tx_hash(&tx_hash) {
            return Err(PipelineError::ValidationError {
                message: format!("invalid tx_hash '{}' in row {}", tx_hash, row_number),
            });
        }
        Ok(Self {
            row_number,
            tx_hash,
            chain,
            expense_category: DEFAULT_CATEGORY.to_string(),
            amount_in_eth: None,
            amount_in_usd: None,
        })
    }

    pub fn has_default_category(&self) -> bool {
        self.expense_category == DEFAULT_CATEGORY
    }

    pub fn has_amount(&self) -> bool {
        self.amount_in_eth.is_some() || self.amount_in_usd.is_some()
    }
}

/// The closed set of backend operations. Declaration order is the tie-break
/// order for batch majority voting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionType {
    TagAsExpense,
    GetTransaction,
    GetReceipt,
    GetEvents,
    FillAccountBy,
    ListChains,
}

impl FunctionType {
    pub const ALL: [FunctionType; 6] = [
        FunctionType::TagAsExpense,
        FunctionType::GetTransaction,
        FunctionType::GetReceipt,
        FunctionType::GetEvents,
        FunctionType::FillAccountBy,
        FunctionType::ListChains,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FunctionType::TagAsExpense => "tag_as_expense",
            FunctionType::GetTransaction => "get_transaction",
            FunctionType::GetReceipt => "get_receipt",
            FunctionType::GetEvents => "get_events",
            FunctionType::FillAccountBy => "fill_account_by",
            FunctionType::ListChains => "list_chains",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        FunctionType::ALL
            .iter()
            .copied()
            .find(|f| f.as_str() == name.trim())
    }

    /// The parameter contract the API executor relies on. Exactly these keys
    /// are required; extra advisory keys are tolerated.
    pub fn required_params(&self) -> &'static [&'static str] {
        match self {
            FunctionType::TagAsExpense => &["chain", "tx_hash", "expense_category"],
            FunctionType::GetTransaction => &["chain", "tx_hash"],
            FunctionType::GetReceipt => &["chain", "tx_hash"],
            FunctionType::GetEvents => &["contract_address", "event_signature"],
            FunctionType::FillAccountBy => &["account_id", "amount"],
            FunctionType::ListChains => &[],
        }
    }
}

impl std::fmt::Display for FunctionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully-formed request for the external API executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiCallRequest {
    pub method: FunctionType,
    pub params: Map<String, Value>,
}

impl ApiCallRequest {
    pub fn new(method: FunctionType, params: Map<String, Value>) -> Self {
        Self { method, params }
    }

    /// Check that every required parameter for `method` is present and
    /// non-null. Extra keys are allowed.
    pub fn validate(&self) -> Result<()> {
        for key in self.method.required_params() {
            match self.params.get(*key) {
                Some(v) if !v.is_null() => {}
                _ => {
                    return Err(PipelineError::ValidationError {
                        message: format!("{} call is missing required param '{}'", self.method, key),
                    })
                }
            }
        }
        Ok(())
    }
}

/// Outcome of processing one row. Exactly one of `data`/`error` is set.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub row_number: usize,
    pub success: bool,
    pub data: Option<ApiCallRequest>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn ok(row_number: usize, data: ApiCallRequest) -> Self {
        Self {
            row_number,
            success: true,
            data: Some(data),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(row_number: usize, error: impl Into<String>) -> Self {
        Self {
            row_number,
            success: false,
            data: None,
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }
}

/// A row dropped during normalization. Expected lossy input, not an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedRow {
    pub row_number: usize,
    pub reason: String,
}

/// Audit record for a value that failed coercion or validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDiagnostic {
    pub row_number: usize,
    pub field: String,
    pub value: String,
    pub reason: String,
}

/// Whether the target function is chosen once per table (majority vote) or
/// independently per row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifyMode {
    #[default]
    Batch,
    Row,
}

/// Everything a pipeline run produced: one result per surviving row, plus
/// skip records and generation diagnostics. Failed rows never abort a run.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub function: Option<FunctionType>,
    pub results: Vec<ExecutionResult>,
    pub skipped: Vec<SkippedRow>,
    pub generation_errors: Vec<String>,
}

impl RunReport {
    pub fn failed_rows(&self) -> Vec<usize> {
        self.results
            .iter()
            .filter(|r| !r.success)
            .map(|r| r.row_number)
            .collect()
    }

    pub fn successes(&self) -> Vec<&ApiCallRequest> {
        self.results
            .iter()
            .filter_map(|r| r.data.as_ref())
            .collect()
    }
}
