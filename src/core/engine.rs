//! Pipeline orchestration: CSV in, JSON report of API call requests out.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::core::classify::{classify_batch, classify_instruction, classify_row};
use crate::core::dispatch::{BatchDispatcher, BatchReport};
use crate::core::extract::{coerce_amount, FieldExtractor};
use crate::core::gateway::ExtractionGateway;
use crate::core::normalize::RowNormalizer;
use crate::domain::model::{
    ApiCallRequest, ClassifyMode, CleanedRow, ExecutionResult, FunctionType, RawRow, RunReport,
};
use crate::domain::ports::{ConfigProvider, Pipeline, Storage, TextGenerator};
use crate::utils::error::{PipelineError, Result};

pub const OUTPUT_FILE: &str = "api_calls.json";

pub struct PipelineEngine<P: Pipeline> {
    pipeline: P,
}

impl<P: Pipeline> PipelineEngine<P> {
    pub fn new(pipeline: P) -> Self {
        Self { pipeline }
    }

    pub async fn run(&self) -> Result<String> {
        tracing::info!("starting csv2api pipeline");

        let raw_rows = self.pipeline.extract().await?;
        tracing::info!("extracted {} rows", raw_rows.len());

        let report = self.pipeline.transform(raw_rows).await?;
        let succeeded = report.results.iter().filter(|r| r.success).count();
        tracing::info!(
            succeeded,
            failed = report.results.len() - succeeded,
            skipped = report.skipped.len(),
            "transform complete"
        );

        let output_path = self.pipeline.load(report).await?;
        tracing::info!("report saved to {}", output_path);

        Ok(output_path)
    }
}

/// Parse CSV bytes into raw rows. Row numbers are 1-based data row indices,
/// matching how a person counts rows under the header line.
pub fn read_csv_rows(bytes: &[u8]) -> Result<Vec<RawRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(bytes);
    let headers = reader.headers()?.clone();

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record?;
        let fields = headers
            .iter()
            .zip(record.iter())
            .map(|(header, value)| (header.to_string(), value.to_string()))
            .collect();
        rows.push(RawRow::new(index + 1, fields));
    }
    Ok(rows)
}

/// Build the call for `function` from a cleaned row, with exactly the
/// required parameters plus advisory amounts for expense tagging.
pub fn build_request(function: FunctionType, row: &CleanedRow) -> Result<ApiCallRequest> {
    let mut params = Map::new();
    match function {
        FunctionType::TagAsExpense => {
            params.insert("chain".into(), row.chain.as_str().into());
            params.insert("tx_hash".into(), row.tx_hash.clone().into());
            params.insert(
                "expense_category".into(),
                row.expense_category.clone().into(),
            );
            if let Some(eth) = row.amount_in_eth {
                params.insert("amount_in_eth".into(), eth.into());
            }
            if let Some(usd) = row.amount_in_usd {
                params.insert("amount_in_usd".into(), usd.into());
            }
        }
        FunctionType::GetTransaction | FunctionType::GetReceipt => {
            params.insert("chain".into(), row.chain.as_str().into());
            params.insert("tx_hash".into(), row.tx_hash.clone().into());
        }
        FunctionType::ListChains => {}
        FunctionType::GetEvents | FunctionType::FillAccountBy => {
            return Err(PipelineError::ValidationError {
                message: format!(
                    "{} parameters are not derivable from a cleaned row",
                    function
                ),
            })
        }
    }

    let call = ApiCallRequest::new(function, params);
    call.validate()?;
    Ok(call)
}

/// Deterministic call construction straight from raw columns, for functions
/// whose parameters never pass through normalization. Returns None when any
/// required parameter is missing, which hands the row to the gateway.
fn build_raw_request(
    function: FunctionType,
    row: &RawRow,
    extractor: &FieldExtractor,
) -> Option<ApiCallRequest> {
    let mut params = Map::new();
    for name in function.required_params() {
        let raw = extractor.lookup(row, name)?;
        let value = if *name == "amount" {
            Value::from(coerce_amount(raw)?)
        } else {
            Value::from(raw)
        };
        params.insert((*name).to_string(), value);
    }
    let call = ApiCallRequest::new(function, params);
    call.validate().ok()?;
    Some(call)
}

pub struct CsvApiPipeline<S, C, G>
where
    S: Storage,
    C: ConfigProvider,
    G: TextGenerator + 'static,
{
    storage: S,
    config: C,
    normalizer: RowNormalizer,
    dispatcher: BatchDispatcher,
    gateway: Arc<ExtractionGateway<G>>,
}

impl<S, C, G> CsvApiPipeline<S, C, G>
where
    S: Storage,
    C: ConfigProvider,
    G: TextGenerator + 'static,
{
    pub fn new(storage: S, config: C, normalizer: RowNormalizer, gateway: ExtractionGateway<G>) -> Self {
        let dispatcher = BatchDispatcher::with_workers(config.workers());
        Self {
            storage,
            config,
            normalizer,
            dispatcher,
            gateway: Arc::new(gateway),
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: BatchDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    async fn run_deterministic(
        &self,
        function: FunctionType,
        cleaned: Vec<CleanedRow>,
    ) -> BatchReport {
        let items: Vec<(usize, CleanedRow)> =
            cleaned.into_iter().map(|c| (c.row_number, c)).collect();
        self.dispatcher
            .dispatch(items, move |row| async move {
                build_request(function, &row).map_err(|e| e.to_string())
            })
            .await
    }

    /// Row mode: each row picks its own function before the call is built.
    async fn run_per_row(&self, cleaned: Vec<CleanedRow>) -> BatchReport {
        let items: Vec<(usize, CleanedRow)> =
            cleaned.into_iter().map(|c| (c.row_number, c)).collect();
        self.dispatcher
            .dispatch(items, move |row| async move {
                build_request(classify_row(&row), &row).map_err(|e| e.to_string())
            })
            .await
    }

    /// Functions whose parameters live outside the cleaned-row shape: try a
    /// direct column lookup first, fall back to the extraction gateway.
    async fn run_generative(
        &self,
        function: FunctionType,
        instruction: Option<String>,
        rows: Vec<RawRow>,
    ) -> BatchReport {
        let gateway = Arc::clone(&self.gateway);
        let extractor = self.normalizer.extractor().clone();
        let items: Vec<(usize, RawRow)> =
            rows.into_iter().map(|r| (r.row_number(), r)).collect();
        self.dispatcher
            .dispatch(items, move |row| {
                let gateway = Arc::clone(&gateway);
                let extractor = extractor.clone();
                let instruction = instruction.clone();
                async move {
                    if let Some(call) = build_raw_request(function, &row, &extractor) {
                        return Ok(call);
                    }
                    gateway
                        .request_call(instruction.as_deref(), function, &row)
                        .await
                }
            })
            .await
    }
}

#[async_trait::async_trait]
impl<S, C, G> Pipeline for CsvApiPipeline<S, C, G>
where
    S: Storage,
    C: ConfigProvider,
    G: TextGenerator + 'static,
{
    async fn extract(&self) -> Result<Vec<RawRow>> {
        let path = self.config.input_path();
        tracing::debug!("reading CSV from {}", path);
        let bytes = self.storage.read_file(path).await?;
        let rows = read_csv_rows(&bytes)?;
        if rows.is_empty() {
            return Err(PipelineError::ProcessingError {
                message: format!("no data rows in {}", path),
            });
        }
        Ok(rows)
    }

    async fn transform(&self, rows: Vec<RawRow>) -> Result<RunReport> {
        let (cleaned, skipped) = self.normalizer.normalize_all(&rows);

        let instruction = self.config.instruction().map(str::to_string);
        let function = match &instruction {
            Some(instr) => Some(classify_instruction(instr)?),
            None => match self.config.classify_mode() {
                ClassifyMode::Batch => Some(classify_batch(&cleaned)),
                ClassifyMode::Row => None,
            },
        };

        let report = match function {
            None => {
                let batch = self.run_per_row(cleaned).await;
                RunReport {
                    function: None,
                    results: batch.results,
                    skipped,
                    generation_errors: Vec::new(),
                }
            }
            Some(FunctionType::ListChains) => RunReport {
                function: Some(FunctionType::ListChains),
                results: vec![ExecutionResult::ok(
                    0,
                    ApiCallRequest::new(FunctionType::ListChains, Map::new()),
                )],
                skipped,
                generation_errors: Vec::new(),
            },
            Some(f @ (FunctionType::GetEvents | FunctionType::FillAccountBy)) => {
                // These do not need a tx_hash, so every raw row is in play
                // and the hash-based skip list does not apply.
                let batch = self.run_generative(f, instruction, rows).await;
                let generation_errors = batch
                    .results
                    .iter()
                    .filter_map(|r| r.error.clone())
                    .collect();
                RunReport {
                    function: Some(f),
                    results: batch.results,
                    skipped: Vec::new(),
                    generation_errors,
                }
            }
            Some(f) => {
                let batch = self.run_deterministic(f, cleaned).await;
                RunReport {
                    function: Some(f),
                    results: batch.results,
                    skipped,
                    generation_errors: Vec::new(),
                }
            }
        };

        Ok(report)
    }

    async fn load(&self, report: RunReport) -> Result<String> {
        let data = serde_json::to_vec_pretty(&report)?;
        self.storage.write_file(OUTPUT_FILE, &data).await?;
        Ok(format!("{}/{}", self.config.output_path(), OUTPUT_FILE))
    }
}
