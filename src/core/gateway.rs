//! Structured-extraction gateway: turns rows plus a natural-language
//! instruction into validated API call requests by prompting a text
//! generator and parsing whatever comes back.
//!
//! Errors from this module are plain strings. A failed generation is a
//! per-row (or per-batch) outcome to record, not a pipeline fault, so
//! callers fold these into ExecutionResult rather than propagating them.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::core::cache::ResponseCache;
use crate::core::payload::extract_payload;
use crate::domain::model::{ApiCallRequest, FunctionType, RawRow};
use crate::domain::ports::TextGenerator;
use crate::utils::error::PipelineError;

const PREAMBLE: &str =
    "You are a JSON API call generator. Output only valid JSON, no explanations or markdown.";

/// Hash keys the model tends to invent instead of `tx_hash`.
const HASH_ALIASES: &[&str] = &["transactionHash", "txn_hash", "hash", "txnHash"];

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub call_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
            call_timeout: Duration::from_secs(60),
        }
    }
}

pub struct ExtractionGateway<G: TextGenerator> {
    generator: G,
    config: GatewayConfig,
    cache: Arc<ResponseCache>,
}

impl<G: TextGenerator> ExtractionGateway<G> {
    pub fn new(generator: G, config: GatewayConfig, cache: Arc<ResponseCache>) -> Self {
        Self {
            generator,
            config,
            cache,
        }
    }

    /// Ask for one call object for a single row. The instruction is optional;
    /// the target method is always stated so the model cannot wander.
    pub async fn request_call(
        &self,
        instruction: Option<&str>,
        function: FunctionType,
        row: &RawRow,
    ) -> std::result::Result<ApiCallRequest, String> {
        let instruction = instruction.unwrap_or("Build the API call for this row.");
        let prompt = format!(
            "{PREAMBLE}\n\n\
             Instruction: {instruction}\n\
             Target method: {function}\n\
             Required params: {params:?}\n\
             Row data:\n{row}\n\n\
             Respond with exactly one JSON object shaped like:\n\
             {{\"method\": \"{function}\", \"params\": {{...}}}}",
            params = function.required_params(),
            row = row.to_json(),
        );

        self.with_retries(&prompt, |value| {
            let call = validate_call_object(value, Some(function))?;
            call.validate().map_err(|e| e.to_string())?;
            Ok(call)
        })
        .await
    }

    /// Ask the model to pick the function for a whole batch and echo back
    /// the rows it considers actionable.
    pub async fn infer_function_and_rows(
        &self,
        instruction: &str,
        rows: &[RawRow],
    ) -> std::result::Result<(FunctionType, Vec<Value>), String> {
        let prompt = format!(
            "{PREAMBLE}\n\n\
             Instruction: {instruction}\n\
             Known functions: {functions:?}\n\
             CSV rows:\n{rows}\n\n\
             Respond with exactly one JSON object shaped like:\n\
             {{\"function\": \"<one of the known functions>\", \"rows\": [...]}}",
            functions = FunctionType::ALL.map(|f| f.as_str()),
            rows = rows_to_json(rows),
        );

        self.with_retries(&prompt, |value| {
            let obj = value
                .as_object()
                .ok_or_else(|| "response is not a JSON object".to_string())?;
            let name = obj
                .get("function")
                .and_then(Value::as_str)
                .ok_or_else(|| "missing 'function' field".to_string())?;
            let function = FunctionType::from_name(name)
                .ok_or_else(|| format!("unknown function '{}'", name))?;
            let rows = obj
                .get("rows")
                .and_then(Value::as_array)
                .cloned()
                .ok_or_else(|| "missing 'rows' array".to_string())?;
            Ok((function, rows))
        })
        .await
    }

    /// Ask for one call object per row in a single shot. Partial success is
    /// kept: invalid items become error strings, and the whole attempt only
    /// fails when not a single item validates.
    pub async fn infer_call_list(
        &self,
        instruction: &str,
        rows: &[RawRow],
    ) -> std::result::Result<(Vec<ApiCallRequest>, Vec<String>), String> {
        let prompt = format!(
            "{PREAMBLE}\n\n\
             Instruction: {instruction}\n\
             Known methods: {functions:?}\n\
             CSV rows:\n{rows}\n\n\
             Respond with exactly one JSON array, one object per row, each\n\
             shaped like {{\"method\": \"...\", \"params\": {{...}}}}",
            functions = FunctionType::ALL.map(|f| f.as_str()),
            rows = rows_to_json(rows),
        );

        self.with_retries(&prompt, |value| {
            let items = value
                .as_array()
                .ok_or_else(|| "response is not a JSON array".to_string())?;
            let mut calls = Vec::new();
            let mut errors = Vec::new();
            for (index, item) in items.iter().enumerate() {
                match validate_call_object(item, None) {
                    Ok(call) => calls.push(call),
                    Err(e) => errors.push(format!("item {}: {}", index, e)),
                }
            }
            if calls.is_empty() {
                return Err(format!(
                    "no valid API call items in response: {}",
                    errors.join("; ")
                ));
            }
            Ok((calls, errors))
        })
        .await
    }

    /// One generation attempt: cache lookup, bounded model call, payload
    /// extraction. Only validated payloads are cached, so a malformed
    /// response never poisons later retries.
    async fn generate_payload(&self, prompt: &str) -> crate::utils::error::Result<Value> {
        let generated =
            tokio::time::timeout(self.config.call_timeout, self.generator.generate(prompt)).await;
        let text = match generated {
            Ok(result) => result?,
            Err(_) => {
                return Err(PipelineError::GenerationTimeout {
                    seconds: self.config.call_timeout.as_secs(),
                })
            }
        };
        extract_payload(&text).map_err(|e| PipelineError::ProcessingError {
            message: e.to_string(),
        })
    }

    async fn with_retries<T>(
        &self,
        prompt: &str,
        validate: impl Fn(&Value) -> std::result::Result<T, String>,
    ) -> std::result::Result<T, String> {
        if let Some(hit) = self.cache.get(prompt) {
            if let Ok(parsed) = validate(&hit) {
                tracing::debug!("response cache hit");
                return Ok(parsed);
            }
        }

        let mut last_error = String::new();
        let mut delay = self.config.base_delay;
        for attempt in 1..=self.config.max_retries {
            match self.generate_payload(prompt).await {
                Ok(value) => match validate(&value) {
                    Ok(parsed) => {
                        self.cache.put(prompt, value);
                        return Ok(parsed);
                    }
                    Err(e) => last_error = e,
                },
                Err(e) => last_error = e.to_string(),
            }
            tracing::warn!(
                attempt,
                max = self.config.max_retries,
                error = %last_error,
                "structured extraction attempt failed"
            );
            if attempt < self.config.max_retries {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }
        Err(last_error)
    }
}

fn rows_to_json(rows: &[RawRow]) -> Value {
    Value::Array(rows.iter().map(RawRow::to_json).collect())
}

/// Check one generated object against the call shape: a known method name
/// under `method` (or `function`), a params object, and the hash key folded
/// to its canonical name.
fn validate_call_object(
    value: &Value,
    expected: Option<FunctionType>,
) -> std::result::Result<ApiCallRequest, String> {
    let item = match value {
        Value::Object(obj) => obj,
        Value::String(name) => {
            // Some models answer a bare method name when params are empty.
            let function = FunctionType::from_name(name)
                .ok_or_else(|| format!("unknown method '{}'", name))?;
            return Ok(ApiCallRequest::new(function, Map::new()));
        }
        _ => return Err("response item is not a JSON object".to_string()),
    };

    let name = item
        .get("method")
        .or_else(|| item.get("function"))
        .and_then(Value::as_str)
        .ok_or_else(|| "missing 'method' field".to_string())?;
    let method =
        FunctionType::from_name(name).ok_or_else(|| format!("unknown method '{}'", name))?;
    if let Some(expected) = expected {
        if method != expected {
            return Err(format!(
                "expected method '{}', got '{}'",
                expected, method
            ));
        }
    }

    let mut params = item
        .get("params")
        .and_then(Value::as_object)
        .cloned()
        .ok_or_else(|| "missing 'params' object".to_string())?;
    fold_hash_aliases(&mut params);

    Ok(ApiCallRequest::new(method, params))
}

fn fold_hash_aliases(params: &mut Map<String, Value>) {
    if params.contains_key("tx_hash") {
        return;
    }
    for alias in HASH_ALIASES {
        if let Some(value) = params.get(*alias).cloned() {
            params.insert("tx_hash".to_string(), value);
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ollama::MockGenerator;
    use serde_json::json;

    const HASH: &str = "0xcc00000000000000000000000000000000000000000000000000000000000033";

    fn fast_config() -> GatewayConfig {
        GatewayConfig {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            call_timeout: Duration::from_secs(5),
        }
    }

    fn gateway(generator: MockGenerator) -> ExtractionGateway<MockGenerator> {
        ExtractionGateway::new(generator, fast_config(), Arc::new(ResponseCache::default()))
    }

    fn sample_row() -> RawRow {
        RawRow::new(
            1,
            vec![
                ("tx_hash".to_string(), HASH.to_string()),
                ("purpose".to_string(), "Lunch".to_string()),
            ],
        )
    }

    fn call_json(method: &str) -> String {
        json!({"method": method, "params": {"chain": "ETHEREUM", "tx_hash": HASH}}).to_string()
    }

    #[tokio::test]
    async fn request_call_happy_path() {
        let gw = gateway(MockGenerator::new(&call_json("get_transaction")));
        let call = gw
            .request_call(None, FunctionType::GetTransaction, &sample_row())
            .await
            .unwrap();
        assert_eq!(call.method, FunctionType::GetTransaction);
        assert_eq!(call.params["tx_hash"], HASH);
    }

    #[tokio::test]
    async fn retries_after_transient_failure() {
        let gw = gateway(MockGenerator::with_script(vec![
            Err("connection refused".to_string()),
            Ok(call_json("get_transaction")),
        ]));
        let call = gw
            .request_call(None, FunctionType::GetTransaction, &sample_row())
            .await
            .unwrap();
        assert_eq!(call.method, FunctionType::GetTransaction);
    }

    #[tokio::test]
    async fn retries_after_malformed_payload() {
        let gw = gateway(MockGenerator::with_script(vec![
            Ok("I cannot answer that.".to_string()),
            Ok(call_json("get_receipt")),
        ]));
        let call = gw
            .request_call(None, FunctionType::GetReceipt, &sample_row())
            .await
            .unwrap();
        assert_eq!(call.method, FunctionType::GetReceipt);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let gw = gateway(MockGenerator::with_script(vec![
            Err("down".to_string()),
            Err("down".to_string()),
            Err("still down".to_string()),
        ]));
        let err = gw
            .request_call(None, FunctionType::GetTransaction, &sample_row())
            .await
            .unwrap_err();
        assert!(err.contains("still down"));
    }

    #[tokio::test]
    async fn timeout_is_reported_as_such() {
        let generator =
            MockGenerator::new(&call_json("get_transaction")).with_delay(Duration::from_secs(2));
        let gw = ExtractionGateway::new(
            generator,
            GatewayConfig {
                max_retries: 2,
                base_delay: Duration::from_millis(1),
                call_timeout: Duration::from_millis(20),
            },
            Arc::new(ResponseCache::default()),
        );
        let err = gw
            .request_call(None, FunctionType::GetTransaction, &sample_row())
            .await
            .unwrap_err();
        assert!(err.contains("timed out"), "got: {}", err);
    }

    #[tokio::test]
    async fn rejects_mismatched_method_then_recovers() {
        let gw = gateway(MockGenerator::with_script(vec![
            Ok(call_json("get_receipt")),
            Ok(call_json("get_transaction")),
        ]));
        let call = gw
            .request_call(None, FunctionType::GetTransaction, &sample_row())
            .await
            .unwrap();
        assert_eq!(call.method, FunctionType::GetTransaction);
    }

    #[tokio::test]
    async fn hash_aliases_are_folded() {
        let response =
            json!({"method": "get_transaction", "params": {"chain": "ETHEREUM", "transactionHash": HASH}})
                .to_string();
        let gw = gateway(MockGenerator::new(&response));
        let call = gw
            .request_call(None, FunctionType::GetTransaction, &sample_row())
            .await
            .unwrap();
        assert_eq!(call.params["tx_hash"], HASH);
    }

    #[tokio::test]
    async fn cache_serves_repeat_prompts() {
        // Script holds exactly one good response; the second identical call
        // must be answered from the cache, not the exhausted script.
        let gw = gateway(MockGenerator::with_script(vec![Ok(call_json(
            "get_transaction",
        ))]));
        let first = gw
            .request_call(None, FunctionType::GetTransaction, &sample_row())
            .await
            .unwrap();
        let second = gw
            .request_call(None, FunctionType::GetTransaction, &sample_row())
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn infer_function_and_rows_parses_shape() {
        let response = json!({
            "function": "tag_as_expense",
            "rows": [{"tx_hash": HASH, "purpose": "Lunch"}]
        })
        .to_string();
        let gw = gateway(MockGenerator::new(&response));
        let (function, rows) = gw
            .infer_function_and_rows("tag these as expenses", &[sample_row()])
            .await
            .unwrap();
        assert_eq!(function, FunctionType::TagAsExpense);
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn infer_function_rejects_unknown_name() {
        let gw = gateway(MockGenerator::new(
            &json!({"function": "delete_everything", "rows": []}).to_string(),
        ));
        let err = gw
            .infer_function_and_rows("do it", &[sample_row()])
            .await
            .unwrap_err();
        assert!(err.contains("delete_everything"));
    }

    #[tokio::test]
    async fn infer_call_list_keeps_partial_success() {
        let response = json!([
            {"method": "get_receipt", "params": {"chain": "ETHEREUM", "tx_hash": HASH}},
            {"method": "not_a_method", "params": {}},
            {"params": {"tx_hash": HASH}}
        ])
        .to_string();
        let gw = gateway(MockGenerator::new(&response));
        let (calls, errors) = gw
            .infer_call_list("get receipts", &[sample_row()])
            .await
            .unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].method, FunctionType::GetReceipt);
        assert_eq!(errors.len(), 2);
    }

    #[tokio::test]
    async fn infer_call_list_fails_when_nothing_validates() {
        let gw = gateway(MockGenerator::new(
            &json!([{"method": "bogus", "params": {}}]).to_string(),
        ));
        let err = gw
            .infer_call_list("get receipts", &[sample_row()])
            .await
            .unwrap_err();
        assert!(err.contains("no valid API call items"));
    }

    #[test]
    fn bare_string_item_is_a_parameterless_call() {
        let call = validate_call_object(&json!("list_chains"), None).unwrap();
        assert_eq!(call.method, FunctionType::ListChains);
        assert!(call.params.is_empty());
    }
}
