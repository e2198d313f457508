use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use url::Url;

use crate::domain::model::{is_tx_hash, Chain, FieldDiagnostic, RawRow};

/// Built-in explorer-domain table. Longest matching domain wins, so
/// optimistic.etherscan.io resolves to Optimism even though it also ends
/// with etherscan.io.
pub const EXPLORER_DOMAINS: &[(&str, Chain)] = &[
    ("etherscan.io", Chain::Ethereum),
    ("optimistic.etherscan.io", Chain::Optimism),
    ("polygonscan.com", Chain::Polygon),
    ("arbiscan.io", Chain::Arbitrum),
    ("basescan.org", Chain::Base),
];

/// Built-in column aliases: messy source headers mapped to canonical names.
pub const DEFAULT_ALIASES: &[(&str, &str)] = &[
    ("transaction_link", "tx_link"),
    ("txn_link", "tx_link"),
    ("transaction link", "tx_link"),
    ("purpose", "expense_category"),
    ("category", "expense_category"),
    ("contract", "contract_address"),
    ("address", "contract_address"),
    ("event", "event_signature"),
    ("event_name", "event_signature"),
    ("account", "account_id"),
];

fn hash_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"0x[0-9a-fA-F]{64}").expect("valid hash regex"))
}

/// Typed candidate fields pulled out of one raw row.
#[derive(Debug, Clone, Default)]
pub struct ExtractedFields {
    pub tx_hash: Option<String>,
    /// True when the hash came from a hash-shaped field rather than a URL.
    pub hash_from_field: bool,
    pub chain: Option<Chain>,
    pub category: Option<String>,
    pub amount_in_eth: Option<f64>,
    pub amount_in_usd: Option<f64>,
    pub diagnostics: Vec<FieldDiagnostic>,
}

/// Parses raw rows into typed candidate fields. Never rejects a row itself;
/// failed values become diagnostics and the normalizer decides what to drop.
#[derive(Debug, Clone)]
pub struct FieldExtractor {
    aliases: HashMap<String, String>,
    explorers: Vec<(String, Chain)>,
}

impl Default for FieldExtractor {
    fn default() -> Self {
        Self::new(
            DEFAULT_ALIASES
                .iter()
                .map(|(a, c)| (a.to_string(), c.to_string()))
                .collect(),
            EXPLORER_DOMAINS
                .iter()
                .map(|(d, c)| (d.to_string(), *c))
                .collect(),
        )
    }
}

impl FieldExtractor {
    pub fn new(aliases: HashMap<String, String>, explorers: Vec<(String, Chain)>) -> Self {
        let aliases = aliases
            .into_iter()
            .map(|(a, c)| (a.trim().to_ascii_lowercase(), c))
            .collect();
        Self { aliases, explorers }
    }

    /// Canonical name for a source column, via the alias table.
    pub fn canonical(&self, column: &str) -> String {
        let key = column.trim().to_ascii_lowercase();
        self.aliases.get(&key).cloned().unwrap_or(key)
    }

    /// Value of the first column whose canonical name matches.
    pub fn lookup<'a>(&self, row: &'a RawRow, canonical_name: &str) -> Option<&'a str> {
        row.fields()
            .find(|(k, v)| self.canonical(k) == canonical_name && !v.trim().is_empty())
            .map(|(_, v)| v.trim())
    }

    pub fn extract(&self, row: &RawRow) -> ExtractedFields {
        let mut fields = ExtractedFields::default();

        if let Some((hash, from_field)) = self.extract_tx_hash(row) {
            fields.tx_hash = Some(hash);
            fields.hash_from_field = from_field;
        }
        fields.chain = self.detect_chain(row);
        fields.category = self
            .lookup(row, "expense_category")
            .map(|v| v.to_string());

        for (name, value) in row.fields() {
            let canonical = self.canonical(name);
            if !canonical.starts_with("amount") || value.trim().is_empty() {
                continue;
            }
            match coerce_amount(value) {
                Some(amount) => {
                    if canonical.contains("usd") {
                        fields.amount_in_usd = Some(amount);
                    } else if canonical.contains("eth") || fields.amount_in_eth.is_none() {
                        fields.amount_in_eth = Some(amount);
                    } else {
                        fields.amount_in_usd = Some(amount);
                    }
                }
                None => {
                    let diagnostic = FieldDiagnostic {
                        row_number: row.row_number(),
                        field: name.to_string(),
                        value: value.to_string(),
                        reason: "could not parse amount as a number".to_string(),
                    };
                    tracing::warn!(
                        row = row.row_number(),
                        field = name,
                        value = value,
                        "invalid amount value"
                    );
                    fields.diagnostics.push(diagnostic);
                }
            }
        }

        fields
    }

    /// Search for a transaction hash in priority order: hash-shaped field,
    /// last URL path segment, any path segment, query values, then a raw
    /// token scan across every value. Returns the hash and whether it came
    /// from a direct field.
    pub fn extract_tx_hash(&self, row: &RawRow) -> Option<(String, bool)> {
        // (a) a field that is already hash-shaped
        for (_, value) in row.fields() {
            let value = value.trim();
            if is_tx_hash(value) {
                return Some((value.to_string(), true));
            }
        }

        let urls: Vec<Url> = row
            .fields()
            .filter_map(|(_, v)| parse_http_url(v))
            .collect();

        // (b) last path segment of a URL
        for url in &urls {
            if let Some(segment) = url.path_segments().and_then(|s| s.filter(|p| !p.is_empty()).last()) {
                if is_tx_hash(segment) {
                    return Some((segment.to_string(), false));
                }
            }
        }

        // (c) any path segment
        for url in &urls {
            if let Some(mut segments) = url.path_segments() {
                if let Some(segment) = segments.find(|p| is_tx_hash(p)) {
                    return Some((segment.to_string(), false));
                }
            }
        }

        // (d) query-parameter values
        for url in &urls {
            for (_, value) in url.query_pairs() {
                if is_tx_hash(&value) {
                    return Some((value.to_string(), false));
                }
            }
        }

        // (e) first 0x-prefixed hex token anywhere in the raw values
        for (_, value) in row.fields() {
            if let Some(m) = hash_regex().find(value) {
                if is_tx_hash(m.as_str()) {
                    return Some((m.as_str().to_string(), false));
                }
            }
        }

        None
    }

    /// Infer the chain from the first URL field that matches the explorer
    /// table. None when no URL matches; callers default to Ethereum.
    pub fn detect_chain(&self, row: &RawRow) -> Option<Chain> {
        for (_, value) in row.fields() {
            let Some(url) = parse_http_url(value) else {
                continue;
            };
            let Some(domain) = url.domain().map(|d| d.to_ascii_lowercase()) else {
                continue;
            };
            if let Some(chain) = self.match_domain(&domain) {
                return Some(chain);
            }
        }
        None
    }

    fn match_domain(&self, domain: &str) -> Option<Chain> {
        let mut best: Option<(&str, Chain)> = None;
        for (key, chain) in &self.explorers {
            let matches = domain == key || domain.ends_with(&format!(".{}", key));
            if matches && best.map_or(true, |(b, _)| key.len() > b.len()) {
                best = Some((key, *chain));
            }
        }
        best.map(|(_, c)| c)
    }
}

fn parse_http_url(value: &str) -> Option<Url> {
    let url = Url::parse(value.trim()).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(url)
}

/// Strip currency markers and thousands separators, then parse as f64.
/// Invalid content yields None, never an error.
pub fn coerce_amount(raw: &str) -> Option<f64> {
    let mut cleaned = raw.trim().to_string();
    for marker in ["$", ",", "USD", "usd", "Usd", "ETH", "eth", "Eth"] {
        cleaned = cleaned.replace(marker, "");
    }
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse().ok()
}
