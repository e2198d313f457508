//! Optional TOML overrides for the column-alias and explorer-domain tables.
//!
//! ```toml
//! [columns]
//! "tx url" = "tx_link"
//! memo = "expense_category"
//!
//! [explorers]
//! "blockscout.com" = "ETHEREUM"
//! ```

use std::collections::HashMap;

use serde::Deserialize;

use crate::core::extract::{FieldExtractor, DEFAULT_ALIASES, EXPLORER_DOMAINS};
use crate::domain::model::Chain;
use crate::utils::error::{PipelineError, Result};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AliasConfig {
    #[serde(default)]
    pub columns: HashMap<String, String>,

    /// Explorer domain to chain name. Values must name a known chain;
    /// unknown names are skipped with a warning rather than failing the run.
    #[serde(default)]
    pub explorers: HashMap<String, String>,
}

impl AliasConfig {
    pub fn from_path(path: &str) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_str(&text)
    }

    pub fn from_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| PipelineError::ConfigError {
            message: format!("invalid alias config: {}", e),
        })
    }

    /// Built-in tables merged with the overrides; file entries win on
    /// conflicting keys.
    pub fn build_extractor(&self) -> FieldExtractor {
        let mut aliases: HashMap<String, String> = DEFAULT_ALIASES
            .iter()
            .map(|(alias, canonical)| (alias.to_string(), canonical.to_string()))
            .collect();
        for (alias, canonical) in &self.columns {
            aliases.insert(
                alias.trim().to_ascii_lowercase(),
                canonical.trim().to_string(),
            );
        }

        let mut explorers: Vec<(String, Chain)> = EXPLORER_DOMAINS
            .iter()
            .map(|(domain, chain)| (domain.to_string(), *chain))
            .collect();
        for (domain, chain_name) in &self.explorers {
            let Some(chain) = Chain::from_name(chain_name) else {
                tracing::warn!(%domain, chain = %chain_name, "unknown chain in alias config, skipping");
                continue;
            };
            let domain = domain.trim().to_ascii_lowercase();
            if let Some(entry) = explorers.iter_mut().find(|(d, _)| *d == domain) {
                entry.1 = chain;
            } else {
                explorers.push((domain, chain));
            }
        }

        FieldExtractor::new(aliases, explorers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::RawRow;

    #[test]
    fn empty_config_matches_builtins() {
        let extractor = AliasConfig::default().build_extractor();
        assert_eq!(extractor.canonical("purpose"), "expense_category");
    }

    #[test]
    fn custom_column_alias_wins() {
        let config = AliasConfig::from_str(
            r#"
[columns]
memo = "expense_category"
purpose = "account_id"
"#,
        )
        .unwrap();
        let extractor = config.build_extractor();
        assert_eq!(extractor.canonical("memo"), "expense_category");
        assert_eq!(extractor.canonical("purpose"), "account_id");
        // Untouched builtins survive.
        assert_eq!(extractor.canonical("category"), "expense_category");
    }

    #[test]
    fn custom_explorer_domain_is_recognized() {
        let config = AliasConfig::from_str(
            r#"
[explorers]
"blockscout.com" = "BASE"
"#,
        )
        .unwrap();
        let extractor = config.build_extractor();
        let hash = format!("0x{}", "e".repeat(64));
        let row = RawRow::new(
            1,
            vec![(
                "tx_link".to_string(),
                format!("https://blockscout.com/tx/{}", hash),
            )],
        );
        assert_eq!(extractor.detect_chain(&row), Some(Chain::Base));
    }

    #[test]
    fn unknown_chain_name_is_skipped() {
        let config = AliasConfig::from_str(
            r#"
[explorers]
"solscan.io" = "SOLANA"
"#,
        )
        .unwrap();
        let extractor = config.build_extractor();
        let row = RawRow::new(
            1,
            vec![(
                "tx_link".to_string(),
                format!("https://solscan.io/tx/0x{}", "e".repeat(64)),
            )],
        );
        assert_eq!(extractor.detect_chain(&row), None);
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let err = AliasConfig::from_str("[columns\nbroken").unwrap_err();
        assert!(matches!(err, PipelineError::ConfigError { .. }));
    }
}
