use crate::core::extract::FieldExtractor;
use crate::domain::model::{CleanedRow, RawRow, SkippedRow, DEFAULT_CATEGORY};

/// Outcome of normalizing one raw row.
#[derive(Debug, Clone)]
pub enum NormalizedRow {
    Cleaned(CleanedRow),
    Skipped(SkippedRow),
}

/// Merges extractor output into a canonical CleanedRow, or drops the row
/// with a recorded reason. Dropping is expected lossy input, not an error.
#[derive(Debug, Clone, Default)]
pub struct RowNormalizer {
    extractor: FieldExtractor,
}

impl RowNormalizer {
    pub fn new(extractor: FieldExtractor) -> Self {
        Self { extractor }
    }

    pub fn extractor(&self) -> &FieldExtractor {
        &self.extractor
    }

    pub fn normalize(&self, row: &RawRow) -> NormalizedRow {
        let fields = self.extractor.extract(row);

        let Some(tx_hash) = fields.tx_hash else {
            tracing::warn!(row = row.row_number(), "no valid tx_hash found, skipping");
            return NormalizedRow::Skipped(SkippedRow {
                row_number: row.row_number(),
                reason: "no valid tx_hash found".to_string(),
            });
        };

        let chain = fields.chain.unwrap_or_default();
        let mut cleaned = match CleanedRow::new(row.row_number(), tx_hash, chain) {
            Ok(cleaned) => cleaned,
            Err(e) => {
                return NormalizedRow::Skipped(SkippedRow {
                    row_number: row.row_number(),
                    reason: e.to_string(),
                })
            }
        };

        cleaned.expense_category = fields
            .category
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());
        cleaned.amount_in_eth = fields.amount_in_eth;
        cleaned.amount_in_usd = fields.amount_in_usd;

        NormalizedRow::Cleaned(cleaned)
    }

    pub fn normalize_all(&self, rows: &[RawRow]) -> (Vec<CleanedRow>, Vec<SkippedRow>) {
        let mut cleaned = Vec::new();
        let mut skipped = Vec::new();
        for row in rows {
            match self.normalize(row) {
                NormalizedRow::Cleaned(c) => cleaned.push(c),
                NormalizedRow::Skipped(s) => skipped.push(s),
            }
        }
        tracing::info!(
            cleaned = cleaned.len(),
            skipped = skipped.len(),
            "normalized {} rows",
            rows.len()
        );
        (cleaned, skipped)
    }
}
