use std::collections::HashMap;

use crate::domain::model::{CleanedRow, FunctionType};
use crate::utils::error::{PipelineError, Result};

/// Instruction keywords checked in order; the first phrase contained in the
/// instruction wins. Expense phrases come before the generic "transaction"
/// so "tag these transactions as expenses" classifies as tag_as_expense.
const KEYWORD_TABLE: &[(&str, FunctionType)] = &[
    ("expense", FunctionType::TagAsExpense),
    ("tag", FunctionType::TagAsExpense),
    ("categorize", FunctionType::TagAsExpense),
    ("mark as", FunctionType::TagAsExpense),
    ("receipt", FunctionType::GetReceipt),
    ("gas", FunctionType::GetReceipt),
    ("event", FunctionType::GetEvents),
    ("logs", FunctionType::GetEvents),
    ("fill", FunctionType::FillAccountBy),
    ("credit", FunctionType::FillAccountBy),
    ("top up", FunctionType::FillAccountBy),
    ("list chains", FunctionType::ListChains),
    ("supported chains", FunctionType::ListChains),
    ("available chains", FunctionType::ListChains),
    ("transaction", FunctionType::GetTransaction),
    ("detail", FunctionType::GetTransaction),
    ("look up", FunctionType::GetTransaction),
];

/// Heuristic classification for one row. Never fails: a row with only a
/// hash falls back to get_transaction.
pub fn classify_row(row: &CleanedRow) -> FunctionType {
    if !row.has_default_category() || row.has_amount() {
        FunctionType::TagAsExpense
    } else {
        FunctionType::GetTransaction
    }
}

/// Majority vote across rows; ties break by FunctionType declaration order.
/// An empty batch defaults to get_transaction.
pub fn classify_batch(rows: &[CleanedRow]) -> FunctionType {
    if rows.is_empty() {
        tracing::warn!("no valid rows to classify, defaulting to get_transaction");
        return FunctionType::GetTransaction;
    }

    let mut counts: HashMap<FunctionType, usize> = HashMap::new();
    for row in rows {
        *counts.entry(classify_row(row)).or_insert(0) += 1;
    }

    let mut winner = FunctionType::GetTransaction;
    let mut best = 0;
    for function in FunctionType::ALL {
        let count = counts.get(&function).copied().unwrap_or(0);
        if count > best {
            best = count;
            winner = function;
        }
    }
    tracing::info!(function = %winner, votes = best, "selected batch function");
    winner
}

/// Map an explicit natural-language instruction to a function. Unlike the
/// heuristic paths this fails loudly when nothing matches: a stated intent
/// must never be silently defaulted.
pub fn classify_instruction(instruction: &str) -> Result<FunctionType> {
    let lowered = instruction.to_lowercase();
    for (phrase, function) in KEYWORD_TABLE {
        if lowered.contains(phrase) {
            tracing::debug!(phrase, function = %function, "matched instruction keyword");
            return Ok(*function);
        }
    }
    Err(PipelineError::ClassificationError {
        instruction: instruction.to_string(),
    })
}
