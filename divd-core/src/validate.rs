//! Input Validation
//!
//! Validators for ticker symbols and API keys. Patterns are compiled once.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{CoreError, CoreResult};

/// Valid ticker symbol: 1-10 uppercase ASCII letters, optionally dotted
/// (share classes such as `BRK.B`).
static SYMBOL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z]{1,10}(\.[A-Z]{1,4})?$").expect("Invalid symbol regex"));

/// Valid API key: `tk_` prefix followed by at least six key characters.
static API_KEY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^tk_[A-Za-z0-9_]{6,}$").expect("Invalid API key regex"));

/// Trim and uppercase a raw symbol without validating it.
pub fn normalize_symbol(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

/// Normalize and validate a ticker symbol.
pub fn validate_symbol(raw: &str) -> CoreResult<String> {
    let symbol = normalize_symbol(raw);
    if SYMBOL_PATTERN.is_match(&symbol) {
        Ok(symbol)
    } else {
        Err(CoreError::InvalidSymbol(raw.to_string()))
    }
}

/// Validate the format of an API key.
///
/// Format checking happens before any store lookup so malformed keys are
/// rejected without touching the database.
pub fn validate_api_key(key: &str) -> CoreResult<()> {
    if API_KEY_PATTERN.is_match(key) {
        Ok(())
    } else {
        Err(CoreError::InvalidApiKey)
    }
}

/// Normalize a list of raw symbols, silently dropping invalid entries.
///
/// Duplicates are removed while preserving first-seen order.
pub fn filter_symbols(raw: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    raw.iter()
        .filter_map(|s| validate_symbol(s).ok())
        .filter(|s| seen.insert(s.clone()))
        .collect()
}
