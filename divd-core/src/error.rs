//! Core Error Types

use thiserror::Error;

/// Errors raised by domain-level validation and conversions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Ticker symbol failed validation
    #[error("Invalid ticker symbol: {0}")]
    InvalidSymbol(String),

    /// API key failed format validation
    #[error("Invalid API key format")]
    InvalidApiKey,

    /// A dividend record failed validation
    #[error("Invalid dividend record: {0}")]
    InvalidDividend(String),

    /// A field could not be parsed
    #[error("Parse error for {field}: {message}")]
    Parse { field: String, message: String },
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Create a parse error
    pub fn parse(field: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::Parse {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::InvalidSymbol("toolongsymbol".to_string());
        assert!(err.to_string().contains("toolongsymbol"));

        let err = CoreError::parse("amount", "not a decimal");
        assert!(err.to_string().contains("amount"));
    }
}
