//! Reply parser trait and error types

use thiserror::Error;

/// Error type for model reply parsing
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// Reply contained no usable text
    #[error("Empty reply")]
    EmptyInput,

    /// No JSON object could be recovered from the reply
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Reply parsed but lacks keys the caller requires
    #[error("Missing required field(s): {}", .0.join(", "))]
    MissingFields(Vec<String>),
}

/// Result type for parsing operations
pub type ParseResult<T> = Result<T, ParseError>;

/// Trait for model reply parsers
pub trait OutputParser: Send + Sync {
    /// The output type produced by this parser
    type Output;

    /// Parse the raw reply text
    fn parse(&self, raw: &str) -> ParseResult<Self::Output>;

    /// Get the parser name for debugging
    fn name(&self) -> &'static str;
}

/// Configuration for parser behavior
#[derive(Debug, Clone)]
pub struct ParserConfig {
    /// Attempt to repair malformed JSON
    pub attempt_repair: bool,
    /// Strip markdown code fences
    pub strip_code_fences: bool,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            attempt_repair: true,
            strip_code_fences: true,
        }
    }
}

impl ParserConfig {
    /// Create a strict config (no repair attempts)
    pub fn strict() -> Self {
        Self {
            attempt_repair: false,
            strip_code_fences: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_message() {
        let err = ParseError::MissingFields(vec!["HULL_TYPE".into(), "LENGTH".into()]);
        assert_eq!(err.to_string(), "Missing required field(s): HULL_TYPE, LENGTH");
    }

    #[test]
    fn test_parser_config_strict() {
        assert!(ParserConfig::default().attempt_repair);
        assert!(!ParserConfig::strict().attempt_repair);
    }
}
