//! Model reply parsing
//!
//! Lenient recovery of JSON objects from model output.
//!
//! # Example
//!
//! ```rust
//! use keel_core::parsing::{JsonParser, OutputParser};
//!
//! let parser = JsonParser::new();
//! let object = parser.parse("```json\n{\"HULL_TYPE\": \"Pontoon\",}\n```").unwrap();
//! assert_eq!(object["HULL_TYPE"], "Pontoon");
//! ```

mod json;
mod parser;

pub use json::{JsonParser, number_field, text_field};
pub use parser::{OutputParser, ParseError, ParseResult, ParserConfig};
