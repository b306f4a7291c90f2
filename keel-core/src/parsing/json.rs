//! JSON object parser for model replies

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

use super::parser::{OutputParser, ParseError, ParseResult, ParserConfig};

static CODE_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```(?:json|JSON)?\s*\n?([\s\S]*?)\n?```").expect("static regex")
});

static TRAILING_COMMA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",(\s*[}\]])").expect("static regex"));

/// Recovers a single JSON object from free-form model output.
///
/// Vision and chat models routinely wrap their answer in a markdown fence,
/// prefix it with prose, use typographic quotes or leave a trailing comma.
/// Anything that still does not yield an object is a [`ParseError`].
pub struct JsonParser {
    config: ParserConfig,
}

impl JsonParser {
    pub fn new() -> Self {
        Self {
            config: ParserConfig::default(),
        }
    }

    /// Create a strict parser (no repair)
    pub fn strict() -> Self {
        Self {
            config: ParserConfig::strict(),
        }
    }

    /// Parse and check that every key in `required` is present
    pub fn parse_with_keys(&self, raw: &str, required: &[&str]) -> ParseResult<Map<String, Value>> {
        let object = self.parse(raw)?;
        let missing: Vec<String> = required
            .iter()
            .filter(|key| !object.contains_key(**key))
            .map(|key| key.to_string())
            .collect();

        if missing.is_empty() {
            Ok(object)
        } else {
            Err(ParseError::MissingFields(missing))
        }
    }

    fn strip_code_fences<'a>(&self, input: &'a str) -> &'a str {
        CODE_FENCE_RE
            .captures(input)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
            .unwrap_or(input)
    }

    /// Slice out the first balanced `{...}` block
    fn extract_object<'a>(&self, input: &'a str) -> Option<&'a str> {
        let start = input.find('{')?;
        let body = &input[start..];
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;

        for (i, c) in body.char_indices() {
            if escaped {
                escaped = false;
                continue;
            }
            match c {
                '\\' if in_string => escaped = true,
                '"' => in_string = !in_string,
                '{' if !in_string => depth += 1,
                '}' if !in_string => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return Some(&body[..=i]);
                    }
                }
                _ => {}
            }
        }

        None
    }

    fn repair(&self, input: &str) -> String {
        let normalized: String = input
            .chars()
            .map(|c| match c {
                '\u{201C}' | '\u{201D}' => '"',
                '\u{2018}' | '\u{2019}' => '\'',
                _ => c,
            })
            .collect();
        TRAILING_COMMA_RE.replace_all(&normalized, "$1").into_owned()
    }

    fn try_object(text: &str) -> Option<Map<String, Value>> {
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        }
    }
}

impl Default for JsonParser {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputParser for JsonParser {
    type Output = Map<String, Value>;

    fn parse(&self, raw: &str) -> ParseResult<Self::Output> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ParseError::EmptyInput);
        }

        let input = if self.config.strip_code_fences {
            self.strip_code_fences(trimmed).trim()
        } else {
            trimmed
        };

        if let Some(object) = Self::try_object(input) {
            return Ok(object);
        }

        let candidate = self.extract_object(input);
        if let Some(object) = candidate.and_then(Self::try_object) {
            return Ok(object);
        }

        if self.config.attempt_repair {
            let repaired = self.repair(candidate.unwrap_or(input));
            if let Some(object) = Self::try_object(&repaired)
                .or_else(|| self.extract_object(&repaired).and_then(Self::try_object))
            {
                return Ok(object);
            }
        }

        let preview: String = trimmed.chars().take(80).collect();
        Err(ParseError::InvalidFormat(format!(
            "no JSON object found in reply: {}",
            preview
        )))
    }

    fn name(&self) -> &'static str {
        "json"
    }
}

/// Read a numeric field that the model may have written as a number or a
/// numeric string
pub fn number_field(object: &Map<String, Value>, key: &str) -> Option<f64> {
    match object.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

/// Read a field as display text, treating null and empty strings as absent
pub fn text_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    match object.get(key)? {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.trim().to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.trim().to_string()),
                    Value::Null => None,
                    other => Some(other.to_string()),
                })
                .filter(|s| !s.is_empty())
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(", "))
            }
        }
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_plain_object() {
        let parser = JsonParser::new();
        let result = parser.parse(r#"{"HULL_TYPE": "V-Bottom"}"#).unwrap();
        assert_eq!(result["HULL_TYPE"], "V-Bottom");
    }

    #[test]
    fn test_parse_fenced_with_prose() {
        let parser = JsonParser::new();
        let input = "Here is my analysis:\n```json\n{\"LENGTH\": \"23 ft\"}\n```\nLet me know!";
        let result = parser.parse(input).unwrap();
        assert_eq!(result["LENGTH"], "23 ft");
    }

    #[test]
    fn test_parse_object_in_text() {
        let parser = JsonParser::new();
        let result = parser
            .parse(r#"Sure. {"block_coefficient": 0.45} Hope that helps."#)
            .unwrap();
        assert_eq!(result["block_coefficient"], 0.45);
    }

    #[test]
    fn test_repair_trailing_comma_and_smart_quotes() {
        let parser = JsonParser::new();
        let result = parser.parse("{\u{201C}BEAM\u{201D}: \u{201C}8 ft\u{201D},}").unwrap();
        assert_eq!(result["BEAM"], "8 ft");

        assert!(JsonParser::strict().parse(r#"{"BEAM": "8 ft",}"#).is_err());
    }

    #[test]
    fn test_rejects_non_object() {
        let parser = JsonParser::new();
        assert_eq!(parser.parse("   "), Err(ParseError::EmptyInput));
        assert!(matches!(
            parser.parse("I cannot see a boat in this picture."),
            Err(ParseError::InvalidFormat(_))
        ));
        assert!(matches!(parser.parse("[1, 2]"), Err(ParseError::InvalidFormat(_))));
    }

    #[test]
    fn test_parse_with_keys_reports_missing() {
        let parser = JsonParser::new();
        let err = parser
            .parse_with_keys(r#"{"HULL_TYPE": "Pontoon"}"#, &["HULL_TYPE", "LENGTH", "BEAM"])
            .unwrap_err();
        assert_eq!(
            err,
            ParseError::MissingFields(vec!["LENGTH".to_string(), "BEAM".to_string()])
        );
    }

    #[test]
    fn test_field_helpers() {
        let object = json!({
            "a": 1.5,
            "b": " 2.5 ",
            "c": "n/a",
            "d": ["Solar panel", "Generator"],
            "e": "",
            "f": null
        });
        let object = object.as_object().unwrap();

        assert_eq!(number_field(object, "a"), Some(1.5));
        assert_eq!(number_field(object, "b"), Some(2.5));
        assert_eq!(number_field(object, "c"), None);
        assert_eq!(text_field(object, "d").as_deref(), Some("Solar panel, Generator"));
        assert_eq!(text_field(object, "e"), None);
        assert_eq!(text_field(object, "f"), None);
    }
}
