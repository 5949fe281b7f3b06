//! Turning generated text into validated structured values.
//!
//! The resolver never fails. It either yields a value that passed the
//! schema or a capped list of cleaned lines derived from the raw text.

use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

/// Default number of lines kept by the degraded path.
pub const DEFAULT_FALLBACK_CAP: usize = 60;

/// How many opening brackets are tried before giving up on a span.
const MAX_SPAN_CANDIDATES: usize = 16;

/// Reasons the structured path rejected a text. Always absorbed by the
/// resolver; exposed for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuredOutputError {
    #[error("no structured span found")]
    NoSpan,

    #[error("span is not valid JSON: {0}")]
    Unparsable(String),

    #[error("{path}: expected {expected}")]
    WrongShape { path: String, expected: &'static str },

    #[error("{path}: '{value}' is not one of {allowed:?}")]
    InvalidEnum {
        path: String,
        value: String,
        allowed: Vec<String>,
    },

    #[error("{path}: required field missing")]
    MissingField { path: String },

    #[error("{path}: must not be empty")]
    EmptyString { path: String },
}

/// Shape description a structured value must satisfy.
#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    String { non_empty: bool },
    Enum(Vec<String>),
    Array(Box<Schema>),
    Object(Vec<Field>),
}

/// One property of an object schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub schema: Schema,
    /// Value used when the field is absent. `None` makes the field required.
    pub default: Option<Value>,
}

impl Field {
    pub fn required(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema,
            default: None,
        }
    }

    pub fn with_default(name: impl Into<String>, schema: Schema, default: Value) -> Self {
        Self {
            name: name.into(),
            schema,
            default: Some(default),
        }
    }
}

impl Schema {
    pub fn string() -> Self {
        Schema::String { non_empty: false }
    }

    pub fn non_empty_string() -> Self {
        Schema::String { non_empty: true }
    }

    pub fn one_of<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Schema::Enum(tags.into_iter().map(Into::into).collect())
    }

    pub fn array(items: Schema) -> Self {
        Schema::Array(Box::new(items))
    }

    pub fn object(fields: Vec<Field>) -> Self {
        Schema::Object(fields)
    }

    /// Check `value` and return its normalized form: unknown object
    /// properties dropped, absent defaulted properties filled in.
    pub fn validate(&self, value: &Value) -> Result<Value, StructuredOutputError> {
        self.validate_at(value, "$")
    }

    fn validate_at(&self, value: &Value, path: &str) -> Result<Value, StructuredOutputError> {
        match self {
            Schema::String { non_empty } => {
                let s = value.as_str().ok_or_else(|| wrong(path, "string"))?;
                if *non_empty && s.trim().is_empty() {
                    return Err(StructuredOutputError::EmptyString { path: path.to_string() });
                }
                Ok(value.clone())
            }
            Schema::Enum(allowed) => {
                let s = value.as_str().ok_or_else(|| wrong(path, "string tag"))?;
                if !allowed.iter().any(|a| a == s) {
                    return Err(StructuredOutputError::InvalidEnum {
                        path: path.to_string(),
                        value: s.to_string(),
                        allowed: allowed.clone(),
                    });
                }
                Ok(value.clone())
            }
            Schema::Array(items) => {
                let arr = value.as_array().ok_or_else(|| wrong(path, "array"))?;
                arr.iter()
                    .enumerate()
                    .map(|(i, v)| items.validate_at(v, &format!("{}[{}]", path, i)))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array)
            }
            Schema::Object(fields) => {
                let obj = value.as_object().ok_or_else(|| wrong(path, "object"))?;
                let mut out = Map::new();
                for field in fields {
                    let field_path = format!("{}.{}", path, field.name);
                    match (obj.get(&field.name), &field.default) {
                        (Some(v), _) => {
                            out.insert(field.name.clone(), field.schema.validate_at(v, &field_path)?);
                        }
                        (None, Some(default)) => {
                            out.insert(field.name.clone(), default.clone());
                        }
                        (None, None) => {
                            return Err(StructuredOutputError::MissingField { path: field_path });
                        }
                    }
                }
                Ok(Value::Object(out))
            }
        }
    }
}

fn wrong(path: &str, expected: &'static str) -> StructuredOutputError {
    StructuredOutputError::WrongShape {
        path: path.to_string(),
        expected,
    }
}

/// Outcome of resolving generated text.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved<T> {
    Structured(T),
    Degraded(Vec<String>),
}

impl<T> Resolved<T> {
    pub fn is_structured(&self) -> bool {
        matches!(self, Resolved::Structured(_))
    }

    pub fn structured(&self) -> Option<&T> {
        match self {
            Resolved::Structured(v) => Some(v),
            Resolved::Degraded(_) => None,
        }
    }
}

/// Converts raw generated text into `T` or a degraded line list.
#[derive(Debug, Clone, Copy)]
pub struct StructuredOutputResolver {
    cap: usize,
}

impl Default for StructuredOutputResolver {
    fn default() -> Self {
        Self::new(DEFAULT_FALLBACK_CAP)
    }
}

impl StructuredOutputResolver {
    pub fn new(cap: usize) -> Self {
        Self { cap }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Structured path first, lines on any failure.
    pub fn resolve<T: DeserializeOwned>(&self, raw: &str, schema: &Schema) -> Resolved<T> {
        match self.try_structured(raw, schema) {
            Ok(value) => Resolved::Structured(value),
            Err(e) => {
                debug!(error = %e, "Structured output rejected, degrading to lines");
                Resolved::Degraded(self.degrade(raw))
            }
        }
    }

    /// Lines only, for callers that did not ask for structure.
    pub fn resolve_lines(&self, raw: &str) -> Vec<String> {
        self.degrade(raw)
    }

    pub fn try_structured<T: DeserializeOwned>(
        &self,
        raw: &str,
        schema: &Schema,
    ) -> Result<T, StructuredOutputError> {
        let normalized = first_span_where(raw, |value| schema.validate(&value))?;
        serde_json::from_value(normalized).map_err(|e| StructuredOutputError::Unparsable(e.to_string()))
    }

    /// Split into lines, strip list markers and whitespace, drop blanks, cap.
    pub fn degrade(&self, raw: &str) -> Vec<String> {
        raw.lines()
            .map(|line| list_marker().replace(line, "").trim().to_string())
            .filter(|line| !line.is_empty())
            .take(self.cap)
            .collect()
    }
}

fn list_marker() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| {
        Regex::new(r"^\s*(?:-+\s*|[*+•]\s+|\d+[.)]\s+)").expect("list marker regex is valid")
    })
}

/// Find and parse the first plausible JSON span in `raw`.
pub fn extract_json(raw: &str) -> Result<Value, StructuredOutputError> {
    first_span_where(raw, Ok)
}

/// The first span in `raw` that parses as JSON and passes `accept`.
///
/// Candidates start at each `{` or `[` in order, so a bracketed aside such
/// as `[1]` ahead of the real payload is skipped once `accept` rejects it.
/// Only the first span that never closes is repaired as truncated output.
fn first_span_where<F>(raw: &str, mut accept: F) -> Result<Value, StructuredOutputError>
where
    F: FnMut(Value) -> Result<Value, StructuredOutputError>,
{
    let text = strip_code_fences(raw);
    let mut last_err = StructuredOutputError::NoSpan;
    let mut repaired = false;

    let openers = text
        .char_indices()
        .filter(|(_, c)| *c == '{' || *c == '[')
        .map(|(i, _)| i)
        .take(MAX_SPAN_CANDIDATES);

    for start in openers {
        let candidate = match balanced_span(&text[start..]) {
            Some(span) => span.to_string(),
            None if !repaired => {
                repaired = true;
                balance_braces(text[start..].trim_end())
            }
            None => continue,
        };
        let value = match serde_json::from_str::<Value>(&candidate) {
            Ok(value) => value,
            Err(e) => {
                last_err = StructuredOutputError::Unparsable(e.to_string());
                continue;
            }
        };
        match accept(value) {
            Ok(value) => return Ok(value),
            Err(e) => last_err = e,
        }
    }
    Err(last_err)
}

/// Strip markdown code fences from text.
fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        // Skip optional language tag on same line
        let content_start = after.find('\n').map_or(0, |p| p + 1);
        let after = &after[content_start..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    trimmed.to_string()
}

/// The prefix of `text` (which starts with an opener) up to its matching
/// closer, ignoring brackets inside strings. `None` if it never closes.
fn balanced_span(text: &str) -> Option<&str> {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        if ch == '\\' && in_string {
            escape_next = true;
            continue;
        }
        if ch == '"' {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }
        match ch {
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.pop() != Some(ch) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(&text[..i + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Close unterminated strings, brackets and braces, innermost first.
fn balance_braces(text: &str) -> String {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escape_next = false;

    for ch in text.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        if ch == '\\' && in_string {
            escape_next = true;
            continue;
        }
        if ch == '"' {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }
        match ch {
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                stack.pop();
            }
            _ => {}
        }
    }

    let mut result = text.to_string();
    if in_string {
        result.push('"');
    }
    while let Some(closer) = stack.pop() {
        result.push(closer);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        name: String,
        size: String,
        #[serde(default)]
        tags: Vec<String>,
    }

    fn item_schema() -> Schema {
        Schema::object(vec![
            Field::required("name", Schema::non_empty_string()),
            Field::required("size", Schema::one_of(["S", "M", "L"])),
            Field::with_default("tags", Schema::array(Schema::string()), json!([])),
        ])
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```python\nprint('hi')\n```"), "print('hi')");
        assert_eq!(strip_code_fences("plain"), "plain");
    }

    #[test]
    fn test_extract_json_skips_prose_and_bracketed_words() {
        let raw = "Here is the plan [draft]:\n{\"name\": \"x\", \"size\": \"M\"}\nThanks!";
        assert_eq!(extract_json(raw).unwrap(), json!({"name": "x", "size": "M"}));
    }

    #[test]
    fn test_extract_json_ignores_braces_in_strings() {
        let raw = r#"{"name": "use { and }", "size": "S"} trailing }"#;
        assert_eq!(extract_json(raw).unwrap()["name"], "use { and }");
    }

    #[test]
    fn test_extract_json_repairs_truncation() {
        let raw = r#"{"name": "x", "tags": ["a", "b"#;
        let value = extract_json(raw).unwrap();
        assert_eq!(value["tags"], json!(["a", "b"]));
    }

    #[test]
    fn test_bracketed_reference_before_payload() {
        let resolver = StructuredOutputResolver::default();
        let raw = "As discussed in [1], here is the item:\n{\"name\": \"widget\", \"size\": \"S\"}";
        assert_eq!(extract_json(raw).unwrap(), json!([1]));

        let resolved: Resolved<Item> = resolver.resolve(raw, &item_schema());
        assert_eq!(resolved.structured().map(|i| i.name.as_str()), Some("widget"));
    }

    #[test]
    fn test_no_span() {
        assert_eq!(extract_json("nothing here"), Err(StructuredOutputError::NoSpan));
        assert_eq!(extract_json(""), Err(StructuredOutputError::NoSpan));
    }

    #[test]
    fn test_structured_path_defaults_and_drops_unknown() {
        let resolver = StructuredOutputResolver::default();
        let raw = r#"```json
{"name": "widget", "size": "L", "colour": "red"}
```"#;
        let resolved: Resolved<Item> = resolver.resolve(raw, &item_schema());
        assert_eq!(
            resolved,
            Resolved::Structured(Item {
                name: "widget".into(),
                size: "L".into(),
                tags: vec![]
            })
        );
    }

    #[test]
    fn test_validation_failures() {
        let schema = item_schema();
        assert!(matches!(
            schema.validate(&json!({"size": "S"})),
            Err(StructuredOutputError::MissingField { path }) if path == "$.name"
        ));
        assert!(matches!(
            schema.validate(&json!({"name": " ", "size": "S"})),
            Err(StructuredOutputError::EmptyString { .. })
        ));
        assert!(matches!(
            schema.validate(&json!({"name": "x", "size": "XXL"})),
            Err(StructuredOutputError::InvalidEnum { value, .. }) if value == "XXL"
        ));
        assert!(matches!(
            schema.validate(&json!({"name": "x", "size": "S", "tags": "a"})),
            Err(StructuredOutputError::WrongShape { expected: "array", .. })
        ));
        assert!(matches!(
            schema.validate(&json!([1, 2])),
            Err(StructuredOutputError::WrongShape { expected: "object", .. })
        ));
    }

    #[test]
    fn test_enum_violation_degrades() {
        let resolver = StructuredOutputResolver::default();
        let raw = r#"{"name": "widget", "size": "HUGE"}"#;
        let resolved: Resolved<Item> = resolver.resolve(raw, &item_schema());
        assert_eq!(resolved, Resolved::Degraded(vec![raw.to_string()]));
    }

    #[test]
    fn test_degrade_strips_markers_and_blanks() {
        let resolver = StructuredOutputResolver::default();
        let raw = "- first\n\n  * second\n3. third\n4) fourth\n--- fifth\n• sixth\n   \nplain";
        assert_eq!(
            resolver.degrade(raw),
            vec!["first", "second", "third", "fourth", "fifth", "sixth", "plain"]
        );
    }

    #[test]
    fn test_degrade_keeps_emphasis() {
        let resolver = StructuredOutputResolver::default();
        assert_eq!(resolver.degrade("**Bold** heading"), vec!["**Bold** heading"]);
    }

    #[test]
    fn test_degrade_is_capped() {
        let resolver = StructuredOutputResolver::new(60);
        let raw: String = (0..500).map(|i| format!("- line {}\n", i)).collect();
        let lines = resolver.degrade(&raw);
        assert_eq!(lines.len(), 60);
        assert_eq!(lines[0], "line 0");
        assert_eq!(lines[59], "line 59");
    }

    #[test]
    fn test_resolve_is_total() {
        let resolver = StructuredOutputResolver::new(5);
        let inputs = [
            "",
            "   \n\n ",
            "{",
            "}{][",
            "[1, 2",
            "{\"name\": }",
            "```json\n```",
            "\u{feff}• ünïcödé\n- ✓ done",
            "{\"name\": \"a\", \"size\": \"S\"}",
        ];
        for input in inputs {
            match resolver.resolve::<Item>(input, &item_schema()) {
                Resolved::Structured(item) => assert_eq!(item.name, "a"),
                Resolved::Degraded(lines) => assert!(lines.len() <= 5),
            }
        }
    }

    #[test]
    fn test_resolve_lines() {
        let resolver = StructuredOutputResolver::new(2);
        assert_eq!(resolver.resolve_lines("- a\n- b\n- c"), vec!["a", "b"]);
    }
}
