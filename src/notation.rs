//! Textual rendering of structured event values
//!
//! A value can be shown as flat `key: value` pairs, as JSON, or as YAML,
//! either free-form (multi-line) or collapsed onto a single line. Numbers
//! follow one rule everywhere: integral values print without decimals, all
//! others with exactly three.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::str::FromStr;

/// Rendering style for structured values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Notation {
    Flat,
    Json,
    #[default]
    Yaml,
}

impl Notation {
    pub fn name(&self) -> &'static str {
        match self {
            Notation::Flat => "Flat",
            Notation::Json => "JSON",
            Notation::Yaml => "YAML",
        }
    }
}

/// Error for an unrecognized notation name
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown notation '{0}' (expected flat, json or yaml)")]
pub struct UnknownNotation(pub String);

impl FromStr for Notation {
    type Err = UnknownNotation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "flat" => Ok(Notation::Flat),
            "json" => Ok(Notation::Json),
            "yaml" => Ok(Notation::Yaml),
            _ => Err(UnknownNotation(s.to_string())),
        }
    }
}

/// Whether output may span lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineFormat {
    SingleLine,
    Free,
}

/// Render `value` in the requested notation
pub fn format(value: &Value, notation: Notation, line_format: LineFormat) -> String {
    let single_line = line_format == LineFormat::SingleLine;
    match notation {
        Notation::Flat => flat(value, single_line),
        Notation::Json => {
            let mut out = String::new();
            if single_line {
                json_single_line(value, &mut out);
            } else {
                json_free(value, &mut out, 0);
            }
            out
        }
        Notation::Yaml => {
            if single_line {
                let mut out = String::new();
                yaml_flow(value, &mut out);
                out
            } else {
                yaml_block(value).join("\n")
            }
        }
    }
}

/// Render a JSON number: integral values without decimals, others with three
pub fn format_number(number: &Number) -> String {
    if let Some(i) = number.as_i64() {
        return i.to_string();
    }
    if let Some(u) = number.as_u64() {
        return u.to_string();
    }
    format_float(number.as_f64().unwrap_or_default())
}

/// Float rendering shared with grid cells
pub fn format_float(value: f64) -> String {
    if value.fract() == 0.0 && value.is_finite() {
        format!("{:.0}", value)
    } else {
        format!("{:.3}", value)
    }
}

fn flat(value: &Value, single_line: bool) -> String {
    let mut pairs = Vec::new();
    flat_pairs("", value, &mut pairs);

    let separator = if single_line { "; " } else { "\n" };
    let joined = pairs.join(separator);
    if single_line {
        joined.replace('\n', " ")
    } else {
        joined
    }
}

fn flat_pairs(key: &str, value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                flat_pairs(k, v, out);
            }
        }
        Value::Array(items) => {
            out.push(key_value(key, ""));
            for (i, item) in items.iter().enumerate() {
                flat_pairs(&format!("{}-{}", key, i + 1), item, out);
            }
        }
        Value::Number(n) => out.push(key_value(key, &format_number(n))),
        Value::Bool(b) => out.push(key_value(key, if *b { "true" } else { "false" })),
        Value::Null => out.push(key_value(key, "null")),
        Value::String(s) => out.push(key_value(key, s)),
    }
}

fn key_value(key: &str, value: &str) -> String {
    if key.is_empty() {
        value.to_string()
    } else {
        format!("{}: {}", key, value)
    }
}

fn json_literal(value: &Value, out: &mut String) -> bool {
    match value {
        Value::Number(n) => out.push_str(&format_number(n)),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Null => out.push_str("null"),
        Value::String(s) => json_string(s, out),
        Value::Object(_) | Value::Array(_) => return false,
    }
    true
}

fn json_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
}

fn json_free(value: &Value, out: &mut String, level: usize) {
    if json_literal(value, out) {
        return;
    }

    let indentation = "  ".repeat(level);
    match value {
        Value::Object(map) if map.is_empty() => out.push_str("{}"),
        Value::Array(items) if items.is_empty() => out.push_str("[]"),
        Value::Object(map) => {
            out.push_str("{\n");
            let mut pending = map.len();
            for (k, v) in map {
                out.push_str(&indentation);
                out.push_str("  ");
                json_string(k, out);
                out.push_str(": ");
                json_free(v, out, level + 1);
                pending -= 1;
                if pending > 0 {
                    out.push(',');
                }
                out.push('\n');
            }
            out.push_str(&indentation);
            out.push('}');
        }
        Value::Array(items) => {
            out.push_str("[\n");
            let mut pending = items.len();
            for item in items {
                out.push_str(&indentation);
                out.push_str("  ");
                json_free(item, out, level + 1);
                pending -= 1;
                if pending > 0 {
                    out.push(',');
                }
                out.push('\n');
            }
            out.push_str(&indentation);
            out.push(']');
        }
        _ => {}
    }
}

fn json_single_line(value: &Value, out: &mut String) {
    if json_literal(value, out) {
        return;
    }

    match value {
        Value::Object(map) if map.is_empty() => out.push_str("{}"),
        Value::Array(items) if items.is_empty() => out.push_str("[]"),
        Value::Object(map) => {
            out.push_str("{ ");
            for (i, (k, v)) in map.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                json_string(k, out);
                out.push_str(": ");
                json_single_line(v, out);
            }
            out.push_str(" }");
        }
        Value::Array(items) => {
            out.push_str("[ ");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                json_single_line(item, out);
            }
            out.push_str(" ]");
        }
        _ => {}
    }
}

fn is_nested(value: &Value) -> bool {
    match value {
        Value::Object(map) => !map.is_empty(),
        Value::Array(items) => !items.is_empty(),
        _ => false,
    }
}

fn yaml_scalar(value: &Value) -> String {
    match value {
        Value::Number(n) => format_number(n),
        Value::Bool(b) => (if *b { "true" } else { "false" }).to_string(),
        Value::Null => "null".to_string(),
        Value::String(s) => yaml_string(s),
        Value::Object(_) => "{}".to_string(),
        Value::Array(_) => "[]".to_string(),
    }
}

fn yaml_string(s: &str) -> String {
    if needs_quotes(s) {
        let mut out = String::with_capacity(s.len() + 2);
        json_string(s, &mut out);
        out
    } else {
        s.to_string()
    }
}

fn needs_quotes(s: &str) -> bool {
    if s.is_empty() || s.trim() != s {
        return true;
    }
    if s.starts_with(|c: char| "-?:,[]{}#&*!|>'\"%@`".contains(c)) {
        return true;
    }
    if s.contains(": ")
        || s.contains(" #")
        || s.ends_with(':')
        || s.contains(|c: char| c.is_control() || ",[]{}".contains(c))
    {
        return true;
    }
    matches!(
        s.to_ascii_lowercase().as_str(),
        "true" | "false" | "null" | "~" | "yes" | "no" | "on" | "off"
    ) || s.parse::<f64>().is_ok()
}

fn yaml_block(value: &Value) -> Vec<String> {
    match value {
        Value::Object(map) if !map.is_empty() => yaml_map_lines(map),
        Value::Array(items) if !items.is_empty() => {
            let mut lines = Vec::new();
            for item in items {
                let sub = yaml_block(item);
                let mut sub_lines = sub.into_iter();
                if let Some(first) = sub_lines.next() {
                    lines.push(format!("- {}", first));
                }
                lines.extend(sub_lines.map(|l| format!("  {}", l)));
            }
            lines
        }
        other => vec![yaml_scalar(other)],
    }
}

fn yaml_map_lines(map: &Map<String, Value>) -> Vec<String> {
    let mut lines = Vec::new();
    for (k, v) in map {
        let key = yaml_string(k);
        if is_nested(v) {
            lines.push(format!("{}:", key));
            lines.extend(yaml_block(v).into_iter().map(|l| format!("  {}", l)));
        } else {
            lines.push(format!("{}: {}", key, yaml_scalar(v)));
        }
    }
    lines
}

fn yaml_flow(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            out.push('{');
            for (i, (k, v)) in map.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&yaml_string(k));
                out.push_str(": ");
                yaml_flow(v, out);
            }
            out.push('}');
        }
        Value::Array(items) if !items.is_empty() => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                yaml_flow(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&yaml_scalar(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_number_formatting() {
        assert_eq!(format_number(&Number::from(42)), "42");
        assert_eq!(format(&json!(2.0), Notation::Json, LineFormat::Free), "2");
        assert_eq!(format(&json!(1.5), Notation::Json, LineFormat::Free), "1.500");
        assert_eq!(format_float(-0.25), "-0.250");
    }

    #[test]
    fn test_flat_notation() {
        let value = json!({"a": 1, "b": {"c": "x"}, "d": [true, null]});
        assert_eq!(
            format(&value, Notation::Flat, LineFormat::SingleLine),
            "a: 1; c: x; d: ; d-1: true; d-2: null"
        );
        assert_eq!(
            format(&value, Notation::Flat, LineFormat::Free),
            "a: 1\nc: x\nd: \nd-1: true\nd-2: null"
        );
        assert_eq!(
            format(&json!("plain text"), Notation::Flat, LineFormat::Free),
            "plain text"
        );
    }

    #[test]
    fn test_json_notation() {
        let value = json!({"a": 1, "b": [1, 2]});
        assert_eq!(
            format(&value, Notation::Json, LineFormat::SingleLine),
            r#"{ "a": 1, "b": [ 1, 2 ] }"#
        );
        assert_eq!(
            format(&value, Notation::Json, LineFormat::Free),
            "{\n  \"a\": 1,\n  \"b\": [\n    1,\n    2\n  ]\n}"
        );
        assert_eq!(
            format(&json!("say \"hi\"\n"), Notation::Json, LineFormat::Free),
            r#""say \"hi\"\n""#
        );
    }

    #[test]
    fn test_yaml_notation() {
        let value = json!({"a": 1, "b": {"c": "x"}, "d": [1, {"e": true}], "f": {}});
        assert_eq!(
            format(&value, Notation::Yaml, LineFormat::Free),
            "a: 1\nb:\n  c: x\nd:\n  - 1\n  - e: true\nf: {}"
        );
        assert_eq!(
            format(&value, Notation::Yaml, LineFormat::SingleLine),
            "{a: 1, b: {c: x}, d: [1, {e: true}], f: {}}"
        );
    }

    #[test]
    fn test_yaml_quoting() {
        assert_eq!(yaml_string("plain words"), "plain words");
        assert_eq!(yaml_string("123"), "\"123\"");
        assert_eq!(yaml_string("true"), "\"true\"");
        assert_eq!(yaml_string("key: value"), "\"key: value\"");
        assert_eq!(yaml_string(""), "\"\"");
        assert_eq!(yaml_string("- item"), "\"- item\"");
    }

    #[test]
    fn test_notation_from_str() {
        assert_eq!("YAML".parse::<Notation>().unwrap(), Notation::Yaml);
        assert_eq!("flat".parse::<Notation>().unwrap(), Notation::Flat);
        assert!("xml".parse::<Notation>().is_err());
    }
}
