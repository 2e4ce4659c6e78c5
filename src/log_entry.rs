//! Log event records and line parsing

use crate::notation::format_number;
use crate::timestamp::EventTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reserved record field names
pub mod fields {
    pub const IDX: &str = "idx";
    pub const FILE: &str = "file";
    pub const TS: &str = "ts";
    pub const PID: &str = "pid";
    pub const TID: &str = "tid";
    pub const SEV: &str = "sev";
    pub const REQ: &str = "req";
    pub const SESS: &str = "sess";
    pub const SITE: &str = "site";
    pub const USER: &str = "user";
    pub const KEY: &str = "k";
    pub const VALUE: &str = "v";
    pub const ART: &str = "a";
    pub const ERROR_CODE: &str = "e";
}

/// A single decoded log event.
///
/// Records are plain JSON objects. Keys iterate in sorted order, which keeps
/// rendering stable across loads.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Record for a line that is not a JSON object
    pub fn freeform(index: u64, file_name: &str, text: &str) -> Self {
        let mut map = Map::new();
        map.insert(fields::IDX.to_string(), Value::from(index));
        map.insert(fields::FILE.to_string(), Value::from(file_name));
        map.insert(fields::KEY.to_string(), Value::from(""));
        map.insert(fields::VALUE.to_string(), Value::from(text));
        Self(map)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) {
        self.0.insert(field.into(), value);
    }

    /// Sequence number assigned at ingestion
    pub fn idx(&self) -> Option<i64> {
        self.0.get(fields::IDX).and_then(Value::as_i64)
    }

    /// Source file name
    pub fn file(&self) -> &str {
        self.str_field(fields::FILE)
    }

    /// Raw `ts` text
    pub fn ts(&self) -> &str {
        self.str_field(fields::TS)
    }

    /// Parsed event time, invalid when `ts` is absent or malformed
    pub fn time(&self) -> EventTime {
        EventTime::parse(self.ts())
    }

    /// Event key (`k`), empty when absent
    pub fn key(&self) -> &str {
        self.str_field(fields::KEY)
    }

    pub fn value(&self) -> Option<&Value> {
        self.0.get(fields::VALUE)
    }

    pub fn art(&self) -> Option<&Value> {
        self.0.get(fields::ART)
    }

    pub fn error_code(&self) -> Option<&Value> {
        self.0.get(fields::ERROR_CODE)
    }

    /// Scalar field as display text; containers and missing fields are empty
    pub fn field_text(&self, field: &str) -> String {
        match self.0.get(field) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => format_number(n),
            Some(Value::Bool(b)) => b.to_string(),
            _ => String::new(),
        }
    }

    /// Serialize back to a single JSON line
    pub fn to_json_line(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }

    fn str_field(&self, field: &str) -> &str {
        self.0.get(field).and_then(Value::as_str).unwrap_or("")
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// An event key excluded from ingestion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipRule {
    /// Event key to match (`k`)
    pub text: String,
    /// Whether the rule is active
    pub enabled: bool,
}

impl SkipRule {
    pub fn new(text: impl Into<String>, enabled: bool) -> Self {
        Self {
            text: text.into(),
            enabled,
        }
    }
}

/// Parsing configuration snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct ParseOptions {
    /// Event keys dropped on load
    pub skip: Vec<SkipRule>,
    /// Admit plain-text files when tailing a directory
    pub capture_all_text_files: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            skip: vec![
                SkipRule::new("dll-version-info", true),
                SkipRule::new("ds-interpret-metadata", true),
            ],
            capture_all_text_files: true,
        }
    }
}

impl ParseOptions {
    /// Whether events with key `key` are dropped.
    ///
    /// Only the first rule naming a key counts.
    pub fn is_skipped(&self, key: &str) -> bool {
        self.skip
            .iter()
            .find(|rule| rule.text == key)
            .map(|rule| rule.enabled)
            .unwrap_or(false)
    }
}

/// Whether a line looks like a structured (JSON object) event
pub fn looks_structured(line: &str) -> bool {
    line.trim_start().starts_with('{')
}

/// Parse one raw log line.
///
/// Lines not starting with `{` become freeform records. JSON lines get
/// `idx` and `file` added unless they already carry them. Returns `None`
/// for lines that fail to decode and for skipped event keys.
pub fn parse_line(
    index: u64,
    raw: &str,
    file_name: &str,
    options: &ParseOptions,
) -> Option<Record> {
    let line = raw.trim();
    if line.is_empty() {
        return None;
    }

    if !line.starts_with('{') {
        return Some(Record::freeform(index, file_name, line));
    }

    let mut map: Map<String, Value> = match serde_json::from_str(line) {
        Ok(map) => map,
        Err(e) => {
            tracing::debug!("Dropping undecodable line {} of {}: {}", index, file_name, e);
            return None;
        }
    };

    map.entry(fields::IDX).or_insert_with(|| Value::from(index));
    map.entry(fields::FILE).or_insert_with(|| Value::from(file_name));

    let record = Record(map);
    if record.contains(fields::KEY) && options.is_skipped(record.key()) {
        return None;
    }

    Some(record)
}

/// Result of parsing a run of lines
#[derive(Debug, Default)]
pub struct ParsedBatch {
    /// Parsed records in line order
    pub records: Vec<Record>,
    /// Lines that were dropped
    pub skipped: usize,
    /// Non-blank lines seen, each of which consumed a sequence number
    pub consumed: u64,
}

/// Parse a run of lines, numbering every non-blank line from `first_index`
pub fn parse_lines<I, S>(
    lines: I,
    first_index: u64,
    file_name: &str,
    options: &ParseOptions,
) -> ParsedBatch
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut batch = ParsedBatch::default();

    for line in lines {
        let line = line.as_ref().trim();
        if line.is_empty() {
            continue;
        }

        let index = first_index + batch.consumed;
        batch.consumed += 1;
        match parse_line(index, line, file_name, options) {
            Some(record) => batch.records.push(record),
            None => batch.skipped += 1,
        }
    }

    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options() -> ParseOptions {
        ParseOptions::default()
    }

    #[test]
    fn test_freeform_line() {
        let record = parse_line(7, "plain text here", "app.log", &options()).unwrap();
        assert_eq!(record.idx(), Some(7));
        assert_eq!(record.file(), "app.log");
        assert_eq!(record.key(), "");
        assert_eq!(record.value(), Some(&json!("plain text here")));
        assert!(!record.time().is_valid());
    }

    #[test]
    fn test_json_line_gets_index_and_file() {
        let line = r#"{"ts":"2024-01-15T10:30:45.123","k":"msg","v":{"a":1}}"#;
        let record = parse_line(3, line, "svc.txt", &options()).unwrap();
        assert_eq!(record.idx(), Some(3));
        assert_eq!(record.file(), "svc.txt");
        assert_eq!(record.key(), "msg");
        assert!(record.time().is_valid());
    }

    #[test]
    fn test_line_values_win_over_injected_fields() {
        let line = r#"{"idx":99,"file":"other.log","k":"msg"}"#;
        let record = parse_line(3, line, "svc.txt", &options()).unwrap();
        assert_eq!(record.idx(), Some(99));
        assert_eq!(record.file(), "other.log");
    }

    #[test]
    fn test_skip_list() {
        let opts = options();
        assert!(parse_line(1, r#"{"k":"dll-version-info"}"#, "f", &opts).is_none());

        let mut opts = options();
        opts.skip[0].enabled = false;
        assert!(parse_line(1, r#"{"k":"dll-version-info"}"#, "f", &opts).is_some());

        // Freeform lines are never skipped
        assert!(parse_line(1, "dll-version-info", "f", &options()).is_some());
    }

    #[test]
    fn test_undecodable_lines_are_dropped() {
        assert!(parse_line(1, "{not json", "f", &options()).is_none());
        assert!(parse_line(1, "   ", "f", &options()).is_none());
    }

    #[test]
    fn test_parse_is_idempotent() {
        let line =
            r#"{"ts":"2024-01-15T10:30:45.123","k":"msg","v":[1,2.5,"x"],"a":{"elapsed":1}}"#;
        let first = parse_line(5, line, "a.log", &options()).unwrap();
        let second = parse_line(5, &first.to_json_line(), "a.log", &options()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_parse_lines_numbers_every_non_blank_line() {
        let lines = [
            r#"{"k":"first"}"#,
            "",
            r#"{"k":"dll-version-info"}"#,
            "   ",
            "free text",
        ];
        let batch = parse_lines(lines, 1, "a.log", &options());
        assert_eq!(batch.consumed, 3);
        assert_eq!(batch.skipped, 1);
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.records[0].idx(), Some(1));
        assert_eq!(batch.records[1].idx(), Some(3));
    }

    #[test]
    fn test_looks_structured() {
        assert!(looks_structured("  {\"k\":1}"));
        assert!(!looks_structured("2024-01-01 INFO start"));
    }
}
