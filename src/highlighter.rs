//! Rule-based row highlighting
//!
//! A highlight rule matches text in one or more columns and paints the whole
//! top-level row with a background color. Rules are evaluated newest first;
//! the first rule with a matching column wins. Results are memoized per node
//! until the rule set changes or the node goes away.

use crate::column::Column;
use crate::event_store::{EventStore, NodeId};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

/// An RGB color, serialized as `[r, g, b]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    /// Parse `#rrggbb`
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.strip_prefix('#')?;
        if hex.len() != 6 || !hex.is_ascii() {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        Some(Self(channel(0)?, channel(2)?, channel(4)?))
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.0, self.1, self.2)
    }
}

impl Default for Rgb {
    fn default() -> Self {
        Self(255, 255, 255)
    }
}

impl std::fmt::Display for Rgb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// How a rule compares its value against column text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    Equals,
    #[default]
    Contains,
    StartsWith,
    EndsWith,
    Regex,
}

/// A highlight (or search) rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "StoredRule")]
pub struct HighlightRule {
    /// Text or pattern to look for
    pub value: String,
    /// Columns searched, in order
    pub keys: Vec<Column>,
    pub match_case: bool,
    pub mode: MatchMode,
    pub background_color: Rgb,
}

impl HighlightRule {
    pub fn new(value: impl Into<String>, keys: Vec<Column>, mode: MatchMode, color: Rgb) -> Self {
        Self {
            value: value.into(),
            keys,
            match_case: false,
            mode,
            background_color: color,
        }
    }

    pub fn with_match_case(mut self, match_case: bool) -> Self {
        self.match_case = match_case;
        self
    }
}

impl Default for HighlightRule {
    fn default() -> Self {
        Self::new("", Vec::new(), MatchMode::Contains, Rgb::default())
    }
}

/// On-disk rule layout, including the older `useRegex` flag
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredRule {
    #[serde(default)]
    value: String,
    #[serde(default)]
    keys: Vec<Column>,
    #[serde(default)]
    match_case: bool,
    mode: Option<MatchMode>,
    use_regex: Option<bool>,
    #[serde(default)]
    background_color: Rgb,
}

impl From<StoredRule> for HighlightRule {
    fn from(stored: StoredRule) -> Self {
        let mode = stored.mode.unwrap_or(match stored.use_regex {
            Some(true) => MatchMode::Regex,
            _ => MatchMode::Contains,
        });
        Self {
            value: stored.value,
            keys: stored.keys,
            match_case: stored.match_case,
            mode,
            background_color: stored.background_color,
        }
    }
}

/// A rule prepared for matching
#[derive(Debug, Clone)]
pub struct CompiledRule {
    rule: HighlightRule,
    /// Lowercased value for case-insensitive comparisons
    folded: String,
    /// `None` in regex mode means the pattern did not compile
    regex: Option<Regex>,
}

impl CompiledRule {
    pub fn new(rule: HighlightRule) -> Self {
        let regex = if rule.mode == MatchMode::Regex {
            match RegexBuilder::new(&rule.value)
                .case_insensitive(!rule.match_case)
                .build()
            {
                Ok(regex) => Some(regex),
                Err(e) => {
                    tracing::warn!("Invalid highlight pattern '{}': {}", rule.value, e);
                    None
                }
            }
        } else {
            None
        };

        Self {
            folded: rule.value.to_lowercase(),
            rule,
            regex,
        }
    }

    pub fn rule(&self) -> &HighlightRule {
        &self.rule
    }

    /// Whether `text` satisfies the rule
    pub fn is_match(&self, text: &str) -> bool {
        if self.rule.mode == MatchMode::Regex {
            return self.regex.as_ref().map(|r| r.is_match(text)).unwrap_or(false);
        }

        if self.rule.match_case {
            compare(self.rule.mode, text, &self.rule.value)
        } else {
            compare(self.rule.mode, &text.to_lowercase(), &self.folded)
        }
    }
}

fn compare(mode: MatchMode, text: &str, value: &str) -> bool {
    match mode {
        MatchMode::Equals => text == value,
        MatchMode::Contains => text.contains(value),
        MatchMode::StartsWith => text.starts_with(value),
        MatchMode::EndsWith => text.ends_with(value),
        MatchMode::Regex => false,
    }
}

/// Errors from reading or writing saved highlight filters
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("invalid filter name '{0}'")]
    InvalidName(String),
    #[error("filter file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed filter data: {0}")]
    Format(#[from] serde_json::Error),
}

/// Serialize rules as a JSON array
pub fn rules_to_json(rules: &[HighlightRule]) -> Result<String, FilterError> {
    Ok(serde_json::to_string_pretty(rules)?)
}

/// Parse a JSON array of rules
pub fn rules_from_json(json: &str) -> Result<Vec<HighlightRule>, FilterError> {
    Ok(serde_json::from_str(json)?)
}

fn filter_path(dir: &Path, name: &str) -> Result<PathBuf, FilterError> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed.contains(['/', '\\']) || trimmed.starts_with('.') {
        return Err(FilterError::InvalidName(name.to_string()));
    }
    Ok(dir.join(format!("{}.json", trimmed)))
}

/// Save rules as `<dir>/<name>.json`
pub fn save_filter(
    dir: &Path,
    name: &str,
    rules: &[HighlightRule],
) -> Result<PathBuf, FilterError> {
    let path = filter_path(dir, name)?;
    let json = rules_to_json(rules)?;
    std::fs::create_dir_all(dir).map_err(|source| FilterError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    std::fs::write(&path, json).map_err(|source| FilterError::Io {
        path: path.clone(),
        source,
    })?;
    tracing::info!("Saved {} highlight rules to {}", rules.len(), path.display());
    Ok(path)
}

/// Load rules saved under `name`
pub fn load_filter(dir: &Path, name: &str) -> Result<Vec<HighlightRule>, FilterError> {
    let path = filter_path(dir, name)?;
    load_filter_file(&path)
}

/// Load rules from an explicit file
pub fn load_filter_file(path: &Path) -> Result<Vec<HighlightRule>, FilterError> {
    let json = std::fs::read_to_string(path).map_err(|source| FilterError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    rules_from_json(&json)
}

/// Names of the saved filters in `dir`, sorted
pub fn list_filters(dir: &Path) -> Result<Vec<String>, FilterError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(FilterError::Io {
                path: dir.to_path_buf(),
                source,
            })
        }
    };

    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
        .filter_map(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .collect();
    names.sort();
    Ok(names)
}

/// Memoizing evaluator of an ordered rule set
#[derive(Debug, Default)]
pub struct HighlightMatcher {
    rules: Vec<CompiledRule>,
    cache: RefCell<HashMap<NodeId, Option<Rgb>>>,
    highlight_only: bool,
}

impl HighlightMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the rule set
    pub fn set_rules(&mut self, rules: Vec<HighlightRule>) {
        self.rules = rules.into_iter().map(CompiledRule::new).collect();
        self.clear_cache();
        if self.rules.is_empty() {
            self.highlight_only = false;
        }
    }

    /// Append a rule; it takes precedence over all existing ones
    pub fn add_rule(&mut self, rule: HighlightRule) {
        self.rules.push(CompiledRule::new(rule));
        self.clear_cache();
    }

    pub fn rules(&self) -> Vec<HighlightRule> {
        self.rules.iter().map(|r| r.rule.clone()).collect()
    }

    /// Rules as compiled for matching, in precedence order (last wins)
    pub fn compiled_rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn has_rules(&self) -> bool {
        !self.rules.is_empty()
    }

    /// Background colors used by the current rules
    pub fn colors(&self) -> Vec<Rgb> {
        self.rules.iter().map(|r| r.rule.background_color).collect()
    }

    pub fn clear_cache(&self) {
        self.cache.borrow_mut().clear();
    }

    /// Forget memoized colors for removed or edited nodes
    pub fn evict(&self, nodes: &[NodeId]) {
        let mut cache = self.cache.borrow_mut();
        for node in nodes {
            cache.remove(node);
        }
    }

    pub fn cached_len(&self) -> usize {
        self.cache.borrow().len()
    }

    /// Only show highlighted rows. Cannot be turned on without rules.
    pub fn set_highlight_only(&mut self, enabled: bool) -> bool {
        self.highlight_only = enabled && self.has_rules();
        self.highlight_only
    }

    pub fn highlight_only(&self) -> bool {
        self.highlight_only
    }

    /// Highlight color of a top-level row
    pub fn color_for(&self, store: &EventStore, row: usize) -> Option<Rgb> {
        store.root(row).and_then(|node| self.color_for_node(store, node))
    }

    /// Highlight color of a node; child nodes are never highlighted
    pub fn color_for_node(&self, store: &EventStore, node: NodeId) -> Option<Rgb> {
        if !store.is_top_level(node) {
            return None;
        }
        if let Some(cached) = self.cache.borrow().get(&node) {
            return *cached;
        }

        let color = self.evaluate(store, node);
        self.cache.borrow_mut().insert(node, color);
        color
    }

    fn evaluate(&self, store: &EventStore, node: NodeId) -> Option<Rgb> {
        let mut value_text: Option<String> = None;

        for compiled in self.rules.iter().rev() {
            for &column in &compiled.rule.keys {
                let matched = if column == Column::Value {
                    let text = value_text.get_or_insert_with(|| store.full_value(node, true));
                    compiled.is_match(text)
                } else {
                    compiled.is_match(&store.plain_text(node, column))
                };
                if matched {
                    return Some(compiled.rule.background_color);
                }
            }
        }
        None
    }

    /// Whether a row is shown under the current mode
    pub fn is_row_visible(&self, store: &EventStore, row: usize) -> bool {
        row < store.row_count() && (!self.highlight_only || self.color_for(store, row).is_some())
    }

    /// Rows shown under the current mode
    pub fn visible_rows(&self, store: &EventStore) -> Vec<usize> {
        (0..store.row_count())
            .filter(|&row| self.is_row_visible(store, row))
            .collect()
    }

    /// Status line such as `highlighted: {error, timeout}`
    pub fn summary(&self) -> String {
        if self.rules.is_empty() {
            return String::new();
        }

        let mut status = String::from(if self.highlight_only {
            "show only highlighted: {"
        } else {
            "highlighted: {"
        });
        for (i, compiled) in self.rules.iter().enumerate() {
            if i != 0 {
                status.push_str(", ");
            }
            status.push_str(&compiled.rule.value);
            if status.chars().count() > 100 {
                status.push_str("...");
                break;
            }
        }
        status.push('}');
        status
    }
}

/// Pastel colors handed out to new rules
pub const PALETTE: [Rgb; 10] = [
    Rgb(0xf2, 0xec, 0x99),
    Rgb(0xbf, 0xe4, 0xf3),
    Rgb(0xbf, 0xe9, 0x68),
    Rgb(0xc6, 0xca, 0xf8),
    Rgb(0xee, 0xc7, 0x57),
    Rgb(0x99, 0x94, 0xf1),
    Rgb(0xed, 0xb0, 0xe8),
    Rgb(0xce, 0xbf, 0xf3),
    Rgb(0xa5, 0xf0, 0xc6),
    Rgb(0xf5, 0xb0, 0xb4),
];

/// Rotating queue of highlight colors
#[derive(Debug, Clone)]
pub struct ColorLibrary {
    queue: VecDeque<Rgb>,
}

impl ColorLibrary {
    pub fn new() -> Self {
        Self {
            queue: PALETTE.iter().copied().collect(),
        }
    }

    /// Take the next color; it moves to the back of the queue
    pub fn next_color(&mut self) -> Rgb {
        if self.queue.is_empty() {
            self.queue.extend(PALETTE);
        }
        let color = self.queue.pop_front().unwrap_or(PALETTE[0]);
        self.queue.push_back(color);
        color
    }

    /// Drop colors already taken by loaded rules
    pub fn exclude(&mut self, used: &[Rgb]) {
        self.queue.retain(|c| !used.contains(c));
    }
}

impl Default for ColorLibrary {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_entry::{parse_line, ParseOptions};
    use tempfile::tempdir;

    const RED: Rgb = Rgb(255, 0, 0);
    const GREEN: Rgb = Rgb(0, 255, 0);

    fn store() -> EventStore {
        let opts = ParseOptions::default();
        let mut store = EventStore::new();
        let lines = [
            r#"{"k":"error","sev":"high","v":{"msg":"disk timeout"}}"#,
            r#"{"k":"info","v":{"msg":"ok"}}"#,
        ];
        store.append_batch(
            lines
                .iter()
                .enumerate()
                .map(|(i, line)| parse_line(i as u64 + 1, line, "a.log", &opts).unwrap())
                .collect(),
        );
        store
    }

    #[test]
    fn test_match_modes() {
        let rule =
            |mode, value: &str| CompiledRule::new(HighlightRule::new(value, vec![], mode, RED));
        assert!(rule(MatchMode::Equals, "Error").is_match("error"));
        assert!(!rule(MatchMode::Equals, "err").is_match("error"));
        assert!(rule(MatchMode::Contains, "TIME").is_match("disk timeout"));
        assert!(rule(MatchMode::StartsWith, "disk").is_match("disk timeout"));
        assert!(rule(MatchMode::EndsWith, "out").is_match("disk timeout"));
        assert!(rule(MatchMode::Regex, r"^d\w+ T").is_match("disk timeout"));

        let strict = CompiledRule::new(
            HighlightRule::new("Error", vec![], MatchMode::Equals, RED).with_match_case(true),
        );
        assert!(!strict.is_match("error"));
    }

    #[test]
    fn test_invalid_regex_never_matches() {
        let rule =
            CompiledRule::new(HighlightRule::new("(unclosed", vec![], MatchMode::Regex, RED));
        assert!(!rule.is_match("(unclosed"));
        assert!(!rule.is_match(""));
    }

    #[test]
    fn test_last_rule_wins() {
        let store = store();
        let mut matcher = HighlightMatcher::new();
        matcher.set_rules(vec![
            HighlightRule::new("error", vec![Column::Key], MatchMode::Equals, RED),
            HighlightRule::new("timeout", vec![Column::Value], MatchMode::Contains, GREEN),
        ]);
        assert_eq!(matcher.color_for(&store, 0), Some(GREEN));
        assert_eq!(matcher.color_for(&store, 1), None);
        assert_eq!(matcher.color_for(&store, 5), None);

        let child = store.children(store.root(0).unwrap())[0];
        assert_eq!(matcher.color_for_node(&store, child), None);
    }

    #[test]
    fn test_cache_reset_on_rule_change() {
        let store = store();
        let mut matcher = HighlightMatcher::new();
        matcher.set_rules(vec![HighlightRule::new(
            "error",
            vec![Column::Key],
            MatchMode::Equals,
            RED,
        )]);
        assert_eq!(matcher.color_for(&store, 0), Some(RED));
        assert_eq!(matcher.cached_len(), 1);

        matcher.add_rule(HighlightRule::new(
            "high",
            vec![Column::Severity],
            MatchMode::Equals,
            GREEN,
        ));
        assert_eq!(matcher.cached_len(), 0);
        assert_eq!(matcher.color_for(&store, 0), Some(GREEN));

        matcher.set_rules(Vec::new());
        assert_eq!(matcher.color_for(&store, 0), None);
    }

    #[test]
    fn test_highlight_only_visibility() {
        let store = store();
        let mut matcher = HighlightMatcher::new();
        assert!(!matcher.set_highlight_only(true));
        assert_eq!(matcher.visible_rows(&store), vec![0, 1]);

        matcher.set_rules(vec![HighlightRule::new(
            "info",
            vec![Column::Key],
            MatchMode::Equals,
            RED,
        )]);
        assert!(matcher.set_highlight_only(true));
        assert_eq!(matcher.visible_rows(&store), vec![1]);
        assert!(!matcher.is_row_visible(&store, 0));
    }

    #[test]
    fn test_rule_json_round_trip() {
        let rule = HighlightRule::new(
            "timeout",
            vec![Column::Value, Column::Key],
            MatchMode::StartsWith,
            Rgb(1, 2, 3),
        );
        let json = rules_to_json(std::slice::from_ref(&rule)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(
            value,
            serde_json::json!([{
                "value": "timeout",
                "keys": ["Value", "Key"],
                "matchCase": false,
                "mode": "startswith",
                "backgroundColor": [1, 2, 3]
            }])
        );
        assert_eq!(rules_from_json(&json).unwrap(), vec![rule]);
    }

    #[test]
    fn test_legacy_use_regex() {
        let json = r#"[
            {"value": "a.c", "keys": ["Key"], "matchCase": true, "useRegex": true,
             "backgroundColor": [9, 9, 9]},
            {"value": "b", "keys": ["Value"], "useRegex": false, "backgroundColor": [1, 1, 1]}
        ]"#;
        let rules = rules_from_json(json).unwrap();
        assert_eq!(rules[0].mode, MatchMode::Regex);
        assert!(rules[0].match_case);
        assert_eq!(rules[1].mode, MatchMode::Contains);
        assert_eq!(rules[1].background_color, Rgb(1, 1, 1));
    }

    #[test]
    fn test_unknown_column_rejected() {
        let json = r#"[{"value": "x", "keys": ["Nope"], "mode": "equals",
                        "backgroundColor": [0, 0, 0]}]"#;
        assert!(matches!(rules_from_json(json), Err(FilterError::Format(_))));
    }

    #[test]
    fn test_save_and_load_filters() {
        let dir = tempdir().unwrap();
        let rules = vec![HighlightRule::new("error", vec![Column::Key], MatchMode::Equals, RED)];

        save_filter(dir.path(), "errors", &rules).unwrap();
        assert_eq!(list_filters(dir.path()).unwrap(), vec!["errors".to_string()]);
        assert_eq!(load_filter(dir.path(), "errors").unwrap(), rules);

        assert!(matches!(
            save_filter(dir.path(), "../up", &rules),
            Err(FilterError::InvalidName(_))
        ));
        assert!(matches!(load_filter(dir.path(), "missing"), Err(FilterError::Io { .. })));
        assert!(list_filters(&dir.path().join("absent")).unwrap().is_empty());
    }

    #[test]
    fn test_summary() {
        let mut matcher = HighlightMatcher::new();
        assert_eq!(matcher.summary(), "");
        matcher.set_rules(vec![
            HighlightRule::new("a", vec![Column::Key], MatchMode::Equals, RED),
            HighlightRule::new("b", vec![Column::Key], MatchMode::Equals, GREEN),
        ]);
        assert_eq!(matcher.summary(), "highlighted: {a, b}");
        matcher.set_highlight_only(true);
        assert_eq!(matcher.summary(), "show only highlighted: {a, b}");

        matcher.set_rules(vec![HighlightRule::new(
            "x".repeat(120),
            vec![Column::Key],
            MatchMode::Equals,
            RED,
        )]);
        assert!(matcher.summary().ends_with("...}"));
    }

    #[test]
    fn test_color_library_rotation() {
        let mut library = ColorLibrary::new();
        assert_eq!(library.next_color(), PALETTE[0]);
        assert_eq!(library.next_color(), PALETTE[1]);

        let mut library = ColorLibrary::new();
        library.exclude(&[PALETTE[0], PALETTE[2]]);
        assert_eq!(library.next_color(), PALETTE[1]);
        assert_eq!(library.next_color(), PALETTE[3]);

        assert_eq!(Rgb::from_hex("#f2ec99"), Some(PALETTE[0]));
        assert_eq!(PALETTE[9].to_hex(), "#f5b0b4");
        assert_eq!(Rgb::from_hex("f2ec99"), None);
    }

    #[test]
    fn test_value_rule_matches_across_newlines() {
        let mut store = EventStore::new();
        let line = r#"{"k":"x","v":"one\ntwo"}"#;
        store.append_batch(vec![parse_line(1, line, "a.log", &ParseOptions::default()).unwrap()]);

        let mut matcher = HighlightMatcher::new();
        matcher.set_rules(vec![HighlightRule::new(
            "one two",
            vec![Column::Value],
            MatchMode::Contains,
            RED,
        )]);
        assert_eq!(matcher.color_for(&store, 0), Some(RED));
    }

    #[test]
    fn test_compiled_rules_follow_precedence_order() {
        let mut matcher = HighlightMatcher::new();
        matcher.set_rules(vec![HighlightRule::new("a", vec![Column::Key], MatchMode::Regex, RED)]);
        matcher.add_rule(HighlightRule::new("b", vec![Column::Key], MatchMode::Equals, GREEN));

        let values: Vec<&str> = matcher
            .compiled_rules()
            .iter()
            .map(|compiled| compiled.rule().value.as_str())
            .collect();
        assert_eq!(values, vec!["a", "b"]);
    }
}
