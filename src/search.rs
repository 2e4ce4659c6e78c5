//! Find next/previous over event rows

use crate::column::Column;
use crate::event_store::{EventStore, NodeId};
use crate::highlighter::{CompiledRule, HighlightMatcher, HighlightRule, MatchMode};

/// Direction of a find step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// A row found by the search engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchMatch {
    /// Top-level row
    pub row: usize,
    /// Column whose text matched
    pub column: Column,
}

/// Stateful finder; remembers the current row between steps
#[derive(Debug, Default)]
pub struct SearchEngine {
    query: Option<CompiledRule>,
    current_row: Option<usize>,
}

impl SearchEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the find rule. Empty values or rules without columns disable find.
    pub fn set_query(&mut self, rule: HighlightRule) {
        self.query = if rule.value.is_empty() || rule.keys.is_empty() {
            None
        } else {
            Some(CompiledRule::new(rule))
        };
    }

    pub fn query(&self) -> Option<&HighlightRule> {
        self.query.as_ref().map(CompiledRule::rule)
    }

    pub fn current_row(&self) -> Option<usize> {
        self.current_row
    }

    /// Move the cursor, e.g. after the user selects a row
    pub fn set_current_row(&mut self, row: Option<usize>) {
        self.current_row = row;
    }

    /// Next row matching the find rule, wrapping around
    pub fn find_next(
        &mut self,
        store: &EventStore,
        matcher: &HighlightMatcher,
    ) -> Option<SearchMatch> {
        self.step(store, matcher, Direction::Forward, false)
    }

    pub fn find_previous(
        &mut self,
        store: &EventStore,
        matcher: &HighlightMatcher,
    ) -> Option<SearchMatch> {
        self.step(store, matcher, Direction::Backward, false)
    }

    /// Next row matching any highlight rule
    pub fn find_next_highlighted(
        &mut self,
        store: &EventStore,
        matcher: &HighlightMatcher,
    ) -> Option<SearchMatch> {
        self.step(store, matcher, Direction::Forward, true)
    }

    pub fn find_previous_highlighted(
        &mut self,
        store: &EventStore,
        matcher: &HighlightMatcher,
    ) -> Option<SearchMatch> {
        self.step(store, matcher, Direction::Backward, true)
    }

    /// Find the next row with the same event key as `row`
    pub fn find_same_type(
        &mut self,
        store: &EventStore,
        matcher: &HighlightMatcher,
        row: usize,
        direction: Direction,
    ) -> Option<SearchMatch> {
        let key = store.get(row, Column::Key);
        self.set_query(
            HighlightRule::new(key, vec![Column::Key], MatchMode::Equals, Default::default())
                .with_match_case(true),
        );
        self.current_row = Some(row);
        self.step(store, matcher, direction, false)
    }

    fn step(
        &mut self,
        store: &EventStore,
        matcher: &HighlightMatcher,
        direction: Direction,
        highlighted: bool,
    ) -> Option<SearchMatch> {
        let rules: Vec<&CompiledRule> = if highlighted {
            matcher.compiled_rules().iter().collect()
        } else {
            self.query.iter().collect()
        };

        let found = find(store, matcher, &rules, self.current_row, direction);
        match found {
            Some(m) => {
                self.current_row = Some(m.row);
                tracing::debug!("Found a match on row {} in {}", m.row, m.column);
            }
            None => tracing::debug!("No matching row"),
        }
        found
    }
}

/// Text a find rule is matched against
fn search_text(store: &EventStore, node: NodeId, column: Column) -> String {
    match column {
        Column::Value => store.full_value(node, true),
        Column::Art | Column::ErrorCode => store.plain_text(node, column),
        _ => store.node_text(node, column),
    }
}

/// Scan visible rows after `start`, wrapping, and ending on `start` itself.
/// Without a start row the scan covers every row once from the edge.
pub fn find(
    store: &EventStore,
    matcher: &HighlightMatcher,
    rules: &[&CompiledRule],
    start: Option<usize>,
    direction: Direction,
) -> Option<SearchMatch> {
    let rows = store.row_count();
    if rows == 0 || rules.is_empty() {
        return None;
    }

    let order: Box<dyn Iterator<Item = usize>> = match (start.filter(|&s| s < rows), direction) {
        (Some(s), Direction::Forward) => Box::new((1..=rows).map(move |i| (s + i) % rows)),
        (Some(s), Direction::Backward) => Box::new((1..=rows).map(move |i| (s + rows - i) % rows)),
        (None, Direction::Forward) => Box::new(0..rows),
        (None, Direction::Backward) => Box::new((0..rows).rev()),
    };

    for row in order {
        if !matcher.is_row_visible(store, row) {
            continue;
        }
        let Some(node) = store.root(row) else {
            continue;
        };
        for rule in rules {
            for &column in &rule.rule().keys {
                if rule.is_match(&search_text(store, node, column)) {
                    return Some(SearchMatch { row, column });
                }
            }
        }
    }
    None
}
