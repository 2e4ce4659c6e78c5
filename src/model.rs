//! Event model: one store plus the highlighting state that depends on it
//!
//! Every mutation that can remove or edit rows goes through here so the
//! highlight cache never outlives the nodes it describes.

use crate::column::Column;
use crate::event_store::{DisplayOptions, EventStore, ModelEvent, NodeId, TimeMode};
use crate::highlighter::{ColorLibrary, HighlightMatcher, HighlightRule, MatchMode, Rgb};
use crate::live_tail::matches_any;
use crate::log_entry::{looks_structured, ParseOptions, Record};
use crate::log_reader::{first_non_blank_line, read_events};
use crate::merge::{merge_into, sort_batch};
use crate::search::{Direction, SearchEngine, SearchMatch};
use anyhow::{Context, Result};
use crossbeam_channel::Receiver;
use std::path::{Path, PathBuf};

/// Where a model's events came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceKind {
    #[default]
    Empty,
    SingleFile,
    Directory,
    Exported,
}

/// Outcome of a bulk load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadSummary {
    pub loaded: usize,
    pub skipped: usize,
    /// First row that received an event
    pub first_row: usize,
}

impl std::fmt::Display for LoadSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} events loaded; {} events skipped", self.loaded, self.skipped)
    }
}

pub struct EventModel {
    store: EventStore,
    matcher: HighlightMatcher,
    colors: ColorLibrary,
    search: SearchEngine,
    parse_options: ParseOptions,
    name_filters: Vec<String>,
    kind: SourceKind,
    paths: Vec<PathBuf>,
}

impl EventModel {
    pub fn new(parse_options: ParseOptions, display: DisplayOptions) -> Self {
        Self {
            store: EventStore::with_display(display),
            matcher: HighlightMatcher::new(),
            colors: ColorLibrary::new(),
            search: SearchEngine::new(),
            parse_options,
            name_filters: vec!["*.txt".to_string(), "*.log".to_string()],
            kind: SourceKind::Empty,
            paths: Vec::new(),
        }
    }

    /// Model starting with a default rule set
    pub fn with_rules(
        parse_options: ParseOptions,
        display: DisplayOptions,
        rules: Vec<HighlightRule>,
    ) -> Self {
        let mut model = Self::new(parse_options, display);
        model.set_rules(rules);
        model
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }

    pub fn matcher(&self) -> &HighlightMatcher {
        &self.matcher
    }

    pub fn subscribe(&mut self) -> Receiver<ModelEvent> {
        self.store.subscribe()
    }

    pub fn parse_options(&self) -> &ParseOptions {
        &self.parse_options
    }

    pub fn set_parse_options(&mut self, options: ParseOptions) {
        self.parse_options = options;
    }

    /// File name patterns admitted from directories
    pub fn name_filters(&self) -> &[String] {
        &self.name_filters
    }

    pub fn set_name_filters(&mut self, filters: Vec<String>) {
        self.name_filters = filters;
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn set_source(&mut self, kind: SourceKind, paths: Vec<PathBuf>) {
        self.kind = kind;
        self.paths = paths;
    }

    pub fn row_count(&self) -> usize {
        self.store.row_count()
    }

    /// Sequence number for the next tailed event: last row ID + 1
    pub fn next_sequence(&self) -> u64 {
        self.store
            .row_count()
            .checked_sub(1)
            .and_then(|last| self.store.event(last))
            .and_then(Record::idx)
            .and_then(|idx| u64::try_from(idx).ok())
            .map(|idx| idx + 1)
            .unwrap_or(1)
    }

    /// Merge an ascending batch; returns the first affected row
    pub fn merge(&mut self, records: Vec<Record>) -> usize {
        merge_into(&mut self.store, records)
    }

    pub fn append(&mut self, records: Vec<Record>) {
        self.store.append_batch(records);
    }

    /// Remove rows and forget their highlight colors
    pub fn remove_range(&mut self, start: usize, count: usize) -> bool {
        match self.store.remove_range(start, count) {
            Some(removed) => {
                self.matcher.evict(&removed);
                true
            }
            None => false,
        }
    }

    pub fn remove_row(&mut self, row: usize) -> bool {
        self.remove_range(row, 1)
    }

    /// Drop the oldest rows beyond `cap`; returns how many were removed
    pub fn trim(&mut self, cap: usize) -> usize {
        let excess = self.store.row_count().saturating_sub(cap);
        if excess > 0 && self.remove_range(0, excess) {
            tracing::debug!("Trimmed {} events", excess);
            excess
        } else {
            0
        }
    }

    pub fn clear(&mut self) {
        self.store.clear();
        self.matcher.clear_cache();
    }

    /// Edit a Key or Value cell in place
    pub fn set_data(&mut self, node: NodeId, column: Column, text: &str) -> bool {
        let root = self.store.root_of(node);
        if !self.store.set_data(node, column, text) {
            return false;
        }
        if let Some(root) = root {
            self.matcher.evict(&[root]);
        }
        true
    }

    /// Remove every row whose event key equals `key`; returns the count
    pub fn hide_key(&mut self, key: &str) -> usize {
        let mut removed = 0;
        let mut row = self.store.row_count();
        while row > 0 {
            row -= 1;
            if self.store.get(row, Column::Key) != key {
                continue;
            }
            // Extend over the contiguous run ending here
            let mut start = row;
            while start > 0 && self.store.get(start - 1, Column::Key) == key {
                start -= 1;
            }
            let count = row - start + 1;
            if self.remove_range(start, count) {
                removed += count;
            }
            row = start;
        }
        tracing::info!("{} '{}' event(s) hidden", removed, key);
        removed
    }

    pub fn rules(&self) -> Vec<HighlightRule> {
        self.matcher.rules()
    }

    pub fn set_rules(&mut self, rules: Vec<HighlightRule>) {
        self.matcher.set_rules(rules);
        self.colors.exclude(&self.matcher.colors());
    }

    pub fn add_rule(&mut self, rule: HighlightRule) {
        self.matcher.add_rule(rule);
    }

    /// Highlight every event sharing the key of `row` with a fresh color
    pub fn highlight_key_of_row(&mut self, row: usize) -> Option<Rgb> {
        if row >= self.store.row_count() {
            return None;
        }
        let key = self.store.get(row, Column::Key);
        let color = self.colors.next_color();
        self.add_rule(HighlightRule::new(key, vec![Column::Key], MatchMode::Contains, color));
        Some(color)
    }

    pub fn color_for(&self, row: usize) -> Option<Rgb> {
        self.matcher.color_for(&self.store, row)
    }

    pub fn set_highlight_only(&mut self, enabled: bool) -> bool {
        self.matcher.set_highlight_only(enabled)
    }

    pub fn visible_rows(&self) -> Vec<usize> {
        self.matcher.visible_rows(&self.store)
    }

    pub fn highlight_summary(&self) -> String {
        self.matcher.summary()
    }

    /// Change notation or value folding; rebuilds every row
    pub fn set_display_options(&mut self, display: DisplayOptions) {
        self.store.set_display_options(display);
        self.matcher.clear_cache();
    }

    pub fn show_global_date_time(&mut self) {
        self.store.set_time_mode(TimeMode::GlobalDateTime);
    }

    pub fn show_global_time(&mut self) {
        self.store.set_time_mode(TimeMode::GlobalTime);
    }

    /// Show times relative to the event at `row`
    pub fn show_deltas_from(&mut self, row: usize) -> bool {
        match self.store.time(row).as_datetime() {
            Some(base) => {
                self.store.set_time_mode(TimeMode::Deltas(base));
                true
            }
            None => false,
        }
    }

    pub fn set_find_query(&mut self, rule: HighlightRule) {
        self.search.set_query(rule);
    }

    pub fn set_current_row(&mut self, row: Option<usize>) {
        self.search.set_current_row(row);
    }

    pub fn find(&mut self, direction: Direction) -> Option<SearchMatch> {
        match direction {
            Direction::Forward => self.search.find_next(&self.store, &self.matcher),
            Direction::Backward => self.search.find_previous(&self.store, &self.matcher),
        }
    }

    pub fn find_highlighted(&mut self, direction: Direction) -> Option<SearchMatch> {
        match direction {
            Direction::Forward => self.search.find_next_highlighted(&self.store, &self.matcher),
            Direction::Backward => {
                self.search.find_previous_highlighted(&self.store, &self.matcher)
            }
        }
    }

    pub fn find_same_type(&mut self, row: usize, direction: Direction) -> Option<SearchMatch> {
        self.search.find_same_type(&self.store, &self.matcher, row, direction)
    }

    /// Replace the content with one file
    pub fn load_file(&mut self, path: &Path) -> Result<LoadSummary> {
        let batch = read_events(path, &self.parse_options)?;
        self.clear();
        self.set_source(SourceKind::SingleFile, vec![path.to_path_buf()]);

        let summary = LoadSummary {
            loaded: batch.records.len(),
            skipped: batch.skipped,
            first_row: 0,
        };
        self.store.append_batch(batch.records);
        tracing::info!("{}: {}", path.display(), summary);
        Ok(summary)
    }

    /// Merge another file's events into the current rows
    pub fn merge_file(&mut self, path: &Path) -> Result<LoadSummary> {
        let batch = read_events(path, &self.parse_options)?;
        let summary = LoadSummary {
            loaded: batch.records.len(),
            skipped: batch.skipped,
            first_row: self.merge(batch.records),
        };
        self.paths.push(path.to_path_buf());
        if self.kind == SourceKind::Empty {
            self.kind = SourceKind::SingleFile;
        }
        tracing::info!("Merged {}: {}", path.display(), summary);
        Ok(summary)
    }

    /// Replace the content with every admitted file of a directory
    pub fn load_directory(&mut self, dir: &Path) -> Result<LoadSummary> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read directory {}", dir.display()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && matches_any(path, &self.name_filters))
            .collect();
        files.sort();

        let mut records = Vec::new();
        let mut skipped = 0;
        for file in &files {
            if !self.admits(file) {
                tracing::debug!("Excluding {}", file.display());
                continue;
            }
            match read_events(file, &self.parse_options) {
                Ok(batch) => {
                    records.extend(batch.records);
                    skipped += batch.skipped;
                }
                Err(e) => tracing::warn!("Skipping {}: {:#}", file.display(), e),
            }
        }
        sort_batch(&mut records);

        self.clear();
        self.set_source(SourceKind::Directory, vec![dir.to_path_buf()]);
        let summary = LoadSummary {
            loaded: records.len(),
            skipped,
            first_row: 0,
        };
        self.store.append_batch(records);
        tracing::info!("{}: {}", dir.display(), summary);
        Ok(summary)
    }

    /// Whether a directory file should be read: structured, or any text when configured
    pub fn admits(&self, path: &Path) -> bool {
        if self.parse_options.capture_all_text_files {
            return true;
        }
        first_non_blank_line(path).map(|line| looks_structured(&line)).unwrap_or(false)
    }

    /// Reload from the recorded paths
    pub fn refresh(&mut self) -> Result<LoadSummary> {
        let paths = self.paths.clone();
        match self.kind {
            SourceKind::Directory => {
                let dir = paths.first().context("No directory to refresh")?;
                self.load_directory(dir)
            }
            SourceKind::SingleFile => {
                let (first, rest) = paths.split_first().context("No file to refresh")?;
                let mut summary = self.load_file(first)?;
                for path in rest {
                    let merged = self.merge_file(path)?;
                    summary.loaded += merged.loaded;
                    summary.skipped += merged.skipped;
                }
                Ok(summary)
            }
            SourceKind::Empty | SourceKind::Exported => Ok(LoadSummary::default()),
        }
    }

    /// New model holding copies of the given rows, with the same rules
    pub fn export_rows(&self, rows: &[usize]) -> EventModel {
        let mut rows: Vec<usize> = rows.iter().copied().filter(|&r| r < self.row_count()).collect();
        rows.sort_unstable();
        rows.dedup();

        let records = rows
            .iter()
            .filter_map(|&row| self.store.event(row).cloned())
            .collect();

        let mut exported = EventModel::new(
            self.parse_options.clone(),
            self.store.display_options().clone(),
        );
        exported.set_rules(self.rules());
        exported.set_source(SourceKind::Exported, Vec::new());
        exported.append(records);
        exported
    }
}

impl Default for EventModel {
    fn default() -> Self {
        Self::new(ParseOptions::default(), DisplayOptions::default())
    }
}
