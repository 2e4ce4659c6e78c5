//! Live capture of a growing file or a directory of log files
//!
//! The controller is polled: the owner calls [`LiveTail::tick`] on a fixed
//! interval and everything happens on the caller's thread.

use crate::log_entry::{looks_structured, parse_line};
use crate::log_reader::{file_name_of, first_non_blank_line, LogReader};
use crate::merge::sort_batch;
use crate::model::EventModel;
use anyhow::{bail, Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What is being tailed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailTarget {
    File(PathBuf),
    Directory(PathBuf),
}

impl TailTarget {
    /// Directory target when `path` is a directory, file target otherwise
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if path.is_dir() {
            TailTarget::Directory(path)
        } else {
            TailTarget::File(path)
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            TailTarget::File(path) | TailTarget::Directory(path) => path,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureState {
    #[default]
    Idle,
    Capturing,
}

/// Live capture settings snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct TailOptions {
    /// Polling interval
    pub interval: Duration,
    /// Rows kept in the model; older rows are trimmed
    pub max_events: usize,
    /// File name patterns watched in a directory
    pub name_filters: Vec<String>,
}

impl Default for TailOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(250),
            max_events: 100_000,
            name_filters: vec!["*.txt".to_string(), "*.log".to_string()],
        }
    }
}

/// What one tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickReport {
    /// Events merged into the model
    pub new_events: usize,
    /// Lines dropped by the parser
    pub skipped: usize,
    /// First row that received an event, after trimming
    pub first_row: Option<usize>,
    /// Oldest rows removed to respect the cap
    pub trimmed: usize,
}

/// Polling tail controller
pub struct LiveTail {
    target: TailTarget,
    options: TailOptions,
    state: CaptureState,
    /// Open readers keyed by full path
    readers: BTreeMap<PathBuf, LogReader>,
    /// Files rejected for this capture session
    excluded: BTreeSet<PathBuf>,
    /// Directory files with no content yet to judge
    pending: BTreeSet<PathBuf>,
    /// Sequence number of the next admitted event
    next_index: u64,
}

impl LiveTail {
    pub fn new(target: TailTarget, options: TailOptions) -> Self {
        Self {
            target,
            options,
            state: CaptureState::Idle,
            readers: BTreeMap::new(),
            excluded: BTreeSet::new(),
            pending: BTreeSet::new(),
            next_index: 1,
        }
    }

    pub fn target(&self) -> &TailTarget {
        &self.target
    }

    pub fn options(&self) -> &TailOptions {
        &self.options
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn is_capturing(&self) -> bool {
        self.state == CaptureState::Capturing
    }

    /// Files currently read each tick
    pub fn watched_files(&self) -> Vec<&Path> {
        self.readers.keys().map(PathBuf::as_path).collect()
    }

    pub fn excluded_files(&self) -> Vec<&Path> {
        self.excluded.iter().map(PathBuf::as_path).collect()
    }

    /// Begin capturing; existing content is not read
    pub fn start(&mut self, model: &EventModel) -> Result<()> {
        if self.is_capturing() {
            return Ok(());
        }

        match self.target.clone() {
            TailTarget::File(path) => {
                if !path.is_file() {
                    tracing::error!("Cannot tail {}: file doesn't exist", path.display());
                    bail!("File doesn't exist: {}", path.display());
                }
                let reader = LogReader::at_end(&path).map_err(|e| {
                    tracing::error!("Cannot tail {}: {:#}", path.display(), e);
                    e.context(format!("File could not be opened: {}", path.display()))
                })?;
                self.readers.insert(path, reader);
                self.next_index = model.next_sequence();
            }
            TailTarget::Directory(dir) => {
                let files = self.list_directory(&dir)?;
                self.next_index = 1;
                let capture_all = model.parse_options().capture_all_text_files;
                for file in files {
                    self.evaluate(file, capture_all, true);
                }
            }
        }

        self.state = CaptureState::Capturing;
        tracing::info!(
            "Live capture of {} started ({} watched, {} excluded)",
            self.target.path().display(),
            self.readers.len(),
            self.excluded.len()
        );
        Ok(())
    }

    /// Stop capturing and forget all per-file state
    pub fn stop(&mut self) {
        if !self.is_capturing() {
            return;
        }
        self.readers.clear();
        self.excluded.clear();
        self.pending.clear();
        self.state = CaptureState::Idle;
        tracing::info!("Live capture of {} stopped", self.target.path().display());
    }

    /// Read what was appended since the last tick and merge it into `model`
    pub fn tick(&mut self, model: &mut EventModel) -> TickReport {
        let mut report = TickReport::default();
        if !self.is_capturing() {
            return report;
        }

        if let TailTarget::Directory(dir) = self.target.clone() {
            self.admit_new_files(&dir, model.parse_options().capture_all_text_files);
        }

        let mut records = Vec::new();
        let mut lost = Vec::new();
        for (path, reader) in self.readers.iter_mut() {
            let lines = match reader.read_new_lines() {
                Ok(lines) => lines,
                Err(e) => {
                    tracing::warn!("Stopped reading {}: {:#}", path.display(), e);
                    lost.push(path.clone());
                    continue;
                }
            };

            let file_name = reader.file_name();
            for line in &lines {
                if line.trim().is_empty() {
                    continue;
                }
                match parse_line(self.next_index, line, &file_name, model.parse_options()) {
                    Some(record) => {
                        records.push(record);
                        self.next_index += 1;
                    }
                    None => report.skipped += 1,
                }
            }
        }
        for path in lost {
            self.readers.remove(&path);
        }

        if !records.is_empty() {
            if self.readers.len() > 1 {
                sort_batch(&mut records);
            }
            report.new_events = records.len();
            report.first_row = Some(model.merge(records));
        }

        report.trimmed = model.trim(self.options.max_events);
        if let Some(first_row) = report.first_row.as_mut() {
            *first_row = first_row.saturating_sub(report.trimmed);
        }

        if report.new_events > 0 || report.trimmed > 0 {
            tracing::debug!(
                "Tick: {} new, {} skipped, {} trimmed",
                report.new_events,
                report.skipped,
                report.trimmed
            );
        }
        report
    }

    /// Human readable capture state
    pub fn debug_info(&self) -> String {
        let kind = match self.target {
            TailTarget::File(_) => "Single File",
            TailTarget::Directory(_) => "Directory",
        };
        let mut info = format!("Type: {}\nPath: {}\n", kind, self.target.path().display());
        if let TailTarget::Directory(_) = self.target {
            info.push_str("\nMonitoring files:\n  Include:\n");
            for path in self.readers.keys() {
                info.push_str(&format!("    {}\n", file_name_of(path)));
            }
            info.push_str("  Exclude:\n");
            for path in &self.excluded {
                info.push_str(&format!("    {}\n", file_name_of(path)));
            }
        }
        info
    }

    fn list_directory(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read directory {}", dir.display()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && matches_any(path, &self.options.name_filters))
            .collect();
        files.sort();
        Ok(files)
    }

    fn admit_new_files(&mut self, dir: &Path, capture_all: bool) {
        let files = match self.list_directory(dir) {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!("{:#}", e);
                return;
            }
        };

        for file in files {
            if !self.readers.contains_key(&file) && !self.excluded.contains(&file) {
                self.evaluate(file, capture_all, false);
            }
        }
    }

    /// Decide once whether a directory file is watched.
    ///
    /// Files present at start are read from their end; files that appear
    /// later are read from the beginning.
    fn evaluate(&mut self, path: PathBuf, capture_all: bool, at_start: bool) {
        let first_line = first_non_blank_line(&path);
        if first_line.is_none() && !capture_all {
            self.pending.insert(path);
            return;
        }
        self.pending.remove(&path);

        let admitted = capture_all || first_line.as_deref().is_some_and(looks_structured);
        if !admitted {
            tracing::debug!("Excluding {} from capture", path.display());
            self.excluded.insert(path);
            return;
        }

        let opened = if at_start {
            LogReader::at_end(&path)
        } else {
            LogReader::new(&path)
        };
        match opened {
            Ok(reader) => {
                tracing::debug!("Watching {} ({})", path.display(), reader.encoding_name());
                self.readers.insert(path, reader);
            }
            Err(e) => {
                tracing::warn!("Excluding unreadable {}: {:#}", path.display(), e);
                self.excluded.insert(path);
            }
        }
    }
}

/// Whether the file name of `path` matches any of the wildcard patterns
pub fn matches_any(path: &Path, patterns: &[String]) -> bool {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_lowercase()) else {
        return false;
    };
    patterns
        .iter()
        .any(|pattern| wildcard_match(&pattern.to_lowercase(), &name))
}

/// `*` matches any run of characters, `?` exactly one
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, t));
            p += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            t = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::Column;
    use crate::event_store::DisplayOptions;
    use crate::log_entry::ParseOptions;
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::tempdir;

    fn append(path: &Path, text: &str) {
        let mut file = OpenOptions::new().create(true).append(true).open(path).unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }

    fn event(second: u32, key: &str) -> String {
        format!("{{\"ts\":\"2024-01-01T00:00:{:02}.000\",\"k\":\"{}\"}}\n", second, key)
    }

    fn strict_model() -> EventModel {
        let options = ParseOptions {
            capture_all_text_files: false,
            ..ParseOptions::default()
        };
        EventModel::new(options, DisplayOptions::default())
    }

    #[test]
    fn test_wildcards() {
        assert!(wildcard_match("*.log", "app.log"));
        assert!(wildcard_match("*.log", ".log"));
        assert!(!wildcard_match("*.log", "app.log.1"));
        assert!(wildcard_match("app-??.txt", "app-01.txt"));
        assert!(wildcard_match("*", ""));
        let filters = TailOptions::default().name_filters;
        assert!(matches_any(Path::new("/x/APP.LOG"), &filters));
        assert!(!matches_any(Path::new("/x/app.csv"), &filters));
    }

    #[test]
    fn test_single_file_starts_at_end() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("live.log");
        append(&path, &event(1, "old"));

        let mut model = EventModel::default();
        model.load_file(&path).unwrap();
        let mut tail = LiveTail::new(TailTarget::from_path(&path), TailOptions::default());
        tail.start(&model).unwrap();
        assert!(tail.is_capturing());
        assert_eq!(tail.tick(&mut model), TickReport::default());

        append(&path, &event(2, "new"));
        append(&path, "\n");
        let report = tail.tick(&mut model);
        assert_eq!(report.new_events, 1);
        assert_eq!(report.first_row, Some(1));
        assert_eq!(model.store().get(1, Column::Key), "new");
        assert_eq!(model.store().get(1, Column::Id), "2");

        tail.stop();
        append(&path, &event(3, "ignored"));
        assert_eq!(tail.tick(&mut model), TickReport::default());
        assert_eq!(model.row_count(), 2);

        // A restart only sees lines written after it
        tail.start(&model).unwrap();
        append(&path, &event(4, "after"));
        tail.tick(&mut model);
        assert_eq!(model.row_count(), 3);
        assert_eq!(model.store().get(2, Column::Key), "after");
        assert_eq!(model.store().get(2, Column::Id), "3");
    }

    #[test]
    fn test_missing_file_stays_idle() {
        let dir = tempdir().unwrap();
        let model = EventModel::default();
        let target = TailTarget::File(dir.path().join("nope.log"));
        let mut tail = LiveTail::new(target, TailOptions::default());
        assert!(tail.start(&model).is_err());
        assert_eq!(tail.state(), CaptureState::Idle);
    }

    #[test]
    fn test_truncated_file_is_reread() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rotating.log");
        append(&path, &event(1, "a"));
        append(&path, &event(2, "b"));

        let mut model = EventModel::default();
        let mut tail = LiveTail::new(TailTarget::File(path.clone()), TailOptions::default());
        tail.start(&model).unwrap();

        std::fs::write(&path, event(3, "c")).unwrap();
        let report = tail.tick(&mut model);
        assert_eq!(report.new_events, 1);
        assert_eq!(model.store().get(0, Column::Key), "c");
    }

    #[test]
    fn test_directory_admission() {
        let dir = tempdir().unwrap();
        let json = dir.path().join("a.log");
        let plain = dir.path().join("b.txt");
        let other = dir.path().join("c.csv");
        append(&json, &event(1, "existing"));
        append(&plain, "plain text\n");
        append(&other, &event(1, "csv"));

        let mut model = strict_model();
        let target = TailTarget::Directory(dir.path().to_path_buf());
        let mut tail = LiveTail::new(target, TailOptions::default());
        tail.start(&model).unwrap();
        assert_eq!(tail.watched_files(), vec![json.as_path()]);
        assert_eq!(tail.excluded_files(), vec![plain.as_path()]);

        append(&json, &event(5, "later"));
        append(&plain, &event(6, "still excluded"));
        let newcomer = dir.path().join("d.log");
        append(&newcomer, &event(3, "newcomer"));

        let report = tail.tick(&mut model);
        assert_eq!(report.new_events, 2);
        let keys: Vec<String> = (0..model.row_count())
            .map(|r| model.store().get(r, Column::Key))
            .collect();
        assert_eq!(keys, vec!["newcomer", "later"]);
        assert_eq!(model.store().get(0, Column::File), "d.log");
        assert!(tail.debug_info().contains("Exclude:\n    b.txt"));

        tail.stop();
        assert!(tail.watched_files().is_empty());
        assert!(tail.excluded_files().is_empty());
    }

    #[test]
    fn test_empty_directory_file_is_pending() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("later.log");
        append(&path, "");

        let mut model = strict_model();
        let target = TailTarget::Directory(dir.path().to_path_buf());
        let mut tail = LiveTail::new(target, TailOptions::default());
        tail.start(&model).unwrap();
        assert!(tail.watched_files().is_empty());
        assert!(tail.excluded_files().is_empty());

        append(&path, &event(1, "first"));
        let report = tail.tick(&mut model);
        assert_eq!(report.new_events, 1);
        assert_eq!(model.store().get(0, Column::Id), "1");
    }

    #[test]
    fn test_stack_trace_line_stays_below_its_event() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trace.log");
        append(&path, &event(1, "e1"));
        append(&path, &event(2, "e2"));

        let mut model = EventModel::default();
        model.load_file(&path).unwrap();
        let mut tail = LiveTail::new(TailTarget::File(path.clone()), TailOptions::default());
        tail.start(&model).unwrap();

        append(&path, &event(3, "e3"));
        append(&path, "    at Foo.bar(Foo.java:10)\n");
        let report = tail.tick(&mut model);

        assert_eq!(report.first_row, Some(2));
        let keys: Vec<String> = (0..model.row_count())
            .map(|r| model.store().get(r, Column::Key))
            .collect();
        assert_eq!(keys, vec!["e1", "e2", "e3", ""]);
        assert_eq!(model.store().get(3, Column::Value), "at Foo.bar(Foo.java:10)");
    }

    #[test]
    fn test_tick_trims_to_cap() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("busy.log");
        append(&path, "");

        let mut model = EventModel::default();
        let options = TailOptions {
            max_events: 3,
            ..TailOptions::default()
        };
        let mut tail = LiveTail::new(TailTarget::File(path.clone()), options);
        tail.start(&model).unwrap();

        for second in 0..5 {
            append(&path, &event(second, &format!("e{}", second)));
        }
        let report = tail.tick(&mut model);
        assert_eq!(report.new_events, 5);
        assert_eq!(report.trimmed, 2);
        assert_eq!(report.first_row, Some(0));
        assert_eq!(model.row_count(), 3);
        assert_eq!(model.store().get(0, Column::Key), "e2");
    }
}
