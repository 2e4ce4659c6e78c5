//! Arena-backed tree index of log events
//!
//! Every top-level row is one event. Its value is flattened into child rows,
//! one per map key or array element, recursively. Nodes live in a slot arena
//! and are addressed by [`NodeId`]s that carry the slot generation, so a
//! handle to a removed node never resolves to whatever reuses its slot.

use crate::column::Column;
use crate::log_entry::{fields, Record};
use crate::notation::{self, LineFormat, Notation};
use crate::timestamp::EventTime;
use chrono::NaiveDateTime;
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde_json::{Map, Value};

/// Key under which ART data is folded into the value
pub const ART_VALUE_KEY: &str = "~art";
/// Key under which the error code is folded into the value
pub const ERROR_CODE_VALUE_KEY: &str = "~errorcode";

const ART_MARKER: &str = "\u{25CF}";
const ERROR_CODE_MARKER: &str = "\u{25A0}";

/// Handle to a node of the event tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

/// Typed content of one grid cell
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Cell {
    #[default]
    Empty,
    Int(i64),
    Float(f64),
    Text(String),
    Time(EventTime),
}

static EMPTY_CELL: Cell = Cell::Empty;

impl Cell {
    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.is_empty(),
            Cell::Time(t) => !t.is_valid(),
            Cell::Int(_) | Cell::Float(_) => false,
        }
    }

    /// Unformatted text, used for matching
    pub fn plain_text(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Int(i) => i.to_string(),
            Cell::Float(f) => f.to_string(),
            Cell::Text(s) => s.clone(),
            Cell::Time(t) => t.to_iso_string(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(i) => Some(*i as f64),
            Cell::Float(f) => Some(*f),
            Cell::Text(s) => s.trim().parse().ok(),
            Cell::Empty | Cell::Time(_) => None,
        }
    }

    /// Cell for a scalar JSON value
    fn from_scalar(value: &Value) -> Self {
        match value {
            Value::Null => Cell::Empty,
            Value::Bool(b) => Cell::Text(b.to_string()),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Cell::Int(i)
                } else {
                    match n.as_f64() {
                        Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                            Cell::Int(f as i64)
                        }
                        Some(f) => Cell::Float(f),
                        None => Cell::Empty,
                    }
                }
            }
            Value::String(s) => Cell::Text(s.clone()),
            other => Cell::Text(other.to_string()),
        }
    }
}

/// How the Time column is displayed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeMode {
    /// `MM/dd/yyyy - hh:mm:ss.zzz`
    #[default]
    GlobalDateTime,
    /// `hh:mm:ss.zzz`
    GlobalTime,
    /// Signed distance from a base event
    Deltas(NaiveDateTime),
}

/// Display configuration snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayOptions {
    /// Notation used to render structured values
    pub notation: Notation,
    /// Maximum characters shown in a Value cell
    pub value_display_limit: usize,
    /// Fold ART data into the value
    pub show_art_in_value: bool,
    /// Fold the error code into the value
    pub show_error_code_in_value: bool,
}

impl Default for DisplayOptions {
    fn default() -> Self {
        Self {
            notation: Notation::default(),
            value_display_limit: 300,
            show_art_in_value: false,
            show_error_code_in_value: false,
        }
    }
}

/// Change notification sent to subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelEvent {
    RowsInserted { first: usize, count: usize },
    RowsRemoved { first: usize, count: usize },
    /// Rows from `first_row` on may have moved
    LayoutChanged { first_row: usize },
    DataChanged { node: NodeId, column: Column },
    /// Everything changed; previously issued node ids are dead
    Reset,
}

struct EventHeader {
    record: Record,
    cells: [Cell; Column::COUNT],
}

enum NodeData {
    Event(Box<EventHeader>),
    Field { key: Cell, value: Cell },
}

struct Node {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    data: NodeData,
}

struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Ordered collection of event trees
pub struct EventStore {
    slots: Vec<Slot>,
    free: Vec<u32>,
    roots: Vec<NodeId>,
    display: DisplayOptions,
    time_mode: TimeMode,
    subscribers: Vec<Sender<ModelEvent>>,
}

impl EventStore {
    pub fn new() -> Self {
        Self::with_display(DisplayOptions::default())
    }

    pub fn with_display(display: DisplayOptions) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            roots: Vec::new(),
            display,
            time_mode: TimeMode::default(),
            subscribers: Vec::new(),
        }
    }

    /// Receive change notifications
    pub fn subscribe(&mut self) -> Receiver<ModelEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    pub(crate) fn notify(&mut self, event: ModelEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Append records at the end, in order
    pub fn append_batch(&mut self, records: Vec<Record>) {
        if records.is_empty() {
            return;
        }

        let first = self.roots.len();
        let count = records.len();
        for record in records {
            let id = self.build_event(record);
            self.roots.push(id);
        }
        self.notify(ModelEvent::RowsInserted { first, count });
    }

    /// Insert one record so that it becomes row `position`
    pub fn insert_at(&mut self, position: usize, record: Record) -> bool {
        if !self.insert_quiet(position, record) {
            return false;
        }
        self.notify(ModelEvent::RowsInserted {
            first: position,
            count: 1,
        });
        true
    }

    /// Insert without notifying; the caller reports the change
    pub(crate) fn insert_quiet(&mut self, position: usize, record: Record) -> bool {
        if position > self.roots.len() {
            return false;
        }
        let id = self.build_event(record);
        self.roots.insert(position, id);
        true
    }

    /// Remove `count` rows starting at `start`.
    ///
    /// Returns the ids of the removed top-level nodes, or `None` when the
    /// range does not fit, in which case nothing is removed.
    pub fn remove_range(&mut self, start: usize, count: usize) -> Option<Vec<NodeId>> {
        let end = start.checked_add(count)?;
        if end > self.roots.len() {
            return None;
        }
        if count == 0 {
            return Some(Vec::new());
        }

        let removed: Vec<NodeId> = self.roots.drain(start..end).collect();
        for &id in &removed {
            self.free_subtree(id);
        }
        self.notify(ModelEvent::RowsRemoved {
            first: start,
            count,
        });
        Some(removed)
    }

    /// Remove every row
    pub fn clear(&mut self) {
        self.release_all();
        self.notify(ModelEvent::Reset);
    }

    /// Edit the Key or Value of a node in place
    pub fn set_data(&mut self, node: NodeId, column: Column, text: &str) -> bool {
        let Some(n) = self.node_mut(node) else {
            return false;
        };

        let target = match (&mut n.data, column) {
            (NodeData::Event(header), Column::Key | Column::Value) => {
                &mut header.cells[column.index()]
            }
            (NodeData::Field { key, .. }, Column::Key) => key,
            (NodeData::Field { value, .. }, Column::Value) => value,
            _ => return false,
        };
        *target = Cell::Text(text.to_string());

        self.notify(ModelEvent::DataChanged { node, column });
        true
    }

    /// Change display options, rebuilding every row.
    ///
    /// Node ids issued before the call are invalidated.
    pub fn set_display_options(&mut self, display: DisplayOptions) {
        if display == self.display {
            return;
        }
        self.display = display;

        let records: Vec<Record> = self
            .roots
            .iter()
            .filter_map(|&id| self.header(id).map(|h| h.record.clone()))
            .collect();
        self.release_all();
        for record in records {
            let id = self.build_event(record);
            self.roots.push(id);
        }
        self.notify(ModelEvent::Reset);
    }

    pub fn set_time_mode(&mut self, mode: TimeMode) {
        self.time_mode = mode;
        self.notify(ModelEvent::LayoutChanged { first_row: 0 });
    }

    pub fn row_count(&self) -> usize {
        self.roots.len()
    }

    pub fn column_count(&self) -> usize {
        Column::COUNT
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn display_options(&self) -> &DisplayOptions {
        &self.display
    }

    pub fn time_mode(&self) -> TimeMode {
        self.time_mode
    }

    /// Top-level node ids in row order
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn root(&self, row: usize) -> Option<NodeId> {
        self.roots.get(row).copied()
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.node(node).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.node(node).and_then(|n| n.parent)
    }

    /// Whether `node` still refers to a live node
    pub fn contains(&self, node: NodeId) -> bool {
        self.node(node).is_some()
    }

    pub fn is_top_level(&self, node: NodeId) -> bool {
        self.node(node).map(|n| n.parent.is_none()).unwrap_or(false)
    }

    /// Top-level ancestor of `node` (itself when top-level)
    pub fn root_of(&self, node: NodeId) -> Option<NodeId> {
        let mut current = node;
        loop {
            match self.node(current)?.parent {
                Some(parent) => current = parent,
                None => return Some(current),
            }
        }
    }

    /// Position of `node` among its siblings
    pub fn row_of(&self, node: NodeId) -> Option<usize> {
        let siblings = match self.node(node)?.parent {
            Some(parent) => self.children(parent),
            None => &self.roots,
        };
        siblings.iter().position(|&id| id == node)
    }

    /// Record owning `node`
    pub fn get_event(&self, node: NodeId) -> Option<&Record> {
        let root = self.root_of(node)?;
        self.header(root).map(|h| &h.record)
    }

    pub fn event(&self, row: usize) -> Option<&Record> {
        self.root(row).and_then(|id| self.get_event(id))
    }

    /// Parsed time of a row; invalid when out of range
    pub fn time(&self, row: usize) -> EventTime {
        self.root(row)
            .and_then(|id| self.header(id))
            .map(|h| match h.cells[Column::Time.index()] {
                Cell::Time(t) => t,
                _ => EventTime::INVALID,
            })
            .unwrap_or(EventTime::INVALID)
    }

    /// Stored cell; `None` only for dead nodes
    pub fn cell(&self, node: NodeId, column: Column) -> Option<&Cell> {
        let n = self.node(node)?;
        Some(match &n.data {
            NodeData::Event(header) => &header.cells[column.index()],
            NodeData::Field { key, .. } if column == Column::Key => key,
            NodeData::Field { value, .. } if column == Column::Value => value,
            NodeData::Field { .. } => &EMPTY_CELL,
        })
    }

    /// Display text of a top-level row
    pub fn get(&self, row: usize, column: Column) -> String {
        self.root(row)
            .map(|id| self.node_text(id, column))
            .unwrap_or_default()
    }

    /// Display text of a node
    pub fn node_text(&self, node: NodeId, column: Column) -> String {
        let Some(cell) = self.cell(node, column) else {
            return String::new();
        };

        match (column, cell) {
            (Column::Art, c) => marker(c, ART_MARKER),
            (Column::ErrorCode, c) => marker(c, ERROR_CODE_MARKER),
            (_, Cell::Time(t)) => match self.time_mode {
                TimeMode::GlobalDateTime => t.to_date_time_string(),
                TimeMode::GlobalTime => t.to_time_string(),
                TimeMode::Deltas(base) => t.delta_string(base),
            },
            (_, Cell::Float(f)) => format!("{:.3}", f),
            (_, c) => c.plain_text(),
        }
    }

    /// Unformatted text of a node, used for matching
    pub fn plain_text(&self, node: NodeId, column: Column) -> String {
        self.cell(node, column)
            .map(Cell::plain_text)
            .unwrap_or_default()
    }

    /// Full rendering of the owning event's value
    pub fn full_value(&self, node: NodeId, single_line: bool) -> String {
        let Some(record) = self.get_event(node) else {
            return String::new();
        };

        let line_format = if single_line {
            LineFormat::SingleLine
        } else {
            LineFormat::Free
        };
        match consolidate(record, &self.display) {
            Value::String(s) if single_line => s.replace("\r\n", " ").replace('\n', " "),
            Value::String(s) => s,
            value => notation::format(&value, self.display.notation, line_format),
        }
    }

    /// Consolidated value of the owning event
    pub fn consolidated_value(&self, node: NodeId) -> Option<Value> {
        self.get_event(node)
            .map(|record| consolidate(record, &self.display))
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_ref()
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_mut()
    }

    fn header(&self, id: NodeId) -> Option<&EventHeader> {
        match &self.node(id)?.data {
            NodeData::Event(header) => Some(header),
            NodeData::Field { .. } => None,
        }
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            NodeId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                node: Some(node),
            });
            NodeId {
                index,
                generation: 0,
            }
        }
    }

    fn free_subtree(&mut self, id: NodeId) {
        let mut pending = vec![id];
        while let Some(current) = pending.pop() {
            let Some(slot) = self.slots.get_mut(current.index as usize) else {
                continue;
            };
            if slot.generation != current.generation {
                continue;
            }
            if let Some(node) = slot.node.take() {
                pending.extend(node.children);
            }
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(current.index);
        }
    }

    fn release_all(&mut self) {
        let roots = std::mem::take(&mut self.roots);
        for id in roots {
            self.free_subtree(id);
        }
    }

    fn push_child(&mut self, parent: NodeId, child: NodeId) {
        if let Some(n) = self.node_mut(parent) {
            n.children.push(child);
        }
    }

    fn build_event(&mut self, record: Record) -> NodeId {
        let mut cells: [Cell; Column::COUNT] = Default::default();
        let scalar = |field: &str| record.get(field).map(Cell::from_scalar).unwrap_or_default();

        cells[Column::Id.index()] = scalar(fields::IDX);
        cells[Column::File.index()] = scalar(fields::FILE);
        cells[Column::Time.index()] = Cell::Time(record.time());
        cells[Column::Pid.index()] = scalar(fields::PID);
        cells[Column::Tid.index()] = scalar(fields::TID);
        cells[Column::Severity.index()] = scalar(fields::SEV);
        cells[Column::Request.index()] = scalar(fields::REQ);
        cells[Column::Session.index()] = scalar(fields::SESS);
        cells[Column::Site.index()] = scalar(fields::SITE);
        cells[Column::User.index()] = scalar(fields::USER);
        cells[Column::Key.index()] = Cell::Text(record.key().to_string());
        if let Some(art) = record.art() {
            cells[Column::Art.index()] = Cell::Text(self.render(art, LineFormat::Free));
        }
        if let Some(error_code) = record.error_code() {
            cells[Column::ErrorCode.index()] =
                Cell::Text(self.render(error_code, LineFormat::Free));
        }

        let value = consolidate(&record, &self.display);
        let value_text = match &value {
            Value::String(s) => s.clone(),
            other => self.render(other, LineFormat::Free),
        };
        cells[Column::Value.index()] = Cell::Text(self.display_string(&value_text));

        let art_elapsed = record
            .art()
            .and_then(|a| a.get("elapsed"))
            .and_then(Value::as_f64);

        let id = self.alloc(Node {
            parent: None,
            children: Vec::new(),
            data: NodeData::Event(Box::new(EventHeader { record, cells })),
        });

        // Only a map value is flattened into child rows at the top level
        if let Value::Object(map) = &value {
            self.add_map_children(id, map);
        }

        if let Some(elapsed) = art_elapsed.or_else(|| self.child_elapsed(id)) {
            if let Some(Node {
                data: NodeData::Event(header),
                ..
            }) = self.node_mut(id)
            {
                header.cells[Column::Elapsed.index()] = Cell::Float(elapsed);
            }
        }

        id
    }

    fn add_map_children(&mut self, parent: NodeId, map: &Map<String, Value>) {
        for (key, value) in map {
            self.add_child(parent, key.clone(), value);
        }
    }

    fn add_array_children(&mut self, parent: NodeId, items: &[Value]) {
        for (i, item) in items.iter().enumerate() {
            self.add_child(parent, (i + 1).to_string(), item);
        }
    }

    fn add_child(&mut self, parent: NodeId, key: String, value: &Value) {
        let value_cell = match value {
            Value::Object(_) => {
                Cell::Text(self.display_string(&self.render(value, LineFormat::Free)))
            }
            Value::Array(items) => Cell::Text(format!("{} items", items.len())),
            Value::String(s) => Cell::Text(self.display_string(s)),
            scalar => Cell::from_scalar(scalar),
        };

        let id = self.alloc(Node {
            parent: Some(parent),
            children: Vec::new(),
            data: NodeData::Field {
                key: Cell::Text(key),
                value: value_cell,
            },
        });
        self.push_child(parent, id);

        match value {
            Value::Object(map) => self.add_map_children(id, map),
            Value::Array(items) => self.add_array_children(id, items),
            _ => {}
        }
    }

    /// Elapsed seconds taken from the first immediate child that names it
    fn child_elapsed(&self, id: NodeId) -> Option<f64> {
        for &child in self.children(id) {
            let Some(Node {
                data: NodeData::Field { key, value },
                ..
            }) = self.node(child)
            else {
                continue;
            };
            let Cell::Text(key) = key else {
                continue;
            };
            match key.as_str() {
                "elapsed" | "created-elapsed" => return Some(value.as_f64().unwrap_or(0.0)),
                "elapsedMs" | "elapsed-ms" => return Some(value.as_f64().unwrap_or(0.0) / 1000.0),
                _ => {}
            }
        }
        None
    }

    fn render(&self, value: &Value, line_format: LineFormat) -> String {
        notation::format(value, self.display.notation, line_format)
    }

    /// Truncate to the display limit and fold onto one line
    fn display_string(&self, text: &str) -> String {
        let truncated: String = text.chars().take(self.display.value_display_limit).collect();
        truncated.replace('\n', " ")
    }
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}

fn marker(cell: &Cell, symbol: &str) -> String {
    if cell.is_empty() {
        String::new()
    } else {
        symbol.to_string()
    }
}

/// The event value with ART data and error code folded in, when enabled
pub fn consolidate(record: &Record, display: &DisplayOptions) -> Value {
    let art = record.art().filter(|_| display.show_art_in_value);
    let error_code = record.error_code().filter(|_| display.show_error_code_in_value);
    let value = record.value().cloned().unwrap_or(Value::Null);

    if art.is_none() && error_code.is_none() {
        return value;
    }

    let mut map = match value {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert(fields::VALUE.to_string(), other);
            map
        }
    };
    if let Some(art) = art {
        map.insert(ART_VALUE_KEY.to_string(), art.clone());
    }
    if let Some(error_code) = error_code {
        map.insert(ERROR_CODE_VALUE_KEY.to_string(), error_code.clone());
    }
    Value::Object(map)
}
