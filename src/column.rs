//! Column schema shared by every row of the event tree

use serde::{Deserialize, Serialize};

/// A column of the event grid.
///
/// The schema is fixed: every node, top-level or child, answers for all of
/// these columns. Names serialize exactly as [`Column::name`] returns them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Column {
    #[serde(rename = "ID")]
    Id,
    File,
    Time,
    Elapsed,
    #[serde(rename = "PID")]
    Pid,
    #[serde(rename = "TID")]
    Tid,
    Severity,
    Request,
    Session,
    Site,
    User,
    Key,
    Value,
    #[serde(rename = "ART")]
    Art,
    ErrorCode,
}

impl Column {
    /// Number of columns in the schema
    pub const COUNT: usize = 15;

    /// All columns in display order
    pub const ALL: [Column; Column::COUNT] = [
        Column::Id,
        Column::File,
        Column::Time,
        Column::Elapsed,
        Column::Pid,
        Column::Tid,
        Column::Severity,
        Column::Request,
        Column::Session,
        Column::Site,
        Column::User,
        Column::Key,
        Column::Value,
        Column::Art,
        Column::ErrorCode,
    ];

    /// Header text for this column
    pub fn name(&self) -> &'static str {
        match self {
            Column::Id => "ID",
            Column::File => "File",
            Column::Time => "Time",
            Column::Elapsed => "Elapsed",
            Column::Pid => "PID",
            Column::Tid => "TID",
            Column::Severity => "Severity",
            Column::Request => "Request",
            Column::Session => "Session",
            Column::Site => "Site",
            Column::User => "User",
            Column::Key => "Key",
            Column::Value => "Value",
            Column::Art => "ART",
            Column::ErrorCode => "ErrorCode",
        }
    }

    /// Look up a column by its header text
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.name() == name)
    }

    /// Position of this column in the grid
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Column at a grid position
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

impl std::fmt::Display for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
