//! logtree - structured event log ingestion and tree indexing
//!
//! Parses JSON-per-line event logs (with freeform text fallback) into an
//! arena-backed row/field tree, keeps rows ordered by timestamp while new
//! events are merged in, colors rows with highlight rules and tails growing
//! files or whole directories.

pub mod column;
pub mod config;
pub mod event_store;
pub mod highlighter;
pub mod live_tail;
pub mod log_entry;
pub mod log_reader;
pub mod merge;
pub mod model;
pub mod notation;
pub mod search;
pub mod timestamp;

pub use column::Column;
pub use event_store::{EventStore, ModelEvent, NodeId};
pub use highlighter::{HighlightMatcher, HighlightRule, MatchMode, Rgb};
pub use live_tail::{LiveTail, TailTarget};
pub use log_entry::Record;
pub use model::EventModel;
