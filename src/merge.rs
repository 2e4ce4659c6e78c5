//! Time-ordered merging of event batches into the store

use crate::event_store::{EventStore, ModelEvent};
use crate::log_entry::Record;
use crate::timestamp::EventTime;

/// Merge an ascending batch into the store.
///
/// Both the store and the batch must already be in time order. The batch is
/// walked from its newest event backward while a shared cursor walks the
/// store backward, so new events that belong near the bottom cost little.
/// Each event lands after the last existing row whose time is not later than
/// its own. When the first event carries no usable timestamp the batch is
/// appended as is.
///
/// Untimed rows after the first, such as stack trace lines, are ordered by
/// the last valid time before them and so stay with their event, on both
/// sides of the merge.
///
/// Returns the lowest row that received an event.
pub fn merge_into(store: &mut EventStore, records: Vec<Record>) -> usize {
    let row_count = store.row_count();
    let Some(first) = records.first() else {
        return row_count;
    };

    if !first.time().is_valid() {
        tracing::debug!("Appending {} untimed events at row {}", records.len(), row_count);
        store.append_batch(records);
        return row_count;
    }

    let count = records.len();
    let times = ordering_times(&records);
    let mut cursor = row_count;
    let mut lowest = row_count;
    let mut records = records;

    while let Some(record) = records.pop() {
        let time = times[records.len()];
        while cursor > 0 {
            let owner = timed_row_at_or_above(store, cursor - 1);
            if store.time(owner) > time {
                cursor = owner;
            } else {
                break;
            }
        }
        store.insert_quiet(cursor, record);
        lowest = cursor;
    }

    tracing::debug!("Merged {} events, first affected row {}", count, lowest);
    store.notify(ModelEvent::LayoutChanged { first_row: lowest });
    lowest
}

/// Stable sort by event time, for batches gathered from several files.
/// Untimed records keep their place behind the event they follow.
pub fn sort_batch(records: &mut Vec<Record>) {
    let times = ordering_times(records);
    let mut keyed: Vec<(EventTime, Record)> = times.into_iter().zip(records.drain(..)).collect();
    keyed.sort_by_key(|(time, _)| *time);
    records.extend(keyed.into_iter().map(|(_, record)| record));
}

/// Each record's own time, or the last valid time before it
fn ordering_times(records: &[Record]) -> Vec<EventTime> {
    let mut last = EventTime::INVALID;
    records
        .iter()
        .map(|record| {
            let time = record.time();
            if time.is_valid() {
                last = time;
            }
            last
        })
        .collect()
}

/// Nearest row at or above `row` with a valid time, or 0
fn timed_row_at_or_above(store: &EventStore, mut row: usize) -> usize {
    while row > 0 && !store.time(row).is_valid() {
        row -= 1;
    }
    row
}
