//! Snapshot decoding and "most recent" ranking for attendance records.

use crate::types::AttendanceRecord;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;

/// Number of records shown in the recent-attendance lists.
pub const RECENT_LIMIT: usize = 5;

/// Full contents of a store collection, keyed by push key.
pub type Snapshot = BTreeMap<String, serde_json::Value>;

/// Decode every entry of a snapshot, skipping entries of the wrong shape.
pub fn decode_entries<T: DeserializeOwned>(snapshot: &Snapshot) -> Vec<(String, T)> {
    snapshot
        .iter()
        .filter_map(|(key, value)| match serde_json::from_value::<T>(value.clone()) {
            Ok(item) => Some((key.clone(), item)),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "skipping malformed snapshot entry");
                None
            }
        })
        .collect()
}

/// Newest-first attendance records from a snapshot, at most [`RECENT_LIMIT`].
///
/// Re-sorts the whole snapshot on every call. Equal timestamps fall back to
/// descending push key, so the order is deterministic.
pub fn recent_records(snapshot: &Snapshot) -> Vec<AttendanceRecord> {
    let mut entries = decode_entries::<AttendanceRecord>(snapshot);
    entries.sort_by(|(ka, a), (kb, b)| b.timestamp.cmp(&a.timestamp).then_with(|| kb.cmp(ka)));
    entries.truncate(RECENT_LIMIT);
    entries.into_iter().map(|(_, rec)| rec).collect()
}
