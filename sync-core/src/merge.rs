//! Merge helpers for id-keyed record lists.
//!
//! Every list the engine keeps is ordered and keyed by record id. Merging
//! an incoming record replaces the existing entry at its position, or
//! appends when the id is new, so a record delivered twice (direct response
//! and realtime echo) never appears twice.

use vibe_sync_types::{EntityId, Record, UserId};

/// Insert or replace `record` by id. Returns `true` if it was appended.
pub fn upsert_by_id<R: Record>(items: &mut Vec<R>, record: R) -> bool {
    match items.iter().position(|existing| existing.id() == record.id()) {
        Some(index) => {
            items[index] = record;
            false
        }
        None => {
            items.push(record);
            true
        }
    }
}

/// Upsert every record of `incoming` into `items`. Returns how many were new.
pub fn upsert_many<R: Record>(items: &mut Vec<R>, incoming: impl IntoIterator<Item = R>) -> usize {
    incoming
        .into_iter()
        .map(|record| upsert_by_id(items, record))
        .filter(|appended| *appended)
        .count()
}

/// Remove the record with `id`. Returns the removed record.
pub fn remove_by_id<R: Record>(items: &mut Vec<R>, id: &EntityId) -> Option<R> {
    let index = items.iter().position(|existing| existing.id() == id)?;
    Some(items.remove(index))
}

/// Split records into those owned by `me` and everyone else's.
///
/// Records without an owner go to the second list.
pub fn partition_by_owner<R: Record>(records: Vec<R>, me: &UserId) -> (Vec<R>, Vec<R>) {
    records
        .into_iter()
        .partition(|record| record.owner() == Some(me))
}
