//! Assertion helpers over published controller state.

use std::collections::HashSet;
use sync_client::optimistic::LOCAL_ID_PREFIX;
use sync_types::{EntityId, Record};

/// Ids of `records`, in order.
pub fn ids<R: Record>(records: &[R]) -> Vec<EntityId> {
    records.iter().map(|r| r.id().clone()).collect()
}

/// The first id that appears more than once, if any.
pub fn first_duplicate<R: Record>(records: &[R]) -> Option<EntityId> {
    let mut seen = HashSet::new();
    records
        .iter()
        .map(|r| r.id())
        .find(|id| !seen.insert((*id).clone()))
        .cloned()
}

/// Number of placeholders (records still carrying a local id).
pub fn placeholders<R: Record>(records: &[R]) -> usize {
    records
        .iter()
        .filter(|r| r.id().as_str().starts_with(LOCAL_ID_PREFIX))
        .count()
}

/// Panic with the offending id if `records` holds a duplicate.
pub fn assert_unique<R: Record>(records: &[R]) {
    if let Some(id) = first_duplicate(records) {
        panic!("duplicate record {} in {:?}", id, ids(records));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_types::{ChatMessage, UserId};

    fn message(id: &str) -> ChatMessage {
        ChatMessage {
            id: EntityId::new(id),
            conversation_id: EntityId::new("c"),
            sender: UserId::new("a"),
            body: String::new(),
            sent_at: 0,
            client_ref: None,
        }
    }

    #[test]
    fn finds_duplicates_and_placeholders() {
        let records = vec![message("m1"), message("local-x"), message("m1")];
        assert_eq!(first_duplicate(&records), Some(EntityId::new("m1")));
        assert_eq!(placeholders(&records), 1);
        assert_eq!(first_duplicate(&records[..2]), None);
    }
}
