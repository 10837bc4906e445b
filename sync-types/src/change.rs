//! Rows, change notifications and filters.
//!
//! These are the engine's view of the remote data service. A [`Row`] is an
//! opaque JSON document plus the two fields the engine itself reasons about:
//! the row id and the owning user.

use crate::error::SyncError;
use crate::ids::{EntityId, UserId};
use crate::records::Record;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Remote tables the engine synchronizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    /// Friend requests and accepted friendships.
    Friendships,
    /// Ephemeral stories.
    Stories,
    /// Short looping video posts.
    VibeReels,
    /// Conversation headers (participants, last activity).
    Conversations,
    /// Messages inside conversations.
    Messages,
    /// Public user profiles.
    Profiles,
}

impl Table {
    /// Table name as known to the remote service.
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Friendships => "friendships",
            Table::Stories => "stories",
            Table::VibeReels => "vibe_reels",
            Table::Conversations => "conversations",
            Table::Messages => "messages",
            Table::Profiles => "profiles",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of change, or `Any` when used in a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Row inserted.
    Insert,
    /// Row updated.
    Update,
    /// Row deleted.
    Delete,
    /// Matches every kind. Never carried by an actual change.
    Any,
}

impl EventKind {
    /// Whether a filter of this kind accepts an event of kind `actual`.
    pub fn accepts(self, actual: EventKind) -> bool {
        self == EventKind::Any || self == actual
    }
}

/// A row as returned by the remote data service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Server-assigned id.
    pub id: EntityId,
    /// Owning user, if the table has an owner column.
    pub owner: Option<UserId>,
    /// Full row contents.
    pub data: serde_json::Value,
}

impl Row {
    /// Build a row from raw parts.
    pub fn new(id: EntityId, owner: Option<UserId>, data: serde_json::Value) -> Self {
        Self { id, owner, data }
    }

    /// Serialize a typed record into a row.
    pub fn from_record<R: Record>(record: &R) -> Result<Self, SyncError> {
        let data = serde_json::to_value(record).map_err(|e| SyncError::Decode {
            table: R::TABLE,
            reason: e.to_string(),
        })?;
        Ok(Self {
            id: record.id().clone(),
            owner: record.owner().cloned(),
            data,
        })
    }

    /// Decode the row contents into a typed record.
    pub fn decode<R: Record>(&self) -> Result<R, SyncError> {
        serde_json::from_value(self.data.clone()).map_err(|e| SyncError::Decode {
            table: R::TABLE,
            reason: format!("row {}: {}", self.id, e),
        })
    }

    /// Read a top-level field of the row contents.
    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.data.get(name)
    }
}

/// Server-side row predicate, also evaluated locally by filters and mocks.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Every row.
    All,
    /// Rows whose id is in the set.
    IdIn(Vec<EntityId>),
    /// Rows owned by one of the users.
    OwnerIn(Vec<UserId>),
    /// Rows whose top-level field equals the value.
    FieldEq {
        /// Field name.
        field: String,
        /// Expected value.
        value: serde_json::Value,
    },
    /// Rows whose top-level field equals any of the values.
    FieldIn {
        /// Field name.
        field: String,
        /// Accepted values.
        values: Vec<serde_json::Value>,
    },
    /// Rows whose top-level array field contains the value.
    Contains {
        /// Field name.
        field: String,
        /// Element looked for.
        value: serde_json::Value,
    },
    /// All sub-predicates hold.
    And(Vec<Predicate>),
    /// At least one sub-predicate holds.
    Or(Vec<Predicate>),
}

impl Predicate {
    /// Convenience constructor for [`Predicate::FieldEq`].
    pub fn field_eq(field: &str, value: impl Into<serde_json::Value>) -> Self {
        Self::FieldEq {
            field: field.to_string(),
            value: value.into(),
        }
    }

    /// Convenience constructor for [`Predicate::Contains`].
    pub fn contains(field: &str, value: impl Into<serde_json::Value>) -> Self {
        Self::Contains {
            field: field.to_string(),
            value: value.into(),
        }
    }

    /// Evaluate the predicate against a row.
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Predicate::All => true,
            Predicate::IdIn(ids) => ids.contains(&row.id),
            Predicate::OwnerIn(owners) => row
                .owner
                .as_ref()
                .map(|owner| owners.contains(owner))
                .unwrap_or(false),
            Predicate::FieldEq { field, value } => row.field(field) == Some(value),
            Predicate::FieldIn { field, values } => row
                .field(field)
                .map(|actual| values.contains(actual))
                .unwrap_or(false),
            Predicate::Contains { field, value } => row
                .field(field)
                .and_then(|actual| actual.as_array())
                .map(|items| items.contains(value))
                .unwrap_or(false),
            Predicate::And(parts) => parts.iter().all(|p| p.matches(row)),
            Predicate::Or(parts) => parts.iter().any(|p| p.matches(row)),
        }
    }
}

/// A realtime change notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    /// Table the change happened in.
    pub table: Table,
    /// Insert, Update or Delete.
    pub event: EventKind,
    /// Row before the change (updates and deletes, when the service sends it).
    pub old_row: Option<Row>,
    /// Row after the change (inserts and updates).
    pub new_row: Option<Row>,
}

impl Change {
    /// An insert of `row`.
    pub fn insert(table: Table, row: Row) -> Self {
        Self {
            table,
            event: EventKind::Insert,
            old_row: None,
            new_row: Some(row),
        }
    }

    /// An update from `old` to `new`.
    pub fn update(table: Table, old: Option<Row>, new: Row) -> Self {
        Self {
            table,
            event: EventKind::Update,
            old_row: old,
            new_row: Some(new),
        }
    }

    /// A delete of `old`.
    pub fn delete(table: Table, old: Row) -> Self {
        Self {
            table,
            event: EventKind::Delete,
            old_row: Some(old),
            new_row: None,
        }
    }

    /// The most recent row image carried by the change.
    pub fn row(&self) -> Option<&Row> {
        self.new_row.as_ref().or(self.old_row.as_ref())
    }

    /// Id of the changed entity.
    pub fn entity_id(&self) -> Option<&EntityId> {
        self.row().map(|row| &row.id)
    }
}

/// One entry of a subscription's filter list.
#[derive(Debug, Clone, PartialEq)]
pub struct TableFilter {
    /// Table to listen on.
    pub table: Table,
    /// Event kind, `Any` for all.
    pub event: EventKind,
    /// Optional row predicate evaluated against the change's row image.
    pub predicate: Option<Predicate>,
}

impl TableFilter {
    /// Listen to every event on `table`.
    pub fn any(table: Table) -> Self {
        Self {
            table,
            event: EventKind::Any,
            predicate: None,
        }
    }

    /// Listen to one event kind on `table`.
    pub fn on(table: Table, event: EventKind) -> Self {
        Self {
            table,
            event,
            predicate: None,
        }
    }

    /// Restrict the filter with a row predicate.
    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Whether this filter entry accepts the change.
    pub fn matches(&self, change: &Change) -> bool {
        if self.table != change.table || !self.event.accepts(change.event) {
            return false;
        }
        match (&self.predicate, change.row()) {
            (None, _) => true,
            (Some(predicate), Some(row)) => predicate.matches(row),
            (Some(_), None) => false,
        }
    }
}

/// Filter passed to the remote service when opening a change feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeFilter {
    /// `None` for every table.
    pub table: Option<Table>,
    /// Event kind, `Any` for all.
    pub event: EventKind,
}

impl ChangeFilter {
    /// Every event on every table.
    pub fn everything() -> Self {
        Self {
            table: None,
            event: EventKind::Any,
        }
    }

    /// Whether this feed filter accepts the change.
    pub fn matches(&self, change: &Change) -> bool {
        self.table.map(|t| t == change.table).unwrap_or(true) && self.event.accepts(change.event)
    }
}

/// A write against the remote data service.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Insert a new row; the service may rewrite the id.
    Insert(Row),
    /// Merge `patch` into the row's contents.
    Update {
        /// Target row.
        id: EntityId,
        /// JSON object merged into the row.
        patch: serde_json::Value,
    },
    /// Delete the row.
    Delete {
        /// Target row.
        id: EntityId,
    },
}
