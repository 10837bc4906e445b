//! Typed domain records.
//!
//! Each record knows its table, id and owner so the engine can cache, route
//! and reconcile it without knowing anything else about its shape.

use crate::change::Table;
use crate::ids::{CorrelationId, EntityId, UserId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// A record stored in one remote table.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Table the record lives in.
    const TABLE: Table;

    /// Server-assigned id.
    fn id(&self) -> &EntityId;

    /// Owning user, if any.
    fn owner(&self) -> Option<&UserId>;

    /// Correlation token attached by the client that created the record.
    fn correlation(&self) -> Option<CorrelationId> {
        None
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Friendship lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FriendshipStatus {
    /// Request sent, not yet answered.
    Pending,
    /// Both users are friends.
    Accepted,
    /// Request declined.
    Declined,
}

/// A friend request or an accepted friendship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Friendship {
    /// Row id.
    pub id: EntityId,
    /// User who sent the request (row owner).
    pub requester: UserId,
    /// User who received the request.
    pub addressee: UserId,
    /// Current status.
    pub status: FriendshipStatus,
    /// Creation time, unix millis.
    pub created_at: i64,
    /// Correlation token of the creating client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<CorrelationId>,
}

impl Friendship {
    /// The other side of the friendship as seen by `me`.
    pub fn other_party(&self, me: &UserId) -> &UserId {
        if &self.requester == me {
            &self.addressee
        } else {
            &self.requester
        }
    }
}

impl Record for Friendship {
    const TABLE: Table = Table::Friendships;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn owner(&self) -> Option<&UserId> {
        Some(&self.requester)
    }

    fn correlation(&self) -> Option<CorrelationId> {
        self.client_ref
    }
}

/// An ephemeral story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    /// Row id.
    pub id: EntityId,
    /// Author (row owner).
    pub author: UserId,
    /// Storage path of the media, resolved through the remote service.
    pub media_path: String,
    /// Optional caption.
    #[serde(default)]
    pub caption: Option<String>,
    /// Creation time, unix millis.
    pub created_at: i64,
    /// Expiry time, unix millis.
    pub expires_at: i64,
    /// Users who have viewed the story.
    #[serde(default)]
    pub viewers: Vec<UserId>,
}

impl Story {
    /// Whether the story is still visible at `now` (unix millis).
    pub fn is_active(&self, now: i64) -> bool {
        self.expires_at > now
    }
}

impl Record for Story {
    const TABLE: Table = Table::Stories;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn owner(&self) -> Option<&UserId> {
        Some(&self.author)
    }
}

/// A short looping video post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VibeReel {
    /// Row id.
    pub id: EntityId,
    /// Author (row owner).
    pub author: UserId,
    /// Storage path of the video.
    pub media_path: String,
    /// Optional caption.
    #[serde(default)]
    pub caption: Option<String>,
    /// Number of likes.
    #[serde(default)]
    pub like_count: u32,
    /// Users who liked the reel.
    #[serde(default)]
    pub liked_by: Vec<UserId>,
    /// Creation time, unix millis.
    pub created_at: i64,
}

impl VibeReel {
    /// Whether `user` has liked the reel.
    pub fn is_liked_by(&self, user: &UserId) -> bool {
        self.liked_by.contains(user)
    }
}

impl Record for VibeReel {
    const TABLE: Table = Table::VibeReels;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn owner(&self) -> Option<&UserId> {
        Some(&self.author)
    }
}

/// A conversation header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Row id.
    pub id: EntityId,
    /// User who opened the conversation (row owner).
    pub created_by: UserId,
    /// Everyone in the conversation, including the creator.
    pub participants: Vec<UserId>,
    /// Time of the latest message, unix millis.
    pub last_message_at: i64,
    /// Preview of the latest message.
    #[serde(default)]
    pub last_message_preview: Option<String>,
}

impl Record for Conversation {
    const TABLE: Table = Table::Conversations;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn owner(&self) -> Option<&UserId> {
        Some(&self.created_by)
    }
}

/// A message inside a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Row id.
    pub id: EntityId,
    /// Conversation the message belongs to.
    pub conversation_id: EntityId,
    /// Sender (row owner).
    pub sender: UserId,
    /// Message text.
    pub body: String,
    /// Send time, unix millis.
    pub sent_at: i64,
    /// Correlation token of the sending client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<CorrelationId>,
}

impl Record for ChatMessage {
    const TABLE: Table = Table::Messages;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn owner(&self) -> Option<&UserId> {
        Some(&self.sender)
    }

    fn correlation(&self) -> Option<CorrelationId> {
        self.client_ref
    }
}

/// A public user profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Row id (same value as the user id).
    pub id: EntityId,
    /// The user this profile describes (row owner).
    pub user_id: UserId,
    /// Display name.
    pub display_name: String,
    /// Storage path of the avatar image.
    #[serde(default)]
    pub avatar_path: Option<String>,
    /// Free-form bio.
    #[serde(default)]
    pub bio: Option<String>,
}

impl Record for Profile {
    const TABLE: Table = Table::Profiles;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn owner(&self) -> Option<&UserId> {
        Some(&self.user_id)
    }
}
