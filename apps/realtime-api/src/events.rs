//! Room event types and their wire payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::hub::{ClientAction, HubEvent, ProtocolError, UserId, WireEvent};

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// Wire tags for every event a room can carry.
pub struct EventName;

impl EventName {
    pub const TASK_CREATED: &'static str = "TASK_CREATED";
    pub const TASK_UPDATED: &'static str = "TASK_UPDATED";
    pub const TASK_DELETED: &'static str = "TASK_DELETED";
    pub const TASK_MOVED: &'static str = "TASK_MOVED";
    pub const BOARD_CREATED: &'static str = "BOARD_CREATED";
    pub const BOARD_UPDATED: &'static str = "BOARD_UPDATED";
    pub const BOARD_DELETED: &'static str = "BOARD_DELETED";
    pub const COMMENT_ADDED: &'static str = "COMMENT_ADDED";
    pub const COMMENT_DELETED: &'static str = "COMMENT_DELETED";
    pub const CHECKLIST_ITEM_ADDED: &'static str = "CHECKLIST_ITEM_ADDED";
    pub const CHECKLIST_ITEM_UPDATED: &'static str = "CHECKLIST_ITEM_UPDATED";
    pub const CHECKLIST_ITEM_DELETED: &'static str = "CHECKLIST_ITEM_DELETED";
    pub const TASK_LABELS_UPDATED: &'static str = "TASK_LABELS_UPDATED";
    pub const USER_JOINED: &'static str = "USER_JOINED";
    pub const USER_LEFT: &'static str = "USER_LEFT";
    pub const NEW_MESSAGE: &'static str = "NEW_MESSAGE";
    pub const MESSAGE_EDITED: &'static str = "MESSAGE_EDITED";
    pub const MESSAGE_DELETED: &'static str = "MESSAGE_DELETED";
    pub const REACTION_ADDED: &'static str = "REACTION_ADDED";
    pub const REACTION_REMOVED: &'static str = "REACTION_REMOVED";
    pub const TYPING: &'static str = "TYPING";
    pub const MESSAGE_READ: &'static str = "MESSAGE_READ";
    pub const ROOM_UPDATED: &'static str = "ROOM_UPDATED";
    pub const USER_STATUS_CHANGED: &'static str = "USER_STATUS_CHANGED";
    pub const PING: &'static str = "PING";
    pub const PONG: &'static str = "PONG";
    pub const ERROR: &'static str = "ERROR";

    pub const ALL: [&'static str; 27] = [
        Self::TASK_CREATED,
        Self::TASK_UPDATED,
        Self::TASK_DELETED,
        Self::TASK_MOVED,
        Self::BOARD_CREATED,
        Self::BOARD_UPDATED,
        Self::BOARD_DELETED,
        Self::COMMENT_ADDED,
        Self::COMMENT_DELETED,
        Self::CHECKLIST_ITEM_ADDED,
        Self::CHECKLIST_ITEM_UPDATED,
        Self::CHECKLIST_ITEM_DELETED,
        Self::TASK_LABELS_UPDATED,
        Self::USER_JOINED,
        Self::USER_LEFT,
        Self::NEW_MESSAGE,
        Self::MESSAGE_EDITED,
        Self::MESSAGE_DELETED,
        Self::REACTION_ADDED,
        Self::REACTION_REMOVED,
        Self::TYPING,
        Self::MESSAGE_READ,
        Self::ROOM_UPDATED,
        Self::USER_STATUS_CHANGED,
        Self::PING,
        Self::PONG,
        Self::ERROR,
    ];

    pub fn is_known(event_type: &str) -> bool {
        Self::ALL.contains(&event_type)
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// `USER_JOINED` / `USER_LEFT`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PresencePayload {
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TypingPayload {
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct MessageReadPayload {
    pub message_id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ErrorPayload {
    pub error: String,
}

// ---------------------------------------------------------------------------
// Room event
// ---------------------------------------------------------------------------

/// Everything that can be delivered to a room.
///
/// Domain events carry the affected record as opaque JSON; the hub never
/// looks inside them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomEvent {
    TaskCreated(Value),
    TaskUpdated(Value),
    TaskDeleted(Value),
    TaskMoved(Value),
    BoardCreated(Value),
    BoardUpdated(Value),
    BoardDeleted(Value),
    CommentAdded(Value),
    CommentDeleted(Value),
    ChecklistItemAdded(Value),
    ChecklistItemUpdated(Value),
    ChecklistItemDeleted(Value),
    TaskLabelsUpdated(Value),
    UserJoined(PresencePayload),
    UserLeft(PresencePayload),
    NewMessage(Value),
    MessageEdited(Value),
    MessageDeleted(Value),
    ReactionAdded(Value),
    ReactionRemoved(Value),
    Typing(TypingPayload),
    MessageRead(MessageReadPayload),
    RoomUpdated(Value),
    UserStatusChanged(Value),
    Ping,
    Pong,
    Error(ErrorPayload),
}

impl HubEvent for RoomEvent {
    fn event_type(&self) -> &str {
        match self {
            Self::TaskCreated(_) => EventName::TASK_CREATED,
            Self::TaskUpdated(_) => EventName::TASK_UPDATED,
            Self::TaskDeleted(_) => EventName::TASK_DELETED,
            Self::TaskMoved(_) => EventName::TASK_MOVED,
            Self::BoardCreated(_) => EventName::BOARD_CREATED,
            Self::BoardUpdated(_) => EventName::BOARD_UPDATED,
            Self::BoardDeleted(_) => EventName::BOARD_DELETED,
            Self::CommentAdded(_) => EventName::COMMENT_ADDED,
            Self::CommentDeleted(_) => EventName::COMMENT_DELETED,
            Self::ChecklistItemAdded(_) => EventName::CHECKLIST_ITEM_ADDED,
            Self::ChecklistItemUpdated(_) => EventName::CHECKLIST_ITEM_UPDATED,
            Self::ChecklistItemDeleted(_) => EventName::CHECKLIST_ITEM_DELETED,
            Self::TaskLabelsUpdated(_) => EventName::TASK_LABELS_UPDATED,
            Self::UserJoined(_) => EventName::USER_JOINED,
            Self::UserLeft(_) => EventName::USER_LEFT,
            Self::NewMessage(_) => EventName::NEW_MESSAGE,
            Self::MessageEdited(_) => EventName::MESSAGE_EDITED,
            Self::MessageDeleted(_) => EventName::MESSAGE_DELETED,
            Self::ReactionAdded(_) => EventName::REACTION_ADDED,
            Self::ReactionRemoved(_) => EventName::REACTION_REMOVED,
            Self::Typing(_) => EventName::TYPING,
            Self::MessageRead(_) => EventName::MESSAGE_READ,
            Self::RoomUpdated(_) => EventName::ROOM_UPDATED,
            Self::UserStatusChanged(_) => EventName::USER_STATUS_CHANGED,
            Self::Ping => EventName::PING,
            Self::Pong => EventName::PONG,
            Self::Error(_) => EventName::ERROR,
        }
    }

    fn user_joined(user_id: UserId) -> Option<Self> {
        Some(Self::UserJoined(PresencePayload { user_id }))
    }

    fn user_left(user_id: UserId) -> Option<Self> {
        Some(Self::UserLeft(PresencePayload { user_id }))
    }
}

impl WireEvent for RoomEvent {
    /// Clients may send `TYPING`, `MESSAGE_READ` and `PING`. Everything else
    /// originates on the server.
    fn decode_client(event_type: &str, data: Value) -> Result<ClientAction<Self>, ProtocolError> {
        let invalid = |source: serde_json::Error| ProtocolError::InvalidPayload {
            event_type: event_type.to_string(),
            source,
        };

        match event_type {
            EventName::TYPING => serde_json::from_value(data)
                .map(|p| ClientAction::Broadcast(Self::Typing(p)))
                .map_err(invalid),
            EventName::MESSAGE_READ => serde_json::from_value(data)
                .map(|p| ClientAction::Broadcast(Self::MessageRead(p)))
                .map_err(invalid),
            EventName::PING => Ok(ClientAction::Reply(Self::Pong)),
            known if EventName::is_known(known) => {
                Err(ProtocolError::NotPermitted(known.to_string()))
            }
            unknown => Err(ProtocolError::UnknownType(unknown.to_string())),
        }
    }

    fn error(message: String) -> Self {
        Self::Error(ErrorPayload { error: message })
    }
}
