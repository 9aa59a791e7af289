//! The envelope carried through outbound queues and over the wire, and the
//! traits a payload type implements to travel through the hub.

use std::fmt::{self, Debug, Display};
use std::hash::Hash;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Users are identified by the numeric id issued by the auth layer.
pub type UserId = u64;

/// Anything usable as a room partition key.
pub trait RoomKey: Clone + Eq + Hash + Debug + Display + Send + Sync + 'static {}

impl<T> RoomKey for T where T: Clone + Eq + Hash + Debug + Display + Send + Sync + 'static {}

/// A payload type the hub can route.
pub trait HubEvent: Clone + Send + Sync + 'static {
    /// Wire tag of this event (e.g. `TASK_CREATED`).
    fn event_type(&self) -> &str;

    /// Synthetic event announced to a room when a connection joins it.
    fn user_joined(_user_id: UserId) -> Option<Self> {
        None
    }

    /// Synthetic event announced to a room when a connection leaves it.
    fn user_left(_user_id: UserId) -> Option<Self> {
        None
    }
}

/// What the read pump should do with a decoded client frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientAction<P> {
    /// Fan the event out to the sender's room.
    Broadcast(P),
    /// Answer the sender only.
    Reply(P),
}

/// A payload type that can cross the WebSocket edge in both directions.
///
/// Outbound, the payload serializes to the `type` and `data` members of the
/// envelope. Inbound, clients send `{"type": ..., "data": ...}` and the read
/// pump hands both halves to [`WireEvent::decode_client`].
pub trait WireEvent: HubEvent + Serialize {
    fn decode_client(event_type: &str, data: Value) -> Result<ClientAction<Self>, ProtocolError>;

    /// Best-effort rejection notice sent back to a misbehaving client.
    fn error(message: String) -> Self;
}

/// Why a client frame was discarded or rejected.
#[derive(Debug)]
pub enum ProtocolError {
    /// Not a JSON object with a string `type`.
    Malformed(serde_json::Error),
    /// `type` is not a known event type.
    UnknownType(String),
    /// Known type, but clients may not originate it.
    NotPermitted(String),
    /// Known type with a `data` member of the wrong shape.
    InvalidPayload {
        event_type: String,
        source: serde_json::Error,
    },
}

impl Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(err) => write!(f, "malformed frame: {err}"),
            Self::UnknownType(t) => write!(f, "unknown event type `{t}`"),
            Self::NotPermitted(t) => write!(f, "event type `{t}` cannot be sent by clients"),
            Self::InvalidPayload { event_type, source } => {
                write!(f, "invalid `{event_type}` payload: {source}")
            }
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Client-to-server frame. Any `room_id`/`user_id` a client sends is ignored;
/// identity always comes from the connection.
#[derive(Debug, serde::Deserialize)]
struct ClientFrame {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: Value,
}

/// Decode one text frame received from a client.
pub fn decode_client_frame<P: WireEvent>(text: &str) -> Result<ClientAction<P>, ProtocolError> {
    let frame: ClientFrame = serde_json::from_str(text).map_err(ProtocolError::Malformed)?;
    P::decode_client(&frame.event_type, frame.data)
}

/// An event addressed to one room. Immutable once built.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope<R, P> {
    pub room_id: R,
    pub user_id: UserId,
    #[serde(flatten)]
    pub payload: P,
    pub timestamp: DateTime<Utc>,
}

impl<R: RoomKey, P: HubEvent> Envelope<R, P> {
    pub fn new(room_id: R, user_id: UserId, payload: P) -> Self {
        Self {
            room_id,
            user_id,
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn event_type(&self) -> &str {
        self.payload.event_type()
    }
}
