use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An event pushed to every subscriber of a room.
///
/// The room id only routes the event; it never appears on the wire. A client
/// receives `{"kind": "...", "value": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    #[serde(skip)]
    pub room_id: Uuid,
    #[serde(flatten)]
    pub payload: EventPayload,
}

/// Kind-specific event bodies, adjacently tagged as `kind` / `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum EventPayload {
    #[serde(rename = "message_created")]
    MessageCreated { id: Uuid, message: String },

    #[serde(rename = "message_reaction_increased")]
    ReactionIncreased { id: Uuid, count: i64 },

    #[serde(rename = "message_reaction_decreased")]
    ReactionDecreased { id: Uuid, count: i64 },

    #[serde(rename = "message_answered")]
    MessageAnswered { id: Uuid },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    MessageCreated,
    ReactionIncreased,
    ReactionDecreased,
    MessageAnswered,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MessageCreated => "message_created",
            Self::ReactionIncreased => "message_reaction_increased",
            Self::ReactionDecreased => "message_reaction_decreased",
            Self::MessageAnswered => "message_answered",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Event {
    pub fn message_created(room_id: Uuid, id: Uuid, message: String) -> Self {
        Self { room_id, payload: EventPayload::MessageCreated { id, message } }
    }

    pub fn reaction_increased(room_id: Uuid, id: Uuid, count: i64) -> Self {
        Self { room_id, payload: EventPayload::ReactionIncreased { id, count } }
    }

    pub fn reaction_decreased(room_id: Uuid, id: Uuid, count: i64) -> Self {
        Self { room_id, payload: EventPayload::ReactionDecreased { id, count } }
    }

    pub fn message_answered(room_id: Uuid, id: Uuid) -> Self {
        Self { room_id, payload: EventPayload::MessageAnswered { id } }
    }

    pub fn kind(&self) -> EventKind {
        match self.payload {
            EventPayload::MessageCreated { .. } => EventKind::MessageCreated,
            EventPayload::ReactionIncreased { .. } => EventKind::ReactionIncreased,
            EventPayload::ReactionDecreased { .. } => EventKind::ReactionDecreased,
            EventPayload::MessageAnswered { .. } => EventKind::MessageAnswered,
        }
    }

    /// Encode the wire form sent to subscribers.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
