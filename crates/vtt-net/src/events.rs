//! Game events as carried inside `batch_update` and `delta_update`.
//!
//! A batch is a list of loosely typed [`WireEvent`]s; each is decoded into a
//! typed [`GameEvent`] only when it is applied, so one malformed entry never
//! poisons the rest of the batch.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::compression::{CompressionError, pack_json, unpack_json};
use crate::payloads::*;

/// Event types the client knows how to apply.
pub const KNOWN_EVENT_TYPES: &[&str] = &[
    "token_moved",
    "token_created",
    "character_updated",
    "character_moved",
    "inventory_changed",
    "combat_updated",
    "chat_message",
    "item_dropped",
    "item_looted",
];

/// Application priority of a batched event. Orders `Critical` first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Combat and other state that must never lag.
    Critical,
    /// Token movement, character sheets, inventories.
    High,
    /// Everything without an explicit priority.
    #[default]
    Normal,
    /// Chat and cosmetic updates.
    Low,
}

/// One entry of a batch, before type-checking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEvent {
    /// Event type, one of [`KNOWN_EVENT_TYPES`] if the client can apply it.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Type-specific payload.
    #[serde(default)]
    pub data: Value,
    /// Server enqueue time.
    #[serde(default)]
    pub timestamp: Timestamp,
    /// Application priority.
    #[serde(default)]
    pub priority: Priority,
    /// Echoed client sequence, when the event answers a local input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<Sequence>,
}

/// Why a [`WireEvent`] could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum WireEventError {
    /// The client has no handler for this type.
    #[error("unknown event type: {0}")]
    UnknownType(String),
    /// The payload does not match the event type.
    #[error("malformed {event_type} event: {source}")]
    Malformed {
        /// The event type.
        event_type: String,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },
}

impl WireEvent {
    /// Creates an event from a typed payload.
    pub fn new(event: &GameEvent, timestamp: Timestamp, priority: Priority) -> Self {
        let value = serde_json::to_value(event).unwrap_or(Value::Null);
        Self {
            event_type: event.kind().to_string(),
            data: value.get("data").cloned().unwrap_or(Value::Null),
            timestamp,
            priority,
            sequence: None,
        }
    }

    /// Decode into a typed event.
    pub fn decode(&self) -> Result<GameEvent, WireEventError> {
        if !KNOWN_EVENT_TYPES.contains(&self.event_type.as_str()) {
            return Err(WireEventError::UnknownType(self.event_type.clone()));
        }
        let tagged = serde_json::json!({ "type": self.event_type, "data": self.data });
        serde_json::from_value(tagged).map_err(|source| WireEventError::Malformed {
            event_type: self.event_type.clone(),
            source,
        })
    }
}

/// A typed game event that mutates confirmed state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GameEvent {
    /// See [`TokenMoved`].
    TokenMoved(TokenMoved),
    /// See [`TokenCreated`].
    TokenCreated(TokenCreated),
    /// See [`CharacterUpdated`].
    CharacterUpdated(CharacterUpdated),
    /// See [`CharacterMoved`].
    CharacterMoved(CharacterMoved),
    /// See [`InventoryChanged`].
    InventoryChanged(InventoryChanged),
    /// See [`CombatUpdated`].
    CombatUpdated(CombatUpdated),
    /// See [`ChatBroadcast`].
    ChatMessage(ChatBroadcast),
    /// See [`ItemDropped`].
    ItemDropped(ItemDropped),
    /// See [`ItemLooted`].
    ItemLooted(ItemLooted),
}

impl GameEvent {
    /// Wire name of the event.
    pub fn kind(&self) -> &'static str {
        match self {
            GameEvent::TokenMoved(_) => "token_moved",
            GameEvent::TokenCreated(_) => "token_created",
            GameEvent::CharacterUpdated(_) => "character_updated",
            GameEvent::CharacterMoved(_) => "character_moved",
            GameEvent::InventoryChanged(_) => "inventory_changed",
            GameEvent::CombatUpdated(_) => "combat_updated",
            GameEvent::ChatMessage(_) => "chat_message",
            GameEvent::ItemDropped(_) => "item_dropped",
            GameEvent::ItemLooted(_) => "item_looted",
        }
    }

    /// Sequence echoed in the payload, if any.
    pub fn sequence(&self) -> Option<Sequence> {
        match self {
            GameEvent::TokenMoved(e) => e.sequence,
            GameEvent::CharacterUpdated(e) => e.sequence,
            GameEvent::InventoryChanged(e) => e.sequence,
            GameEvent::CombatUpdated(e) => e.sequence,
            GameEvent::ChatMessage(e) => e.message.sequence,
            _ => None,
        }
    }

    /// Player the event originated from, if known.
    pub fn origin(&self) -> Option<&str> {
        match self {
            GameEvent::TokenMoved(e) => e.player_id.as_deref(),
            GameEvent::TokenCreated(e) => e.player_id.as_deref(),
            GameEvent::CharacterUpdated(e) => e.player_id.as_deref(),
            GameEvent::CharacterMoved(e) => Some(e.player_id.as_str()),
            GameEvent::InventoryChanged(e) => e.updated_by.as_deref(),
            GameEvent::CombatUpdated(e) => e.updated_by.as_deref(),
            GameEvent::ChatMessage(e) => Some(e.message.player_id.as_str()),
            GameEvent::ItemDropped(e) => e.player_id.as_deref(),
            GameEvent::ItemLooted(e) => e.player_id.as_deref(),
        }
    }

    /// Server timestamp carried in the payload, if any.
    pub fn timestamp(&self) -> Option<Timestamp> {
        match self {
            GameEvent::TokenMoved(e) => Some(e.server_timestamp),
            GameEvent::TokenCreated(e) => Some(e.timestamp),
            GameEvent::CharacterUpdated(e) => e.server_timestamp,
            GameEvent::CharacterMoved(e) => Some(e.timestamp),
            GameEvent::InventoryChanged(e) => e.server_timestamp,
            GameEvent::CombatUpdated(e) => e.server_timestamp,
            GameEvent::ChatMessage(e) => Some(e.message.timestamp),
            GameEvent::ItemDropped(e) => Some(e.timestamp),
            GameEvent::ItemLooted(e) => Some(e.timestamp),
        }
    }
}

/// `batch_update`: events to apply in priority order, optionally compressed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchUpdate {
    /// Plain event list. Empty when `compressed` is set.
    #[serde(default)]
    pub events: Vec<WireEvent>,
    /// Whether the events travel in `payload` instead.
    #[serde(default)]
    pub compressed: bool,
    /// LZ4-packed JSON array of events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Vec<u8>>,
}

impl BatchUpdate {
    /// An uncompressed batch.
    pub fn plain(events: Vec<WireEvent>) -> Self {
        Self {
            events,
            compressed: false,
            payload: None,
        }
    }

    /// A batch whose events travel LZ4-packed.
    pub fn packed(events: &[WireEvent]) -> Result<Self, CompressionError> {
        Ok(Self {
            events: Vec::new(),
            compressed: true,
            payload: Some(pack_json(events)?),
        })
    }

    /// The batch's events, inflating them if compressed.
    pub fn into_events(self) -> Result<Vec<WireEvent>, CompressionError> {
        match (self.compressed, self.payload) {
            (true, Some(payload)) => unpack_json(&payload),
            (true, None) => Err(CompressionError::EmptyPayload),
            (false, _) => Ok(self.events),
        }
    }
}

/// `delta_update`: a partial game state, optionally compressed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeltaUpdate {
    /// Delta document (see `vtt_sync::delta`). Null when `compressed` is set.
    #[serde(default)]
    pub delta: Value,
    /// Whether the delta travels in `payload` instead.
    #[serde(default)]
    pub compressed: bool,
    /// LZ4-packed JSON delta.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Vec<u8>>,
}

impl DeltaUpdate {
    /// An uncompressed delta.
    pub fn plain(delta: Value) -> Self {
        Self {
            delta,
            compressed: false,
            payload: None,
        }
    }

    /// A delta that travels LZ4-packed.
    pub fn packed(delta: &Value) -> Result<Self, CompressionError> {
        Ok(Self {
            delta: Value::Null,
            compressed: true,
            payload: Some(pack_json(delta)?),
        })
    }

    /// The delta document, inflating it if compressed.
    pub fn into_delta(self) -> Result<Value, CompressionError> {
        match (self.compressed, self.payload) {
            (true, Some(payload)) => unpack_json(&payload),
            (true, None) => Err(CompressionError::EmptyPayload),
            (false, _) => Ok(self.delta),
        }
    }
}
