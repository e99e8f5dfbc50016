//! Wire messages and their encoding.
//!
//! Every message is a JSON object `{"type": ..., "data": ...}` prefixed with a
//! protocol version byte. Use [`encode_message`] and [`decode_message`] for
//! both directions.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::events::{BatchUpdate, DeltaUpdate};
use crate::payloads::*;

/// Current wire-protocol version. Prepended to every encoded message.
pub const PROTOCOL_VERSION: u8 = 1;

// ---------------------------------------------------------------------------
// Client → server
// ---------------------------------------------------------------------------

/// Messages sent by the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    // --- Rooms ---
    /// Create a room; the sender becomes its game master.
    CreateRoom(CreateRoom),
    /// Join an existing room.
    JoinRoom(JoinRoom),

    // --- Game state ---
    /// Move a token.
    TokenMoved(TokenMove),
    /// Edit a character sheet.
    CharacterUpdate(CharacterUpdate),
    /// Change an inventory.
    InventoryUpdate(InventoryUpdate),
    /// Change the encounter (game master only).
    CombatUpdate(CombatUpdate),
    /// Post a chat message.
    ChatMessage(ChatSend),

    // --- Diagnostics ---
    /// Locally measured network metrics.
    NetworkMetrics(NetworkMetricsReport),
    /// Latency probe.
    Ping(Ping),
}

impl ClientMessage {
    /// Wire name of the message.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::CreateRoom(_) => "create_room",
            ClientMessage::JoinRoom(_) => "join_room",
            ClientMessage::TokenMoved(_) => "token_moved",
            ClientMessage::CharacterUpdate(_) => "character_update",
            ClientMessage::InventoryUpdate(_) => "inventory_update",
            ClientMessage::CombatUpdate(_) => "combat_update",
            ClientMessage::ChatMessage(_) => "chat_message",
            ClientMessage::NetworkMetrics(_) => "network_metrics",
            ClientMessage::Ping(_) => "ping",
        }
    }

    /// Input sequence carried by game-state messages.
    pub fn sequence(&self) -> Option<Sequence> {
        match self {
            ClientMessage::TokenMoved(m) => Some(m.sequence),
            ClientMessage::CharacterUpdate(m) => Some(m.sequence),
            ClientMessage::InventoryUpdate(m) => Some(m.sequence),
            ClientMessage::CombatUpdate(m) => Some(m.sequence),
            ClientMessage::ChatMessage(m) => Some(m.sequence),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Server → client
// ---------------------------------------------------------------------------

/// Messages sent by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    // --- Rooms ---
    /// A `create_room` request succeeded.
    RoomCreated(RoomCreated),
    /// A `join_room` request succeeded.
    RoomJoined(RoomJoined),
    /// Another player joined.
    PlayerJoined(PlayerPresence),
    /// A player left.
    PlayerLeft(PlayerPresence),

    // --- Direct game events ---
    /// A token moved.
    TokenMoved(TokenMoved),
    /// A token was placed.
    TokenCreated(TokenCreated),
    /// A character sheet changed.
    CharacterUpdated(CharacterUpdated),
    /// A player's character moved.
    CharacterMoved(CharacterMoved),
    /// An inventory changed.
    InventoryChanged(InventoryChanged),
    /// The encounter changed.
    CombatUpdated(CombatUpdated),
    /// A chat message was posted.
    ChatMessage(ChatBroadcast),
    /// Loot was dropped on the grid.
    ItemDropped(ItemDropped),
    /// Loot was picked up from the grid.
    ItemLooted(ItemLooted),

    // --- Bulk sync ---
    /// Prioritized batch of events.
    BatchUpdate(BatchUpdate),
    /// Partial game state to merge.
    DeltaUpdate(DeltaUpdate),
    /// Complete authoritative snapshot.
    FullStateSync(FullStateSync),
    /// Authoritative correction with pending inputs.
    StateCorrection(StateCorrection),

    // --- Diagnostics ---
    /// Server-observed network metrics.
    NetworkMetrics(NetworkMetricsReport),
    /// Latency probe reply.
    Pong(Pong),
    /// Protocol-level rejection.
    Error(ServerError),
}

impl ServerMessage {
    /// Wire name of the message.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::RoomCreated(_) => "room_created",
            ServerMessage::RoomJoined(_) => "room_joined",
            ServerMessage::PlayerJoined(_) => "player_joined",
            ServerMessage::PlayerLeft(_) => "player_left",
            ServerMessage::TokenMoved(_) => "token_moved",
            ServerMessage::TokenCreated(_) => "token_created",
            ServerMessage::CharacterUpdated(_) => "character_updated",
            ServerMessage::CharacterMoved(_) => "character_moved",
            ServerMessage::InventoryChanged(_) => "inventory_changed",
            ServerMessage::CombatUpdated(_) => "combat_updated",
            ServerMessage::ChatMessage(_) => "chat_message",
            ServerMessage::ItemDropped(_) => "item_dropped",
            ServerMessage::ItemLooted(_) => "item_looted",
            ServerMessage::BatchUpdate(_) => "batch_update",
            ServerMessage::DeltaUpdate(_) => "delta_update",
            ServerMessage::FullStateSync(_) => "full_state_sync",
            ServerMessage::StateCorrection(_) => "state_correction",
            ServerMessage::NetworkMetrics(_) => "network_metrics",
            ServerMessage::Pong(_) => "pong",
            ServerMessage::Error(_) => "error",
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur while encoding or decoding a message.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// The payload was empty (no version byte).
    #[error("empty payload: no version byte")]
    EmptyPayload,

    /// The version byte does not match [`PROTOCOL_VERSION`].
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Encoding helpers
// ---------------------------------------------------------------------------

/// Encode a message into a versioned payload.
///
/// Wire format: `[version: u8] [JSON message]`
pub fn encode_message<M: Serialize>(msg: &M) -> Result<Vec<u8>, MessageError> {
    let mut out = vec![PROTOCOL_VERSION];
    serde_json::to_writer(&mut out, msg)?;
    Ok(out)
}

/// Decode a versioned payload.
pub fn decode_message<M: DeserializeOwned>(data: &[u8]) -> Result<M, MessageError> {
    let (&version, body) = data.split_first().ok_or(MessageError::EmptyPayload)?;
    if version != PROTOCOL_VERSION {
        return Err(MessageError::UnsupportedVersion(version));
    }
    Ok(serde_json::from_slice(body)?)
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn unix_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_message_wire_shape() {
        let msg = ClientMessage::TokenMoved(TokenMove {
            token_id: "t1".into(),
            position: Position::new(3.0, 4.0),
            is_dragging: false,
            velocity: None,
            sequence: 7,
            timestamp: 1000,
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "token_moved");
        assert_eq!(value["data"]["tokenId"], "t1");
        assert_eq!(value["data"]["sequence"], 7);
        assert_eq!(msg.kind(), "token_moved");
        assert_eq!(msg.sequence(), Some(7));
    }

    #[test]
    fn test_server_message_from_json() {
        let value = json!({
            "type": "combat_updated",
            "data": {
                "updates": {"round": 2},
                "updatedBy": "gm",
                "serverTimestamp": 55
            }
        });
        let msg: ServerMessage = serde_json::from_value(value).unwrap();
        match msg {
            ServerMessage::CombatUpdated(update) => {
                assert_eq!(update.updates["round"], 2);
                assert_eq!(update.updated_by.as_deref(), Some("gm"));
                assert_eq!(update.server_timestamp, Some(55));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_encoded_message_decodes() {
        let msg = ServerMessage::Pong(Pong { timestamp: 123 });
        let bytes = encode_message(&msg).unwrap();
        assert_eq!(bytes[0], PROTOCOL_VERSION);
        let decoded: ServerMessage = decode_message(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_state_correction_echoes_client_input() {
        let value = json!({
            "type": "state_correction",
            "data": {
                "correctedState": {"tokens": {}},
                "pendingInputs": [
                    {"sequence": 4, "input": {"type": "chat_message", "data": {"message": "hi", "sequence": 4}}},
                    {"sequence": 5}
                ],
                "lastProcessedSequence": 3
            }
        });
        let msg: ServerMessage = serde_json::from_value(value).unwrap();
        let ServerMessage::StateCorrection(correction) = msg else {
            panic!("expected state_correction");
        };
        assert_eq!(correction.pending_inputs.len(), 2);
        assert_eq!(correction.pending_inputs[0].input.as_ref().unwrap().kind(), "chat_message");
        assert!(correction.pending_inputs[1].input.is_none());
        assert_eq!(correction.last_processed_sequence, Some(3));
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let mut bytes = encode_message(&ClientMessage::Ping(Ping { timestamp: 0 })).unwrap();
        bytes[0] = 255;
        let result = decode_message::<ClientMessage>(&bytes);
        assert!(matches!(result, Err(MessageError::UnsupportedVersion(255))));
    }

    #[test]
    fn test_empty_payload_rejected() {
        let result = decode_message::<ServerMessage>(&[]);
        assert!(matches!(result, Err(MessageError::EmptyPayload)));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let body = br#"{"type":"teleport","data":{}}"#;
        let mut bytes = vec![PROTOCOL_VERSION];
        bytes.extend_from_slice(body);
        let result = decode_message::<ServerMessage>(&bytes);
        assert!(matches!(result, Err(MessageError::Json(_))));
    }
}
