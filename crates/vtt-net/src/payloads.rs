//! Payload structs carried by [`ClientMessage`](crate::ClientMessage) and
//! [`ServerMessage`](crate::ServerMessage), plus the shared game-state shape.
//!
//! Field names follow the JSON protocol (`camelCase`). Entity records are
//! opaque JSON objects; this crate never interprets their contents.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

/// Per-client monotonically increasing input sequence number.
pub type Sequence = u64;

/// Entity identifier, unique within a [`Category`].
pub type EntityId = String;

/// Opaque entity record.
pub type Record = serde_json::Map<String, Value>;

/// Category → entity id → record.
pub type GameState = BTreeMap<Category, BTreeMap<EntityId, Record>>;

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

/// Top-level partition of synchronized state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Category {
    /// Map tokens (position, ownership).
    Tokens,
    /// Character sheets.
    Characters,
    /// Per-player inventories.
    Inventories,
    /// Encounter / initiative state.
    Combat,
    /// Chat log entries.
    Chat,
    /// Loot dropped on the grid.
    GridItems,
}

impl Category {
    /// Every category, in wire order.
    pub const ALL: [Category; 6] = [
        Category::Tokens,
        Category::Characters,
        Category::Inventories,
        Category::Combat,
        Category::Chat,
        Category::GridItems,
    ];

    /// Wire name of the category.
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Tokens => "tokens",
            Category::Characters => "characters",
            Category::Inventories => "inventories",
            Category::Combat => "combat",
            Category::Chat => "chat",
            Category::GridItems => "gridItems",
        }
    }

    /// Parses a wire name.
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// Grid position of a token or item.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Horizontal coordinate.
    pub x: f64,
    /// Vertical coordinate.
    pub y: f64,
}

impl Position {
    /// Creates a position.
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Drag velocity reported alongside token moves.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Velocity {
    /// Horizontal component.
    pub x: f64,
    /// Vertical component.
    pub y: f64,
}

// ---------------------------------------------------------------------------
// Rooms & players
// ---------------------------------------------------------------------------

/// A participant in a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    /// Server-assigned player id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Whether this player holds the game master role.
    #[serde(default)]
    pub is_gm: bool,
    /// Display colour.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// Room descriptor returned by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    /// Room id.
    pub id: String,
    /// Room name.
    pub name: String,
    /// The room's game master.
    pub gm: PlayerInfo,
    /// Players currently in the room.
    #[serde(default)]
    pub players: Vec<PlayerInfo>,
    /// Opaque room settings.
    #[serde(default)]
    pub settings: Value,
}

/// `create_room` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoom {
    /// Name of the new room.
    pub room_name: String,
    /// Name the creator (game master) plays under.
    pub gm_name: String,
    /// Room password.
    pub password: String,
    /// Display colour for the game master.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_color: Option<String>,
}

/// `join_room` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoom {
    /// Room to join.
    pub room_id: String,
    /// Name to play under.
    pub player_name: String,
    /// Room password.
    pub password: String,
    /// Display colour.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_color: Option<String>,
}

/// `room_created` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomCreated {
    /// The new room; its `gm` is the local player.
    pub room: RoomInfo,
}

/// `room_joined` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomJoined {
    /// The joined room.
    pub room: RoomInfo,
    /// The local player as registered by the server.
    pub player: PlayerInfo,
    /// Recent chat history.
    #[serde(default)]
    pub chat_history: Vec<ChatEntry>,
}

/// `player_joined` / `player_left` notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerPresence {
    /// The player that joined or left.
    pub player: PlayerInfo,
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

/// Client → server token move.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenMove {
    /// Token being moved.
    pub token_id: EntityId,
    /// Target position.
    pub position: Position,
    /// Whether the move is an intermediate drag update.
    #[serde(default)]
    pub is_dragging: bool,
    /// Drag velocity, if known.
    #[serde(default)]
    pub velocity: Option<Velocity>,
    /// Input sequence for confirmation.
    pub sequence: Sequence,
    /// Client timestamp.
    pub timestamp: Timestamp,
}

/// Server → client token move.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenMoved {
    /// Token that moved.
    pub token_id: EntityId,
    /// New position.
    pub position: Position,
    /// Player that moved it.
    #[serde(default)]
    pub player_id: Option<String>,
    /// Whether the move is an intermediate drag update.
    #[serde(default)]
    pub is_dragging: bool,
    /// Drag velocity, if forwarded.
    #[serde(default)]
    pub velocity: Option<Velocity>,
    /// Echoed input sequence.
    #[serde(default)]
    pub sequence: Option<Sequence>,
    /// Server acceptance time.
    pub server_timestamp: Timestamp,
}

/// A token placed on the grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenCreated {
    /// Token record; must carry a string `id`.
    pub token: Record,
    /// Placement position.
    pub position: Position,
    /// Creator.
    #[serde(default)]
    pub player_id: Option<String>,
    /// Creator display name.
    #[serde(default)]
    pub player_name: Option<String>,
    /// Creation time.
    pub timestamp: Timestamp,
}

// ---------------------------------------------------------------------------
// Characters
// ---------------------------------------------------------------------------

/// Client → server character sheet update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterUpdate {
    /// Character being edited.
    pub character_id: EntityId,
    /// Changed fields.
    pub updates: Record,
    /// Input sequence for confirmation.
    pub sequence: Sequence,
}

/// Server → client character sheet update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterUpdated {
    /// Character that changed.
    pub character_id: EntityId,
    /// Changed fields.
    pub updates: Record,
    /// Player that made the change.
    #[serde(default)]
    pub player_id: Option<String>,
    /// Echoed input sequence.
    #[serde(default)]
    pub sequence: Option<Sequence>,
    /// Server acceptance time.
    #[serde(default)]
    pub server_timestamp: Option<Timestamp>,
}

/// A player's character moved on the grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterMoved {
    /// Owning player.
    pub player_id: String,
    /// New position.
    pub position: Position,
    /// Server time of the move.
    pub timestamp: Timestamp,
}

// ---------------------------------------------------------------------------
// Inventories
// ---------------------------------------------------------------------------

/// How an inventory update should be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InventoryChangeType {
    /// Replace the whole inventory.
    #[default]
    Full,
    /// Append `inventoryData.item` to `items`.
    AddItem,
    /// Remove the item whose id is `inventoryData.itemId`.
    RemoveItem,
    /// Set `position` of item `inventoryData.itemId` to `inventoryData.newPosition`.
    MoveItem,
    /// Put `inventoryData.item` into equipment slot `inventoryData.slot`.
    EquipItem,
}

/// Client → server inventory update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryUpdate {
    /// Inventory owner.
    pub player_id: String,
    /// Change-type specific payload.
    pub inventory_data: Value,
    /// How to interpret `inventory_data`.
    #[serde(default)]
    pub change_type: InventoryChangeType,
    /// Input sequence for confirmation.
    pub sequence: Sequence,
}

/// Server → client inventory state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryChanged {
    /// Inventory owner.
    pub player_id: String,
    /// Resulting inventory fields.
    pub inventory: Record,
    /// Player that made the change.
    #[serde(default)]
    pub updated_by: Option<String>,
    /// Echoed input sequence.
    #[serde(default)]
    pub sequence: Option<Sequence>,
    /// Server acceptance time.
    #[serde(default)]
    pub server_timestamp: Option<Timestamp>,
}

// ---------------------------------------------------------------------------
// Combat
// ---------------------------------------------------------------------------

/// Client → server combat update (game master only).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombatUpdate {
    /// Changed encounter fields.
    pub combat_updates: Record,
    /// Input sequence for confirmation.
    pub sequence: Sequence,
}

/// Server → client combat update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombatUpdated {
    /// Changed encounter fields.
    pub updates: Record,
    /// Game master that made the change.
    #[serde(default)]
    pub updated_by: Option<String>,
    /// Echoed input sequence.
    #[serde(default)]
    pub sequence: Option<Sequence>,
    /// Server acceptance time.
    #[serde(default)]
    pub server_timestamp: Option<Timestamp>,
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// Client → server chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSend {
    /// Message text.
    pub message: String,
    /// Input sequence for confirmation.
    pub sequence: Sequence,
}

/// A chat log entry as stamped by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEntry {
    /// Server-assigned message id.
    pub id: String,
    /// Sender.
    pub player_id: String,
    /// Sender display name.
    #[serde(default)]
    pub player_name: String,
    /// Message text.
    pub content: String,
    /// Server time of acceptance.
    pub timestamp: Timestamp,
    /// `chat`, `system`, `roll`, ...
    #[serde(rename = "type", default = "default_chat_kind")]
    pub kind: String,
    /// Echoed input sequence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<Sequence>,
}

fn default_chat_kind() -> String {
    "chat".to_string()
}

/// Server → client chat broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatBroadcast {
    /// The stamped message.
    pub message: ChatEntry,
}

// ---------------------------------------------------------------------------
// Grid items
// ---------------------------------------------------------------------------

/// An item dropped onto the grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDropped {
    /// Item record; must carry a string `id`.
    pub item: Record,
    /// Pixel position.
    pub position: Position,
    /// Grid cell, opaque.
    #[serde(default)]
    pub grid_position: Value,
    /// Player that dropped the item.
    #[serde(default)]
    pub player_id: Option<String>,
    /// Display name of that player.
    #[serde(default)]
    pub player_name: Option<String>,
    /// Drop time.
    pub timestamp: Timestamp,
}

/// An item looted from the grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemLooted {
    /// Grid entry that was looted.
    #[serde(default)]
    pub grid_item_id: Option<EntityId>,
    /// Whether the grid entry was removed (the last of a stack).
    #[serde(default)]
    pub item_removed: bool,
    /// Looting player.
    #[serde(default)]
    pub player_id: Option<String>,
    /// Loot time.
    pub timestamp: Timestamp,
}

// ---------------------------------------------------------------------------
// State sync
// ---------------------------------------------------------------------------

/// `full_state_sync`: a complete authoritative snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullStateSync {
    /// The snapshot.
    pub state: GameState,
}

/// An input the server still holds as pending when it issues a correction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingInputEcho {
    /// Client sequence of the input.
    pub sequence: Sequence,
    /// The input as originally sent, when the server echoes it.
    #[serde(default)]
    pub input: Option<crate::ClientMessage>,
}

/// `state_correction`: authoritative state plus the inputs still pending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateCorrection {
    /// Replacement for the client's confirmed state.
    pub corrected_state: GameState,
    /// Inputs received but not yet applied by the server.
    #[serde(default)]
    pub pending_inputs: Vec<PendingInputEcho>,
    /// Highest client sequence the server has processed.
    #[serde(default)]
    pub last_processed_sequence: Option<Sequence>,
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// Network metrics exchanged in either direction. Absent fields are left
/// unchanged by the receiver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkMetricsReport {
    /// Smoothed round-trip latency (ms).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency: Option<f64>,
    /// Smoothed jitter (ms).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter: Option<f64>,
    /// Packet loss fraction (0.0 to 1.0).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packet_loss: Option<f64>,
    /// Bandwidth estimate (bits/s).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bandwidth: Option<f64>,
}

/// Latency probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    /// Client send time, echoed by the server.
    pub timestamp: Timestamp,
}

/// Latency probe reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    /// Echoed client send time.
    pub timestamp: Timestamp,
}

/// Protocol-level rejection from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    /// Human-readable reason.
    pub message: String,
}
