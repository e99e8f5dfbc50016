//! Local actions and the predicted fields they produce.
//!
//! An [`Intent`] is what the player asked for. Its predicted patch is derived
//! against whatever the entity currently looks like, so the same intent can
//! be re-derived on top of corrected state during reconciliation.

use serde_json::{Value, json};
use vtt_net::{
    Category, CharacterUpdate, ChatSend, ClientMessage, CombatUpdate, EntityId,
    InventoryChangeType, InventoryUpdate, Position, Record, Sequence, Timestamp, TokenMove,
    Velocity,
};

/// Entity id under which the single encounter is stored in [`Category::Combat`].
pub const COMBAT_ENTITY_ID: &str = "encounter";

/// An inventory edit, mirroring how the server applies it.
#[derive(Debug, Clone, PartialEq)]
pub enum InventoryChange {
    /// Overlay these top-level fields on the inventory. Fields it leaves out
    /// keep their current values, the same way an `inventory_changed` event
    /// lands in confirmed state.
    Full(Record),
    /// Append an item to `items`.
    AddItem(Value),
    /// Drop the item with this id from `items`.
    RemoveItem {
        /// Item id.
        item_id: String,
    },
    /// Set the `position` of one item.
    MoveItem {
        /// Item id.
        item_id: String,
        /// New slot position, opaque.
        new_position: Value,
    },
    /// Put an item into an equipment slot.
    EquipItem {
        /// Slot name.
        slot: String,
        /// The item.
        item: Value,
    },
}

impl InventoryChange {
    fn change_type(&self) -> InventoryChangeType {
        match self {
            InventoryChange::Full(_) => InventoryChangeType::Full,
            InventoryChange::AddItem(_) => InventoryChangeType::AddItem,
            InventoryChange::RemoveItem { .. } => InventoryChangeType::RemoveItem,
            InventoryChange::MoveItem { .. } => InventoryChangeType::MoveItem,
            InventoryChange::EquipItem { .. } => InventoryChangeType::EquipItem,
        }
    }

    fn wire_data(&self) -> Value {
        match self {
            InventoryChange::Full(record) => Value::Object(record.clone()),
            InventoryChange::AddItem(item) => json!({ "item": item }),
            InventoryChange::RemoveItem { item_id } => json!({ "itemId": item_id }),
            InventoryChange::MoveItem {
                item_id,
                new_position,
            } => json!({ "itemId": item_id, "newPosition": new_position }),
            InventoryChange::EquipItem { slot, item } => json!({ "slot": slot, "item": item }),
        }
    }

    fn from_wire(change_type: InventoryChangeType, data: &Value) -> Option<Self> {
        let text = |key: &str| data.get(key)?.as_str().map(str::to_string);
        Some(match change_type {
            InventoryChangeType::Full => InventoryChange::Full(data.as_object()?.clone()),
            InventoryChangeType::AddItem => InventoryChange::AddItem(data.get("item")?.clone()),
            InventoryChangeType::RemoveItem => InventoryChange::RemoveItem {
                item_id: text("itemId")?,
            },
            InventoryChangeType::MoveItem => InventoryChange::MoveItem {
                item_id: text("itemId")?,
                new_position: data.get("newPosition")?.clone(),
            },
            InventoryChangeType::EquipItem => InventoryChange::EquipItem {
                slot: text("slot")?,
                item: data.get("item")?.clone(),
            },
        })
    }

    fn apply(&self, base: Option<&Record>) -> Record {
        let items = || -> Vec<Value> {
            base.and_then(|r| r.get("items"))
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default()
        };
        let is_item = |item: &Value, id: &str| item.get("id").and_then(Value::as_str) == Some(id);

        let mut fields = Record::new();
        match self {
            InventoryChange::Full(record) => return record.clone(),
            InventoryChange::AddItem(item) => {
                let mut list = items();
                list.push(item.clone());
                fields.insert("items".into(), Value::Array(list));
            }
            InventoryChange::RemoveItem { item_id } => {
                let list = items().into_iter().filter(|i| !is_item(i, item_id)).collect();
                fields.insert("items".into(), Value::Array(list));
            }
            InventoryChange::MoveItem {
                item_id,
                new_position,
            } => {
                let mut list = items();
                for item in list.iter_mut().filter(|i| is_item(i, item_id)) {
                    if let Some(obj) = item.as_object_mut() {
                        obj.insert("position".into(), new_position.clone());
                    }
                }
                fields.insert("items".into(), Value::Array(list));
            }
            InventoryChange::EquipItem { slot, item } => {
                let mut equipment = base
                    .and_then(|r| r.get("equipment"))
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                equipment.insert(slot.clone(), item.clone());
                fields.insert("equipment".into(), Value::Object(equipment));
            }
        }
        fields
    }
}

/// A local player action.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    /// Drag or drop a token.
    MoveToken {
        /// Token id.
        token_id: EntityId,
        /// Target position.
        position: Position,
        /// Intermediate drag update.
        is_dragging: bool,
        /// Drag velocity.
        velocity: Option<Velocity>,
    },
    /// Edit character sheet fields.
    UpdateCharacter {
        /// Character id.
        character_id: EntityId,
        /// Changed fields.
        updates: Record,
    },
    /// Edit an inventory.
    UpdateInventory {
        /// Inventory owner.
        player_id: String,
        /// The edit.
        change: InventoryChange,
    },
    /// Edit the encounter. Game master only.
    UpdateCombat {
        /// Changed fields.
        updates: Record,
    },
    /// Post to chat.
    Chat {
        /// Message text.
        message: String,
        /// Local player id.
        player_id: String,
        /// Local player name.
        player_name: String,
    },
    /// Arbitrary local patch. Never sent to the server.
    Patch {
        /// Target category.
        category: Category,
        /// Target entity.
        entity_id: EntityId,
        /// Fields to overlay.
        fields: Record,
    },
}

impl Intent {
    /// Short action name for logs and errors.
    pub fn action(&self) -> &'static str {
        match self {
            Intent::MoveToken { .. } => "move token",
            Intent::UpdateCharacter { .. } => "update character",
            Intent::UpdateInventory { .. } => "update inventory",
            Intent::UpdateCombat { .. } => "update combat",
            Intent::Chat { .. } => "send chat message",
            Intent::Patch { .. } => "patch state",
        }
    }

    /// Whether the intent stays on this client.
    pub fn is_local(&self) -> bool {
        matches!(self, Intent::Patch { .. })
    }

    /// Whether only the game master may perform this action.
    pub fn requires_gm(&self) -> bool {
        matches!(self, Intent::UpdateCombat { .. })
    }

    /// Entity the predicted patch lands on. Chat messages get a provisional
    /// `local-<sequence>` id until the server assigns one.
    pub fn target(&self, sequence: Sequence) -> (Category, EntityId) {
        match self {
            Intent::MoveToken { token_id, .. } => (Category::Tokens, token_id.clone()),
            Intent::UpdateCharacter { character_id, .. } => {
                (Category::Characters, character_id.clone())
            }
            Intent::UpdateInventory { player_id, .. } => (Category::Inventories, player_id.clone()),
            Intent::UpdateCombat { .. } => (Category::Combat, COMBAT_ENTITY_ID.to_string()),
            Intent::Chat { .. } => (Category::Chat, format!("local-{sequence}")),
            Intent::Patch {
                category,
                entity_id,
                ..
            } => (*category, entity_id.clone()),
        }
    }

    /// Predicted fields given the entity as it currently appears.
    pub fn derive_fields(&self, base: Option<&Record>, sequence: Sequence, now: Timestamp) -> Record {
        match self {
            Intent::MoveToken { position, .. } => {
                let mut fields = Record::new();
                fields.insert("position".into(), json!(position));
                fields
            }
            Intent::UpdateCharacter { updates, .. } | Intent::UpdateCombat { updates } => {
                updates.clone()
            }
            Intent::UpdateInventory { change, .. } => change.apply(base),
            Intent::Chat {
                message,
                player_id,
                player_name,
            } => {
                let entry = json!({
                    "id": format!("local-{sequence}"),
                    "playerId": player_id,
                    "playerName": player_name,
                    "content": message,
                    "timestamp": now,
                    "type": "chat",
                    "pending": true,
                });
                entry.as_object().cloned().unwrap_or_default()
            }
            Intent::Patch { fields, .. } => fields.clone(),
        }
    }

    /// The wire message announcing this intent, or `None` for local patches.
    pub fn to_message(&self, sequence: Sequence, now: Timestamp) -> Option<ClientMessage> {
        Some(match self {
            Intent::MoveToken {
                token_id,
                position,
                is_dragging,
                velocity,
            } => ClientMessage::TokenMoved(TokenMove {
                token_id: token_id.clone(),
                position: *position,
                is_dragging: *is_dragging,
                velocity: *velocity,
                sequence,
                timestamp: now,
            }),
            Intent::UpdateCharacter {
                character_id,
                updates,
            } => ClientMessage::CharacterUpdate(CharacterUpdate {
                character_id: character_id.clone(),
                updates: updates.clone(),
                sequence,
            }),
            Intent::UpdateInventory { player_id, change } => {
                ClientMessage::InventoryUpdate(InventoryUpdate {
                    player_id: player_id.clone(),
                    inventory_data: change.wire_data(),
                    change_type: change.change_type(),
                    sequence,
                })
            }
            Intent::UpdateCombat { updates } => ClientMessage::CombatUpdate(CombatUpdate {
                combat_updates: updates.clone(),
                sequence,
            }),
            Intent::Chat { message, .. } => ClientMessage::ChatMessage(ChatSend {
                message: message.clone(),
                sequence,
            }),
            Intent::Patch { .. } => return None,
        })
    }

    /// Recover the intent behind a message the server echoed back.
    pub fn from_message(message: &ClientMessage, player_id: &str, player_name: &str) -> Option<Self> {
        Some(match message {
            ClientMessage::TokenMoved(m) => Intent::MoveToken {
                token_id: m.token_id.clone(),
                position: m.position,
                is_dragging: m.is_dragging,
                velocity: m.velocity,
            },
            ClientMessage::CharacterUpdate(m) => Intent::UpdateCharacter {
                character_id: m.character_id.clone(),
                updates: m.updates.clone(),
            },
            ClientMessage::InventoryUpdate(m) => Intent::UpdateInventory {
                player_id: m.player_id.clone(),
                change: InventoryChange::from_wire(m.change_type, &m.inventory_data)?,
            },
            ClientMessage::CombatUpdate(m) => Intent::UpdateCombat {
                updates: m.combat_updates.clone(),
            },
            ClientMessage::ChatMessage(m) => Intent::Chat {
                message: m.message.clone(),
                player_id: player_id.to_string(),
                player_name: player_name.to_string(),
            },
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn inventory() -> Record {
        record(json!({
            "items": [{"id": "sword", "position": 0}, {"id": "rope", "position": 1}],
            "equipment": {"head": {"id": "helm"}}
        }))
    }

    fn update(player_id: &str, change: InventoryChange) -> Intent {
        Intent::UpdateInventory {
            player_id: player_id.into(),
            change,
        }
    }

    #[test]
    fn test_move_token_predicts_position() {
        let intent = Intent::MoveToken {
            token_id: "t1".into(),
            position: Position::new(4.0, 2.5),
            is_dragging: false,
            velocity: None,
        };
        let fields = intent.derive_fields(None, 1, 0);
        assert_eq!(Value::Object(fields), json!({"position": {"x": 4.0, "y": 2.5}}));
        assert_eq!(intent.target(1), (Category::Tokens, "t1".to_string()));
    }

    #[test]
    fn test_inventory_add_and_remove() {
        let base = inventory();
        let add = update("p1", InventoryChange::AddItem(json!({"id": "torch"})));
        let added = add.derive_fields(Some(&base), 1, 0);
        assert_eq!(added["items"].as_array().unwrap().len(), 3);
        assert!(!added.contains_key("equipment"));

        let remove = update("p1", InventoryChange::RemoveItem { item_id: "sword".into() });
        let removed = remove.derive_fields(Some(&base), 2, 0);
        assert_eq!(removed["items"], json!([{"id": "rope", "position": 1}]));
    }

    #[test]
    fn test_inventory_move_and_equip() {
        let base = inventory();
        let moved = update(
            "p1",
            InventoryChange::MoveItem {
                item_id: "rope".into(),
                new_position: json!(7),
            },
        )
        .derive_fields(Some(&base), 1, 0);
        assert_eq!(moved["items"][1]["position"], 7);
        assert_eq!(moved["items"][0]["position"], 0);

        let equipped = update(
            "p1",
            InventoryChange::EquipItem {
                slot: "hand".into(),
                item: json!({"id": "sword"}),
            },
        )
        .derive_fields(Some(&base), 2, 0);
        assert_eq!(equipped["equipment"]["head"]["id"], "helm");
        assert_eq!(equipped["equipment"]["hand"]["id"], "sword");
    }

    #[test]
    fn test_inventory_change_survives_wire() {
        let changes = [
            InventoryChange::Full(inventory()),
            InventoryChange::AddItem(json!({"id": "gem"})),
            InventoryChange::RemoveItem { item_id: "gem".into() },
            InventoryChange::MoveItem {
                item_id: "gem".into(),
                new_position: json!({"row": 1}),
            },
            InventoryChange::EquipItem {
                slot: "neck".into(),
                item: json!({"id": "amulet"}),
            },
        ];
        for change in changes {
            let intent = update("p9", change);
            let message = intent.to_message(3, 0).unwrap();
            assert_eq!(Intent::from_message(&message, "p9", "Nyx"), Some(intent));
        }
    }

    #[test]
    fn test_chat_prediction_is_pending_entry() {
        let intent = Intent::Chat {
            message: "Roll for initiative".into(),
            player_id: "p1".into(),
            player_name: "Ada".into(),
        };
        assert_eq!(intent.target(12), (Category::Chat, "local-12".to_string()));
        let fields = intent.derive_fields(None, 12, 500);
        assert_eq!(fields["pending"], true);
        assert_eq!(fields["content"], "Roll for initiative");
        assert_eq!(fields["timestamp"], 500);
    }

    #[test]
    fn test_combat_targets_encounter_and_needs_gm() {
        let intent = Intent::UpdateCombat {
            updates: record(json!({"round": 3})),
        };
        assert!(intent.requires_gm());
        assert_eq!(intent.target(1).1, COMBAT_ENTITY_ID);
        assert!(matches!(intent.to_message(1, 0), Some(ClientMessage::CombatUpdate(_))));
    }

    #[test]
    fn test_local_patch_is_not_sent() {
        let intent = Intent::Patch {
            category: Category::Tokens,
            entity_id: "t1".into(),
            fields: record(json!({"highlight": true})),
        };
        assert!(intent.to_message(1, 0).is_none());
        assert!(!intent.requires_gm());
        assert!(intent.is_local());
    }

    #[test]
    fn test_non_state_messages_have_no_intent() {
        let ping = ClientMessage::Ping(vtt_net::Ping { timestamp: 1 });
        assert_eq!(Intent::from_message(&ping, "p1", "Ada"), None);
    }
}
