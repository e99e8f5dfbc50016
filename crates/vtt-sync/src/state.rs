//! Server-confirmed game state.
//!
//! Only the event processor, the delta applier and the reconciler write here;
//! every mutator is `pub(crate)`. Writes to an entity are ordered by event
//! timestamp: a write older than the entity's last writer is refused as
//! stale, which makes replaying an already-applied event harmless.

use std::collections::{BTreeMap, HashMap};

use vtt_net::{Category, EntityId, GameState, Record, Timestamp};

/// Result of a timestamped write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The write changed (or re-affirmed) the entity.
    Applied,
    /// A newer write already landed; nothing changed.
    Stale,
}

/// The client's copy of authoritative state.
#[derive(Debug, Clone, Default)]
pub struct ConfirmedState {
    entities: GameState,
    last_writer: HashMap<(Category, EntityId), Timestamp>,
    revision: u64,
}

impl ConfirmedState {
    /// Empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// State seeded from a snapshot.
    pub fn from_snapshot(state: GameState) -> Self {
        Self {
            entities: state,
            last_writer: HashMap::new(),
            revision: 0,
        }
    }

    /// The full state.
    pub fn snapshot(&self) -> &GameState {
        &self.entities
    }

    /// One entity.
    pub fn get(&self, category: Category, id: &str) -> Option<&Record> {
        self.entities.get(&category)?.get(id)
    }

    /// All entities in a category.
    pub fn category(&self, category: Category) -> Option<&BTreeMap<EntityId, Record>> {
        self.entities.get(&category)
    }

    /// Number of writes applied so far. Never moves except through the
    /// processor, delta applier, or reconciler.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Timestamp of the last write to an entity, including removals.
    pub fn last_write(&self, category: Category, id: &str) -> Option<Timestamp> {
        self.last_writer.get(&(category, id.to_string())).copied()
    }

    fn admit(&mut self, category: Category, id: &str, timestamp: Timestamp) -> WriteOutcome {
        let key = (category, id.to_string());
        match self.last_writer.get(&key) {
            Some(&previous) if timestamp < previous => WriteOutcome::Stale,
            _ => {
                self.last_writer.insert(key, timestamp);
                self.revision += 1;
                WriteOutcome::Applied
            }
        }
    }

    /// Shallow-merge `fields` into an entity, creating it if absent.
    pub(crate) fn merge_fields(
        &mut self,
        category: Category,
        id: &str,
        fields: &Record,
        timestamp: Timestamp,
    ) -> WriteOutcome {
        let outcome = self.admit(category, id, timestamp);
        if outcome == WriteOutcome::Applied {
            let record = self
                .entities
                .entry(category)
                .or_default()
                .entry(id.to_string())
                .or_default();
            for (key, value) in fields {
                record.insert(key.clone(), value.clone());
            }
        }
        outcome
    }

    /// Replace an entity wholesale.
    pub(crate) fn insert_record(
        &mut self,
        category: Category,
        id: &str,
        record: Record,
        timestamp: Timestamp,
    ) -> WriteOutcome {
        let outcome = self.admit(category, id, timestamp);
        if outcome == WriteOutcome::Applied {
            self.entities
                .entry(category)
                .or_default()
                .insert(id.to_string(), record);
        }
        outcome
    }

    /// Remove an entity. The removal timestamp is remembered so that an
    /// older write arriving later cannot resurrect it.
    pub(crate) fn remove(&mut self, category: Category, id: &str, timestamp: Timestamp) -> WriteOutcome {
        let outcome = self.admit(category, id, timestamp);
        if outcome == WriteOutcome::Applied
            && let Some(entities) = self.entities.get_mut(&category)
        {
            entities.remove(id);
        }
        outcome
    }

    /// Replace everything with an authoritative snapshot and forget write
    /// history.
    pub(crate) fn replace_all(&mut self, state: GameState) {
        self.entities = state;
        self.last_writer.clear();
        self.revision += 1;
    }

    /// Untimestamped mutable access for delta application.
    pub(crate) fn state_mut(&mut self) -> &mut GameState {
        self.revision += 1;
        &mut self.entities
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: serde_json::Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_merge_creates_and_updates() {
        let mut state = ConfirmedState::new();
        state.merge_fields(Category::Tokens, "t1", &fields(json!({"x": 1, "hp": 5})), 10);
        state.merge_fields(Category::Tokens, "t1", &fields(json!({"x": 2})), 11);

        let token = state.get(Category::Tokens, "t1").unwrap();
        assert_eq!(token["x"], 2);
        assert_eq!(token["hp"], 5);
        assert_eq!(state.revision(), 2);
        assert_eq!(state.last_write(Category::Tokens, "t1"), Some(11));
    }

    #[test]
    fn test_older_write_is_stale() {
        let mut state = ConfirmedState::new();
        state.merge_fields(Category::Tokens, "t1", &fields(json!({"x": 5})), 20);
        let outcome = state.merge_fields(Category::Tokens, "t1", &fields(json!({"x": 1})), 19);

        assert_eq!(outcome, WriteOutcome::Stale);
        assert_eq!(state.get(Category::Tokens, "t1").unwrap()["x"], 5);
        assert_eq!(state.revision(), 1);
    }

    #[test]
    fn test_equal_timestamp_reapplies() {
        let mut state = ConfirmedState::new();
        let update = fields(json!({"name": "Brakka"}));
        state.merge_fields(Category::Characters, "c1", &update, 7);
        let before = state.snapshot().clone();

        let outcome = state.merge_fields(Category::Characters, "c1", &update, 7);
        assert_eq!(outcome, WriteOutcome::Applied);
        assert_eq!(state.snapshot(), &before);
    }

    #[test]
    fn test_removal_blocks_older_resurrection() {
        let mut state = ConfirmedState::new();
        state.insert_record(Category::GridItems, "g1", fields(json!({"name": "Sword"})), 5);
        state.remove(Category::GridItems, "g1", 8);
        assert!(state.get(Category::GridItems, "g1").is_none());

        let late = state.insert_record(Category::GridItems, "g1", fields(json!({"name": "Sword"})), 6);
        assert_eq!(late, WriteOutcome::Stale);
        assert!(state.get(Category::GridItems, "g1").is_none());
    }

    #[test]
    fn test_ids_are_scoped_per_category() {
        let mut state = ConfirmedState::new();
        state.merge_fields(Category::Tokens, "same", &fields(json!({"a": 1})), 50);
        let outcome = state.merge_fields(Category::Characters, "same", &fields(json!({"b": 2})), 1);
        assert_eq!(outcome, WriteOutcome::Applied);
        assert!(state.get(Category::Tokens, "same").unwrap().get("b").is_none());
    }

    #[test]
    fn test_replace_all_forgets_history() {
        let mut state = ConfirmedState::new();
        state.merge_fields(Category::Tokens, "t1", &fields(json!({"x": 1})), 100);

        let mut snapshot = GameState::new();
        snapshot
            .entry(Category::Tokens)
            .or_default()
            .insert("t2".into(), fields(json!({"x": 9})));
        state.replace_all(snapshot);

        assert!(state.get(Category::Tokens, "t1").is_none());
        assert_eq!(state.last_write(Category::Tokens, "t1"), None);
        let outcome = state.merge_fields(Category::Tokens, "t1", &fields(json!({"x": 2})), 1);
        assert_eq!(outcome, WriteOutcome::Applied);
    }
}
