//! Batched and direct application of server events to confirmed state.
//!
//! Batches are sorted by priority, then timestamp, and queued. Each frame
//! drains at most `chunk_size` events so a large batch is spread over
//! several frames instead of stalling one. Every handler writes a single
//! `(category, entity)` pair and is idempotent under last-writer-wins.

use std::collections::VecDeque;

use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, warn};
use vtt_net::{
    BatchUpdate, Category, CompressionError, DeltaUpdate, EntityId, GameEvent, Record, Sequence,
    Timestamp, WireEvent,
};

use crate::delta::{self, DeltaError};
use crate::intent::COMBAT_ENTITY_ID;
use crate::state::{ConfirmedState, WriteOutcome};

/// Errors from ingesting a batch or delta.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The compressed body could not be unpacked.
    #[error("failed to unpack body: {0}")]
    Compression(#[from] CompressionError),
    /// The delta could not be applied.
    #[error(transparent)]
    Delta(#[from] DeltaError),
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// One event that reached a handler.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedEvent {
    /// The decoded event.
    pub event: GameEvent,
    /// Category it writes.
    pub category: Category,
    /// Entity it writes.
    pub entity_id: EntityId,
    /// Timestamp used for last-writer-wins.
    pub timestamp: Timestamp,
    /// Whether the write landed.
    pub outcome: WriteOutcome,
    /// Sequence carried on the batch envelope rather than the payload.
    pub tag: Option<Sequence>,
}

impl AppliedEvent {
    /// Player the event came from.
    pub fn origin(&self) -> Option<&str> {
        self.event.origin()
    }

    /// Sequence echoed by the server, from the payload or else the envelope.
    pub fn sequence(&self) -> Option<Sequence> {
        self.event.sequence().or(self.tag)
    }
}

/// What a single [`BatchProcessor::tick`] did.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TickReport {
    /// Events that reached a handler, stale ones included.
    pub applied: Vec<AppliedEvent>,
    /// Events refused as older than the entity's last writer.
    pub stale: usize,
    /// Unknown or malformed events.
    pub skipped: usize,
    /// Events left in the queue.
    pub remaining: usize,
}

/// Running totals.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorStats {
    /// Batches accepted.
    pub batches: u64,
    /// Batches dropped because they could not be unpacked.
    pub batches_dropped: u64,
    /// Events written.
    pub events_applied: u64,
    /// Events refused as stale.
    pub events_stale: u64,
    /// Unknown or malformed events.
    pub events_skipped: u64,
    /// Deltas applied.
    pub deltas: u64,
}

// ---------------------------------------------------------------------------
// BatchProcessor
// ---------------------------------------------------------------------------

/// Queue of server events drained a chunk at a time.
#[derive(Debug)]
pub struct BatchProcessor {
    queue: VecDeque<WireEvent>,
    chunk_size: usize,
    stats: ProcessorStats,
}

impl BatchProcessor {
    /// Processor that applies at most `chunk_size` events per tick.
    pub fn new(chunk_size: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            chunk_size: chunk_size.max(1),
            stats: ProcessorStats::default(),
        }
    }

    /// Unpack, sort and queue a batch. Returns the number of events queued.
    pub fn enqueue_batch(&mut self, batch: BatchUpdate) -> Result<usize, ProcessError> {
        let mut events = match batch.into_events() {
            Ok(events) => events,
            Err(e) => {
                self.stats.batches_dropped += 1;
                return Err(e.into());
            }
        };
        events.sort_by_key(|e| (e.priority, e.timestamp));

        let count = events.len();
        self.queue.extend(events);
        self.stats.batches += 1;
        debug!(count, queued = self.queue.len(), "batch queued");
        Ok(count)
    }

    /// Apply up to one chunk of queued events.
    pub fn tick(&mut self, state: &mut ConfirmedState) -> TickReport {
        let mut report = TickReport::default();
        for _ in 0..self.chunk_size {
            let Some(wire) = self.queue.pop_front() else {
                break;
            };
            let event = match wire.decode() {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "skipping event");
                    report.skipped += 1;
                    continue;
                }
            };
            let timestamp = event.timestamp().unwrap_or(wire.timestamp);
            match self.apply(state, event, timestamp, wire.sequence) {
                Some(applied) => {
                    if applied.outcome == WriteOutcome::Stale {
                        report.stale += 1;
                    }
                    report.applied.push(applied);
                }
                None => report.skipped += 1,
            }
        }
        report.remaining = self.queue.len();
        report
    }

    /// Apply an unbatched event immediately. `now` stands in for a missing
    /// server timestamp.
    pub fn apply_direct(
        &mut self,
        state: &mut ConfirmedState,
        event: GameEvent,
        now: Timestamp,
    ) -> Option<AppliedEvent> {
        let timestamp = event.timestamp().unwrap_or(now);
        self.apply(state, event, timestamp, None)
    }

    /// Apply a state delta immediately.
    pub fn apply_delta(&mut self, state: &mut ConfirmedState, update: DeltaUpdate) -> Result<(), ProcessError> {
        let delta = update.into_delta()?;
        let mut next = state.snapshot().clone();
        delta::apply_delta(&mut next, &delta)?;
        *state.state_mut() = next;
        self.stats.deltas += 1;
        Ok(())
    }

    /// Drop everything queued.
    pub fn clear(&mut self) {
        self.queue.clear();
    }

    /// Events waiting.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Running totals.
    pub fn stats(&self) -> ProcessorStats {
        self.stats
    }

    fn apply(
        &mut self,
        state: &mut ConfirmedState,
        event: GameEvent,
        timestamp: Timestamp,
        tag: Option<Sequence>,
    ) -> Option<AppliedEvent> {
        let Some((category, entity_id, outcome)) = write_event(state, &event, timestamp) else {
            self.stats.events_skipped += 1;
            return None;
        };
        match outcome {
            WriteOutcome::Applied => self.stats.events_applied += 1,
            WriteOutcome::Stale => {
                self.stats.events_stale += 1;
                debug!(kind = event.kind(), %category, entity = %entity_id, "stale event ignored");
            }
        }
        Some(AppliedEvent {
            event,
            category,
            entity_id,
            timestamp,
            outcome,
            tag,
        })
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn object(value: Value) -> Record {
    match value {
        Value::Object(record) => record,
        _ => Record::new(),
    }
}

fn record_id(record: &Record) -> Option<String> {
    match record.get("id")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn write_event(
    state: &mut ConfirmedState,
    event: &GameEvent,
    ts: Timestamp,
) -> Option<(Category, EntityId, WriteOutcome)> {
    let (category, id, outcome) = match event {
        GameEvent::TokenMoved(e) => {
            let fields = object(json!({
                "position": e.position,
                "lastMovedBy": e.player_id,
                "lastMovedAt": e.server_timestamp,
            }));
            let outcome = state.merge_fields(Category::Tokens, &e.token_id, &fields, ts);
            (Category::Tokens, e.token_id.clone(), outcome)
        }
        GameEvent::TokenCreated(e) => {
            let Some(id) = record_id(&e.token) else {
                warn!("token_created without token id");
                return None;
            };
            let mut record = e.token.clone();
            record.insert("position".into(), json!(e.position));
            record.insert("createdBy".into(), json!(e.player_id));
            record.insert("createdByName".into(), json!(e.player_name));
            record.insert("createdAt".into(), json!(e.timestamp));
            let outcome = state.insert_record(Category::Tokens, &id, record, ts);
            (Category::Tokens, id, outcome)
        }
        GameEvent::CharacterUpdated(e) => {
            let outcome = state.merge_fields(Category::Characters, &e.character_id, &e.updates, ts);
            (Category::Characters, e.character_id.clone(), outcome)
        }
        GameEvent::CharacterMoved(e) => {
            let id = format!("character_{}", e.player_id);
            let fields = object(json!({ "position": e.position, "lastMovedAt": e.timestamp }));
            let outcome = state.merge_fields(Category::Characters, &id, &fields, ts);
            (Category::Characters, id, outcome)
        }
        GameEvent::InventoryChanged(e) => {
            let outcome = state.merge_fields(Category::Inventories, &e.player_id, &e.inventory, ts);
            (Category::Inventories, e.player_id.clone(), outcome)
        }
        GameEvent::CombatUpdated(e) => {
            let outcome = state.merge_fields(Category::Combat, COMBAT_ENTITY_ID, &e.updates, ts);
            (Category::Combat, COMBAT_ENTITY_ID.to_string(), outcome)
        }
        GameEvent::ChatMessage(e) => {
            let record = object(json!(e.message));
            let outcome = state.insert_record(Category::Chat, &e.message.id, record, ts);
            (Category::Chat, e.message.id.clone(), outcome)
        }
        GameEvent::ItemDropped(e) => {
            let Some(id) = record_id(&e.item) else {
                warn!("item_dropped without item id");
                return None;
            };
            let mut record = e.item.clone();
            record.insert("position".into(), json!(e.position));
            record.insert("gridPosition".into(), e.grid_position.clone());
            record.insert("droppedBy".into(), json!(e.player_id));
            record.insert("droppedByName".into(), json!(e.player_name));
            record.insert("droppedAt".into(), json!(e.timestamp));
            let outcome = state.insert_record(Category::GridItems, &id, record, ts);
            (Category::GridItems, id, outcome)
        }
        GameEvent::ItemLooted(e) => {
            let Some(id) = e.grid_item_id.as_ref().filter(|_| e.item_removed) else {
                debug!("item_looted left the grid item in place");
                return None;
            };
            let outcome = state.remove(Category::GridItems, id, ts);
            (Category::GridItems, id.clone(), outcome)
        }
    };
    Some((category, id, outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vtt_net::{
        CharacterUpdated, ItemDropped, ItemLooted, Position, Priority, TokenCreated, TokenMoved,
    };

    fn token_moved(id: &str, x: f64, ts: Timestamp) -> GameEvent {
        GameEvent::TokenMoved(TokenMoved {
            token_id: id.into(),
            position: Position::new(x, 0.0),
            player_id: Some("p2".into()),
            is_dragging: false,
            velocity: None,
            sequence: None,
            server_timestamp: ts,
        })
    }

    fn wire(event: &GameEvent, ts: Timestamp, priority: Priority) -> WireEvent {
        WireEvent::new(event, ts, priority)
    }

    #[test]
    fn test_priority_then_timestamp_order() {
        let mut processor = BatchProcessor::new(10);
        let mut state = ConfirmedState::new();
        let batch = BatchUpdate::plain(vec![
            wire(&token_moved("low", 1.0, 1), 1, Priority::Low),
            wire(&token_moved("crit5", 1.0, 5), 5, Priority::Critical),
            wire(&token_moved("crit3", 1.0, 3), 3, Priority::Critical),
        ]);
        processor.enqueue_batch(batch).unwrap();

        let report = processor.tick(&mut state);
        let order: Vec<_> = report.applied.iter().map(|a| a.timestamp).collect();
        assert_eq!(order, [3, 5, 1]);
    }

    #[test]
    fn test_envelope_sequence_carried_to_applied_event() {
        let mut processor = BatchProcessor::new(5);
        let mut state = ConfirmedState::new();
        let mut tagged = wire(&token_moved("t1", 2.0, 4), 4, Priority::Normal);
        tagged.sequence = Some(17);
        processor.enqueue_batch(BatchUpdate::plain(vec![tagged])).unwrap();

        let report = processor.tick(&mut state);
        assert_eq!(report.applied[0].sequence(), Some(17));
        assert_eq!(report.applied[0].tag, Some(17));
    }

    #[test]
    fn test_missing_priority_is_normal() {
        let raw = serde_json::json!({"type": "token_moved", "data": {}, "timestamp": 1});
        let event: WireEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event.priority, Priority::Normal);
    }

    #[test]
    fn test_tick_drains_one_chunk() {
        let mut processor = BatchProcessor::new(5);
        let mut state = ConfirmedState::new();
        let events = (0..12)
            .map(|i| wire(&token_moved(&format!("t{i}"), 1.0, i), i, Priority::Normal))
            .collect();
        processor.enqueue_batch(BatchUpdate::plain(events)).unwrap();

        assert_eq!(processor.tick(&mut state).remaining, 7);
        assert_eq!(processor.tick(&mut state).remaining, 2);
        let last = processor.tick(&mut state);
        assert_eq!(last.applied.len(), 2);
        assert_eq!(last.remaining, 0);
        assert_eq!(state.category(Category::Tokens).unwrap().len(), 12);
    }

    #[test]
    fn test_compressed_batch() {
        let mut processor = BatchProcessor::new(5);
        let mut state = ConfirmedState::new();
        let events = vec![wire(&token_moved("t1", 4.0, 9), 9, Priority::High)];
        processor.enqueue_batch(BatchUpdate::packed(&events).unwrap()).unwrap();
        processor.tick(&mut state);
        assert_eq!(state.get(Category::Tokens, "t1").unwrap()["position"]["x"], 4.0);
    }

    #[test]
    fn test_corrupt_batch_dropped() {
        let mut processor = BatchProcessor::new(5);
        let batch = BatchUpdate {
            events: Vec::new(),
            compressed: true,
            payload: Some(vec![16, 0, 0, 0, 0xF0]),
        };
        assert!(processor.enqueue_batch(batch).is_err());
        assert_eq!(processor.queued(), 0);
        assert_eq!(processor.stats().batches_dropped, 1);
    }

    #[test]
    fn test_unknown_and_malformed_skipped() {
        let mut processor = BatchProcessor::new(5);
        let mut state = ConfirmedState::new();
        let unknown = WireEvent {
            event_type: "weather_changed".into(),
            data: serde_json::json!({}),
            timestamp: 1,
            priority: Priority::Normal,
            sequence: None,
        };
        let malformed = WireEvent {
            event_type: "token_moved".into(),
            data: serde_json::json!({"tokenId": 5}),
            ..unknown.clone()
        };
        let good = wire(&token_moved("t1", 1.0, 2), 2, Priority::Normal);
        processor
            .enqueue_batch(BatchUpdate::plain(vec![unknown, malformed, good]))
            .unwrap();

        let report = processor.tick(&mut state);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.applied.len(), 1);
        assert!(state.get(Category::Tokens, "t1").is_some());
    }

    #[test]
    fn test_replayed_event_is_idempotent() {
        let mut processor = BatchProcessor::new(5);
        let mut state = ConfirmedState::new();
        let event = GameEvent::CharacterUpdated(CharacterUpdated {
            character_id: "c1".into(),
            updates: object(json!({"hp": 12})),
            player_id: None,
            sequence: None,
            server_timestamp: Some(40),
        });
        processor.apply_direct(&mut state, event.clone(), 0);
        let once = state.snapshot().clone();
        processor.apply_direct(&mut state, event, 0);
        assert_eq!(state.snapshot(), &once);
    }

    #[test]
    fn test_out_of_order_move_is_stale() {
        let mut processor = BatchProcessor::new(5);
        let mut state = ConfirmedState::new();
        processor.apply_direct(&mut state, token_moved("t1", 9.0, 20), 0);
        let late = processor.apply_direct(&mut state, token_moved("t1", 1.0, 10), 0).unwrap();
        assert_eq!(late.outcome, WriteOutcome::Stale);
        assert_eq!(state.get(Category::Tokens, "t1").unwrap()["position"]["x"], 9.0);
        assert_eq!(state.get(Category::Tokens, "t1").unwrap()["lastMovedBy"], "p2");
    }

    #[test]
    fn test_token_created_and_grid_items() {
        let mut processor = BatchProcessor::new(5);
        let mut state = ConfirmedState::new();
        processor.apply_direct(
            &mut state,
            GameEvent::TokenCreated(TokenCreated {
                token: object(json!({"id": "t7", "name": "Wolf"})),
                position: Position::new(2.0, 3.0),
                player_id: Some("gm".into()),
                player_name: Some("Dana".into()),
                timestamp: 5,
            }),
            0,
        );
        let token = state.get(Category::Tokens, "t7").unwrap();
        assert_eq!(token["name"], "Wolf");
        assert_eq!(token["createdByName"], "Dana");

        processor.apply_direct(
            &mut state,
            GameEvent::ItemDropped(ItemDropped {
                item: object(json!({"id": "g1", "name": "Potion"})),
                position: Position::new(1.0, 1.0),
                grid_position: json!({"col": 1, "row": 1}),
                player_id: Some("p1".into()),
                player_name: None,
                timestamp: 6,
            }),
            0,
        );
        assert_eq!(state.get(Category::GridItems, "g1").unwrap()["gridPosition"]["col"], 1);

        let looted = |removed| {
            GameEvent::ItemLooted(ItemLooted {
                grid_item_id: Some("g1".into()),
                item_removed: removed,
                player_id: Some("p1".into()),
                timestamp: 7,
            })
        };
        assert!(processor.apply_direct(&mut state, looted(false), 0).is_none());
        assert!(state.get(Category::GridItems, "g1").is_some());
        processor.apply_direct(&mut state, looted(true), 0);
        assert!(state.get(Category::GridItems, "g1").is_none());
    }

    #[test]
    fn test_delta_bumps_revision_only_on_success() {
        let mut processor = BatchProcessor::new(5);
        let mut state = ConfirmedState::new();
        processor
            .apply_delta(&mut state, DeltaUpdate::plain(json!({"combat": {"encounter": {"round": 1}}})))
            .unwrap();
        assert_eq!(state.revision(), 1);
        assert_eq!(state.get(Category::Combat, COMBAT_ENTITY_ID).unwrap()["round"], 1);

        assert!(processor.apply_delta(&mut state, DeltaUpdate::plain(json!("nope"))).is_err());
        assert_eq!(state.revision(), 1);

        let packed = DeltaUpdate::packed(&json!({"combat": {"encounter": {"round": 2}}})).unwrap();
        processor.apply_delta(&mut state, packed).unwrap();
        assert_eq!(state.get(Category::Combat, COMBAT_ENTITY_ID).unwrap()["round"], 2);
        assert_eq!(processor.stats().deltas, 2);
    }
}
