//! Optimistic predictions and the inputs still awaiting the server.
//!
//! Every local action gets a sequence number. Its patch is visible in the
//! merged view until the server confirms that exact sequence, or until a
//! correction replaces everything.

use std::collections::BTreeMap;

use tracing::{debug, warn};
use vtt_net::{Category, EntityId, GameState, Record, Sequence, Timestamp};

use crate::intent::Intent;
use crate::merge::merge;

/// Fields a local action expects an entity to have once the server agrees.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictedPatch {
    /// Correlation number shared with the outbound message.
    pub sequence: Sequence,
    /// Target category.
    pub category: Category,
    /// Target entity.
    pub entity_id: EntityId,
    /// Predicted fields.
    pub fields: Record,
    /// When the prediction was made.
    pub created_at: Timestamp,
}

/// An action sent to the server and not yet confirmed.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingInput {
    /// Correlation number.
    pub sequence: Sequence,
    /// What the player did.
    pub intent: Intent,
    /// When it was issued.
    pub created_at: Timestamp,
}

/// Predicted patches and pending inputs, keyed by sequence.
#[derive(Debug)]
pub struct PredictionStore {
    next_sequence: Sequence,
    patches: BTreeMap<Sequence, PredictedPatch>,
    pending: BTreeMap<Sequence, PendingInput>,
    max_pending: usize,
}

impl Default for PredictionStore {
    fn default() -> Self {
        Self::new(256)
    }
}

impl PredictionStore {
    /// Store holding at most `max_pending` unconfirmed inputs.
    pub fn new(max_pending: usize) -> Self {
        Self {
            next_sequence: 1,
            patches: BTreeMap::new(),
            pending: BTreeMap::new(),
            max_pending: max_pending.max(1),
        }
    }

    fn allocate(&mut self) -> Sequence {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }

    /// Record a raw patch with no outbound input.
    pub fn predict(
        &mut self,
        category: Category,
        entity_id: impl Into<EntityId>,
        fields: Record,
        now: Timestamp,
    ) -> Sequence {
        let sequence = self.allocate();
        self.patches.insert(
            sequence,
            PredictedPatch {
                sequence,
                category,
                entity_id: entity_id.into(),
                fields,
                created_at: now,
            },
        );
        sequence
    }

    /// Record an intent: derive its patch against the current merged view of
    /// `confirmed` and keep the input until it is confirmed.
    pub fn predict_intent(&mut self, intent: Intent, confirmed: &GameState, now: Timestamp) -> Sequence {
        let sequence = self.allocate();
        self.insert_intent(sequence, intent, confirmed, now);
        sequence
    }

    /// Derive and store a patch for an intent under a given sequence.
    pub(crate) fn insert_intent(
        &mut self,
        sequence: Sequence,
        intent: Intent,
        confirmed: &GameState,
        created_at: Timestamp,
    ) {
        let (category, entity_id) = intent.target(sequence);
        let view = merge(confirmed, self.patches.values());
        let base = view.get(&category).and_then(|entities| entities.get(&entity_id));
        let fields = intent.derive_fields(base, sequence, created_at);

        self.patches.insert(
            sequence,
            PredictedPatch {
                sequence,
                category,
                entity_id,
                fields,
                created_at,
            },
        );
        self.pending.insert(
            sequence,
            PendingInput {
                sequence,
                intent,
                created_at,
            },
        );
        self.next_sequence = self.next_sequence.max(sequence + 1);

        while self.pending.len() > self.max_pending {
            if let Some((evicted, _)) = self.pending.pop_first() {
                self.patches.remove(&evicted);
                warn!(sequence = evicted, "pending input limit reached, dropping oldest");
            }
        }
    }

    /// Drop the prediction with exactly this sequence.
    pub fn confirm(&mut self, sequence: Sequence) -> bool {
        let patch = self.patches.remove(&sequence);
        let input = self.pending.remove(&sequence);
        if patch.is_none() && input.is_none() {
            debug!(sequence, "confirmation for unknown sequence");
            return false;
        }
        true
    }

    /// Drop predictions on an entity made no later than `up_to`.
    ///
    /// Used for echoes of the local player's own actions that carry no
    /// sequence. Chat predictions use provisional ids, so `entity_id` is
    /// ignored for [`Category::Chat`]. Returns how many patches went away.
    pub fn confirm_implicit(&mut self, category: Category, entity_id: Option<&str>, up_to: Timestamp) -> usize {
        let matched: Vec<Sequence> = self
            .patches
            .values()
            .filter(|p| p.category == category && p.created_at <= up_to)
            .filter(|p| category == Category::Chat || entity_id.is_none_or(|id| p.entity_id == id))
            .map(|p| p.sequence)
            .collect();

        // One chat echo settles one message.
        let matched = if category == Category::Chat {
            matched.into_iter().take(1).collect()
        } else {
            matched
        };

        for sequence in &matched {
            self.patches.remove(sequence);
            self.pending.remove(sequence);
        }
        matched.len()
    }

    /// Patches in sequence order.
    pub fn patches(&self) -> impl Iterator<Item = &PredictedPatch> {
        self.patches.values()
    }

    /// Pending inputs in sequence order.
    pub fn pending(&self) -> impl Iterator<Item = &PendingInput> {
        self.pending.values()
    }

    /// Whether a sequence is still pending.
    pub fn is_pending(&self, sequence: Sequence) -> bool {
        self.pending.contains_key(&sequence)
    }

    /// Number of live patches.
    pub fn len(&self) -> usize {
        self.patches.len()
    }

    /// No live patches.
    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    /// Remove and return every pending input, clearing all patches.
    pub fn take_pending(&mut self) -> Vec<PendingInput> {
        self.patches.clear();
        std::mem::take(&mut self.pending).into_values().collect()
    }

    /// Forget everything except the sequence counter.
    pub fn clear(&mut self) {
        self.patches.clear();
        self.pending.clear();
    }

    /// The merged view over `confirmed`.
    pub fn view(&self, confirmed: &GameState) -> GameState {
        merge(confirmed, self.patches.values())
    }
}
