//! Server corrections and full resyncs.
//!
//! A correction replaces confirmed state wholesale, then replays the inputs
//! the server has not processed yet so the player's in-flight actions stay
//! visible on top of the corrected baseline.

use std::collections::BTreeMap;

use tracing::{debug, info};
use vtt_net::{GameState, PlayerInfo, Sequence, StateCorrection, Timestamp};

use crate::intent::Intent;
use crate::prediction::PredictionStore;
use crate::state::ConfirmedState;

/// What a correction did to the local predictions.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Sequences re-derived on top of the corrected state, in order.
    pub replayed: Vec<Sequence>,
    /// Sequences dropped because the server already processed them.
    pub discarded: Vec<Sequence>,
    /// Server-listed sequences the client no longer held, rebuilt from the
    /// echoed input.
    pub restored: Vec<Sequence>,
}

/// Apply a state correction.
///
/// An input is still outstanding when the server lists it, or when its
/// sequence is newer than anything the server reports having seen (the
/// highest listed sequence or `last_processed_sequence`). Outstanding inputs
/// are replayed in sequence order; the rest are discarded.
pub fn reconcile(
    correction: StateCorrection,
    confirmed: &mut ConfirmedState,
    predictions: &mut PredictionStore,
    local: Option<&PlayerInfo>,
    now: Timestamp,
) -> ReconcileReport {
    let StateCorrection {
        corrected_state,
        pending_inputs,
        last_processed_sequence,
    } = correction;

    confirmed.replace_all(corrected_state);
    let held = predictions.take_pending();

    let listed: BTreeMap<Sequence, _> = pending_inputs
        .into_iter()
        .map(|echo| (echo.sequence, echo.input))
        .collect();
    let horizon = listed
        .keys()
        .next_back()
        .copied()
        .into_iter()
        .chain(last_processed_sequence)
        .max()
        .unwrap_or(0);

    let mut report = ReconcileReport::default();
    let mut replay: BTreeMap<Sequence, (Intent, Timestamp)> = BTreeMap::new();

    for input in held {
        if listed.contains_key(&input.sequence) || input.sequence > horizon {
            replay.insert(input.sequence, (input.intent, input.created_at));
        } else {
            report.discarded.push(input.sequence);
        }
    }

    let (player_id, player_name) = local
        .map(|p| (p.id.as_str(), p.name.as_str()))
        .unwrap_or_default();
    for (sequence, echoed) in listed {
        if replay.contains_key(&sequence) {
            continue;
        }
        let Some(intent) = echoed
            .as_ref()
            .and_then(|message| Intent::from_message(message, player_id, player_name))
        else {
            debug!(sequence, "listed input has no usable echo");
            continue;
        };
        replay.insert(sequence, (intent, now));
        report.restored.push(sequence);
    }

    for (sequence, (intent, created_at)) in replay {
        predictions.insert_intent(sequence, intent, confirmed.snapshot(), created_at);
        report.replayed.push(sequence);
    }

    info!(
        replayed = report.replayed.len(),
        discarded = report.discarded.len(),
        restored = report.restored.len(),
        "state corrected"
    );
    report
}

/// Adopt an authoritative snapshot and drop every prediction.
pub fn resync(state: GameState, confirmed: &mut ConfirmedState, predictions: &mut PredictionStore) {
    confirmed.replace_all(state);
    predictions.clear();
    info!("full state sync applied");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vtt_net::{Category, ClientMessage, PendingInputEcho, Position, Record, TokenMove};

    fn move_token(id: &str, x: f64) -> Intent {
        Intent::MoveToken {
            token_id: id.into(),
            position: Position::new(x, 0.0),
            is_dragging: false,
            velocity: None,
        }
    }

    fn token_state(id: &str, x: f64) -> GameState {
        let mut state = GameState::new();
        let record: Record = json!({"position": {"x": x, "y": 0.0}, "name": "Bat"})
            .as_object()
            .cloned()
            .unwrap();
        state.entry(Category::Tokens).or_default().insert(id.into(), record);
        state
    }

    fn correction(state: GameState, listed: &[Sequence], last: Option<Sequence>) -> StateCorrection {
        StateCorrection {
            corrected_state: state,
            pending_inputs: listed
                .iter()
                .map(|&sequence| PendingInputEcho { sequence, input: None })
                .collect(),
            last_processed_sequence: last,
        }
    }

    #[test]
    fn test_replays_outstanding_on_new_baseline() {
        let mut confirmed = ConfirmedState::new();
        let mut store = PredictionStore::default();
        let s1 = store.predict_intent(move_token("t1", 1.0), confirmed.snapshot(), 0);
        let s2 = store.predict_intent(move_token("t1", 2.0), confirmed.snapshot(), 0);

        let report = reconcile(
            correction(token_state("t1", 0.5), &[], Some(s1)),
            &mut confirmed,
            &mut store,
            None,
            10,
        );

        assert_eq!(report.discarded, [s1]);
        assert_eq!(report.replayed, [s2]);
        let view = store.view(confirmed.snapshot());
        let token = &view[&Category::Tokens]["t1"];
        assert_eq!(token["position"]["x"], 2.0);
        assert_eq!(token["name"], "Bat");
    }

    #[test]
    fn test_listed_inputs_survive_even_below_horizon() {
        let mut confirmed = ConfirmedState::new();
        let mut store = PredictionStore::default();
        let s1 = store.predict_intent(move_token("a", 1.0), confirmed.snapshot(), 0);
        let s2 = store.predict_intent(move_token("b", 1.0), confirmed.snapshot(), 0);
        let s3 = store.predict_intent(move_token("c", 1.0), confirmed.snapshot(), 0);

        let report = reconcile(
            correction(GameState::new(), &[s1, s3], None),
            &mut confirmed,
            &mut store,
            None,
            10,
        );
        assert_eq!(report.replayed, [s1, s3]);
        assert_eq!(report.discarded, [s2]);
    }

    #[test]
    fn test_restores_echoed_input_client_lost() {
        let mut confirmed = ConfirmedState::new();
        let mut store = PredictionStore::default();
        let echo = PendingInputEcho {
            sequence: 4,
            input: Some(ClientMessage::TokenMoved(TokenMove {
                token_id: "t9".into(),
                position: Position::new(6.0, 6.0),
                is_dragging: false,
                velocity: None,
                sequence: 4,
                timestamp: 1,
            })),
        };
        let fix = StateCorrection {
            corrected_state: GameState::new(),
            pending_inputs: vec![echo],
            last_processed_sequence: Some(3),
        };

        let report = reconcile(fix, &mut confirmed, &mut store, None, 10);
        assert_eq!(report.restored, [4]);
        assert!(store.is_pending(4));
        let view = store.view(confirmed.snapshot());
        assert_eq!(view[&Category::Tokens]["t9"]["position"]["x"], 6.0);
    }

    #[test]
    fn test_repeated_corrections_converge() {
        let mut confirmed = ConfirmedState::new();
        let mut store = PredictionStore::default();
        store.predict_intent(move_token("t1", 3.0), confirmed.snapshot(), 0);

        reconcile(correction(token_state("t1", 1.0), &[], None), &mut confirmed, &mut store, None, 5);
        let first = store.view(confirmed.snapshot());
        reconcile(correction(token_state("t1", 1.0), &[], None), &mut confirmed, &mut store, None, 6);
        assert_eq!(store.view(confirmed.snapshot()), first);
    }

    #[test]
    fn test_resync_drops_predictions() {
        let mut confirmed = ConfirmedState::new();
        let mut store = PredictionStore::default();
        store.predict_intent(move_token("t1", 3.0), confirmed.snapshot(), 0);

        resync(token_state("t1", 1.0), &mut confirmed, &mut store);
        assert!(store.is_empty());
        assert_eq!(store.pending().count(), 0);
        assert_eq!(confirmed.get(Category::Tokens, "t1").unwrap()["position"]["x"], 1.0);
    }
}
