//! The merged view: confirmed state with predicted patches laid on top.

use vtt_net::{GameState, Record};

use crate::prediction::PredictedPatch;

/// Overlay `fields` on `base`, field by field.
pub fn merge_record(base: Option<&Record>, fields: &Record) -> Record {
    let mut merged = base.cloned().unwrap_or_default();
    for (key, value) in fields {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Fold `patches` over `confirmed` in the order given.
///
/// Pass patches in sequence order so that the newest prediction for a field
/// wins. Neither input is modified.
pub fn merge<'a, I>(confirmed: &GameState, patches: I) -> GameState
where
    I: IntoIterator<Item = &'a PredictedPatch>,
{
    let mut view = confirmed.clone();
    for patch in patches {
        let entities = view.entry(patch.category).or_default();
        let merged = merge_record(entities.get(&patch.entity_id), &patch.fields);
        entities.insert(patch.entity_id.clone(), merged);
    }
    view
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vtt_net::Category;

    fn patch(sequence: u64, id: &str, fields: serde_json::Value) -> PredictedPatch {
        PredictedPatch {
            sequence,
            category: Category::Tokens,
            entity_id: id.to_string(),
            fields: fields.as_object().cloned().unwrap(),
            created_at: 0,
        }
    }

    fn confirmed() -> GameState {
        let mut state = GameState::new();
        state.entry(Category::Tokens).or_default().insert(
            "t1".into(),
            json!({"position": {"x": 0, "y": 0}, "name": "Goblin"})
                .as_object()
                .cloned()
                .unwrap(),
        );
        state
    }

    #[test]
    fn test_prediction_overrides_only_its_fields() {
        let base = confirmed();
        let patches = [patch(1, "t1", json!({"position": {"x": 3, "y": 4}}))];
        let view = merge(&base, &patches);

        let token = &view[&Category::Tokens]["t1"];
        assert_eq!(token["position"], json!({"x": 3, "y": 4}));
        assert_eq!(token["name"], "Goblin");
        assert_eq!(base[&Category::Tokens]["t1"]["position"], json!({"x": 0, "y": 0}));
    }

    #[test]
    fn test_later_patch_wins() {
        let patches = [
            patch(1, "t1", json!({"position": {"x": 1, "y": 1}})),
            patch(2, "t1", json!({"position": {"x": 2, "y": 2}})),
        ];
        let view = merge(&confirmed(), &patches);
        assert_eq!(view[&Category::Tokens]["t1"]["position"], json!({"x": 2, "y": 2}));
    }

    #[test]
    fn test_patch_on_unknown_entity_creates_it() {
        let view = merge(&GameState::new(), &[patch(1, "new", json!({"hp": 3}))]);
        assert_eq!(view[&Category::Tokens]["new"]["hp"], 3);
    }

    #[test]
    fn test_no_patches_is_identity() {
        let base = confirmed();
        assert_eq!(merge(&base, &Vec::<PredictedPatch>::new()), base);
    }
}
