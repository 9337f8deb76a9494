use crate::action::{Action, ActionRepository, MotionItem};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// MotionRepository
// ---------------------------------------------------------------------------

/// The motions the device declared in its capability inventory. Actions and
/// sessions may reference motions missing from here; dispatching those would
/// hang forever since the device can never acknowledge them, so workers
/// pre-validate against this set.
#[derive(Default)]
pub struct MotionRepository {
    motions: RwLock<HashMap<String, MotionItem>>,
}

impl MotionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the device's motion inventory. Each new name also becomes a
    /// dispatchable `MotionItem` action in the action repository.
    pub fn add_motions(&self, names: &[String], actions: &ActionRepository) {
        let mut map = self.motions.write().expect("motion repository poisoned");
        for name in names {
            if map.contains_key(name) {
                continue;
            }
            let item = MotionItem {
                id: Uuid::new_v4(),
                group: Some("Remote".to_string()),
                delay: 0,
                name: name.clone(),
            };
            actions.add(Action::Motion(item.clone()));
            map.insert(name.clone(), item);
        }
    }

    pub fn known_by_id(&self, id: Uuid) -> bool {
        self.motions
            .read()
            .expect("motion repository poisoned")
            .values()
            .any(|m| m.id == id)
    }

    pub fn get_by_name(&self, name: &str) -> Option<MotionItem> {
        self.motions
            .read()
            .expect("motion repository poisoned")
            .get(name)
            .cloned()
    }

    pub fn all(&self) -> Vec<MotionItem> {
        let mut motions: Vec<MotionItem> = self
            .motions
            .read()
            .expect("motion repository poisoned")
            .values()
            .cloned()
            .collect();
        motions.sort_by(|a, b| a.name.cmp(&b.name));
        motions
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inventory_registers_dispatchable_actions() {
        let actions = ActionRepository::new();
        let motions = MotionRepository::new();
        motions.add_motions(&["wave".to_string(), "bow".to_string()], &actions);

        let wave = motions.get_by_name("wave").expect("wave registered");
        assert!(motions.known_by_id(wave.id));
        assert!(actions.get(wave.id).is_some());
        assert_eq!(motions.all().len(), 2);
    }

    #[test]
    fn duplicate_names_keep_the_first_id() {
        let actions = ActionRepository::new();
        let motions = MotionRepository::new();
        motions.add_motions(&["wave".to_string()], &actions);
        let first = motions.get_by_name("wave").unwrap().id;
        motions.add_motions(&["wave".to_string()], &actions);
        assert_eq!(motions.get_by_name("wave").unwrap().id, first);
    }

    #[test]
    fn unknown_id_is_not_known() {
        let motions = MotionRepository::new();
        assert!(!motions.known_by_id(Uuid::new_v4()));
    }
}
