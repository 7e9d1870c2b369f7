use tracing::debug;

use crate::action::{ActionKind, ConfigurationAction};

/// Pending edits, at most one per (output, kind).
///
/// Order carries no meaning; actions are grouped by output when a layout is
/// calculated.
#[derive(Debug, Default, Clone)]
pub struct ActionQueue {
    actions: Vec<ConfigurationAction>,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an action, replacing any earlier action of the same kind for
    /// the same output.
    ///
    /// Turning an output off drops every other pending action for that
    /// output. Only one output can be requested primary, so a primary action
    /// evicts the primary request of any other output.
    pub fn add(&mut self, action: ConfigurationAction) {
        if action.is_off() {
            self.actions.retain(|a| a.output() != action.output());
        } else {
            self.remove(action.output(), action.kind());
        }

        if action.kind() == ActionKind::Primary {
            self.actions.retain(|a| a.kind() != ActionKind::Primary);
        }

        debug!(
            output = %action.output(),
            kind = ?action.kind(),
            "queued action"
        );
        self.actions.push(action);
    }

    /// Removes the pending action of `kind` for `output`. Returns whether one
    /// was queued.
    pub fn remove(&mut self, output: &str, kind: ActionKind) -> bool {
        let before = self.actions.len();
        self.actions
            .retain(|a| !(a.output() == output && a.kind() == kind));
        before != self.actions.len()
    }

    pub fn reset(&mut self) {
        self.actions.clear();
    }

    pub fn actions(&self) -> &[ConfigurationAction] {
        &self.actions
    }

    pub fn for_output<'a>(
        &'a self,
        output: &'a str,
    ) -> impl Iterator<Item = &'a ConfigurationAction> + 'a {
        self.actions.iter().filter(move |a| a.output() == output)
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionChange;

    #[test]
    fn test_same_kind_keeps_latest() {
        let mut queue = ActionQueue::new();
        queue.add(ConfigurationAction::scale("A", 1.5));
        queue.add(ConfigurationAction::scale("A", 2.0));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.actions()[0].change(), &ActionChange::Scale(2.0));
    }

    #[test]
    fn test_different_outputs_do_not_replace() {
        let mut queue = ActionQueue::new();
        queue.add(ConfigurationAction::scale("A", 1.5));
        queue.add(ConfigurationAction::scale("B", 2.0));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_single_primary() {
        let mut queue = ActionQueue::new();
        queue.add(ConfigurationAction::primary("A"));
        queue.add(ConfigurationAction::primary("B"));
        let primaries: Vec<_> = queue
            .actions()
            .iter()
            .filter(|a| a.kind() == ActionKind::Primary)
            .collect();
        assert_eq!(primaries.len(), 1);
        assert_eq!(primaries[0].output(), "B");
    }

    #[test]
    fn test_off_clears_only_that_output() {
        let mut queue = ActionQueue::new();
        queue.add(ConfigurationAction::scale("A", 1.5));
        queue.add(ConfigurationAction::mode("A", 1920, 1080, 60.0));
        queue.add(ConfigurationAction::scale("B", 2.0));
        queue.add(ConfigurationAction::explicit_off("A"));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.for_output("A").count(), 1);
        assert!(queue.for_output("A").all(|a| a.is_off()));
        assert_eq!(queue.for_output("B").count(), 1);
    }

    #[test]
    fn test_on_replaces_off() {
        let mut queue = ActionQueue::new();
        queue.add(ConfigurationAction::explicit_off("A"));
        queue.add(ConfigurationAction::explicit_on("A"));
        assert_eq!(queue.len(), 1);
        assert!(!queue.actions()[0].is_off());
    }

    #[test]
    fn test_remove_and_reset() {
        let mut queue = ActionQueue::new();
        queue.add(ConfigurationAction::scale("A", 1.5));
        queue.add(ConfigurationAction::mirror_of("B", "A"));
        assert!(queue.remove("A", ActionKind::Scale));
        assert!(!queue.remove("A", ActionKind::Scale));
        assert_eq!(queue.len(), 1);
        queue.reset();
        assert!(queue.is_empty());
    }
}
