use uuid::Uuid;

use parley_types::api::ReactionGroup;

/// Reactions on one message, grouped by emoji in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReactionSet {
    groups: Vec<ReactionGroup>,
}

impl ReactionSet {
    pub fn new(groups: Vec<ReactionGroup>) -> Self {
        Self { groups }
    }

    pub fn groups(&self) -> &[ReactionGroup] {
        &self.groups
    }

    pub fn into_groups(self) -> Vec<ReactionGroup> {
        self.groups
    }

    pub fn has_reacted(&self, user_id: Uuid, emoji: &str) -> bool {
        self.groups
            .iter()
            .any(|g| g.emoji == emoji && g.user_ids.contains(&user_id))
    }

    /// Record that `user_id`'s `emoji` is now present (`added`) or absent.
    /// Applying the same state twice changes nothing, so a local toggle and
    /// the gateway's echo of it can both be applied.
    pub fn apply(&mut self, user_id: Uuid, emoji: &str, added: bool) {
        let position = self.groups.iter().position(|g| g.emoji == emoji);

        match (position, added) {
            (Some(i), true) => {
                let group = &mut self.groups[i];
                if !group.user_ids.contains(&user_id) {
                    group.user_ids.push(user_id);
                    group.count = group.user_ids.len();
                }
            }
            (None, true) => self.groups.push(ReactionGroup {
                emoji: emoji.to_string(),
                count: 1,
                user_ids: vec![user_id],
            }),
            (Some(i), false) => {
                let group = &mut self.groups[i];
                group.user_ids.retain(|id| *id != user_id);
                group.count = group.user_ids.len();
                if group.user_ids.is_empty() {
                    self.groups.remove(i);
                }
            }
            (None, false) => {}
        }
    }
}

impl From<Vec<ReactionGroup>> for ReactionSet {
    fn from(groups: Vec<ReactionGroup>) -> Self {
        Self::new(groups)
    }
}
