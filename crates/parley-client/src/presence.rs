use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use uuid::Uuid;

use parley_types::events::{GatewayCommand, GatewayEvent};
use parley_types::models::{PresenceState, UserStatus};

/// Quiet period after the last keystroke before typing is reported stopped.
pub const TYPING_IDLE: Duration = Duration::from_millis(2500);

/// Debounces the local user's typing state for one channel. Each method
/// returns the command to send, if the state changed.
#[derive(Debug)]
pub struct TypingIndicator {
    channel_id: Uuid,
    last_keystroke: Option<Instant>,
}

impl TypingIndicator {
    pub fn new(channel_id: Uuid) -> Self {
        Self {
            channel_id,
            last_keystroke: None,
        }
    }

    pub fn is_typing(&self) -> bool {
        self.last_keystroke.is_some()
    }

    pub fn keystroke(&mut self, now: Instant) -> Option<GatewayCommand> {
        let started = self.last_keystroke.replace(now).is_none();
        started.then(|| self.command(true))
    }

    /// Call periodically; reports stopped once the idle period has passed.
    pub fn tick(&mut self, now: Instant) -> Option<GatewayCommand> {
        match self.last_keystroke {
            Some(last) if now.saturating_duration_since(last) >= TYPING_IDLE => {
                self.last_keystroke = None;
                Some(self.command(false))
            }
            _ => None,
        }
    }

    /// The message was sent or the input cleared.
    pub fn stop(&mut self) -> Option<GatewayCommand> {
        self.last_keystroke.take().map(|_| self.command(false))
    }

    fn command(&self, is_typing: bool) -> GatewayCommand {
        GatewayCommand::SetTyping {
            channel_id: self.channel_id,
            is_typing,
        }
    }
}

/// Who is typing where, as last reported by the gateway. Lossy: a missed
/// stop event leaves a user listed until their next update.
#[derive(Debug, Default)]
pub struct TypingRoster {
    typing: HashMap<Uuid, HashSet<Uuid>>,
}

impl TypingRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: &GatewayEvent) {
        let GatewayEvent::TypingUpdate {
            channel_id,
            user_id,
            is_typing,
        } = event
        else {
            return;
        };

        if *is_typing {
            self.typing.entry(*channel_id).or_default().insert(*user_id);
        } else if let Some(users) = self.typing.get_mut(channel_id) {
            users.remove(user_id);
            if users.is_empty() {
                self.typing.remove(channel_id);
            }
        }
    }

    /// Users typing in `channel_id`, excluding `me`.
    pub fn typing_in(&self, channel_id: Uuid, me: Uuid) -> Vec<Uuid> {
        let mut users: Vec<Uuid> = self
            .typing
            .get(&channel_id)
            .map(|set| set.iter().copied().filter(|id| *id != me).collect())
            .unwrap_or_default();
        users.sort();
        users
    }
}

/// The most recent presence snapshot.
#[derive(Debug, Default)]
pub struct PresenceRoster {
    users: HashMap<Uuid, PresenceState>,
}

impl PresenceRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the roster on every `PresenceSync`; other events are ignored.
    pub fn apply(&mut self, event: &GatewayEvent) {
        if let GatewayEvent::PresenceSync { users } = event {
            self.users = users.iter().map(|u| (u.user_id, u.clone())).collect();
        }
    }

    /// Users absent from the snapshot are offline.
    pub fn status_of(&self, user_id: Uuid) -> UserStatus {
        self.users
            .get(&user_id)
            .filter(|u| u.online)
            .map(|u| u.status)
            .unwrap_or(UserStatus::Offline)
    }

    pub fn online(&self) -> Vec<&PresenceState> {
        let mut online: Vec<&PresenceState> = self.users.values().filter(|u| u.online).collect();
        online.sort_by(|a, b| a.username.cmp(&b.username));
        online
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn typing_starts_once_and_clears_after_idle() {
        let channel_id = Uuid::new_v4();
        let start = Instant::now();
        let mut indicator = TypingIndicator::new(channel_id);

        assert_eq!(
            indicator.keystroke(start),
            Some(GatewayCommand::SetTyping { channel_id, is_typing: true })
        );
        assert_eq!(indicator.keystroke(start + Duration::from_secs(1)), None);

        // Idle is measured from the latest keystroke.
        assert_eq!(indicator.tick(start + Duration::from_millis(3000)), None);
        assert_eq!(
            indicator.tick(start + Duration::from_millis(3500)),
            Some(GatewayCommand::SetTyping { channel_id, is_typing: false })
        );
        assert!(!indicator.is_typing());
        assert_eq!(indicator.tick(start + Duration::from_secs(10)), None);
    }

    #[test]
    fn stop_reports_only_when_typing() {
        let mut indicator = TypingIndicator::new(Uuid::new_v4());
        assert_eq!(indicator.stop(), None);
        indicator.keystroke(Instant::now());
        assert!(matches!(
            indicator.stop(),
            Some(GatewayCommand::SetTyping { is_typing: false, .. })
        ));
    }

    #[test]
    fn roster_tracks_typing_per_channel() {
        let (channel_id, me, bob) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut roster = TypingRoster::new();
        let update = |user_id, is_typing| GatewayEvent::TypingUpdate {
            channel_id,
            user_id,
            is_typing,
        };

        roster.apply(&update(bob, true));
        roster.apply(&update(me, true));
        assert_eq!(roster.typing_in(channel_id, me), vec![bob]);
        assert!(roster.typing_in(Uuid::new_v4(), me).is_empty());

        roster.apply(&update(bob, false));
        assert!(roster.typing_in(channel_id, me).is_empty());
    }

    #[test]
    fn presence_snapshot_replaces_the_roster() {
        let state = |name: &str, online, status| PresenceState {
            user_id: Uuid::new_v4(),
            username: name.to_string(),
            online,
            status,
            last_seen: Utc::now(),
        };
        let alice = state("alice", true, UserStatus::Away);
        let bob = state("bob", false, UserStatus::Offline);

        let mut roster = PresenceRoster::new();
        roster.apply(&GatewayEvent::PresenceSync {
            users: vec![bob.clone(), alice.clone()],
        });
        assert_eq!(roster.status_of(alice.user_id), UserStatus::Away);
        assert_eq!(roster.status_of(bob.user_id), UserStatus::Offline);
        assert_eq!(roster.online(), vec![&alice]);

        roster.apply(&GatewayEvent::PresenceSync { users: vec![bob.clone()] });
        assert_eq!(roster.status_of(alice.user_id), UserStatus::Offline);
    }
}
