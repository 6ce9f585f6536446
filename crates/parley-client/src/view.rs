use uuid::Uuid;

/// What the main pane shows. Only one of these at a time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ActiveView {
    #[default]
    Empty,
    Channel(Uuid),
    Direct(Uuid),
}

#[derive(Debug, Default)]
pub struct ViewState {
    workspace: Option<Uuid>,
    view: ActiveView,
}

impl ViewState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch workspace. Any open channel or conversation belongs to the old
    /// one, so the view is cleared.
    pub fn select_workspace(&mut self, workspace_id: Uuid) -> ActiveView {
        self.workspace = Some(workspace_id);
        std::mem::take(&mut self.view)
    }

    /// Show a channel, replacing whatever was shown. Returns the previous view.
    pub fn select_channel(&mut self, channel_id: Uuid) -> ActiveView {
        std::mem::replace(&mut self.view, ActiveView::Channel(channel_id))
    }

    /// Show the conversation with `user_id`. Returns the previous view.
    pub fn select_direct(&mut self, user_id: Uuid) -> ActiveView {
        std::mem::replace(&mut self.view, ActiveView::Direct(user_id))
    }

    pub fn clear(&mut self) -> ActiveView {
        std::mem::take(&mut self.view)
    }

    pub fn workspace(&self) -> Option<Uuid> {
        self.workspace
    }

    pub fn view(&self) -> ActiveView {
        self.view
    }

    pub fn channel(&self) -> Option<Uuid> {
        match self.view {
            ActiveView::Channel(id) => Some(id),
            _ => None,
        }
    }

    pub fn direct(&self) -> Option<Uuid> {
        match self.view {
            ActiveView::Direct(id) => Some(id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_and_direct_views_are_exclusive() {
        let (channel, user) = (Uuid::new_v4(), Uuid::new_v4());
        let mut state = ViewState::new();

        state.select_direct(user);
        let previous = state.select_channel(channel);
        assert_eq!(previous, ActiveView::Direct(user));
        assert_eq!(state.direct(), None);
        assert_eq!(state.channel(), Some(channel));

        state.select_direct(user);
        assert_eq!(state.channel(), None);
        assert_eq!(state.direct(), Some(user));
    }

    #[test]
    fn switching_workspace_clears_the_view() {
        let mut state = ViewState::new();
        state.select_channel(Uuid::new_v4());

        let workspace = Uuid::new_v4();
        state.select_workspace(workspace);
        assert_eq!(state.view(), ActiveView::Empty);
        assert_eq!(state.workspace(), Some(workspace));
    }
}
