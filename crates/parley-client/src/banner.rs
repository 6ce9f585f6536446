use std::time::{Duration, Instant};

/// How long a failure stays visible before it clears itself.
pub const BANNER_DURATION: Duration = Duration::from_secs(3);

/// A single transient error line. A newer message replaces the old one and
/// restarts the clock.
#[derive(Debug, Default)]
pub struct ErrorBanner {
    current: Option<(String, Instant)>,
}

impl ErrorBanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn show(&mut self, message: impl Into<String>, now: Instant) {
        self.current = Some((message.into(), now));
    }

    /// The message to display at `now`, if it has not expired.
    pub fn current_at(&self, now: Instant) -> Option<&str> {
        match &self.current {
            Some((message, shown)) if now.saturating_duration_since(*shown) < BANNER_DURATION => {
                Some(message.as_str())
            }
            _ => None,
        }
    }

    pub fn current(&self) -> Option<&str> {
        self.current_at(Instant::now())
    }

    pub fn dismiss(&mut self) {
        self.current = None;
    }
}
