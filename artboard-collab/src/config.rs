use std::time::Duration;

/// Timing and buffering knobs for the sync runtime.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Quiet period after the last change notification before a page is
    /// revalidated.
    pub feed_debounce: Duration,
    /// How long a follower buffers view state after a page change.
    pub follow_settle: Duration,
    /// Buffer size of broadcast channels (cache updates, presence events).
    pub event_capacity: usize,
    /// Buffer size of the follow action queue.
    pub action_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            feed_debounce: Duration::from_millis(100),
            follow_settle: Duration::from_millis(100),
            event_capacity: 256,
            action_capacity: 64,
        }
    }
}
