// Engine tuning knobs. The defaults mirror the production client; tests dial
// the intervals down to keep wall-clock time reasonable.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How often the authoritative feed is re-fetched for the open conversation.
    pub feed_poll_interval: Duration,
    /// How often the remote typing-user set is re-fetched.
    pub presence_poll_interval: Duration,
    /// How long after the last keystroke the local typing state expires.
    pub typing_timeout: Duration,
    /// Grace period between a successful feed load and its mark-read call,
    /// so the receipt never races the render of freshly fetched messages.
    pub read_receipt_grace: Duration,
    /// Capacity of the update channel handed to the embedding UI.
    pub update_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            feed_poll_interval: Duration::from_secs(20),
            presence_poll_interval: Duration::from_secs(5),
            typing_timeout: Duration::from_secs(3),
            read_receipt_grace: Duration::from_millis(500),
            update_capacity: 100,
        }
    }
}
