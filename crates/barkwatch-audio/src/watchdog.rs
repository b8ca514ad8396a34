use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Passive stall detector for the capture loop. The loop feeds it after
/// every successful device read; anyone may ask whether the feed has gone
/// quiet for longer than the timeout.
#[derive(Clone)]
pub struct WatchdogTimer {
    timeout: Duration,
    last_feed: Arc<RwLock<Option<Instant>>>,
}

impl WatchdogTimer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_feed: Arc::new(RwLock::new(None)),
        }
    }

    pub fn feed(&self) {
        *self.last_feed.write() = Some(Instant::now());
    }

    pub fn is_stalled(&self) -> bool {
        self.last_feed
            .read()
            .map(|t| t.elapsed() > self.timeout)
            .unwrap_or(false)
    }

    pub fn since_last_feed(&self) -> Option<Duration> {
        self.last_feed.read().map(|t| t.elapsed())
    }

    pub fn reset(&self) {
        *self.last_feed.write() = None;
    }
}
