//! Rate-limited publish gate.

use super::{SessionManager, Streams};
use log::{debug, info, warn};
use std::time::{Duration, Instant};

/// Result of a publish request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Published,
    /// Attempted and failed; the window is still consumed.
    Failed,
    /// Too soon after the previous attempt.
    Throttled,
    /// No transport or no session.
    NotConnected,
}

/// Allows at most one publish attempt per interval, and only while a session
/// is open.
#[derive(Debug)]
pub struct SessionPublisher {
    interval: Duration,
    last_attempt: Option<Instant>,
}

impl SessionPublisher {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_attempt: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether an attempt at `now` would pass the rate limit.
    pub fn window_open(&self, now: Instant) -> bool {
        match self.last_attempt {
            Some(at) => now.saturating_duration_since(at) >= self.interval,
            None => true,
        }
    }

    pub fn publish(
        &mut self,
        now: Instant,
        manager: &mut SessionManager,
        streams: &mut Streams<'_>,
        topic: &str,
        payload: &[u8],
    ) -> PublishOutcome {
        if !manager.is_open() {
            return PublishOutcome::NotConnected;
        }
        if !self.window_open(now) {
            return PublishOutcome::Throttled;
        }

        self.last_attempt = Some(now);
        match manager.publish(streams, topic, payload) {
            Ok(()) => {
                info!("Published {} bytes to {}", payload.len(), topic);
                PublishOutcome::Published
            }
            Err(e) => {
                warn!("Publish to {} failed: {}", topic, e);
                debug!("Next publish attempt in {:?}", self.interval);
                PublishOutcome::Failed
            }
        }
    }
}
