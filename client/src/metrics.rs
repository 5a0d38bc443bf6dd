//! Client metrics tracking.
//!
//! Provides atomic counters for monitoring the gateway connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Metrics for a socket client.
#[derive(Debug)]
pub struct ClientMetrics {
    /// Messages handed to the transport.
    messages_sent: AtomicU64,

    /// Messages queued while offline.
    messages_queued: AtomicU64,

    /// Queued messages evicted by the capacity bound.
    messages_dropped: AtomicU64,

    /// Frames received from the transport.
    frames_received: AtomicU64,

    /// Frames dropped because they could not be decoded.
    malformed_frames: AtomicU64,

    /// Handler invocations that failed.
    handler_failures: AtomicU64,

    /// Reconnect attempts scheduled.
    reconnect_attempts: AtomicU64,

    /// Connections opened.
    connections_opened: AtomicU64,

    /// Connections closed.
    connections_closed: AtomicU64,

    /// Start time for uptime calculation.
    start_time: Instant,
}

impl Default for ClientMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientMetrics {
    /// Creates a new metrics instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            messages_queued: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            malformed_frames: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
            reconnect_attempts: AtomicU64::new(0),
            connections_opened: AtomicU64::new(0),
            connections_closed: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Records a message sent.
    pub fn record_message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a message queued.
    pub fn record_message_queued(&self) {
        self.messages_queued.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a queued message evicted.
    pub fn record_message_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a frame received.
    pub fn record_frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a malformed frame.
    pub fn record_malformed_frame(&self) {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
    }

    /// Records failed handler invocations.
    pub fn record_handler_failures(&self, count: usize) {
        if count > 0 {
            self.handler_failures
                .fetch_add(count as u64, Ordering::Relaxed);
        }
    }

    /// Records a reconnect attempt.
    pub fn record_reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a connection opened.
    pub fn record_connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a connection closed.
    pub fn record_connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns messages sent.
    #[must_use]
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    /// Returns messages queued.
    #[must_use]
    pub fn messages_queued(&self) -> u64 {
        self.messages_queued.load(Ordering::Relaxed)
    }

    /// Returns messages dropped.
    #[must_use]
    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped.load(Ordering::Relaxed)
    }

    /// Returns frames received.
    #[must_use]
    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    /// Returns malformed frames.
    #[must_use]
    pub fn malformed_frames(&self) -> u64 {
        self.malformed_frames.load(Ordering::Relaxed)
    }

    /// Returns handler failures.
    #[must_use]
    pub fn handler_failures(&self) -> u64 {
        self.handler_failures.load(Ordering::Relaxed)
    }

    /// Returns reconnect attempts.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Returns connections opened.
    #[must_use]
    pub fn connections_opened(&self) -> u64 {
        self.connections_opened.load(Ordering::Relaxed)
    }

    /// Returns connections closed.
    #[must_use]
    pub fn connections_closed(&self) -> u64 {
        self.connections_closed.load(Ordering::Relaxed)
    }

    /// Returns the time since the metrics were created.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = ClientMetrics::new();
        assert_eq!(metrics.messages_sent(), 0);
        assert_eq!(metrics.messages_queued(), 0);
        assert_eq!(metrics.messages_dropped(), 0);
        assert_eq!(metrics.reconnect_attempts(), 0);
    }

    #[test]
    fn test_metrics_record() {
        let metrics = ClientMetrics::new();
        metrics.record_message_sent();
        metrics.record_message_sent();
        metrics.record_message_queued();
        metrics.record_message_dropped();
        metrics.record_frame_received();
        metrics.record_malformed_frame();
        metrics.record_reconnect_attempt();
        metrics.record_connection_opened();
        metrics.record_connection_closed();

        assert_eq!(metrics.messages_sent(), 2);
        assert_eq!(metrics.messages_queued(), 1);
        assert_eq!(metrics.messages_dropped(), 1);
        assert_eq!(metrics.frames_received(), 1);
        assert_eq!(metrics.malformed_frames(), 1);
        assert_eq!(metrics.reconnect_attempts(), 1);
        assert_eq!(metrics.connections_opened(), 1);
        assert_eq!(metrics.connections_closed(), 1);
    }

    #[test]
    fn test_metrics_handler_failures() {
        let metrics = ClientMetrics::new();
        metrics.record_handler_failures(0);
        assert_eq!(metrics.handler_failures(), 0);
        metrics.record_handler_failures(3);
        assert_eq!(metrics.handler_failures(), 3);
    }
}
