//! Bridge traffic counters
//!
//! Counters are relaxed atomics: they are diagnostics, not synchronization.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct BridgeStats {
    sent: AtomicU64,
    send_failures: AtomicU64,
    received: AtomicU64,
    parse_errors: AtomicU64,
    dispatched: AtomicU64,
    handler_errors: AtomicU64,
    request_timeouts: AtomicU64,
}

impl BridgeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handler_error(&self) {
        self.handler_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_request_timeout(&self) {
        self.request_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.sent.store(0, Ordering::Relaxed);
        self.send_failures.store(0, Ordering::Relaxed);
        self.received.store(0, Ordering::Relaxed);
        self.parse_errors.store(0, Ordering::Relaxed);
        self.dispatched.store(0, Ordering::Relaxed);
        self.handler_errors.store(0, Ordering::Relaxed);
        self.request_timeouts.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BridgeStatsSnapshot {
        BridgeStatsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            request_timeouts: self.request_timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`BridgeStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BridgeStatsSnapshot {
    /// Messages handed to the host channel successfully
    pub sent: u64,
    pub send_failures: u64,
    /// Well-formed inbound messages
    pub received: u64,
    /// Inbound payloads dropped as malformed
    pub parse_errors: u64,
    /// Messages popped from the queue and offered to handlers
    pub dispatched: u64,
    pub handler_errors: u64,
    pub request_timeouts: u64,
}
