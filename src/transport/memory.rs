//! In-memory `Transport` fake.
//!
//! Two [`ChannelPair`] ends are wired directly together with unbounded
//! channels, so control frames and chunk bytes delivered by one end are
//! immediately visible to the other. `buffered_amount` is a deliberately
//! simulated counter rather than a real measurement, which lets tests
//! force backpressure waits and low-buffer timeouts on demand — see
//! `set_buffered_amount_for_test` and `disable_low_buffer_event_for_test`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use crate::error::{Error, Result};
use crate::transport::{ConnectionState, IncomingFrame, Transport, TransportStats};

/// Configuration for a [`ChannelPair`], primarily for tests that need a
/// bounded `max_message_size`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelPairConfig {
    /// Maximum single-message size, if the test wants to exercise
    /// `MESSAGE_TOO_LARGE` handling.
    pub max_message_size: Option<u64>,
}

struct Shared {
    buffered_amount: AtomicU64,
    closed: AtomicBool,
    low_buffer_event_disabled: AtomicBool,
    low_buffer_notify: Notify,
    max_message_size: Option<u64>,
    stats: Mutex<TransportStats>,
}

/// One end of an in-memory, paired transport.
#[derive(Clone)]
pub struct ChannelPair {
    shared: Arc<Shared>,
    peer_shared: Arc<Shared>,
    outgoing: mpsc::UnboundedSender<IncomingFrame>,
    incoming: Arc<Mutex<mpsc::UnboundedReceiver<IncomingFrame>>>,
}

impl ChannelPair {
    /// Creates two ends wired directly to each other.
    pub fn new(config: ChannelPairConfig) -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();

        let shared_a = Arc::new(Shared::new(config));
        let shared_b = Arc::new(Shared::new(config));

        let a = Self {
            shared: shared_a.clone(),
            peer_shared: shared_b.clone(),
            outgoing: tx_b,
            incoming: Arc::new(Mutex::new(rx_a)),
        };
        let b = Self {
            shared: shared_b,
            peer_shared: shared_a,
            outgoing: tx_a,
            incoming: Arc::new(Mutex::new(rx_b)),
        };
        (a, b)
    }

    /// Forces the simulated `buffered_amount` to a specific value, for
    /// exercising backpressure waits deterministically.
    pub fn set_buffered_amount_for_test(&self, bytes: u64) {
        self.shared.buffered_amount.store(bytes, Ordering::SeqCst);
        if bytes == 0 {
            self.shared.low_buffer_notify.notify_waiters();
        }
    }

    /// Prevents the low-buffer event from ever firing, forcing any
    /// event-mode wait to time out and downgrade to polling.
    pub fn disable_low_buffer_event_for_test(&self) {
        self.shared
            .low_buffer_event_disabled
            .store(true, Ordering::SeqCst);
    }

    /// Sets the stats snapshot this end reports from `get_stats()`.
    pub fn set_stats_for_test(&self, stats: TransportStats) {
        *self.shared.stats.lock() = stats;
    }
}

impl Shared {
    fn new(config: ChannelPairConfig) -> Self {
        Self {
            buffered_amount: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            low_buffer_event_disabled: AtomicBool::new(false),
            low_buffer_notify: Notify::new(),
            max_message_size: config.max_message_size,
            stats: Mutex::new(TransportStats::default()),
        }
    }
}

#[async_trait]
impl Transport for ChannelPair {
    fn buffered_amount(&self) -> u64 {
        self.shared.buffered_amount.load(Ordering::SeqCst)
    }

    fn max_message_size(&self) -> Option<u64> {
        self.shared.max_message_size
    }

    fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst) || self.peer_shared.closed.load(Ordering::SeqCst)
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        if self.is_closed() {
            return Err(Error::DataChannelNotReady);
        }
        self.outgoing
            .send(IncomingFrame::Text(text.to_string()))
            .map_err(|_| Error::DataChannelSendFailed("peer channel dropped".into()))
    }

    async fn send_binary(&self, data: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(Error::DataChannelNotReady);
        }
        self.outgoing
            .send(IncomingFrame::Binary(data.to_vec()))
            .map_err(|_| Error::DataChannelSendFailed("peer channel dropped".into()))
    }

    async fn recv(&self) -> Option<IncomingFrame> {
        self.incoming.blocking_recv_compat_recv().await
    }

    async fn wait_for_buffered_amount_low(&self, threshold: u64) -> Result<()> {
        loop {
            if self.is_closed() {
                return Err(Error::DataChannelNotReady);
            }
            if self.buffered_amount() <= threshold {
                return Ok(());
            }
            if self.shared.low_buffer_event_disabled.load(Ordering::SeqCst) {
                // Never notify; the caller's own timeout governs how long
                // this hangs before it gives up and downgrades.
                std::future::pending::<()>().await
            } else {
                self.shared.low_buffer_notify.notified().await
            }
        }
    }

    async fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
    }

    async fn restart_ice(&self) -> Result<()> {
        Ok(())
    }

    fn get_stats(&self) -> TransportStats {
        *self.shared.stats.lock()
    }

    fn connection_state(&self) -> ConnectionState {
        if self.is_closed() {
            ConnectionState::Closed
        } else {
            ConnectionState::Connected
        }
    }
}

/// Adapter trait so `recv` can await a `Mutex`-guarded receiver without
/// holding the lock across the await point.
trait MutexReceiverExt<T> {
    fn blocking_recv_compat_recv(&self) -> RecvFuture<'_, T>;
}

impl<T> MutexReceiverExt<T> for Mutex<mpsc::UnboundedReceiver<T>> {
    fn blocking_recv_compat_recv(&self) -> RecvFuture<'_, T> {
        RecvFuture { mutex: self }
    }
}

struct RecvFuture<'a, T> {
    mutex: &'a Mutex<mpsc::UnboundedReceiver<T>>,
}

impl<'a, T> std::future::Future for RecvFuture<'a, T> {
    type Output = Option<T>;

    fn poll(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        self.mutex.lock().poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn paired_ends_deliver_frames_to_each_other() {
        let (a, b) = ChannelPair::new(ChannelPairConfig::default());
        a.send_text("hello").await.unwrap();
        match b.recv().await {
            Some(IncomingFrame::Text(text)) => assert_eq!(text, "hello"),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn closed_channel_rejects_sends() {
        let (a, _b) = ChannelPair::new(ChannelPairConfig::default());
        a.close().await;
        assert!(a.send_text("x").await.is_err());
    }

    #[tokio::test]
    async fn closing_one_end_is_observed_as_closed_by_the_other() {
        let (a, b) = ChannelPair::new(ChannelPairConfig::default());
        a.close().await;
        assert!(b.is_closed());
    }
}
