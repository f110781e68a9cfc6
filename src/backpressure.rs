//! Backpressure arbiter (C5).
//!
//! Bounds the sender's in-flight buffer by waiting for the transport's
//! outbound queue to drain before sending the next chunk. The primary path
//! is event-driven (the transport calls back once buffered bytes drop
//! below a threshold); a polling fallback exists for transports that can't
//! supply that event, or whose event registration fails.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::transport::Transport;

/// Selects which waiting strategy the arbiter uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressureMode {
    /// Always use the transport's low-buffer event.
    Event,
    /// Always poll `buffered_amount()`.
    Polling,
    /// Prefer the event path; fall back to polling permanently for this
    /// connection if the event never fires or registration fails.
    Auto,
}

impl BackpressureMode {
    /// Parses a mode name as used by `psBackpressureMode`. Returns `None`
    /// for anything else, rather than erroring — this is a best-effort
    /// test knob.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "event" => Some(Self::Event),
            "polling" => Some(Self::Polling),
            "auto" => Some(Self::Auto),
            _ => None,
        }
    }
}

/// The waiting strategy actually used for a given wait, as distinct from
/// the configured `BackpressureMode` (which may be `Auto`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservedMode {
    /// Resolved via the transport's low-buffer event.
    Event,
    /// Resolved by polling `buffered_amount()`.
    Polling,
}

use crate::config::BackpressureConfig;

/// Arbitrates waits for the transport's outbound buffer to drain.
///
/// Once a connection downgrades from `Auto`'s event path to polling (via
/// timeout or registration failure), it never attempts the event path
/// again for the lifetime of this arbiter — mirroring the reference
/// implementation's one-way fallback latch.
pub struct BackpressureArbiter {
    config: BackpressureConfig,
    downgraded_to_polling: bool,
    observed_event_mode: bool,
    mode_active_event_pending: bool,
}

impl BackpressureArbiter {
    /// Creates an arbiter with the given configuration.
    pub fn new(config: BackpressureConfig) -> Self {
        Self {
            config,
            downgraded_to_polling: false,
            observed_event_mode: false,
            mode_active_event_pending: false,
        }
    }

    /// Returns `true` exactly once, the first time after the event path
    /// resolves a wait: `true` if this is the first time `observed_event_mode`
    /// flipped to `true`, clearing the pending flag so the caller (which
    /// owns the `EventEmitter`) emits `backpressure_mode_active` once and
    /// only once for this arbiter's lifetime.
    pub fn take_mode_active_event(&mut self) -> bool {
        std::mem::take(&mut self.mode_active_event_pending)
    }

    /// The buffered-bytes threshold at which the engine should call
    /// [`BackpressureArbiter::wait`] at all, which differs from
    /// `max_buffered_amount` once the connection is in event mode.
    pub fn wait_threshold(&self) -> u64 {
        match self.effective_mode() {
            BackpressureMode::Polling => self.config.max_buffered_amount,
            _ => self
                .config
                .max_buffered_amount
                .max(self.config.low_threshold),
        }
    }

    fn effective_mode(&self) -> BackpressureMode {
        if self.downgraded_to_polling {
            BackpressureMode::Polling
        } else {
            self.config.mode
        }
    }

    /// Waits until the transport's `buffered_amount()` falls to or below
    /// `max_buffered_amount`, or fails with a recoverable error if the
    /// channel closes while waiting.
    ///
    /// Returns the strategy actually used to resolve the wait.
    pub async fn wait<T: Transport>(&mut self, transport: &T) -> Result<ObservedMode> {
        if transport.buffered_amount() <= self.config.max_buffered_amount {
            return Ok(ObservedMode::Event);
        }

        match self.effective_mode() {
            BackpressureMode::Polling => self.wait_polling(transport).await,
            BackpressureMode::Event | BackpressureMode::Auto => {
                match self.wait_event(transport).await {
                    Ok(mode) => Ok(mode),
                    Err(WaitEventFailure::TimedOut) | Err(WaitEventFailure::RegistrationFailed) => {
                        self.downgraded_to_polling = true;
                        self.wait_polling(transport).await
                    }
                    Err(WaitEventFailure::ChannelClosed) => {
                        Err(Error::DataChannelNotReady)
                    }
                }
            }
        }
    }

    async fn wait_event<T: Transport>(
        &mut self,
        transport: &T,
    ) -> std::result::Result<ObservedMode, WaitEventFailure> {
        let timeout = Duration::from_millis(self.config.event_timeout_ms);
        let wait_future = transport.wait_for_buffered_amount_low(self.config.low_threshold);
        match tokio::time::timeout(timeout, wait_future).await {
            Ok(Ok(())) => {
                if !self.observed_event_mode {
                    self.observed_event_mode = true;
                    self.mode_active_event_pending = true;
                }
                Ok(ObservedMode::Event)
            }
            Ok(Err(_)) => Err(WaitEventFailure::ChannelClosed),
            Err(_) => Err(WaitEventFailure::TimedOut),
        }
    }

    async fn wait_polling<T: Transport>(&self, transport: &T) -> Result<ObservedMode> {
        loop {
            if transport.is_closed() {
                return Err(Error::DataChannelNotReady);
            }
            if transport.buffered_amount() <= self.config.max_buffered_amount {
                return Ok(ObservedMode::Polling);
            }
            tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms)).await;
        }
    }

    /// Whether this arbiter has permanently fallen back to polling for
    /// its connection.
    pub fn is_downgraded_to_polling(&self) -> bool {
        self.downgraded_to_polling
    }
}

enum WaitEventFailure {
    TimedOut,
    RegistrationFailed,
    ChannelClosed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::ChannelPair;

    #[tokio::test]
    async fn wait_resolves_immediately_when_already_under_threshold() {
        let (a, _b) = ChannelPair::new(Default::default());
        let mut arbiter = BackpressureArbiter::new(BackpressureConfig::default());
        let mode = arbiter.wait(&a).await.unwrap();
        assert_eq!(mode, ObservedMode::Event);
    }

    #[tokio::test]
    async fn polling_mode_waits_for_buffer_to_drain() {
        let (a, _b) = ChannelPair::new(Default::default());
        a.set_buffered_amount_for_test(1_000_000);
        let config = BackpressureConfig {
            max_buffered_amount: 100,
            poll_interval_ms: 1,
            mode: BackpressureMode::Polling,
            ..BackpressureConfig::default()
        };
        let mut arbiter = BackpressureArbiter::new(config);

        let drain_handle = {
            let a = a.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                a.set_buffered_amount_for_test(0);
            })
        };

        let mode = arbiter.wait(&a).await.unwrap();
        assert_eq!(mode, ObservedMode::Polling);
        drain_handle.await.unwrap();
    }

    #[tokio::test]
    async fn event_timeout_downgrades_permanently_to_polling() {
        let (a, _b) = ChannelPair::new(Default::default());
        a.set_buffered_amount_for_test(1_000_000);
        a.disable_low_buffer_event_for_test();
        let config = BackpressureConfig {
            max_buffered_amount: 100,
            event_timeout_ms: 1,
            poll_interval_ms: 1,
            mode: BackpressureMode::Auto,
            ..BackpressureConfig::default()
        };
        let mut arbiter = BackpressureArbiter::new(config);

        let drain_handle = {
            let a = a.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                a.set_buffered_amount_for_test(0);
            })
        };

        arbiter.wait(&a).await.unwrap();
        drain_handle.await.unwrap();
        assert!(arbiter.is_downgraded_to_polling());
    }

    #[test]
    fn wait_threshold_differs_between_polling_and_event_mode() {
        let config = BackpressureConfig {
            max_buffered_amount: 100,
            low_threshold: 50,
            mode: BackpressureMode::Polling,
            ..BackpressureConfig::default()
        };
        let arbiter = BackpressureArbiter::new(config);
        assert_eq!(arbiter.wait_threshold(), 100);

        let config = BackpressureConfig {
            mode: BackpressureMode::Event,
            ..config
        };
        let arbiter = BackpressureArbiter::new(config);
        assert_eq!(arbiter.wait_threshold(), 100);
    }
}
