//! Recovery controller (C8): grace period -> ICE restart -> full rebuild
//! with exponential backoff, plus a race-probe monitor that restarts ICE
//! when statistics suggest a materially better candidate pair exists.
//!
//! Timers are modeled as an owned [`Timers`] resource rather than ad-hoc
//! handles: dropping it cancels every outstanding sleep deterministically,
//! so a controller that's torn down mid-recovery never leaves a stray
//! timer task running.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::event::{EventEmitter, EventSink};
use crate::time::Clock;
use crate::transport::{ConnectionState, Transport};

/// Timing and attempt-count knobs for the recovery controller. Defaults
/// match the values named in the recovery state machine; tests override
/// them with millisecond-scale values to stay fast.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryConfig {
    pub grace_period_ms: u64,
    pub max_restart_ice_attempts: u32,
    pub restart_ice_settle_delay_ms: u64,
    pub max_rebuild_attempts: u32,
    pub backoff_base_ms: u64,
    pub max_backoff_ms: u64,
    pub recovery_grace_period_ms: u64,
    pub monitor_interval_ms: u64,
    pub high_rtt_ms: u64,
    pub improvement_threshold_ms: u64,
    pub max_probe_attempts: u32,
    /// Poll interval while the ICE-restart watchdog waits for
    /// `connection_state()` to report `Connected`.
    pub ice_restart_watchdog_poll_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 8_000,
            max_restart_ice_attempts: 2,
            restart_ice_settle_delay_ms: 100,
            max_rebuild_attempts: 3,
            backoff_base_ms: 2_000,
            max_backoff_ms: 15_000,
            recovery_grace_period_ms: 5_000,
            monitor_interval_ms: 5_000,
            high_rtt_ms: 800,
            improvement_threshold_ms: 120,
            max_probe_attempts: 1,
            ice_restart_watchdog_poll_ms: 50,
        }
    }
}

/// Computes the rebuild backoff for a 1-based attempt number, capped at
/// `max_backoff_ms`.
pub fn rebuild_backoff_ms(config: &RecoveryConfig, attempt: u32) -> u64 {
    let scaled = config.backoff_base_ms.saturating_mul(1u64 << attempt.saturating_sub(1));
    scaled.min(config.max_backoff_ms)
}

/// Current phase of the recovery state machine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecoveryPhase {
    Connected,
    WaitingGrace,
    RestartingIce,
    Rebuilding,
    /// Connection is back up; counters are not reset until observed
    /// connected again after `deadline` without another drop.
    RecentlyRecovered { deadline_millis: i64 },
    /// Rebuild attempts exhausted; this connection will not self-heal.
    Failed,
}

/// Outcome of driving the controller through one full recovery attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecoveryOutcome {
    /// The connection came back up.
    Recovered,
    /// A recovery was already in progress; this call was a no-op.
    AlreadyInProgress,
    /// Rebuild attempts were exhausted; the connection is terminal.
    Failed,
}

/// An owned collection of outstanding timer tasks. Dropping cancels every
/// one of them.
#[derive(Default)]
pub struct Timers {
    handles: Vec<JoinHandle<()>>,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears any handles that have already finished, to keep the
    /// collection from growing unbounded across a long connection's
    /// lifetime.
    fn reap_finished(&mut self) {
        self.handles.retain(|h| !h.is_finished());
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

/// Per-connection recovery state machine.
pub struct RecoveryController {
    config: RecoveryConfig,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
    is_initiator: bool,
    phase: RecoveryPhase,
    is_recovery_in_progress: bool,
    restart_ice_attempts: u32,
    rebuild_attempts: u32,
    probe_attempts: u32,
    best_observed_rtt_ms: Option<u64>,
    timers: Timers,
}

impl RecoveryController {
    pub fn new(
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn EventSink>,
        is_initiator: bool,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            config,
            transport,
            clock,
            sink,
            is_initiator,
            phase: RecoveryPhase::Connected,
            is_recovery_in_progress: false,
            restart_ice_attempts: 0,
            rebuild_attempts: 0,
            probe_attempts: 0,
            best_observed_rtt_ms: None,
            timers: Timers::new(),
        }
    }

    /// A short-lived emitter over this controller's clock and sink,
    /// built fresh per call so `RecoveryController` itself stays free of
    /// a borrowed-lifetime parameter.
    fn events(&self) -> EventEmitter<'_> {
        EventEmitter::new(&*self.clock, &*self.sink)
    }

    pub fn phase(&self) -> RecoveryPhase {
        self.phase
    }

    pub fn is_recovery_in_progress(&self) -> bool {
        self.is_recovery_in_progress
    }

    /// Observes an unmediated `Connected` state (not the product of a
    /// recovery attempt): resets counters immediately.
    pub fn on_unmediated_connected(&mut self) {
        self.phase = RecoveryPhase::Connected;
        self.restart_ice_attempts = 0;
        self.rebuild_attempts = 0;
        self.probe_attempts = 0;
    }

    /// Call periodically (or on every phase check) so a
    /// `RecentlyRecovered { deadline }` that has survived past its
    /// deadline flips to a fully reset `Connected`.
    pub fn observe_recovery_grace_elapsed(&mut self) {
        if let RecoveryPhase::RecentlyRecovered { deadline_millis } = self.phase {
            if self.clock.now_millis() >= deadline_millis {
                self.on_unmediated_connected();
            }
        }
    }

    /// Entry point on `disconnected`: runs grace -> ICE restart -> rebuild
    /// to completion (or exhaustion), per the recovery state machine.
    /// Overlapping calls while a recovery is already in progress are
    /// suppressed.
    pub async fn handle_disconnect(&mut self) -> RecoveryOutcome {
        if self.is_recovery_in_progress {
            return RecoveryOutcome::AlreadyInProgress;
        }
        self.is_recovery_in_progress = true;
        self.phase = RecoveryPhase::WaitingGrace;
        self.events().emit("ice_disconnected_grace_start", json!({}));

        tokio::time::sleep(Duration::from_millis(self.config.grace_period_ms)).await;
        self.timers.reap_finished();

        let outcome = self.run_restart_ice_then_rebuild().await;
        self.is_recovery_in_progress = false;
        outcome
    }

    async fn run_restart_ice_then_rebuild(&mut self) -> RecoveryOutcome {
        if self.is_initiator {
            while self.restart_ice_attempts < self.config.max_restart_ice_attempts {
                self.restart_ice_attempts += 1;
                self.phase = RecoveryPhase::RestartingIce;

                if self.transport.restart_ice().await.is_ok() {
                    tokio::time::sleep(Duration::from_millis(
                        self.config.restart_ice_settle_delay_ms,
                    ))
                    .await;
                    // The caller is expected to have renegotiated (new
                    // offer) by the time this watchdog elapses; it resolves
                    // as soon as the connection comes back, rather than
                    // always blocking for the full grace period.
                    if self
                        .wait_for_connected(self.config.grace_period_ms)
                        .await
                    {
                        return self.mark_recovered();
                    }
                } else if self.transport.connection_state() == ConnectionState::Connected {
                    return self.mark_recovered();
                }
            }
        }

        self.run_rebuild().await
    }

    /// Polls `connection_state()` until it reports `Connected` or
    /// `timeout_ms` elapses. Uses `tokio::time::Instant` rather than the
    /// injected `Clock`, since this governs scheduling, not a recorded
    /// timestamp.
    async fn wait_for_connected(&self, timeout_ms: u64) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            if self.transport.connection_state() == ConnectionState::Connected {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(
                self.config.ice_restart_watchdog_poll_ms,
            ))
            .await;
        }
    }

    async fn run_rebuild(&mut self) -> RecoveryOutcome {
        while self.rebuild_attempts < self.config.max_rebuild_attempts {
            self.rebuild_attempts += 1;
            self.phase = RecoveryPhase::Rebuilding;

            let backoff = rebuild_backoff_ms(&self.config, self.rebuild_attempts);
            tokio::time::sleep(Duration::from_millis(backoff)).await;

            // The host is expected to fully re-initialize the peer
            // connection here and, if initiator, recreate the data
            // channel and send a new offer.
            if self.transport.connection_state() == ConnectionState::Connected {
                return self.mark_recovered();
            }
        }

        self.phase = RecoveryPhase::Failed;
        RecoveryOutcome::Failed
    }

    fn mark_recovered(&mut self) -> RecoveryOutcome {
        let deadline = self.clock.now_millis() + self.config.recovery_grace_period_ms as i64;
        self.phase = RecoveryPhase::RecentlyRecovered {
            deadline_millis: deadline,
        };
        self.events().emit("ice_connected_after_recovery", json!({}));
        RecoveryOutcome::Recovered
    }

    /// Runs one race-probe check: if connected, the initiator, and
    /// statistics show the selected pair is materially worse than the
    /// best observed, triggers an ICE restart (bounded by
    /// `max_probe_attempts` for this connection's lifetime).
    ///
    /// Returns `true` if a restart was triggered.
    pub async fn check_race_probe(&mut self) -> Result<bool> {
        if !self.is_initiator || self.probe_attempts >= self.config.max_probe_attempts {
            return Ok(false);
        }
        if self.transport.connection_state() != ConnectionState::Connected {
            return Ok(false);
        }

        let stats = self.transport.get_stats();
        if let Some(best) = stats.best_observed_rtt_ms {
            self.best_observed_rtt_ms = Some(
                self.best_observed_rtt_ms
                    .map_or(best, |current| current.min(best)),
            );
        }

        let Some(selected) = stats.selected_rtt_ms else {
            return Ok(false);
        };
        let Some(best) = self.best_observed_rtt_ms else {
            return Ok(false);
        };

        if selected >= self.config.high_rtt_ms
            && selected.saturating_sub(best) >= self.config.improvement_threshold_ms
        {
            self.probe_attempts += 1;
            self.transport.restart_ice().await.map_err(|_| Error::DataChannelNotReady)?;
            return Ok(true);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::MemorySink;
    use crate::time::FakeClock;
    use crate::transport::memory::{ChannelPair, ChannelPairConfig};
    use crate::transport::TransportStats;

    fn fast_config() -> RecoveryConfig {
        RecoveryConfig {
            grace_period_ms: 1,
            restart_ice_settle_delay_ms: 1,
            backoff_base_ms: 1,
            max_backoff_ms: 2,
            recovery_grace_period_ms: 1_000,
            ..RecoveryConfig::default()
        }
    }

    #[test]
    fn rebuild_backoff_doubles_and_caps() {
        let config = RecoveryConfig::default();
        assert_eq!(rebuild_backoff_ms(&config, 1), 2_000);
        assert_eq!(rebuild_backoff_ms(&config, 2), 4_000);
        assert_eq!(rebuild_backoff_ms(&config, 3), 8_000);
        assert_eq!(rebuild_backoff_ms(&config, 4), 15_000);
    }

    #[tokio::test]
    async fn recovers_once_transport_reports_connected() {
        let (a, _b) = ChannelPair::new(ChannelPairConfig::default());
        let transport: Arc<dyn Transport> = Arc::new(a);
        let clock = Arc::new(FakeClock::new(0));
        let sink = Arc::new(MemorySink::new());
        let mut controller =
            RecoveryController::new(transport, clock, sink, true, fast_config());

        let outcome = controller.handle_disconnect().await;
        assert_eq!(outcome, RecoveryOutcome::Recovered);
        assert!(matches!(
            controller.phase(),
            RecoveryPhase::RecentlyRecovered { .. }
        ));
    }

    #[tokio::test]
    async fn disconnect_and_recovery_emit_bracketing_lifecycle_events() {
        let (a, _b) = ChannelPair::new(ChannelPairConfig::default());
        let transport: Arc<dyn Transport> = Arc::new(a);
        let clock = Arc::new(FakeClock::new(0));
        let sink = Arc::new(MemorySink::new());
        let mut controller =
            RecoveryController::new(transport, clock, sink.clone(), true, fast_config());

        let outcome = controller.handle_disconnect().await;
        assert_eq!(outcome, RecoveryOutcome::Recovered);

        let names = sink.event_names();
        assert_eq!(
            names,
            vec!["ice_disconnected_grace_start", "ice_connected_after_recovery"]
        );
    }

    #[tokio::test]
    async fn overlapping_disconnect_calls_are_suppressed() {
        let (a, _b) = ChannelPair::new(ChannelPairConfig::default());
        a.close().await;
        let transport: Arc<dyn Transport> = Arc::new(a);
        let clock = Arc::new(FakeClock::new(0));
        let sink = Arc::new(MemorySink::new());
        let mut controller =
            RecoveryController::new(transport, clock, sink, true, fast_config());

        controller.is_recovery_in_progress = true;
        let outcome = controller.handle_disconnect().await;
        assert_eq!(outcome, RecoveryOutcome::AlreadyInProgress);
    }

    #[tokio::test]
    async fn exhausting_rebuild_attempts_reaches_failed() {
        let (a, _b) = ChannelPair::new(ChannelPairConfig::default());
        a.close().await;
        let transport: Arc<dyn Transport> = Arc::new(a);
        let clock = Arc::new(FakeClock::new(0));
        let mut config = fast_config();
        config.max_restart_ice_attempts = 0;
        let sink = Arc::new(MemorySink::new());
        let mut controller = RecoveryController::new(transport, clock, sink, true, config);

        let outcome = controller.handle_disconnect().await;
        assert_eq!(outcome, RecoveryOutcome::Failed);
        assert_eq!(controller.phase(), RecoveryPhase::Failed);
    }

    #[test]
    fn recently_recovered_resets_once_deadline_elapses() {
        let (a, _b) = ChannelPair::new(ChannelPairConfig::default());
        let transport: Arc<dyn Transport> = Arc::new(a);
        let clock = Arc::new(FakeClock::new(1_000));
        let sink = Arc::new(MemorySink::new());
        let mut controller =
            RecoveryController::new(transport, clock.clone(), sink, true, fast_config());
        controller.phase = RecoveryPhase::RecentlyRecovered { deadline_millis: 2_000 };
        controller.restart_ice_attempts = 1;

        controller.observe_recovery_grace_elapsed();
        assert_eq!(controller.phase(), RecoveryPhase::RecentlyRecovered { deadline_millis: 2_000 });
        assert_eq!(controller.restart_ice_attempts, 1);

        clock.set(2_000);
        controller.observe_recovery_grace_elapsed();
        assert_eq!(controller.phase(), RecoveryPhase::Connected);
        assert_eq!(controller.restart_ice_attempts, 0);
    }

    #[tokio::test]
    async fn race_probe_triggers_restart_on_materially_worse_pair() {
        let (a, _b) = ChannelPair::new(ChannelPairConfig::default());
        a.set_stats_for_test(TransportStats {
            selected_rtt_ms: Some(900),
            best_observed_rtt_ms: Some(700),
        });
        let transport: Arc<dyn Transport> = Arc::new(a);
        let clock = Arc::new(FakeClock::new(0));
        let sink = Arc::new(MemorySink::new());
        let mut controller =
            RecoveryController::new(transport, clock, sink, true, fast_config());

        let triggered = controller.check_race_probe().await.unwrap();
        assert!(triggered);
        assert_eq!(controller.probe_attempts, 1);

        // Bounded at `max_probe_attempts` (1) for this connection.
        let triggered_again = controller.check_race_probe().await.unwrap();
        assert!(!triggered_again);
    }

    #[tokio::test]
    async fn race_probe_does_not_trigger_below_high_rtt_threshold() {
        let (a, _b) = ChannelPair::new(ChannelPairConfig::default());
        a.set_stats_for_test(TransportStats {
            selected_rtt_ms: Some(300),
            best_observed_rtt_ms: Some(100),
        });
        let transport: Arc<dyn Transport> = Arc::new(a);
        let clock = Arc::new(FakeClock::new(0));
        let sink = Arc::new(MemorySink::new());
        let mut controller =
            RecoveryController::new(transport, clock, sink, true, fast_config());

        assert!(!controller.check_race_probe().await.unwrap());
    }
}
