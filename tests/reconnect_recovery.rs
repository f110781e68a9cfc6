//! Exercises the recovery controller with its real configured timings
//! (not a unit test's millisecond-scale `fast_config`), under a paused
//! tokio clock so the wall-clock assertion is exact without the test
//! actually sleeping for seconds.

use std::sync::Arc;
use std::time::Duration;

use peershare_core::event::MemorySink;
use peershare_core::recovery::{RecoveryConfig, RecoveryController, RecoveryOutcome};
use peershare_core::time::FakeClock;
use peershare_core::transport::memory::{ChannelPair, ChannelPairConfig};
use peershare_core::transport::Transport;

#[tokio::test(start_paused = true)]
async fn ice_restart_recovery_completes_within_fifteen_seconds() {
    let (a, _b) = ChannelPair::new(ChannelPairConfig::default());
    // The in-memory transport reports `Connected` as soon as it isn't
    // closed, standing in for a restart that succeeds on its first try.
    let transport: Arc<dyn Transport> = Arc::new(a);
    let clock = Arc::new(FakeClock::new(0));
    let sink = Arc::new(MemorySink::new());
    let mut controller =
        RecoveryController::new(transport, clock, sink.clone(), true, RecoveryConfig::default());

    let started = tokio::time::Instant::now();
    let outcome = controller.handle_disconnect().await;
    let elapsed = started.elapsed();

    assert_eq!(outcome, RecoveryOutcome::Recovered);
    assert!(
        elapsed <= Duration::from_millis(15_000),
        "recovery took {elapsed:?}, exceeding the 15s budget"
    );
    assert_eq!(
        sink.event_names(),
        vec!["ice_disconnected_grace_start", "ice_connected_after_recovery"]
    );
}

#[tokio::test(start_paused = true)]
async fn exhausted_recovery_surfaces_failed_without_hanging() {
    let (a, _b) = ChannelPair::new(ChannelPairConfig::default());
    a.close().await;
    let transport: Arc<dyn Transport> = Arc::new(a);
    let clock = Arc::new(FakeClock::new(0));
    let sink = Arc::new(MemorySink::new());
    let mut controller =
        RecoveryController::new(transport, clock, sink.clone(), true, RecoveryConfig::default());

    let outcome = controller.handle_disconnect().await;
    assert_eq!(outcome, RecoveryOutcome::Failed);
    assert_eq!(sink.event_names().first().map(String::as_str), Some("ice_disconnected_grace_start"));
}
