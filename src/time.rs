//! Injectable wall-clock access.
//!
//! The engine never calls `chrono`/`js_sys` directly — every timestamp comes
//! from a `Clock` collaborator, so recovery timers, session TTLs, and the
//! event envelope's `timestamp` field can be driven deterministically in
//! tests instead of racing real wall-clock time.

/// Source of the current time, expressed as milliseconds since the Unix
/// epoch.
///
/// On native platforms the production implementation is backed by
/// `chrono::Utc::now()`; on `wasm32` it is backed by `js_sys::Date::now()`,
/// since `std::time::SystemTime` is unavailable there.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;

    /// Current time in whole seconds since the Unix epoch.
    fn now_secs(&self) -> i64 {
        self.now_millis() / 1000
    }
}

/// Production clock backed by the platform's wall-clock source.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        #[cfg(target_arch = "wasm32")]
        {
            js_sys::Date::now() as i64
        }
        #[cfg(not(target_arch = "wasm32"))]
        {
            chrono::Utc::now().timestamp_millis()
        }
    }
}

/// Test double with an explicitly advanceable clock.
///
/// Shared via `Arc` so a test can hold a handle while the engine holds its
/// own `Arc<dyn Clock>` pointing at the same counter.
#[derive(Debug)]
pub struct FakeClock {
    millis: parking_lot::Mutex<i64>,
}

impl FakeClock {
    /// Creates a fake clock starting at the given Unix-epoch millisecond.
    pub fn new(start_millis: i64) -> Self {
        Self {
            millis: parking_lot::Mutex::new(start_millis),
        }
    }

    /// Advances the fake clock by `delta_ms` and returns the new value.
    pub fn advance(&self, delta_ms: i64) -> i64 {
        let mut guard = self.millis.lock();
        *guard += delta_ms;
        *guard
    }

    /// Sets the fake clock to an absolute millisecond value.
    pub fn set(&self, millis: i64) {
        *self.millis.lock() = millis;
    }
}

impl Clock for FakeClock {
    fn now_millis(&self) -> i64 {
        *self.millis.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_reasonable() {
        let ts = SystemClock.now_secs();
        assert!(ts > 1_704_067_200, "timestamp {ts} is too old");
        assert!(ts < 4_102_444_800, "timestamp {ts} is too far in the future");
    }

    #[test]
    fn fake_clock_advances_deterministically() {
        let clock = FakeClock::new(1_000);
        assert_eq!(clock.now_millis(), 1_000);
        assert_eq!(clock.advance(250), 1_250);
        assert_eq!(clock.now_millis(), 1_250);
        clock.set(5_000);
        assert_eq!(clock.now_millis(), 5_000);
    }
}
