//! Runtime configuration.
//!
//! The reference implementation reads these knobs from URL query
//! parameters so a browser-hosted test harness can force deterministic
//! chunk sizes and backpressure behavior. Outside a browser that parsing
//! is the host's concern, not this crate's: `RuntimeOverrides` is a plain
//! struct a host builds from whatever key/value source it has (CLI flags,
//! environment, an actual URL) and hands to the engine.

use crate::backpressure::BackpressureMode;

/// Backpressure arbiter defaults and overrides (C5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackpressureConfig {
    /// Sender pauses once the transport's `bufferedAmount` exceeds this.
    pub max_buffered_amount: u64,
    /// `bufferedamountlow` fires once buffered bytes drop to this level.
    pub low_threshold: u64,
    /// How long to wait for a low-buffer event before downgrading to
    /// polling, in milliseconds.
    pub event_timeout_ms: u64,
    /// Sleep interval between `bufferedAmount` reads in polling mode, in
    /// milliseconds.
    pub poll_interval_ms: u64,
    /// Selected wait strategy.
    pub mode: BackpressureMode,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            max_buffered_amount: 12 * 1024 * 1024,
            low_threshold: 12 * 1024 * 1024,
            event_timeout_ms: 5_000,
            poll_interval_ms: 10,
            mode: BackpressureMode::Auto,
        }
    }
}

/// Adaptive chunk planner defaults and overrides (C2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlannerConfig {
    /// Starting chunk size before RTT/message-limit adjustment.
    pub base_chunk_size: u64,
    /// Floor for any planned chunk size.
    pub min_chunk_size: u64,
    /// Rounding granularity when clamping to a transport message limit.
    pub step: u64,
    /// How long a sampled RTT stays valid before the planner re-samples,
    /// in milliseconds.
    pub rtt_cache_ms: u64,
}

impl Default for ChunkPlannerConfig {
    fn default() -> Self {
        Self {
            base_chunk_size: 64 * 1024,
            min_chunk_size: 16 * 1024,
            step: 4 * 1024,
            rtt_cache_ms: 3_000,
        }
    }
}

/// Host-supplied overrides, equivalent to the reference implementation's
/// `ps*` URL query parameters. Every field is optional; an absent field
/// falls back to the corresponding config default.
///
/// Constructed from parsed `&str` key/value pairs by the host — this
/// crate does no URL parsing of its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeOverrides {
    /// `psBackpressureMode`.
    pub backpressure_mode: Option<BackpressureMode>,
    /// `psMaxBufferedAmount`, capped at 64 MiB by [`RuntimeOverrides::from_pairs`].
    pub max_buffered_amount: Option<u64>,
    /// `psLowThreshold`, capped at 64 MiB by [`RuntimeOverrides::from_pairs`].
    pub low_threshold: Option<u64>,
    /// `psForceMaxMessageSize`, floored at 16 KiB by
    /// [`RuntimeOverrides::from_pairs`].
    pub force_max_message_size: Option<u64>,
    /// `psForceRttMs`.
    pub force_rtt_ms: Option<u64>,
}

const MAX_OVERRIDE_BUFFERED_AMOUNT: u64 = 64 * 1024 * 1024;
const MIN_OVERRIDE_MESSAGE_SIZE: u64 = 16 * 1024;

impl RuntimeOverrides {
    /// Parses overrides out of a sequence of key/value pairs (e.g. the
    /// decoded query parameters of a test-harness URL). Unrecognized keys
    /// are ignored; malformed values for a recognized key are ignored
    /// rather than treated as fatal, since these are test-only knobs.
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut overrides = Self::default();
        for (key, value) in pairs {
            match key {
                "psBackpressureMode" => {
                    overrides.backpressure_mode = BackpressureMode::parse(value);
                }
                "psMaxBufferedAmount" => {
                    overrides.max_buffered_amount = value
                        .parse::<u64>()
                        .ok()
                        .filter(|v| *v > 0)
                        .map(|v| v.min(MAX_OVERRIDE_BUFFERED_AMOUNT));
                }
                "psLowThreshold" => {
                    overrides.low_threshold = value
                        .parse::<u64>()
                        .ok()
                        .filter(|v| *v > 0)
                        .map(|v| v.min(MAX_OVERRIDE_BUFFERED_AMOUNT));
                }
                "psForceMaxMessageSize" => {
                    overrides.force_max_message_size = value
                        .parse::<u64>()
                        .ok()
                        .filter(|v| *v > 0)
                        .map(|v| v.max(MIN_OVERRIDE_MESSAGE_SIZE));
                }
                "psForceRttMs" => {
                    overrides.force_rtt_ms = value.parse::<u64>().ok().filter(|v| *v > 0);
                }
                _ => {}
            }
        }
        overrides
    }

    /// Applies these overrides on top of a base backpressure config.
    pub fn apply_to_backpressure(&self, base: BackpressureConfig) -> BackpressureConfig {
        BackpressureConfig {
            max_buffered_amount: self.max_buffered_amount.unwrap_or(base.max_buffered_amount),
            low_threshold: self.low_threshold.unwrap_or(base.low_threshold),
            mode: self.backpressure_mode.unwrap_or(base.mode),
            ..base
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_caps_buffered_amount() {
        let overrides =
            RuntimeOverrides::from_pairs([("psMaxBufferedAmount", "999999999999")]);
        assert_eq!(
            overrides.max_buffered_amount,
            Some(MAX_OVERRIDE_BUFFERED_AMOUNT)
        );
    }

    #[test]
    fn overrides_floors_message_size() {
        let overrides = RuntimeOverrides::from_pairs([("psForceMaxMessageSize", "1000")]);
        assert_eq!(
            overrides.force_max_message_size,
            Some(MIN_OVERRIDE_MESSAGE_SIZE)
        );
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let overrides = RuntimeOverrides::from_pairs([("unrelated", "value")]);
        assert_eq!(overrides, RuntimeOverrides::default());
    }

    #[test]
    fn malformed_values_are_ignored_not_fatal() {
        let overrides = RuntimeOverrides::from_pairs([("psForceRttMs", "not-a-number")]);
        assert_eq!(overrides.force_rtt_ms, None);
    }

    #[test]
    fn apply_to_backpressure_overrides_selected_fields() {
        let overrides = RuntimeOverrides::from_pairs([
            ("psBackpressureMode", "polling"),
            ("psLowThreshold", "1024"),
        ]);
        let merged = overrides.apply_to_backpressure(BackpressureConfig::default());
        assert_eq!(merged.mode, BackpressureMode::Polling);
        assert_eq!(merged.low_threshold, 1024);
        assert_eq!(
            merged.max_buffered_amount,
            BackpressureConfig::default().max_buffered_amount
        );
    }
}
