//! Adaptive chunk planner (C2): picks a chunk size from measured RTT and
//! the transport's message-size limit, caching the RTT sample briefly so
//! the planner isn't re-querying transport stats on every chunk.

use crate::config::ChunkPlannerConfig;
use crate::time::Clock;

/// Why the planner picked the chunk size it did. The message-limit clamp
/// always dominates RTT adaptation when both apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanReason {
    /// No RTT sample and no binding message limit; used `base_chunk_size`.
    Default,
    /// RTT-based tiering selected a smaller size than the base.
    RttAdaptive,
    /// The transport's `maxMessageSize` forced a smaller size than either
    /// the base or the RTT tier would have chosen.
    MaxMessageSize,
}

/// The planner's decision for one chunk-size selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    pub chunk_size: u64,
    pub reason: PlanReason,
}

/// Caches a sampled RTT for `rtt_cache_ms` so the planner doesn't query
/// transport statistics on every chunk.
pub struct ChunkPlanner<'a> {
    config: ChunkPlannerConfig,
    clock: &'a dyn Clock,
    cached_rtt_ms: Option<u64>,
    cached_at_millis: Option<i64>,
}

impl<'a> ChunkPlanner<'a> {
    /// Creates a planner with the given configuration and clock.
    pub fn new(config: ChunkPlannerConfig, clock: &'a dyn Clock) -> Self {
        Self {
            config,
            clock,
            cached_rtt_ms: None,
            cached_at_millis: None,
        }
    }

    /// Samples an RTT, reusing the cached value if it is still within
    /// `rtt_cache_ms` of the last sample.
    pub fn sample_rtt(&mut self, measured_rtt_ms: Option<u64>) -> Option<u64> {
        let now = self.clock.now_millis();
        if let (Some(cached), Some(cached_at)) = (self.cached_rtt_ms, self.cached_at_millis) {
            if now - cached_at < self.config.rtt_cache_ms as i64 {
                return Some(cached);
            }
        }
        if let Some(rtt) = measured_rtt_ms {
            self.cached_rtt_ms = Some(rtt);
            self.cached_at_millis = Some(now);
        }
        self.cached_rtt_ms
    }

    /// Plans a chunk size given a (possibly cached) RTT sample and the
    /// transport's maximum message size, if known.
    pub fn plan(&mut self, measured_rtt_ms: Option<u64>, max_message_size: Option<u64>) -> ChunkPlan {
        let rtt = self.sample_rtt(measured_rtt_ms);

        let (mut size, mut reason) = match rtt {
            Some(rtt_ms) if rtt_ms <= 60 => (self.config.base_chunk_size, PlanReason::Default),
            Some(rtt_ms) if rtt_ms <= 140 => (
                self.config.base_chunk_size.min(48 * 1024),
                PlanReason::RttAdaptive,
            ),
            Some(rtt_ms) if rtt_ms <= 280 => (
                self.config.base_chunk_size.min(32 * 1024),
                PlanReason::RttAdaptive,
            ),
            Some(_) => (
                self.config.base_chunk_size.min(16 * 1024),
                PlanReason::RttAdaptive,
            ),
            None => (self.config.base_chunk_size, PlanReason::Default),
        };

        if let Some(limit) = max_message_size {
            let reserved = limit.saturating_sub(1024);
            let rounded = (reserved / self.config.step) * self.config.step;
            let clamped = rounded.max(self.config.min_chunk_size);
            if clamped < size {
                size = clamped;
                reason = PlanReason::MaxMessageSize;
            }
        }

        size = size.max(self.config.min_chunk_size);

        ChunkPlan {
            chunk_size: size,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::FakeClock;

    #[test]
    fn default_plan_uses_base_chunk_size_without_rtt_or_limit() {
        let clock = FakeClock::new(0);
        let mut planner = ChunkPlanner::new(ChunkPlannerConfig::default(), &clock);
        let plan = planner.plan(None, None);
        assert_eq!(plan.chunk_size, 64 * 1024);
        assert_eq!(plan.reason, PlanReason::Default);
    }

    #[test]
    fn rtt_tiers_cap_chunk_size() {
        let clock = FakeClock::new(0);
        let mut planner = ChunkPlanner::new(ChunkPlannerConfig::default(), &clock);

        assert_eq!(planner.plan(Some(50), None).chunk_size, 64 * 1024);
        clock.advance(4_000);
        assert_eq!(planner.plan(Some(100), None).chunk_size, 48 * 1024);
        clock.advance(4_000);
        assert_eq!(planner.plan(Some(200), None).chunk_size, 32 * 1024);
        clock.advance(4_000);
        assert_eq!(planner.plan(Some(400), None).chunk_size, 16 * 1024);
    }

    #[test]
    fn message_limit_clamp_dominates_and_floors_at_min() {
        let clock = FakeClock::new(0);
        let mut planner = ChunkPlanner::new(ChunkPlannerConfig::default(), &clock);
        let plan = planner.plan(None, Some(20_000));
        assert_eq!(plan.chunk_size, 16 * 1024);
        assert_eq!(plan.reason, PlanReason::MaxMessageSize);
    }

    #[test]
    fn rtt_sample_is_cached_within_window() {
        let clock = FakeClock::new(0);
        let mut planner = ChunkPlanner::new(ChunkPlannerConfig::default(), &clock);
        planner.plan(Some(400), None);
        clock.advance(1_000);
        // A fresh measurement of 50ms should be ignored; cache still valid.
        let plan = planner.plan(Some(50), None);
        assert_eq!(plan.chunk_size, 16 * 1024);

        clock.advance(3_000);
        let plan = planner.plan(Some(50), None);
        assert_eq!(plan.chunk_size, 64 * 1024);
    }
}
