use crate::statistics::{MetricIndex, StatisticsSnapshot};

use super::listener::StopReason;

/// TPS below this value counts as "no throughput".
pub(in crate::coordinator) const TOO_LOW_TPS_THRESHOLD: f64 = 0.001;
/// How long throughput must stay below the threshold before a stop signal.
const TOO_LOW_TPS_TIME_MS: u64 = 60_000;
/// How long the error ratio must stay above one half before a stop signal.
const TOO_MANY_ERRORS_TIME_MS: u64 = 10_000;

/// Stateful health heuristics over aggregated tick values.
///
/// Both rules are edge-triggered: a signal fires once per sustained
/// excursion, then the timer resets and can only re-arm through a fresh
/// excursion. Timer value zero means "not tripped".
#[derive(Debug, Default)]
pub struct HealthMonitor {
    low_tps_since_ms: u64,
    high_error_since_ms: u64,
}

impl HealthMonitor {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            low_tps_since_ms: 0,
            high_error_since_ms: 0,
        }
    }

    /// Evaluate the low-throughput rule for one tick.
    pub fn check_too_low_tps(&mut self, tps: f64, now_ms: u64) -> Option<StopReason> {
        if tps < TOO_LOW_TPS_THRESHOLD {
            if self.low_tps_since_ms == 0 {
                self.low_tps_since_ms = now_ms;
            } else if now_ms.saturating_sub(self.low_tps_since_ms) >= TOO_LOW_TPS_TIME_MS {
                tracing::warn!(
                    "TPS below {} for more than {} ms; raising stop signal",
                    TOO_LOW_TPS_THRESHOLD,
                    TOO_LOW_TPS_TIME_MS
                );
                self.low_tps_since_ms = 0;
                return Some(StopReason::TooLowTps);
            }
        } else {
            self.low_tps_since_ms = 0;
        }
        None
    }

    /// Evaluate the high-error rule for one tick against the cumulative
    /// snapshot. An empty run (no executions yet) never trips the rule.
    pub fn check_too_many_errors(
        &mut self,
        index: &MetricIndex,
        cumulative: &StatisticsSnapshot,
        now_ms: u64,
    ) -> Option<StopReason> {
        let timed_tests = index.timed_tests(cumulative);
        let errors = index.errors(cumulative);
        let executions = timed_tests + errors;
        if executions > 0.0 && errors / executions > 0.5 {
            if self.high_error_since_ms == 0 {
                self.high_error_since_ms = now_ms;
            } else if now_ms.saturating_sub(self.high_error_since_ms) >= TOO_MANY_ERRORS_TIME_MS {
                tracing::warn!(
                    "Errors above half of executions for more than {} ms; raising stop signal",
                    TOO_MANY_ERRORS_TIME_MS
                );
                self.high_error_since_ms = 0;
                return Some(StopReason::TooManyErrors);
            }
        } else {
            self.high_error_since_ms = 0;
        }
        None
    }
}
