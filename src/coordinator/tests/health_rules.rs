use crate::error::CoreResult;
use crate::statistics::{MetricIndex, StatisticsSnapshot};

use super::super::health::HealthMonitor;
use super::super::listener::StopReason;
use super::check;

fn error_heavy() -> StatisticsSnapshot {
    StatisticsSnapshot::new()
        .with(MetricIndex::TIMED_TESTS, 4.0)
        .with(MetricIndex::ERRORS, 6.0)
}

fn healthy() -> StatisticsSnapshot {
    StatisticsSnapshot::new()
        .with(MetricIndex::TIMED_TESTS, 100.0)
        .with(MetricIndex::ERRORS, 1.0)
}

#[test]
fn too_many_errors_fires_once_after_sustained_window() -> CoreResult<()> {
    let index = MetricIndex::new();
    let mut monitor = HealthMonitor::new();
    let snapshot = error_heavy();

    check(
        monitor
            .check_too_many_errors(&index, &snapshot, 1_000)
            .is_none(),
        "first tripped tick only arms the timer",
    )?;
    check(
        monitor
            .check_too_many_errors(&index, &snapshot, 10_999)
            .is_none(),
        "9,999 ms sustained does not fire",
    )?;
    check(
        monitor.check_too_many_errors(&index, &snapshot, 11_000)
            == Some(StopReason::TooManyErrors),
        "10,000 ms sustained fires",
    )?;
    check(
        monitor
            .check_too_many_errors(&index, &snapshot, 11_100)
            .is_none(),
        "timer resets after firing",
    )
}

#[test]
fn too_many_errors_never_trips_with_zero_executions() -> CoreResult<()> {
    let index = MetricIndex::new();
    let mut monitor = HealthMonitor::new();
    let empty = StatisticsSnapshot::new();
    check(
        monitor.check_too_many_errors(&index, &empty, 1_000).is_none(),
        "no executions, no signal",
    )?;
    check(
        monitor
            .check_too_many_errors(&index, &empty, 100_000)
            .is_none(),
        "still no signal much later",
    )
}

#[test]
fn too_many_errors_timer_resets_when_ratio_recovers() -> CoreResult<()> {
    let index = MetricIndex::new();
    let mut monitor = HealthMonitor::new();
    check(
        monitor
            .check_too_many_errors(&index, &error_heavy(), 1_000)
            .is_none(),
        "armed",
    )?;
    check(
        monitor
            .check_too_many_errors(&index, &healthy(), 5_000)
            .is_none(),
        "recovery resets the timer",
    )?;
    // Re-tripping needs a fresh full window.
    check(
        monitor
            .check_too_many_errors(&index, &error_heavy(), 6_000)
            .is_none(),
        "re-armed",
    )?;
    check(
        monitor
            .check_too_many_errors(&index, &error_heavy(), 15_999)
            .is_none(),
        "window measured from re-arm",
    )?;
    check(
        monitor.check_too_many_errors(&index, &error_heavy(), 16_000)
            == Some(StopReason::TooManyErrors),
        "fires after the fresh window",
    )
}

#[test]
fn too_low_tps_fires_once_per_excursion() -> CoreResult<()> {
    let mut monitor = HealthMonitor::new();
    check(
        monitor.check_too_low_tps(0.0, 1_000).is_none(),
        "first low tick arms the timer",
    )?;
    check(
        monitor.check_too_low_tps(0.0, 60_999).is_none(),
        "59,999 ms sustained does not fire",
    )?;
    check(
        monitor.check_too_low_tps(0.0, 61_000) == Some(StopReason::TooLowTps),
        "60,000 ms sustained fires",
    )?;
    check(
        monitor.check_too_low_tps(0.0, 61_001).is_none(),
        "no immediate duplicate after the reset",
    )?;
    check(
        monitor.check_too_low_tps(0.0, 121_000).is_none(),
        "fresh window still filling",
    )?;
    check(
        monitor.check_too_low_tps(0.0, 121_001) == Some(StopReason::TooLowTps),
        "a full fresh window fires again",
    )
}

#[test]
fn too_low_tps_resets_on_recovery() -> CoreResult<()> {
    let mut monitor = HealthMonitor::new();
    check(monitor.check_too_low_tps(0.0, 1_000).is_none(), "armed")?;
    check(
        monitor.check_too_low_tps(5.0, 30_000).is_none(),
        "healthy throughput resets",
    )?;
    check(
        monitor.check_too_low_tps(0.0, 31_000).is_none(),
        "re-armed after recovery",
    )?;
    check(
        monitor.check_too_low_tps(0.0, 90_999).is_none(),
        "window measured from re-arm",
    )?;
    check(
        monitor.check_too_low_tps(0.0, 91_000) == Some(StopReason::TooLowTps),
        "fires after the fresh window",
    )
}

#[test]
fn tps_at_threshold_counts_as_healthy() -> CoreResult<()> {
    let mut monitor = HealthMonitor::new();
    check(
        monitor.check_too_low_tps(0.001, 1_000).is_none(),
        "threshold itself is healthy",
    )?;
    check(
        monitor.check_too_low_tps(0.0009, 2_000).is_none(),
        "below threshold arms",
    )?;
    check(
        monitor.check_too_low_tps(0.001, 3_000).is_none(),
        "healthy tick resets",
    )?;
    check(
        monitor.check_too_low_tps(0.0009, 100_000).is_none(),
        "reset means re-arming, not firing",
    )
}
