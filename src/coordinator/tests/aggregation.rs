use std::sync::atomic::Ordering;

use crate::error::{CoreError, CoreResult};
use crate::model::Test;

use super::super::aggregator::SampleAggregator;
use super::super::listener::StopReason;
use super::super::tracker::ProcessCounts;
use super::{AggregatorFixture, aggregator_fixture, check, check_value, delta};

fn register_standard_views(aggregator: &mut SampleAggregator) -> CoreResult<()> {
    aggregator.register_view("TPS", "tps")?;
    aggregator.register_view("Tests", "timedTests")?;
    aggregator.register_view("Errors", "errors")?;
    aggregator.register_view("Peak_TPS", "peakTps")?;
    Ok(())
}

fn running_counts() -> ProcessCounts {
    ProcessCounts {
        running_process: 2,
        running_thread: 10,
        not_finished_process: 2,
    }
}

fn one_test(fixture: &mut AggregatorFixture) {
    fixture.aggregator.register_tests(&[Test {
        number: 1,
        description: "login".to_owned(),
    }]);
}

fn two_tests(fixture: &mut AggregatorFixture) {
    fixture.aggregator.register_tests(&[
        Test {
            number: 1,
            description: "login".to_owned(),
        },
        Test {
            number: 2,
            description: "check out".to_owned(),
        },
    ]);
}

#[test]
fn ticks_are_ignored_while_sampling_is_disabled() -> CoreResult<()> {
    let mut fixture = aggregator_fixture();
    register_standard_views(&mut fixture.aggregator)?;
    fixture.aggregator.on_report_statistics(
        &[delta(1, &[("timedTests", 5.0)])],
        10_000,
        running_counts(),
    )?;
    check(
        fixture.current_sample().is_none(),
        "nothing published while sampling is disabled",
    )
}

#[test]
fn warm_up_ticks_produce_no_output_and_are_not_counted() -> CoreResult<()> {
    let dir = tempfile::tempdir()?;
    let mut fixture = aggregator_fixture();
    register_standard_views(&mut fixture.aggregator)?;
    fixture
        .aggregator
        .set_report_directory(dir.path().to_path_buf());
    fixture.aggregator.start_sampling(2);
    one_test(&mut fixture);

    for now_ms in [10_000, 11_000] {
        fixture.aggregator.on_report_statistics(
            &[delta(1, &[("timedTests", 100.0), ("tps", 50.0)])],
            now_ms,
            running_counts(),
        )?;
    }
    check(
        fixture.current_sample().is_none(),
        "warm-up ticks publish nothing",
    )?;
    check(
        std::fs::read_dir(dir.path())?.next().is_none(),
        "warm-up ticks write nothing",
    )?;

    fixture.aggregator.on_report_statistics(
        &[delta(1, &[("timedTests", 5.0), ("tps", 5.0)])],
        12_000,
        running_counts(),
    )?;
    let sample = fixture
        .current_sample()
        .ok_or_else(|| CoreError::coordinator("first counted tick publishes"))?;
    let tests = sample.total_statistics.get("Tests").copied().unwrap_or(0.0);
    check_value(
        (tests - 5.0).abs() < f64::EPSILON,
        "warm-up deltas were discarded, not accumulated",
        format!("{}", tests),
    )?;
    check(
        dir.path().join("output.csv").exists(),
        "counted ticks write report lines",
    )
}

#[test]
fn csv_header_is_written_once_with_per_test_sections() -> CoreResult<()> {
    let dir = tempfile::tempdir()?;
    let mut fixture = aggregator_fixture();
    register_standard_views(&mut fixture.aggregator)?;
    fixture
        .aggregator
        .set_report_directory(dir.path().to_path_buf());
    fixture.aggregator.start_sampling(0);
    two_tests(&mut fixture);

    for now_ms in [10_000, 11_000, 12_000] {
        fixture.aggregator.on_report_statistics(
            &[
                delta(1, &[("timedTests", 2.0), ("tps", 2.0)]),
                delta(2, &[("timedTests", 3.0), ("tps", 3.0)]),
            ],
            now_ms,
            running_counts(),
        )?;
    }

    let csv = std::fs::read_to_string(dir.path().join("output.csv"))?;
    let mut lines = csv.lines();
    let header = lines
        .next()
        .ok_or_else(|| CoreError::coordinator("missing header"))?;
    check_value(
        header
            == "DateTime,TPS,Tests,Errors,\
                Description,TPS-0,Tests-0,Errors-0,Description,TPS-1,Tests-1,Errors-1",
        "header layout",
        header.to_owned(),
    )?;
    check(
        !lines.any(|line| line.starts_with("DateTime")),
        "header appears exactly once",
    )?;
    check(
        csv.lines().count() == 4,
        "header plus one row per reporting second",
    )?;
    check(
        dir.path().join("TPS-check_out.data").exists(),
        "per-test TPS files use normalized descriptions",
    )?;
    check(
        dir.path().join("Peak_TPS.data").exists(),
        "peak view still gets a data file",
    )?;
    check(
        !header.contains("Peak_TPS"),
        "peak view excluded from CSV columns",
    )
}

#[test]
fn delayed_ticks_backfill_one_line_per_elapsed_second() -> CoreResult<()> {
    let dir = tempfile::tempdir()?;
    let mut fixture = aggregator_fixture();
    register_standard_views(&mut fixture.aggregator)?;
    fixture
        .aggregator
        .set_report_directory(dir.path().to_path_buf());
    fixture.aggregator.start_sampling(0);
    one_test(&mut fixture);

    fixture.aggregator.on_report_statistics(
        &[delta(1, &[("tps", 4.0)])],
        10_000,
        running_counts(),
    )?;
    // 3.5 seconds of jitter: three whole-second boundaries crossed.
    fixture.aggregator.on_report_statistics(
        &[delta(1, &[("tps", 6.0)])],
        13_500,
        running_counts(),
    )?;

    let csv = std::fs::read_to_string(dir.path().join("output.csv"))?;
    check_value(
        csv.lines().count() == 5,
        "header + 1 line + 3 backfilled lines",
        format!("{}", csv.lines().count()),
    )?;
    let data = std::fs::read_to_string(dir.path().join("TPS.data"))?;
    let values: Vec<&str> = data.lines().collect();
    check_value(
        values == ["4", "6", "6", "6"],
        "backfilled lines carry the just-computed interval values",
        data.clone(),
    )
}

#[test]
fn two_ticks_in_the_same_second_write_once() -> CoreResult<()> {
    let dir = tempfile::tempdir()?;
    let mut fixture = aggregator_fixture();
    register_standard_views(&mut fixture.aggregator)?;
    fixture
        .aggregator
        .set_report_directory(dir.path().to_path_buf());
    fixture.aggregator.start_sampling(0);
    one_test(&mut fixture);

    fixture.aggregator.on_report_statistics(
        &[delta(1, &[("tps", 4.0)])],
        10_000,
        running_counts(),
    )?;
    fixture.aggregator.on_report_statistics(
        &[delta(1, &[("tps", 5.0)])],
        10_400,
        running_counts(),
    )?;
    let csv = std::fs::read_to_string(dir.path().join("output.csv"))?;
    check_value(
        csv.lines().count() == 2,
        "no second line before a second boundary",
        format!("{}", csv.lines().count()),
    )
}

#[test]
fn peak_tps_is_monotonic_and_tracks_the_maximum() -> CoreResult<()> {
    let mut fixture = aggregator_fixture();
    register_standard_views(&mut fixture.aggregator)?;
    fixture.aggregator.start_sampling(0);
    one_test(&mut fixture);

    let mut expected_peak = 0.0_f64;
    for (now_ms, tps) in [(10_000, 5.0), (11_000, 3.0), (12_000, 7.0), (13_000, 1.0)] {
        fixture
            .aggregator
            .on_report_statistics(&[delta(1, &[("tps", tps)])], now_ms, running_counts())?;
        if tps > expected_peak {
            expected_peak = tps;
        }
        check(
            (fixture.aggregator.peak_tps() - expected_peak).abs() < f64::EPSILON,
            "peak equals the maximum observed so far",
        )?;
    }
    let sample = fixture
        .current_sample()
        .ok_or_else(|| CoreError::coordinator("sample published"))?;
    check(
        (sample.peak_tps_for_graph - 7.0).abs() < f64::EPSILON,
        "published peak matches",
    )?;
    check(
        (sample.tps_chart_data - 1.0).abs() < f64::EPSILON,
        "published tps is the last interval's",
    )
}

#[test]
fn degenerate_expression_values_are_normalized() -> CoreResult<()> {
    let mut fixture = aggregator_fixture();
    register_standard_views(&mut fixture.aggregator)?;
    fixture.aggregator.start_sampling(0);
    one_test(&mut fixture);
    fixture.aggregator.on_report_statistics(
        &[delta(1, &[("tps", f64::NAN)])],
        10_000,
        running_counts(),
    )?;
    check(
        fixture.aggregator.tps_value().abs() < f64::EPSILON,
        "NaN evaluation stored as zero",
    )?;
    check(
        fixture.aggregator.peak_tps().abs() < f64::EPSILON,
        "peak unaffected by NaN",
    )
}

#[test]
fn execution_count_floors_tests_and_errors() -> CoreResult<()> {
    let mut fixture = aggregator_fixture();
    register_standard_views(&mut fixture.aggregator)?;
    fixture.aggregator.start_sampling(0);
    one_test(&mut fixture);
    fixture.aggregator.on_report_statistics(
        &[delta(1, &[("timedTests", 3.7), ("errors", 2.2)])],
        10_000,
        running_counts(),
    )?;
    let sample = fixture
        .current_sample()
        .ok_or_else(|| CoreError::coordinator("sample published"))?;
    check_value(
        sample.execution_count() == 5,
        "floor(Tests) + floor(Errors)",
        format!("{}", sample.execution_count()),
    )
}

#[test]
fn success_flag_tracks_worker_liveness() -> CoreResult<()> {
    let mut fixture = aggregator_fixture();
    register_standard_views(&mut fixture.aggregator)?;
    fixture.aggregator.start_sampling(0);
    one_test(&mut fixture);

    fixture.aggregator.on_report_statistics(
        &[delta(1, &[("tps", 1.0)])],
        10_000,
        running_counts(),
    )?;
    let sample = fixture
        .current_sample()
        .ok_or_else(|| CoreError::coordinator("sample published"))?;
    check(sample.success, "running workers mean the run is live")?;

    let drained = ProcessCounts {
        running_process: 1,
        running_thread: 0,
        not_finished_process: 1,
    };
    fixture
        .aggregator
        .on_report_statistics(&[delta(1, &[("tps", 1.0)])], 11_000, drained)?;
    let sample = fixture
        .current_sample()
        .ok_or_else(|| CoreError::coordinator("sample published"))?;
    check(!sample.success, "zero threads flip the flag")?;
    check(sample.running_thread == 0, "counts published verbatim")
}

#[test]
fn multiple_tests_publish_per_test_breakdowns() -> CoreResult<()> {
    let mut fixture = aggregator_fixture();
    register_standard_views(&mut fixture.aggregator)?;
    fixture.aggregator.start_sampling(0);
    two_tests(&mut fixture);

    for now_ms in [10_000, 11_000] {
        fixture.aggregator.on_report_statistics(
            &[
                delta(1, &[("timedTests", 2.0)]),
                delta(2, &[("timedTests", 3.0)]),
            ],
            now_ms,
            running_counts(),
        )?;
    }
    let sample = fixture
        .current_sample()
        .ok_or_else(|| CoreError::coordinator("sample published"))?;
    check(
        sample.cumulative_statistics.len() == 2,
        "one breakdown entry per test",
    )?;
    let first = sample
        .cumulative_statistics
        .first()
        .ok_or_else(|| CoreError::coordinator("first entry"))?;
    check(
        first.test_description == "login",
        "entries follow registration order",
    )?;
    let first_tests = first.statistics.get("Tests").copied().unwrap_or(0.0);
    check_value(
        (first_tests - 4.0).abs() < f64::EPSILON,
        "per-test cumulative slice",
        format!("{}", first_tests),
    )?;
    let second_last = sample
        .last_sample_statistics
        .get(1)
        .ok_or_else(|| CoreError::coordinator("second entry"))?;
    let second_tests = second_last.statistics.get("Tests").copied().unwrap_or(0.0);
    check_value(
        (second_tests - 3.0).abs() < f64::EPSILON,
        "per-test last interval slice",
        format!("{}", second_tests),
    )?;
    let total = sample.total_statistics.get("Tests").copied().unwrap_or(0.0);
    check_value(
        (total - 10.0).abs() < f64::EPSILON,
        "total spans every test",
        format!("{}", total),
    )
}

#[test]
fn sample_test_time_measures_from_run_start() -> CoreResult<()> {
    let mut fixture = aggregator_fixture();
    register_standard_views(&mut fixture.aggregator)?;
    fixture.aggregator.start_sampling(0);
    one_test(&mut fixture);
    fixture.start_time_ms.store(5_000, Ordering::Relaxed);
    fixture.aggregator.on_report_statistics(
        &[delta(1, &[("tps", 1.0)])],
        65_000,
        running_counts(),
    )?;
    let sample = fixture
        .current_sample()
        .ok_or_else(|| CoreError::coordinator("sample published"))?;
    check_value(
        sample.test_time == 60,
        "elapsed seconds since start_test",
        format!("{}", sample.test_time),
    )
}

#[test]
fn sustained_low_tps_raises_exactly_one_stop_signal() -> CoreResult<()> {
    let mut fixture = aggregator_fixture();
    register_standard_views(&mut fixture.aggregator)?;
    fixture.aggregator.start_sampling(0);
    one_test(&mut fixture);

    // No "tps" statistic in the deltas: the TPS view evaluates to zero.
    for now_ms in [1_000, 31_000, 60_999, 61_000, 61_001] {
        fixture.aggregator.on_report_statistics(
            &[delta(1, &[("timedTests", 1.0)])],
            now_ms,
            running_counts(),
        )?;
    }
    let reasons = fixture.stops.reasons();
    let fired = reasons
        .iter()
        .filter(|reason| **reason == StopReason::TooLowTps)
        .count();
    check_value(
        fired == 1,
        "exactly one low-tps signal",
        format!("{:?}", reasons),
    )
}

#[test]
fn sustained_error_ratio_raises_exactly_one_stop_signal() -> CoreResult<()> {
    let mut fixture = aggregator_fixture();
    register_standard_views(&mut fixture.aggregator)?;
    fixture.aggregator.start_sampling(0);
    one_test(&mut fixture);

    // errors=6 vs timedTests=4 on the first tick keeps the cumulative
    // ratio above one half for the whole run.
    fixture.aggregator.on_report_statistics(
        &[delta(1, &[("timedTests", 4.0), ("errors", 6.0), ("tps", 4.0)])],
        1_000,
        running_counts(),
    )?;
    for now_ms in [6_000, 10_999] {
        fixture
            .aggregator
            .on_report_statistics(&[delta(1, &[("tps", 4.0)])], now_ms, running_counts())?;
    }
    check(
        fixture.stops.reasons().is_empty(),
        "9,999 ms sustained fires nothing",
    )?;
    fixture
        .aggregator
        .on_report_statistics(&[delta(1, &[("tps", 4.0)])], 11_000, running_counts())?;
    let reasons = fixture.stops.reasons();
    check_value(
        reasons == [StopReason::TooManyErrors],
        "exactly one error signal at the window edge",
        format!("{:?}", reasons),
    )
}
