//! Derived-schedule recomputation engine.
//!
//! Four ordered stages, each a pure pass over arrays indexed by leg
//! position 0..35. Absence of an input value is a first-class `None` and
//! propagates; no stage ever fails.

use chrono::{DateTime, Duration, Utc};

/// Estimated leg durations in whole seconds: `round(mileage * pace)`.
///
/// A missing or non-positive effective pace yields `None`.
pub fn estimated_durations(
    mileage_mi: &[f64],
    effective_pace_spm: &[Option<f64>],
) -> Vec<Option<i64>> {
    mileage_mi
        .iter()
        .zip(effective_pace_spm.iter())
        .map(|(&mileage, &pace)| match pace {
            Some(pace) if pace > 0.0 => Some((mileage * pace).round() as i64),
            _ => None,
        })
        .collect()
}

/// Pure-schedule projection anchored at the race start.
///
/// The cursor assigns each leg's start before advancing by that leg's
/// estimated duration. A `None` duration does not advance the cursor, so
/// the next leg inherits the same projected start.
pub fn initial_estimates(
    race_start: Option<DateTime<Utc>>,
    durations_sec: &[Option<i64>],
) -> Vec<Option<DateTime<Utc>>> {
    let Some(start) = race_start else {
        return vec![None; durations_sec.len()];
    };
    let mut out = Vec::with_capacity(durations_sec.len());
    let mut cursor = start;
    for &duration in durations_sec {
        out.push(Some(cursor));
        if let Some(duration) = duration {
            cursor += Duration::seconds(duration);
        }
    }
    out
}

/// Projection re-anchored to the latest known actual start.
///
/// Every known actual start overwrites its slot; the highest-indexed one
/// becomes the anchor and later legs re-chain from it using the previous
/// leg's estimated duration. A `None` previous duration leaves the initial
/// projection in place for that slot. Independent of whether the race start
/// was ever set.
pub fn updated_estimates(
    initial: &[Option<DateTime<Utc>>],
    actual_starts: &[Option<DateTime<Utc>>],
    durations_sec: &[Option<i64>],
) -> Vec<Option<DateTime<Utc>>> {
    let mut out = initial.to_vec();

    let mut anchor: Option<usize> = None;
    for (idx, &actual) in actual_starts.iter().enumerate() {
        if let Some(actual) = actual {
            out[idx] = Some(actual);
            anchor = Some(idx);
        }
    }
    let Some(anchor_idx) = anchor else {
        return out;
    };
    let Some(anchor_start) = actual_starts[anchor_idx] else {
        return out;
    };

    let mut cursor = anchor_start;
    for idx in anchor_idx + 1..out.len() {
        if let Some(prev_duration) = durations_sec[idx - 1] {
            cursor += Duration::seconds(prev_duration);
            out[idx] = Some(cursor);
        }
    }
    out
}

/// Actual durations inferred from adjacent actual starts, the last leg
/// closed by the finish time. Never inferred across a gap.
pub fn actual_durations(
    actual_starts: &[Option<DateTime<Utc>>],
    finish: Option<DateTime<Utc>>,
) -> Vec<Option<i64>> {
    let mut out = vec![None; actual_starts.len()];
    if actual_starts.is_empty() {
        return out;
    }
    for idx in 0..actual_starts.len() - 1 {
        if let (Some(current), Some(next)) = (actual_starts[idx], actual_starts[idx + 1]) {
            out[idx] = Some(round_seconds(next - current));
        }
    }
    let last_idx = actual_starts.len() - 1;
    if let (Some(last), Some(finish)) = (actual_starts[last_idx], finish) {
        out[last_idx] = Some(round_seconds(finish - last));
    }
    out
}

#[derive(Clone, Debug, PartialEq)]
pub struct VanStints {
    pub estimated: Vec<Option<i64>>,
    pub actual: Vec<Option<i64>>,
}

/// Six-leg van stint sums, assigned to the last leg of each window.
///
/// A window contributes a sum only when all six member durations are known;
/// partial windows stay `None`, never a partial sum.
pub fn van_stints(estimated_sec: &[Option<i64>], actual_sec: &[Option<i64>]) -> VanStints {
    VanStints {
        estimated: window_sums(estimated_sec),
        actual: window_sums(actual_sec),
    }
}

fn window_sums(durations: &[Option<i64>]) -> Vec<Option<i64>> {
    let mut out = vec![None; durations.len()];
    let mut start = 0;
    while start + crate::LEGS_PER_STINT <= durations.len() {
        let window = &durations[start..start + crate::LEGS_PER_STINT];
        let end = start + crate::LEGS_PER_STINT - 1;
        if window.iter().all(Option::is_some) {
            out[end] = Some(window.iter().filter_map(|d| *d).sum());
        }
        start += crate::LEGS_PER_STINT;
    }
    out
}

/// Actual pace in seconds per mile, when the duration is known and the leg
/// has positive mileage.
pub fn actual_pace(actual_duration_sec: Option<i64>, mileage_mi: f64) -> Option<f64> {
    match actual_duration_sec {
        Some(duration) if mileage_mi > 0.0 => Some(duration as f64 / mileage_mi),
        _ => None,
    }
}

/// Drift of the actual start against the initial pure-schedule projection,
/// in rounded seconds.
pub fn delta_to_estimate(
    actual: Option<DateTime<Utc>>,
    initial: Option<DateTime<Utc>>,
) -> Option<i64> {
    match (actual, initial) {
        (Some(actual), Some(initial)) => Some(round_seconds(actual - initial)),
        _ => None,
    }
}

fn round_seconds(span: Duration) -> i64 {
    (span.num_milliseconds() as f64 / 1000.0).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn full_durations(value: i64) -> Vec<Option<i64>> {
        vec![Some(value); crate::LEG_COUNT]
    }

    #[test]
    fn estimated_duration_rounds_mileage_times_pace() {
        let durations = estimated_durations(&[5.0, 3.7, 4.0], &[Some(480.0), Some(495.5), None]);
        assert_eq!(durations, vec![Some(2400), Some(1833), None]);
    }

    #[test]
    fn non_positive_pace_counts_as_unset() {
        let durations = estimated_durations(&[5.0, 5.0], &[Some(0.0), Some(-60.0)]);
        assert_eq!(durations, vec![None, None]);
    }

    #[test]
    fn initial_estimates_worked_example() {
        // race start 13:00Z, leg 1 is 5 mi at 480 s/mi.
        let start = utc(2026, 8, 28, 13, 0, 0);
        let durations = estimated_durations(&[5.0, 5.0], &[Some(480.0), Some(480.0)]);
        assert_eq!(durations[0], Some(2400));
        let initial = initial_estimates(Some(start), &durations);
        assert_eq!(initial[0], Some(start));
        assert_eq!(initial[1], Some(utc(2026, 8, 28, 13, 40, 0)));
    }

    #[test]
    fn initial_estimates_null_start_yields_all_none() {
        let initial = initial_estimates(None, &full_durations(1800));
        assert!(initial.iter().all(Option::is_none));
    }

    #[test]
    fn initial_cursor_holds_across_unknown_durations() {
        let start = utc(2026, 8, 28, 13, 0, 0);
        let durations = vec![Some(600), None, Some(300)];
        let initial = initial_estimates(Some(start), &durations);
        // Leg 2 has no duration, so leg 3 inherits leg 2's projected start.
        assert_eq!(initial[1], Some(utc(2026, 8, 28, 13, 10, 0)));
        assert_eq!(initial[2], Some(utc(2026, 8, 28, 13, 10, 0)));
    }

    #[test]
    fn initial_estimates_monotonic_when_all_durations_known() {
        let start = utc(2026, 8, 28, 13, 0, 0);
        let initial = initial_estimates(Some(start), &full_durations(1500));
        for pair in initial.windows(2) {
            assert!(pair[0].unwrap() <= pair[1].unwrap());
        }
    }

    #[test]
    fn updated_equals_initial_without_actuals() {
        let start = utc(2026, 8, 28, 13, 0, 0);
        let durations = full_durations(1800);
        let initial = initial_estimates(Some(start), &durations);
        let updated = updated_estimates(&initial, &vec![None; crate::LEG_COUNT], &durations);
        assert_eq!(updated, initial);
    }

    #[test]
    fn anchor_is_highest_indexed_actual() {
        let start = utc(2026, 8, 28, 13, 0, 0);
        let durations = full_durations(1800);
        let initial = initial_estimates(Some(start), &durations);

        let mut actuals = vec![None; crate::LEG_COUNT];
        // Legs 3 and 7 (1-based) have actual starts; leg 7 must win.
        actuals[2] = Some(utc(2026, 8, 28, 14, 5, 0));
        actuals[6] = Some(utc(2026, 8, 28, 16, 30, 0));

        let updated = updated_estimates(&initial, &actuals, &durations);
        assert_eq!(updated[2], actuals[2]);
        assert_eq!(updated[6], actuals[6]);
        // Leg 8 re-chains from leg 7's actual start plus leg 7's duration.
        assert_eq!(updated[7], Some(utc(2026, 8, 28, 17, 0, 0)));
        assert_eq!(updated[8], Some(utc(2026, 8, 28, 17, 30, 0)));
        // Legs before the anchor keep their pure estimates.
        assert_eq!(updated[0], initial[0]);
        assert_eq!(updated[4], initial[4]);
    }

    #[test]
    fn late_start_worked_example() {
        // Leg 1 starts 10 min late; leg 2's updated start follows it.
        let start = utc(2026, 8, 28, 13, 0, 0);
        let durations = vec![Some(2400), Some(2400)];
        let initial = initial_estimates(Some(start), &durations);
        let actuals = vec![Some(utc(2026, 8, 28, 13, 10, 0)), None];
        let updated = updated_estimates(&initial, &actuals, &durations);
        assert_eq!(updated[1], Some(utc(2026, 8, 28, 13, 50, 0)));
        assert_eq!(delta_to_estimate(actuals[0], initial[0]), Some(600));
    }

    #[test]
    fn rechain_stops_assigning_past_duration_gap() {
        let start = utc(2026, 8, 28, 13, 0, 0);
        let mut durations = full_durations(1800);
        durations[3] = None;
        let initial = initial_estimates(Some(start), &durations);

        let mut actuals = vec![None; crate::LEG_COUNT];
        actuals[1] = Some(utc(2026, 8, 28, 13, 45, 0));
        let updated = updated_estimates(&initial, &actuals, &durations);

        // Legs 3 and 4 re-chain from the anchor.
        assert_eq!(updated[2], Some(utc(2026, 8, 28, 14, 15, 0)));
        assert_eq!(updated[3], Some(utc(2026, 8, 28, 14, 45, 0)));
        // Leg 4's duration is unknown, so leg 5 keeps its initial value.
        assert_eq!(updated[4], initial[4]);
        // And later legs resume chaining from wherever the cursor sits.
        assert_eq!(updated[5], Some(utc(2026, 8, 28, 15, 15, 0)));
    }

    #[test]
    fn anchor_works_without_race_start() {
        let durations = vec![Some(1200), Some(1200), Some(1200)];
        let initial = initial_estimates(None, &durations);
        let actuals = vec![Some(utc(2026, 8, 28, 6, 0, 0)), None, None];
        let updated = updated_estimates(&initial, &actuals, &durations);
        assert_eq!(updated[0], actuals[0]);
        assert_eq!(updated[1], Some(utc(2026, 8, 28, 6, 20, 0)));
        assert_eq!(updated[2], Some(utc(2026, 8, 28, 6, 40, 0)));
    }

    #[test]
    fn actual_durations_come_from_adjacent_starts() {
        let mut actuals = vec![None; crate::LEG_COUNT];
        actuals[9] = Some(utc(2026, 8, 28, 15, 0, 0));
        actuals[10] = Some(utc(2026, 8, 28, 15, 42, 30));
        let durations = actual_durations(&actuals, None);
        assert_eq!(durations[9], Some(2550));
        // Leg 9 has no start of its own, so no duration crosses the gap.
        assert_eq!(durations[8], None);
        assert_eq!(durations[10], None);
    }

    #[test]
    fn last_leg_duration_uses_finish_time() {
        let mut actuals = vec![None; crate::LEG_COUNT];
        actuals[35] = Some(utc(2026, 8, 29, 19, 0, 0));
        let finish = Some(utc(2026, 8, 29, 19, 38, 15));
        let durations = actual_durations(&actuals, finish);
        assert_eq!(durations[35], Some(2295));
        assert_eq!(actual_durations(&actuals, None)[35], None);
    }

    #[test]
    fn van_stint_requires_all_six_legs() {
        let mut estimated = full_durations(1800);
        let actual = vec![None; crate::LEG_COUNT];
        let stints = van_stints(&estimated, &actual);
        assert_eq!(stints.estimated[5], Some(10_800));
        assert_eq!(stints.estimated[11], Some(10_800));
        // Sums live only on window boundaries.
        assert_eq!(stints.estimated[4], None);
        assert_eq!(stints.estimated[6], None);
        assert!(stints.actual.iter().all(Option::is_none));

        // Removing one duration inside [1,6] flips the window to None;
        // restoring it restores the sum.
        estimated[3] = None;
        let broken = van_stints(&estimated, &actual);
        assert_eq!(broken.estimated[5], None);
        assert_eq!(broken.estimated[11], Some(10_800));
        estimated[3] = Some(1800);
        let restored = van_stints(&estimated, &actual);
        assert_eq!(restored.estimated[5], Some(10_800));
    }

    #[test]
    fn actual_pace_needs_positive_mileage() {
        assert_eq!(actual_pace(Some(2400), 5.0), Some(480.0));
        assert_eq!(actual_pace(Some(2400), 0.0), None);
        assert_eq!(actual_pace(None, 5.0), None);
    }

    #[test]
    fn delta_requires_both_instants() {
        let initial = utc(2026, 8, 28, 13, 0, 0);
        assert_eq!(
            delta_to_estimate(Some(utc(2026, 8, 28, 12, 55, 0)), Some(initial)),
            Some(-300)
        );
        assert_eq!(delta_to_estimate(None, Some(initial)), None);
        assert_eq!(delta_to_estimate(Some(initial), None), None);
    }
}
