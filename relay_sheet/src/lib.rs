//! Core relay planning sheet library implemented in Rust.
//!
//! One pure module computes every derived field of the 36-leg sheet; the
//! native CLI and the wasm web build both link this crate so the two
//! execution contexts stay numerically identical.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod format;
pub mod heatmap;
pub mod replica;
pub mod schedule;
pub mod store;

pub use heatmap::{HeatmapStats, MinMax};
pub use replica::{LocalReplica, QueuedWrite, ReplaySummary};
pub use store::{LegFactsPatch, LegImportRow, MemoryStore, SheetStore, WriteOp};

/// Number of legs in the relay course.
pub const LEG_COUNT: usize = 36;
/// Number of runners on the team; runner `n` covers legs `n`, `n+12`, `n+24`.
pub const RUNNER_COUNT: usize = 12;
/// Legs covered by one van between exchange handoffs.
pub const LEGS_PER_STINT: usize = 6;

#[derive(Error, Debug)]
pub enum SheetError {
    #[error("expected 36 legs, found {0}")]
    WrongLegCount(usize),
    #[error("legs must be numbered 1..=36 in order; position {position} holds leg {found}")]
    NonContiguousLegs { position: usize, found: u8 },
    #[error("expected 12 runners, found {0}")]
    WrongRunnerCount(usize),
    #[error("runners must be numbered 1..=12 in order; position {position} holds runner {found}")]
    NonContiguousRunners { position: usize, found: u8 },
    #[error("leg {leg} references runner {runner} outside 1..=12")]
    RunnerOutOfRange { leg: u8, runner: u8 },
    #[error("leg inputs must mirror legs 1..=36; position {position} holds leg {found}")]
    MisalignedInputs { position: usize, found: u8 },
    #[error("unknown leg {0}")]
    UnknownLeg(u8),
    #[error("unknown runner {0}")]
    UnknownRunner(u8),
    #[error("invalid import row: {0}")]
    InvalidImportRow(String),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Runner {
    pub runner_number: u8,
    pub name: String,
    pub default_pace_spm: Option<f64>,
}

/// Static course facts for one leg.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Leg {
    pub leg: u8,
    pub runner_number: u8,
    pub mileage_mi: f64,
    pub elev_gain_ft: i32,
    pub elev_loss_ft: i32,
    pub net_elev_diff_ft: i32,
    pub exchange_label: String,
    pub exchange_url: String,
}

/// Mutable race-time overrides for one leg.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LegInput {
    pub leg: u8,
    pub pace_override_spm: Option<f64>,
    pub actual_start_time: Option<DateTime<Utc>>,
}

impl LegInput {
    pub fn empty(leg: u8) -> Self {
        Self {
            leg,
            pace_override_spm: None,
            actual_start_time: None,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct RaceConfig {
    pub race_start_time: Option<DateTime<Utc>>,
    pub finish_time: Option<DateTime<Utc>>,
}

/// Complete sheet state as supplied by the store reader, ordered by leg.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub config: RaceConfig,
    pub runners: Vec<Runner>,
    pub legs: Vec<Leg>,
    pub inputs: Vec<LegInput>,
}

/// Per-leg computed view combining course facts, inputs and derived fields.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DerivedRow {
    pub leg: u8,
    pub runner_number: u8,
    pub runner_name: String,
    pub runner_default_pace_spm: Option<f64>,
    pub mileage_mi: f64,
    pub elev_gain_ft: i32,
    pub elev_loss_ft: i32,
    pub net_elev_diff_ft: i32,
    pub effective_pace_spm: Option<f64>,
    pub pace_override_spm: Option<f64>,
    pub estimated_duration_sec: Option<i64>,
    pub initial_estimated_start: Option<DateTime<Utc>>,
    pub updated_estimated_start: Option<DateTime<Utc>>,
    pub actual_start_time: Option<DateTime<Utc>>,
    pub actual_duration_sec: Option<i64>,
    pub actual_pace_spm: Option<f64>,
    pub delta_to_estimate_sec: Option<i64>,
    pub estimated_van_stint_sec: Option<i64>,
    pub actual_van_stint_sec: Option<i64>,
    pub exchange_label: String,
    pub exchange_url: String,
    pub is_override: bool,
}

/// Fully derived sheet, the serialized view consumed by presentation layers.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SheetView {
    pub rows: Vec<DerivedRow>,
    pub race_start_time: Option<DateTime<Utc>>,
    pub finish_time: Option<DateTime<Utc>>,
    pub heatmap: HeatmapStats,
}

/// Van (1 or 2) covering the given leg; vans alternate every six legs.
pub fn van_for_leg(leg: u8) -> u8 {
    (((u16::from(leg) - 1) / LEGS_PER_STINT as u16) % 2 + 1) as u8
}

/// Validate the structural shape of a store snapshot at the boundary.
///
/// The engine assumes a validated snapshot; callers reject malformed shapes
/// here instead of defensive checks inside every stage.
pub fn validate(snapshot: &Snapshot) -> Result<(), SheetError> {
    if snapshot.legs.len() != LEG_COUNT {
        return Err(SheetError::WrongLegCount(snapshot.legs.len()));
    }
    if snapshot.runners.len() != RUNNER_COUNT {
        return Err(SheetError::WrongRunnerCount(snapshot.runners.len()));
    }
    for (position, runner) in snapshot.runners.iter().enumerate() {
        if usize::from(runner.runner_number) != position + 1 {
            return Err(SheetError::NonContiguousRunners {
                position,
                found: runner.runner_number,
            });
        }
    }
    for (position, leg) in snapshot.legs.iter().enumerate() {
        if usize::from(leg.leg) != position + 1 {
            return Err(SheetError::NonContiguousLegs {
                position,
                found: leg.leg,
            });
        }
        if leg.runner_number < 1 || usize::from(leg.runner_number) > RUNNER_COUNT {
            return Err(SheetError::RunnerOutOfRange {
                leg: leg.leg,
                runner: leg.runner_number,
            });
        }
    }
    if snapshot.inputs.len() != LEG_COUNT {
        return Err(SheetError::WrongLegCount(snapshot.inputs.len()));
    }
    for (position, input) in snapshot.inputs.iter().enumerate() {
        if usize::from(input.leg) != position + 1 {
            return Err(SheetError::MisalignedInputs {
                position,
                found: input.leg,
            });
        }
    }
    Ok(())
}

/// Derive the complete sheet view from a validated snapshot.
///
/// Pure and side-effect free: identical snapshots yield identical views, so
/// the server read path and the client recompute path agree bit for bit.
pub fn derive_sheet(snapshot: &Snapshot) -> SheetView {
    let effective_paces: Vec<Option<f64>> = snapshot
        .legs
        .iter()
        .zip(snapshot.inputs.iter())
        .map(|(leg, input)| {
            let runner = &snapshot.runners[usize::from(leg.runner_number) - 1];
            input.pace_override_spm.or(runner.default_pace_spm)
        })
        .collect();
    let mileages: Vec<f64> = snapshot.legs.iter().map(|leg| leg.mileage_mi).collect();
    let actual_starts: Vec<Option<DateTime<Utc>>> = snapshot
        .inputs
        .iter()
        .map(|input| input.actual_start_time)
        .collect();

    let durations = schedule::estimated_durations(&mileages, &effective_paces);
    let initial = schedule::initial_estimates(snapshot.config.race_start_time, &durations);
    let updated = schedule::updated_estimates(&initial, &actual_starts, &durations);
    let actual_durations = schedule::actual_durations(&actual_starts, snapshot.config.finish_time);
    let stints = schedule::van_stints(&durations, &actual_durations);

    let rows: Vec<DerivedRow> = snapshot
        .legs
        .iter()
        .zip(snapshot.inputs.iter())
        .enumerate()
        .map(|(idx, (leg, input))| {
            let runner = &snapshot.runners[usize::from(leg.runner_number) - 1];
            let is_override = match (input.pace_override_spm, runner.default_pace_spm) {
                (Some(over), Some(default)) => over != default,
                _ => false,
            };
            DerivedRow {
                leg: leg.leg,
                runner_number: leg.runner_number,
                runner_name: runner.name.clone(),
                runner_default_pace_spm: runner.default_pace_spm,
                mileage_mi: leg.mileage_mi,
                elev_gain_ft: leg.elev_gain_ft,
                elev_loss_ft: leg.elev_loss_ft,
                net_elev_diff_ft: leg.net_elev_diff_ft,
                effective_pace_spm: effective_paces[idx],
                pace_override_spm: input.pace_override_spm,
                estimated_duration_sec: durations[idx],
                initial_estimated_start: initial[idx],
                updated_estimated_start: updated[idx],
                actual_start_time: input.actual_start_time,
                actual_duration_sec: actual_durations[idx],
                actual_pace_spm: schedule::actual_pace(actual_durations[idx], leg.mileage_mi),
                delta_to_estimate_sec: schedule::delta_to_estimate(
                    input.actual_start_time,
                    initial[idx],
                ),
                estimated_van_stint_sec: stints.estimated[idx],
                actual_van_stint_sec: stints.actual[idx],
                exchange_label: leg.exchange_label.clone(),
                exchange_url: leg.exchange_url.clone(),
                is_override,
            }
        })
        .collect();

    let heatmap = HeatmapStats::from_rows(&rows);

    SheetView {
        rows,
        race_start_time: snapshot.config.race_start_time,
        finish_time: snapshot.config.finish_time,
        heatmap,
    }
}

/// Projected finish: the last leg's updated start plus its estimated duration.
pub fn estimated_finish_time(view: &SheetView) -> Option<DateTime<Utc>> {
    let last = view.rows.last()?;
    let start = last.updated_estimated_start?;
    let duration = last.estimated_duration_sec?;
    Some(start + chrono::Duration::seconds(duration))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn seeded_snapshot_validates() {
        let snapshot = store::seed_snapshot();
        assert!(validate(&snapshot).is_ok());
    }

    #[test]
    fn validate_rejects_wrong_leg_count() {
        let mut snapshot = store::seed_snapshot();
        snapshot.legs.pop();
        assert!(matches!(
            validate(&snapshot),
            Err(SheetError::WrongLegCount(35))
        ));
    }

    #[test]
    fn validate_rejects_gap_in_leg_numbering() {
        let mut snapshot = store::seed_snapshot();
        snapshot.legs[20].leg = 40;
        assert!(matches!(
            validate(&snapshot),
            Err(SheetError::NonContiguousLegs {
                position: 20,
                found: 40
            })
        ));
    }

    #[test]
    fn validate_rejects_runner_out_of_range() {
        let mut snapshot = store::seed_snapshot();
        snapshot.legs[4].runner_number = 13;
        assert!(matches!(
            validate(&snapshot),
            Err(SheetError::RunnerOutOfRange { leg: 5, runner: 13 })
        ));
    }

    #[test]
    fn van_alternates_every_six_legs() {
        assert_eq!(van_for_leg(1), 1);
        assert_eq!(van_for_leg(6), 1);
        assert_eq!(van_for_leg(7), 2);
        assert_eq!(van_for_leg(12), 2);
        assert_eq!(van_for_leg(13), 1);
        assert_eq!(van_for_leg(36), 2);
    }

    #[test]
    fn override_flag_requires_differing_set_values() {
        let mut snapshot = store::seed_snapshot();
        snapshot.runners[0].default_pace_spm = Some(480.0);
        snapshot.inputs[12].pace_override_spm = Some(480.0);
        snapshot.inputs[24].pace_override_spm = Some(500.0);
        let view = derive_sheet(&snapshot);
        // Leg 13: override equals the default, not flagged.
        assert!(!view.rows[12].is_override);
        // Leg 25: differing override, flagged.
        assert!(view.rows[24].is_override);
        // Leg 1: no override at all.
        assert!(!view.rows[0].is_override);
    }

    #[test]
    fn derive_sheet_is_idempotent() {
        let mut snapshot = store::seed_snapshot();
        snapshot.config.race_start_time = Some(utc(2026, 8, 28, 13, 0, 0));
        snapshot.config.finish_time = Some(utc(2026, 8, 29, 20, 0, 0));
        for runner in &mut snapshot.runners {
            runner.default_pace_spm = Some(450.0 + f64::from(runner.runner_number));
        }
        snapshot.inputs[0].actual_start_time = Some(utc(2026, 8, 28, 13, 10, 0));
        snapshot.inputs[5].actual_start_time = Some(utc(2026, 8, 28, 16, 2, 30));

        let first = derive_sheet(&snapshot);
        let second = derive_sheet(&snapshot);
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn effective_pace_prefers_override() {
        let mut snapshot = store::seed_snapshot();
        snapshot.runners[2].default_pace_spm = Some(510.0);
        snapshot.inputs[14].pace_override_spm = Some(470.0);
        let view = derive_sheet(&snapshot);
        // Runner 3 covers legs 3, 15, 27.
        assert_eq!(view.rows[2].effective_pace_spm, Some(510.0));
        assert_eq!(view.rows[14].effective_pace_spm, Some(470.0));
        assert_eq!(view.rows[26].effective_pace_spm, Some(510.0));
    }

    #[test]
    fn estimated_finish_follows_last_leg() {
        let mut snapshot = store::seed_snapshot();
        snapshot.config.race_start_time = Some(utc(2026, 8, 28, 13, 0, 0));
        for runner in &mut snapshot.runners {
            runner.default_pace_spm = Some(480.0);
        }
        let view = derive_sheet(&snapshot);
        let last = view.rows.last().unwrap();
        let expected = last.updated_estimated_start.unwrap()
            + chrono::Duration::seconds(last.estimated_duration_sec.unwrap());
        assert_eq!(estimated_finish_time(&view), Some(expected));
    }
}
