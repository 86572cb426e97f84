//! Store contracts and the in-memory reference store.
//!
//! The engine never talks to storage; it consumes a [`Snapshot`] supplied by
//! a reader and presentation layers push [`WriteOp`]s through a writer.
//! Updates are last-write-wins per row field; no cross-field transaction is
//! required.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    Leg, LegInput, RaceConfig, Runner, SheetError, Snapshot, LEG_COUNT, RUNNER_COUNT,
};

/// One row-granular write, mirroring the mutation surface of the sheet.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "target", content = "payload", rename_all = "snake_case")]
pub enum WriteOp {
    RunnerPace {
        runner_number: u8,
        default_pace_spm: Option<f64>,
    },
    RunnerName {
        runner_number: u8,
        name: String,
    },
    LegFacts {
        leg: u8,
        facts: LegFactsPatch,
    },
    PaceOverride {
        leg: u8,
        pace_override_spm: Option<f64>,
    },
    ActualStart {
        leg: u8,
        actual_start_time: Option<DateTime<Utc>>,
    },
    RaceStart {
        race_start_time: Option<DateTime<Utc>>,
    },
    FinishTime {
        finish_time: Option<DateTime<Utc>>,
    },
}

/// Partial update of one leg's static course facts; `None` fields are left
/// untouched.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct LegFactsPatch {
    pub mileage_mi: Option<f64>,
    pub elev_gain_ft: Option<i32>,
    pub elev_loss_ft: Option<i32>,
    pub net_elev_diff_ft: Option<i32>,
    pub exchange_label: Option<String>,
    pub exchange_url: Option<String>,
}

/// Reader + writer contract the sheet core depends on.
pub trait SheetStore {
    fn load(&self) -> Result<Snapshot, SheetError>;
    fn apply(&mut self, op: &WriteOp) -> Result<(), SheetError>;
}

/// Apply one write to an in-memory snapshot. Shared by the reference store
/// and the offline replica so both sides mutate state through one path.
pub fn apply_to_snapshot(snapshot: &mut Snapshot, op: &WriteOp) -> Result<(), SheetError> {
    match op {
        WriteOp::RunnerPace {
            runner_number,
            default_pace_spm,
        } => {
            runner_mut(snapshot, *runner_number)?.default_pace_spm = *default_pace_spm;
        }
        WriteOp::RunnerName {
            runner_number,
            name,
        } => {
            runner_mut(snapshot, *runner_number)?.name = name.trim().to_string();
        }
        WriteOp::LegFacts { leg, facts } => {
            let row = leg_mut(snapshot, *leg)?;
            if let Some(mileage) = facts.mileage_mi {
                row.mileage_mi = mileage;
            }
            if let Some(gain) = facts.elev_gain_ft {
                row.elev_gain_ft = gain;
            }
            if let Some(loss) = facts.elev_loss_ft {
                row.elev_loss_ft = loss;
            }
            if let Some(net) = facts.net_elev_diff_ft {
                row.net_elev_diff_ft = net;
            }
            if let Some(label) = &facts.exchange_label {
                row.exchange_label = label.clone();
            }
            if let Some(url) = &facts.exchange_url {
                row.exchange_url = url.clone();
            }
        }
        WriteOp::PaceOverride {
            leg,
            pace_override_spm,
        } => {
            input_mut(snapshot, *leg)?.pace_override_spm = *pace_override_spm;
        }
        WriteOp::ActualStart {
            leg,
            actual_start_time,
        } => {
            input_mut(snapshot, *leg)?.actual_start_time = *actual_start_time;
        }
        WriteOp::RaceStart { race_start_time } => {
            snapshot.config.race_start_time = *race_start_time;
        }
        WriteOp::FinishTime { finish_time } => {
            snapshot.config.finish_time = *finish_time;
        }
    }
    Ok(())
}

fn runner_mut(snapshot: &mut Snapshot, runner_number: u8) -> Result<&mut Runner, SheetError> {
    snapshot
        .runners
        .iter_mut()
        .find(|r| r.runner_number == runner_number)
        .ok_or(SheetError::UnknownRunner(runner_number))
}

fn leg_mut(snapshot: &mut Snapshot, leg: u8) -> Result<&mut Leg, SheetError> {
    snapshot
        .legs
        .iter_mut()
        .find(|l| l.leg == leg)
        .ok_or(SheetError::UnknownLeg(leg))
}

fn input_mut(snapshot: &mut Snapshot, leg: u8) -> Result<&mut LegInput, SheetError> {
    snapshot
        .inputs
        .iter_mut()
        .find(|i| i.leg == leg)
        .ok_or(SheetError::UnknownLeg(leg))
}

/// Writes a pace edit expands into.
///
/// On a first-rotation leg the runner default IS the pace, so the edit
/// writes the default and then clears any stale override on that leg
/// (primary write first, dependent write second). Later legs carry an
/// independent per-leg override.
pub fn pace_edit_ops(
    snapshot: &Snapshot,
    leg: u8,
    pace_spm: Option<f64>,
) -> Result<Vec<WriteOp>, SheetError> {
    let row = snapshot
        .legs
        .iter()
        .find(|l| l.leg == leg)
        .ok_or(SheetError::UnknownLeg(leg))?;
    if usize::from(leg) <= RUNNER_COUNT {
        let mut ops = vec![WriteOp::RunnerPace {
            runner_number: row.runner_number,
            default_pace_spm: pace_spm,
        }];
        let stale_override = snapshot
            .inputs
            .iter()
            .find(|i| i.leg == leg)
            .and_then(|i| i.pace_override_spm)
            .is_some();
        if stale_override {
            ops.push(WriteOp::PaceOverride {
                leg,
                pace_override_spm: None,
            });
        }
        Ok(ops)
    } else {
        Ok(vec![WriteOp::PaceOverride {
            leg,
            pace_override_spm: pace_spm,
        }])
    }
}

/// One row of a bulk leg-facts import; every field is required.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LegImportRow {
    pub leg: u8,
    pub mileage_mi: f64,
    pub elev_gain_ft: i32,
    pub elev_loss_ft: i32,
    pub net_elev_diff_ft: i32,
    pub exchange_label: String,
    pub exchange_url: String,
}

/// Expand an import into per-leg fact writes, rejecting out-of-range rows.
pub fn import_leg_ops(rows: &[LegImportRow]) -> Result<Vec<WriteOp>, SheetError> {
    let mut ops = Vec::with_capacity(rows.len());
    for row in rows {
        if row.leg < 1 || usize::from(row.leg) > LEG_COUNT {
            return Err(SheetError::InvalidImportRow(format!(
                "leg {} outside 1..=36",
                row.leg
            )));
        }
        if !row.mileage_mi.is_finite() || row.mileage_mi < 0.0 {
            return Err(SheetError::InvalidImportRow(format!(
                "leg {} has invalid mileage {}",
                row.leg, row.mileage_mi
            )));
        }
        ops.push(WriteOp::LegFacts {
            leg: row.leg,
            facts: LegFactsPatch {
                mileage_mi: Some(row.mileage_mi),
                elev_gain_ft: Some(row.elev_gain_ft),
                elev_loss_ft: Some(row.elev_loss_ft),
                net_elev_diff_ft: Some(row.net_elev_diff_ft),
                exchange_label: Some(row.exchange_label.clone()),
                exchange_url: Some(row.exchange_url.clone()),
            },
        });
    }
    Ok(ops)
}

/// Freshly seeded sheet: 12 unnamed-pace runners, 36 five-mile legs, empty
/// inputs and config.
pub fn seed_snapshot() -> Snapshot {
    let runners = (1..=RUNNER_COUNT as u8)
        .map(|runner_number| Runner {
            runner_number,
            name: format!("Runner {runner_number}"),
            default_pace_spm: None,
        })
        .collect();
    let legs = (1..=LEG_COUNT as u8)
        .map(|leg| Leg {
            leg,
            runner_number: (leg - 1) % RUNNER_COUNT as u8 + 1,
            mileage_mi: 5.0,
            elev_gain_ft: 0,
            elev_loss_ft: 0,
            net_elev_diff_ft: 0,
            exchange_label: format!("Exchange {leg}"),
            exchange_url: "https://maps.google.com".to_string(),
        })
        .collect();
    let inputs = (1..=LEG_COUNT as u8).map(LegInput::empty).collect();
    Snapshot {
        config: RaceConfig::default(),
        runners,
        legs,
        inputs,
    }
}

/// In-memory store used by the CLI and by tests; single-row atomicity is
/// trivial here because every apply owns the whole snapshot.
#[derive(Clone, Debug)]
pub struct MemoryStore {
    snapshot: Snapshot,
}

impl MemoryStore {
    pub fn seeded() -> Self {
        Self {
            snapshot: seed_snapshot(),
        }
    }

    /// Wrap an existing snapshot, validating its shape at the boundary.
    pub fn new(snapshot: Snapshot) -> Result<Self, SheetError> {
        crate::validate(&snapshot)?;
        Ok(Self { snapshot })
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }
}

impl SheetStore for MemoryStore {
    fn load(&self) -> Result<Snapshot, SheetError> {
        Ok(self.snapshot.clone())
    }

    fn apply(&mut self, op: &WriteOp) -> Result<(), SheetError> {
        apply_to_snapshot(&mut self.snapshot, op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn seed_matches_expected_shape() {
        let snapshot = seed_snapshot();
        assert_eq!(snapshot.runners.len(), 12);
        assert_eq!(snapshot.legs.len(), 36);
        assert_eq!(snapshot.inputs.len(), 36);
        assert_eq!(snapshot.legs[0].runner_number, 1);
        assert_eq!(snapshot.legs[12].runner_number, 1);
        assert_eq!(snapshot.legs[35].runner_number, 12);
        assert_eq!(snapshot.legs[7].exchange_label, "Exchange 8");
        assert!(snapshot.config.race_start_time.is_none());
    }

    #[test]
    fn apply_rejects_unknown_rows() {
        let mut store = MemoryStore::seeded();
        let err = store
            .apply(&WriteOp::PaceOverride {
                leg: 37,
                pace_override_spm: Some(480.0),
            })
            .unwrap_err();
        assert!(matches!(err, SheetError::UnknownLeg(37)));
        let err = store
            .apply(&WriteOp::RunnerPace {
                runner_number: 0,
                default_pace_spm: None,
            })
            .unwrap_err();
        assert!(matches!(err, SheetError::UnknownRunner(0)));
    }

    #[test]
    fn leg_facts_patch_touches_only_given_fields() {
        let mut store = MemoryStore::seeded();
        store
            .apply(&WriteOp::LegFacts {
                leg: 4,
                facts: LegFactsPatch {
                    mileage_mi: Some(6.45),
                    elev_gain_ft: Some(812),
                    ..LegFactsPatch::default()
                },
            })
            .unwrap();
        let leg = &store.snapshot().legs[3];
        assert_eq!(leg.mileage_mi, 6.45);
        assert_eq!(leg.elev_gain_ft, 812);
        assert_eq!(leg.exchange_label, "Exchange 4");
    }

    #[test]
    fn later_write_wins_per_field() {
        let mut store = MemoryStore::seeded();
        let at = Utc.with_ymd_and_hms(2026, 8, 28, 13, 5, 0).unwrap();
        store
            .apply(&WriteOp::ActualStart {
                leg: 2,
                actual_start_time: Some(at),
            })
            .unwrap();
        store
            .apply(&WriteOp::ActualStart {
                leg: 2,
                actual_start_time: None,
            })
            .unwrap();
        assert!(store.snapshot().inputs[1].actual_start_time.is_none());
    }

    #[test]
    fn pace_edit_on_first_rotation_clears_stale_override() {
        let mut store = MemoryStore::seeded();
        store
            .apply(&WriteOp::PaceOverride {
                leg: 7,
                pace_override_spm: Some(520.0),
            })
            .unwrap();

        let ops = pace_edit_ops(store.snapshot(), 7, Some(475.0)).unwrap();
        assert_eq!(
            ops,
            vec![
                WriteOp::RunnerPace {
                    runner_number: 7,
                    default_pace_spm: Some(475.0),
                },
                WriteOp::PaceOverride {
                    leg: 7,
                    pace_override_spm: None,
                },
            ]
        );
        for op in &ops {
            store.apply(op).unwrap();
        }
        assert_eq!(store.snapshot().runners[6].default_pace_spm, Some(475.0));
        assert!(store.snapshot().inputs[6].pace_override_spm.is_none());
    }

    #[test]
    fn pace_edit_on_first_rotation_without_override_is_single_write() {
        let store = MemoryStore::seeded();
        let ops = pace_edit_ops(store.snapshot(), 3, Some(500.0)).unwrap();
        assert_eq!(ops.len(), 1);
    }

    #[test]
    fn pace_edit_on_later_leg_sets_override() {
        let store = MemoryStore::seeded();
        let ops = pace_edit_ops(store.snapshot(), 19, Some(505.0)).unwrap();
        assert_eq!(
            ops,
            vec![WriteOp::PaceOverride {
                leg: 19,
                pace_override_spm: Some(505.0),
            }]
        );
    }

    #[test]
    fn import_rejects_bad_rows() {
        let rows = vec![LegImportRow {
            leg: 40,
            mileage_mi: 5.0,
            elev_gain_ft: 0,
            elev_loss_ft: 0,
            net_elev_diff_ft: 0,
            exchange_label: String::new(),
            exchange_url: String::new(),
        }];
        assert!(import_leg_ops(&rows).is_err());
    }

    #[test]
    fn import_applies_full_rows() {
        let mut store = MemoryStore::seeded();
        let rows = vec![LegImportRow {
            leg: 1,
            mileage_mi: 5.44,
            elev_gain_ft: 257,
            elev_loss_ft: -1_368,
            net_elev_diff_ft: -1_111,
            exchange_label: "Timberline Lodge".to_string(),
            exchange_url: "https://maps.example/timberline".to_string(),
        }];
        for op in import_leg_ops(&rows).unwrap() {
            store.apply(&op).unwrap();
        }
        let leg = &store.snapshot().legs[0];
        assert_eq!(leg.mileage_mi, 5.44);
        assert_eq!(leg.net_elev_diff_ft, -1_111);
        assert_eq!(leg.exchange_label, "Timberline Lodge");
    }

    #[test]
    fn write_op_serde_round_trip() {
        let op = WriteOp::ActualStart {
            leg: 9,
            actual_start_time: Some(Utc.with_ymd_and_hms(2026, 8, 28, 18, 30, 0).unwrap()),
        };
        let json = serde_json::to_string(&op).unwrap();
        assert!(json.contains("\"target\":\"actual_start\""));
        let back: WriteOp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, op);
    }
}
