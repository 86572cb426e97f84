//! Display statistics for the sheet: per-column min/max and the RGB
//! gradients used to shade stat cells.

use serde::{Deserialize, Serialize};

use crate::DerivedRow;

pub type Rgb = [u8; 3];

const GREEN: Rgb = [183, 225, 205];
const WHITE: Rgb = [255, 255, 255];
const RED: Rgb = [245, 178, 178];

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct MinMax {
    pub min: f64,
    pub max: f64,
}

/// Min/max over a value series; empty input collapses to `{0, 0}`.
pub fn min_max(values: impl IntoIterator<Item = f64>) -> MinMax {
    let mut iter = values.into_iter();
    let Some(first) = iter.next() else {
        return MinMax::default();
    };
    let mut stat = MinMax {
        min: first,
        max: first,
    };
    for value in iter {
        stat.min = stat.min.min(value);
        stat.max = stat.max.max(value);
    }
    stat
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct HeatmapStats {
    pub mileage: MinMax,
    pub elev_gain: MinMax,
    pub elev_loss: MinMax,
    pub net_elev_diff: MinMax,
}

impl HeatmapStats {
    pub fn from_rows(rows: &[DerivedRow]) -> Self {
        Self {
            mileage: min_max(rows.iter().map(|r| r.mileage_mi)),
            elev_gain: min_max(rows.iter().map(|r| f64::from(r.elev_gain_ft))),
            elev_loss: min_max(rows.iter().map(|r| f64::from(r.elev_loss_ft))),
            net_elev_diff: min_max(rows.iter().map(|r| f64::from(r.net_elev_diff_ft))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeatColumn {
    Mileage,
    ElevGain,
    ElevLoss,
    NetElevDiff,
}

/// CSS color for one heat-mapped stat cell.
pub fn heat_color(column: HeatColumn, value: f64, stat: MinMax) -> String {
    match column {
        HeatColumn::Mileage | HeatColumn::NetElevDiff => {
            let mid = (stat.min + stat.max) / 2.0;
            three_stop_gradient(value, stat.min, mid, stat.max, GREEN, WHITE, RED)
        }
        HeatColumn::ElevGain => two_stop_gradient(value, stat.min, stat.max, WHITE, RED),
        HeatColumn::ElevLoss => two_stop_gradient(value, stat.min, stat.max, GREEN, WHITE),
    }
}

/// Background fill distinguishing the two vans, keyed by runner number.
pub fn van_fill(runner_number: u8) -> &'static str {
    if runner_number <= 6 {
        "#fff3c4"
    } else {
        "#d9f7df"
    }
}

/// Index of the first leg without an actual start, the "next leg up".
pub fn next_leg_index(rows: &[DerivedRow]) -> Option<usize> {
    rows.iter().position(|row| row.actual_start_time.is_none())
}

pub fn two_stop_gradient(value: f64, min: f64, max: f64, from: Rgb, to: Rgb) -> String {
    if max <= min {
        return rgb(from);
    }
    let t = ((value - min) / (max - min)).clamp(0.0, 1.0);
    rgb([
        lerp(from[0], to[0], t),
        lerp(from[1], to[1], t),
        lerp(from[2], to[2], t),
    ])
}

pub fn three_stop_gradient(
    value: f64,
    min: f64,
    mid: f64,
    max: f64,
    start: Rgb,
    middle: Rgb,
    end: Rgb,
) -> String {
    if value <= mid {
        two_stop_gradient(value, min, mid, start, middle)
    } else {
        two_stop_gradient(value, mid, max, middle, end)
    }
}

fn lerp(a: u8, b: u8, t: f64) -> u8 {
    (f64::from(a) + (f64::from(b) - f64::from(a)) * t).round() as u8
}

fn rgb([r, g, b]: Rgb) -> String {
    format!("rgb({r}, {g}, {b})")
}
