//! Display formatting for the sheet: durations, paces and race-local wall
//! times. Parse failures yield `None`, never an error.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::America::Los_Angeles;
use chrono_tz::Tz;

/// Timezone the race is run in; wall times are entered and shown in it.
pub const RACE_TZ: Tz = Los_Angeles;

const LOCAL_INPUT_FORMAT: &str = "%Y-%m-%dT%H:%M";

/// Signed `HH:MM:SS`, `-` for unknown.
pub fn format_hms(total_sec: Option<i64>) -> String {
    let Some(total) = total_sec else {
        return "-".to_string();
    };
    let sign = if total < 0 { "-" } else { "" };
    let sec = total.abs();
    format!("{sign}{:02}:{:02}:{:02}", sec / 3600, (sec % 3600) / 60, sec % 60)
}

/// `MM:SS/mi` pace, `-` for unknown or non-finite input.
pub fn format_pace(seconds_per_mile: Option<f64>) -> String {
    match seconds_per_mile {
        Some(pace) if pace.is_finite() => {
            let rounded = pace.round() as i64;
            format!("{:02}:{:02}/mi", rounded / 60, rounded % 60)
        }
        _ => "-".to_string(),
    }
}

/// Parse an RFC 3339 instant; anything unparseable becomes `None`.
pub fn parse_utc(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse a race-local `YYYY-MM-DDTHH:MM` wall time into a UTC instant.
pub fn parse_race_local(value: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(value.trim(), LOCAL_INPUT_FORMAT).ok()?;
    RACE_TZ
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Race-local wall time in the `YYYY-MM-DDTHH:MM` input shape, empty for
/// unknown.
pub fn format_race_local_input(value: Option<DateTime<Utc>>) -> String {
    match value {
        Some(instant) => instant
            .with_timezone(&RACE_TZ)
            .format(LOCAL_INPUT_FORMAT)
            .to_string(),
        None => String::new(),
    }
}

/// Friendly race-local display such as `Fri 1:05 PM`, `-` for unknown.
pub fn format_race_local_friendly(value: Option<DateTime<Utc>>) -> String {
    match value {
        Some(instant) => instant
            .with_timezone(&RACE_TZ)
            .format("%a %-I:%M %p")
            .to_string(),
        None => "-".to_string(),
    }
}

/// Parse a pace given as `MM:SS` or plain seconds per mile.
pub fn parse_pace(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Some((minutes, seconds)) = trimmed.split_once(':') {
        let minutes: f64 = minutes.parse().ok()?;
        let seconds: f64 = seconds.parse().ok()?;
        if !(0.0..60.0).contains(&seconds) {
            return None;
        }
        return Some(minutes * 60.0 + seconds);
    }
    trimmed.parse::<f64>().ok().filter(|pace| pace.is_finite())
}
