use crate::HarvestError;
use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

/// Milliseconds per unit, longest spellings first so `ms` is not read as `m`
const UNITS: &[(&[&str], f64)] = &[
    (&["milliseconds", "millisecond", "ms"], 1.0),
    (&["seconds", "second", "secs", "sec", "s"], 1_000.0),
    (&["minutes", "minute", "mins", "min", "m"], 60_000.0),
    (&["hours", "hour", "hrs", "hr", "h"], 3_600_000.0),
];

/// `"3s"`, `"250ms"`, `"1.5m"`, `"2h"`; a bare integer is milliseconds.
pub fn parse_duration(input: &str) -> Result<Duration, HarvestError> {
    let text = input.trim();
    if let Ok(ms) = text.parse::<u64>() {
        return Ok(Duration::from_millis(ms));
    }

    let unit_at = text
        .find(|c: char| c.is_alphabetic())
        .unwrap_or(text.len());
    let (number, unit) = (text[..unit_at].trim(), text[unit_at..].trim());
    if number.is_empty() {
        return Err(HarvestError::Config(format!("no number in duration '{input}'")));
    }

    let scale = UNITS
        .iter()
        .find(|(names, _)| names.contains(&unit))
        .map(|(_, scale)| *scale)
        .ok_or_else(|| HarvestError::Config(format!("unknown unit '{unit}' in duration '{input}'")))?;
    let value: f64 = number
        .parse()
        .ok()
        .filter(|v: &f64| v.is_finite() && *v >= 0.0)
        .ok_or_else(|| HarvestError::Config(format!("bad number in duration '{input}'")))?;

    Ok(Duration::from_millis((value * scale).round() as u64))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Millis(u64),
    Text(String),
}

/// `#[serde(with = "duration")]` adapter: writes `"<n>ms"`, reads strings or bare milliseconds
pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("{}ms", value.as_millis()))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    match RawDuration::deserialize(deserializer)? {
        RawDuration::Millis(ms) => Ok(Duration::from_millis(ms)),
        RawDuration::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}
