//! Durations in config files are millisecond numbers; fractional values keep their
//! sub-millisecond part.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

#[derive(Deserialize)]
#[serde(untagged)]
enum Millis {
    Whole(u64),
    Fractional(f64),
}

pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    match Millis::deserialize(deserializer)? {
        Millis::Whole(millis) => Ok(Duration::from_millis(millis)),
        Millis::Fractional(millis) => {
            let nanos = (millis * 1_000_000.0).round();
            if !nanos.is_finite() || nanos < 0.0 || nanos >= u64::MAX as f64 {
                return Err(D::Error::custom(format!("invalid duration: {millis} ms")));
            }
            Ok(Duration::from_nanos(nanos as u64))
        }
    }
}
