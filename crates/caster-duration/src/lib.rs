//! Human-readable `Duration` (de)serialization.
//!
//! Every timing knob in the orchestration core (dedup TTL, reviewer
//! deadlines, lock TTLs, tick intervals) is expressed in config as a
//! humantime string (`"2h"`, `"30s"`, `"500ms"`) but carried internally as
//! `std::time::Duration`. This crate centralizes the `serde` glue so every
//! config struct gets it via `#[serde(with = "caster_duration")]` instead of
//! re-deriving it.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Deserialize a `Duration` from either a humantime string or a raw
/// milliseconds integer.
pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Helper {
        String(String),
        Millis(u64),
    }

    match Helper::deserialize(deserializer)? {
        Helper::String(s) => humantime::parse_duration(&s)
            .map_err(|e| serde::de::Error::custom(format!("invalid duration {s:?}: {e}"))),
        Helper::Millis(ms) => Ok(Duration::from_millis(ms)),
    }
}

/// Serialize a `Duration` as a humantime string (round-trips with
/// [`deserialize`]).
pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&humantime::format_duration(*duration).to_string())
}

/// Same as [`deserialize`]/[`serialize`] but for `Option<Duration>`, used by
/// config fields that default to "unset".
pub mod option {
    use super::*;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Helper {
            None,
            String(String),
            Millis(u64),
        }

        match Option::<Helper>::deserialize(deserializer)? {
            None | Some(Helper::None) => Ok(None),
            Some(Helper::String(s)) => humantime::parse_duration(&s)
                .map(Some)
                .map_err(|e| serde::de::Error::custom(format!("invalid duration {s:?}: {e}"))),
            Some(Helper::Millis(ms)) => Ok(Some(Duration::from_millis(ms))),
        }
    }

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_str(&humantime::format_duration(*d).to_string()),
            None => serializer.serialize_none(),
        }
    }
}

/// Parse a humantime duration string, for CLI args and ad hoc config.
pub fn parse(s: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(s)
}

/// Format a `Duration` back to its humantime representation.
pub fn format(d: Duration) -> String {
    humantime::format_duration(d).to_string()
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Wrapper {
        #[serde(with = "crate")]
        ttl: Duration,
    }

    #[test]
    fn round_trips_through_json() {
        let w = Wrapper {
            ttl: Duration::from_secs(2_592_000),
        };
        let json = serde_json::to_string(&w).unwrap();
        let back: Wrapper = serde_json::from_str(&json).unwrap();
        assert_eq!(w, back);
    }

    #[test]
    fn accepts_millis_integer() {
        let w: Wrapper = serde_json::from_str(r#"{"ttl": 5000}"#).unwrap();
        assert_eq!(w.ttl, Duration::from_secs(5));
    }

    #[test]
    fn parse_and_format_round_trip() {
        let d = parse("72h").unwrap();
        assert_eq!(d, Duration::from_secs(72 * 3600));
        assert_eq!(format(Duration::from_secs(90)), "1m 30s");
    }

    #[test]
    fn rejects_garbage() {
        let err = serde_json::from_str::<Wrapper>(r#"{"ttl": "not-a-duration"}"#).unwrap_err();
        assert!(err.to_string().contains("invalid duration"));
    }
}
