// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helpers shared by the message builders.

use std::fmt;

use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use fam_analytics_pipeline::PipelineError;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use tracing::warn;

/// Naive timestamps this close to the local clock are assumed to be local.
const LOCAL_THRESHOLD_MS: i64 = 5_000;

/// A user, anonymous or group id, always sent as a string.
///
/// Integers are rendered in decimal so that large ids survive JSON consumers
/// that parse numbers as doubles.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier(String);

impl Identifier {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Identifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl From<&str> for Identifier {
    fn from(id: &str) -> Self {
        Identifier(id.to_string())
    }
}

impl From<String> for Identifier {
    fn from(id: String) -> Self {
        Identifier(id)
    }
}

impl From<&String> for Identifier {
    fn from(id: &String) -> Self {
        Identifier(id.clone())
    }
}

macro_rules! identifier_from_integer {
    ($($int:ty),*) => {
        $(
            impl From<$int> for Identifier {
                fn from(id: $int) -> Self {
                    Identifier(id.to_string())
                }
            }
        )*
    };
}

identifier_from_integer!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);

impl From<Identifier> for Value {
    fn from(id: Identifier) -> Self {
        Value::String(id.0)
    }
}

/// `null` for a missing id.
pub fn id_value(id: Option<&Identifier>) -> Value {
    id.map_or(Value::Null, |id| Value::String(id.0.clone()))
}

/// When an event happened, with or without a known offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTime {
    Aware(DateTime<FixedOffset>),
    /// Resolved with [`guess_timezone`].
    Naive(NaiveDateTime),
}

impl EventTime {
    pub fn now() -> Self {
        EventTime::Aware(Utc::now().fixed_offset())
    }

    pub fn resolve(self) -> DateTime<FixedOffset> {
        match self {
            EventTime::Aware(dt) => dt,
            EventTime::Naive(dt) => guess_timezone(dt),
        }
    }

    /// ISO-8601 with an explicit offset, e.g. `2014-09-03T00:00:00+00:00`.
    pub fn to_iso(self) -> String {
        self.resolve().to_rfc3339_opts(SecondsFormat::AutoSi, false)
    }

    pub fn timestamp_secs(self) -> i64 {
        self.resolve().timestamp()
    }

    pub fn timestamp_millis(self) -> i64 {
        self.resolve().timestamp_millis()
    }
}

impl<Tz: TimeZone> From<DateTime<Tz>> for EventTime {
    fn from(dt: DateTime<Tz>) -> Self {
        EventTime::Aware(dt.fixed_offset())
    }
}

impl From<NaiveDateTime> for EventTime {
    fn from(dt: NaiveDateTime) -> Self {
        EventTime::Naive(dt)
    }
}

/// Gives a naive timestamp an offset. Values within a few seconds of the
/// local clock were most likely taken from it and get the local offset;
/// anything else is assumed to be UTC.
pub fn guess_timezone(dt: NaiveDateTime) -> DateTime<FixedOffset> {
    let delta = Local::now().naive_local() - dt;
    if delta.num_milliseconds() < LOCAL_THRESHOLD_MS {
        if let Some(local) = Local.from_local_datetime(&dt).earliest() {
            return local.fixed_offset();
        }
    }
    dt.and_utc().fixed_offset()
}

/// Serializes every value on its own. Entries that cannot become JSON are
/// logged and dropped; the rest are kept.
pub fn clean_properties<I, K, V>(entries: I) -> Map<String, Value>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Serialize,
{
    let mut cleaned = Map::new();
    for (key, value) in entries {
        let key = key.into();
        match serde_json::to_value(&value) {
            Ok(value) => {
                cleaned.insert(key, value);
            }
            Err(e) => {
                warn!("Dropping property \"{key}\": value is not serializable to JSON: {e}");
            }
        }
    }
    cleaned
}

pub fn remove_trailing_slash(host: &str) -> &str {
    host.strip_suffix('/').unwrap_or(host)
}

/// At least one of the two ids must be present.
pub fn require_identity(
    user_id: Option<&Identifier>,
    anonymous_id: Option<&Identifier>,
) -> Result<(), PipelineError> {
    if user_id.is_none() && anonymous_id.is_none() {
        return Err(PipelineError::Validation(
            "either user_id or anonymous_id is required".to_string(),
        ));
    }
    Ok(())
}

/// Rejects an empty string field.
pub fn require_non_empty(name: &str, value: &str) -> Result<(), PipelineError> {
    if value.trim().is_empty() {
        return Err(PipelineError::Validation(format!("{name} must not be empty")));
    }
    Ok(())
}
