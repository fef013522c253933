//! Timed events: chat messages and traffic packets.
//!
//! Both dashboards deliver the same logical shape with different field
//! spellings. [`Event`] accepts either and keeps every field it does not
//! model explicitly in `attributes`.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::id::{EntityId, EventId};

/// Event creation time, microsecond precision, UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub DateTime<Utc>);

impl Timestamp {
    pub fn now() -> Self {
        Timestamp(Utc::now())
    }

    /// Builds a timestamp from fractional epoch seconds (the traffic feed's format).
    pub fn from_epoch_secs(secs: f64) -> Option<Self> {
        if !secs.is_finite() {
            return None;
        }
        DateTime::from_timestamp_micros((secs * 1_000_000.0).round() as i64).map(Timestamp)
    }

    pub fn from_micros(micros: i64) -> Option<Self> {
        DateTime::from_timestamp_micros(micros).map(Timestamp)
    }

    /// Accepts RFC 3339 as well as the backend's offset-less ISO form, which is
    /// read as UTC.
    pub fn parse(s: &str) -> Option<Self> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(Timestamp(dt.with_timezone(&Utc)));
        }
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| Timestamp(naive.and_utc()))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%H:%M:%S"))
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_rfc3339_opts(chrono::SecondsFormat::Micros, true))
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TimestampVisitor;

        impl Visitor<'_> for TimestampVisitor {
            type Value = Timestamp;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("epoch seconds or an ISO-8601 timestamp")
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Timestamp, E> {
                Timestamp::from_epoch_secs(v)
                    .ok_or_else(|| E::custom(format!("timestamp out of range: {v}")))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Timestamp, E> {
                self.visit_f64(v as f64)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Timestamp, E> {
                self.visit_f64(v as f64)
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Timestamp, E> {
                Timestamp::parse(v).ok_or_else(|| E::custom(format!("unparseable timestamp '{v}'")))
            }
        }

        deserializer.deserialize_any(TimestampVisitor)
    }
}

/// Delivery lifecycle of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    Pending,
    /// Server-originated records are confirmed by definition.
    #[default]
    #[serde(alias = "sent", alias = "received")]
    Confirmed,
    Failed,
}

impl DeliveryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryState::Pending => "pending",
            DeliveryState::Confirmed => "confirmed",
            DeliveryState::Failed => "failed",
        }
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A canonical timed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub sender: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<EntityId>,
    #[serde(rename = "content", alias = "data", alias = "payload")]
    pub payload: String,
    #[serde(rename = "timestamp", alias = "created_at")]
    pub created_at: Timestamp,
    #[serde(rename = "status", alias = "delivery_state", default)]
    pub delivery: DeliveryState,
    /// Human-readable sender name, when the backend announces one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl Event {
    /// True when the event was exchanged between `a` and `b` in either direction.
    pub fn is_between(&self, a: &EntityId, b: &EntityId) -> bool {
        let to = self.recipient.as_ref();
        (&self.sender == a && to == Some(b)) || (&self.sender == b && to == Some(a))
    }
}
