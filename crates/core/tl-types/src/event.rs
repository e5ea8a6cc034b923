//! Network event parsed from one input line.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Transport protocol of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
}

impl Protocol {
    /// Returns the wire name of the protocol.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "TCP",
            Self::Udp => "UDP",
            Self::Icmp => "ICMP",
        }
    }
}

/// A single network observation.
///
/// Input lines look like:
///
/// ```json
/// {"timestamp":"2024-05-01T12:00:00Z","src_ip":"10.0.0.50","dst_ip":"8.8.8.8",
///  "src_port":51234,"dst_port":443,"protocol":"TCP","payload":"GET / HTTP/1.1"}
/// ```
///
/// Any line that does not deserialize into this shape is malformed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkEvent {
    /// When the traffic was observed
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,

    /// Source address
    pub src_ip: String,

    /// Destination address
    pub dst_ip: String,

    /// Source port
    pub src_port: u16,

    /// Destination port
    pub dst_port: u16,

    /// Transport protocol
    pub protocol: Protocol,

    /// Captured payload text
    pub payload: String,

    /// Ground-truth label carried by some datasets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl NetworkEvent {
    /// Parses an event from one raw input line.
    pub fn from_slice(line: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(line)
    }
}

/// Parses an RFC 3339 timestamp.
///
/// Offset-less ISO 8601 timestamps (`2024-05-01T12:00:00.123456`, as written
/// by Python's `datetime.isoformat()`) are accepted and taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{}'", raw)))
}
