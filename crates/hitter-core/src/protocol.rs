use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

use crate::null_as_default;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 256 * 1024;

/// Unsigned integer that the service sends either as a JSON number or as a decimal string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LenientU64(pub u64);

impl From<u64> for LenientU64 {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl Serialize for LenientU64 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> Deserialize<'de> for LenientU64 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct LenientU64Visitor;

        impl<'de> Visitor<'de> for LenientU64Visitor {
            type Value = LenientU64;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("an unsigned integer as number or string")
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(LenientU64(value))
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                u64::try_from(value)
                    .map(LenientU64)
                    .map_err(|_| E::custom(format!("value cannot be negative: {value}")))
            }

            fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                if value.is_finite() && value >= 0.0 && value.fract() == 0.0 {
                    Ok(LenientU64(value as u64))
                } else {
                    Err(E::custom(format!("not an unsigned integer: {value}")))
                }
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                value
                    .trim()
                    .parse::<u64>()
                    .map(LenientU64)
                    .map_err(|err| E::custom(format!("invalid integer '{value}': {err}")))
            }
        }

        deserializer.deserialize_any(LenientU64Visitor)
    }
}

/// One throughput sample, `[timestamp_ms, value]` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QpsPoint {
    pub timestamp: u64,
    pub value: u64,
}

impl QpsPoint {
    pub fn new(timestamp: u64, value: u64) -> Self {
        Self { timestamp, value }
    }
}

impl Serialize for QpsPoint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (self.timestamp, self.value).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for QpsPoint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let (timestamp, value) = <(LenientU64, LenientU64)>::deserialize(deserializer)?;
        Ok(QpsPoint::new(timestamp.0, value.0))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollPayload {
    pub name: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub class: String,
}

impl CollPayload {
    pub fn tag(&self) -> String {
        if !self.tag.trim().is_empty() {
            return self.tag.trim().to_string();
        }
        self.name
            .chars()
            .next()
            .map(|ch| ch.to_ascii_uppercase().to_string())
            .unwrap_or_default()
    }

    pub fn active(&self) -> bool {
        self.class.split_whitespace().any(|class| class == "btn-success")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodePayload {
    pub name: String,
    #[serde(default, rename = "qpshistory", deserialize_with = "null_as_default")]
    pub qps_history: Vec<QpsPoint>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub logs: Vec<String>,
    #[serde(default, rename = "targetqps")]
    pub target_qps: LenientU64,
    #[serde(default)]
    pub procs: LenientU64,
    #[serde(default)]
    pub state: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub colls: Vec<CollPayload>,
}

impl NodePayload {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.trim().eq_ignore_ascii_case("play")
    }
}

/// Response of the one-shot state fetch performed on every (re)connect.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FullState {
    #[serde(default, rename = "qpstarget")]
    pub target_qps: LenientU64,
    #[serde(default, rename = "numprocs")]
    pub procs: LenientU64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub nodes: Vec<NodePayload>,
    #[serde(default, rename = "qpsdata", deserialize_with = "null_as_default")]
    pub qps_data: Vec<QpsPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum Inbound {
    #[serde(rename = "NEWNODE")]
    NewNode { node: NodePayload },
    #[serde(rename = "GONENODE")]
    GoneNode { node: String },
    #[serde(rename = "TARGETQPSAT")]
    TargetQpsAt { node: String, value: LenientU64 },
    #[serde(rename = "PROCSAT")]
    ProcsAt { node: String, value: LenientU64 },
    #[serde(rename = "QPS")]
    Qps { node: String, value: QpsPoint },
    #[serde(rename = "STARTED")]
    Started { node: String },
    #[serde(rename = "STOPPED")]
    Stopped { node: String },
    #[serde(rename = "COLLSTARTED")]
    CollStarted { node: String, coll: String },
    #[serde(rename = "COLLSTOPPED")]
    CollStopped { node: String, coll: String },
    #[serde(rename = "LOG")]
    Log { node: String, value: String },
    #[serde(rename = "DBSWITCHED")]
    DbSwitched { db: String },
    #[serde(other)]
    Unknown,
}

impl Inbound {
    pub fn tag(&self) -> &'static str {
        match self {
            Inbound::NewNode { .. } => "NEWNODE",
            Inbound::GoneNode { .. } => "GONENODE",
            Inbound::TargetQpsAt { .. } => "TARGETQPSAT",
            Inbound::ProcsAt { .. } => "PROCSAT",
            Inbound::Qps { .. } => "QPS",
            Inbound::Started { .. } => "STARTED",
            Inbound::Stopped { .. } => "STOPPED",
            Inbound::CollStarted { .. } => "COLLSTARTED",
            Inbound::CollStopped { .. } => "COLLSTOPPED",
            Inbound::Log { .. } => "LOG",
            Inbound::DbSwitched { .. } => "DBSWITCHED",
            Inbound::Unknown => "UNKNOWN",
        }
    }

    /// Name of the node the message addresses, if any.
    pub fn node_name(&self) -> Option<&str> {
        match self {
            Inbound::NewNode { node } => Some(node.name.as_str()),
            Inbound::GoneNode { node }
            | Inbound::TargetQpsAt { node, .. }
            | Inbound::ProcsAt { node, .. }
            | Inbound::Qps { node, .. }
            | Inbound::Started { node }
            | Inbound::Stopped { node }
            | Inbound::CollStarted { node, .. }
            | Inbound::CollStopped { node, .. }
            | Inbound::Log { node, .. } => Some(node.as_str()),
            Inbound::DbSwitched { .. } | Inbound::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("frame decode failed: {0}")]
    Decode(String),
    #[error("empty command")]
    EmptyCommand,
    #[error("unknown command verb '{0}'")]
    UnknownVerb(String),
    #[error("command {verb} is missing its {field}")]
    MissingArgument {
        verb: &'static str,
        field: &'static str,
    },
    #[error("invalid number '{value}' for {verb}")]
    InvalidNumber { verb: &'static str, value: String },
}

pub fn decode_inbound(text: &str, max_frame_bytes: usize) -> Result<Inbound, ProtocolError> {
    let raw = text.trim_end_matches(['\n', '\r']);
    if raw.len() > max_frame_bytes {
        return Err(ProtocolError::OversizedFrame {
            size: raw.len(),
            max: max_frame_bytes,
        });
    }
    serde_json::from_str(raw).map_err(|err| ProtocolError::Decode(err.to_string()))
}
